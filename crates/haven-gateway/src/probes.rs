use std::sync::Arc;

use async_trait::async_trait;

use haven_llm::{ChatMessage, ChatRequest, ModelRouter};
use haven_memory::SessionRegistry;
use haven_monitor::HealthProbe;
use haven_storage::{BlobStore, KvStore};

/// Warm kv probe: write-read-delete a reserved key.
pub struct KvProbe {
    pub kv: Arc<dyn KvStore>,
}

#[async_trait]
impl HealthProbe for KvProbe {
    fn name(&self) -> &str {
        "kv"
    }

    async fn probe(&self) -> Result<(), String> {
        self.kv
            .put("health:probe", "ok")
            .await
            .map_err(|e| e.to_string())?;
        match self.kv.get("health:probe").await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err("probe key vanished".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Cold blob probe.
pub struct BlobProbe {
    pub blob: Arc<dyn BlobStore>,
}

#[async_trait]
impl HealthProbe for BlobProbe {
    fn name(&self) -> &str {
        "blob"
    }

    async fn probe(&self) -> Result<(), String> {
        self.blob
            .put("health/probe", b"ok")
            .await
            .map_err(|e| e.to_string())?;
        match self.blob.get("health/probe").await {
            Ok(Some(_)) => Ok(()),
            Ok(None) => Err("probe blob vanished".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// Memory-actor probe: a status round-trip against a reserved session.
/// `NotFound` still proves the actor loop is serving its mailbox.
pub struct MemoryProbe {
    pub sessions: Arc<SessionRegistry>,
}

#[async_trait]
impl HealthProbe for MemoryProbe {
    fn name(&self) -> &str {
        "memory-actor"
    }

    async fn probe(&self) -> Result<(), String> {
        let actor = self
            .sessions
            .actor(&haven_core::types::SessionId::from("health-probe"));
        match actor.status().await {
            Ok(_) => Ok(()),
            Err(haven_memory::MemoryError::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// LLM probe: a minimal one-token completion through the router.
pub struct LlmProbe {
    pub llm: Arc<ModelRouter>,
}

#[async_trait]
impl HealthProbe for LlmProbe {
    fn name(&self) -> &str {
        "llm"
    }

    async fn probe(&self) -> Result<(), String> {
        let mut req = ChatRequest::new("", "Reply with the single word: ok");
        req.messages.push(ChatMessage {
            role: haven_core::types::Role::User,
            content: "ping".to_string(),
        });
        req.max_tokens = 1;
        self.llm
            .complete(&req)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }
}
