use std::sync::Arc;

use haven_storage::KvStore;

use crate::types::ExecutionRecord;
use crate::{Result, WorkflowError};

fn key(execution_id: &str) -> String {
    format!("workflow:{execution_id}")
}

/// Write the execution snapshot. Called after every state transition so a
/// restart can resume from the latest recorded step.
pub async fn save(kv: &Arc<dyn KvStore>, record: &ExecutionRecord) -> Result<()> {
    let raw = serde_json::to_string(record).map_err(|e| WorkflowError::Internal(e.to_string()))?;
    kv.put(&key(&record.id), &raw)
        .await
        .map_err(|e| WorkflowError::StorageWrite(e.to_string()))
}

pub async fn load(kv: &Arc<dyn KvStore>, execution_id: &str) -> Result<Option<ExecutionRecord>> {
    let raw = kv
        .get(&key(execution_id))
        .await
        .map_err(|e| WorkflowError::StorageRead(e.to_string()))?;
    match raw {
        Some(raw) => {
            let record = serde_json::from_str(&raw)
                .map_err(|e| WorkflowError::Internal(format!("execution record: {e}")))?;
            Ok(Some(record))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ExecutionStatus, WorkflowContext};
    use haven_storage::MemoryKv;

    #[tokio::test]
    async fn save_load_roundtrip() {
        let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
        let record = ExecutionRecord {
            id: "e-1".into(),
            workflow_id: "wf".into(),
            context: WorkflowContext::default(),
            steps: Vec::new(),
            status: ExecutionStatus::Running,
            started_at: 1,
            finished_at: None,
        };
        save(&kv, &record).await.unwrap();
        let back = load(&kv, "e-1").await.unwrap().unwrap();
        assert_eq!(back.workflow_id, "wf");
        assert_eq!(back.status, ExecutionStatus::Running);
        assert!(load(&kv, "e-404").await.unwrap().is_none());
    }
}
