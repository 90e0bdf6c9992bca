use std::sync::Arc;

use tracing::debug;

use haven_core::types::Role;

use crate::provider::{ChatMessage, ChatRequest, LlmProvider, ProviderError};

/// Output budget for summaries; they are compressions, not transcripts.
const SUMMARY_MAX_TOKENS: u32 = 512;

const SUMMARY_INSTRUCTION: &str = "\
You compress customer-support conversations. Merge the existing summary (if \
any) with the new transcript into one updated summary. Keep: the customer's \
issue(s), what was tried, ticket numbers, and any commitments made. Drop \
greetings and filler. Reply with the summary text only, max 10 sentences.";

/// Regenerates a session's running summary through the LLM layer.
pub struct Summarizer {
    provider: Arc<dyn LlmProvider>,
    model: String,
}

impl Summarizer {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }

    /// Merge `existing` and `transcript` into a fresh summary.
    pub async fn summarize(
        &self,
        existing: &str,
        transcript: &str,
    ) -> Result<String, ProviderError> {
        let mut body = String::new();
        if !existing.is_empty() {
            body.push_str("Existing summary:\n");
            body.push_str(existing);
            body.push_str("\n\n");
        }
        body.push_str("New transcript:\n");
        body.push_str(transcript);

        let mut req = ChatRequest::new(&self.model, SUMMARY_INSTRUCTION);
        req.messages.push(ChatMessage {
            role: Role::User,
            content: body,
        });
        req.max_tokens = SUMMARY_MAX_TOKENS;

        let resp = self.provider.complete(&req).await?;
        debug!(model = %self.model, chars = resp.content.len(), "summary generated");
        Ok(resp.content.trim().to_string())
    }
}

/// Render messages as a plain-text transcript for the summarizer.
pub fn transcript_of(messages: &[(Role, String)]) -> String {
    messages
        .iter()
        .map(|(role, content)| format!("{}: {}", role.to_string().to_uppercase(), content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct EchoProvider;

    #[async_trait]
    impl LlmProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }
        async fn complete(
            &self,
            req: &ChatRequest,
        ) -> Result<crate::provider::ChatResponse, ProviderError> {
            Ok(crate::provider::ChatResponse {
                content: format!("summary of {} chars", req.messages[0].content.len()),
                model: req.model.clone(),
                tokens_in: 1,
                tokens_out: 1,
                stop_reason: "stop".into(),
                tool_calls: Vec::new(),
            })
        }
    }

    #[tokio::test]
    async fn summarize_feeds_existing_and_transcript() {
        let s = Summarizer::new(Arc::new(EchoProvider), "small");
        let out = s.summarize("old summary", "USER: hi").await.unwrap();
        assert!(out.starts_with("summary of"));
    }

    #[test]
    fn transcript_renders_roles_upper_case() {
        let t = transcript_of(&[
            (Role::User, "my invoice is wrong".into()),
            (Role::Assistant, "let me check".into()),
        ]);
        assert_eq!(t, "USER: my invoice is wrong\nASSISTANT: let me check");
    }
}
