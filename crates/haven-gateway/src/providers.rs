use async_trait::async_trait;

use haven_llm::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Offline provider used when no inference endpoint is configured.
///
/// Answers from a tiny canned playbook so the gateway (and its end-to-end
/// tests) run without a model behind them. Marks every response with the
/// model name `offline-stub` so operators notice immediately.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    fn name(&self) -> &str {
        "offline-stub"
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let last_user = req
            .messages
            .iter()
            .rev()
            .find(|m| matches!(m.role, haven_core::types::Role::User))
            .map(|m| m.content.as_str())
            .unwrap_or_default()
            .to_lowercase();

        let content = if req.system.contains("compress customer-support conversations") {
            // Summarization request from the memory engine.
            format!(
                "Conversation covering {} exchanged messages; see transcript topics.",
                last_user.lines().count()
            )
        } else if last_user.contains("password") {
            "You can reset your password from the 'Forgot password' link on the \
             sign-in page; the email link expires after one hour."
                .to_string()
        } else if last_user.contains("ticket") {
            "I can open a support ticket for you. Could you confirm the issue \
             summary and its urgency?"
                .to_string()
        } else {
            "Thanks for reaching out. Could you share a few more details so I \
             can help or open a ticket for you?"
                .to_string()
        };

        Ok(ChatResponse {
            content,
            model: "offline-stub".to_string(),
            tokens_in: (req.messages.iter().map(|m| m.content.len()).sum::<usize>() / 4) as u32,
            tokens_out: 64,
            stop_reason: "stop".to_string(),
            tool_calls: Vec::new(),
        })
    }
}
