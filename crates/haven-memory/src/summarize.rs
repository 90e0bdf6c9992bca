use async_trait::async_trait;

/// Seam between the memory actor and the LLM layer's summarizer, so actors
/// can be exercised in tests without a model behind them.
#[async_trait]
pub trait SummaryEngine: Send + Sync {
    async fn summarize(
        &self,
        existing: &str,
        transcript: &str,
    ) -> std::result::Result<String, String>;
}

#[async_trait]
impl SummaryEngine for haven_llm::Summarizer {
    async fn summarize(
        &self,
        existing: &str,
        transcript: &str,
    ) -> std::result::Result<String, String> {
        haven_llm::Summarizer::summarize(self, existing, transcript)
            .await
            .map_err(|e| e.to_string())
    }
}
