use rand::Rng;
use tracing::{info, warn};

use crate::provider::{ChatRequest, ChatResponse, LlmProvider, ProviderError};

/// Base delay for the single retry against the primary model.
const RETRY_BASE_MS: u64 = 500;

/// A completed routed call, with whether the fallback slot served it.
#[derive(Debug)]
pub struct RoutedResponse {
    pub response: ChatResponse,
    pub fallback_used: bool,
}

/// Routes chat requests to the primary model, with one backoff retry, then
/// the fallback model.
///
/// Rate-limit errors skip the primary retry (it would hit the same window)
/// and go straight to the fallback.
pub struct ModelRouter {
    primary: Box<dyn LlmProvider>,
    primary_model: String,
    fallback: Option<Box<dyn LlmProvider>>,
    fallback_model: String,
}

impl ModelRouter {
    pub fn new(
        primary: Box<dyn LlmProvider>,
        primary_model: impl Into<String>,
        fallback: Option<Box<dyn LlmProvider>>,
        fallback_model: impl Into<String>,
    ) -> Self {
        Self {
            primary,
            primary_model: primary_model.into(),
            fallback,
            fallback_model: fallback_model.into(),
        }
    }

    pub fn primary_model(&self) -> &str {
        &self.primary_model
    }

    /// Route one request. `req.model` is overwritten per slot so callers
    /// never have to know which model actually served the turn.
    pub async fn complete(&self, req: &ChatRequest) -> Result<RoutedResponse, ProviderError> {
        let mut primary_req = req.clone();
        primary_req.model = self.primary_model.clone();

        let first_err = match self.primary.complete(&primary_req).await {
            Ok(resp) => {
                return Ok(RoutedResponse {
                    response: resp,
                    fallback_used: false,
                })
            }
            Err(e) => e,
        };

        warn!(
            provider = self.primary.name(),
            model = %self.primary_model,
            err = %first_err,
            "primary model failed"
        );

        // One retry with exponential backoff, unless the window is closed anyway.
        let last_primary_err = if matches!(first_err, ProviderError::RateLimited { .. }) {
            first_err
        } else {
            let jitter = rand::thread_rng().gen_range(0..RETRY_BASE_MS);
            tokio::time::sleep(std::time::Duration::from_millis(RETRY_BASE_MS + jitter)).await;
            match self.primary.complete(&primary_req).await {
                Ok(resp) => {
                    info!(provider = self.primary.name(), "primary succeeded on retry");
                    return Ok(RoutedResponse {
                        response: resp,
                        fallback_used: false,
                    });
                }
                Err(e) => e,
            }
        };

        let Some(ref fallback) = self.fallback else {
            return Err(last_primary_err);
        };

        warn!(
            provider = fallback.name(),
            model = %self.fallback_model,
            "switching to fallback model"
        );

        let mut fallback_req = req.clone();
        fallback_req.model = self.fallback_model.clone();
        match fallback.complete(&fallback_req).await {
            Ok(resp) => Ok(RoutedResponse {
                response: resp,
                fallback_used: true,
            }),
            // The primary's error is the more useful one to surface.
            Err(fallback_err) => {
                warn!(err = %fallback_err, "fallback model failed too");
                Err(last_primary_err)
            }
        }
    }
}
