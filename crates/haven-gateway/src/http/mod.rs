pub mod chat;
pub mod ops;
pub mod sessions;
pub mod tools;
pub mod workflows;

use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;

use haven_core::types::RequestId;
use haven_core::HavenError;
use haven_guard::LimitDecision;
use haven_protocol::envelope::{
    ErrorEnvelope, HEADER_RATELIMIT_LIMIT, HEADER_RATELIMIT_REMAINING, HEADER_RATELIMIT_RESET,
    HEADER_RATELIMIT_SCOPE,
};

/// An error plus the correlation id, rendered as the §6 envelope.
pub struct ApiError {
    pub error: HavenError,
    pub request_id: RequestId,
}

impl ApiError {
    pub fn new(error: HavenError, request_id: RequestId) -> Self {
        Self { error, request_id }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = ErrorEnvelope::new(
            self.error.code(),
            self.error.to_string(),
            self.error.is_retryable(),
            self.error.retry_after_ms(),
            self.request_id.as_str(),
        );

        let mut response = (status, Json(envelope)).into_response();
        if let HavenError::RateLimited { ref scope, .. } = self.error {
            if let Ok(v) = HeaderValue::from_str(scope) {
                response.headers_mut().insert(HEADER_RATELIMIT_SCOPE, v);
            }
            response
                .headers_mut()
                .insert(HEADER_RATELIMIT_REMAINING, HeaderValue::from_static("0"));
        }
        response
    }
}

/// Attach the standard rate-limit headers from an admitted decision.
pub fn rate_headers(decision: &LimitDecision, scope: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HEADER_RATELIMIT_LIMIT,
        HeaderValue::from_str(&decision.limit.to_string()).unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        HEADER_RATELIMIT_REMAINING,
        HeaderValue::from_str(&decision.remaining.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        HEADER_RATELIMIT_RESET,
        HeaderValue::from_str(&decision.reset_unix.to_string())
            .unwrap_or(HeaderValue::from_static("0")),
    );
    headers.insert(
        HEADER_RATELIMIT_SCOPE,
        HeaderValue::from_str(scope).unwrap_or(HeaderValue::from_static("requests")),
    );
    headers
}
