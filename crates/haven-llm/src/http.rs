use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::provider::{ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall};

/// OpenAI-compatible chat-completions provider.
///
/// Works against any endpoint speaking the `/v1/chat/completions` dialect,
/// which is what the inference tier exposes in every deployment target.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    name: String,
    api_key: Option<String>,
    base_url: String,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        api_key: Option<String>,
        base_url: impl Into<String>,
        timeout_ms: u64,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(timeout_ms))
            .build()
            .unwrap_or_default();
        Self {
            client,
            name: name.into(),
            api_key,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let body = build_request_body(req);
        let url = format!("{}/v1/chat/completions", self.base_url);

        debug!(model = %req.model, provider = %self.name, "sending chat request");

        let mut builder = self
            .client
            .post(&url)
            .header("content-type", "application/json")
            .json(&body);
        if let Some(ref key) = self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let resp = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout { ms: 0 }
            } else {
                ProviderError::Http(e)
            }
        })?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(5000);
            return Err(ProviderError::RateLimited {
                retry_after_ms: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, provider = %self.name, "chat API error");
            return Err(ProviderError::Api {
                status,
                message: text,
            });
        }

        let api_resp: ApiResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        parse_response(api_resp, &req.model)
    }
}

fn build_request_body(req: &ChatRequest) -> serde_json::Value {
    let mut messages: Vec<serde_json::Value> = Vec::with_capacity(req.messages.len() + 1);
    messages.push(serde_json::json!({ "role": "system", "content": req.system }));
    for ChatMessage { role, content } in &req.messages {
        messages.push(serde_json::json!({ "role": role, "content": content }));
    }

    let mut body = serde_json::json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
        "temperature": req.temperature,
        "top_p": req.top_p,
        "frequency_penalty": req.frequency_penalty,
        "presence_penalty": req.presence_penalty,
    });

    if !req.tools.is_empty() {
        let tools: Vec<serde_json::Value> = req
            .tools
            .iter()
            .map(|t| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    }
                })
            })
            .collect();
        body["tools"] = serde_json::Value::Array(tools);
    }

    body
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Deserialize)]
struct ApiToolCall {
    id: String,
    function: ApiFunction,
}

#[derive(Deserialize)]
struct ApiFunction {
    name: String,
    arguments: String,
}

#[derive(Deserialize)]
struct ApiUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

fn parse_response(resp: ApiResponse, fallback_model: &str) -> Result<ChatResponse, ProviderError> {
    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Parse("response had no choices".to_string()))?;

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|c| {
            // Arguments arrive as a JSON string; bad JSON becomes an empty
            // object so a single mangled call doesn't sink the turn.
            let input = serde_json::from_str(&c.function.arguments)
                .unwrap_or_else(|_| serde_json::json!({}));
            ToolCall {
                id: c.id,
                name: c.function.name,
                input,
            }
        })
        .collect();

    let (tokens_in, tokens_out) = resp
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens))
        .unwrap_or((0, 0));

    Ok(ChatResponse {
        content: choice.message.content.unwrap_or_default(),
        model: resp.model.unwrap_or_else(|| fallback_model.to_string()),
        tokens_in,
        tokens_out,
        stop_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        tool_calls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_includes_tools_only_when_present() {
        let mut req = ChatRequest::new("m", "sys");
        let body = build_request_body(&req);
        assert!(body.get("tools").is_none());

        req.tools.push(crate::provider::ToolSpec {
            name: "kb_search".into(),
            description: "search".into(),
            input_schema: serde_json::json!({"type": "object"}),
        });
        let body = build_request_body(&req);
        assert_eq!(body["tools"][0]["function"]["name"], "kb_search");
    }

    #[test]
    fn tool_call_arguments_parse_from_string() {
        let resp = ApiResponse {
            choices: vec![ApiChoice {
                message: ApiMessage {
                    content: None,
                    tool_calls: Some(vec![ApiToolCall {
                        id: "tc-1".into(),
                        function: ApiFunction {
                            name: "kb_search".into(),
                            arguments: r#"{"query":"billing"}"#.into(),
                        },
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: None,
            model: None,
        };
        let parsed = parse_response(resp, "m").unwrap();
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].input["query"], "billing");
        assert_eq!(parsed.stop_reason, "tool_calls");
    }
}
