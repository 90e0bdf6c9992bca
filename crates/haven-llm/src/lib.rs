//! LLM call layer: prompt assembly, the provider seam, primary/fallback
//! routing, and response shaping.

pub mod http;
pub mod prompt;
pub mod provider;
pub mod router;
pub mod shape;
pub mod summarize;

pub use prompt::{PromptBuilder, DEFAULT_SYSTEM_INSTRUCTION};
pub use provider::{
    ChatMessage, ChatRequest, ChatResponse, LlmProvider, ProviderError, ToolCall, ToolSpec,
};
pub use router::{ModelRouter, RoutedResponse};
pub use summarize::Summarizer;
