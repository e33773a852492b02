mod client;
mod openai;

pub use client::{
    CompletionRequest, CompletionResponse, FinishReason, LlmClient, Message, Role, TokenUsage,
};
pub use openai::OpenAIClient;
pub(crate) use openai::response_to_error;
