pub mod client;
pub mod models;
pub mod parse;
pub mod prompts;
pub mod retry;

pub use client::{
    provider_from_config, AnthropicProvider, GeminiProvider, LlmGateway, LlmProvider,
    OpenRouterProvider,
};
pub use models::ProviderKind;
pub use parse::{parse_messages, parse_suspects, strip_markdown_fences, SumPolicy};
pub use prompts::{analysis_prompt, message_prompt, IncidentContext, MessageContext};
pub use retry::{RetryExhausted, RetryPolicy};
