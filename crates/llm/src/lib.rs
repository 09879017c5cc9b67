//! LLM gateway: conversation types in the vendor wire format, per-model
//! pricing, layered system-prompt assembly, and the batch-with-polling
//! client that records every exchange.

pub mod gateway;
pub mod pricing;
pub mod prompt;
pub mod types;

pub use gateway::{
    LlmClient, LlmError, LlmGateway, Result, sleep_cancellable, strip_thinking_signatures,
    thinking_budget,
};
pub use pricing::{ModelPricing, compute_cost, pricing_for};
pub use prompt::{PromptLayers, layer_system_prompt};
pub use types::{
    CacheControl, CacheCreation, CacheTtl, ContentBlock, LlmReply, Message, Role, SystemBlock,
    TokenUsage, ToolDefinition,
};
