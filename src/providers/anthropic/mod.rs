//! Anthropic messages adapter.

pub mod model;
pub mod provider;

pub use model::*;
pub use provider::AnthropicProvider;
