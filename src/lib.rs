pub mod bridge;
pub mod chat;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod metrics;
pub mod providers;
pub mod resolver;
pub mod store;

// Re-export commonly used types for easier access
pub use bridge::{BridgeOutcome, BridgedStream, StreamBridge, Termination};
pub use chat::{ChatService, SendOutcome};
pub use config::{Config, load_config, load_config_from};
pub use dispatch::ChatDispatchService;
pub use errors::{AppError, AppResult};
pub use resolver::{ModelResolver, Resolution};
