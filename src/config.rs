use std::path::Path;

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::store::{CatalogModel, CredentialRecord};

/// 主配置结构体
///
/// 包含聊天网关的所有配置信息，从配置文件和环境变量加载
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// 调度配置（演示模式、超时、流缓冲）
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// 模型解析配置
    #[serde(default)]
    pub resolution: ResolutionConfig,
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 内存凭据存储的初始记录
    #[serde(default)]
    pub credentials: Vec<CredentialRecord>,
    /// 内存模型目录的初始记录
    #[serde(default)]
    pub models: Vec<CatalogModel>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DispatchConfig {
    /// Serve requests from the demo adapters when no real credential exists
    #[serde(default)]
    pub allow_demo_providers: bool,
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
    #[serde(default = "default_chat_timeout")]
    pub chat_timeout_seconds: u64,
    #[serde(default = "default_stream_setup_timeout")]
    pub stream_setup_timeout_seconds: u64,
    /// Per-word delay of the demo adapters; `None` keeps each flavour's own pace
    #[serde(default)]
    pub mock_delay_ms: Option<u64>,
    #[serde(default)]
    pub default_max_tokens: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ResolutionConfig {
    /// Provider used for references that match no catalog entry
    #[serde(default)]
    pub fallback_provider: Option<String>,
    /// Reject unmatched references instead of falling back
    #[serde(default)]
    pub strict: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Connection settings of one vendor adapter
#[derive(Deserialize, Serialize, Clone)]
pub struct ProviderDetail {
    pub api_key: String,
    pub api_base: String,
    #[serde(default = "default_chat_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_stream_setup_timeout")]
    pub stream_timeout_seconds: u64,
}

impl ProviderDetail {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: api_base.into(),
            timeout_seconds: default_chat_timeout(),
            stream_timeout_seconds: default_stream_setup_timeout(),
        }
    }
}

impl std::fmt::Debug for ProviderDetail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderDetail")
            .field("api_key", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("stream_timeout_seconds", &self.stream_timeout_seconds)
            .finish()
    }
}

// Default value functions
fn default_stream_buffer() -> usize { 10 }
fn default_chat_timeout() -> u64 { 30 }
fn default_stream_setup_timeout() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            allow_demo_providers: false,
            stream_buffer: default_stream_buffer(),
            chat_timeout_seconds: default_chat_timeout(),
            stream_setup_timeout_seconds: default_stream_setup_timeout(),
            mock_delay_ms: None,
            default_max_tokens: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Environment variable prefix; nested keys are separated by `__`
pub const ENV_PREFIX: &str = "CHAT_GATEWAY_";

/// 加载配置文件和环境变量
///
/// ## 功能说明
/// 从`chat-gateway.toml`和环境变量（前缀`CHAT_GATEWAY_`）加载配置
pub fn load_config() -> Result<Config> {
    load_config_from("chat-gateway.toml")
}

/// 从指定路径加载配置
///
/// ## 内部实现逻辑
/// 1. 加载TOML文件（文件不存在时全部使用默认值）
/// 2. 合并以`CHAT_GATEWAY_`开头的环境变量，`__`表示嵌套，例如
///    `CHAT_GATEWAY_DISPATCH__ALLOW_DEMO_PROVIDERS=true`
/// 3. 反序列化并调用`validate()`
///
/// ## 错误处理
/// - 文件格式错误或类型不匹配时返回解析错误
/// - 验证失败时返回带上下文的验证错误
pub fn load_config_from(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {} or environment variables", path.display()))?;

    config.validate().context("Configuration validation failed")?;

    Ok(config)
}

impl Config {
    /// 验证整个配置的有效性
    ///
    /// ## 返回值
    /// - `Ok(())`: 配置验证通过
    /// - `Err(anyhow::Error)`: 配置验证失败，包含出错的配置段
    pub fn validate(&self) -> Result<()> {
        self.dispatch
            .validate()
            .context("Dispatch configuration validation failed")?;

        self.resolution
            .validate()
            .context("Resolution configuration validation failed")?;

        self.logging
            .validate()
            .context("Logging configuration validation failed")?;

        for credential in &self.credentials {
            if credential.id.is_empty() {
                return Err(anyhow::anyhow!("Credential id cannot be empty"));
            }
            if credential.provider.is_empty() {
                return Err(anyhow::anyhow!("Credential '{}' has no provider", credential.id));
            }
            if let Some(url) = &credential.api_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(anyhow::anyhow!(
                        "Credential '{}' api_url must start with http:// or https://",
                        credential.id
                    ));
                }
            }
        }

        for model in &self.models {
            if model.id.is_empty() || model.value.is_empty() {
                return Err(anyhow::anyhow!("Catalog model id and value cannot be empty"));
            }
            if model.provider.is_empty() {
                return Err(anyhow::anyhow!("Catalog model '{}' has no provider", model.id));
            }
        }

        Ok(())
    }
}

impl DispatchConfig {
    /// 验证调度配置参数
    ///
    /// ## 参数验证规则
    /// - `stream_buffer`: 1-1024之间
    /// - `chat_timeout_seconds`: 1-600秒之间
    /// - `stream_setup_timeout_seconds`: 1-600秒之间
    /// - `default_max_tokens`: 如果提供，必须大于0
    pub fn validate(&self) -> Result<()> {
        if self.stream_buffer == 0 {
            return Err(anyhow::anyhow!("Stream buffer must be greater than 0"));
        }

        if self.stream_buffer > 1024 {
            return Err(anyhow::anyhow!("Stream buffer cannot exceed 1024"));
        }

        for (name, value) in [
            ("Chat timeout", self.chat_timeout_seconds),
            ("Stream setup timeout", self.stream_setup_timeout_seconds),
        ] {
            if value == 0 {
                return Err(anyhow::anyhow!("{} must be greater than 0", name));
            }
            if value > 600 {
                return Err(anyhow::anyhow!("{} cannot exceed 600 seconds", name));
            }
        }

        if self.default_max_tokens == Some(0) {
            return Err(anyhow::anyhow!("Default max tokens must be greater than 0"));
        }

        Ok(())
    }
}

impl ResolutionConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(provider) = &self.fallback_provider {
            if provider.trim().is_empty() {
                return Err(anyhow::anyhow!("Fallback provider cannot be an empty string"));
            }
            if provider.chars().any(|c| c.is_ascii_uppercase()) {
                return Err(anyhow::anyhow!(
                    "Fallback provider '{}' must be lowercase",
                    provider
                ));
            }
        }
        Ok(())
    }
}

impl LoggingConfig {
    /// 验证日志配置参数
    ///
    /// ## 参数验证规则
    /// - `level`: 必须是 "trace", "debug", "info", "warn", "error" 之一
    /// - `format`: 必须是 "json", "pretty", "compact" 之一
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level '{}': must be one of {:?}",
                self.level, valid_levels
            ));
        }

        let valid_formats = ["json", "pretty", "compact"];
        if !valid_formats.contains(&self.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format '{}': must be one of {:?}",
                self.format, valid_formats
            ));
        }

        Ok(())
    }
}
