use thiserror::Error;

// Use anyhow::Result for collaborator traits and config loading
// Use thiserror for errors the dispatch layer has to tell apart

/// Errors surfaced by the chat dispatch core
#[derive(Error, Debug)]
pub enum AppError {
    /// No usable (non-placeholder) credential is configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model reference matched nothing and no fallback provider exists
    #[error("Model resolution failed: {0}")]
    Resolution(String),

    /// Vendor returned a non-success status or an unreadable payload
    #[error("Upstream error: {message}")]
    Upstream {
        status: u16,
        message: String,
    },

    /// Caller does not own the target conversation
    #[error("Unauthorized: {0}")]
    Authorization(String),

    /// Storage write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn resolution(msg: impl Into<String>) -> Self {
        Self::Resolution(msg.into())
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status the excluded transport layer should use for this error
    ///
    /// ## 功能说明
    /// 为传输层提供稳定的错误到状态码映射，核心本身不依赖任何HTTP框架
    ///
    /// ## 映射规则
    /// - `Validation` -> 400
    /// - `Authorization` -> 403
    /// - `Resolution` -> 404
    /// - `Upstream` -> 上游状态码（仅限4xx/5xx），否则502
    /// - `Cancelled` -> 499
    /// - 其余 -> 500
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::Validation(_) => 400,
            AppError::Authorization(_) => 403,
            AppError::Resolution(_) => 404,
            AppError::Upstream { status, .. } if (400..600).contains(status) => *status,
            AppError::Upstream { .. } => 502,
            AppError::Cancelled => 499,
            AppError::Configuration(_) | AppError::Persistence(_) | AppError::Internal(_) => 500,
        }
    }

    /// Machine-readable error category
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Configuration(_) => "configuration_error",
            AppError::Resolution(_) => "resolution_error",
            AppError::Upstream { .. } => "upstream_error",
            AppError::Authorization(_) => "authorization_error",
            AppError::Persistence(_) => "persistence_error",
            AppError::Validation(_) => "validation_error",
            AppError::Cancelled => "cancelled",
            AppError::Internal(_) => "internal_error",
        }
    }
}

/// Convert from anyhow::Error to AppError for error context
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        // Log the full error chain for debugging
        tracing::error!("Application error: {:?}", err);
        AppError::Internal(err.to_string())
    }
}

/// Helper type for results that use AppError
pub type AppResult<T> = Result<T, AppError>;
