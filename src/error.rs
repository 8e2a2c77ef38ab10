//! 统一错误模型
//! 定义客户端各层的错误类型

use reqwest::StatusCode;
use thiserror::Error;

/// 刷新令牌失败原因
///
/// 需要 `Clone`：同一次刷新失败会被分发给所有排队等待的请求。
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Refresh token expired")]
    RefreshTokenExpired,

    #[error("Refresh request rejected with status {status}")]
    Rejected { status: u16 },

    #[error("Refresh request failed: {0}")]
    Network(String),

    #[error("Invalid refresh response: {0}")]
    InvalidResponse(String),

    /// 执行刷新的请求在完成前被取消
    #[error("Refresh was cancelled before completion")]
    Cancelled,
}

/// 存储错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// 客户端错误类型
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No refresh token available, please log in again")]
    NoRefreshToken,

    #[error("Session expired, please log in again")]
    RefreshTokenExpired,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(RefreshError),

    #[error("Request timed out")]
    Timeout,

    #[error("Authentication failed: {message}")]
    Unauthorized { message: String },

    #[error("Access denied: {message}")]
    Forbidden { message: String },

    #[error("HTTP {status}: {message}")]
    Http { status: StatusCode, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T, E = ApiError> = std::result::Result<T, E>;

impl ApiError {
    /// 获取 HTTP 状态码（非 HTTP 错误返回 None）
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ApiError::NoRefreshToken
            | ApiError::RefreshTokenExpired
            | ApiError::RefreshFailed(_)
            | ApiError::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            ApiError::Forbidden { .. } => Some(StatusCode::FORBIDDEN),
            ApiError::Http { status, .. } => Some(*status),
            ApiError::Timeout => Some(StatusCode::REQUEST_TIMEOUT),
            ApiError::Transport(_) | ApiError::Decode(_) | ApiError::Config(_) => None,
        }
    }

    /// 是否为需要重新登录的认证失败
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            ApiError::NoRefreshToken
                | ApiError::RefreshTokenExpired
                | ApiError::Unauthorized { .. }
        ) || matches!(self, ApiError::RefreshFailed(e) if *e != RefreshError::Cancelled)
    }

    /// 获取用户友好的错误消息（不包含敏感信息）
    pub fn user_message(&self) -> String {
        match self {
            ApiError::RefreshFailed(RefreshError::Cancelled) => {
                "The request was interrupted, please retry".to_string()
            }
            ApiError::NoRefreshToken
            | ApiError::RefreshTokenExpired
            | ApiError::RefreshFailed(_) => {
                "Your session has expired, please log in again".to_string()
            }
            ApiError::Unauthorized { .. } => "Authentication failed".to_string(),
            ApiError::Forbidden { .. } => "Access denied".to_string(),
            ApiError::Timeout => "The request timed out".to_string(),
            ApiError::Http { message, .. } if !message.is_empty() => message.clone(),
            ApiError::Http { status, .. } => format!("Request failed ({})", status.as_u16()),
            ApiError::Transport(_) => "Unable to reach the server".to_string(),
            ApiError::Decode(_) => "Unexpected server response".to_string(),
            ApiError::Config(_) => "Configuration error".to_string(),
        }
    }
}

impl From<RefreshError> for ApiError {
    fn from(err: RefreshError) -> Self {
        match err {
            RefreshError::NoRefreshToken => ApiError::NoRefreshToken,
            RefreshError::RefreshTokenExpired => ApiError::RefreshTokenExpired,
            other => ApiError::RefreshFailed(other),
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout
        } else if err.is_decode() {
            ApiError::Decode(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ApiError {
    fn from(err: config::ConfigError) -> Self {
        ApiError::Config(err.to_string())
    }
}
