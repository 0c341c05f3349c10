use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

/// 控制台统一错误类型
///
/// 只有 `InvalidCredentials` 会展示给最终用户，其余错误都在认证子系统内部
/// 被消化为会话状态的迁移。权限不足不是错误，而是一次重定向。
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsoleError {
    // === 认证错误 ===
    #[error("登录失败: {message}")]
    InvalidCredentials { message: String },

    #[error("会话已失效 (HTTP {status})")]
    SessionExpired { status: u16 },

    // === 远端错误 ===
    #[error("网络错误: {operation}")]
    Network { operation: String, message: String },

    #[error("服务端错误 (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    // === 本地存储错误 ===
    #[error("会话缓存损坏: {key} - {reason}")]
    CorruptedCache { key: String, reason: String },

    #[error("存储错误: {operation} - {message}")]
    Storage { operation: String, message: String },

    // === 系统错误 ===
    #[error("配置错误: {key} - {reason}")]
    Configuration { key: String, reason: String },

    #[error("序列化错误: {format}")]
    Serialization { format: String, message: String },

    #[error("操作已取消: {operation}")]
    Cancelled { operation: String },

    #[error("内部系统错误: {message}")]
    Internal {
        message: String,
        details: Option<String>,
    },
}

/// 错误严重级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    Low,      // 可预期的认证结果
    Medium,   // 可降级处理的远端或缓存问题
    High,     // 影响会话可用性的错误
    Critical, // 配置或内部错误
}

impl ConsoleError {
    pub fn network(operation: &str, message: impl Into<String>) -> Self {
        ConsoleError::Network {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn storage(operation: &str, message: impl Into<String>) -> Self {
        ConsoleError::Storage {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    pub fn cancelled(operation: &str) -> Self {
        ConsoleError::Cancelled {
            operation: operation.to_string(),
        }
    }

    /// 获取错误的严重级别
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ConsoleError::InvalidCredentials { .. }
            | ConsoleError::SessionExpired { .. }
            | ConsoleError::Cancelled { .. } => ErrorSeverity::Low,
            ConsoleError::Network { .. }
            | ConsoleError::Server { .. }
            | ConsoleError::CorruptedCache { .. } => ErrorSeverity::Medium,
            ConsoleError::Storage { .. } | ConsoleError::Serialization { .. } => {
                ErrorSeverity::High
            }
            ConsoleError::Configuration { .. } | ConsoleError::Internal { .. } => {
                ErrorSeverity::Critical
            }
        }
    }

    /// 是否为可重试错误
    pub fn is_retryable(&self) -> bool {
        match self {
            ConsoleError::Network { .. } => true,
            ConsoleError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 是否为身份校验给出的授权类失败（401/403）
    pub fn is_auth_rejection(&self) -> bool {
        matches!(self, ConsoleError::SessionExpired { .. })
    }

    /// 是否应该展示给最终用户
    pub fn is_user_visible(&self) -> bool {
        matches!(self, ConsoleError::InvalidCredentials { .. })
    }

    /// 对应的 HTTP 状态码（如果错误来源于远端）
    pub fn http_status(&self) -> Option<u16> {
        match self {
            ConsoleError::SessionExpired { status } | ConsoleError::Server { status, .. } => {
                Some(*status)
            }
            ConsoleError::InvalidCredentials { .. } => Some(401),
            _ => None,
        }
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            ConsoleError::InvalidCredentials { message } if !message.is_empty() => {
                message.clone()
            }
            ConsoleError::InvalidCredentials { .. } => "邮箱或密码错误".to_string(),
            ConsoleError::SessionExpired { .. } => "登录已过期，请重新登录".to_string(),
            ConsoleError::Network { .. } => "无法连接服务器，请检查网络".to_string(),
            ConsoleError::Server { .. } => "服务暂时不可用，请稍后重试".to_string(),
            _ => "系统内部错误，请联系管理员".to_string(),
        }
    }

    /// 记录错误日志
    pub fn log(&self, component: &str) {
        match self.severity() {
            ErrorSeverity::Low => {
                debug!(component = %component, error = %self, "认证结果");
            }
            ErrorSeverity::Medium => {
                warn!(
                    component = %component,
                    error = %self,
                    retryable = self.is_retryable(),
                    "可降级错误"
                );
            }
            ErrorSeverity::High | ErrorSeverity::Critical => {
                error!(
                    component = %component,
                    error = %self,
                    severity = ?self.severity(),
                    "严重错误"
                );
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ConsoleError>;

// === 转换实现 ===

impl From<serde_json::Error> for ConsoleError {
    fn from(err: serde_json::Error) -> Self {
        ConsoleError::Serialization {
            format: "json".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for ConsoleError {
    fn from(err: serde_yaml::Error) -> Self {
        ConsoleError::Serialization {
            format: "yaml".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConsoleError::Serialization {
                format: "json".to_string(),
                message: err.to_string(),
            }
        } else if let Some(status) = err.status() {
            let code = status.as_u16();
            if code == 401 || code == 403 {
                ConsoleError::SessionExpired { status: code }
            } else {
                ConsoleError::Server {
                    status: code,
                    message: err.to_string(),
                }
            }
        } else if err.is_connect() {
            ConsoleError::network("connect", err.to_string())
        } else if err.is_timeout() {
            ConsoleError::network("timeout", err.to_string())
        } else {
            ConsoleError::network("http_request", err.to_string())
        }
    }
}
