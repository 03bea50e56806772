//! 事件总线统一错误定义
//!
//! `register` / `unregister` / `raise` 本身从不失败；这里的错误只服务于
//! 需要观察结果的调用方（`try_*` 系列构造与发布）以及 worker 的退出等待。
//!
use thiserror::Error;

/// 统一错误类型
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BusError {
    // --- 构造 ---
    #[error("no tokio runtime available: {reason}")]
    NoRuntime { reason: String },

    // --- 发布 ---
    #[error("no handlers registered, value discarded")]
    NoHandlers,
    #[error("event bus is closed, value discarded")]
    Closed,

    // --- 后台任务 ---
    #[error("event bus worker failed: {reason}")]
    Worker { reason: String },
}

/// 统一 Result 类型别名
pub type BusResult<T> = Result<T, BusError>;

impl From<tokio::runtime::TryCurrentError> for BusError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        BusError::NoRuntime {
            reason: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for BusError {
    fn from(err: tokio::task::JoinError) -> Self {
        BusError::Worker {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_runtime_error_is_reported_outside_tokio() {
        let err: BusError = tokio::runtime::Handle::try_current().unwrap_err().into();
        assert!(matches!(err, BusError::NoRuntime { .. }));
        assert!(err.to_string().starts_with("no tokio runtime available"));
    }

    #[test]
    fn display_messages() {
        assert_eq!(
            BusError::NoHandlers.to_string(),
            "no handlers registered, value discarded"
        );
        assert_eq!(
            BusError::Closed.to_string(),
            "event bus is closed, value discarded"
        );
    }
}
