//! 命名服务统一错误类型

use thiserror::Error;

/// 注册 / 发现过程中的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NamingError {
    /// 无法连接协调存储（注册或创建 watcher 时致命）
    #[error("connect to store '{target}' failed: {reason}")]
    Connect { target: String, reason: String },

    /// 存储单次操作失败（续约 / 快照期间为瞬时错误）
    #[error("store {op} failed: {reason}")]
    Store { op: &'static str, reason: String },

    /// watch 起始修订号已被压缩，需要重新读取快照
    #[error("watch revision compacted, oldest available is {revision}")]
    Compacted { revision: i64 },

    /// 配置不合法
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// 配置文件读取或解析失败
    #[error("load config failed: {0}")]
    ConfigLoad(String),
}

impl NamingError {
    /// 创建连接错误
    pub fn connect(target: impl Into<String>, reason: impl ToString) -> Self {
        NamingError::Connect {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    /// 创建存储操作错误
    pub fn store(op: &'static str, reason: impl ToString) -> Self {
        NamingError::Store {
            op,
            reason: reason.to_string(),
        }
    }

    /// 创建配置错误
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        NamingError::InvalidConfig(msg.into())
    }

    /// 是否为连接类错误
    pub fn is_connect(&self) -> bool {
        matches!(self, NamingError::Connect { .. })
    }

    /// 是否为修订号压缩导致的 watch 取消
    pub fn is_compacted(&self) -> bool {
        matches!(self, NamingError::Compacted { .. })
    }

    /// 判断是否为可重试的错误
    ///
    /// 连接与存储操作失败都可能在下一次尝试时自愈；配置错误不会。
    pub fn is_retryable(&self) -> bool {
        matches!(self, NamingError::Connect { .. } | NamingError::Store { .. })
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, NamingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(NamingError::connect("http://127.0.0.1:2379", "refused").is_retryable());
        assert!(NamingError::store("put", "timeout").is_retryable());
        assert!(!NamingError::invalid_config("ttl must be positive").is_retryable());
        assert!(!NamingError::ConfigLoad("missing file".into()).is_retryable());
    }

    #[test]
    fn display_carries_context() {
        let err = NamingError::connect("http://10.0.0.1:2379", "connection refused");
        assert_eq!(
            err.to_string(),
            "connect to store 'http://10.0.0.1:2379' failed: connection refused"
        );
        assert!(err.is_connect());

        let err = NamingError::store("grant", "lease quota exceeded");
        assert_eq!(err.to_string(), "store grant failed: lease quota exceeded");
        assert!(!err.is_connect());
    }

    #[test]
    fn compacted_is_not_retried_in_place() {
        let err = NamingError::Compacted { revision: 42 };
        assert!(err.is_compacted());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "watch revision compacted, oldest available is 42"
        );
    }
}
