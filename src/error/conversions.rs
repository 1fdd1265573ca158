//! 错误类型转换实现
//!
//! 将 etcd / IO / TOML 错误映射到 `NamingError`

use super::NamingError;
use std::io;

impl From<io::Error> for NamingError {
    fn from(err: io::Error) -> Self {
        NamingError::ConfigLoad(err.to_string())
    }
}

impl From<toml::de::Error> for NamingError {
    fn from(err: toml::de::Error) -> Self {
        NamingError::ConfigLoad(format!("TOML 解析错误: {}", err))
    }
}

/// 将 etcd 客户端错误映射为命名错误
///
/// 传输层错误以及 `UNAVAILABLE` / `DEADLINE_EXCEEDED` 状态视为连接失败，
/// 其余视为单次操作失败。
pub(crate) fn from_etcd(op: &'static str, target: &str, err: etcd_client::Error) -> NamingError {
    match &err {
        etcd_client::Error::TransportError(_) | etcd_client::Error::IoError(_) => {
            NamingError::connect(target, err)
        }
        etcd_client::Error::GRpcStatus(status)
            if matches!(
                status.code(),
                tonic::Code::Unavailable | tonic::Code::DeadlineExceeded
            ) =>
        {
            NamingError::connect(target, err)
        }
        _ => NamingError::store(op, err),
    }
}
