//! Flare Naming 错误处理模块
//!
//! 错误分类：
//! - **Connect**: 注册或创建 watcher 时存储不可达，直接返回给调用方
//! - **Store**: 续约 / 快照期间的单次操作失败，记录日志后在下一周期自愈
//! - 会话结束不是错误，`next()` 返回空列表表示流结束

pub mod conversions;
pub mod naming_error;

pub use naming_error::{NamingError, Result};

pub(crate) use conversions::from_etcd;
