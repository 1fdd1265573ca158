//! Flare Naming
//!
//! 基于 etcd lease 的 gRPC 服务注册与前缀 watch 解析：
//! - 服务端通过 [`Registrar`] 以带 TTL 的键宣告存活，周期续约，关闭时删除
//! - 客户端通过 [`Resolver`] 按服务名拿到 [`Watcher`]，先得到全量快照，
//!   再逐个得到新增 / 移除事件，用来维护负载均衡连接池

pub mod config;
pub mod discovery;
pub mod error;
pub mod key;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod store;

// Re-exports
pub use config::{NamingConfig, RegistryOptions, StoreTarget};
pub use discovery::{
    EtcdResolver, Operation, PrefixWatcher, Resolver, StoreResolver, Update, Watcher,
    feed_balance, http_endpoint,
};
pub use error::{NamingError, Result};
pub use key::DEFAULT_PREFIX;
pub use logging::{LogFormat, init_tracing};
pub use registry::{Registrar, register};
pub use retry::{ExponentialBackoffPolicy, FixedRetryPolicy, RetryPolicy};
pub use store::{CoordinationStore, EtcdStore, MemoryStore};
