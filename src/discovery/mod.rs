//! 服务发现模块
//!
//! 客户端通过 [`Resolver`] 按服务名拿到 [`Watcher`]，反复拉取地址更新维护连接池：
//! 首次返回全量快照，之后逐个返回新增 / 移除事件。

pub mod balance;
pub mod resolver;
pub mod update;
pub mod watcher;

pub use balance::{feed_balance, http_endpoint};
pub use resolver::{EtcdResolver, Resolver, StoreResolver, Watcher};
pub use update::{Operation, Update};
pub use watcher::PrefixWatcher;
