//! 协调存储抽象
//!
//! 注册器与 watcher 只依赖 [`CoordinationStore`]，生产环境使用 etcd，
//! 测试与本地演示使用带 lease 过期的内存实现。

pub mod etcd;
pub mod memory;

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use etcd::EtcdStore;
pub use memory::MemoryStore;

/// lease 标识
pub type LeaseId = i64;

/// 存储修订号
pub type Revision = i64;

/// 键值对
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// 前缀读取结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeResult {
    pub kvs: Vec<KeyValue>,
    /// 读取时存储的修订号，watch 从 `revision + 1` 开始即可无缝衔接
    pub revision: Revision,
}

/// watch 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Put,
    Delete,
}

/// watch 事件
///
/// 删除事件的 `value` 可能为空（etcd 默认不返回旧值）。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub event_type: EventType,
    pub key: String,
    pub value: String,
    /// 事件发生时的修订号，断线重订阅时从 `mod_revision + 1` 继续
    pub mod_revision: Revision,
}

/// 事件流；流结束表示订阅被关闭
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// 协调存储 trait
///
/// 线性一致的 KV 服务，附带 lease 语义：lease 在 TTL 内未续期时，
/// 挂在其上的所有键自动删除。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// 读取单个键
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// 读取前缀下的全部键
    async fn get_prefix(&self, prefix: &str) -> Result<RangeResult>;

    /// 写入键，可选挂载 lease
    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()>;

    /// 申请 TTL 为 `ttl` 秒的 lease
    async fn grant(&self, ttl: i64) -> Result<LeaseId>;

    /// 删除键，键不存在不算错误
    async fn delete(&self, key: &str) -> Result<()>;

    /// 订阅前缀变化
    ///
    /// `start_revision` 为 `Some` 时从该修订号开始回放。
    async fn watch(&self, prefix: &str, start_revision: Option<Revision>) -> Result<WatchStream>;
}
