//! 名字解析适配
//!
//! 把 [`PrefixWatcher`] 包装成通用的 `Resolver` / `Watcher` 接口，
//! 任何消费 `{next, close}` 的负载均衡器都可以直接接入。

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::StoreTarget;
use crate::discovery::update::Update;
use crate::discovery::watcher::PrefixWatcher;
use crate::error::Result;
use crate::key::DEFAULT_PREFIX;
use crate::store::{CoordinationStore, EtcdStore};

/// 地址更新流
#[async_trait]
pub trait Watcher: Send {
    /// 等待下一批更新，空列表表示会话结束
    async fn next(&mut self) -> Result<Vec<Update>>;

    /// 结束会话
    fn close(&mut self);
}

/// 按服务名创建 [`Watcher`]
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, service_name: &str) -> Result<Box<dyn Watcher>>;
}

#[async_trait]
impl Watcher for PrefixWatcher {
    async fn next(&mut self) -> Result<Vec<Update>> {
        PrefixWatcher::next(self).await
    }

    fn close(&mut self) {
        PrefixWatcher::close(self)
    }
}

/// etcd 解析器
///
/// 每个 watcher 独占一个新建的 etcd 客户端，关闭 watcher 即释放连接。
#[derive(Debug, Clone)]
pub struct EtcdResolver {
    target: StoreTarget,
    prefix: String,
    connect_timeout: Option<Duration>,
    shutdown: Option<CancellationToken>,
}

impl EtcdResolver {
    pub fn new(target: StoreTarget) -> Self {
        Self {
            target,
            prefix: DEFAULT_PREFIX.to_string(),
            connect_timeout: None,
            shutdown: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 上级 token 取消时，所有由本解析器创建的 watcher 一并结束
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// 创建具体类型的 watcher；连接失败直接返回
    pub async fn watch(&self, service_name: &str) -> Result<PrefixWatcher> {
        let store = EtcdStore::connect(&self.target, self.connect_timeout).await?;
        debug!(service = %service_name, endpoints = %self.target, "Resolver connected");
        let watcher = PrefixWatcher::new(Arc::new(store), &self.prefix, service_name);
        Ok(match &self.shutdown {
            Some(token) => watcher.with_shutdown(token),
            None => watcher,
        })
    }
}

#[async_trait]
impl Resolver for EtcdResolver {
    async fn resolve(&self, service_name: &str) -> Result<Box<dyn Watcher>> {
        Ok(Box::new(self.watch(service_name).await?))
    }
}

/// 基于已有存储的解析器（多个 watcher 共享同一个存储句柄）
#[derive(Clone)]
pub struct StoreResolver {
    store: Arc<dyn CoordinationStore>,
    prefix: String,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            prefix: DEFAULT_PREFIX.to_string(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn watch(&self, service_name: &str) -> PrefixWatcher {
        PrefixWatcher::new(self.store.clone(), &self.prefix, service_name)
    }
}

#[async_trait]
impl Resolver for StoreResolver {
    async fn resolve(&self, service_name: &str) -> Result<Box<dyn Watcher>> {
        Ok(Box::new(self.watch(service_name)))
    }
}
