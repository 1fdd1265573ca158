//! 基于 lease 的自注册
//!
//! 每个 [`Registrar`] 管理一条注册的完整生命周期：首次写入、周期续约、
//! 关闭时删除。续约在独立的 tokio 任务里进行，只观察一个
//! `CancellationToken`，取消即删除键并退出。

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RegistryOptions;
use crate::error::Result;
use crate::key;
use crate::store::{CoordinationStore, EtcdStore, LeaseId};

/// 一次续约需要的全部状态，续约任务持有一份
#[derive(Clone)]
struct Renewal {
    store: Arc<dyn CoordinationStore>,
    name: String,
    key: String,
    value: String,
    ttl: i64,
    lease_id: Arc<AtomicI64>,
}

impl Renewal {
    /// 申请 lease，读取键，不存在则写入，存在则在新 lease 下覆盖
    ///
    /// 失败只记录日志，交给下一次续约自愈。
    async fn renew_once(&self) -> Result<()> {
        let lease = match self.store.grant(self.ttl).await {
            Ok(lease) => lease,
            Err(e) => {
                warn!(service = %self.name, error = %e, "Grant lease failed, key left stale until next tick");
                return Err(e);
            }
        };

        match self.store.get(&self.key).await {
            Ok(None) => {
                if let Err(e) = self.store.put(&self.key, &self.value, Some(lease)).await {
                    warn!(service = %self.name, error = %e, "Set service with ttl failed");
                    return Err(e);
                }
                info!(service = %self.name, key = %self.key, lease_id = lease, "Service registered");
            }
            Ok(Some(_)) => {
                if let Err(e) = self.store.put(&self.key, &self.value, Some(lease)).await {
                    warn!(service = %self.name, error = %e, "Refresh service with ttl failed");
                    return Err(e);
                }
                debug!(service = %self.name, lease_id = lease, "Service refreshed");
            }
            Err(e) => {
                warn!(service = %self.name, error = %e, "Service connect to store failed");
                return Err(e);
            }
        }

        self.lease_id.store(lease, Ordering::SeqCst);
        Ok(())
    }

    /// 续约循环：按间隔续约，直到 token 被取消，然后删除键
    async fn run(self, token: CancellationToken, interval: Duration) -> Result<()> {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    // 进行中的续约也要能被取消打断
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = self.renew_once() => {}
                    }
                }
            }
        }

        self.lease_id.store(0, Ordering::SeqCst);
        deregister(self.store.as_ref(), &self.name, &self.key).await
    }
}

/// 删除注册键；失败记录日志后返回，不视为致命
async fn deregister(store: &dyn CoordinationStore, name: &str, key: &str) -> Result<()> {
    match store.delete(key).await {
        Ok(()) => {
            info!(service = %name, key = %key, "Deregister ok");
            Ok(())
        }
        Err(e) => {
            warn!(service = %name, key = %key, error = %e, "Deregister failed");
            Err(e)
        }
    }
}

struct Running {
    token: CancellationToken,
    handle: JoinHandle<Result<()>>,
}

/// 单条服务注册的句柄
///
/// 取代进程级的停止信号：每条注册有自己的 token，`unregister` 只影响自身。
/// drop 时取消 token，后台任务负责删除键。
pub struct Registrar {
    store: Arc<dyn CoordinationStore>,
    options: RegistryOptions,
    key: String,
    value: String,
    parent: Option<CancellationToken>,
    lease_id: Arc<AtomicI64>,
    running: Option<Running>,
}

impl Registrar {
    /// 连接 etcd 并创建注册句柄（尚未注册）
    pub async fn connect(options: RegistryOptions) -> Result<Self> {
        options.validate()?;
        let store = EtcdStore::connect(&options.target, options.connect_timeout).await?;
        Self::with_store(Arc::new(store), options)
    }

    /// 使用已有的存储创建注册句柄
    pub fn with_store(store: Arc<dyn CoordinationStore>, options: RegistryOptions) -> Result<Self> {
        options.validate()?;
        let key = key::service_key(&options.prefix, &options.name, &options.host, options.port);
        let value = key::service_value(&options.host, options.port);

        Ok(Self {
            store,
            options,
            key,
            value,
            parent: None,
            lease_id: Arc::new(AtomicI64::new(0)),
            running: None,
        })
    }

    /// 绑定进程级关闭 token，取消时本注册随之删除
    pub fn with_shutdown(mut self, parent: CancellationToken) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    /// 最近一次成功续约使用的 lease
    pub fn lease_id(&self) -> Option<LeaseId> {
        match self.lease_id.load(Ordering::SeqCst) {
            0 => None,
            id => Some(id),
        }
    }

    /// 续约任务是否仍在运行
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.handle.is_finished())
            .unwrap_or(false)
    }

    /// 注册服务
    ///
    /// 同步执行一次续约：存储不可达时直接返回错误，不启动任何任务；
    /// 其它失败只记录日志。随后启动后台续约任务并立即返回。
    pub async fn register(&mut self) -> Result<()> {
        if self.is_running() {
            warn!(service = %self.options.name, "Service already registered");
            return Ok(());
        }

        if !self.options.ttl_covers_interval() {
            warn!(
                service = %self.options.name,
                ttl = self.options.ttl,
                interval_ms = self.options.interval.as_millis() as u64,
                "TTL does not exceed renewal interval, instance may be evicted between renewals"
            );
        }

        let renewal = Renewal {
            store: self.store.clone(),
            name: self.options.name.clone(),
            key: self.key.clone(),
            value: self.value.clone(),
            ttl: self.options.ttl,
            lease_id: self.lease_id.clone(),
        };

        if let Err(e) = renewal.renew_once().await {
            if e.is_connect() {
                return Err(e);
            }
        }

        let token = match &self.parent {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        let handle = tokio::spawn(renewal.run(token.clone(), self.options.interval));
        self.running = Some(Running { token, handle });

        Ok(())
    }

    /// 注销服务：停止续约任务并删除键
    ///
    /// 未注册时仅尝试删除（键不存在不算错误）；重复调用是安全的。
    pub async fn unregister(&mut self) -> Result<()> {
        match self.running.take() {
            Some(running) => {
                running.token.cancel();
                match running.handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(service = %self.options.name, error = %e, "Renewal task aborted");
                        self.delete_now().await
                    }
                }
            }
            None => self.delete_now().await,
        }
    }

    async fn delete_now(&self) -> Result<()> {
        self.lease_id.store(0, Ordering::SeqCst);
        deregister(self.store.as_ref(), &self.options.name, &self.key).await
    }
}

impl Drop for Registrar {
    fn drop(&mut self) {
        // 后台任务在 token 取消后自行删除键
        if let Some(running) = self.running.take() {
            running.token.cancel();
        }
    }
}

/// 连接存储并注册，返回注册句柄
pub async fn register(options: RegistryOptions) -> Result<Registrar> {
    let mut registrar = Registrar::connect(options).await?;
    registrar.register().await?;
    Ok(registrar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreTarget;
    use crate::store::MemoryStore;

    fn options(ttl: i64, interval_secs: u64) -> RegistryOptions {
        RegistryOptions::new(
            "echo",
            "10.0.0.1",
            9000,
            StoreTarget::Url("memory".into()),
        )
        .with_prefix("reg")
        .with_ttl(ttl)
        .with_interval(Duration::from_secs(interval_secs))
    }

    #[tokio::test(start_paused = true)]
    async fn register_writes_single_entry() {
        let store = MemoryStore::new();
        let mut registrar = Registrar::with_store(Arc::new(store.clone()), options(5, 2)).unwrap();
        registrar.register().await.unwrap();

        let range = store.get_prefix("/reg/echo/").await.unwrap();
        assert_eq!(range.kvs.len(), 1);
        assert_eq!(range.kvs[0].key, "/reg/echo/10.0.0.1:9000");
        assert_eq!(range.kvs[0].value, "10.0.0.1:9000");
        assert!(registrar.lease_id().is_some());
        assert!(registrar.is_running());

        registrar.unregister().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn renewal_keeps_entry_alive_past_ttl() {
        let store = MemoryStore::new();
        let mut registrar = Registrar::with_store(Arc::new(store.clone()), options(5, 2)).unwrap();
        registrar.register().await.unwrap();
        let first_lease = registrar.lease_id();

        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(store.get("/reg/echo/10.0.0.1:9000").await.unwrap().is_some());
        assert_ne!(registrar.lease_id(), first_lease);

        registrar.unregister().await.unwrap();
        assert!(store.get("/reg/echo/10.0.0.1:9000").await.unwrap().is_none());
        assert!(!registrar.is_running());
        assert_eq!(registrar.lease_id(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_store_fails_register() {
        let store = MemoryStore::new();
        store.set_available(false).await;
        let mut registrar = Registrar::with_store(Arc::new(store.clone()), options(5, 2)).unwrap();

        let err = registrar.register().await.unwrap_err();
        assert!(err.is_connect());
        assert!(!registrar.is_running());
    }

    #[tokio::test]
    async fn unregister_without_register_is_harmless() {
        let store = MemoryStore::new();
        let mut registrar = Registrar::with_store(Arc::new(store.clone()), options(5, 2)).unwrap();
        registrar.unregister().await.unwrap();
        registrar.unregister().await.unwrap();
    }

    /// 首次 grant 正常，之后的 grant 永远挂起，模拟卡住的续约
    struct StallingStore {
        inner: MemoryStore,
        grants: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CoordinationStore for StallingStore {
        async fn get(&self, key: &str) -> Result<Option<crate::store::KeyValue>> {
            self.inner.get(key).await
        }

        async fn get_prefix(&self, prefix: &str) -> Result<crate::store::RangeResult> {
            self.inner.get_prefix(prefix).await
        }

        async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
            self.inner.put(key, value, lease).await
        }

        async fn grant(&self, ttl: i64) -> Result<LeaseId> {
            if self.grants.fetch_add(1, Ordering::SeqCst) > 0 {
                futures::future::pending::<()>().await;
            }
            self.inner.grant(ttl).await
        }

        async fn delete(&self, key: &str) -> Result<()> {
            self.inner.delete(key).await
        }

        async fn watch(
            &self,
            prefix: &str,
            start_revision: Option<crate::store::Revision>,
        ) -> Result<crate::store::WatchStream> {
            self.inner.watch(prefix, start_revision).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn unregister_interrupts_stuck_renewal() {
        let store = MemoryStore::new();
        let stalling = StallingStore {
            inner: store.clone(),
            grants: std::sync::atomic::AtomicUsize::new(0),
        };
        let mut registrar = Registrar::with_store(Arc::new(stalling), options(5, 2)).unwrap();
        registrar.register().await.unwrap();

        // 第二次续约在 t=2s 开始并挂起
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(registrar.is_running());
        assert!(store.get("/reg/echo/10.0.0.1:9000").await.unwrap().is_some());

        tokio::time::timeout(Duration::from_secs(1), registrar.unregister())
            .await
            .expect("unregister hung on in-flight renewal")
            .unwrap();
        assert!(store.get("/reg/echo/10.0.0.1:9000").await.unwrap().is_none());
        assert!(!registrar.is_running());
    }

    #[tokio::test]
    async fn invalid_options_rejected() {
        let store = Arc::new(MemoryStore::new());
        assert!(Registrar::with_store(store, options(0, 2)).is_err());
    }
}
