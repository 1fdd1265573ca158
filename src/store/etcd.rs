//! etcd 协调存储实现

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions, GetOptions, PutOptions, WatchOptions};
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    CoordinationStore, EventType, KeyValue, LeaseId, RangeResult, Revision, WatchEvent,
    WatchStream,
};
use crate::config::StoreTarget;
use crate::error::{NamingError, Result, from_etcd};

/// etcd 存储
///
/// `Client` 内部是共享连接，克隆代价很低，每次操作克隆一份即可。
#[derive(Clone)]
pub struct EtcdStore {
    client: Client,
    target: String,
}

impl EtcdStore {
    /// 连接 etcd
    pub async fn connect(target: &StoreTarget, connect_timeout: Option<Duration>) -> Result<Self> {
        let endpoints = target.endpoints();
        let options = connect_timeout.map(|timeout| ConnectOptions::new().with_connect_timeout(timeout));

        let client = Client::connect(&endpoints, options)
            .await
            .map_err(|e| NamingError::connect(target.to_string(), e))?;

        debug!(endpoints = %target, "Connected to etcd");

        Ok(Self {
            client,
            target: target.to_string(),
        })
    }

    fn convert_kv(kv: &etcd_client::KeyValue) -> KeyValue {
        KeyValue {
            key: String::from_utf8_lossy(kv.key()).to_string(),
            value: String::from_utf8_lossy(kv.value()).to_string(),
        }
    }

    fn convert_event(event: &etcd_client::Event) -> Option<WatchEvent> {
        let kv = event.kv()?;
        let event_type = match event.event_type() {
            etcd_client::EventType::Put => EventType::Put,
            etcd_client::EventType::Delete => EventType::Delete,
        };
        let mod_revision = kv.mod_revision();
        let kv = Self::convert_kv(kv);
        Some(WatchEvent {
            event_type,
            key: kv.key,
            value: kv.value,
            mod_revision,
        })
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let mut client = self.client.clone();
        let resp = client
            .get(key, None)
            .await
            .map_err(|e| from_etcd("get", &self.target, e))?;

        Ok(resp.kvs().first().map(Self::convert_kv))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<RangeResult> {
        let mut client = self.client.clone();
        let opts = GetOptions::new().with_prefix();
        let resp = client
            .get(prefix, Some(opts))
            .await
            .map_err(|e| from_etcd("get", &self.target, e))?;

        let revision = resp.header().map(|h| h.revision()).unwrap_or_default();
        Ok(RangeResult {
            kvs: resp.kvs().iter().map(Self::convert_kv).collect(),
            revision,
        })
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut client = self.client.clone();
        let opts = lease.map(|id| PutOptions::new().with_lease(id));
        client
            .put(key, value, opts)
            .await
            .map_err(|e| from_etcd("put", &self.target, e))?;
        Ok(())
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseId> {
        let mut client = self.client.clone();
        let lease = client
            .lease_grant(ttl, None)
            .await
            .map_err(|e| from_etcd("grant", &self.target, e))?;
        Ok(lease.id())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut client = self.client.clone();
        client
            .delete(key, None)
            .await
            .map_err(|e| from_etcd("delete", &self.target, e))?;
        Ok(())
    }

    async fn watch(&self, prefix: &str, start_revision: Option<Revision>) -> Result<WatchStream> {
        let mut client = self.client.clone();
        let mut opts = WatchOptions::new().with_prefix();
        if let Some(revision) = start_revision {
            opts = opts.with_start_revision(revision);
        }

        let (watcher, stream) = client
            .watch(prefix, Some(opts))
            .await
            .map_err(|e| from_etcd("watch", &self.target, e))?;

        let target = self.target.clone();
        // watcher 必须随流存活，drop 后 etcd 侧会取消订阅
        let events = futures::stream::unfold(Some((watcher, stream)), move |state| {
            let target = target.clone();
            async move {
                let (watcher, mut stream) = state?;
                match stream.message().await {
                    Ok(Some(resp)) => {
                        if resp.canceled() {
                            // 起始修订号已被压缩：报错让调用方重新读取快照
                            if resp.compact_revision() > 0 {
                                warn!(
                                    endpoints = %target,
                                    compact_revision = resp.compact_revision(),
                                    "Watch canceled by compaction"
                                );
                                let err = NamingError::Compacted {
                                    revision: resp.compact_revision(),
                                };
                                return Some((vec![Err(err)], None));
                            }
                            return None;
                        }
                        let batch: Vec<Result<WatchEvent>> = resp
                            .events()
                            .iter()
                            .filter_map(Self::convert_event)
                            .map(Ok)
                            .collect();
                        Some((batch, Some((watcher, stream))))
                    }
                    Ok(None) => None,
                    Err(e) => Some((vec![Err(from_etcd("watch", &target, e))], None)),
                }
            }
        })
        .flat_map(futures::stream::iter)
        .boxed();

        Ok(events)
    }
}
