//! 内存协调存储
//!
//! 模拟 etcd 的键空间、修订号、lease 过期和前缀 watch，用于测试和本地演示。
//! lease 到期由 `tokio::time` 驱动，测试中可配合 `start_paused` 精确推进时间。

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    CoordinationStore, EventType, KeyValue, LeaseId, RangeResult, Revision, WatchEvent,
    WatchStream,
};
use crate::error::{NamingError, Result};

const TARGET: &str = "memory";

struct Entry {
    value: String,
    lease: Option<LeaseId>,
}

struct Subscriber {
    prefix: String,
    tx: mpsc::UnboundedSender<Result<WatchEvent>>,
}

struct State {
    available: bool,
    revision: Revision,
    next_lease: LeaseId,
    kvs: BTreeMap<String, Entry>,
    /// lease -> 挂载在其上的键
    leases: HashMap<LeaseId, HashSet<String>>,
    /// 全部事件，供带起始修订号的 watch 回放；只在 `compact` 时裁剪
    history: Vec<WatchEvent>,
    /// 早于此修订号的事件已被裁剪
    compacted: Revision,
    subscribers: Vec<Subscriber>,
}

impl State {
    fn check_available(&self) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(NamingError::connect(TARGET, "store unavailable"))
        }
    }

    fn detach(&mut self, key: &str, lease: Option<LeaseId>) {
        if let Some(keys) = lease.and_then(|id| self.leases.get_mut(&id)) {
            keys.remove(key);
        }
    }

    fn emit(&mut self, event: WatchEvent) {
        self.history.push(event.clone());
        self.subscribers.retain(|sub| {
            if !event.key.starts_with(&sub.prefix) {
                return !sub.tx.is_closed();
            }
            sub.tx.send(Ok(event.clone())).is_ok()
        });
    }

    fn put(&mut self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        if let Some(id) = lease {
            if !self.leases.contains_key(&id) {
                return Err(NamingError::store("put", format!("lease {} not found", id)));
            }
        }

        let previous = self.kvs.get(key).and_then(|e| e.lease);
        self.detach(key, previous);
        if let Some(keys) = lease.and_then(|id| self.leases.get_mut(&id)) {
            keys.insert(key.to_string());
        }

        self.revision += 1;
        self.kvs.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                lease,
            },
        );
        self.emit(WatchEvent {
            event_type: EventType::Put,
            key: key.to_string(),
            value: value.to_string(),
            mod_revision: self.revision,
        });
        Ok(())
    }

    fn delete(&mut self, key: &str) {
        if let Some(entry) = self.kvs.remove(key) {
            self.detach(key, entry.lease);
            self.revision += 1;
            // 与 etcd 一致：删除事件不带旧值
            self.emit(WatchEvent {
                event_type: EventType::Delete,
                key: key.to_string(),
                value: String::new(),
                mod_revision: self.revision,
            });
        }
    }

    fn expire_lease(&mut self, id: LeaseId) {
        let Some(keys) = self.leases.remove(&id) else {
            return;
        };
        for key in keys {
            debug!(lease_id = id, key = %key, "Lease expired, removing key");
            self.delete(&key);
        }
    }
}

/// 内存存储，克隆后共享同一份状态
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                available: true,
                revision: 0,
                next_lease: 1,
                kvs: BTreeMap::new(),
                leases: HashMap::new(),
                history: Vec::new(),
                compacted: 0,
                subscribers: Vec::new(),
            })),
        }
    }

    /// 模拟存储不可达 / 恢复
    pub async fn set_available(&self, available: bool) {
        self.state.lock().await.available = available;
    }

    /// 关闭所有 watch 订阅，模拟存储端关闭事件流
    pub async fn close_watches(&self) {
        self.state.lock().await.subscribers.clear();
    }

    /// 裁剪 `revision` 之前的事件历史，与 etcd compaction 语义一致
    ///
    /// 之后从更早修订号开始的 watch 会收到 [`NamingError::Compacted`] 并结束。
    pub async fn compact(&self, revision: Revision) {
        let mut state = self.state.lock().await;
        let revision = revision.min(state.revision + 1);
        if revision <= state.compacted {
            return;
        }
        state.history.retain(|event| event.mod_revision >= revision);
        state.compacted = revision;
    }

    /// 当前修订号
    pub async fn revision(&self) -> Revision {
        self.state.lock().await.revision
    }

    fn spawn_expiry(state: Weak<Mutex<State>>, id: LeaseId, ttl: i64) {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(ttl.max(0) as u64)).await;
            if let Some(state) = state.upgrade() {
                state.lock().await.expire_lease(id);
            }
        });
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let state = self.state.lock().await;
        state.check_available()?;
        Ok(state.kvs.get(key).map(|entry| KeyValue {
            key: key.to_string(),
            value: entry.value.clone(),
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<RangeResult> {
        let state = self.state.lock().await;
        state.check_available()?;
        let kvs = state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue {
                key: key.clone(),
                value: entry.value.clone(),
            })
            .collect();
        Ok(RangeResult {
            kvs,
            revision: state.revision,
        })
    }

    async fn put(&self, key: &str, value: &str, lease: Option<LeaseId>) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.put(key, value, lease)
    }

    async fn grant(&self, ttl: i64) -> Result<LeaseId> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(id, HashSet::new());
        Self::spawn_expiry(Arc::downgrade(&self.state), id, ttl);
        Ok(id)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.check_available()?;
        state.delete(key);
        Ok(())
    }

    async fn watch(&self, prefix: &str, start_revision: Option<Revision>) -> Result<WatchStream> {
        let mut state = self.state.lock().await;
        state.check_available()?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(start) = start_revision.filter(|start| *start < state.compacted) {
            let _ = tx.send(Err(NamingError::Compacted {
                revision: state.compacted,
            }));
            return Ok(UnboundedReceiverStream::new(rx).boxed());
        }
        if let Some(start) = start_revision {
            for event in state
                .history
                .iter()
                .filter(|event| event.mod_revision >= start && event.key.starts_with(prefix))
            {
                let _ = tx.send(Ok(event.clone()));
            }
        }
        state.subscribers.push(Subscriber {
            prefix: prefix.to_string(),
            tx,
        });

        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}
