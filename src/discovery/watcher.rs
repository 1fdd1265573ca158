//! 前缀 watcher
//!
//! 首次 `next()` 返回服务下全部实例的快照，之后每次返回一个增量事件。
//! 快照修订号之后的事件通过 `start_revision` 续接，读取与订阅之间不丢不重。

use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::update::Update;
use crate::error::Result;
use crate::key;
use crate::retry::{ExponentialBackoffPolicy, RetryPolicy};
use crate::store::{CoordinationStore, EventType, RangeResult, Revision, WatchEvent, WatchStream};

/// 单个服务名的 watch 会话
pub struct PrefixWatcher {
    service_name: String,
    prefix: String,
    store: Option<Arc<dyn CoordinationStore>>,
    token: CancellationToken,
    initialized: bool,
    /// 下一次订阅的起始修订号
    start_revision: Option<Revision>,
    stream: Option<WatchStream>,
    retry: Box<dyn RetryPolicy>,
}

impl PrefixWatcher {
    /// 创建 watcher，watch `/<prefix>/<service_name>/`
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        prefix: &str,
        service_name: impl Into<String>,
    ) -> Self {
        let service_name = service_name.into();
        Self {
            prefix: key::service_prefix(prefix, &service_name),
            service_name,
            store: Some(store),
            token: CancellationToken::new(),
            initialized: false,
            start_revision: None,
            stream: None,
            retry: Box::new(ExponentialBackoffPolicy::default()),
        }
    }

    /// 设置初始快照读取的重试策略
    pub fn with_retry_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.retry = Box::new(policy);
        self
    }

    /// 绑定上级 token，上级取消时会话结束
    pub fn with_shutdown(mut self, parent: &CancellationToken) -> Self {
        self.token = parent.child_token();
        self
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// watch 的键前缀
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// 会话 token 的克隆；在其它任务中取消它可以打断阻塞中的 `next()`
    pub fn close_handle(&self) -> CancellationToken {
        self.token.clone()
    }

    /// 会话是否已结束
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled() || self.store.is_none()
    }

    /// 等待下一批更新
    ///
    /// 首次调用返回完整快照（非空时）；之后每次只返回一个事件，
    /// 未取走的事件留给后续调用。返回空列表表示会话已结束。
    pub async fn next(&mut self) -> Result<Vec<Update>> {
        let Some(store) = self.store.clone() else {
            return Ok(Vec::new());
        };
        if self.token.is_cancelled() {
            self.release();
            return Ok(Vec::new());
        }

        if !self.initialized {
            let snapshot = Self::snapshot(
                store.as_ref(),
                &self.prefix,
                &self.service_name,
                self.retry.as_ref(),
                &self.token,
            )
            .await;
            self.initialized = true;

            if let Some(range) = snapshot {
                self.start_revision = Some(range.revision + 1);
                let updates: Vec<Update> = range
                    .kvs
                    .into_iter()
                    .filter(|kv| !kv.value.is_empty())
                    .map(|kv| Update::add(kv.value))
                    .collect();
                if !updates.is_empty() {
                    debug!(service = %self.service_name, count = updates.len(), "Initial snapshot");
                    return Ok(updates);
                }
            }
        }

        if self.stream.is_none() {
            let opened = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                opened = store.watch(&self.prefix, self.start_revision) => Some(opened),
            };
            match opened {
                Some(stream) => self.stream = Some(stream?),
                None => {
                    self.release();
                    return Ok(Vec::new());
                }
            }
        }

        loop {
            let Some(stream) = self.stream.as_mut() else {
                return Ok(Vec::new());
            };
            let item = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                item = stream.next() => item,
            };

            match item {
                Some(Ok(event)) => {
                    self.start_revision = Some(event.mod_revision + 1);
                    if let Some(update) = translate(&event) {
                        return Ok(vec![update]);
                    }
                }
                Some(Err(e)) if e.is_compacted() => {
                    // 续接点已不可用，下次调用重新读取快照并从快照修订号订阅
                    warn!(service = %self.service_name, error = %e, "Watch revision compacted, resyncing");
                    self.stream = None;
                    self.start_revision = None;
                    self.initialized = false;
                    return Err(e);
                }
                Some(Err(e)) => {
                    // 下次调用从最后一个事件之后重新订阅
                    warn!(service = %self.service_name, error = %e, "Watch stream failed");
                    self.stream = None;
                    return Err(e);
                }
                None => {
                    info!(service = %self.service_name, "Watch session ended");
                    self.release();
                    return Ok(Vec::new());
                }
            }
        }
    }

    /// 结束会话，打断阻塞中的 `next()` 并释放存储句柄
    pub fn close(&mut self) {
        self.token.cancel();
        self.release();
    }

    fn release(&mut self) {
        self.stream = None;
        self.store = None;
    }

    /// 读取初始快照；失败按重试策略退避，耗尽后返回 `None` 回退到纯 watch
    ///
    /// 只借用需要的字段：事件流不是 `Sync`，借用整个 watcher 会让 future 失去 `Send`。
    async fn snapshot(
        store: &dyn CoordinationStore,
        prefix: &str,
        service_name: &str,
        retry: &dyn RetryPolicy,
        token: &CancellationToken,
    ) -> Option<RangeResult> {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                result = store.get_prefix(prefix) => result,
            };

            let err = match result {
                Ok(range) => return Some(range),
                Err(e) => e,
            };

            if !retry.should_retry(attempt, &err) {
                warn!(
                    service = %service_name,
                    attempts = attempt,
                    max_attempts = retry.max_attempts(),
                    error = %err,
                    "Initial snapshot read failed, falling back to watch"
                );
                return None;
            }

            let delay = retry.backoff_duration(attempt - 1);
            warn!(
                service = %service_name,
                attempt,
                max_attempts = retry.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Initial snapshot read failed, retrying"
            );
            tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}

impl Drop for PrefixWatcher {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// 存储事件转为地址更新
///
/// 删除事件通常不带值，此时从键的最后一段恢复地址。
fn translate(event: &WatchEvent) -> Option<Update> {
    let addr = if event.value.is_empty() {
        key::address_from_key(&event.key)?.to_string()
    } else {
        event.value.clone()
    };

    match event.event_type {
        EventType::Put => Some(Update::add(addr)),
        EventType::Delete => Some(Update::remove(addr)),
    }
}
