//! 把解析结果喂给负载均衡连接池
//!
//! 输出 `tower::discover::Change<String, Endpoint>`，与
//! `tonic::transport::Channel::balance_channel` 返回的发送端类型一致：
//!
//! ```rust,ignore
//! use flare_naming::discovery::{EtcdResolver, feed_balance, http_endpoint};
//! use flare_naming::config::StoreTarget;
//! use tonic::transport::Channel;
//!
//! # async fn run() -> flare_naming::Result<()> {
//! let resolver = EtcdResolver::new(StoreTarget::parse("http://127.0.0.1:2379")?);
//! let watcher = resolver.watch("hello_service").await?;
//! let (channel, tx) = Channel::balance_channel::<String>(64);
//! feed_balance(Box::new(watcher), tx, http_endpoint);
//! # drop(channel);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tonic::transport::Endpoint;
use tower::discover::Change;
use tracing::{debug, info, warn};

use crate::discovery::resolver::Watcher;
use crate::discovery::update::{Operation, Update};
use crate::error::{NamingError, Result};

/// 订阅失败后重新拉取前的等待时间
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(1);

/// 默认的 endpoint 构造：`http://host:port`
pub fn http_endpoint(addr: &str) -> Result<Endpoint> {
    Endpoint::from_shared(format!("http://{}", addr))
        .map_err(|e| NamingError::invalid_config(format!("invalid endpoint '{}': {}", addr, e)))
}

/// 已下发给连接池的地址集合，负责去重
#[derive(Debug, Default)]
struct Membership {
    known: HashSet<String>,
}

impl Membership {
    /// 计算一条更新需要下发的变化；重复新增与未知移除会被忽略
    fn apply<F>(&mut self, update: Update, build: &F) -> Option<Change<String, Endpoint>>
    where
        F: Fn(&str) -> Result<Endpoint>,
    {
        match update.op {
            Operation::Add => {
                if self.known.contains(&update.addr) {
                    return None;
                }
                match build(&update.addr) {
                    Ok(endpoint) => {
                        self.known.insert(update.addr.clone());
                        Some(Change::Insert(update.addr, endpoint))
                    }
                    Err(e) => {
                        warn!(addr = %update.addr, error = %e, "Skip instance with invalid endpoint");
                        None
                    }
                }
            }
            Operation::Remove => self
                .known
                .remove(&update.addr)
                .then(|| Change::Remove(update.addr)),
        }
    }
}

/// 在后台任务中持续拉取 watcher，并把变化写入 `tx`
///
/// watcher 会话结束或接收端关闭时任务退出。
pub fn feed_balance<F>(
    mut watcher: Box<dyn Watcher>,
    tx: mpsc::Sender<Change<String, Endpoint>>,
    build: F,
) -> JoinHandle<()>
where
    F: Fn(&str) -> Result<Endpoint> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut membership = Membership::default();

        loop {
            let updates = match watcher.next().await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Resolver watch failed, resubscribing");
                    tokio::time::sleep(RESUBSCRIBE_DELAY).await;
                    continue;
                }
            };

            if updates.is_empty() {
                info!("Resolver watch ended, balance feed stopped");
                break;
            }

            for update in updates {
                debug!(update = %update, "Resolver update");
                let Some(change) = membership.apply(update, &build) else {
                    continue;
                };
                if tx.send(change).await.is_err() {
                    debug!("Balance channel dropped, closing watcher");
                    watcher.close();
                    return;
                }
            }
        }
    })
}
