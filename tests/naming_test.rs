//! 注册与解析的端到端测试（内存存储）
//!
//! 使用 `start_paused` 控制时间，lease 过期与续约间隔都可以精确推进。

use flare_naming::config::{RegistryOptions, StoreTarget};
use flare_naming::discovery::{Resolver, StoreResolver, Update, feed_balance, http_endpoint};
use flare_naming::registry::Registrar;
use flare_naming::store::{CoordinationStore, MemoryStore};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Duration, sleep};
use tower::discover::Change;

const ECHO_KEY: &str = "/reg/echo/10.0.0.1:9000";

fn echo_options(host: &str, port: u16) -> RegistryOptions {
    RegistryOptions::new("echo", host, port, StoreTarget::Url("memory".into()))
        .with_prefix("reg")
        .with_ttl(5)
        .with_interval(Duration::from_secs(2))
}

#[tokio::test(start_paused = true)]
async fn register_then_resolve_then_unregister() {
    let store = MemoryStore::new();
    let mut registrar =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000)).unwrap();
    registrar.register().await.unwrap();
    assert_eq!(registrar.key(), ECHO_KEY);

    let resolver = StoreResolver::new(Arc::new(store.clone())).with_prefix("reg");
    let mut watcher = resolver.resolve("echo").await.unwrap();
    assert_eq!(watcher.next().await.unwrap(), vec![Update::add("10.0.0.1:9000")]);

    registrar.unregister().await.unwrap();
    assert_eq!(watcher.next().await.unwrap(), vec![Update::remove("10.0.0.1:9000")]);

    watcher.close();
    assert!(watcher.next().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn entry_survives_many_ttls_while_renewing() {
    let store = MemoryStore::new();
    let mut registrar =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000)).unwrap();
    registrar.register().await.unwrap();

    for _ in 0..5 {
        sleep(Duration::from_secs(5)).await;
        assert!(store.get(ECHO_KEY).await.unwrap().is_some());
    }

    registrar.unregister().await.unwrap();
    assert!(store.get(ECHO_KEY).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn outage_expires_entry_and_renewal_restores_it() {
    let store = MemoryStore::new();
    let mut registrar =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000)).unwrap();
    registrar.register().await.unwrap();

    let resolver = StoreResolver::new(Arc::new(store.clone())).with_prefix("reg");
    let mut watcher = resolver.watch("echo");
    assert_eq!(watcher.next().await.unwrap(), vec![Update::add("10.0.0.1:9000")]);

    // 续约失败期间，最后一个 lease 到期，键被删除
    store.set_available(false).await;
    assert_eq!(watcher.next().await.unwrap(), vec![Update::remove("10.0.0.1:9000")]);
    assert!(registrar.is_running());

    // 存储恢复后，下一次续约重新写入
    store.set_available(true).await;
    assert_eq!(watcher.next().await.unwrap(), vec![Update::add("10.0.0.1:9000")]);

    registrar.unregister().await.unwrap();
    assert_eq!(watcher.next().await.unwrap(), vec![Update::remove("10.0.0.1:9000")]);
}

#[tokio::test(start_paused = true)]
async fn dropping_registrar_deletes_entry() {
    let store = MemoryStore::new();
    let mut registrar =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000)).unwrap();
    registrar.register().await.unwrap();
    drop(registrar);

    sleep(Duration::from_millis(10)).await;
    assert!(store.get(ECHO_KEY).await.unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn shutdown_token_stops_every_registration() {
    let store = MemoryStore::new();
    let shutdown = tokio_util::sync::CancellationToken::new();

    let mut first =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000))
            .unwrap()
            .with_shutdown(shutdown.clone());
    let mut second =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.2", 9000))
            .unwrap()
            .with_shutdown(shutdown.clone());
    first.register().await.unwrap();
    second.register().await.unwrap();
    assert_eq!(store.get_prefix("/reg/echo/").await.unwrap().kvs.len(), 2);

    shutdown.cancel();
    sleep(Duration::from_millis(10)).await;
    assert!(store.get_prefix("/reg/echo/").await.unwrap().kvs.is_empty());
    assert!(!first.is_running());
    assert!(!second.is_running());
}

#[tokio::test(start_paused = true)]
async fn balance_feed_tracks_membership() {
    let store = MemoryStore::new();
    let mut first =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.1", 9000)).unwrap();
    first.register().await.unwrap();

    let resolver = StoreResolver::new(Arc::new(store.clone())).with_prefix("reg");
    let watcher = resolver.resolve("echo").await.unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    let feed = feed_balance(watcher, tx, http_endpoint);

    match rx.recv().await {
        Some(Change::Insert(addr, endpoint)) => {
            assert_eq!(addr, "10.0.0.1:9000");
            assert_eq!(endpoint.uri().to_string(), "http://10.0.0.1:9000/");
        }
        _ => panic!("expected insert"),
    }

    let mut second =
        Registrar::with_store(Arc::new(store.clone()), echo_options("10.0.0.2", 9000)).unwrap();
    second.register().await.unwrap();
    assert!(matches!(
        rx.recv().await,
        Some(Change::Insert(ref addr, _)) if addr == "10.0.0.2:9000"
    ));

    first.unregister().await.unwrap();
    assert!(matches!(
        rx.recv().await,
        Some(Change::Remove(ref addr)) if addr == "10.0.0.1:9000"
    ));

    // 接收端关闭后，后台任务在下一次变化时退出
    drop(rx);
    second.unregister().await.unwrap();
    feed.await.unwrap();
}
