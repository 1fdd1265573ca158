//! 注册并解析同一个服务，打印地址变化，Ctrl-C 后注销
//!
//! 配置来自环境变量，见 `NamingConfig::from_env`；设置
//! `NAMING_CONFIG=path/to/naming.toml` 时改为读取 TOML 文件。

use anyhow::Context;
use flare_naming::{
    EtcdResolver, LogFormat, NamingConfig, Registrar, init_tracing,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing(LogFormat::from_env()).context("install tracing subscriber")?;

    let config = match std::env::var("NAMING_CONFIG") {
        Ok(path) => NamingConfig::load_from_file(&path)
            .with_context(|| format!("load config from {}", path))?,
        Err(_) => NamingConfig::from_env().context("load config from env")?,
    };
    let options = config.registry_options()?;
    let shutdown = CancellationToken::new();

    let mut registrar = Registrar::connect(options.clone())
        .await
        .context("connect registrar")?
        .with_shutdown(shutdown.clone());
    registrar.register().await.context("register service")?;
    info!(key = %registrar.key(), "Registered");

    let resolver = EtcdResolver::new(options.target.clone())
        .with_prefix(options.prefix.clone())
        .with_shutdown(shutdown.clone());
    let mut watcher = resolver
        .watch(&options.name)
        .await
        .context("open watcher")?;

    let watch_task = tokio::spawn(async move {
        loop {
            match watcher.next().await {
                Ok(updates) if updates.is_empty() => break,
                Ok(updates) => {
                    for update in updates {
                        info!(update = %update, "Membership changed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Watch failed");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    });

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    info!("Shutting down");

    if let Err(e) = registrar.unregister().await {
        warn!(error = %e, "Unregister failed");
    }
    shutdown.cancel();
    let _ = watch_task.await;

    Ok(())
}
