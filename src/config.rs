//! 命名服务配置
//!
//! 支持从 TOML 文件或环境变量加载，最终转换为 [`RegistryOptions`]。

use crate::error::{NamingError, Result};
use crate::key::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// 协调存储地址：单个 URL 或 endpoint 列表
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StoreTarget {
    Url(String),
    Endpoints(Vec<String>),
}

impl StoreTarget {
    /// 解析地址字符串，包含 `,` 时按 endpoint 列表处理
    pub fn parse(target: &str) -> Result<Self> {
        let target = target.trim();
        if target.is_empty() {
            return Err(NamingError::invalid_config("store target is empty"));
        }

        if target.contains(',') {
            let endpoints: Vec<String> = target
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            if endpoints.is_empty() {
                return Err(NamingError::invalid_config(format!(
                    "no endpoint in store target '{}'",
                    target
                )));
            }
            Ok(StoreTarget::Endpoints(endpoints))
        } else {
            Ok(StoreTarget::Url(target.to_string()))
        }
    }

    /// 连接时使用的 endpoint 列表
    pub fn endpoints(&self) -> Vec<String> {
        match self {
            StoreTarget::Url(url) => vec![url.clone()],
            StoreTarget::Endpoints(endpoints) => endpoints.clone(),
        }
    }
}

impl fmt::Display for StoreTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreTarget::Url(url) => f.write_str(url),
            StoreTarget::Endpoints(endpoints) => f.write_str(&endpoints.join(",")),
        }
    }
}

/// 单个注册的参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryOptions {
    /// 服务名
    pub name: String,
    /// 对外公布的主机
    pub host: String,
    /// 对外公布的端口
    pub port: u16,
    /// 存储地址
    pub target: StoreTarget,
    /// 续约间隔
    pub interval: Duration,
    /// lease TTL（秒），应大于续约间隔
    pub ttl: i64,
    /// 键前缀
    pub prefix: String,
    /// 建连超时（可选）
    pub connect_timeout: Option<Duration>,
}

impl RegistryOptions {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        target: StoreTarget,
    ) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            port,
            target,
            interval: Duration::from_secs(DEFAULT_INTERVAL_SECS),
            ttl: DEFAULT_TTL_SECONDS,
            prefix: DEFAULT_PREFIX.to_string(),
            connect_timeout: None,
        }
    }

    /// 设置续约间隔
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// 设置 lease TTL（秒）
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// 设置键前缀
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// 设置建连超时
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// 校验参数
    ///
    /// TTL 不大于续约间隔不会报错，只在注册时告警。
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(NamingError::invalid_config("service name is empty"));
        }
        if self.name.contains('/') {
            return Err(NamingError::invalid_config(format!(
                "service name '{}' must not contain '/'",
                self.name
            )));
        }
        if self.host.is_empty() {
            return Err(NamingError::invalid_config("host is empty"));
        }
        if self.interval.is_zero() {
            return Err(NamingError::invalid_config("renewal interval must be positive"));
        }
        if self.ttl <= 0 {
            return Err(NamingError::invalid_config("ttl must be positive"));
        }
        Ok(())
    }

    /// TTL 是否覆盖续约间隔
    pub fn ttl_covers_interval(&self) -> bool {
        Duration::from_secs(self.ttl as u64) > self.interval
    }
}

const DEFAULT_INTERVAL_SECS: u64 = 10;
const DEFAULT_TTL_SECONDS: i64 = 15;

/// 配置文件 / 环境变量对应的结构
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    pub service_name: String,
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    /// 单个 URL 或逗号分隔的 endpoint 列表
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: i64,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_target() -> String {
    "http://127.0.0.1:2379".to_string()
}

fn default_interval_secs() -> u64 {
    DEFAULT_INTERVAL_SECS
}

fn default_ttl_seconds() -> i64 {
    DEFAULT_TTL_SECONDS
}

fn default_prefix() -> String {
    DEFAULT_PREFIX.to_string()
}

impl NamingConfig {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: NamingConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// 从环境变量加载
    ///
    /// - `NAMING_SERVICE_NAME`（默认 `hello_service`）
    /// - `NAMING_HOST` / `NAMING_PORT`（默认 `127.0.0.1:50051`）
    /// - `NAMING_ETCD_TARGET`（默认 `http://127.0.0.1:2379`）
    /// - `NAMING_INTERVAL_SECS` / `NAMING_TTL_SECONDS`（默认 10 / 15）
    /// - `NAMING_PREFIX`（默认 `etcd3_naming`）
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            name: &str,
            default: T,
        ) -> Result<T> {
            match lookup(name) {
                Some(raw) => raw.trim().parse::<T>().map_err(|_| {
                    NamingError::invalid_config(format!("{} has invalid value '{}'", name, raw))
                }),
                None => Ok(default),
            }
        }

        let connect_timeout_secs = match lookup("NAMING_CONNECT_TIMEOUT_SECS") {
            Some(_) => Some(parsed(&lookup, "NAMING_CONNECT_TIMEOUT_SECS", 0u64)?),
            None => None,
        };

        Ok(Self {
            service_name: lookup("NAMING_SERVICE_NAME").unwrap_or_else(|| "hello_service".to_string()),
            host: lookup("NAMING_HOST").unwrap_or_else(default_host),
            port: parsed(&lookup, "NAMING_PORT", 50051u16)?,
            target: lookup("NAMING_ETCD_TARGET").unwrap_or_else(default_target),
            interval_secs: parsed(&lookup, "NAMING_INTERVAL_SECS", DEFAULT_INTERVAL_SECS)?,
            ttl_seconds: parsed(&lookup, "NAMING_TTL_SECONDS", DEFAULT_TTL_SECONDS)?,
            prefix: lookup("NAMING_PREFIX").unwrap_or_else(default_prefix),
            connect_timeout_secs,
        })
    }

    /// 转换为注册参数（同时完成校验）
    pub fn registry_options(&self) -> Result<RegistryOptions> {
        let mut options = RegistryOptions::new(
            self.service_name.clone(),
            self.host.clone(),
            self.port,
            StoreTarget::parse(&self.target)?,
        )
        .with_interval(Duration::from_secs(self.interval_secs))
        .with_ttl(self.ttl_seconds)
        .with_prefix(self.prefix.clone());

        if let Some(secs) = self.connect_timeout_secs {
            options = options.with_connect_timeout(Duration::from_secs(secs));
        }

        options.validate()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn parse_single_url() {
        let target = StoreTarget::parse("http://127.0.0.1:2379").unwrap();
        assert_eq!(target, StoreTarget::Url("http://127.0.0.1:2379".into()));
        assert_eq!(target.endpoints(), vec!["http://127.0.0.1:2379".to_string()]);
    }

    #[test]
    fn parse_endpoint_list() {
        let target = StoreTarget::parse("10.0.0.1:2379, 10.0.0.2:2379,,").unwrap();
        assert_eq!(
            target.endpoints(),
            vec!["10.0.0.1:2379".to_string(), "10.0.0.2:2379".to_string()]
        );
        assert_eq!(target.to_string(), "10.0.0.1:2379,10.0.0.2:2379");
        assert!(StoreTarget::parse(" ").is_err());
        assert!(StoreTarget::parse(",,").is_err());
    }

    #[test]
    fn options_validation() {
        let target = StoreTarget::Url("http://127.0.0.1:2379".into());
        let ok = RegistryOptions::new("echo", "10.0.0.1", 9000, target.clone())
            .with_interval(Duration::from_secs(2))
            .with_ttl(5);
        assert!(ok.validate().is_ok());
        assert!(ok.ttl_covers_interval());

        let tight = ok.clone().with_ttl(2);
        assert!(tight.validate().is_ok());
        assert!(!tight.ttl_covers_interval());

        assert!(ok.clone().with_ttl(0).validate().is_err());
        assert!(ok.clone().with_interval(Duration::ZERO).validate().is_err());
        assert!(RegistryOptions::new("", "h", 1, target.clone()).validate().is_err());
        assert!(RegistryOptions::new("a/b", "h", 1, target).validate().is_err());
    }

    #[test]
    fn toml_with_defaults() {
        let config = NamingConfig::from_toml(
            r#"
            service_name = "echo"
            port = 9000
            target = "10.0.0.1:2379,10.0.0.2:2379"
            "#,
        )
        .unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.prefix, DEFAULT_PREFIX);

        let options = config.registry_options().unwrap();
        assert_eq!(options.interval, Duration::from_secs(10));
        assert_eq!(options.ttl, 15);
        assert!(matches!(options.target, StoreTarget::Endpoints(ref e) if e.len() == 2));
    }

    #[test]
    fn env_lookup() {
        let vars: HashMap<&str, &str> = [
            ("NAMING_SERVICE_NAME", "echo"),
            ("NAMING_HOST", "10.0.0.1"),
            ("NAMING_PORT", "9000"),
            ("NAMING_INTERVAL_SECS", "2"),
            ("NAMING_TTL_SECONDS", "5"),
            ("NAMING_PREFIX", "reg"),
        ]
        .into_iter()
        .collect();

        let config = NamingConfig::from_lookup(|k| vars.get(k).map(|v| v.to_string())).unwrap();
        let options = config.registry_options().unwrap();
        assert_eq!(options.name, "echo");
        assert_eq!(options.port, 9000);
        assert_eq!(options.interval, Duration::from_secs(2));
        assert_eq!(options.ttl, 5);
        assert_eq!(options.prefix, "reg");
        assert_eq!(options.connect_timeout, None);

        let bad = NamingConfig::from_lookup(|k| (k == "NAMING_PORT").then(|| "http".to_string()));
        assert!(matches!(bad, Err(NamingError::InvalidConfig(_))));
    }
}
