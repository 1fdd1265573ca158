//! 服务键 / 值编解码
//!
//! 键布局：`/<prefix>/<service>/<host>:<port>`，值：`<host>:<port>`

/// 默认键前缀（首尾均不带 `/`）
pub const DEFAULT_PREFIX: &str = "etcd3_naming";

/// 实例地址 `host:port`，同时作为注册值
pub fn service_value(host: &str, port: u16) -> String {
    format!("{}:{}", host, port)
}

/// 单个实例的注册键
pub fn service_key(prefix: &str, service_name: &str, host: &str, port: u16) -> String {
    format!(
        "/{}/{}/{}",
        prefix,
        service_name,
        service_value(host, port)
    )
}

/// 服务下所有实例共享的键前缀，以 `/` 结尾，避免 `echo` 匹配到 `echo2`
pub fn service_prefix(prefix: &str, service_name: &str) -> String {
    format!("/{}/{}/", prefix, service_name)
}

/// 从注册键中取出实例地址（最后一段）
///
/// etcd 的删除事件不携带值，删除时只能从键恢复地址。
pub fn address_from_key(key: &str) -> Option<&str> {
    key.rsplit('/').next().filter(|addr| !addr.is_empty())
}
