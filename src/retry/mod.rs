//! 重试策略模块
//!
//! 仅用于 watcher 的初始快照读取；续约路径固定按续约间隔重试，不做退避。

pub mod exponential;
pub mod fixed;

pub use exponential::ExponentialBackoffPolicy;
pub use fixed::FixedRetryPolicy;

use crate::error::NamingError;
use std::time::Duration;

/// 重试策略 trait
pub trait RetryPolicy: Send + Sync {
    fn should_retry(&self, attempt: usize, error: &NamingError) -> bool;
    fn backoff_duration(&self, attempt: usize) -> Duration;
    fn max_attempts(&self) -> usize;
}
