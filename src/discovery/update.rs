//! 地址更新定义

use std::fmt;

/// 更新类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// 新增实例
    Add,
    /// 移除实例
    Remove,
}

/// 单个实例地址的变化
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Update {
    pub op: Operation,
    /// `host:port`
    pub addr: String,
}

impl Update {
    pub fn add(addr: impl Into<String>) -> Self {
        Self {
            op: Operation::Add,
            addr: addr.into(),
        }
    }

    pub fn remove(addr: impl Into<String>) -> Self {
        Self {
            op: Operation::Remove,
            addr: addr.into(),
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operation::Add => write!(f, "+{}", self.addr),
            Operation::Remove => write!(f, "-{}", self.addr),
        }
    }
}
