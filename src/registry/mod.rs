//! 服务注册模块
//!
//! 服务端进程通过 [`Registrar`] 在协调存储中以 lease 键宣告存活。

pub mod registrar;

pub use registrar::{Registrar, register};
