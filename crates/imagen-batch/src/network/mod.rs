//! 网络模块
//!
//! 超时与取消

mod timeout;

pub use timeout::*;
