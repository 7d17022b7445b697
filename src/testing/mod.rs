//! # 测试辅助模块
//!
//! 单元测试共用的数据库、加密器与提供商构造函数

pub mod helpers;

pub use helpers::*;
