//! # 管理API处理器

pub mod connections;
pub mod system;
