//! # Caselog系统管理模块
//!
//! 提供配置管理与一次性初始化（管理员提升、手术目录播种）。

pub mod config;
pub mod seed;

pub use config::AppConfig;
pub use seed::{run_setup, SetupReport};
