//! # Caselog数据库模块
//!
//! 负责病例记录元数据的存储和管理，提供PostgreSQL连接池、统一的`Storage`
//! 访问接口及其内存回退实现。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;
pub mod storage;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::MemoryStorage;
pub use models::*;
pub use queries::PgStorage;
pub use storage::Storage;
