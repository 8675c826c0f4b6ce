//! # EMR数据访问模块
//!
//! 提供宿主EMR数据访问接口的实现：基于PostgreSQL的检查号查询，以及完整的内存存储。

pub mod connection;
pub mod memory;
pub mod models;
pub mod queries;

// 重新导出主要类型
pub use connection::DatabasePool;
pub use memory::{MemoryStore, StoreOperation};
pub use models::*;
pub use queries::AccessionQueries;
