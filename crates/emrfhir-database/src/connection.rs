//! 数据库连接管理

use emrfhir_core::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

/// 数据库连接池
#[derive(Debug, Clone)]
pub struct DatabasePool {
    pool: PgPool,
}

impl DatabasePool {
    /// 连接到宿主EMR数据库
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        tracing::info!("Connected to EMR database (max {} connections)", max_connections);
        Ok(Self { pool })
    }

    /// 使用宿主已经建立的连接池
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
