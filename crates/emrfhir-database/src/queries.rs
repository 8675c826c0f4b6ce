//! 数据库查询操作

use crate::connection::DatabasePool;
use crate::models::DbOrder;
use async_trait::async_trait;
use emrfhir_core::{AccessionLookup, Order, Result};

/// 基于PostgreSQL的检查号查询
#[derive(Debug, Clone)]
pub struct AccessionQueries {
    pool: DatabasePool,
}

impl AccessionQueries {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessionLookup for AccessionQueries {
    async fn find_orders_by_accession_number(&self, accession_number: &str) -> Result<Vec<Order>> {
        let pool = self.pool.pool();

        let results = sqlx::query_as::<_, DbOrder>(
            r#"
            SELECT o.order_id, o.uuid, o.accession_number, o.patient_id, o.encounter_id,
                   ot.order_type_id, ot.uuid AS order_type_uuid, ot.name AS order_type_name
            FROM orders o
            JOIN order_type ot ON ot.order_type_id = o.order_type_id
            WHERE o.accession_number = $1
            "#,
        )
        .bind(accession_number)
        .fetch_all(pool)
        .await?;

        tracing::debug!(
            "Found {} orders for accession number {}",
            results.len(),
            accession_number
        );
        Ok(results.into_iter().map(Order::from).collect())
    }

    async fn find_encounter_id_for_order(&self, order_id: i32) -> Result<Option<i32>> {
        let pool = self.pool.pool();

        let result: Option<Option<i32>> = sqlx::query_scalar(
            "SELECT DISTINCT encounter_id FROM obs WHERE order_id = $1 LIMIT 1",
        )
        .bind(order_id)
        .fetch_optional(pool)
        .await?;

        Ok(result.flatten())
    }
}
