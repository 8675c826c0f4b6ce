//! 数据库模型

use emrfhir_core::models::{Order, OrderType};
use sqlx::FromRow;
use uuid::Uuid;

// 数据库表模型 - 使用FromRow trait用于SQL查询

/// 医嘱表（关联医嘱类型）
#[derive(Debug, FromRow)]
pub struct DbOrder {
    pub order_id: i32,
    pub uuid: Uuid,
    pub accession_number: Option<String>,
    pub patient_id: i32,
    pub encounter_id: Option<i32>,
    pub order_type_id: i32,
    pub order_type_uuid: Uuid,
    pub order_type_name: String,
}

impl From<DbOrder> for Order {
    fn from(db_order: DbOrder) -> Self {
        Order {
            id: db_order.order_id,
            uuid: db_order.uuid,
            accession_number: db_order.accession_number,
            order_type: OrderType {
                id: db_order.order_type_id,
                uuid: db_order.order_type_uuid,
                name: db_order.order_type_name,
            },
            patient_id: db_order.patient_id,
            encounter_id: db_order.encounter_id,
        }
    }
}
