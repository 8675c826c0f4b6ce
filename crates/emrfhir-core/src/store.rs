//! 宿主EMR数据访问接口
//!
//! 持久化层由宿主平台提供，本子系统只通过这里的trait访问它。

use crate::models::*;
use crate::Result;
use async_trait::async_trait;
use uuid::Uuid;

/// 复杂观察的原始视图
pub const RAW_VIEW: &str = "RAW_VIEW";

/// 检查号查询接口
#[async_trait]
pub trait AccessionLookup: Send + Sync {
    /// 按检查号查找医嘱，顺序由底层存储决定，无结果返回空列表
    async fn find_orders_by_accession_number(&self, accession_number: &str) -> Result<Vec<Order>>;

    /// 返回医嘱的第一个观察所属的就诊id
    ///
    /// 多个就诊时任取其一；医嘱没有任何观察时返回 `None`。
    async fn find_encounter_id_for_order(&self, order_id: i32) -> Result<Option<i32>>;
}

/// 临床领域服务
///
/// 所有写操作都应在 [`begin`](ClinicalStore::begin) 与
/// [`commit`](ClinicalStore::commit)/[`rollback`](ClinicalStore::rollback) 之间执行。
#[async_trait]
pub trait ClinicalStore: Send + Sync {
    // ========== 事务 ==========

    /// 开始事务，已有事务进行中时等待其结束
    async fn begin(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    // ========== 医嘱 ==========

    async fn get_order(&self, order_id: i32) -> Result<Option<Order>>;

    async fn get_order_by_uuid(&self, uuid: &Uuid) -> Result<Option<Order>>;

    // ========== 就诊 ==========

    async fn get_encounter(&self, encounter_id: i32) -> Result<Option<Encounter>>;

    async fn get_encounter_by_uuid(&self, uuid: &Uuid) -> Result<Option<Encounter>>;

    /// 保存就诊，返回带id的就诊
    async fn save_encounter(&self, encounter: Encounter) -> Result<Encounter>;

    /// 作废就诊及其全部观察
    async fn void_encounter(&self, encounter: &Encounter, reason: &str) -> Result<Encounter>;

    // ========== 观察 ==========

    async fn get_obs_by_uuid(&self, uuid: &Uuid) -> Result<Option<Obs>>;

    /// 保存观察；分组成员只允许一层
    async fn save_obs(&self, obs: Obs) -> Result<Obs>;

    /// 作废观察，分组时同时作废所有成员；已作废则不做任何事
    async fn void_obs(&self, obs: &Obs, reason: &str) -> Result<Obs>;

    /// 按视图读取复杂观察，载荷在此时才被填充
    async fn get_complex_obs(&self, obs_id: i32, view: &str) -> Result<Option<Obs>>;

    // ========== 查询 ==========

    async fn get_patient_by_uuid(&self, uuid: &Uuid) -> Result<Option<Patient>>;

    async fn get_provider_by_uuid(&self, uuid: &Uuid) -> Result<Option<Provider>>;

    async fn get_concept(&self, concept_id: i32) -> Result<Option<Concept>>;

    async fn get_concept_by_uuid(&self, uuid: &Uuid) -> Result<Option<Concept>>;

    async fn get_encounter_type_by_name(&self, name: &str) -> Result<Option<EncounterType>>;

    async fn get_encounter_role_by_uuid(&self, uuid: &Uuid) -> Result<Option<EncounterRole>>;

    /// 系统全局属性
    async fn get_global_property(&self, name: &str) -> Result<Option<String>>;
}
