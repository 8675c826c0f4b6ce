//! 内存数据存储
//!
//! 实现 [`ClinicalStore`] 与 [`AccessionLookup`]，供嵌入式宿主和测试使用。
//! 观察按行存储（分组成员记录所属分组id），读取时再组装成一层分组；
//! 复杂观察的载荷单独保存，只有按视图读取时才会被填充。
//! 同一时刻只有一个事务，后开始的事务等待前一个提交或回滚。

use async_trait::async_trait;
use emrfhir_core::models::*;
use emrfhir_core::{AccessionLookup, ClinicalStore, ReportError, Result, RAW_VIEW};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

/// 可注入失败的存储操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOperation {
    SaveEncounter,
    SaveObs,
    VoidObs,
    VoidEncounter,
}

#[derive(Debug, Clone)]
struct ObsRow {
    obs: Obs,
    obs_group_id: Option<i32>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    next_encounter_id: i32,
    next_obs_id: i32,
    patients: HashMap<i32, Patient>,
    providers: HashMap<i32, Provider>,
    concepts: HashMap<i32, Concept>,
    encounter_types: HashMap<i32, EncounterType>,
    encounter_roles: HashMap<i32, EncounterRole>,
    orders: BTreeMap<i32, Order>,
    encounters: BTreeMap<i32, Encounter>,
    obs: BTreeMap<i32, ObsRow>,
    complex_data: HashMap<i32, ComplexData>,
    global_properties: HashMap<String, String>,
    failures: HashMap<StoreOperation, String>,
}

impl MemoryState {
    fn take_failure(&mut self, operation: StoreOperation) -> Result<()> {
        match self.failures.remove(&operation) {
            Some(message) => Err(ReportError::Database(message)),
            None => Ok(()),
        }
    }

    fn member_rows(&self, group_id: i32) -> impl Iterator<Item = &ObsRow> {
        self.obs
            .values()
            .filter(move |row| row.obs_group_id == Some(group_id))
    }

    /// 组装观察及其一层成员
    fn assemble_obs(&self, row: &ObsRow) -> Obs {
        let mut obs = row.obs.clone();
        if let Some(id) = obs.id {
            obs.group_members = self.member_rows(id).map(|r| r.obs.clone()).collect();
        }
        obs
    }

    fn assemble_encounter(&self, encounter: &Encounter) -> Encounter {
        let mut assembled = encounter.clone();
        assembled.obs = match encounter.id {
            Some(id) => self
                .obs
                .values()
                .filter(|row| row.obs_group_id.is_none() && row.obs.encounter_id == Some(id))
                .map(|row| self.assemble_obs(row))
                .collect(),
            None => Vec::new(),
        };
        assembled
    }

    fn allocate_obs_id(&mut self) -> i32 {
        self.next_obs_id += 1;
        self.next_obs_id
    }

    /// 写入一行观察，复杂载荷移入单独的存储
    fn store_row(&mut self, mut obs: Obs, obs_group_id: Option<i32>) -> i32 {
        let id = match obs.id {
            Some(id) => id,
            None => self.allocate_obs_id(),
        };
        obs.id = Some(id);
        obs.group_members = Group::new();

        if let Some(ObsValue::Complex(data)) = &mut obs.value {
            if let Some(bytes) = data.data.take() {
                let stored = ComplexData {
                    title: data.title.clone(),
                    length: Some(bytes.len() as u64),
                    data: Some(bytes),
                    mime_type: data.mime_type.take(),
                };
                self.complex_data.insert(id, stored);
            }
            data.length = None;
        }

        self.obs.insert(id, ObsRow { obs, obs_group_id });
        id
    }

    fn void_obs_row(&mut self, obs_id: i32, reason: &str) {
        if let Some(row) = self.obs.get_mut(&obs_id) {
            if !row.obs.voided {
                row.obs.voided = true;
                row.obs.void_reason = Some(reason.to_string());
            }
        }
    }
}

/// 进行中的事务：开始时的快照和事务锁
#[derive(Debug)]
struct Transaction {
    snapshot: MemoryState,
    _guard: OwnedMutexGuard<()>,
}

/// 内存存储
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    transaction_lock: Arc<Mutex<()>>,
    transaction: Mutex<Option<Transaction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_patient(&self, patient: Patient) {
        self.state.lock().await.patients.insert(patient.id, patient);
    }

    pub async fn insert_provider(&self, provider: Provider) {
        self.state.lock().await.providers.insert(provider.id, provider);
    }

    pub async fn insert_concept(&self, concept: Concept) {
        self.state.lock().await.concepts.insert(concept.id, concept);
    }

    pub async fn insert_encounter_type(&self, encounter_type: EncounterType) {
        self.state
            .lock()
            .await
            .encounter_types
            .insert(encounter_type.id, encounter_type);
    }

    pub async fn insert_encounter_role(&self, role: EncounterRole) {
        self.state.lock().await.encounter_roles.insert(role.id, role);
    }

    pub async fn insert_order(&self, order: Order) {
        self.state.lock().await.orders.insert(order.id, order);
    }

    pub async fn set_global_property(&self, name: &str, value: &str) {
        self.state
            .lock()
            .await
            .global_properties
            .insert(name.to_string(), value.to_string());
    }

    /// 下一次执行该操作时返回数据库错误
    pub async fn fail_next(&self, operation: StoreOperation, message: &str) {
        self.state
            .lock()
            .await
            .failures
            .insert(operation, message.to_string());
    }

    /// 所有就诊（含已作废）
    pub async fn encounters(&self) -> Vec<Encounter> {
        let state = self.state.lock().await;
        state
            .encounters
            .values()
            .map(|e| state.assemble_encounter(e))
            .collect()
    }

    /// 就诊下所有观察行（含分组成员与已作废）
    pub async fn obs_for_encounter(&self, encounter_id: i32) -> Vec<Obs> {
        let state = self.state.lock().await;
        state
            .obs
            .values()
            .filter(|row| row.obs.encounter_id == Some(encounter_id))
            .map(|row| row.obs.clone())
            .collect()
    }
}

#[async_trait]
impl ClinicalStore for MemoryStore {
    async fn begin(&self) -> Result<()> {
        // 等待其他事务结束
        let guard = self.transaction_lock.clone().lock_owned().await;
        let snapshot = self.state.lock().await.clone();
        *self.transaction.lock().await = Some(Transaction {
            snapshot,
            _guard: guard,
        });
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.transaction.lock().await.take();
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        if let Some(transaction) = self.transaction.lock().await.take() {
            let mut state = self.state.lock().await;
            // 注入的失败不随回滚恢复
            let failures = std::mem::take(&mut state.failures);
            *state = transaction.snapshot;
            state.failures = failures;
            tracing::debug!("Memory store rolled back");
        }
        Ok(())
    }

    async fn get_order(&self, order_id: i32) -> Result<Option<Order>> {
        Ok(self.state.lock().await.orders.get(&order_id).cloned())
    }

    async fn get_order_by_uuid(&self, uuid: &Uuid) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.values().find(|o| &o.uuid == uuid).cloned())
    }

    async fn get_encounter(&self, encounter_id: i32) -> Result<Option<Encounter>> {
        let state = self.state.lock().await;
        Ok(state
            .encounters
            .get(&encounter_id)
            .map(|e| state.assemble_encounter(e)))
    }

    async fn get_encounter_by_uuid(&self, uuid: &Uuid) -> Result<Option<Encounter>> {
        let state = self.state.lock().await;
        Ok(state
            .encounters
            .values()
            .find(|e| &e.uuid == uuid)
            .map(|e| state.assemble_encounter(e)))
    }

    async fn save_encounter(&self, mut encounter: Encounter) -> Result<Encounter> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOperation::SaveEncounter)?;

        let id = match encounter.id {
            Some(id) => id,
            None => {
                state.next_encounter_id += 1;
                state.next_encounter_id
            }
        };
        encounter.id = Some(id);
        // 观察单独保存
        encounter.obs.clear();
        state.encounters.insert(id, encounter);

        let saved = &state.encounters[&id];
        Ok(state.assemble_encounter(saved))
    }

    async fn void_encounter(&self, encounter: &Encounter, reason: &str) -> Result<Encounter> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOperation::VoidEncounter)?;

        let id = encounter.id.ok_or_else(|| {
            ReportError::InvalidInput("cannot void an unsaved encounter".to_string())
        })?;
        let stored = state
            .encounters
            .get_mut(&id)
            .ok_or_else(|| ReportError::NotFound(format!("encounter {}", id)))?;

        if !stored.voided {
            stored.voided = true;
            stored.void_reason = Some(reason.to_string());

            let obs_ids: Vec<i32> = state
                .obs
                .values()
                .filter(|row| row.obs.encounter_id == Some(id))
                .filter_map(|row| row.obs.id)
                .collect();
            for obs_id in obs_ids {
                state.void_obs_row(obs_id, reason);
            }
        }

        let voided = &state.encounters[&id];
        Ok(state.assemble_encounter(voided))
    }

    async fn get_obs_by_uuid(&self, uuid: &Uuid) -> Result<Option<Obs>> {
        let state = self.state.lock().await;
        Ok(state
            .obs
            .values()
            .find(|row| &row.obs.uuid == uuid)
            .map(|row| state.assemble_obs(row)))
    }

    async fn save_obs(&self, obs: Obs) -> Result<Obs> {
        if obs.group_members.iter().any(Obs::is_group) {
            return Err(ReportError::InvalidInput(
                "obs groups may only be nested one level deep".to_string(),
            ));
        }

        let mut state = self.state.lock().await;
        state.take_failure(StoreOperation::SaveObs)?;

        // 保留已有的分组归属
        let existing_group = obs
            .id
            .and_then(|id| state.obs.get(&id))
            .and_then(|row| row.obs_group_id);

        let encounter_id = obs.encounter_id;
        let members = obs.group_members.clone().into_vec();
        let group_id = state.store_row(obs, existing_group);

        for mut member in members {
            if member.encounter_id.is_none() {
                member.encounter_id = encounter_id;
            }
            state.store_row(member, Some(group_id));
        }

        let row = &state.obs[&group_id];
        Ok(state.assemble_obs(row))
    }

    async fn void_obs(&self, obs: &Obs, reason: &str) -> Result<Obs> {
        let mut state = self.state.lock().await;
        state.take_failure(StoreOperation::VoidObs)?;

        let id = obs
            .id
            .ok_or_else(|| ReportError::InvalidInput("cannot void an unsaved obs".to_string()))?;
        if !state.obs.contains_key(&id) {
            return Err(ReportError::NotFound(format!("obs {}", id)));
        }

        if !state.obs[&id].obs.voided {
            state.void_obs_row(id, reason);
            let member_ids: Vec<i32> = state
                .member_rows(id)
                .filter_map(|row| row.obs.id)
                .collect();
            for member_id in member_ids {
                state.void_obs_row(member_id, reason);
            }
        }

        let row = &state.obs[&id];
        Ok(state.assemble_obs(row))
    }

    async fn get_complex_obs(&self, obs_id: i32, view: &str) -> Result<Option<Obs>> {
        let state = self.state.lock().await;
        let Some(row) = state.obs.get(&obs_id) else {
            return Ok(None);
        };

        let mut obs = state.assemble_obs(row);
        if let (Some(ObsValue::Complex(data)), Some(stored)) =
            (&mut obs.value, state.complex_data.get(&obs_id))
        {
            data.title = stored.title.clone();
            data.mime_type = stored.mime_type.clone();
            data.length = stored.length;
            if view == RAW_VIEW {
                data.data = stored.data.clone();
            }
        }
        Ok(Some(obs))
    }

    async fn get_patient_by_uuid(&self, uuid: &Uuid) -> Result<Option<Patient>> {
        let state = self.state.lock().await;
        Ok(state.patients.values().find(|p| &p.uuid == uuid).cloned())
    }

    async fn get_provider_by_uuid(&self, uuid: &Uuid) -> Result<Option<Provider>> {
        let state = self.state.lock().await;
        Ok(state.providers.values().find(|p| &p.uuid == uuid).cloned())
    }

    async fn get_concept(&self, concept_id: i32) -> Result<Option<Concept>> {
        Ok(self.state.lock().await.concepts.get(&concept_id).cloned())
    }

    async fn get_concept_by_uuid(&self, uuid: &Uuid) -> Result<Option<Concept>> {
        let state = self.state.lock().await;
        Ok(state.concepts.values().find(|c| &c.uuid == uuid).cloned())
    }

    async fn get_encounter_type_by_name(&self, name: &str) -> Result<Option<EncounterType>> {
        let state = self.state.lock().await;
        Ok(state
            .encounter_types
            .values()
            .find(|t| t.name == name)
            .cloned())
    }

    async fn get_encounter_role_by_uuid(&self, uuid: &Uuid) -> Result<Option<EncounterRole>> {
        let state = self.state.lock().await;
        Ok(state
            .encounter_roles
            .values()
            .find(|r| &r.uuid == uuid)
            .cloned())
    }

    async fn get_global_property(&self, name: &str) -> Result<Option<String>> {
        Ok(self.state.lock().await.global_properties.get(name).cloned())
    }
}

#[async_trait]
impl AccessionLookup for MemoryStore {
    async fn find_orders_by_accession_number(&self, accession_number: &str) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders
            .values()
            .filter(|o| o.accession_number.as_deref() == Some(accession_number))
            .cloned()
            .collect())
    }

    async fn find_encounter_id_for_order(&self, order_id: i32) -> Result<Option<i32>> {
        let state = self.state.lock().await;
        Ok(state
            .obs
            .values()
            .filter(|row| row.obs.order_id == Some(order_id))
            .find_map(|row| row.obs.encounter_id))
    }
}
