//! EMR核心数据模型定义
//!
//! 这些实体来自宿主EMR平台，本子系统只读取或通过 [`ClinicalStore`](crate::store::ClinicalStore) 持久化它们。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 患者基本信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: i32,
    pub uuid: Uuid,
    pub given_name: String,
    pub family_name: String,
    pub voided: bool,
}

impl Patient {
    /// 显示用姓名
    pub fn display_name(&self) -> String {
        format!("{} {}", self.given_name, self.family_name).trim().to_string()
    }
}

/// 医护人员
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provider {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
}

/// 就诊角色
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterRole {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
}

/// 就诊类型，对应FHIR的服务类别
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncounterType {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub description: Option<String>,
}

/// 医嘱类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderType {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
}

/// 临床医嘱（检查申请），本子系统只做查询
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: i32,
    pub uuid: Uuid,
    pub accession_number: Option<String>,
    pub order_type: OrderType,
    pub patient_id: i32,
    pub encounter_id: Option<i32>,
}

/// 概念数据类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConceptDatatype {
    Numeric,
    Text,
    Coded,
    DateTime,
    Boolean,
    Complex,
    NotApplicable,
}

/// 临床概念，观察的语义类型
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub id: i32,
    pub uuid: Uuid,
    pub name: String,
    pub datatype: ConceptDatatype,
    pub units: Option<String>,
}

impl Concept {
    pub fn is_complex(&self) -> bool {
        self.datatype == ConceptDatatype::Complex
    }
}

/// 复杂观察的载荷
///
/// `data` 只有在按视图重新读取后才会被填充，`mime_type`/`length` 视宿主能力而定。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplexData {
    pub title: String,
    pub data: Option<Vec<u8>>,
    pub mime_type: Option<String>,
    pub length: Option<u64>,
}

impl ComplexData {
    pub fn new(title: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            title: title.into(),
            data: Some(data),
            mime_type: None,
            length: None,
        }
    }
}

/// 观察值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsValue {
    Numeric(f64),
    Text(String),
    Coded(Concept),
    DateTime(DateTime<Utc>),
    Boolean(bool),
    Complex(ComplexData),
}

/// 单层分组，成员不再包含子成员
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group<T> {
    members: Vec<T>,
}

impl<T> Group<T> {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
        }
    }

    pub fn push(&mut self, member: T) {
        self.members.push(member);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.members.iter()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.members
    }
}

impl<T> Default for Group<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> FromIterator<T> for Group<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            members: iter.into_iter().collect(),
        }
    }
}

impl<'a, T> IntoIterator for &'a Group<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.members.iter()
    }
}

/// 临床观察
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Obs {
    pub id: Option<i32>,
    pub uuid: Uuid,
    pub person_id: i32,
    pub concept: Concept,
    pub obs_datetime: DateTime<Utc>,
    pub value: Option<ObsValue>,
    pub encounter_id: Option<i32>,
    pub order_id: Option<i32>,
    pub group_members: Group<Obs>,
    pub voided: bool,
    pub void_reason: Option<String>,
}

impl Obs {
    /// 创建尚未持久化的观察
    pub fn new(person_id: i32, concept: Concept, obs_datetime: DateTime<Utc>) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            person_id,
            concept,
            obs_datetime,
            value: None,
            encounter_id: None,
            order_id: None,
            group_members: Group::new(),
            voided: false,
            void_reason: None,
        }
    }

    pub fn add_group_member(&mut self, member: Obs) {
        self.group_members.push(member);
    }

    pub fn is_group(&self) -> bool {
        !self.group_members.is_empty()
    }

    pub fn complex_data(&self) -> Option<&ComplexData> {
        match &self.value {
            Some(ObsValue::Complex(data)) => Some(data),
            _ => None,
        }
    }
}

/// 就诊中的 (角色, 医护人员) 对
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterProvider {
    pub role: EncounterRole,
    pub provider: Provider,
}

/// 就诊记录，在本子系统中代表一份诊断报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encounter {
    pub id: Option<i32>,
    pub uuid: Uuid,
    pub encounter_datetime: DateTime<Utc>,
    pub encounter_type: Option<EncounterType>,
    pub patient: Option<Patient>,
    pub providers: Vec<EncounterProvider>,
    /// 顶层观察，分组成员挂在各自的分组下
    pub obs: Vec<Obs>,
    pub voided: bool,
    pub void_reason: Option<String>,
}

impl Encounter {
    pub fn new(encounter_datetime: DateTime<Utc>) -> Self {
        Self {
            id: None,
            uuid: Uuid::new_v4(),
            encounter_datetime,
            encounter_type: None,
            patient: None,
            providers: Vec::new(),
            obs: Vec::new(),
            voided: false,
            void_reason: None,
        }
    }

    /// 添加医护人员，重复的 (角色, 医护人员) 对会被忽略
    pub fn add_provider(&mut self, role: EncounterRole, provider: Provider) {
        let entry = EncounterProvider { role, provider };
        if !self.providers.contains(&entry) {
            self.providers.push(entry);
        }
    }

    pub fn providers_by_role(&self, role: &EncounterRole) -> Vec<&Provider> {
        self.providers
            .iter()
            .filter(|ep| ep.role.id == role.id)
            .map(|ep| &ep.provider)
            .collect()
    }

    /// 顶层观察
    pub fn obs_at_top_level(&self, include_voided: bool) -> Vec<&Obs> {
        self.obs
            .iter()
            .filter(|obs| include_voided || !obs.voided)
            .collect()
    }

    pub fn encounter_type_name(&self) -> Option<&str> {
        self.encounter_type.as_ref().map(|t| t.name.as_str())
    }
}
