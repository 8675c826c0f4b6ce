//! FHIR资源模型
//!
//! 只覆盖诊断报告映射需要的字段。JSON字段名与FHIR一致（camelCase，带 `resourceType`）。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// DiagnosticReport 资源类型名
pub const DIAGNOSTIC_REPORT: &str = "DiagnosticReport";

/// 服务类别编码系统（HL7 v2 表 0074）
pub const CODING_0074: &str = "http://hl7.org/fhir/v2/0074";

/// EMR概念编码系统
pub const CONCEPT_SYSTEM: &str = "urn:emr:concept";

/// 编码
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>, display: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            display: Some(display.into()),
        }
    }
}

/// 可编码概念
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }

    /// 第一个编码的code
    pub fn first_code(&self) -> Option<&str> {
        self.coding.first().and_then(|c| c.code.as_deref())
    }

    pub fn is_empty(&self) -> bool {
        self.coding.is_empty() && self.text.is_none()
    }
}

/// 资源引用
///
/// `reference` 为 `Type/id` 形式，或以 `#` 开头指向内含资源。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Reference {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.reference.as_deref().map_or(true, str::is_empty) && self.display.is_none()
    }

    /// 指向内含资源时返回本地id（不含 `#`）
    pub fn contained_id(&self) -> Option<&str> {
        self.reference.as_deref().and_then(|r| r.strip_prefix('#'))
    }

    /// 解析 `Type/id` 引用
    pub fn id_type(&self) -> Option<IdType> {
        self.reference.as_deref().and_then(IdType::parse)
    }
}

/// 带资源类型的id
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdType {
    pub resource_type: String,
    pub id_part: String,
}

impl IdType {
    pub fn new(resource_type: impl Into<String>, id_part: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id_part: id_part.into(),
        }
    }

    /// 解析 `Type/id`，也接受带服务器前缀或 `_history` 后缀的完整URL
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() || value.starts_with('#') {
            return None;
        }

        let value = match value.find("/_history/") {
            Some(pos) => &value[..pos],
            None => value,
        };

        let mut parts = value.rsplitn(2, '/');
        let id_part = parts.next()?;
        let resource_type = parts.next()?.rsplit('/').next()?;
        if id_part.is_empty() || resource_type.is_empty() {
            return None;
        }

        Some(Self::new(resource_type, id_part))
    }
}

/// 附件（报告的 presentedForm）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(
        default,
        with = "base64_bytes",
        skip_serializing_if = "Option::is_none"
    )]
    pub data: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation: Option<DateTime<Utc>>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(data: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match data {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let encoded: Option<String> = Option::deserialize(deserializer)?;
        encoded
            .map(|s| STANDARD.decode(s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

/// 报告执行者
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performer {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<CodeableConcept>,
    #[serde(default)]
    pub actor: Reference,
}

impl Performer {
    pub fn is_empty(&self) -> bool {
        self.role.as_ref().map_or(true, CodeableConcept::is_empty) && self.actor.is_empty()
    }
}

/// 观察状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationStatus {
    Registered,
    Preliminary,
    #[default]
    Final,
    Amended,
    Cancelled,
    #[serde(rename = "entered-in-error")]
    EnteredInError,
    Unknown,
}

/// 数量
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quantity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Observation.value[x] 的取值
#[derive(Debug, Clone, PartialEq)]
pub enum ObservationValue {
    Quantity(Quantity),
    String(String),
    CodeableConcept(CodeableConcept),
    DateTime(DateTime<Utc>),
    Boolean(bool),
}

/// FHIR Observation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "camelCase")]
pub struct Observation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub status: ObservationStatus,
    #[serde(default)]
    pub code: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_quantity: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_codeable_concept: Option<CodeableConcept>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_boolean: Option<bool>,
}

impl Observation {
    /// value[x]，多个同时存在时按声明顺序取第一个
    pub fn value(&self) -> Option<ObservationValue> {
        if let Some(q) = &self.value_quantity {
            return Some(ObservationValue::Quantity(q.clone()));
        }
        if let Some(s) = &self.value_string {
            return Some(ObservationValue::String(s.clone()));
        }
        if let Some(c) = &self.value_codeable_concept {
            return Some(ObservationValue::CodeableConcept(c.clone()));
        }
        if let Some(dt) = self.value_date_time {
            return Some(ObservationValue::DateTime(dt));
        }
        self.value_boolean.map(ObservationValue::Boolean)
    }

    pub fn set_value(&mut self, value: ObservationValue) {
        self.value_quantity = None;
        self.value_string = None;
        self.value_codeable_concept = None;
        self.value_date_time = None;
        self.value_boolean = None;

        match value {
            ObservationValue::Quantity(q) => self.value_quantity = Some(q),
            ObservationValue::String(s) => self.value_string = Some(s),
            ObservationValue::CodeableConcept(c) => self.value_codeable_concept = Some(c),
            ObservationValue::DateTime(dt) => self.value_date_time = Some(dt),
            ObservationValue::Boolean(b) => self.value_boolean = Some(b),
        }
    }
}

/// FHIR DiagnosticReport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "camelCase")]
pub struct DiagnosticReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contained: Vec<Observation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub category: CodeableConcept,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,
    #[serde(default)]
    pub subject: Reference,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub performer: Vec<Performer>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result: Vec<Reference>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub presented_form: Vec<Attachment>,
}

impl DiagnosticReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_id(&mut self, id: IdType) {
        self.id = Some(id.id_part);
    }

    /// 服务类别的第一个编码，决定处理器
    pub fn first_category_code(&self) -> Option<&str> {
        self.category.first_code()
    }

    /// 以内含资源方式加入结果，返回分配的本地id
    pub fn add_contained_result(&mut self, mut observation: Observation) -> String {
        let local_id = format!("obs-{}", self.contained.len() + 1);
        observation.id = Some(local_id.clone());
        self.contained.push(observation);
        self.result.push(Reference::new(format!("#{}", local_id)));
        local_id
    }

    pub fn contained_observation(&self, local_id: &str) -> Option<&Observation> {
        self.contained
            .iter()
            .find(|o| o.id.as_deref() == Some(local_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_type_parse() {
        let id = IdType::parse("Patient/abc").unwrap();
        assert_eq!(id.resource_type, "Patient");
        assert_eq!(id.id_part, "abc");

        let id = IdType::parse("http://example.org/fhir/Observation/42/_history/3").unwrap();
        assert_eq!(id.resource_type, "Observation");
        assert_eq!(id.id_part, "42");

        assert!(IdType::parse("abc").is_none());
        assert!(IdType::parse("#obs-1").is_none());
        assert!(IdType::parse("").is_none());
    }

    #[test]
    fn test_reference_is_empty() {
        assert!(Reference::default().is_empty());
        assert!(Reference {
            reference: Some(String::new()),
            display: None
        }
        .is_empty());
        assert!(!Reference::new("Patient/1").is_empty());
    }

    #[test]
    fn test_contained_results() {
        let mut report = DiagnosticReport::new();
        let local_id = report.add_contained_result(Observation::default());

        assert_eq!(local_id, "obs-1");
        assert_eq!(report.result[0].contained_id(), Some("obs-1"));
        assert!(report.contained_observation("obs-1").is_some());
    }

    #[test]
    fn test_report_json_shape() {
        let mut report = DiagnosticReport::new();
        report.set_id(IdType::new(DIAGNOSTIC_REPORT, "r-1"));
        report.category = CodeableConcept::from_coding(Coding::new(CODING_0074, "LAB", "Laboratory"));
        report.presented_form.push(Attachment {
            title: Some("scan".to_string()),
            data: Some(b"hello".to_vec()),
            ..Default::default()
        });

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["resourceType"], "DiagnosticReport");
        assert_eq!(json["id"], "r-1");
        assert_eq!(json["category"]["coding"][0]["code"], "LAB");
        assert_eq!(json["presentedForm"][0]["data"], "aGVsbG8=");

        let parsed: DiagnosticReport = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.presented_form[0].data.as_deref(), Some(&b"hello"[..]));
        assert_eq!(parsed.first_category_code(), Some("LAB"));
    }

    #[test]
    fn test_observation_value_switch() {
        let mut observation = Observation::default();
        observation.set_value(ObservationValue::String("positive".to_string()));
        observation.set_value(ObservationValue::Boolean(true));

        assert!(observation.value_string.is_none());
        assert_eq!(observation.value(), Some(ObservationValue::Boolean(true)));
    }
}
