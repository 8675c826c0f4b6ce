//! 通用工具函数

use crate::fhir::Reference;
use crate::{ReportError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use uuid::Uuid;

/// 解析字符串形式的UUID
pub fn parse_uuid(value: &str) -> Option<Uuid> {
    Uuid::parse_str(value.trim()).ok()
}

/// 从引用中取出对象UUID，引用必须是 `Type/<uuid>` 形式
pub fn object_uuid_by_reference(reference: &Reference) -> Result<Uuid> {
    let id = reference.id_type().ok_or_else(|| {
        ReportError::InvalidInput(format!(
            "reference {:?} is not of the form Type/id",
            reference.reference
        ))
    })?;

    parse_uuid(&id.id_part).ok_or_else(|| {
        ReportError::InvalidInput(format!("reference id '{}' is not a uuid", id.id_part))
    })
}

/// 更新时作废旧数据使用的原因
pub fn update_void_reason(now: DateTime<Utc>) -> String {
    format!(
        "Due to update DiagnosticReport on {}",
        now.to_rfc3339_opts(SecondsFormat::Millis, true)
    )
}
