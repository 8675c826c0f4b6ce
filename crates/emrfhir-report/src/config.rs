//! 诊断报告配置
//!
//! 支持从配置文件和 `EMRFHIR` 前缀的环境变量加载，
//! 医嘱类型到处理器的映射还会在每次读取报告时从系统全局属性中刷新。

use config::{Config, Environment, File, FileFormat};
use emrfhir_core::{ReportError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// 默认处理器的键，也是缺省的就诊类型名
pub const DEFAULT_HANDLER: &str = "DEFAULT";

/// 医嘱类型映射所在的全局属性
pub const ORDER_TYPE_TO_HANDLER_MAP_PROPERTY: &str = "fhir.diagnosticreport.orderTypeToHandlerMap";

/// 内置的医嘱类型映射
pub const BUILTIN_ORDER_TYPE_MAP: &str = "Test Order=LAB, Default=DEFAULT";

/// 内置的处理器注册表
pub const BUILTIN_HANDLERS: &str = "LAB=LaboratoryHandler, DEFAULT=DefaultHandler";

/// 诊断报告使用的已知概念id
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConcepts {
    pub name: i32,
    pub status: i32,
    pub result: i32,
    pub presented_form: i32,
    pub imaging_study: Option<i32>,
}

/// 诊断报告子系统配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// 医嘱类型映射的全局属性名
    pub order_type_handler_map_property: String,
    /// 已知概念
    pub concepts: ReportConcepts,
    /// 执行者使用的就诊角色
    pub encounter_role_uuid: Uuid,
    /// 内置医嘱类型映射，`医嘱类型=处理器` 逗号分隔
    pub default_handlers: String,
    /// 启动时注册的处理器，`服务类别=处理器类型名` 逗号分隔
    pub handlers: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            order_type_handler_map_property: ORDER_TYPE_TO_HANDLER_MAP_PROPERTY.to_string(),
            concepts: ReportConcepts::default(),
            encounter_role_uuid: Uuid::nil(),
            default_handlers: BUILTIN_ORDER_TYPE_MAP.to_string(),
            handlers: BUILTIN_HANDLERS.to_string(),
        }
    }
}

impl ReportConfig {
    /// 从可选的配置文件和环境变量加载
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path));
        }

        let settings = builder
            .add_source(Environment::with_prefix("EMRFHIR").separator("__"))
            .build()
            .map_err(|e| ReportError::Configuration(format!("failed to load config: {}", e)))?;

        Self::from_settings(settings)
    }

    /// 从TOML文本加载
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(text, FileFormat::Toml))
            .build()
            .map_err(|e| ReportError::Configuration(format!("failed to parse config: {}", e)))?;

        Self::from_settings(settings)
    }

    fn from_settings(settings: Config) -> Result<Self> {
        let config: ReportConfig = settings
            .try_deserialize()
            .map_err(|e| ReportError::Configuration(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let concepts = [
            ("name", self.concepts.name),
            ("status", self.concepts.status),
            ("result", self.concepts.result),
            ("presented_form", self.concepts.presented_form),
        ];
        for (field, id) in concepts {
            if id <= 0 {
                return Err(ReportError::Configuration(format!(
                    "concept id for '{}' must be configured",
                    field
                )));
            }
        }

        if self.encounter_role_uuid.is_nil() {
            return Err(ReportError::Configuration(
                "encounter_role_uuid must be configured".to_string(),
            ));
        }

        OrderTypeHandlerMap::parse(&self.default_handlers)?;
        OrderTypeHandlerMap::parse(&self.handlers)?;
        Ok(())
    }

    /// 内置医嘱类型映射
    pub fn default_order_type_map(&self) -> Result<OrderTypeHandlerMap> {
        OrderTypeHandlerMap::parse(&self.default_handlers)
    }
}

/// `键=值` 映射，用于医嘱类型到处理器以及服务类别到处理器类型名
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderTypeHandlerMap {
    entries: HashMap<String, String>,
}

impl OrderTypeHandlerMap {
    /// 解析 `a=B, c=D`，空项被跳过
    pub fn parse(text: &str) -> Result<Self> {
        let mut map = Self::default();
        for part in text.trim().split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part.split_once('=').ok_or_else(|| {
                ReportError::Configuration(format!("invalid handler mapping entry '{}'", part))
            })?;
            map.insert(key.trim(), value.trim());
        }
        Ok(map)
    }

    pub fn insert(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// 用另一个映射覆盖当前项
    pub fn merge(&mut self, other: OrderTypeHandlerMap) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
