//! # EMR FHIR Core
//!
//! 诊断报告子系统的核心模块，提供EMR实体模型、FHIR资源模型、错误定义、数据访问接口和通用工具。

pub mod error;
pub mod fhir;
pub mod models;
pub mod store;
pub mod utils;

pub use error::{ReportError, Result};
pub use models::*;
pub use store::{AccessionLookup, ClinicalStore, RAW_VIEW};
