//! # EMR FHIR 诊断报告模块
//!
//! 在EMR的就诊/观察与FHIR DiagnosticReport之间双向转换，
//! 并按服务类别把请求分派给不同的报告处理器。

pub mod attachment;
pub mod classifier;
pub mod config;
pub mod handler;
pub mod mapping;
pub mod registry;
pub mod service;

#[cfg(test)]
pub(crate) mod test_support;

// 重新导出主要类型
pub use attachment::AttachmentStore;
pub use classifier::{Classification, ObsCategory, ObsClassifier};
pub use config::{OrderTypeHandlerMap, ReportConcepts, ReportConfig, DEFAULT_HANDLER};
pub use handler::{DefaultHandler, LaboratoryHandler, ReportContext, ReportHandler};
pub use registry::{HandlerFactory, HandlerRegistry};
pub use service::DiagnosticReportService;
