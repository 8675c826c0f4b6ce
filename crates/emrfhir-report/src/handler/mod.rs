//! 诊断报告处理器
//!
//! 每个服务类别对应一个处理器，决定报告与就诊/观察之间如何转换。
//! 读取、创建、更新、作废的通用流程由 trait 的默认方法提供，
//! 具体处理器只需给出自身的服务类别。

mod base;
mod default;
mod laboratory;

pub use default::DefaultHandler;
pub use laboratory::LaboratoryHandler;

use crate::attachment::AttachmentStore;
use crate::classifier::ObsClassifier;
use crate::config::ReportConfig;
use async_trait::async_trait;
use emrfhir_core::fhir::{Coding, DiagnosticReport, CODING_0074};
use emrfhir_core::{AccessionLookup, ClinicalStore, EncounterRole, ReportError, Result};
use std::sync::Arc;

/// 作废报告时使用的原因
pub const RETIRE_REASON: &str = "Voided by FHIR Request.";

/// 处理器共享的依赖
pub struct ReportContext {
    pub store: Arc<dyn ClinicalStore>,
    pub lookup: Arc<dyn AccessionLookup>,
    pub config: Arc<ReportConfig>,
}

impl ReportContext {
    pub fn new(
        store: Arc<dyn ClinicalStore>,
        lookup: Arc<dyn AccessionLookup>,
        config: ReportConfig,
    ) -> Self {
        Self {
            store,
            lookup,
            config: Arc::new(config),
        }
    }

    pub fn classifier(&self) -> ObsClassifier {
        ObsClassifier::new(self.config.concepts.clone())
    }

    pub fn attachments(&self) -> AttachmentStore<'_> {
        AttachmentStore::new(self.store.as_ref())
    }

    /// 执行者使用的就诊角色
    pub async fn performer_role(&self) -> Result<EncounterRole> {
        let uuid = self.config.encounter_role_uuid;
        self.store
            .get_encounter_role_by_uuid(&uuid)
            .await?
            .ok_or_else(|| {
                ReportError::Configuration(format!("encounter role {} does not exist", uuid))
            })
    }
}

/// 诊断报告处理器
#[async_trait]
pub trait ReportHandler: Send + Sync {
    /// 服务类别代码
    fn service_category(&self) -> &str;

    /// 服务类别描述
    fn service_category_description(&self) -> &str;

    fn context(&self) -> &ReportContext;

    /// 报告 `category` 中使用的编码
    fn category_coding(&self) -> Coding {
        Coding::new(
            CODING_0074,
            self.service_category(),
            self.service_category_description(),
        )
    }

    /// 按医嘱uuid或就诊uuid读取报告
    async fn get_report_by_id(&self, id: &str) -> Result<DiagnosticReport> {
        base::get_report(self.context(), self.category_coding(), id).await
    }

    /// 按患者姓名搜索报告，默认不支持
    async fn get_reports_by_subject_name(&self, name: &str) -> Result<Vec<DiagnosticReport>> {
        Err(ReportError::Unsupported(format!(
            "searching {} reports by subject name '{}'",
            self.service_category(),
            name
        )))
    }

    async fn create_report(&self, report: DiagnosticReport) -> Result<DiagnosticReport> {
        base::create_report(self.context(), report).await
    }

    async fn update_report(&self, report: DiagnosticReport, id: &str) -> Result<DiagnosticReport> {
        base::update_report(self.context(), report, id).await
    }

    async fn retire_report(&self, id: &str) -> Result<()> {
        base::retire_report(self.context(), id).await
    }
}
