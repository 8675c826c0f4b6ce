//! 检验报告处理器

use async_trait::async_trait;
use super::{ReportContext, ReportHandler};
use std::sync::Arc;

/// 检验科 (`LAB`) 报告处理器
pub struct LaboratoryHandler {
    context: Arc<ReportContext>,
}

impl LaboratoryHandler {
    pub const SERVICE_CATEGORY: &'static str = "LAB";
    pub const SERVICE_CATEGORY_DESCRIPTION: &'static str = "Laboratory";

    pub fn new(context: Arc<ReportContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ReportHandler for LaboratoryHandler {
    fn service_category(&self) -> &str {
        Self::SERVICE_CATEGORY
    }

    fn service_category_description(&self) -> &str {
        Self::SERVICE_CATEGORY_DESCRIPTION
    }

    fn context(&self) -> &ReportContext {
        &self.context
    }
}
