//! 默认报告处理器，没有专用处理器的服务类别都落到这里

use async_trait::async_trait;
use super::{ReportContext, ReportHandler};
use crate::config::DEFAULT_HANDLER;
use std::sync::Arc;

pub struct DefaultHandler {
    context: Arc<ReportContext>,
}

impl DefaultHandler {
    pub const SERVICE_CATEGORY: &'static str = DEFAULT_HANDLER;
    pub const SERVICE_CATEGORY_DESCRIPTION: &'static str = "Default";

    pub fn new(context: Arc<ReportContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl ReportHandler for DefaultHandler {
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
