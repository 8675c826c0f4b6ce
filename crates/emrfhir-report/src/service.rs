//! 诊断报告服务
//!
//! 对宿主服务层暴露的接口。读取按医嘱类型选择处理器，
//! 创建按报告的服务类别选择，更新和作废按就诊已记录的就诊类型选择。
//! 三条分派路径刻意保持独立。

use crate::config::{OrderTypeHandlerMap, DEFAULT_HANDLER};
use crate::handler::{ReportContext, ReportHandler};
use crate::registry::HandlerRegistry;
use emrfhir_core::fhir::DiagnosticReport;
use emrfhir_core::utils::parse_uuid;
use emrfhir_core::{Encounter, ReportError, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// 诊断报告服务
pub struct DiagnosticReportService {
    registry: HandlerRegistry,
}

impl DiagnosticReportService {
    /// 验证配置并按配置注册处理器
    pub fn new(context: Arc<ReportContext>) -> Result<Self> {
        context.config.validate()?;
        Ok(Self {
            registry: HandlerRegistry::from_config(context)?,
        })
    }

    pub fn with_registry(registry: HandlerRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    fn context(&self) -> &ReportContext {
        self.registry.context()
    }

    /// 内置映射叠加全局属性中的映射，每次调用都重新读取属性
    pub async fn order_type_handler_map(&self) -> Result<OrderTypeHandlerMap> {
        let ctx = self.context();
        let mut map = ctx.config.default_order_type_map()?;
        if let Some(value) = ctx
            .store
            .get_global_property(&ctx.config.order_type_handler_map_property)
            .await?
        {
            map.merge(OrderTypeHandlerMap::parse(&value)?);
        }
        Ok(map)
    }

    // ========== 分派 ==========

    /// 读取路径：按医嘱类型查映射，未映射时使用默认处理器
    pub fn resolve_handler_for_order(
        &self,
        map: &OrderTypeHandlerMap,
        order_type: &str,
    ) -> Result<Arc<dyn ReportHandler>> {
        let key = map.get(order_type).unwrap_or(DEFAULT_HANDLER);
        self.handler_or_default(key)
    }

    /// 创建路径：按报告第一个服务类别编码
    pub fn resolve_handler_for_create(&self, category: Option<&str>) -> Result<Arc<dyn ReportHandler>> {
        self.handler_or_default(category.unwrap_or(DEFAULT_HANDLER))
    }

    /// 更新/作废路径：按就诊记录的就诊类型名
    pub fn resolve_handler_for_existing(
        &self,
        encounter_type: Option<&str>,
    ) -> Result<Arc<dyn ReportHandler>> {
        self.handler_or_default(encounter_type.unwrap_or(DEFAULT_HANDLER))
    }

    fn handler_or_default(&self, key: &str) -> Result<Arc<dyn ReportHandler>> {
        if let Some(handler) = self.registry.get(key) {
            return Ok(handler);
        }

        warn!(
            "No report handler registered for {}, falling back to {}",
            key, DEFAULT_HANDLER
        );
        self.registry.get(DEFAULT_HANDLER).ok_or_else(|| {
            ReportError::Configuration(format!(
                "no report handler registered for '{}' and no {} handler",
                key, DEFAULT_HANDLER
            ))
        })
    }

    // ========== 报告操作 ==========

    /// 按检查号读取报告；检查号无匹配时按报告（就诊）uuid读取
    pub async fn get_diagnostic_report(&self, report_id: &str) -> Result<DiagnosticReport> {
        debug!("Getting DiagnosticReport {}", report_id);
        let map = self.order_type_handler_map().await?;
        let ctx = self.context();

        let orders = ctx.lookup.find_orders_by_accession_number(report_id).await?;
        if let Some(first) = orders.first() {
            let order = ctx.store.get_order(first.id).await?.ok_or_else(|| {
                ReportError::NotFound(format!(
                    "can not find order by the accession number '{}'",
                    report_id
                ))
            })?;
            let handler = self.resolve_handler_for_order(&map, &order.order_type.name)?;
            return handler.get_report_by_id(&order.uuid.to_string()).await;
        }

        if let Some(uuid) = parse_uuid(report_id) {
            if let Some(encounter) = ctx.store.get_encounter_by_uuid(&uuid).await? {
                let handler = self.resolve_handler_for_existing(encounter.encounter_type_name())?;
                return handler.get_report_by_id(report_id).await;
            }
        }

        Err(ReportError::NotFound(format!(
            "can not identify order by accession number '{}'",
            report_id
        )))
    }

    pub async fn create_diagnostic_report(&self, report: DiagnosticReport) -> Result<DiagnosticReport> {
        debug!("Creating DiagnosticReport");
        let handler = self.resolve_handler_for_create(report.first_category_code())?;
        self.in_transaction(handler.create_report(report)).await
    }

    pub async fn update_diagnostic_report(
        &self,
        report: DiagnosticReport,
        id: &str,
    ) -> Result<DiagnosticReport> {
        debug!("Updating DiagnosticReport {}", id);
        let encounter = self.existing_report(id).await?;
        let handler = self.resolve_handler_for_existing(encounter.encounter_type_name())?;
        self.in_transaction(handler.update_report(report, id)).await
    }

    pub async fn retire_diagnostic_report(&self, id: &str) -> Result<()> {
        debug!("Retiring DiagnosticReport {}", id);
        let encounter = self.existing_report(id).await?;
        let handler = self.resolve_handler_for_existing(encounter.encounter_type_name())?;
        self.in_transaction(handler.retire_report(id)).await
    }

    /// 按患者姓名和服务类别搜索，未给出类别时使用默认处理器
    pub async fn get_diagnostic_reports_by_patient_name_and_service_category(
        &self,
        patient_name: &str,
        service_category: Option<&str>,
    ) -> Result<Vec<DiagnosticReport>> {
        let handler = self.handler_or_default(service_category.unwrap_or(DEFAULT_HANDLER))?;
        handler.get_reports_by_subject_name(patient_name).await
    }

    async fn existing_report(&self, id: &str) -> Result<Encounter> {
        let not_found = || ReportError::NotFound(format!("Diagnostic Report with id '{}' not found.", id));
        let uuid = parse_uuid(id).ok_or_else(not_found)?;
        self.context()
            .store
            .get_encounter_by_uuid(&uuid)
            .await?
            .ok_or_else(not_found)
    }

    /// 在一个事务中执行写操作，失败时回滚
    async fn in_transaction<T, F>(&self, operation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let store = &self.context().store;
        store.begin().await?;

        match operation.await {
            Ok(value) => {
                store.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = store.rollback().await {
                    error!("Failed to roll back DiagnosticReport transaction: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    // ========== 处理器管理 ==========

    pub fn get_handler(&self, key: &str) -> Option<Arc<dyn ReportHandler>> {
        self.registry.get(key)
    }

    pub fn get_handlers(&self) -> HashMap<String, Arc<dyn ReportHandler>> {
        self.registry.handlers()
    }

    pub fn set_handlers<I>(&self, handlers: I)
    where
        I: IntoIterator<Item = Arc<dyn ReportHandler>>,
    {
        self.registry.set_all(handlers);
    }

    pub fn register_handler(&self, key: &str, handler: Arc<dyn ReportHandler>) {
        self.registry.register(key, handler);
    }

    pub fn register_handler_type(&self, key: &str, type_name: &str) -> Result<()> {
        self.registry.register_type(key, type_name)
    }

    pub fn remove_handler(&self, key: &str) -> Option<Arc<dyn ReportHandler>> {
        self.registry.remove(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::LaboratoryHandler;
    use crate::test_support::Fixture;
    use emrfhir_core::fhir::{Attachment, CodeableConcept, Coding, Reference, CODING_0074};
    use emrfhir_core::ClinicalStore;
    use emrfhir_database::StoreOperation;

    async fn setup() -> (Fixture, DiagnosticReportService) {
        let fixture = Fixture::new().await;
        let service = DiagnosticReportService::new(fixture.context.clone()).unwrap();
        (fixture, service)
    }

    fn report(fixture: &Fixture, category: Option<&str>, values: &[f64]) -> DiagnosticReport {
        let mut report = DiagnosticReport::new();
        report.issued = Some(fixture.issued);
        report.subject = Reference::new(format!("Patient/{}", fixture.patient.uuid));
        if let Some(code) = category {
            report.category = CodeableConcept::from_coding(Coding::new(CODING_0074, code, code));
        }
        for value in values {
            report.add_contained_result(fixture.hemoglobin_observation(*value));
        }
        report
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (fixture, service) = setup().await;
        fixture.seed_lab_order(11.0).await;

        let original = service.get_diagnostic_report("ACC-1").await.unwrap();
        let created = service.create_diagnostic_report(original.clone()).await.unwrap();
        let read = service
            .get_diagnostic_report(created.id.as_deref().unwrap())
            .await
            .unwrap();

        assert_eq!(read.issued, original.issued);
        assert_eq!(read.subject, original.subject);
        assert_eq!(read.result.len(), original.result.len());
        assert_eq!(read.contained[0].value(), original.contained[0].value());
        assert_eq!(read.contained[0].code, original.contained[0].code);
    }

    #[tokio::test]
    async fn test_report_serializes_as_fhir_json() {
        let (fixture, service) = setup().await;
        let mut input = report(&fixture, Some("LAB"), &[1.0]);
        input.presented_form.push(Attachment {
            content_type: Some("text/plain".to_string()),
            data: Some(b"hi".to_vec()),
            title: Some("note.txt".to_string()),
            ..Default::default()
        });
        let created = service.create_diagnostic_report(input).await.unwrap();
        let read = service
            .get_diagnostic_report(created.id.as_deref().unwrap())
            .await
            .unwrap();

        let json = serde_json::to_value(&read).unwrap();
        assert_eq!(json["resourceType"], "DiagnosticReport");
        assert_eq!(json["result"][0]["reference"], "#obs-1");
        assert_eq!(json["contained"][0]["resourceType"], "Observation");
        assert_eq!(json["contained"][0]["valueQuantity"]["value"], 1.0);
        assert_eq!(json["presentedForm"][0]["data"], "aGk=");
        assert_eq!(json["presentedForm"][0]["contentType"], "text/plain");
        assert_eq!(json["presentedForm"][0]["size"], 2);
    }

    #[tokio::test]
    async fn test_retire_twice_voids_once() {
        let (fixture, service) = setup().await;
        let created = service
            .create_diagnostic_report(report(&fixture, Some("LAB"), &[1.0]))
            .await
            .unwrap();
        let id = created.id.unwrap();

        service.retire_diagnostic_report(&id).await.unwrap();
        service.retire_diagnostic_report(&id).await.unwrap();

        let encounter = fixture.encounter(&id).await;
        assert!(encounter.voided);
        assert_eq!(fixture.store.encounters().await.len(), 1);
        assert!(service.get_diagnostic_report(&id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_replaces_results() {
        let (fixture, service) = setup().await;
        let created = service
            .create_diagnostic_report(report(&fixture, Some("LAB"), &[1.0, 2.0]))
            .await
            .unwrap();
        let id = created.id.unwrap();

        service
            .update_diagnostic_report(report(&fixture, None, &[3.0]), &id)
            .await
            .unwrap();

        assert_eq!(fixture.active_hemoglobin_values(&id).await, vec![3.0]);
        // 未给出类别时保留原就诊类型
        assert_eq!(fixture.encounter(&id).await.encounter_type_name(), Some("LAB"));
    }

    #[tokio::test]
    async fn test_unmapped_order_type_uses_default_handler() {
        let (fixture, service) = setup().await;
        let order = fixture.insert_order(11, "Radiology Order", "ACC-2").await;
        fixture.seed_order_result(&order, 4.0).await;
        fixture.seed_lab_order(5.0).await;

        let map = service.order_type_handler_map().await.unwrap();
        let handler = service.resolve_handler_for_order(&map, "Radiology Order").unwrap();
        assert_eq!(handler.service_category(), "DEFAULT");

        let unmapped = service.get_diagnostic_report("ACC-2").await.unwrap();
        assert_eq!(unmapped.category.first_code(), Some("DEFAULT"));
        assert_eq!(unmapped.id.as_deref(), Some("ACC-2"));

        let mapped = service.get_diagnostic_report("ACC-1").await.unwrap();
        assert_eq!(mapped.category.first_code(), Some("LAB"));
    }

    #[tokio::test]
    async fn test_global_property_overrides_order_type_map() {
        let (fixture, service) = setup().await;
        fixture.seed_lab_order(5.0).await;
        fixture
            .store
            .set_global_property(
                "fhir.diagnosticreport.orderTypeToHandlerMap",
                "Test Order=DEFAULT",
            )
            .await;

        let report = service.get_diagnostic_report("ACC-1").await.unwrap();
        assert_eq!(report.category.first_code(), Some("DEFAULT"));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found_without_mutation() {
        let (fixture, service) = setup().await;

        let err = service.get_diagnostic_report("does-not-exist").await.unwrap_err();
        assert!(err.is_not_found());

        let err = service
            .update_diagnostic_report(report(&fixture, Some("LAB"), &[1.0]), "does-not-exist")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(fixture.store.encounters().await.is_empty());

        let err = service.retire_diagnostic_report("does-not-exist").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_create_rolls_back() {
        let (fixture, service) = setup().await;
        fixture
            .store
            .fail_next(StoreOperation::SaveObs, "constraint violation")
            .await;

        let err = service
            .create_diagnostic_report(report(&fixture, Some("LAB"), &[1.0]))
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Database(_)));
        assert!(fixture.store.encounters().await.is_empty());

        // 事务已结束，可以开始新的事务
        fixture.store.begin().await.unwrap();
        fixture.store.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_overlapping_creates_both_succeed() {
        let (fixture, service) = setup().await;

        // 先占住事务，让两个创建请求都在等待中重叠
        let held = async {
            fixture.store.begin().await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            fixture.store.commit().await.unwrap();
        };
        let (_, first, second) = tokio::join!(
            held,
            service.create_diagnostic_report(report(&fixture, Some("LAB"), &[1.0])),
            service.create_diagnostic_report(report(&fixture, Some("LAB"), &[2.0])),
        );

        let first = first.unwrap();
        let second = second.unwrap();
        assert_ne!(first.id, second.id);
        assert_eq!(fixture.store.encounters().await.len(), 2);
        assert_eq!(
            fixture
                .active_hemoglobin_values(first.id.as_deref().unwrap())
                .await,
            vec![1.0]
        );
        assert_eq!(
            fixture
                .active_hemoglobin_values(second.id.as_deref().unwrap())
                .await,
            vec![2.0]
        );
    }

    #[tokio::test]
    async fn test_retire_failure_surfaces_not_allowed() {
        let (fixture, service) = setup().await;
        let created = service
            .create_diagnostic_report(report(&fixture, Some("LAB"), &[1.0]))
            .await
            .unwrap();
        fixture
            .store
            .fail_next(StoreOperation::VoidEncounter, "encounter is locked")
            .await;

        let err = service
            .retire_diagnostic_report(created.id.as_deref().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::NotAllowed(_)));
        assert!(!fixture.encounter(created.id.as_deref().unwrap()).await.voided);
    }

    #[tokio::test]
    async fn test_create_and_existing_dispatch_keys() {
        let (_fixture, service) = setup().await;

        let handler = service.resolve_handler_for_create(Some("LAB")).unwrap();
        assert_eq!(handler.service_category(), "LAB");
        let handler = service.resolve_handler_for_create(Some("RAD")).unwrap();
        assert_eq!(handler.service_category(), "DEFAULT");
        let handler = service.resolve_handler_for_existing(None).unwrap();
        assert_eq!(handler.service_category(), "DEFAULT");
    }

    #[tokio::test]
    async fn test_missing_default_handler_is_configuration_error() {
        let (fixture, service) = setup().await;
        let lab: Arc<dyn ReportHandler> = Arc::new(LaboratoryHandler::new(fixture.context.clone()));
        service.set_handlers(vec![lab]);

        assert!(service.resolve_handler_for_create(Some("LAB")).is_ok());
        let err = service.resolve_handler_for_create(Some("RAD")).err().unwrap();
        assert!(matches!(err, ReportError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_subject_name_search_is_unsupported() {
        let (_fixture, service) = setup().await;

        let err = service
            .get_diagnostic_reports_by_patient_name_and_service_category("Jane", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ReportError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_handler_management() {
        let (_fixture, service) = setup().await;

        service.register_handler_type("MICRO", "LaboratoryHandler").unwrap();
        assert_eq!(service.get_handlers().len(), 3);
        assert!(service.get_handler("MICRO").is_some());
        assert!(service.register_handler_type("X", "NoSuchHandler").is_err());

        service.remove_handler("MICRO");
        assert!(service.get_handler("MICRO").is_none());
    }
}
