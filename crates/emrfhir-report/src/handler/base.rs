//! 处理器共用的读写流程

use super::{ReportContext, RETIRE_REASON};
use crate::classifier::{Classification, ObsCategory};
use crate::config::DEFAULT_HANDLER;
use crate::mapping::{self, OBSERVATION};
use chrono::Utc;
use emrfhir_core::fhir::{
    CodeableConcept, Coding, DiagnosticReport, IdType, Observation, Performer, Reference,
    DIAGNOSTIC_REPORT,
};
use emrfhir_core::utils::{object_uuid_by_reference, parse_uuid, update_void_reason};
use emrfhir_core::{Encounter, EncounterType, Obs, Order, Patient, ReportError, Result};
use tracing::{debug, info, warn};

fn report_not_found(id: &str) -> ReportError {
    ReportError::NotFound(format!("Diagnostic Report with id '{}' not found.", id))
}

// ========== 读取 ==========

pub(super) async fn get_report(
    ctx: &ReportContext,
    category: Coding,
    id: &str,
) -> Result<DiagnosticReport> {
    debug!("Getting DiagnosticReport {}", id);
    let uuid = parse_uuid(id).ok_or_else(|| report_not_found(id))?;

    if let Some(order) = ctx.store.get_order_by_uuid(&uuid).await? {
        return report_for_order(ctx, category, &order).await;
    }

    match ctx.store.get_encounter_by_uuid(&uuid).await? {
        Some(encounter) if !encounter.voided => {
            let classification = ctx
                .classifier()
                .classify(encounter.obs_at_top_level(false), false);
            let report_id = encounter.uuid.to_string();
            assemble_report(ctx, category, &encounter, &classification, report_id).await
        }
        _ => Err(report_not_found(id)),
    }
}

async fn report_for_order(
    ctx: &ReportContext,
    category: Coding,
    order: &Order,
) -> Result<DiagnosticReport> {
    let encounter_id = ctx
        .lookup
        .find_encounter_id_for_order(order.id)
        .await?
        .ok_or_else(|| {
            ReportError::NotFound(format!("order {} has no observations", order.uuid))
        })?;
    let encounter = ctx
        .store
        .get_encounter(encounter_id)
        .await?
        .ok_or_else(|| ReportError::NotFound(format!("encounter {}", encounter_id)))?;

    let order_obs = encounter
        .obs_at_top_level(false)
        .into_iter()
        .filter(|obs| obs.order_id == Some(order.id));
    let classification =
        ctx.classifier()
            .classify_with_fallback(order_obs, false, ObsCategory::Result);

    let report_id = order
        .accession_number
        .clone()
        .unwrap_or_else(|| order.uuid.to_string());
    assemble_report(ctx, category, &encounter, &classification, report_id).await
}

async fn assemble_report(
    ctx: &ReportContext,
    category: Coding,
    encounter: &Encounter,
    classification: &Classification,
    report_id: String,
) -> Result<DiagnosticReport> {
    let mut report = DiagnosticReport::new();
    report.set_id(IdType::new(DIAGNOSTIC_REPORT, report_id));
    report.issued = Some(encounter.encounter_datetime);
    report.category = CodeableConcept::from_coding(category);

    let patient = encounter.patient.as_ref();
    if let Some(patient) = patient {
        report.subject = mapping::patient_reference(patient);
    }

    for entry in &encounter.providers {
        report.performer.push(Performer {
            role: Some(CodeableConcept::from_coding(Coding {
                display: Some(entry.role.name.clone()),
                ..Default::default()
            })),
            actor: mapping::practitioner_reference(&entry.provider),
        });
    }

    // 结果分组只有一层，成员展开为报告结果
    for obs in classification.get(ObsCategory::Result) {
        if obs.is_group() {
            for member in obs.group_members.iter().filter(|m| !m.voided) {
                report.add_contained_result(mapping::observation_from_obs(member, patient));
            }
        } else {
            report.add_contained_result(mapping::observation_from_obs(obs, patient));
        }
    }

    let attachments = ctx.attachments();
    for obs in classification.get(ObsCategory::PresentedForm) {
        report.presented_form.push(attachments.load(obs).await?);
    }

    Ok(report)
}

// ========== 写入 ==========

pub(super) async fn create_report(
    ctx: &ReportContext,
    mut report: DiagnosticReport,
) -> Result<DiagnosticReport> {
    debug!("Creating DiagnosticReport");
    let issued = report.issued.ok_or_else(|| {
        ReportError::InvalidInput("DiagnosticReport.issued is required".to_string())
    })?;

    let mut encounter = Encounter::new(issued);
    let patient = attach_patient(ctx, &mut encounter, &report.subject).await?;
    attach_performers(ctx, &mut encounter, &report.performer).await?;

    let type_name = report
        .first_category_code()
        .unwrap_or(DEFAULT_HANDLER)
        .to_string();
    encounter.encounter_type = Some(encounter_type(ctx, &type_name).await?);

    // 观察需要已持久化的就诊id
    let encounter = ctx.store.save_encounter(encounter).await?;
    info!("Saved encounter {} for DiagnosticReport", encounter.uuid);

    save_result_group(ctx, &report, &patient, &encounter).await?;
    save_presented_forms(ctx, &mut report, &patient, &encounter).await?;

    report.set_id(IdType::new(DIAGNOSTIC_REPORT, encounter.uuid.to_string()));
    Ok(report)
}

pub(super) async fn update_report(
    ctx: &ReportContext,
    mut report: DiagnosticReport,
    id: &str,
) -> Result<DiagnosticReport> {
    debug!("Updating DiagnosticReport {}", id);
    let uuid = parse_uuid(id).ok_or_else(|| report_not_found(id))?;
    let mut encounter = ctx
        .store
        .get_encounter_by_uuid(&uuid)
        .await?
        .ok_or_else(|| report_not_found(id))?;
    if encounter.voided {
        return Err(ReportError::NotAllowed(format!(
            "Diagnostic Report '{}' has been retired",
            id
        )));
    }

    let classification = ctx
        .classifier()
        .classify(encounter.obs_at_top_level(false), false);

    if let Some(issued) = report.issued {
        encounter.encounter_datetime = issued;
    }
    let patient = attach_patient(ctx, &mut encounter, &report.subject).await?;
    attach_performers(ctx, &mut encounter, &report.performer).await?;
    if let Some(code) = report.first_category_code().map(str::to_string) {
        encounter.encounter_type = Some(encounter_type(ctx, &code).await?);
    }

    let encounter = ctx.store.save_encounter(encounter).await?;
    let reason = update_void_reason(Utc::now());

    for obs in classification.get(ObsCategory::Result) {
        ctx.store.void_obs(obs, &reason).await?;
    }
    save_result_group(ctx, &report, &patient, &encounter).await?;

    let attachments = ctx.attachments();
    for obs in classification.get(ObsCategory::PresentedForm) {
        attachments.void(obs, &reason).await?;
    }
    save_presented_forms(ctx, &mut report, &patient, &encounter).await?;

    info!("Updated DiagnosticReport {}", encounter.uuid);
    report.set_id(IdType::new(DIAGNOSTIC_REPORT, encounter.uuid.to_string()));
    Ok(report)
}

pub(super) async fn retire_report(ctx: &ReportContext, id: &str) -> Result<()> {
    debug!("Retiring DiagnosticReport {}", id);
    let uuid = parse_uuid(id).ok_or_else(|| report_not_found(id))?;
    let encounter = ctx
        .store
        .get_encounter_by_uuid(&uuid)
        .await?
        .ok_or_else(|| report_not_found(id))?;

    if encounter.voided {
        return Ok(());
    }

    ctx.store
        .void_encounter(&encounter, RETIRE_REASON)
        .await
        .map_err(|e| {
            ReportError::NotAllowed(format!("failed to retire Encounter '{}' due to: {}", id, e))
        })?;
    info!("Retired DiagnosticReport {}", id);
    Ok(())
}

/// 解析报告主体并挂到就诊上；主体缺省时沿用就诊原有患者
async fn attach_patient(
    ctx: &ReportContext,
    encounter: &mut Encounter,
    subject: &Reference,
) -> Result<Patient> {
    if !subject.is_empty() {
        let uuid = object_uuid_by_reference(subject)?;
        let patient = ctx
            .store
            .get_patient_by_uuid(&uuid)
            .await?
            .ok_or_else(|| ReportError::NotFound(format!("patient {}", uuid)))?;
        encounter.patient = Some(patient);
    }

    encounter.patient.clone().ok_or_else(|| {
        ReportError::InvalidInput("DiagnosticReport.subject is required".to_string())
    })
}

async fn attach_performers(
    ctx: &ReportContext,
    encounter: &mut Encounter,
    performers: &[Performer],
) -> Result<()> {
    if performers.is_empty() {
        return Ok(());
    }

    let role = ctx.performer_role().await?;
    for performer in performers {
        if performer.is_empty() || performer.actor.is_empty() {
            warn!("Skipping empty performer on DiagnosticReport");
            continue;
        }

        let uuid = object_uuid_by_reference(&performer.actor)?;
        let provider = ctx
            .store
            .get_provider_by_uuid(&uuid)
            .await?
            .ok_or_else(|| ReportError::NotFound(format!("practitioner {}", uuid)))?;
        encounter.add_provider(role.clone(), provider);
    }
    Ok(())
}

async fn encounter_type(ctx: &ReportContext, name: &str) -> Result<EncounterType> {
    ctx.store
        .get_encounter_type_by_name(name)
        .await?
        .ok_or_else(|| ReportError::NotFound(format!("encounter type '{}'", name)))
}

/// 复制报告的主体和签发时间到观察上
fn prepare_observation(mut observation: Observation, report: &DiagnosticReport) -> Observation {
    observation.subject = Some(report.subject.clone());
    if report.issued.is_some() {
        observation.issued = report.issued;
    }
    observation
}

async fn resolve_result(
    ctx: &ReportContext,
    report: &DiagnosticReport,
    reference: &Reference,
) -> Result<Observation> {
    if let Some(local_id) = reference.contained_id() {
        return report
            .contained_observation(local_id)
            .cloned()
            .ok_or_else(|| {
                ReportError::InvalidInput(format!("contained observation '#{}' not found", local_id))
            });
    }

    match reference.id_type() {
        Some(id) if id.resource_type == OBSERVATION => {
            let uuid = parse_uuid(&id.id_part).ok_or_else(|| {
                ReportError::InvalidInput(format!("observation id '{}' is not a uuid", id.id_part))
            })?;
            let obs = ctx
                .store
                .get_obs_by_uuid(&uuid)
                .await?
                .ok_or_else(|| ReportError::NotFound(format!("observation {}", uuid)))?;
            Ok(mapping::observation_from_obs(&obs, None))
        }
        _ => Err(ReportError::InvalidInput(format!(
            "result reference {:?} is neither contained nor an Observation",
            reference.reference
        ))),
    }
}

/// 每个结果保存为一个观察，再统一挂到新的结果分组下
async fn save_result_group(
    ctx: &ReportContext,
    report: &DiagnosticReport,
    patient: &Patient,
    encounter: &Encounter,
) -> Result<Option<Obs>> {
    let mut members = Vec::with_capacity(report.result.len());
    for reference in &report.result {
        let observation = prepare_observation(resolve_result(ctx, report, reference).await?, report);
        let mut obs =
            mapping::obs_from_observation(ctx.store.as_ref(), &observation, patient).await?;
        obs.encounter_id = encounter.id;
        members.push(ctx.store.save_obs(obs).await?);
    }

    if members.is_empty() {
        return Ok(None);
    }

    let concept_id = ctx.config.concepts.result;
    let concept = ctx.store.get_concept(concept_id).await?.ok_or_else(|| {
        ReportError::Configuration(format!("result concept {} does not exist", concept_id))
    })?;

    let group_datetime = report.issued.unwrap_or(encounter.encounter_datetime);
    let mut group = Obs::new(patient.id, concept, group_datetime);
    group.encounter_id = encounter.id;
    for member in members {
        group.add_group_member(member);
    }

    Ok(Some(ctx.store.save_obs(group).await?))
}

async fn save_presented_forms(
    ctx: &ReportContext,
    report: &mut DiagnosticReport,
    patient: &Patient,
    encounter: &Encounter,
) -> Result<()> {
    let issued = report.issued;
    let concept_id = ctx.config.concepts.presented_form;
    let attachments = ctx.attachments();

    for attachment in report.presented_form.iter_mut() {
        if attachment.creation.is_none() {
            attachment.creation = issued;
        }
        attachments
            .save(encounter, concept_id, patient, attachment)
            .await?;
    }
    Ok(())
}
