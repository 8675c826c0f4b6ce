//! EMR实体与FHIR资源之间的转换

use emrfhir_core::fhir::{
    CodeableConcept, Coding, Observation, ObservationStatus, ObservationValue, Quantity, Reference,
    CONCEPT_SYSTEM,
};
use emrfhir_core::utils::parse_uuid;
use emrfhir_core::{ClinicalStore, Concept, Obs, ObsValue, Patient, Provider, ReportError, Result};

pub const PATIENT: &str = "Patient";
pub const PRACTITIONER: &str = "Practitioner";
pub const OBSERVATION: &str = "Observation";

/// 患者引用
pub fn patient_reference(patient: &Patient) -> Reference {
    Reference::new(format!("{}/{}", PATIENT, patient.uuid)).with_display(patient.display_name())
}

/// 医护人员引用
pub fn practitioner_reference(provider: &Provider) -> Reference {
    Reference::new(format!("{}/{}", PRACTITIONER, provider.uuid)).with_display(provider.name.clone())
}

fn concept_coding(concept: &Concept) -> CodeableConcept {
    CodeableConcept::from_coding(Coding::new(
        CONCEPT_SYSTEM,
        concept.uuid.to_string(),
        concept.name.clone(),
    ))
}

/// 观察转换为FHIR Observation
pub fn observation_from_obs(obs: &Obs, patient: Option<&Patient>) -> Observation {
    let mut observation = Observation {
        id: Some(obs.uuid.to_string()),
        status: ObservationStatus::Final,
        code: concept_coding(&obs.concept),
        subject: patient.map(patient_reference),
        effective_date_time: Some(obs.obs_datetime),
        issued: Some(obs.obs_datetime),
        ..Default::default()
    };

    let value = match &obs.value {
        Some(ObsValue::Numeric(value)) => Some(ObservationValue::Quantity(Quantity {
            value: Some(*value),
            unit: obs.concept.units.clone(),
        })),
        Some(ObsValue::Text(text)) => Some(ObservationValue::String(text.clone())),
        Some(ObsValue::Coded(answer)) => Some(ObservationValue::CodeableConcept(concept_coding(answer))),
        Some(ObsValue::DateTime(dt)) => Some(ObservationValue::DateTime(*dt)),
        Some(ObsValue::Boolean(b)) => Some(ObservationValue::Boolean(*b)),
        Some(ObsValue::Complex(data)) => Some(ObservationValue::String(data.title.clone())),
        None => None,
    };
    if let Some(value) = value {
        observation.set_value(value);
    }

    observation
}

async fn concept_by_code(store: &dyn ClinicalStore, code: &CodeableConcept) -> Result<Concept> {
    let code = code
        .first_code()
        .ok_or_else(|| ReportError::InvalidInput("observation code has no coding".to_string()))?;
    let uuid = parse_uuid(code).ok_or_else(|| {
        ReportError::NotFound(format!("concept with code '{}' not found", code))
    })?;

    store
        .get_concept_by_uuid(&uuid)
        .await?
        .ok_or_else(|| ReportError::NotFound(format!("concept with code '{}' not found", code)))
}

/// FHIR Observation转换为尚未持久化的观察
pub async fn obs_from_observation(
    store: &dyn ClinicalStore,
    observation: &Observation,
    patient: &Patient,
) -> Result<Obs> {
    let concept = concept_by_code(store, &observation.code).await?;
    let obs_datetime = observation
        .effective_date_time
        .or(observation.issued)
        .ok_or_else(|| {
            ReportError::InvalidInput("observation has neither effectiveDateTime nor issued".to_string())
        })?;

    let value = match observation.value() {
        Some(ObservationValue::Quantity(quantity)) => {
            let value = quantity.value.ok_or_else(|| {
                ReportError::InvalidInput("valueQuantity has no value".to_string())
            })?;
            Some(ObsValue::Numeric(value))
        }
        Some(ObservationValue::String(text)) => Some(ObsValue::Text(text)),
        Some(ObservationValue::CodeableConcept(code)) => {
            Some(ObsValue::Coded(concept_by_code(store, &code).await?))
        }
        Some(ObservationValue::DateTime(dt)) => Some(ObsValue::DateTime(dt)),
        Some(ObservationValue::Boolean(b)) => Some(ObsValue::Boolean(b)),
        None => None,
    };

    let mut obs = Obs::new(patient.id, concept, obs_datetime);
    obs.value = value;
    Ok(obs)
}
