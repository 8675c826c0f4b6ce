//! 测试用的内存环境

use crate::config::{ReportConcepts, ReportConfig};
use crate::handler::ReportContext;
use chrono::{DateTime, TimeZone, Utc};
use emrfhir_core::fhir::{
    CodeableConcept, Coding, Observation, ObservationValue, Quantity, CONCEPT_SYSTEM,
};
use emrfhir_core::*;
use emrfhir_database::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

pub(crate) struct Fixture {
    pub store: Arc<MemoryStore>,
    pub context: Arc<ReportContext>,
    pub patient: Patient,
    pub provider: Provider,
    pub hemoglobin: Concept,
    pub order: Order,
    pub issued: DateTime<Utc>,
}

fn concept(id: i32, name: &str, datatype: ConceptDatatype) -> Concept {
    Concept {
        id,
        uuid: Uuid::new_v4(),
        name: name.to_string(),
        datatype,
        units: None,
    }
}

impl Fixture {
    pub async fn new() -> Self {
        let store = Arc::new(MemoryStore::new());

        let patient = Patient {
            id: 1,
            uuid: Uuid::new_v4(),
            given_name: "Jane".to_string(),
            family_name: "Doe".to_string(),
            voided: false,
        };
        let provider = Provider {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "Dr. House".to_string(),
        };
        let role = EncounterRole {
            id: 1,
            uuid: Uuid::new_v4(),
            name: "Unknown".to_string(),
        };
        let hemoglobin = Concept {
            units: Some("g/dL".to_string()),
            ..concept(200, "Hemoglobin", ConceptDatatype::Numeric)
        };

        store.insert_patient(patient.clone()).await;
        store.insert_provider(provider.clone()).await;
        store.insert_encounter_role(role.clone()).await;
        for c in [
            concept(100, "Report name", ConceptDatatype::Text),
            concept(101, "Report status", ConceptDatatype::Text),
            concept(102, "Report results", ConceptDatatype::NotApplicable),
            concept(103, "Presented form", ConceptDatatype::Complex),
            hemoglobin.clone(),
        ] {
            store.insert_concept(c).await;
        }
        for (id, name) in [(1, "LAB"), (2, "DEFAULT")] {
            store
                .insert_encounter_type(EncounterType {
                    id,
                    uuid: Uuid::new_v4(),
                    name: name.to_string(),
                    description: None,
                })
                .await;
        }

        let config = ReportConfig {
            concepts: ReportConcepts {
                name: 100,
                status: 101,
                result: 102,
                presented_form: 103,
                imaging_study: None,
            },
            encounter_role_uuid: role.uuid,
            ..Default::default()
        };
        let context = Arc::new(ReportContext::new(store.clone(), store.clone(), config));

        let mut fixture = Self {
            store,
            context,
            patient,
            provider,
            hemoglobin,
            order: Order {
                id: 0,
                uuid: Uuid::nil(),
                accession_number: None,
                order_type: OrderType {
                    id: 0,
                    uuid: Uuid::nil(),
                    name: String::new(),
                },
                patient_id: 1,
                encounter_id: None,
            },
            issued: Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap(),
        };
        fixture.order = fixture.insert_order(10, "Test Order", "ACC-1").await;
        fixture
    }

    pub async fn insert_order(&self, id: i32, order_type: &str, accession_number: &str) -> Order {
        let order = Order {
            id,
            uuid: Uuid::new_v4(),
            accession_number: Some(accession_number.to_string()),
            order_type: OrderType {
                id,
                uuid: Uuid::new_v4(),
                name: order_type.to_string(),
            },
            patient_id: self.patient.id,
            encounter_id: None,
        };
        self.store.insert_order(order.clone()).await;
        order
    }

    /// 含血红蛋白数值的Observation
    pub fn hemoglobin_observation(&self, value: f64) -> Observation {
        let mut observation = Observation {
            code: CodeableConcept::from_coding(Coding::new(
                CONCEPT_SYSTEM,
                self.hemoglobin.uuid.to_string(),
                self.hemoglobin.name.clone(),
            )),
            ..Default::default()
        };
        observation.set_value(ObservationValue::Quantity(Quantity {
            value: Some(value),
            unit: None,
        }));
        observation
    }

    /// 在新的检验就诊下为医嘱记录一个结果
    pub async fn seed_order_result(&self, order: &Order, value: f64) -> Obs {
        let mut encounter = Encounter::new(self.issued);
        encounter.patient = Some(self.patient.clone());
        encounter.encounter_type = self.store.get_encounter_type_by_name("LAB").await.unwrap();
        let encounter = self.store.save_encounter(encounter).await.unwrap();

        let mut obs = Obs::new(self.patient.id, self.hemoglobin.clone(), self.issued);
        obs.value = Some(ObsValue::Numeric(value));
        obs.encounter_id = encounter.id;
        obs.order_id = Some(order.id);
        self.store.save_obs(obs).await.unwrap()
    }

    pub async fn seed_lab_order(&self, value: f64) -> Obs {
        self.seed_order_result(&self.order, value).await
    }

    pub async fn encounter(&self, uuid: &str) -> Encounter {
        let uuid = Uuid::parse_str(uuid).unwrap();
        self.store.get_encounter_by_uuid(&uuid).await.unwrap().unwrap()
    }

    /// 就诊下未作废的血红蛋白结果值
    pub async fn active_hemoglobin_values(&self, uuid: &str) -> Vec<f64> {
        let encounter = self.encounter(uuid).await;
        let mut values: Vec<f64> = self
            .store
            .obs_for_encounter(encounter.id.unwrap())
            .await
            .into_iter()
            .filter(|o| !o.voided && o.concept.id == self.hemoglobin.id)
            .filter_map(|o| match o.value {
                Some(ObsValue::Numeric(v)) => Some(v),
                _ => None,
            })
            .collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        values
    }
}
