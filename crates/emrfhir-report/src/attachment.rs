//! 报告附件存储
//!
//! 附件以复杂观察的形式保存。部分宿主存储只在重新读取时才填充复杂数据的派生字段，
//! 因此保存分两步：先写入，再按原始视图读回。

use emrfhir_core::fhir::Attachment;
use emrfhir_core::{
    ClinicalStore, ComplexData, Encounter, Obs, ObsValue, Patient, ReportError, Result, RAW_VIEW,
};
use tracing::debug;

/// 附件存储，借用上下文中的临床存储
pub struct AttachmentStore<'a> {
    store: &'a dyn ClinicalStore,
}

impl<'a> AttachmentStore<'a> {
    pub fn new(store: &'a dyn ClinicalStore) -> Self {
        Self { store }
    }

    /// 保存附件为复杂观察，返回读回后的观察
    pub async fn save(
        &self,
        encounter: &Encounter,
        complex_concept_id: i32,
        patient: &Patient,
        attachment: &Attachment,
    ) -> Result<Obs> {
        let concept = self
            .store
            .get_concept(complex_concept_id)
            .await?
            .ok_or_else(|| {
                ReportError::Configuration(format!(
                    "presented form concept {} does not exist",
                    complex_concept_id
                ))
            })?;
        if !concept.is_complex() {
            return Err(ReportError::Configuration(format!(
                "presented form concept {} is not a complex concept",
                complex_concept_id
            )));
        }

        let obs_datetime = attachment.creation.unwrap_or(encounter.encounter_datetime);
        let mut obs = Obs::new(patient.id, concept, obs_datetime);
        obs.encounter_id = encounter.id;
        obs.value = Some(ObsValue::Complex(ComplexData {
            title: attachment.title.clone().unwrap_or_default(),
            data: Some(attachment.data.clone().unwrap_or_default()),
            mime_type: attachment.content_type.clone(),
            length: attachment.size,
        }));

        let stored = self.store.save_obs(obs).await?;
        let obs_id = stored.id.ok_or_else(|| {
            ReportError::Internal("stored attachment obs has no id".to_string())
        })?;

        let reloaded = self.reload(obs_id).await?;
        debug!("Stored attachment obs {} for encounter {}", reloaded.uuid, encounter.uuid);
        Ok(reloaded)
    }

    /// 读取附件内容
    pub async fn load(&self, obs: &Obs) -> Result<Attachment> {
        let obs_id = obs
            .id
            .ok_or_else(|| ReportError::InvalidInput("attachment obs has no id".to_string()))?;
        let complex = self.reload(obs_id).await?;
        let data = complex.complex_data().ok_or_else(|| {
            ReportError::InvalidInput(format!("obs {} carries no complex data", complex.uuid))
        })?;

        Ok(Attachment {
            content_type: data.mime_type.clone(),
            data: data.data.clone(),
            size: data.length,
            title: Some(data.title.clone()),
            creation: Some(complex.obs_datetime),
        })
    }

    /// 作废附件，已作废时不做任何事
    pub async fn void(&self, obs: &Obs, reason: &str) -> Result<()> {
        if obs.voided {
            return Ok(());
        }
        let obs_id = obs
            .id
            .ok_or_else(|| ReportError::InvalidInput("attachment obs has no id".to_string()))?;

        let complex = self.reload(obs_id).await?;
        if !complex.voided {
            self.store.void_obs(&complex, reason).await?;
        }
        Ok(())
    }

    async fn reload(&self, obs_id: i32) -> Result<Obs> {
        self.store
            .get_complex_obs(obs_id, RAW_VIEW)
            .await?
            .ok_or_else(|| ReportError::NotFound(format!("complex obs {}", obs_id)))
    }
}
