//! 观察分类器
//!
//! 按概念把就诊下的观察分到报告的各个部分。未命中任何已知概念的观察
//! 不会作为错误返回，而是记录日志后放入 [`Classification::dropped`]。

use crate::config::ReportConcepts;
use emrfhir_core::{Concept, Obs};
use std::collections::HashMap;
use tracing::error;

/// 报告中的观察类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObsCategory {
    Name,
    Status,
    Result,
    PresentedForm,
    ImagingStudy,
}

impl ObsCategory {
    /// 始终出现在分类结果中的类别
    pub const BASE: [ObsCategory; 4] = [
        ObsCategory::Name,
        ObsCategory::Status,
        ObsCategory::Result,
        ObsCategory::PresentedForm,
    ];
}

/// 分类结果
#[derive(Debug, Clone, Default)]
pub struct Classification {
    buckets: HashMap<ObsCategory, Vec<Obs>>,
    dropped: Vec<Obs>,
}

impl Classification {
    fn with_categories(include_imaging_study: bool) -> Self {
        let mut buckets: HashMap<ObsCategory, Vec<Obs>> = ObsCategory::BASE
            .iter()
            .map(|category| (*category, Vec::new()))
            .collect();
        if include_imaging_study {
            buckets.insert(ObsCategory::ImagingStudy, Vec::new());
        }

        Self {
            buckets,
            dropped: Vec::new(),
        }
    }

    fn insert(&mut self, category: ObsCategory, obs: Obs) {
        let bucket = self.buckets.entry(category).or_default();
        if !bucket.iter().any(|existing| existing.uuid == obs.uuid) {
            bucket.push(obs);
        }
    }

    /// 类别下的观察，类别不存在时为空
    pub fn get(&self, category: ObsCategory) -> &[Obs] {
        self.buckets
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn contains(&self, category: ObsCategory) -> bool {
        self.buckets.contains_key(&category)
    }

    /// 未命中任何类别的观察
    pub fn dropped(&self) -> &[Obs] {
        &self.dropped
    }
}

/// 按已知概念分类观察
#[derive(Debug, Clone)]
pub struct ObsClassifier {
    concepts: ReportConcepts,
}

impl ObsClassifier {
    pub fn new(concepts: ReportConcepts) -> Self {
        Self { concepts }
    }

    /// 概念对应的类别
    pub fn category_of(&self, concept: &Concept, include_imaging_study: bool) -> Option<ObsCategory> {
        let id = concept.id;
        if id == self.concepts.name {
            Some(ObsCategory::Name)
        } else if id == self.concepts.status {
            Some(ObsCategory::Status)
        } else if id == self.concepts.result {
            Some(ObsCategory::Result)
        } else if id == self.concepts.presented_form {
            Some(ObsCategory::PresentedForm)
        } else if include_imaging_study && self.concepts.imaging_study == Some(id) {
            Some(ObsCategory::ImagingStudy)
        } else {
            None
        }
    }

    /// 分类观察，未命中的观察记录错误日志后丢弃
    pub fn classify<'a, I>(&self, observations: I, include_imaging_study: bool) -> Classification
    where
        I: IntoIterator<Item = &'a Obs>,
    {
        let mut classification = Classification::with_categories(include_imaging_study);

        for obs in observations {
            match self.category_of(&obs.concept, include_imaging_study) {
                Some(category) => classification.insert(category, obs.clone()),
                None => {
                    error!(
                        "Obs {} with concept {} ({}) does not belong to any report section",
                        obs.uuid, obs.concept.id, obs.concept.name
                    );
                    classification.dropped.push(obs.clone());
                }
            }
        }

        classification
    }

    /// 分类观察，未命中的观察归入 `fallback`
    ///
    /// 用于医嘱路径：医嘱下的普通检验观察本身就是报告结果。
    pub fn classify_with_fallback<'a, I>(
        &self,
        observations: I,
        include_imaging_study: bool,
        fallback: ObsCategory,
    ) -> Classification
    where
        I: IntoIterator<Item = &'a Obs>,
    {
        let mut classification = Classification::with_categories(include_imaging_study);

        for obs in observations {
            let category = self
                .category_of(&obs.concept, include_imaging_study)
                .unwrap_or(fallback);
            classification.insert(category, obs.clone());
        }

        classification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use emrfhir_core::ConceptDatatype;
    use uuid::Uuid;

    fn concepts() -> ReportConcepts {
        ReportConcepts {
            name: 1,
            status: 2,
            result: 3,
            presented_form: 4,
            imaging_study: Some(5),
        }
    }

    fn obs(concept_id: i32) -> Obs {
        let concept = Concept {
            id: concept_id,
            uuid: Uuid::new_v4(),
            name: format!("concept-{}", concept_id),
            datatype: ConceptDatatype::NotApplicable,
            units: None,
        };
        Obs::new(1, concept, Utc::now())
    }

    #[test]
    fn test_all_base_buckets_present() {
        let classifier = ObsClassifier::new(concepts());
        let classification = classifier.classify(std::iter::empty(), false);

        for category in ObsCategory::BASE {
            assert!(classification.contains(category));
            assert!(classification.get(category).is_empty());
        }
        assert!(!classification.contains(ObsCategory::ImagingStudy));
    }

    #[test]
    fn test_known_concepts_land_in_their_bucket() {
        let classifier = ObsClassifier::new(concepts());
        let observations = vec![obs(1), obs(2), obs(3), obs(3), obs(4)];
        let classification = classifier.classify(&observations, false);

        assert_eq!(classification.get(ObsCategory::Name).len(), 1);
        assert_eq!(classification.get(ObsCategory::Status).len(), 1);
        assert_eq!(classification.get(ObsCategory::Result).len(), 2);
        assert_eq!(classification.get(ObsCategory::PresentedForm).len(), 1);
        assert!(classification.dropped().is_empty());
    }

    #[test]
    fn test_unknown_concept_is_dropped() {
        let classifier = ObsClassifier::new(concepts());
        let observations = vec![obs(3), obs(99)];
        let classification = classifier.classify(&observations, false);

        assert_eq!(classification.get(ObsCategory::Result).len(), 1);
        assert_eq!(classification.dropped().len(), 1);
        assert_eq!(classification.dropped()[0].concept.id, 99);
    }

    #[test]
    fn test_imaging_study_only_when_requested() {
        let classifier = ObsClassifier::new(concepts());
        let observations = vec![obs(5)];

        let without = classifier.classify(&observations, false);
        assert_eq!(without.dropped().len(), 1);

        let with = classifier.classify(&observations, true);
        assert_eq!(with.get(ObsCategory::ImagingStudy).len(), 1);
        assert!(with.dropped().is_empty());
    }

    #[test]
    fn test_fallback_collects_misses() {
        let classifier = ObsClassifier::new(concepts());
        let observations = vec![obs(4), obs(42), obs(43)];
        let classification =
            classifier.classify_with_fallback(&observations, false, ObsCategory::Result);

        assert_eq!(classification.get(ObsCategory::Result).len(), 2);
        assert_eq!(classification.get(ObsCategory::PresentedForm).len(), 1);
        assert!(classification.dropped().is_empty());
    }
}
