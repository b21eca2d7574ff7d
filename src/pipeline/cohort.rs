use std::collections::HashSet;

use super::types::CohortMember;
use crate::data::{ensure_same_dims, Dims, Volume};
use crate::error::{RegistrationError, Result};

/// Output entry holding the intersection of the registered volumes.
pub const CONSENSUS_NAME: &str = "consensus";
/// Output entry holding the serialized run report.
pub const REPORT_NAME: &str = "run_report.json";

/// Labels that would collide with the run's own output entries.
pub const RESERVED_LABELS: &[&str] = &[CONSENSUS_NAME, REPORT_NAME];

/// Labels name output entries, so they must be unique, non-empty, free of path
/// separators and not reserved.
fn check_labels(members: &[CohortMember]) -> Result<()> {
    let mut seen = HashSet::with_capacity(members.len());
    for (index, member) in members.iter().enumerate() {
        let label = member.label.as_str();
        if label.is_empty() || label.contains(['/', '\\']) || label == "." || label == ".." {
            return Err(RegistrationError::invalid_configuration(format!(
                "volume {} has unusable label {:?}",
                index, label
            )));
        }
        if RESERVED_LABELS.contains(&label) {
            return Err(RegistrationError::invalid_configuration(format!(
                "volume {} uses reserved label {:?}",
                index, label
            )));
        }
        if !seen.insert(label) {
            return Err(RegistrationError::invalid_configuration(format!(
                "volume {} repeats label {:?}",
                index, label
            )));
        }
    }
    Ok(())
}

/// Volumes registered together, keyed by index.
///
/// Construction checks everything a run needs up front: at least two members,
/// distinct labels and one shared geometry.
#[derive(Debug, Clone)]
pub struct Cohort {
    members: Vec<CohortMember>,
    dims: Dims,
}

impl Cohort {
    pub fn new(members: Vec<CohortMember>) -> Result<Self> {
        if members.len() < 2 {
            return Err(RegistrationError::invalid_configuration(format!(
                "groupwise registration needs at least 2 volumes, got {}",
                members.len()
            )));
        }
        check_labels(&members)?;
        let dims = ensure_same_dims(members.iter().map(|m| &m.volume))?.ok_or_else(|| {
            RegistrationError::invalid_configuration("groupwise registration needs volumes")
        })?;
        Ok(Self { members, dims })
    }

    /// Cohort with generated labels `volume_0`, `volume_1`, ...
    pub fn from_volumes(volumes: Vec<Volume>) -> Result<Self> {
        let labels = (0..volumes.len()).map(|i| format!("volume_{}", i)).collect();
        Self::from_parts(labels, volumes)
    }

    /// Pair labels with volumes; both lists must have the same length.
    pub fn from_parts(labels: Vec<String>, volumes: Vec<Volume>) -> Result<Self> {
        if labels.len() != volumes.len() {
            return Err(RegistrationError::CountMismatch {
                expected: labels.len(),
                actual: volumes.len(),
            });
        }
        Self::new(
            labels
                .into_iter()
                .zip(volumes)
                .map(|(label, volume)| CohortMember { label, volume })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    pub fn labels(&self) -> Vec<String> {
        self.members.iter().map(|m| m.label.clone()).collect()
    }

    pub fn members(&self) -> &[CohortMember] {
        &self.members
    }

    pub fn into_parts(self) -> (Vec<String>, Vec<Volume>) {
        self.members.into_iter().map(|m| (m.label, m.volume)).unzip()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::BitDepth;

    fn volume(x: usize) -> Volume {
        Volume::zeros(Dims::new(x, 4, 4), BitDepth::Eight).unwrap()
    }

    #[test]
    fn test_needs_two_volumes() {
        let err = Cohort::from_volumes(vec![volume(4)]).unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_rejects_ragged_parts() {
        let err =
            Cohort::from_parts(vec!["a".into()], vec![volume(4), volume(4)]).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::CountMismatch {
                expected: 1,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_rejects_dimension_mismatch() {
        let err = Cohort::from_volumes(vec![volume(4), volume(4), volume(5)]).unwrap_err();
        assert!(matches!(
            err,
            RegistrationError::DimensionMismatch { index: 2, .. }
        ));
    }

    #[test]
    fn test_labels_and_parts() {
        let cohort = Cohort::from_volumes(vec![volume(4), volume(4)]).unwrap();
        assert_eq!(cohort.labels(), vec!["volume_0", "volume_1"]);
        assert_eq!(cohort.dims(), Dims::new(4, 4, 4));
        let (labels, volumes) = cohort.into_parts();
        assert_eq!(labels.len(), volumes.len());
    }

    #[test]
    fn test_rejects_duplicate_labels() {
        let err = Cohort::from_parts(
            vec!["brain".into(), "heart".into(), "brain".into()],
            vec![volume(4), volume(4), volume(4)],
        )
        .unwrap_err();
        match err {
            RegistrationError::InvalidConfiguration(msg) => {
                assert!(msg.contains("volume 2"));
                assert!(msg.contains("brain"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejects_reserved_labels() {
        for reserved in RESERVED_LABELS {
            let err = Cohort::from_parts(
                vec!["a".into(), reserved.to_string()],
                vec![volume(4), volume(4)],
            )
            .unwrap_err();
            assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_rejects_labels_that_are_not_plain_names() {
        for bad in ["", "..", "nested/dir"] {
            let err = Cohort::from_parts(vec!["a".into(), bad.into()], vec![volume(4), volume(4)])
                .unwrap_err();
            assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
        }
    }

    #[test]
    fn test_label_check_runs_before_dimension_check() {
        let err = Cohort::from_parts(
            vec!["consensus".into(), "b".into()],
            vec![volume(4), volume(5)],
        )
        .unwrap_err();
        assert!(matches!(err, RegistrationError::InvalidConfiguration(_)));
    }
}
