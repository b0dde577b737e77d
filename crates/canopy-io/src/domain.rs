//! Domain types for canopy-io.

use crate::IoError;

/// A validated experiment name for output file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentName(String);

impl ExperimentName {
    /// Parse and validate an experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidExperimentName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidExperimentName { name });
        }
        Ok(Self(name))
    }

    /// Return the experiment name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ExperimentName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Feature rows and class labels read from a labelled CSV file.
///
/// Produced by [`LabeledCsvReader`](crate::LabeledCsvReader). `labels[i]`
/// is the label of `features[i]`; labels stay real-valued so the forest
/// applies its own truncation and range checks.
#[derive(Debug, Clone)]
pub struct LabeledDataset {
    /// Feature column names in header order, label column excluded.
    pub feature_names: Vec<String>,
    /// Feature values: `features[sample_index][feature_index]`.
    pub features: Vec<Vec<f64>>,
    /// One label per row.
    pub labels: Vec<f64>,
}

impl LabeledDataset {
    /// Return the number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Return `true` when the dataset has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Return the number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn experiment_name_valid() {
        for name in ["run1", "my-exp_02", "A"] {
            assert_eq!(ExperimentName::new(name.to_string()).unwrap().as_str(), name);
        }
    }

    #[test]
    fn experiment_name_invalid() {
        for name in ["", "has space", "../escape", "dot.json"] {
            assert!(matches!(
                ExperimentName::new(name.to_string()),
                Err(IoError::InvalidExperimentName { .. })
            ));
        }
    }

    #[test]
    fn dataset_shape_accessors() {
        let ds = LabeledDataset {
            feature_names: vec!["a".into(), "b".into()],
            features: vec![vec![1.0, 2.0]],
            labels: vec![0.0],
        };
        assert_eq!(ds.len(), 1);
        assert!(!ds.is_empty());
        assert_eq!(ds.n_features(), 2);
    }
}
