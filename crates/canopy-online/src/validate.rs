//! Input checks shared by trees and forests.

use crate::error::ForestError;

/// Check one feature row against the expected width and for finiteness.
pub(crate) fn check_row(
    row: &[f64],
    expected: usize,
    sample_index: usize,
) -> Result<(), ForestError> {
    if row.len() != expected {
        return Err(ForestError::FeatureCountMismatch {
            expected,
            got: row.len(),
            sample_index,
        });
    }
    if let Some(feature_index) = row.iter().position(|v| !v.is_finite()) {
        return Err(ForestError::NonFiniteValue {
            sample_index,
            feature_index,
        });
    }
    Ok(())
}

/// Truncate a real-valued label to a class id in `[0, n_classes)`.
pub(crate) fn class_id(
    label: f64,
    n_classes: usize,
    sample_index: usize,
) -> Result<usize, ForestError> {
    // `!(x >= 0.0)` also catches NaN.
    if !(label >= 0.0) || !label.is_finite() || label.trunc() >= n_classes as f64 {
        return Err(ForestError::InvalidLabel {
            sample_index,
            label,
            n_classes,
        });
    }
    Ok(label.trunc() as usize)
}
