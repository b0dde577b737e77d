/// Errors from online forest operations.
#[derive(Debug, thiserror::Error)]
pub enum ForestError {
    /// Returned when n_trees is zero.
    #[error("n_trees must be at least 1, got {n_trees}")]
    InvalidTreeCount {
        /// The invalid n_trees value provided.
        n_trees: usize,
    },

    /// Returned when fewer than two classes are requested.
    #[error("n_classes must be at least 2, got {n_classes}")]
    InvalidClassCount {
        /// The invalid n_classes value provided.
        n_classes: usize,
    },

    /// Returned when the learning-rate step is not a positive finite number.
    #[error("step must be finite and positive, got {step}")]
    InvalidStep {
        /// The invalid step value provided.
        step: f64,
    },

    /// Returned when the thread-count hint is zero.
    #[error("n_threads must be at least 1, got {n_threads}")]
    InvalidThreadCount {
        /// The invalid thread count provided.
        n_threads: usize,
    },

    /// Returned when the dedicated rayon pool cannot be built.
    #[error("failed to build thread pool")]
    ThreadPool {
        /// The underlying rayon error.
        source: rayon::ThreadPoolBuildError,
    },

    /// Returned when a fit batch has zero samples.
    #[error("training batch has zero samples")]
    EmptyDataset,

    /// Returned when samples have zero feature columns.
    #[error("training batch has zero feature columns")]
    ZeroFeatures,

    /// Returned when a sample's width differs from the width fixed by the first fit.
    #[error("sample {sample_index} has {got} features, expected {expected}")]
    FeatureCountMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the sample.
        got: usize,
        /// The zero-based index of the offending sample.
        sample_index: usize,
    },

    /// Returned when features and labels have different row counts.
    #[error("got {n_samples} feature rows but {n_labels} labels")]
    LabelCountMismatch {
        /// Number of feature rows.
        n_samples: usize,
        /// Number of labels.
        n_labels: usize,
    },

    /// Returned when a label does not map onto `[0, n_classes)`.
    #[error("label {label} at sample {sample_index} is not a class id in [0, {n_classes})")]
    InvalidLabel {
        /// The zero-based index of the offending sample.
        sample_index: usize,
        /// The raw label value.
        label: f64,
        /// The number of classes the forest was built with.
        n_classes: usize,
    },

    /// Returned when a feature value is NaN or infinite.
    #[error("non-finite value at sample {sample_index}, feature {feature_index}")]
    NonFiniteValue {
        /// The zero-based index of the offending sample.
        sample_index: usize,
        /// The zero-based index of the offending feature column.
        feature_index: usize,
    },

    /// Returned when predicting before any call to `fit`.
    #[error("forest must be fitted before predicting")]
    NotFitted,

    /// Returned when a sample has a different number of features at prediction time.
    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the prediction input.
        got: usize,
    },

    /// Returned when the caller-provided prediction buffer has the wrong shape.
    #[error(
        "output buffer is {got_rows}x{got_cols}, expected {expected_rows}x{expected_cols}"
    )]
    OutputShapeMismatch {
        /// Number of feature rows to predict.
        expected_rows: usize,
        /// Number of rows in the output buffer.
        got_rows: usize,
        /// Number of classes.
        expected_cols: usize,
        /// Width of the first mis-sized output row (or `expected_cols` on a row-count mismatch).
        got_cols: usize,
    },
}
