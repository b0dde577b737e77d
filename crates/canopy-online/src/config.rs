//! Configuration builder for online forests.

use crate::error::ForestError;

/// Per-sample loss that drives the node weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SplitCriterion {
    /// Logarithmic loss: `-ln(p)` of the probability given to the true class.
    #[default]
    LogLoss,
}

impl SplitCriterion {
    /// Loss charged for assigning probability `score` to the observed class.
    #[must_use]
    pub fn loss(self, score: f64) -> f64 {
        match self {
            SplitCriterion::LogLoss => -score.ln(),
        }
    }
}

/// Whether tree predictions blend every node on the path or use the leaf alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum Aggregation {
    /// Mix node predictions along the root-to-leaf path by posterior weight.
    #[default]
    Enabled,
    /// Use only the reached leaf's class scores.
    Disabled,
}

/// Configuration for an [`OnlineForest`](crate::OnlineForest).
///
/// Construct via [`OnlineForestConfig::new`], then chain `with_*` methods.
///
/// # Defaults
///
/// | Parameter     | Default                   |
/// |---------------|---------------------------|
/// | `step`        | 1.0                       |
/// | `criterion`   | `LogLoss`                 |
/// | `seed`        | 42                        |
/// | `n_threads`   | `None` (rayon global pool)|
/// | `aggregation` | `Enabled`                 |
#[derive(Debug, Clone, PartialEq)]
pub struct OnlineForestConfig {
    pub(crate) n_trees: usize,
    pub(crate) n_classes: usize,
    pub(crate) step: f64,
    pub(crate) criterion: SplitCriterion,
    pub(crate) seed: u64,
    pub(crate) n_threads: Option<usize>,
    pub(crate) aggregation: Aggregation,
}

impl OnlineForestConfig {
    /// Create a new config with the given ensemble size and class count.
    ///
    /// # Errors
    ///
    /// | Variant                              | When               |
    /// |--------------------------------------|--------------------|
    /// | [`ForestError::InvalidTreeCount`]    | `n_trees` is zero  |
    /// | [`ForestError::InvalidClassCount`]   | `n_classes` < 2    |
    pub fn new(n_trees: usize, n_classes: usize) -> Result<Self, ForestError> {
        if n_trees == 0 {
            return Err(ForestError::InvalidTreeCount { n_trees });
        }
        if n_classes < 2 {
            return Err(ForestError::InvalidClassCount { n_classes });
        }
        Ok(Self {
            n_trees,
            n_classes,
            step: 1.0,
            criterion: SplitCriterion::LogLoss,
            seed: 42,
            n_threads: None,
            aggregation: Aggregation::Enabled,
        })
    }

    // --- Setters ---

    /// Set the learning-rate step applied to every node loss.
    ///
    /// Validated when the forest is built.
    #[must_use]
    pub fn with_step(mut self, step: f64) -> Self {
        self.step = step;
        self
    }

    /// Set the loss criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Set the thread-count hint.
    ///
    /// `None` uses the rayon global pool, `Some(1)` fits trees on the calling
    /// thread, `Some(n)` builds a dedicated pool of `n` workers.
    #[must_use]
    pub fn with_n_threads(mut self, n_threads: Option<usize>) -> Self {
        self.n_threads = n_threads;
        self
    }

    /// Set the default aggregation mode for predictions.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.n_trees
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    /// Return the learning-rate step.
    #[must_use]
    pub fn step(&self) -> f64 {
        self.step
    }

    /// Return the loss criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return the thread-count hint.
    #[must_use]
    pub fn n_threads(&self) -> Option<usize> {
        self.n_threads
    }

    /// Return the default aggregation mode.
    #[must_use]
    pub fn aggregation(&self) -> Aggregation {
        self.aggregation
    }

    /// Check the parameters the setters accept unchecked.
    pub(crate) fn validate(&self) -> Result<(), ForestError> {
        validate_step(self.step)?;
        if self.n_threads == Some(0) {
            return Err(ForestError::InvalidThreadCount { n_threads: 0 });
        }
        Ok(())
    }
}

pub(crate) fn validate_step(step: f64) -> Result<(), ForestError> {
    if !step.is_finite() || step <= 0.0 {
        return Err(ForestError::InvalidStep { step });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = OnlineForestConfig::new(10, 3).unwrap();
        assert_eq!(config.n_trees(), 10);
        assert_eq!(config.n_classes(), 3);
        assert_eq!(config.step(), 1.0);
        assert_eq!(config.criterion(), SplitCriterion::LogLoss);
        assert_eq!(config.seed(), 42);
        assert_eq!(config.n_threads(), None);
        assert_eq!(config.aggregation(), Aggregation::Enabled);
    }

    #[test]
    fn setters_chain() {
        let config = OnlineForestConfig::new(2, 2)
            .unwrap()
            .with_step(0.25)
            .with_seed(7)
            .with_n_threads(Some(2))
            .with_aggregation(Aggregation::Disabled);
        assert_eq!(config.step(), 0.25);
        assert_eq!(config.seed(), 7);
        assert_eq!(config.n_threads(), Some(2));
        assert_eq!(config.aggregation(), Aggregation::Disabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_trees_rejected() {
        let err = OnlineForestConfig::new(0, 2).unwrap_err();
        assert!(matches!(err, ForestError::InvalidTreeCount { n_trees: 0 }));
    }

    #[test]
    fn single_class_rejected() {
        let err = OnlineForestConfig::new(5, 1).unwrap_err();
        assert!(matches!(err, ForestError::InvalidClassCount { n_classes: 1 }));
    }

    #[test]
    fn bad_step_rejected() {
        for step in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = OnlineForestConfig::new(1, 2).unwrap().with_step(step);
            assert!(matches!(config.validate(), Err(ForestError::InvalidStep { .. })));
        }
    }

    #[test]
    fn zero_threads_rejected() {
        let config = OnlineForestConfig::new(1, 2).unwrap().with_n_threads(Some(0));
        assert!(matches!(
            config.validate(),
            Err(ForestError::InvalidThreadCount { n_threads: 0 })
        ));
    }

    #[test]
    fn log_loss_of_certain_prediction_is_zero() {
        assert_eq!(SplitCriterion::LogLoss.loss(1.0), 0.0);
        assert!((SplitCriterion::LogLoss.loss(0.5) - 2f64.ln()).abs() < 1e-12);
    }
}
