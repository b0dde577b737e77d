//! Prediction methods for the online forest.

use rayon::iter::{
    IndexedParallelIterator, IntoParallelIterator, IntoParallelRefMutIterator, ParallelIterator,
};
use tracing::instrument;

use crate::config::Aggregation;
use crate::error::ForestError;
use crate::forest::OnlineForest;

/// Class probability distribution from a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDistribution {
    probs: Vec<f64>,
}

impl ClassDistribution {
    /// Create a new class distribution.
    pub(crate) fn new(probs: Vec<f64>) -> Self {
        Self { probs }
    }

    /// Return the predicted class (argmax of probabilities).
    #[must_use]
    pub fn predicted_class(&self) -> usize {
        self.probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx)
            .unwrap_or(0)
    }

    /// Return the top-k classes sorted by descending probability.
    #[must_use]
    pub fn top_k(&self, k: usize) -> Vec<(usize, f64)> {
        let mut indexed: Vec<(usize, f64)> = self.probs.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.total_cmp(&a.1));
        indexed.truncate(k);
        indexed
    }

    /// Return the probability distribution as a slice.
    #[must_use]
    pub fn as_slice(&self) -> &[f64] {
        &self.probs
    }

    /// Consume the distribution and return the probabilities.
    #[must_use]
    pub fn into_vec(self) -> Vec<f64> {
        self.probs
    }
}

impl OnlineForest {
    /// Predict the class label for a single sample.
    ///
    /// Returns the argmax of the averaged probability distribution.
    ///
    /// # Errors
    ///
    /// Same as [`predict_proba`](Self::predict_proba).
    pub fn predict(&self, sample: &[f64]) -> Result<usize, ForestError> {
        Ok(self.predict_proba(sample)?.predicted_class())
    }

    /// Return the class probability distribution for a single sample,
    /// using the configured aggregation mode.
    ///
    /// The result is the unweighted mean of every tree's own prediction.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                                |
    /// |---------------------------------------------|-------------------------------------|
    /// | [`ForestError::NotFitted`]                  | `fit` was never called              |
    /// | [`ForestError::PredictionFeatureMismatch`]  | `sample.len() != n_features`        |
    pub fn predict_proba(&self, sample: &[f64]) -> Result<ClassDistribution, ForestError> {
        self.check_sample(sample)?;
        let mut avg = vec![0.0f64; self.config.n_classes];
        self.average_into(sample, self.config.aggregation, &mut avg);
        Ok(ClassDistribution::new(avg))
    }

    /// Predict class labels for a batch of samples in parallel.
    ///
    /// Rows are spread over the pool selected by `n_threads`, as in `fit`.
    ///
    /// # Errors
    ///
    /// Same as [`predict_proba`](Self::predict_proba), for the first offending sample.
    pub fn predict_batch<R>(&self, features: &[R]) -> Result<Vec<usize>, ForestError>
    where
        R: AsRef<[f64]> + Sync,
    {
        let predict = |sample: &R| self.predict(sample.as_ref());
        if self.is_sequential() {
            return features.iter().map(predict).collect();
        }
        self.install(|| features.into_par_iter().map(predict).collect())
    }

    /// Return probability distributions for a batch of samples in parallel.
    ///
    /// Rows are spread over the pool selected by `n_threads`, as in `fit`.
    ///
    /// # Errors
    ///
    /// Same as [`predict_proba`](Self::predict_proba), for the first offending sample.
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn predict_proba_batch<R>(
        &self,
        features: &[R],
    ) -> Result<Vec<ClassDistribution>, ForestError>
    where
        R: AsRef<[f64]> + Sync,
    {
        let predict = |sample: &R| self.predict_proba(sample.as_ref());
        if self.is_sequential() {
            return features.iter().map(predict).collect();
        }
        self.install(|| features.into_par_iter().map(predict).collect())
    }

    /// Overwrite `out` with one class-probability row per feature row.
    ///
    /// `out` must have `features.len()` rows of `n_classes` columns. Once the
    /// shape is accepted, `out` is zero-filled; an untrained forest then
    /// returns [`ForestError::NotFitted`] and leaves the zeros in place.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                                    |
    /// |---------------------------------------------|-----------------------------------------|
    /// | [`ForestError::OutputShapeMismatch`]        | `out` does not match the expected shape |
    /// | [`ForestError::NotFitted`]                  | `fit` was never called                  |
    /// | [`ForestError::PredictionFeatureMismatch`]  | any row has the wrong width             |
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn predict_into<R>(
        &self,
        features: &[R],
        out: &mut [Vec<f64>],
        aggregation: Aggregation,
    ) -> Result<(), ForestError>
    where
        R: AsRef<[f64]> + Sync,
    {
        let n_classes = self.config.n_classes;
        let bad_row = out.iter().find(|row| row.len() != n_classes);
        if out.len() != features.len() || bad_row.is_some() {
            return Err(ForestError::OutputShapeMismatch {
                expected_rows: features.len(),
                got_rows: out.len(),
                expected_cols: n_classes,
                got_cols: bad_row.map_or(n_classes, Vec::len),
            });
        }
        out.iter_mut().for_each(|row| row.fill(0.0));

        for sample in features {
            self.check_sample(sample.as_ref())?;
        }

        let fill = |(row, sample): (&mut Vec<f64>, &R)| {
            self.average_into(sample.as_ref(), aggregation, row);
        };
        if self.is_sequential() {
            out.iter_mut().zip(features).for_each(fill);
        } else {
            self.install(|| out.par_iter_mut().zip(features.into_par_iter()).for_each(fill));
        }
        Ok(())
    }

    fn check_sample(&self, sample: &[f64]) -> Result<(), ForestError> {
        let expected = match self.n_features {
            Some(n) if self.iteration > 0 => n,
            _ => return Err(ForestError::NotFitted),
        };
        if sample.len() != expected {
            return Err(ForestError::PredictionFeatureMismatch {
                expected,
                got: sample.len(),
            });
        }
        Ok(())
    }

    /// Write the mean of the tree predictions for a validated sample into `out`.
    fn average_into(&self, sample: &[f64], aggregation: Aggregation, out: &mut [f64]) {
        out.fill(0.0);
        let mut scores = vec![0.0f64; self.config.n_classes];
        for tree in &self.trees {
            tree.predict_into(sample, aggregation, &mut scores);
            for (acc, s) in out.iter_mut().zip(&scores) {
                *acc += s;
            }
        }
        let n = self.trees.len() as f64;
        out.iter_mut().for_each(|v| *v /= n);
    }
}

#[cfg(test)]
mod tests {
    use super::ClassDistribution;
    use crate::config::{Aggregation, OnlineForestConfig};
    use crate::error::ForestError;
    use crate::forest::OnlineForest;

    fn fitted_forest(n_trees: usize) -> OnlineForest {
        let mut forest =
            OnlineForest::new(OnlineForestConfig::new(n_trees, 3).unwrap().with_seed(5)).unwrap();
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i % 3) as f64 * 4.0 + (i as f64) * 0.01, (i % 7) as f64])
            .collect();
        let labels: Vec<f64> = (0..30).map(|i| (i % 3) as f64).collect();
        forest.fit(&rows, &labels).unwrap();
        forest
    }

    // --- ClassDistribution ---

    #[test]
    fn argmax_and_top_k() {
        let d = ClassDistribution::new(vec![0.2, 0.5, 0.3]);
        assert_eq!(d.predicted_class(), 1);
        assert_eq!(d.top_k(2), vec![(1, 0.5), (2, 0.3)]);
        assert_eq!(d.as_slice(), &[0.2, 0.5, 0.3]);
    }

    // --- Forest prediction ---

    #[test]
    fn predict_before_fit_is_error() {
        let forest = OnlineForest::new(OnlineForestConfig::new(2, 2).unwrap()).unwrap();
        assert!(matches!(forest.predict_proba(&[1.0]), Err(ForestError::NotFitted)));
    }

    #[test]
    fn predict_into_fills_zero_then_errors_when_untrained() {
        let forest = OnlineForest::new(OnlineForestConfig::new(2, 2).unwrap()).unwrap();
        let mut out = vec![vec![9.0, 9.0]; 2];
        let err = forest
            .predict_into(&[vec![1.0], vec![2.0]], &mut out, Aggregation::Enabled)
            .unwrap_err();
        assert!(matches!(err, ForestError::NotFitted));
        assert_eq!(out, vec![vec![0.0, 0.0]; 2]);
    }

    #[test]
    fn predict_into_rejects_bad_shape() {
        let forest = fitted_forest(2);
        let mut out = vec![vec![0.0; 3]; 1];
        let err = forest
            .predict_into(&[vec![1.0, 1.0], vec![2.0, 2.0]], &mut out, Aggregation::Enabled)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::OutputShapeMismatch { expected_rows: 2, got_rows: 1, .. }
        ));
        let mut out = vec![vec![0.0; 2]; 2];
        let err = forest
            .predict_into(&[vec![1.0, 1.0], vec![2.0, 2.0]], &mut out, Aggregation::Enabled)
            .unwrap_err();
        assert!(matches!(
            err,
            ForestError::OutputShapeMismatch { expected_cols: 3, got_cols: 2, .. }
        ));
    }

    #[test]
    fn predict_into_matches_predict_proba() {
        let forest = fitted_forest(4);
        let samples = vec![vec![0.1, 2.0], vec![4.2, 5.0], vec![8.3, 1.0]];
        let mut out = vec![vec![0.0; 3]; 3];
        forest
            .predict_into(&samples, &mut out, Aggregation::Enabled)
            .unwrap();
        for (row, sample) in out.iter().zip(&samples) {
            let single = forest.predict_proba(sample).unwrap();
            assert_eq!(row.as_slice(), single.as_slice());
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn forest_prediction_is_mean_of_trees() {
        let forest = fitted_forest(5);
        let sample = [4.1, 3.0];
        let mut expected = vec![0.0; 3];
        for tree in forest.trees() {
            let p = tree.predict_proba(&sample, Aggregation::Enabled).unwrap();
            for (e, v) in expected.iter_mut().zip(&p) {
                *e += v / 5.0;
            }
        }
        let got = forest.predict_proba(&sample).unwrap();
        for (a, b) in got.as_slice().iter().zip(&expected) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn batch_matches_individual() {
        let forest = fitted_forest(3);
        let samples = vec![vec![0.0, 0.0], vec![4.0, 1.0], vec![8.0, 6.0]];
        let batch = forest.predict_proba_batch(&samples).unwrap();
        let labels = forest.predict_batch(&samples).unwrap();
        for (i, sample) in samples.iter().enumerate() {
            let single = forest.predict_proba(sample).unwrap();
            assert_eq!(batch[i], single);
            assert_eq!(labels[i], single.predicted_class());
        }
    }

    #[test]
    fn thread_setting_does_not_change_predictions() {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i % 3) as f64 * 4.0 + (i as f64) * 0.01, (i % 7) as f64])
            .collect();
        let labels: Vec<f64> = (0..30).map(|i| (i % 3) as f64).collect();
        let queries = vec![vec![0.1, 2.0], vec![4.2, 5.0], vec![8.3, 1.0], vec![2.0, 6.0]];

        let run = |n_threads: Option<usize>| {
            let config = OnlineForestConfig::new(4, 3)
                .unwrap()
                .with_seed(5)
                .with_n_threads(n_threads);
            let mut forest = OnlineForest::new(config).unwrap();
            forest.fit(&rows, &labels).unwrap();
            let mut out = vec![vec![0.0; 3]; queries.len()];
            forest
                .predict_into(&queries, &mut out, Aggregation::Enabled)
                .unwrap();
            (
                forest.predict_proba_batch(&queries).unwrap(),
                forest.predict_batch(&queries).unwrap(),
                out,
            )
        };

        let pooled = run(None);
        assert_eq!(run(Some(1)), pooled);
        assert_eq!(run(Some(2)), pooled);
    }

    #[test]
    fn prediction_width_mismatch() {
        let forest = fitted_forest(2);
        assert!(matches!(
            forest.predict(&[1.0]),
            Err(ForestError::PredictionFeatureMismatch { expected: 2, got: 1 })
        ));
    }
}
