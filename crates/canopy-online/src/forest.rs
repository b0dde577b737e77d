//! Online forest: streamed fitting fanned out across trees.

use std::sync::Arc;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rayon::iter::{IntoParallelRefMutIterator, ParallelIterator};
use tracing::{Level, debug, info, instrument};

use crate::config::OnlineForestConfig;
use crate::error::ForestError;
use crate::tree::{OnlineTree, TreeParams};
use crate::validate::{check_row, class_id};

/// An ensemble of online trees sharing one configuration.
///
/// Trees never share mutable state: each owns its node arena and random
/// stream. A batch is applied to every tree in arrival order, with trees
/// processed in parallel.
#[derive(Debug, Clone)]
pub struct OnlineForest {
    pub(crate) config: OnlineForestConfig,
    pub(crate) trees: Vec<OnlineTree>,
    pub(crate) n_features: Option<usize>,
    pub(crate) iteration: u64,
    pool: Option<Arc<rayon::ThreadPool>>,
}

/// Build untrained trees with one seed per tree drawn from the master seed.
fn create_trees(config: &OnlineForestConfig) -> Vec<OnlineTree> {
    let params = TreeParams {
        n_classes: config.n_classes,
        step: config.step,
        criterion: config.criterion,
    };
    let mut master_rng = ChaCha8Rng::seed_from_u64(config.seed);
    (0..config.n_trees)
        .map(|_| OnlineTree::with_params(params, master_rng.r#gen()))
        .collect()
}

impl OnlineForest {
    /// Build an untrained forest.
    ///
    /// # Errors
    ///
    /// | Variant                               | When                                  |
    /// |---------------------------------------|---------------------------------------|
    /// | [`ForestError::InvalidStep`]          | `step` is not finite and positive     |
    /// | [`ForestError::InvalidThreadCount`]   | `n_threads` is `Some(0)`              |
    /// | [`ForestError::ThreadPool`]           | the dedicated pool cannot be built    |
    #[instrument(skip_all, fields(n_trees = config.n_trees, n_classes = config.n_classes))]
    pub fn new(config: OnlineForestConfig) -> Result<Self, ForestError> {
        config.validate()?;

        let pool = match config.n_threads {
            Some(n) if n > 1 => Some(Arc::new(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(n)
                    .build()
                    .map_err(|source| ForestError::ThreadPool { source })?,
            )),
            _ => None,
        };

        let trees = create_trees(&config);

        info!(
            n_trees = config.n_trees,
            n_classes = config.n_classes,
            step = config.step,
            seed = config.seed,
            n_threads = ?config.n_threads,
            "online forest created"
        );

        Ok(Self {
            config,
            trees,
            n_features: None,
            iteration: 0,
            pool,
        })
    }

    /// Fit a batch of samples, in order.
    ///
    /// `features[sample_idx][feature_idx]`, row-major.
    /// `labels[sample_idx]`: class ids encoded as reals, truncated toward zero.
    ///
    /// The whole batch is validated before any tree changes, so a rejected
    /// batch leaves the forest untouched.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                                               |
    /// |----------------------------------------|----------------------------------------------------|
    /// | [`ForestError::EmptyDataset`]          | `features` is empty                                |
    /// | [`ForestError::LabelCountMismatch`]    | `labels.len() != features.len()`                   |
    /// | [`ForestError::ZeroFeatures`]          | rows have zero feature columns                     |
    /// | [`ForestError::FeatureCountMismatch`]  | a row's width differs from the first fitted width  |
    /// | [`ForestError::NonFiniteValue`]        | any value is NaN or infinite                       |
    /// | [`ForestError::InvalidLabel`]          | a label does not truncate into `[0, n_classes)`    |
    #[instrument(skip_all, fields(n_samples = features.len()))]
    pub fn fit<R>(&mut self, features: &[R], labels: &[f64]) -> Result<(), ForestError>
    where
        R: AsRef<[f64]> + Sync,
    {
        // --- Validate inputs ---
        let Some(first) = features.first() else {
            return Err(ForestError::EmptyDataset);
        };
        if labels.len() != features.len() {
            return Err(ForestError::LabelCountMismatch {
                n_samples: features.len(),
                n_labels: labels.len(),
            });
        }
        let n_features = self.n_features.unwrap_or(first.as_ref().len());
        if n_features == 0 {
            return Err(ForestError::ZeroFeatures);
        }
        for (sample_index, row) in features.iter().enumerate() {
            check_row(row.as_ref(), n_features, sample_index)?;
        }
        let n_classes = self.config.n_classes;
        let class_ids: Vec<usize> = labels
            .iter()
            .enumerate()
            .map(|(sample_index, &label)| class_id(label, n_classes, sample_index))
            .collect::<Result<_, _>>()?;

        self.n_features = Some(n_features);

        // --- Fit: rows in order within each tree, trees in parallel ---
        let fit_tree = |tree: &mut OnlineTree| {
            for (row, &label) in features.iter().zip(&class_ids) {
                tree.fit_unchecked(row.as_ref(), label);
            }
        };
        match (self.config.n_threads, &self.pool) {
            (Some(1), _) => self.trees.iter_mut().for_each(fit_tree),
            (_, Some(pool)) => pool.install(|| self.trees.par_iter_mut().for_each(fit_tree)),
            _ => self.trees.par_iter_mut().for_each(fit_tree),
        }

        self.iteration += features.len() as u64;

        if tracing::enabled!(Level::DEBUG) {
            for (tree_index, tree) in self.trees.iter().enumerate() {
                debug!(
                    tree_index,
                    n_nodes = tree.n_nodes(),
                    n_leaves = tree.n_leaves(),
                    depth = tree.depth(),
                    "tree grown"
                );
            }
        }
        info!(
            iteration = self.iteration,
            n_nodes = self.n_nodes(),
            "batch fitted"
        );

        Ok(())
    }

    /// Fit a single sample. Equivalent to [`fit`](Self::fit) on a one-row batch.
    ///
    /// # Errors
    ///
    /// Same as [`fit`](Self::fit).
    pub fn fit_one(&mut self, sample: &[f64], label: f64) -> Result<(), ForestError> {
        self.fit(&[sample], &[label])
    }

    /// Discard every tree and return to the untrained state.
    ///
    /// Trees are rebuilt from the same per-tree seeds, so refitting the same
    /// stream reproduces the same model.
    #[instrument(skip_all)]
    pub fn clear(&mut self) {
        self.trees = create_trees(&self.config);
        self.n_features = None;
        self.iteration = 0;
        debug!("forest cleared");
    }

    /// Return `true` when `n_threads` is `Some(1)`: work stays on the caller.
    pub(crate) fn is_sequential(&self) -> bool {
        self.config.n_threads == Some(1)
    }

    /// Run `op` inside the dedicated pool if one was built, else on the
    /// current (global) pool.
    pub(crate) fn install<OP, T>(&self, op: OP) -> T
    where
        OP: FnOnce() -> T + Send,
        T: Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }

    // --- Getters ---

    /// Return the configuration the forest was built with.
    #[must_use]
    pub fn config(&self) -> &OnlineForestConfig {
        &self.config
    }

    /// Return the trees of the ensemble.
    #[must_use]
    pub fn trees(&self) -> &[OnlineTree] {
        &self.trees
    }

    /// Return the number of trees in the ensemble.
    #[must_use]
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.config.n_classes
    }

    /// Return the feature width fixed by the first `fit`, if any.
    #[must_use]
    pub fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    /// Return the number of samples fitted since construction or the last `clear`.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Return the total node count across all trees.
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.trees.iter().map(OnlineTree::n_nodes).sum()
    }
}
