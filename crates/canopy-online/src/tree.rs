//! A single online tree with Bayesian aggregation over its prunings.

use tracing::{debug, trace};

use crate::{
    ForestError,
    config::{Aggregation, SplitCriterion, validate_step},
    node::{FeatureIndex, Node, NodeIndex, Split, StoredSample},
    sampler::Sampler,
    validate::check_row,
};

/// Forest-level settings every tree reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TreeParams {
    pub(crate) n_classes: usize,
    pub(crate) step: f64,
    pub(crate) criterion: SplitCriterion,
}

/// An online decision tree grown one sample at a time.
///
/// Nodes live in an append-only `Vec<Node>` arena rooted at index 0. Each
/// fitted sample (after the first) walks to a leaf, updating every node on
/// the way, splits that leaf between the new sample and the one it stored,
/// then walks back up refreshing the mixture weights.
#[derive(Debug, Clone)]
pub struct OnlineTree {
    nodes: Vec<Node>,
    params: TreeParams,
    n_features: Option<usize>,
    iteration: u64,
    sampler: Sampler,
}

impl OnlineTree {
    /// Create an untrained tree with a single root leaf.
    ///
    /// # Errors
    ///
    /// | Variant                              | When                           |
    /// |--------------------------------------|--------------------------------|
    /// | [`ForestError::InvalidClassCount`]   | `n_classes` < 2                |
    /// | [`ForestError::InvalidStep`]         | `step` is not finite and > 0   |
    pub fn new(n_classes: usize, step: f64, seed: u64) -> Result<Self, ForestError> {
        if n_classes < 2 {
            return Err(ForestError::InvalidClassCount { n_classes });
        }
        validate_step(step)?;
        let params = TreeParams {
            n_classes,
            step,
            criterion: SplitCriterion::LogLoss,
        };
        Ok(Self::with_params(params, seed))
    }

    pub(crate) fn with_params(params: TreeParams, seed: u64) -> Self {
        Self {
            nodes: vec![Node::new(NodeIndex::ROOT, params.n_classes)],
            params,
            n_features: None,
            iteration: 0,
            sampler: Sampler::new(seed),
        }
    }

    /// Fit one sample.
    ///
    /// The first sample only seeds the root. Later samples update the path
    /// statistics, split the reached leaf and refresh the mixture weights.
    ///
    /// # Errors
    ///
    /// | Variant                                 | When                                          |
    /// |-----------------------------------------|-----------------------------------------------|
    /// | [`ForestError::ZeroFeatures`]           | `sample` is empty                             |
    /// | [`ForestError::FeatureCountMismatch`]   | width differs from the first fitted sample    |
    /// | [`ForestError::NonFiniteValue`]         | any value is NaN or infinite                  |
    /// | [`ForestError::InvalidLabel`]           | `label >= n_classes`                          |
    pub fn fit(&mut self, sample: &[f64], label: usize) -> Result<(), ForestError> {
        if sample.is_empty() {
            return Err(ForestError::ZeroFeatures);
        }
        check_row(sample, self.n_features.unwrap_or(sample.len()), 0)?;
        if label >= self.params.n_classes {
            return Err(ForestError::InvalidLabel {
                sample_index: 0,
                label: label as f64,
                n_classes: self.params.n_classes,
            });
        }
        self.fit_unchecked(sample, label);
        Ok(())
    }

    /// Fit one pre-validated sample.
    pub(crate) fn fit_unchecked(&mut self, sample: &[f64], label: usize) {
        if self.iteration == 0 {
            self.n_features = Some(sample.len());
            self.nodes[0].set_sample(StoredSample::new(sample, label));
            self.iteration += 1;
            return;
        }
        let leaf = self.go_downwards(sample, label);
        let start = self.split_leaf(leaf, sample, label);
        self.go_upwards(start);
        self.iteration += 1;
    }

    /// Return the class-probability vector for `sample`.
    ///
    /// # Errors
    ///
    /// | Variant                                     | When                           |
    /// |---------------------------------------------|--------------------------------|
    /// | [`ForestError::NotFitted`]                  | no sample was fitted yet       |
    /// | [`ForestError::PredictionFeatureMismatch`]  | width differs from fitted data |
    pub fn predict_proba(
        &self,
        sample: &[f64],
        aggregation: Aggregation,
    ) -> Result<Vec<f64>, ForestError> {
        let expected = self.n_features.ok_or(ForestError::NotFitted)?;
        if sample.len() != expected {
            return Err(ForestError::PredictionFeatureMismatch {
                expected,
                got: sample.len(),
            });
        }
        let mut scores = vec![0.0; self.params.n_classes];
        self.predict_into(sample, aggregation, &mut scores);
        Ok(scores)
    }

    /// Write the class scores for a pre-validated `sample` into `scores`.
    ///
    /// Starting from the leaf's own scores, each ancestor up to the root
    /// blends in its own prediction with weight `exp(weight - weight_tree) / 2`.
    pub(crate) fn predict_into(
        &self,
        sample: &[f64],
        aggregation: Aggregation,
        scores: &mut [f64],
    ) {
        let leaf = self.find_leaf(sample);
        self.nodes[leaf.index()].predict(scores);
        if aggregation == Aggregation::Disabled {
            return;
        }
        let mut own = vec![0.0; self.params.n_classes];
        let mut current = leaf;
        while !current.is_root() {
            current = self.nodes[current.index()].parent();
            let node = &self.nodes[current.index()];
            let w = 0.5 * (node.weight() - node.weight_tree()).exp();
            node.predict(&mut own);
            for (score, &mine) in scores.iter_mut().zip(&own) {
                *score = w * mine + (1.0 - w) * *score;
            }
        }
    }

    /// Walk from the root to the leaf containing `sample`, updating the
    /// statistics of every node on the way.
    fn go_downwards(&mut self, sample: &[f64], label: usize) -> NodeIndex {
        let TreeParams { step, criterion, .. } = self.params;
        let mut current = NodeIndex::ROOT;
        loop {
            let node = &mut self.nodes[current.index()];
            node.update_downwards(label, step, criterion);
            match node.split() {
                Some(split) => current = split.child_for(sample),
                None => return current,
            }
        }
    }

    /// Read-only descent used by prediction.
    fn find_leaf(&self, sample: &[f64]) -> NodeIndex {
        let mut current = NodeIndex::ROOT;
        while let Some(split) = self.nodes[current.index()].split() {
            current = split.child_for(sample);
        }
        current
    }

    /// Split `leaf` between the arriving sample and the sample it stored.
    ///
    /// Returns the node the upward pass starts from: the new child holding
    /// `sample`, or `leaf` itself when no split was possible.
    fn split_leaf(&mut self, leaf: NodeIndex, sample: &[f64], label: usize) -> NodeIndex {
        let Some(stored) = self.nodes[leaf.index()].take_sample() else {
            self.nodes[leaf.index()].set_sample(StoredSample::new(sample, label));
            return leaf;
        };
        let Some(feature) = self.choose_feature(sample, stored.features()) else {
            debug!(leaf = %leaf, "duplicate sample, leaf left unsplit");
            self.nodes[leaf.index()].set_sample(StoredSample::new(sample, label));
            return leaf;
        };

        let left = self.add_node(leaf);
        let right = self.add_node(leaf);

        let x_new = sample[feature.index()];
        let x_old = stored.features()[feature.index()];
        let (threshold, data_leaf, other_leaf) = if x_new < x_old {
            (self.sampler.sample_threshold(x_new, x_old), left, right)
        } else {
            (self.sampler.sample_threshold(x_old, x_new), right, left)
        };
        self.nodes[leaf.index()].set_split(Split {
            feature,
            threshold,
            left,
            right,
        });
        trace!(leaf = %leaf, feature = %feature, threshold, "leaf split");

        let TreeParams { step, criterion, .. } = self.params;

        // The stored sample ends its journey in its new leaf.
        let other = &mut self.nodes[other_leaf.index()];
        other.update_downwards(stored.label(), step, criterion);
        other.update_upwards(None);
        other.set_sample(stored);

        let data = &mut self.nodes[data_leaf.index()];
        data.update_downwards(label, step, criterion);
        data.set_sample(StoredSample::new(sample, label));

        data_leaf
    }

    /// Pick a feature on which the two samples differ.
    ///
    /// The first draw is uniform over all features; if the samples tie on
    /// it, the draw is repeated over the features where they differ.
    /// Returns `None` for identical samples.
    fn choose_feature(&mut self, new: &[f64], old: &[f64]) -> Option<FeatureIndex> {
        let first = self.sampler.sample_feature(new.len());
        if new[first.index()] != old[first.index()] {
            return Some(first);
        }
        let candidates: Vec<usize> = (0..new.len()).filter(|&j| new[j] != old[j]).collect();
        if candidates.is_empty() {
            return None;
        }
        debug!(
            tied_feature = %first,
            n_candidates = candidates.len(),
            "split feature tied, redrawing among separating features"
        );
        Some(self.sampler.sample_among(&candidates))
    }

    /// Recompute `weight_tree` from `start` up to and including the root.
    fn go_upwards(&mut self, start: NodeIndex) {
        let mut current = start;
        loop {
            let subtree = self.nodes[current.index()].split().map(|split| {
                self.nodes[split.left.index()].weight_tree()
                    + self.nodes[split.right.index()].weight_tree()
            });
            let node = &mut self.nodes[current.index()];
            node.update_upwards(subtree);
            if current.is_root() {
                break;
            }
            current = node.parent();
        }
    }

    fn add_node(&mut self, parent: NodeIndex) -> NodeIndex {
        let index = NodeIndex::new(self.nodes.len());
        self.nodes.push(Node::new(parent, self.params.n_classes));
        index
    }

    // --- Introspection ---

    /// Return the node arena. Index 0 is the root.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Return the node at `index`, if it exists.
    #[must_use]
    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(index.index())
    }

    /// Return the total number of nodes in the tree (internal and leaves).
    #[must_use]
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Return the number of leaf nodes.
    #[must_use]
    pub fn n_leaves(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    /// Return the maximum depth of the tree. A lone root has depth 0.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut max_depth = 0usize;
        let mut stack = vec![(NodeIndex::ROOT, 0usize)];
        while let Some((index, d)) = stack.pop() {
            match self.nodes[index.index()].split() {
                Some(split) => {
                    stack.push((split.left, d + 1));
                    stack.push((split.right, d + 1));
                }
                None => max_depth = max_depth.max(d),
            }
        }
        max_depth
    }

    /// Return the number of samples fitted so far.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Return the feature width fixed by the first fitted sample.
    #[must_use]
    pub fn n_features(&self) -> Option<usize> {
        self.n_features
    }

    /// Return the number of classes.
    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.params.n_classes
    }

    /// Return the learning-rate step.
    #[must_use]
    pub fn step(&self) -> f64 {
        self.params.step
    }

    /// Return the loss criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.params.criterion
    }
}
