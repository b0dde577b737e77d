use std::fmt;

use crate::config::SplitCriterion;

/// Zero-based feature column index.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct FeatureIndex(usize);

impl FeatureIndex {
    /// Create a new feature index from a zero-based column position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based feature column index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for FeatureIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Index into a tree's `Vec<Node>` arena. The root is always index 0.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// The root of every tree.
    pub const ROOT: NodeIndex = NodeIndex(0);

    /// Create a new node index from a zero-based arena position.
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    /// Return the zero-based arena index.
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }

    /// Return `true` for the root node.
    #[must_use]
    pub fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numerically stable `ln(exp(a) + exp(b))`.
#[must_use]
pub fn log_sum_exp2(a: f64, b: f64) -> f64 {
    a.max(b) + (-(a - b).abs()).exp().ln_1p()
}

/// The routing rule of an internal node.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Split {
    /// Feature used for the split.
    pub feature: FeatureIndex,
    /// Samples with `sample[feature] <= threshold` go left.
    pub threshold: f64,
    /// Index of the left child node.
    pub left: NodeIndex,
    /// Index of the right child node.
    pub right: NodeIndex,
}

impl Split {
    /// Return the child a sample is routed to.
    #[must_use]
    pub fn child_for(&self, sample: &[f64]) -> NodeIndex {
        if sample[self.feature.index()] <= self.threshold {
            self.left
        } else {
            self.right
        }
    }
}

/// The most recent sample a leaf has seen, kept to place the next split.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSample {
    features: Vec<f64>,
    label: usize,
}

impl StoredSample {
    pub(crate) fn new(features: &[f64], label: usize) -> Self {
        Self {
            features: features.to_vec(),
            label,
        }
    }

    /// Feature values of the stored sample.
    #[must_use]
    pub fn features(&self) -> &[f64] {
        &self.features
    }

    /// Class id of the stored sample.
    #[must_use]
    pub fn label(&self) -> usize {
        self.label
    }
}

/// A node in an online tree arena.
///
/// Every node, internal or not, keeps the class counts of the samples that
/// passed through it and two log-space scores:
///
/// - `weight`: the cumulative log-loss score of this node predicting alone,
///   scaled by the forest step.
/// - `weight_tree`: the log of the mixture over this node and every pruning
///   of its subtree. Equal to `weight` for a leaf, and
///   `log_sum_exp2(weight, weight_tree(left) + weight_tree(right))` otherwise.
#[derive(Debug, Clone)]
pub struct Node {
    parent: NodeIndex,
    split: Option<Split>,
    n_samples: u64,
    counts: Vec<u64>,
    weight: f64,
    weight_tree: f64,
    sample: Option<StoredSample>,
}

impl Node {
    /// Create an empty leaf.
    pub(crate) fn new(parent: NodeIndex, n_classes: usize) -> Self {
        Self {
            parent,
            split: None,
            n_samples: 0,
            counts: vec![0; n_classes],
            weight: 0.0,
            weight_tree: 0.0,
            sample: None,
        }
    }

    /// Account for one more sample of class `label` reaching this node.
    ///
    /// The loss is charged before the class count moves, so `weight` stays
    /// an honest sequential score.
    pub(crate) fn update_downwards(&mut self, label: usize, step: f64, criterion: SplitCriterion) {
        debug_assert!(label < self.counts.len(), "label out of range");
        self.n_samples += 1;
        self.weight -= step * criterion.loss(self.score(label));
        self.counts[label] += 1;
    }

    /// Recompute `weight_tree`. `subtree` is the summed `weight_tree` of the
    /// two children, `None` for a leaf.
    pub(crate) fn update_upwards(&mut self, subtree: Option<f64>) {
        self.weight_tree = match subtree {
            Some(children) => log_sum_exp2(self.weight, children),
            None => self.weight,
        };
    }

    /// Class probability under a Jeffreys Dirichlet(1/2, ..., 1/2) prior.
    ///
    /// Never zero, even for a class the node has not seen.
    #[must_use]
    pub fn score(&self, class: usize) -> f64 {
        let n_classes = self.counts.len() as u64;
        (2 * self.counts[class] + 1) as f64 / (2 * self.n_samples + n_classes) as f64
    }

    /// Write this node's class scores into `scores` (length `n_classes`).
    pub fn predict(&self, scores: &mut [f64]) {
        for (class, score) in scores.iter_mut().enumerate() {
            *score = self.score(class);
        }
    }

    pub(crate) fn set_split(&mut self, split: Split) {
        self.split = Some(split);
    }

    pub(crate) fn set_sample(&mut self, sample: StoredSample) {
        self.sample = Some(sample);
    }

    pub(crate) fn take_sample(&mut self) -> Option<StoredSample> {
        self.sample.take()
    }

    /// Return the parent index. The root is its own parent.
    #[must_use]
    pub fn parent(&self) -> NodeIndex {
        self.parent
    }

    /// Return the split rule, or `None` for a leaf.
    #[must_use]
    pub fn split(&self) -> Option<&Split> {
        self.split.as_ref()
    }

    /// Return `true` if this node is a leaf.
    #[must_use]
    pub fn is_leaf(&self) -> bool {
        self.split.is_none()
    }

    /// Return the number of fit-time visits to this node.
    #[must_use]
    pub fn n_samples(&self) -> u64 {
        self.n_samples
    }

    /// Return the per-class visit counts.
    #[must_use]
    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Return the node's own log-score.
    #[must_use]
    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Return the node's mixture log-score.
    #[must_use]
    pub fn weight_tree(&self) -> f64 {
        self.weight_tree
    }

    /// Return the sample stored at this node, if any.
    #[must_use]
    pub fn sample(&self) -> Option<&StoredSample> {
        self.sample.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::{FeatureIndex, Node, NodeIndex, Split, log_sum_exp2};
    use crate::config::SplitCriterion;

    const LOG_LOSS: SplitCriterion = SplitCriterion::LogLoss;

    // --- Indices ---

    #[test]
    fn node_index_root() {
        assert!(NodeIndex::ROOT.is_root());
        assert!(!NodeIndex::new(3).is_root());
        assert_eq!(format!("{}", NodeIndex::new(3)), "3");
    }

    #[test]
    fn feature_index_roundtrip() {
        let fi = FeatureIndex::new(7);
        assert_eq!(fi.index(), 7);
        assert_eq!(format!("{fi}"), "7");
    }

    // --- log_sum_exp2 ---

    #[test]
    fn log_sum_exp2_matches_naive() {
        let (a, b) = (-1.3_f64, -0.2_f64);
        let naive = (a.exp() + b.exp()).ln();
        assert!((log_sum_exp2(a, b) - naive).abs() < 1e-12);
        assert!((log_sum_exp2(b, a) - naive).abs() < 1e-12);
    }

    #[test]
    fn log_sum_exp2_stable_for_large_magnitudes() {
        let v = log_sum_exp2(-1000.0, -1000.0);
        assert!((v - (-1000.0 + 2f64.ln())).abs() < 1e-9);
        let v = log_sum_exp2(800.0, 0.0);
        assert!(v.is_finite());
        assert!((v - 800.0).abs() < 1e-12);
    }

    // --- Scores ---

    #[test]
    fn fresh_node_is_uniform() {
        let node = Node::new(NodeIndex::ROOT, 4);
        for c in 0..4 {
            assert!((node.score(c) - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn scores_sum_to_one_and_stay_positive() {
        let mut node = Node::new(NodeIndex::ROOT, 3);
        for (i, &label) in [0, 0, 1, 0, 2, 0, 0].iter().enumerate() {
            node.update_downwards(label, 1.0, LOG_LOSS);
            let mut scores = vec![0.0; 3];
            node.predict(&mut scores);
            let sum: f64 = scores.iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "step {i}: sum = {sum}");
            assert!(scores.iter().all(|&s| s > 0.0));
        }
        assert_eq!(node.n_samples(), 7);
        assert_eq!(node.counts(), &[5, 1, 1]);
    }

    #[test]
    fn jeffreys_prior_formula() {
        let mut node = Node::new(NodeIndex::ROOT, 2);
        node.update_downwards(1, 1.0, LOG_LOSS);
        node.update_downwards(1, 1.0, LOG_LOSS);
        // counts = [0, 2], n = 2 -> (2*2 + 1) / (4 + 2)
        assert!((node.score(1) - 5.0 / 6.0).abs() < 1e-12);
        assert!((node.score(0) - 1.0 / 6.0).abs() < 1e-12);
    }

    // --- Weights ---

    #[test]
    fn loss_charged_before_count_update() {
        let mut node = Node::new(NodeIndex::ROOT, 2);
        node.update_downwards(0, 1.0, LOG_LOSS);
        // n_samples is already 1 while counts are still zero: score = 1 / 4.
        assert!((node.weight() - 0.25f64.ln()).abs() < 1e-12);
        node.update_downwards(0, 0.5, LOG_LOSS);
        // counts = [1, 0], n = 2: score(0) = 3 / 6.
        let expected = 0.25f64.ln() + 0.5 * 0.5f64.ln();
        assert!((node.weight() - expected).abs() < 1e-12);
    }

    #[test]
    fn leaf_update_upwards_copies_weight() {
        let mut node = Node::new(NodeIndex::ROOT, 2);
        node.update_downwards(1, 1.0, LOG_LOSS);
        node.update_upwards(None);
        assert_eq!(node.weight_tree(), node.weight());
    }

    #[test]
    fn internal_update_upwards_mixes() {
        let mut node = Node::new(NodeIndex::ROOT, 2);
        node.update_downwards(1, 1.0, LOG_LOSS);
        node.update_upwards(Some(-0.7));
        assert_eq!(node.weight_tree(), log_sum_exp2(node.weight(), -0.7));
        assert!(node.weight_tree() >= node.weight());
    }

    // --- Split ---

    #[test]
    fn split_routes_on_threshold() {
        let split = Split {
            feature: FeatureIndex::new(1),
            threshold: 0.5,
            left: NodeIndex::new(1),
            right: NodeIndex::new(2),
        };
        assert_eq!(split.child_for(&[9.0, 0.5]), NodeIndex::new(1));
        assert_eq!(split.child_for(&[-9.0, 0.6]), NodeIndex::new(2));
    }

    #[test]
    fn set_split_is_permanent() {
        let mut node = Node::new(NodeIndex::ROOT, 2);
        assert!(node.is_leaf());
        node.set_split(Split {
            feature: FeatureIndex::new(0),
            threshold: 1.0,
            left: NodeIndex::new(1),
            right: NodeIndex::new(2),
        });
        assert!(!node.is_leaf());
        assert_eq!(node.split().map(|s| s.left), Some(NodeIndex::new(1)));
    }
}
