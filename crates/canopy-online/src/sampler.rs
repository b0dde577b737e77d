//! Per-tree random stream for split placement.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::node::FeatureIndex;

/// Uniform feature and threshold draws for one tree.
///
/// Every tree owns its own stream, seeded from the forest's master seed, so
/// fitting trees in parallel stays reproducible.
#[derive(Debug, Clone)]
pub(crate) struct Sampler {
    rng: ChaCha8Rng,
}

impl Sampler {
    pub(crate) fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Draw a feature uniformly from `[0, n_features)`.
    pub(crate) fn sample_feature(&mut self, n_features: usize) -> FeatureIndex {
        FeatureIndex::new(self.rng.gen_range(0..n_features))
    }

    /// Draw one of `candidates` uniformly. `candidates` must be non-empty.
    pub(crate) fn sample_among(&mut self, candidates: &[usize]) -> FeatureIndex {
        FeatureIndex::new(candidates[self.rng.gen_range(0..candidates.len())])
    }

    /// Draw a threshold uniformly from `[lo, hi)`. Requires finite `lo < hi`.
    ///
    /// A draw equal to `lo` still separates `lo` (goes left) from `hi`.
    /// Interpolates directly when `hi - lo` overflows, so any pair of finite
    /// values is accepted.
    pub(crate) fn sample_threshold(&mut self, lo: f64, hi: f64) -> f64 {
        debug_assert!(lo < hi, "empty threshold interval [{lo}, {hi})");
        let u: f64 = self.rng.r#gen();
        let width = hi - lo;
        let t = if width.is_finite() {
            lo + u * width
        } else {
            lo * (1.0 - u) + hi * u
        };
        // Rounding can land on `hi`, which would no longer separate the pair.
        if t >= lo && t < hi { t } else { lo }
    }
}
