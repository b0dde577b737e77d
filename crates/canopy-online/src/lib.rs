//! Online random forest classification: streamed fit, aggregated predict.
//!
//! Trees grow one sample at a time, splitting the reached leaf between the
//! new sample and the one it stored, at a random feature and threshold.
//! Each tree predicts by mixing the class estimates of every node on the
//! sample's path, weighted by their running log-loss scores (an exponential
//! weighting over all prunings of the tree). The forest averages its trees.

mod config;
mod error;
mod forest;
mod node;
mod predict;
mod sampler;
mod tree;
mod validate;

pub use config::{Aggregation, OnlineForestConfig, SplitCriterion};
pub use error::ForestError;
pub use forest::OnlineForest;
pub use node::{FeatureIndex, Node, NodeIndex, Split, StoredSample, log_sum_exp2};
pub use predict::ClassDistribution;
pub use tree::OnlineTree;
