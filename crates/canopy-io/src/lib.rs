//! CSV ingestion and JSON reporting for the canopy command line.

mod domain;
mod error;
mod reader;
mod writer;

pub use domain::{ExperimentName, LabeledDataset};
pub use error::IoError;
pub use reader::LabeledCsvReader;
pub use writer::{ChunkRecord, PredictionRecord, ReportWriter};
