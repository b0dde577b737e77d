//! JSON report writer for streaming and hold-out evaluations.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::domain::ExperimentName;
use crate::IoError;

/// Prequential scores for one chunk of a stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkRecord {
    /// Zero-based chunk position in the stream.
    pub chunk: usize,
    /// Rows in this chunk.
    pub n_samples: usize,
    /// Rows the forest had been trained on before this chunk was scored.
    pub n_seen: usize,
    /// Fraction of rows in this chunk whose predicted class matched the label.
    pub accuracy: f64,
    /// Mean negative log-probability of the true class over this chunk.
    pub log_loss: f64,
}

/// Prediction for one row of a hold-out file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// Zero-based row index in the input file.
    pub row: usize,
    /// Label read from the file.
    pub label: f64,
    /// Argmax of `probabilities`.
    pub predicted_class: usize,
    /// Averaged class probabilities.
    pub probabilities: Vec<f64>,
}

/// Writes evaluation reports to JSON files.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{experiment}_stream.json` and
/// `{experiment}_predictions.json`.
pub struct ReportWriter {
    output_dir: PathBuf,
    experiment: ExperimentName,
}

impl ReportWriter {
    /// Create a new writer targeting the given directory and experiment name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), experiment = %experiment))]
    pub fn new(output_dir: &Path, experiment: ExperimentName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            experiment,
        })
    }

    /// Return the path of the streaming report.
    #[must_use]
    pub fn stream_path(&self) -> PathBuf {
        self.artifact_path("stream")
    }

    /// Return the path of the predictions report.
    #[must_use]
    pub fn predictions_path(&self) -> PathBuf {
        self.artifact_path("predictions")
    }

    /// Write a prequential learning curve to `{experiment}_stream.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Serialize`] or [`IoError::WriteFile`].
    #[instrument(skip_all, fields(n_chunks = chunks.len()))]
    pub fn write_stream(
        &self,
        n_trees: usize,
        n_classes: usize,
        chunks: &[ChunkRecord],
        accuracy: f64,
        log_loss: f64,
    ) -> Result<PathBuf, IoError> {
        let artifact = StreamArtifact {
            experiment: self.experiment.as_str(),
            n_trees,
            n_classes,
            n_scored: chunks.iter().map(|c| c.n_samples).sum(),
            accuracy,
            log_loss,
            chunks,
        };
        let path = self.stream_path();
        write_json(&path, &artifact)?;
        info!(path = %path.display(), "stream report written");
        Ok(path)
    }

    /// Write hold-out predictions to `{experiment}_predictions.json`.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Serialize`] or [`IoError::WriteFile`].
    #[instrument(skip_all, fields(n_rows = predictions.len()))]
    pub fn write_predictions(
        &self,
        n_trees: usize,
        n_classes: usize,
        accuracy: f64,
        predictions: &[PredictionRecord],
    ) -> Result<PathBuf, IoError> {
        let artifact = PredictionsArtifact {
            experiment: self.experiment.as_str(),
            n_trees,
            n_classes,
            n_rows: predictions.len(),
            accuracy,
            predictions,
        };
        let path = self.predictions_path();
        write_json(&path, &artifact)?;
        info!(path = %path.display(), "predictions written");
        Ok(path)
    }

    fn artifact_path(&self, kind: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{kind}.json", self.experiment.as_str()))
    }
}

fn write_json<T: Serialize>(path: &Path, artifact: &T) -> Result<(), IoError> {
    let json = serde_json::to_string_pretty(artifact).map_err(|e| IoError::Serialize {
        path: path.to_path_buf(),
        source: e,
    })?;
    fs::write(path, json).map_err(|e| IoError::WriteFile {
        path: path.to_path_buf(),
        source: e,
    })
}

// --- Serialization structs ---

#[derive(Serialize)]
struct StreamArtifact<'a> {
    experiment: &'a str,
    n_trees: usize,
    n_classes: usize,
    n_scored: usize,
    accuracy: f64,
    log_loss: f64,
    chunks: &'a [ChunkRecord],
}

#[derive(Serialize)]
struct PredictionsArtifact<'a> {
    experiment: &'a str,
    n_trees: usize,
    n_classes: usize,
    n_rows: usize,
    accuracy: f64,
    predictions: &'a [PredictionRecord],
}
