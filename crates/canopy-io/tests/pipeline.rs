//! End-to-end integration tests: CSV -> online forest -> JSON -> deserialize.

use std::fs;
use std::path::{Path, PathBuf};

use canopy_io::{ChunkRecord, ExperimentName, LabeledCsvReader, PredictionRecord, ReportWriter};
use canopy_online::{OnlineForest, OnlineForestConfig};
use tempfile::TempDir;

/// Path to the test fixture directory.
fn fixture_path(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn forest() -> OnlineForest {
    OnlineForest::new(OnlineForestConfig::new(10, 3).unwrap().with_seed(42)).unwrap()
}

#[test]
fn holdout_predictions_round_trip() {
    let train = LabeledCsvReader::new(&fixture_path("blobs_train.csv"))
        .read()
        .expect("fixture should parse");
    let test = LabeledCsvReader::new(&fixture_path("blobs_test.csv"))
        .read()
        .expect("fixture should parse");
    assert_eq!(train.feature_names, vec!["width", "height"]);
    assert_eq!(train.len(), 60);
    assert_eq!(test.len(), 15);

    let mut forest = forest();
    for (rows, labels) in train.features.chunks(16).zip(train.labels.chunks(16)) {
        forest.fit(rows, labels).unwrap();
    }

    let dists = forest.predict_proba_batch(&test.features).unwrap();
    let predictions: Vec<PredictionRecord> = dists
        .into_iter()
        .zip(&test.labels)
        .enumerate()
        .map(|(row, (dist, &label))| PredictionRecord {
            row,
            label,
            predicted_class: dist.predicted_class(),
            probabilities: dist.into_vec(),
        })
        .collect();
    let correct = predictions
        .iter()
        .filter(|p| p.predicted_class as f64 == p.label)
        .count();
    let accuracy = correct as f64 / predictions.len() as f64;
    assert!(accuracy >= 0.7, "hold-out accuracy {accuracy}");

    let dir = TempDir::new().unwrap();
    let writer =
        ReportWriter::new(dir.path(), ExperimentName::new("blobs".into()).unwrap()).unwrap();
    writer.write_predictions(10, 3, accuracy, &predictions).unwrap();

    let content: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("blobs_predictions.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(content["experiment"], "blobs");
    assert_eq!(content["n_rows"].as_u64().unwrap(), 15);
    let rows = content["predictions"].as_array().unwrap();
    assert_eq!(rows.len(), 15);
    for row in rows {
        let probs: Vec<f64> = row["probabilities"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        assert_eq!(probs.len(), 3);
        let sum: f64 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9, "row sums to {sum}");
        assert!(row["predicted_class"].as_u64().unwrap() < 3);
    }
}

#[test]
fn prequential_stream_round_trip() {
    let data = LabeledCsvReader::new(&fixture_path("blobs_train.csv"))
        .read()
        .unwrap();
    let mut forest = forest();
    let mut chunks = Vec::new();
    let mut n_seen = 0;

    for (chunk, (rows, labels)) in data
        .features
        .chunks(20)
        .zip(data.labels.chunks(20))
        .enumerate()
    {
        if forest.iteration() > 0 {
            let predicted = forest.predict_batch(rows).unwrap();
            let correct = predicted
                .iter()
                .zip(labels)
                .filter(|&(&p, &y)| p as f64 == y)
                .count();
            chunks.push(ChunkRecord {
                chunk,
                n_samples: rows.len(),
                n_seen,
                accuracy: correct as f64 / rows.len() as f64,
                log_loss: 0.0,
            });
        }
        forest.fit(rows, labels).unwrap();
        n_seen += rows.len();
    }
    assert_eq!(chunks.len(), 2);
    assert_eq!(forest.iteration(), 60);

    let dir = TempDir::new().unwrap();
    let writer =
        ReportWriter::new(dir.path(), ExperimentName::new("preq".into()).unwrap()).unwrap();
    let path = writer.write_stream(10, 3, &chunks, 0.0, 0.0).unwrap();

    let content: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
    assert_eq!(content["n_scored"].as_u64().unwrap(), 40);
    assert_eq!(content["chunks"][0]["chunk"].as_u64().unwrap(), 1);
    assert_eq!(content["chunks"][0]["n_seen"].as_u64().unwrap(), 20);
    assert_eq!(content["chunks"][1]["n_seen"].as_u64().unwrap(), 40);
}
