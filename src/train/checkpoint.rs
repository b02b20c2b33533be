use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use chrono::Local;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::trainer::RunConfig;
use crate::error::Result;
use crate::evaluation::LossVector;

/// Where the results of a training run are stored.
///
/// The run directory is `<root>/<path>/<name><timestamp>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLocation {
    pub root: PathBuf,
    pub path: String,
    pub name: String,
}

impl Default for OutputLocation {
    fn default() -> Self {
        Self {
            root: PathBuf::from("results"),
            path: String::new(),
            name: String::new(),
        }
    }
}

impl OutputLocation {
    pub fn new<P: Into<String>, N: Into<String>>(path: P, name: N) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_root<R: Into<PathBuf>>(mut self, root: R) -> Self {
        self.root = root.into();
        self
    }

    fn run_dir(&self) -> PathBuf {
        let stamp = Local::now().format("%Y-%-m-%-d_%-H-%-M-%-S");
        self.root
            .join(&self.path)
            .join(format!("{}{}", self.name, stamp))
    }
}

/// Everything a run has produced so far; absent parts are not written
#[derive(Debug, Default)]
pub(crate) struct RunRecord<'a> {
    pub weights: Option<&'a Array1<f64>>,
    pub train_time: Option<f64>,
    pub val_loss: Option<&'a [LossVector]>,
    pub test_loss: Option<&'a LossVector>,
    pub snapshots: Option<&'a [Array1<f64>]>,
    pub config: Option<&'a RunConfig>,
}

#[derive(Serialize)]
struct RunSummary<'a> {
    train_time: Option<f64>,
    num_weights: Option<usize>,
    num_validations: Option<usize>,
    test_loss: Option<&'a LossVector>,
    config: Option<&'a RunConfig>,
}

/// Writes run results as JSON files into a fresh run directory
pub(crate) struct ResultStore;

impl ResultStore {
    pub fn save(location: &OutputLocation, record: &RunRecord<'_>) -> Result<PathBuf> {
        let dir = location.run_dir();
        fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "made results folder");

        if let (Some(weights), Some(secs)) = (record.weights, record.train_time) {
            tracing::info!("serializing W_opt");
            write_json(&dir.join(format!("w_opt_{:.2}.json", secs)), &weights.to_vec())?;
        }
        if let Some(val_loss) = record.val_loss {
            tracing::info!("serializing val_loss");
            write_json(&dir.join("val_loss.json"), val_loss)?;
        }
        if let Some(test_loss) = record.test_loss {
            tracing::info!("serializing test_loss");
            write_json(&dir.join("test_loss.json"), test_loss)?;
        }
        if let Some(snapshots) = record.snapshots {
            tracing::info!("serializing Ws_val");
            let rows: Vec<Vec<f64>> = snapshots.iter().map(|w| w.to_vec()).collect();
            write_json(&dir.join("ws_val.json"), &rows)?;
        }

        let summary = RunSummary {
            train_time: record.train_time,
            num_weights: record.weights.map(|w| w.len()),
            num_validations: record.val_loss.map(|v| v.len()),
            test_loss: record.test_loss,
            config: record.config,
        };
        write_json(&dir.join("run.json"), &summary)?;
        Ok(dir)
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_dir_layout() {
        let location = OutputLocation::new("sweep", "batch3_").with_root("/tmp/out");
        let dir = location.run_dir();
        assert!(dir.starts_with("/tmp/out/sweep"));
        let leaf = dir.file_name().unwrap().to_str().unwrap();
        assert!(leaf.starts_with("batch3_"));
        assert_eq!(leaf.matches('_').count(), 2);
    }

    #[test]
    fn test_save_skips_missing_parts() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::new("", "empty").with_root(root.path());
        let dir = ResultStore::save(&location, &RunRecord::default()).unwrap();
        let mut names: Vec<String> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        assert_eq!(names, vec!["run.json"]);
    }

    #[test]
    fn test_save_writes_weights_and_history() {
        let root = tempfile::tempdir().unwrap();
        let location = OutputLocation::new("runs", "full").with_root(root.path());
        let weights = Array1::from(vec![1.0, -2.0]);
        let val_loss = vec![vec![0.5, 1.0]];
        let test_loss = vec![0.25, 0.5];
        let snapshots = vec![weights.clone()];
        let record = RunRecord {
            weights: Some(&weights),
            train_time: Some(1.5),
            val_loss: Some(&val_loss),
            test_loss: Some(&test_loss),
            snapshots: Some(&snapshots),
            config: None,
        };
        let dir = ResultStore::save(&location, &record).unwrap();
        let saved: Vec<f64> =
            serde_json::from_reader(File::open(dir.join("w_opt_1.50.json")).unwrap()).unwrap();
        assert_eq!(saved, vec![1.0, -2.0]);
        let saved: Vec<Vec<f64>> =
            serde_json::from_reader(File::open(dir.join("ws_val.json")).unwrap()).unwrap();
        assert_eq!(saved, vec![vec![1.0, -2.0]]);
        assert!(dir.join("val_loss.json").exists());
        assert!(dir.join("test_loss.json").exists());
    }
}
