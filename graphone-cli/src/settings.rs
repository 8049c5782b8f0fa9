use std::fs;
use std::path::Path;

use anyhow::Context;
use graphone_core::{ModelConfig, TrainConfig};
use serde::{Deserialize, Serialize};

use crate::args::TrainArgs;

/// Contents of a `--config` JSON file. Missing sections and fields fall back
/// to the library defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelConfig,
    pub train: TrainConfig,
}

impl Settings {
    pub fn normalize(&mut self) {
        self.model.normalize();
        self.train.normalize();
    }

    /// Layer command-line overrides on top of the file values.
    pub fn apply_overrides(&mut self, args: &TrainArgs) {
        if let Some(step) = args.step {
            self.train.step_size = step;
        }
        if let Some(batch) = args.batch {
            self.train.batch_size = batch;
        }
        if let Some(fraction) = args.validation {
            self.train.validation_fraction = fraction;
        }
        if let Some(workers) = args.workers {
            self.train.concurrency = workers;
        }
        if args.iterations.is_some() {
            self.train.max_iterations = args.iterations;
        }
        self.normalize();
    }
}

/// Read settings from `path`, or defaults when no file was given.
pub fn load_settings(path: Option<&Path>) -> anyhow::Result<Settings> {
    let mut settings = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str::<Settings>(&raw)
                .with_context(|| format!("parsing config {}", path.display()))?
        }
        None => Settings::default(),
    };
    settings.normalize();
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    use graphone_core::Task;

    fn train_args() -> TrainArgs {
        TrainArgs {
            net: PathBuf::from("net.json"),
            data: PathBuf::from("dict.txt"),
            task: Task::Spell,
            config: None,
            step: None,
            batch: None,
            validation: None,
            workers: None,
            iterations: None,
        }
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        fs::write(&path, r#"{ "model": { "hidden_size": 64 }, "train": { "batch_size": 32 } }"#)
            .unwrap();
        let settings = load_settings(Some(&path)).unwrap();
        assert_eq!(settings.model.hidden_size, 64);
        assert_eq!(settings.model.layers, 2);
        assert_eq!(settings.train.batch_size, 32);
        assert_eq!(settings.train.sub_batch_size, 16);
    }

    #[test]
    fn unreadable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_settings(Some(&dir.path().join("nope.json"))).is_err());
        let bad = dir.path().join("bad.json");
        fs::write(&bad, "{").unwrap();
        assert!(load_settings(Some(&bad)).is_err());
    }

    #[test]
    fn overrides_win_and_are_normalised() {
        let mut settings = load_settings(None).unwrap();
        settings.apply_overrides(&TrainArgs {
            step: Some(0.01),
            batch: Some(8),
            workers: Some(0),
            iterations: Some(10),
            ..train_args()
        });
        assert_eq!(settings.train.step_size, 0.01);
        assert_eq!(settings.train.batch_size, 8);
        // Sub-batches never exceed the batch.
        assert_eq!(settings.train.sub_batch_size, 8);
        assert_eq!(settings.train.concurrency, 1);
        assert_eq!(settings.train.max_iterations, Some(10));
    }
}
