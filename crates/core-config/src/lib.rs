//! Optional `tilda.toml` defaults.
//!
//! The CLI always wins; the config file only supplies defaults for the
//! training knobs and the Dirichlet priors so that repeated experiments on
//! one corpus do not need the same half-dozen flags every run. A missing or
//! unparsable file falls back to built-in defaults, and unknown fields are
//! ignored so the format can grow without breaking older binaries.

use anyhow::Result;
use serde::Deserialize;
use std::{fs, path::PathBuf};
use tracing::{info, warn};

/// Built-in defaults, used when neither the CLI nor the config file says
/// otherwise.
pub mod defaults {
    pub const THREAD_NUM: usize = 1;
    pub const BATCH_MEGABYTES: usize = 16;
    pub const ITERATION_NUM: u32 = 100;
    pub const TOPIC_NUM: usize = 100;
    pub const ALPHA_M1: f64 = 0.5;
    pub const BETA_M1: f64 = 0.01;
    pub const BETA_BG_M1: f64 = 0.1;
    pub const GAMMA_M1: f64 = 20.0;
    pub const MIN_USER_FREQ: u64 = 1;
    pub const MIN_WORD_FREQ: u64 = 1;
    pub const RAND_SEED: u64 = 5489;
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct TrainSection {
    pub thread: Option<usize>,
    pub batch: Option<usize>,
    pub iterate: Option<u32>,
    pub topic: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct PriorSection {
    pub alpha_m1: Option<f64>,
    pub beta_m1: Option<f64>,
    pub beta_bg_m1: Option<f64>,
    pub gamma_m1: Option<f64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub train: TrainSection,
    #[serde(default)]
    pub prior: PriorSection,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub file: ConfigFile,
}

/// Best-effort config path: `tilda.toml` in the working directory first,
/// then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("tilda.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("tilda").join("tilda.toml");
    }
    PathBuf::from("tilda.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    if let Ok(content) = fs::read_to_string(&path) {
        match toml::from_str::<ConfigFile>(&content) {
            Ok(file) => {
                info!(target: "config", path = %path.display(), "config_loaded");
                Ok(Config { file })
            }
            Err(e) => {
                warn!(
                    target: "config",
                    path = %path.display(),
                    error = %e,
                    "config_parse_failed_using_defaults"
                );
                Ok(Config::default())
            }
        }
    } else {
        Ok(Config::default())
    }
}

impl Config {
    pub fn thread_num(&self, cli: Option<usize>) -> usize {
        cli.or(self.file.train.thread).unwrap_or(defaults::THREAD_NUM)
    }

    /// Batch size in bytes; the knob everywhere is megabytes.
    pub fn batch_size(&self, cli_megabytes: Option<usize>) -> usize {
        cli_megabytes
            .or(self.file.train.batch)
            .unwrap_or(defaults::BATCH_MEGABYTES)
            << 20
    }

    pub fn iteration_num(&self, cli: Option<u32>) -> u32 {
        cli.or(self.file.train.iterate)
            .unwrap_or(defaults::ITERATION_NUM)
    }

    pub fn topic_num(&self, cli: Option<usize>) -> usize {
        cli.or(self.file.train.topic).unwrap_or(defaults::TOPIC_NUM)
    }

    pub fn alpha_m1(&self, cli: Option<f64>) -> f64 {
        cli.or(self.file.prior.alpha_m1)
            .unwrap_or(defaults::ALPHA_M1)
    }

    pub fn beta_m1(&self, cli: Option<f64>) -> f64 {
        cli.or(self.file.prior.beta_m1).unwrap_or(defaults::BETA_M1)
    }

    pub fn beta_bg_m1(&self, cli: Option<f64>) -> f64 {
        cli.or(self.file.prior.beta_bg_m1)
            .unwrap_or(defaults::BETA_BG_M1)
    }

    pub fn gamma_m1(&self, cli: Option<f64>) -> f64 {
        cli.or(self.file.prior.gamma_m1)
            .unwrap_or(defaults::GAMMA_M1)
    }
}
