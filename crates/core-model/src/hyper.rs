//! Hyperparameters and the `key=value` text files that persist them.
//!
//! Priors are stored "minus one" so the sampler adds them directly to raw
//! counts without subtracting on every factor. `word_num` is fixed by the
//! dictionary at make-buffer time and travels with the model from then on;
//! a hyperparameter file therefore pins the full model shape and continued
//! training needs no prior flags on the command line.

use anyhow::{Context, Result, bail};
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct HyperParams {
    pub topic_num: usize,
    pub word_num: usize,
    pub alpha_m1: f64,
    pub beta_m1: f64,
    pub beta_bg_m1: f64,
    pub gamma_m1: f64,
}

impl HyperParams {
    /// Index of the background pseudo-topic row.
    pub fn background(&self) -> usize {
        self.topic_num
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut text = String::new();
        let _ = writeln!(text, "topic_num={}", self.topic_num);
        let _ = writeln!(text, "word_num={}", self.word_num);
        let _ = writeln!(text, "alpha_m1={:.20}", self.alpha_m1);
        let _ = writeln!(text, "beta_m1={:.20}", self.beta_m1);
        let _ = writeln!(text, "beta_bg_m1={:.20}", self.beta_bg_m1);
        let _ = writeln!(text, "gamma_m1={:.20}", self.gamma_m1);
        std::fs::write(path, text).with_context(|| format!("write {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let fields = KeyValues::load(path)?;
        Ok(Self {
            topic_num: fields.require_usize("topic_num")?,
            word_num: fields.require_usize("word_num")?,
            alpha_m1: fields.require_f64("alpha_m1")?,
            beta_m1: fields.require_f64("beta_m1")?,
            beta_bg_m1: fields.require_f64("beta_bg_m1")?,
            gamma_m1: fields.require_f64("gamma_m1")?,
        })
    }
}

struct KeyValues {
    path: String,
    pairs: Vec<(String, String)>,
}

impl KeyValues {
    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("open {} for reading", path.display()))?;
        let pairs = content
            .lines()
            .filter_map(|line| {
                line.split_once('=')
                    .map(|(k, v)| (k.to_string(), v.to_string()))
            })
            .collect();
        Ok(Self {
            path: path.display().to_string(),
            pairs,
        })
    }

    fn get(&self, key: &str) -> Result<&str> {
        for (k, v) in &self.pairs {
            if k == key {
                return Ok(v);
            }
        }
        bail!("{}: missing key {key}", self.path)
    }

    fn require_usize(&self, key: &str) -> Result<usize> {
        self.get(key)?
            .trim()
            .parse()
            .with_context(|| format!("{}: invalid value for {key}", self.path))
    }

    fn require_f64(&self, key: &str) -> Result<f64> {
        self.get(key)?
            .trim()
            .parse()
            .with_context(|| format!("{}: invalid value for {key}", self.path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> HyperParams {
        HyperParams {
            topic_num: 100,
            word_num: 54321,
            alpha_m1: 0.5,
            beta_m1: 0.01,
            beta_bg_m1: 0.1,
            gamma_m1: 20.0,
        }
    }

    #[test]
    fn hyper_params_round_trip_through_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.hyper-param.txt");
        sample().save(&path).unwrap();
        let loaded = HyperParams::load(&path).unwrap();
        assert_eq!(loaded, sample());
    }

    #[test]
    fn priors_survive_at_full_precision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.txt");
        let mut params = sample();
        params.beta_m1 = 0.012345678901234567;
        params.save(&path).unwrap();
        let loaded = HyperParams::load(&path).unwrap();
        assert_eq!(loaded.beta_m1, params.beta_m1);
    }

    #[test]
    fn missing_key_is_reported_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.txt");
        std::fs::write(&path, "topic_num=4\n").unwrap();
        let err = HyperParams::load(&path).unwrap_err();
        assert!(err.to_string().contains("word_num"));
    }

    #[test]
    fn unrelated_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.txt");
        std::fs::write(
            &path,
            "# generated by training\ntopic_num=4\nword_num=9\nalpha_m1=0.5\n\
             beta_m1=0.01\nbeta_bg_m1=0.1\ngamma_m1=20\n",
        )
        .unwrap();
        let loaded = HyperParams::load(&path).unwrap();
        assert_eq!(loaded.topic_num, 4);
        assert_eq!(loaded.word_num, 9);
    }
}
