//! Scoring a single word list against a frozen model.
//!
//! Two rankings over topics: `Probability` multiplies per-word posterior
//! `phi` factors (the same extended-exponent product the trainer uses, with
//! the same early exit), `Score` compares the mean smoothed word count. The
//! winner is returned; the optional `probs` slice additionally receives the
//! per-topic distribution normalized to sum 1.

use crate::Model;
use core_numeric::{DOMINANCE_BITS, NORMALIZE_INTERVAL, fix_exp, pack_exp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferMode {
    Probability,
    Score,
}

impl Model {
    /// Best topic for `words`, or `None` when nothing scores above zero
    /// (empty input under `Score`). `probs`, when given, must have
    /// `topic_num` entries.
    pub fn infer(&self, words: &[u32], mode: InferMode, probs: Option<&mut [f64]>) -> Option<usize> {
        match mode {
            InferMode::Score => self.infer_score(words, probs),
            InferMode::Probability => self.infer_probability(words, probs),
        }
    }

    fn infer_score(&self, words: &[u32], probs: Option<&mut [f64]>) -> Option<usize> {
        let word_num = self.hyper.word_num as f64;
        let mut selected = None;
        let mut max_score = 0.0f64;
        let mut scores = probs;
        for topic in 0..self.hyper.topic_num {
            let mut hits = 0.0f64;
            for &word in words {
                hits += f64::from(self.counts.word_count(topic, word as usize));
            }
            let score = (hits + self.hyper.beta_m1 * words.len() as f64)
                / (self.counts.topic_total(topic) as f64 + self.hyper.beta_m1 * word_num);
            if score > max_score {
                max_score = score;
                selected = Some(topic);
            }
            if let Some(out) = scores.as_deref_mut() {
                out[topic] = score;
            }
        }
        if let Some(out) = scores {
            normalize(out);
        }
        selected
    }

    fn infer_probability(&self, words: &[u32], probs: Option<&mut [f64]>) -> Option<usize> {
        let mut selected = None;
        let mut max_prob = 0.0f64;
        let mut max_prob_exp = i32::MIN;
        for topic in 0..self.hyper.topic_num {
            let (prob, prob_exp) = self.word_product(topic, words, max_prob_exp);
            if prob_exp > max_prob_exp || (prob_exp == max_prob_exp && prob > max_prob) {
                max_prob = prob;
                max_prob_exp = prob_exp;
                selected = Some(topic);
            }
        }

        if let Some(out) = probs {
            for topic in 0..self.hyper.topic_num {
                let (prob, prob_exp) = self.word_product(topic, words, max_prob_exp);
                out[topic] = pack_exp(prob, prob_exp - max_prob_exp);
            }
            normalize(out);
        }
        selected
    }

    /// `prod_w phi(topic, w)` in extended-exponent form, abandoning the
    /// product once it falls hopelessly below `max_prob_exp`.
    fn word_product(&self, topic: usize, words: &[u32], max_prob_exp: i32) -> (f64, i32) {
        let denom = self.counts.topic_total(topic) as f64
            + self.hyper.beta_m1 * self.hyper.word_num as f64;
        let mut prob = 1.0f64;
        let mut prob_exp = 0i32;
        for (i, &word) in words.iter().enumerate() {
            prob *=
                (f64::from(self.counts.word_count(topic, word as usize)) + self.hyper.beta_m1)
                    / denom;
            if i % NORMALIZE_INTERVAL == NORMALIZE_INTERVAL - 1 {
                fix_exp(&mut prob, &mut prob_exp);
                if prob_exp + DOMINANCE_BITS < max_prob_exp {
                    break;
                }
            }
        }
        fix_exp(&mut prob, &mut prob_exp);
        (prob, prob_exp)
    }
}

fn normalize(values: &mut [f64]) {
    let sum: f64 = values.iter().sum();
    if sum != 0.0 {
        for v in values.iter_mut() {
            *v /= sum;
        }
    }
}
