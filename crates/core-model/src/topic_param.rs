//! Topic-param persistence: one sparse word-count row per topic, the
//! background row last. The only model state that lives in memory across a
//! whole training run, flushed once at the end.

use crate::Model;
use anyhow::{Context, Result};
use core_codec::Writer;
use core_stream::{DEFAULT_BUFFER_SIZE, RecordKind, RecordReader};
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use tracing::info;

impl Model {
    pub fn load_topic_param(&mut self, path: &Path) -> Result<()> {
        let mut reader = RecordReader::open(
            path,
            RecordKind::TopicParam {
                words: self.hyper.word_num,
            },
            DEFAULT_BUFFER_SIZE,
        )?;
        for topic in 0..=self.hyper.topic_num {
            let record = reader.next(false)?.unwrap_or_else(|| {
                panic!(
                    "topic-param file {} ends before topic {topic}",
                    path.display()
                )
            });
            let mut cursor = core_codec::Reader::new(&reader.buffer()[record]);
            cursor
                .read_sparse32(self.counts.row_mut(topic))
                .expect("topic-param record truncated");
        }
        self.counts.recompute_totals();
        info!(
            target: "model",
            path = %path.display(),
            foreground = self.counts.foreground_total(),
            background = self.counts.background_total(),
            "topic_param_loaded"
        );
        Ok(())
    }

    pub fn save_topic_param(&self, path: &Path) -> Result<()> {
        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        );
        let mut writer = Writer::new();
        for topic in 0..=self.hyper.topic_num {
            writer.clear();
            writer.put_sparse32(self.counts.row(topic), 0);
            out.write_all(writer.as_slice())
                .with_context(|| format!("write {}", path.display()))?;
        }
        out.flush()
            .with_context(|| format!("flush {}", path.display()))
    }

    /// Word-count-weighted mean number of foreground topics each word
    /// appears in: 1.0 means every word lives in exactly one topic.
    pub fn topic_word_density(&self) -> f64 {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for word in 0..self.hyper.word_num {
            let mut topics_with_word = 0u32;
            let mut word_total = 0u64;
            for topic in 0..self.hyper.topic_num {
                let count = self.counts.word_count(topic, word);
                if count > 0 {
                    topics_with_word += 1;
                    word_total += u64::from(count);
                }
            }
            weighted += f64::from(topics_with_word) * word_total as f64;
            total += word_total as f64;
        }
        if total == 0.0 { 0.0 } else { weighted / total }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hyper::HyperParams;

    fn hyper(topics: usize, words: usize) -> HyperParams {
        HyperParams {
            topic_num: topics,
            word_num: words,
            alpha_m1: 0.5,
            beta_m1: 0.01,
            beta_bg_m1: 0.1,
            gamma_m1: 20.0,
        }
    }

    #[test]
    fn topic_param_round_trips_counts_and_totals() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("m.topic-param.bin");

        let mut model = Model::new(hyper(3, 16), 1, 1);
        for i in 0..200usize {
            let topic = i % 4; // includes the background row
            let word = (i * 7) % 16;
            model.counts.increment(topic, word);
        }
        model.counts.assert_consistent();
        model.save_topic_param(&path).unwrap();

        let mut reloaded = Model::new(hyper(3, 16), 1, 1);
        reloaded.load_topic_param(&path).unwrap();
        for topic in 0..=3 {
            assert_eq!(reloaded.counts.row(topic), model.counts.row(topic));
        }
        assert_eq!(
            reloaded.counts.foreground_total(),
            model.counts.foreground_total()
        );
        assert_eq!(
            reloaded.counts.background_total(),
            model.counts.background_total()
        );
        reloaded.counts.assert_consistent();
    }

    #[test]
    fn save_then_save_again_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.bin");
        let second = dir.path().join("b.bin");

        let mut model = Model::new(hyper(2, 8), 1, 1);
        model.counts.increment(0, 3);
        model.counts.increment(2, 5);
        model.save_topic_param(&first).unwrap();

        let mut reloaded = Model::new(hyper(2, 8), 1, 1);
        reloaded.load_topic_param(&first).unwrap();
        reloaded.save_topic_param(&second).unwrap();
        assert_eq!(
            std::fs::read(&first).unwrap(),
            std::fs::read(&second).unwrap()
        );
    }

    #[test]
    fn density_is_one_when_words_live_in_single_topics() {
        let mut model = Model::new(hyper(4, 8), 1, 1);
        for word in 0..8 {
            for _ in 0..3 {
                model.counts.increment(word % 4, word);
            }
        }
        assert!((model.topic_word_density() - 1.0).abs() < 1e-12);

        // Spread one word over a second topic; density rises above 1.
        model.counts.increment(1, 0);
        assert!(model.topic_word_density() > 1.0);
    }
}
