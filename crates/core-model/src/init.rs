//! Fresh-model initialization: one sweep of uniform-random assignments.
//!
//! Every tweet gets a uniform topic, every word a uniform coin-flip tag,
//! and the implied user-param and tweet-param streams are written so the
//! first real iteration can read them like any other. Per-user topic
//! counts accumulate in a map and are written after the sweep in first-
//! appearance order — the order the training iteration demand-loads them
//! in. (Writing each user at the next user-boundary would double-emit a
//! user whose tweets are not contiguous and silently corrupt the stream.)

use crate::Model;
use ahash::AHashMap;
use anyhow::{Context, Result};
use core_codec::{Reader, Writer};
use core_stream::{DEFAULT_BUFFER_SIZE, RecordKind, RecordReader};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use tracing::info;

impl Model {
    pub fn init_params(
        &mut self,
        tweet_path: &Path,
        user_param_path: &Path,
        tweet_param_path: &Path,
    ) -> Result<()> {
        let topic_num = self.hyper.topic_num;
        let background = self.counts.background();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);

        self.counts.clear();
        let mut user_counts: AHashMap<u32, Vec<u32>> = AHashMap::new();
        let mut user_order: Vec<u32> = Vec::new();

        let mut reader = RecordReader::open(tweet_path, RecordKind::Tweet, DEFAULT_BUFFER_SIZE)?;
        let mut tweet_out = BufWriter::new(
            File::create(tweet_param_path)
                .with_context(|| format!("create {}", tweet_param_path.display()))?,
        );
        let mut tweet_writer = Writer::new();
        let mut tweet_count = 0u64;

        while let Some(range) = reader.next(false)? {
            let mut cursor = Reader::new(&reader.buffer()[range]);
            let user = cursor.read_varint32().expect("tweet record truncated");
            let counts = user_counts.entry(user).or_insert_with(|| {
                user_order.push(user);
                vec![0u32; topic_num]
            });

            let topic = rng.gen_range(0..topic_num);
            counts[topic] += 1;
            tweet_writer.clear();
            tweet_writer.put_varint32(topic as u32);

            let word_count = cursor.read_varint32().expect("tweet record truncated") as usize;
            tweet_writer.put_varint32(word_count as u32);

            let mut base = 0;
            while base < word_count {
                let mut tags: u8 = rng.r#gen();
                if base + 8 > word_count {
                    tags &= (1 << (word_count - base)) - 1;
                }
                tweet_writer.put_u8(tags);
                for bit in 0..8.min(word_count - base) {
                    let word = cursor.read_varint32().expect("tweet record truncated") as usize;
                    if tags & (1 << bit) != 0 {
                        self.counts.increment(topic, word);
                    } else {
                        self.counts.increment(background, word);
                    }
                }
                base += 8;
            }

            tweet_out
                .write_all(tweet_writer.as_slice())
                .with_context(|| format!("write {}", tweet_param_path.display()))?;
            tweet_count += 1;
        }
        tweet_out.flush().context("flush tweet-param output")?;

        let mut user_out = BufWriter::new(
            File::create(user_param_path)
                .with_context(|| format!("create {}", user_param_path.display()))?,
        );
        let mut user_writer = Writer::new();
        for user in &user_order {
            user_writer.clear();
            user_writer.put_varint32(*user);
            user_writer.put_sparse32(&user_counts[user], 0);
            user_out
                .write_all(user_writer.as_slice())
                .with_context(|| format!("write {}", user_param_path.display()))?;
        }
        user_out.flush().context("flush user-param output")?;

        info!(
            target: "model",
            tweets = tweet_count,
            users = user_order.len(),
            seed = self.seed,
            "params_initialized"
        );
        Ok(())
    }
}
