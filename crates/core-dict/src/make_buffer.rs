//! The two-pass make-buffer preprocessor.
//!
//! Pass 1 tallies user and word frequencies. The user dictionary is ranked
//! count-descending (stable, so ties keep first-seen order) and cut at the
//! minimum user frequency; stopwords are then removed and the word
//! dictionary ranked and cut the same way. Pass 2 re-reads the corpus and
//! emits one integer tweet record per line that survives: the user must be
//! in the user dictionary and at least one token in the word dictionary.
//! Surviving lines also append their 0-based line number to the tweet-id
//! stream so dump-tweet can label filtered lines later.

use crate::{Summary, load_stopwords, split_user, tokens};
use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use core_codec::Writer;
use core_stream::{DEFAULT_BUFFER_SIZE, RecordKind, RecordReader, text_payload};
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default)]
pub struct MakeBufferOptions {
    pub stopword_path: Option<std::path::PathBuf>,
    pub min_user_freq: u64,
    pub min_word_freq: u64,
}

#[derive(Default)]
struct Tally {
    ids: AHashMap<String, usize>,
    names: Vec<String>,
    counts: Vec<u64>,
}

impl Tally {
    fn bump(&mut self, token: &str) {
        match self.ids.get(token) {
            Some(&index) => self.counts[index] += 1,
            None => {
                self.ids.insert(token.to_string(), self.names.len());
                self.names.push(token.to_string());
                self.counts.push(1);
            }
        }
    }

    /// Rank count-descending (first-seen breaks ties), drop entries below
    /// `min_freq` or in `exclude`, write `name\tcount` lines, and return the
    /// final name→id map.
    fn rank_and_write(
        &self,
        min_freq: u64,
        exclude: &AHashSet<String>,
        path: &Path,
    ) -> Result<AHashMap<String, u32>> {
        let mut order: Vec<usize> = (0..self.names.len())
            .filter(|&i| !exclude.contains(&self.names[i]))
            .collect();
        order.sort_by(|&a, &b| self.counts[b].cmp(&self.counts[a]));

        let mut out = BufWriter::new(
            File::create(path).with_context(|| format!("create {}", path.display()))?,
        );
        let mut ids = AHashMap::new();
        for &index in &order {
            if self.counts[index] < min_freq {
                break;
            }
            writeln!(out, "{}\t{}", self.names[index], self.counts[index])?;
            ids.insert(self.names[index].clone(), ids.len() as u32);
        }
        out.flush()
            .with_context(|| format!("flush {}", path.display()))?;
        Ok(ids)
    }
}

#[allow(clippy::too_many_arguments)]
pub fn make_buffer(
    input_path: &Path,
    buffer_path: &Path,
    user_path: &Path,
    word_path: &Path,
    tweet_id_path: &Path,
    summary_path: &Path,
    options: &MakeBufferOptions,
) -> Result<Summary> {
    let mut reader = RecordReader::open(input_path, RecordKind::Text, DEFAULT_BUFFER_SIZE)?;

    println!("Building mappings...");
    let mut users = Tally::default();
    let mut words = Tally::default();
    while let Some(range) = reader.next(false)? {
        let line = String::from_utf8_lossy(text_payload(&reader.buffer()[range]));
        let (user, rest) = split_user(&line);
        users.bump(user);
        for token in tokens(rest) {
            words.bump(token);
        }
    }

    let no_exclusions = AHashSet::new();
    let user_ids = users.rank_and_write(options.min_user_freq, &no_exclusions, user_path)?;
    println!("{} users", user_ids.len());

    let stopwords = match &options.stopword_path {
        Some(path) => load_stopwords(path)?,
        None => AHashSet::new(),
    };
    let word_ids = words.rank_and_write(options.min_word_freq, &stopwords, word_path)?;
    println!("{} words", word_ids.len());

    println!("Building buffer...");
    reader.reset()?;
    let mut buffer_out = BufWriter::new(
        File::create(buffer_path).with_context(|| format!("create {}", buffer_path.display()))?,
    );
    let mut id_out = BufWriter::new(
        File::create(tweet_id_path)
            .with_context(|| format!("create {}", tweet_id_path.display()))?,
    );
    let mut tweet_writer = Writer::new();
    let mut id_writer = Writer::new();
    let mut word_buffer: Vec<u32> = Vec::new();
    let mut valid_tweet_num = 0u64;
    let mut total_tweet_num = 0u64;

    while let Some(range) = reader.next(false)? {
        let line = String::from_utf8_lossy(text_payload(&reader.buffer()[range]));
        total_tweet_num += 1;

        let (user, rest) = split_user(&line);
        let Some(&user_id) = user_ids.get(user) else {
            continue;
        };
        word_buffer.clear();
        word_buffer.extend(tokens(rest).filter_map(|token| word_ids.get(token).copied()));
        if word_buffer.is_empty() {
            continue;
        }

        tweet_writer.clear();
        tweet_writer.put_varint32(user_id);
        tweet_writer.put_varint32(word_buffer.len() as u32);
        for &word in &word_buffer {
            tweet_writer.put_varint32(word);
        }
        buffer_out
            .write_all(tweet_writer.as_slice())
            .with_context(|| format!("write {}", buffer_path.display()))?;

        id_writer.clear();
        id_writer.put_varint64(total_tweet_num - 1);
        id_out
            .write_all(id_writer.as_slice())
            .with_context(|| format!("write {}", tweet_id_path.display()))?;

        valid_tweet_num += 1;
    }
    buffer_out
        .flush()
        .with_context(|| format!("flush {}", buffer_path.display()))?;
    id_out
        .flush()
        .with_context(|| format!("flush {}", tweet_id_path.display()))?;

    println!("{valid_tweet_num} / {total_tweet_num} tweets");

    let summary = Summary {
        word_num: word_ids.len(),
        user_num: user_ids.len(),
        valid_tweet_num,
        total_tweet_num,
    };
    summary.save(summary_path)?;
    info!(
        target: "dict",
        users = summary.user_num,
        words = summary.word_num,
        valid = valid_tweet_num,
        total = total_tweet_num,
        "buffer_built"
    );
    Ok(summary)
}
