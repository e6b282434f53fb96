//! Human-readable listings of a trained model.
//!
//! Dictionaries are injected as string tables (loaded by the caller from the
//! make-buffer `.word.txt` / `.user.txt` files); these functions only walk
//! the binary parameter streams and format lines. Orderings are
//! count-descending with first-seen tie-breaking so repeated dumps of one
//! model are byte-identical.

use crate::counts::TopicCounts;
use anyhow::{Context, Result, bail, ensure};
use core_codec::Reader;
use core_stream::{DEFAULT_BUFFER_SIZE, RecordKind, RecordReader, text_payload};
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;

/// `topic\tword count\tword count…` per topic, the background row last.
pub fn dump_topics(counts: &TopicCounts, words: &[String], output_path: &Path) -> Result<()> {
    ensure!(
        words.len() == counts.words(),
        "word dictionary has {} entries but the model was trained over {}",
        words.len(),
        counts.words()
    );
    let mut out = BufWriter::new(
        File::create(output_path).with_context(|| format!("create {}", output_path.display()))?,
    );
    let mut order: Vec<usize> = (0..counts.words()).collect();
    for topic in 0..=counts.topics() {
        let row = counts.row(topic);
        order.sort_by(|&a, &b| row[b].cmp(&row[a]));
        write!(out, "{topic}")?;
        for &word in &order {
            if row[word] == 0 {
                break;
            }
            write!(out, "\t{} {}", words[word], row[word])?;
        }
        writeln!(out)?;
        order.sort_unstable();
    }
    out.flush()
        .with_context(|| format!("flush {}", output_path.display()))
}

/// `user\ttopic count\ttopic count…` per user-param record.
pub fn dump_users(
    topic_num: usize,
    user_param_path: &Path,
    users: &[String],
    output_path: &Path,
) -> Result<()> {
    let mut reader = RecordReader::open(
        user_param_path,
        RecordKind::UserParam { topics: topic_num },
        DEFAULT_BUFFER_SIZE,
    )?;
    let mut out = BufWriter::new(
        File::create(output_path).with_context(|| format!("create {}", output_path.display()))?,
    );
    let mut topic_counts = vec![0u32; topic_num];
    let mut order: Vec<usize> = (0..topic_num).collect();
    while let Some(record) = reader.next(false)? {
        let mut cursor = Reader::new(&reader.buffer()[record]);
        let user = cursor.read_varint32().expect("user-param record truncated") as usize;
        cursor
            .read_sparse32(&mut topic_counts)
            .expect("user-param record truncated");
        let Some(name) = users.get(user) else {
            bail!("user id {user} outside the {}-entry dictionary", users.len());
        };
        order.sort_by(|&a, &b| topic_counts[b].cmp(&topic_counts[a]));
        write!(out, "{name}")?;
        for &topic in &order {
            if topic_counts[topic] == 0 {
                break;
            }
            write!(out, "\t{topic} {}", topic_counts[topic])?;
        }
        writeln!(out)?;
        order.sort_unstable();
    }
    out.flush()
        .with_context(|| format!("flush {}", output_path.display()))
}

/// `topic\toriginal text` per input line, `-1` for lines make-buffer
/// filtered out. The tweet-id stream maps surviving tweet-param records back
/// to input line numbers.
pub fn dump_tweets(
    tweet_param_path: &Path,
    input_text_path: &Path,
    tweet_id_path: &Path,
    output_path: &Path,
) -> Result<()> {
    let mut param_reader =
        RecordReader::open(tweet_param_path, RecordKind::TweetParam, DEFAULT_BUFFER_SIZE)?;
    let mut text_reader =
        RecordReader::open(input_text_path, RecordKind::Text, DEFAULT_BUFFER_SIZE)?;
    let mut id_reader = RecordReader::open(tweet_id_path, RecordKind::TweetId, DEFAULT_BUFFER_SIZE)?;
    let mut out = BufWriter::new(
        File::create(output_path).with_context(|| format!("create {}", output_path.display()))?,
    );

    let mut lines_emitted = 0u64;
    loop {
        let param_record = param_reader.next(false)?;
        let id_record = id_reader.next(false)?;
        let (param_record, id_record) = match (param_record, id_record) {
            (None, None) => break,
            (Some(p), Some(i)) => (p, i),
            _ => bail!(
                "{} and {} hold different record counts",
                tweet_param_path.display(),
                tweet_id_path.display()
            ),
        };
        let topic = Reader::new(&param_reader.buffer()[param_record])
            .read_varint32()
            .expect("tweet-param record truncated") as i64;
        let tweet_id = Reader::new(&id_reader.buffer()[id_record])
            .read_varint64()
            .expect("tweet-id record truncated");

        while lines_emitted <= tweet_id {
            let Some(line) = text_reader.next(false)? else {
                bail!(
                    "{} ended before line {tweet_id} named in {}",
                    input_text_path.display(),
                    tweet_id_path.display()
                );
            };
            lines_emitted += 1;
            let text = text_payload(&text_reader.buffer()[line]);
            let label = if lines_emitted == tweet_id + 1 { topic } else { -1 };
            write!(out, "{label}\t")?;
            out.write_all(text)?;
            writeln!(out)?;
        }
    }
    out.flush()
        .with_context(|| format!("flush {}", output_path.display()))
}
