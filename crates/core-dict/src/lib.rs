//! Dictionaries and the make-buffer preprocessor.
//!
//! make-buffer turns a raw text corpus (one tweet per line, optional
//! `user\t` prefix, space-separated tokens) into the compact artifacts the
//! trainer streams: an integer tweet buffer, a tweet-id stream mapping
//! surviving records back to input line numbers, the two text dictionaries
//! and a `key=value` summary.

mod make_buffer;

pub use make_buffer::{MakeBufferOptions, make_buffer};

use ahash::{AHashMap, AHashSet};
use anyhow::{Context, Result};
use core_stream::{DEFAULT_BUFFER_SIZE, RecordKind, RecordReader, text_payload};
use std::fmt::Write as _;
use std::path::Path;

/// User whose tweets carry no `user\t` prefix.
pub const DEFAULT_USER: &str = "*";

/// A persisted string↔id dictionary. Ids are line numbers of the
/// `name\tcount` file, which make-buffer writes in count-descending order.
pub struct Dictionary {
    names: Vec<String>,
    ids: AHashMap<String, u32>,
}

impl Dictionary {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = RecordReader::open(path, RecordKind::Text, DEFAULT_BUFFER_SIZE)?;
        let mut names = Vec::new();
        let mut ids = AHashMap::new();
        while let Some(range) = reader.next(false)? {
            let line = String::from_utf8_lossy(text_payload(&reader.buffer()[range]));
            let name = match line.split_once('\t') {
                Some((name, _count)) => name.to_string(),
                None => line.into_owned(),
            };
            ids.insert(name.clone(), names.len() as u32);
            names.push(name);
        }
        Ok(Self { names, ids })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.ids.get(name).copied()
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.names.get(id as usize).map(String::as_str)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }
}

/// One stopword per line; matched exactly against tokens.
pub fn load_stopwords(path: impl AsRef<Path>) -> Result<AHashSet<String>> {
    let path = path.as_ref();
    let mut reader = RecordReader::open(path, RecordKind::Text, DEFAULT_BUFFER_SIZE)?;
    let mut stopwords = AHashSet::new();
    while let Some(range) = reader.next(false)? {
        let word = String::from_utf8_lossy(text_payload(&reader.buffer()[range]));
        if !word.is_empty() {
            stopwords.insert(word.into_owned());
        }
    }
    Ok(stopwords)
}

/// The bookkeeping make-buffer leaves behind: dictionary sizes and how many
/// input lines survived filtering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub word_num: usize,
    pub user_num: usize,
    pub valid_tweet_num: u64,
    pub total_tweet_num: u64,
}

impl Summary {
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut text = String::new();
        let _ = writeln!(text, "word_num={}", self.word_num);
        let _ = writeln!(text, "user_num={}", self.user_num);
        let _ = writeln!(text, "valid_tweet_num={}", self.valid_tweet_num);
        let _ = writeln!(text, "total_tweet_num={}", self.total_tweet_num);
        std::fs::write(path, text).with_context(|| format!("write {}", path.display()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("open {} for reading", path.display()))?;
        let mut fields: AHashMap<&str, &str> = AHashMap::new();
        for line in content.lines() {
            if let Some((key, value)) = line.split_once('=') {
                fields.insert(key, value);
            }
        }
        Ok(Self {
            word_num: require(&fields, path, "word_num")?,
            user_num: require(&fields, path, "user_num")?,
            valid_tweet_num: require(&fields, path, "valid_tweet_num")?,
            total_tweet_num: require(&fields, path, "total_tweet_num")?,
        })
    }
}

fn require<T: std::str::FromStr>(
    fields: &AHashMap<&str, &str>,
    path: &Path,
    key: &str,
) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    fields
        .get(key)
        .with_context(|| format!("{}: missing key {key}", path.display()))?
        .trim()
        .parse()
        .with_context(|| format!("{}: invalid value for {key}", path.display()))
}

/// Split a corpus line into its user (defaulting to [`DEFAULT_USER`]) and
/// the token remainder.
pub(crate) fn split_user(line: &str) -> (&str, &str) {
    match line.split_once('\t') {
        Some((user, rest)) => (user, rest),
        None => (DEFAULT_USER, line),
    }
}

pub(crate) fn tokens(rest: &str) -> impl Iterator<Item = &str> {
    rest.split(' ').filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dictionary_ids_follow_file_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.word.txt");
        std::fs::write(&path, "the\t100\ncat\t40\nsat\t12\n").unwrap();
        let dict = Dictionary::load(&path).unwrap();
        assert_eq!(dict.len(), 3);
        assert_eq!(dict.id_of("the"), Some(0));
        assert_eq!(dict.id_of("sat"), Some(2));
        assert_eq!(dict.id_of("dog"), None);
        assert_eq!(dict.name(1), Some("cat"));
    }

    #[test]
    fn summary_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.summary.txt");
        let summary = Summary {
            word_num: 17,
            user_num: 3,
            valid_tweet_num: 40,
            total_tweet_num: 45,
        };
        summary.save(&path).unwrap();
        assert_eq!(Summary::load(&path).unwrap(), summary);
    }

    #[test]
    fn split_user_defaults_to_star() {
        assert_eq!(split_user("alice\tx y"), ("alice", "x y"));
        assert_eq!(split_user("x y"), (DEFAULT_USER, "x y"));
        assert_eq!(split_user(""), (DEFAULT_USER, ""));
    }

    #[test]
    fn tokens_skip_runs_of_spaces() {
        let collected: Vec<&str> = tokens("a  b   c ").collect();
        assert_eq!(collected, vec!["a", "b", "c"]);
        assert_eq!(tokens("").count(), 0);
    }

    #[test]
    fn stopwords_load_one_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stop.txt");
        std::fs::write(&path, "the\na\n\nof\n").unwrap();
        let stopwords = load_stopwords(&path).unwrap();
        assert_eq!(stopwords.len(), 3);
        assert!(stopwords.contains("the"));
        assert!(!stopwords.contains(""));
    }
}
