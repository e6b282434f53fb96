//! Buffered segment readers over the on-disk record streams.
//!
//! Every stream is a bare concatenation of records; there are no headers,
//! checksums or length prefixes beyond what the record formats themselves
//! carry. One format per stream:
//!
//! ```text
//! text:        bytes up to \r, \n, \r\n or \n\r
//! tweet:       varint(user) varint(word_count) word_count * varint(word)
//! tweet-param: varint(topic) varint(word_count) ceil(word_count / 8) tag bytes
//! user-param:  varint(user) sparse_array[topic_num]
//! topic-param: sparse_array[word_num]
//! tweet-id:    varint64(id)
//! ```
//!
//! [`RecordReader`] wraps a file and a growable byte buffer and hands out
//! byte ranges of whole records. Ranges index into [`RecordReader::buffer`]
//! and stay valid until the next non-`fixed` [`RecordReader::next`] or
//! [`RecordReader::trim`] call — the orchestrator collects a batch of
//! ranges, samples over the frozen buffer, then trims and moves on.

use anyhow::{Context, Result};
use core_codec::{Reader, get_varint64, sparse_span};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::ops::Range;
use std::path::{Path, PathBuf};
use tracing::warn;

pub const DEFAULT_BUFFER_SIZE: usize = 16 << 20;

/// Segmentation strategy: how to find the end of the next record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Text,
    Tweet,
    TweetParam,
    UserParam { topics: usize },
    TopicParam { words: usize },
    TweetId,
}

impl RecordKind {
    /// Length of the complete record at the head of `data`, or 0 when the
    /// buffered bytes do not yet hold one.
    fn segment(&self, data: &[u8]) -> usize {
        match *self {
            RecordKind::Text => segment_text(data),
            RecordKind::Tweet => segment_tweet(data),
            RecordKind::TweetParam => segment_tweet_param(data),
            RecordKind::UserParam { topics } => segment_user_param(data, topics),
            RecordKind::TopicParam { words } => sparse_span(data, words).unwrap_or(0),
            RecordKind::TweetId => match get_varint64(data) {
                Ok((_, read)) => read,
                Err(_) => 0,
            },
        }
    }
}

fn segment_text(data: &[u8]) -> usize {
    let Some(end) = data.iter().position(|&b| b == b'\r' || b == b'\n') else {
        return 0;
    };
    // A \r\n or \n\r pair is one terminator; two equal bytes are two lines.
    if data.get(end + 1).is_some_and(|&b| b != data[end] && (b == b'\r' || b == b'\n')) {
        end + 2
    } else {
        end + 1
    }
}

fn segment_tweet(data: &[u8]) -> usize {
    let mut reader = Reader::new(data);
    let Ok(_user) = reader.read_varint32() else {
        return 0;
    };
    let Ok(count) = reader.read_varint32() else {
        return 0;
    };
    for _ in 0..count {
        if reader.read_varint32().is_err() {
            return 0;
        }
    }
    reader.offset()
}

fn segment_tweet_param(data: &[u8]) -> usize {
    let mut reader = Reader::new(data);
    let Ok(_topic) = reader.read_varint32() else {
        return 0;
    };
    let Ok(count) = reader.read_varint32() else {
        return 0;
    };
    let tag_bytes = (count as usize + 7) / 8;
    if reader.offset() + tag_bytes > data.len() {
        return 0;
    }
    reader.offset() + tag_bytes
}

fn segment_user_param(data: &[u8], topics: usize) -> usize {
    let mut reader = Reader::new(data);
    let Ok(_user) = reader.read_varint32() else {
        return 0;
    };
    match sparse_span(&data[reader.offset()..], topics) {
        Ok(span) => reader.offset() + span,
        Err(_) => 0,
    }
}

/// Payload of a text record: the bytes before the line terminator.
pub fn text_payload(record: &[u8]) -> &[u8] {
    match record.iter().position(|&b| b == b'\r' || b == b'\n') {
        Some(end) => &record[..end],
        None => record,
    }
}

pub struct RecordReader {
    file: File,
    path: PathBuf,
    kind: RecordKind,
    buf: Vec<u8>,
    start: usize,
    len: usize,
    position: u64,
    size: u64,
    trailing_logged: bool,
}

impl RecordReader {
    pub fn open(path: impl AsRef<Path>, kind: RecordKind, buffer_size: usize) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file =
            File::open(&path).with_context(|| format!("open {} for reading", path.display()))?;
        let size = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        Ok(Self {
            file,
            path,
            kind,
            buf: vec![0; buffer_size.max(1)],
            start: 0,
            len: 0,
            position: 0,
            size,
            trailing_logged: false,
        })
    }

    pub fn with_default_buffer(path: impl AsRef<Path>, kind: RecordKind) -> Result<Self> {
        Self::open(path, kind, DEFAULT_BUFFER_SIZE)
    }

    /// Byte range of the next complete record, `Ok(None)` at end of file.
    ///
    /// With `fixed = true` no I/O happens: `Ok(None)` means the buffered
    /// bytes hold no further complete record (batch-full). With
    /// `fixed = false` the reader refills from the file, doubling the buffer
    /// until any single record fits; previously returned ranges are
    /// invalidated by the refill.
    pub fn next(&mut self, fixed: bool) -> Result<Option<Range<usize>>> {
        let found = self.kind.segment(&self.buf[self.start..self.start + self.len]);
        if found > 0 {
            return Ok(Some(self.consume(found)));
        }
        if fixed {
            return Ok(None);
        }

        self.trim();
        loop {
            let space = self.buf.len() - self.len;
            let read = read_full(&mut self.file, &mut self.buf[self.len..])
                .with_context(|| format!("read {}", self.path.display()))?;
            self.len += read;
            if read == 0 || self.len < self.buf.len() {
                // End of file is within this window; either a record
                // completes here or the trailing bytes never will.
                let found = self.kind.segment(&self.buf[..self.len]);
                if found > 0 {
                    return Ok(Some(self.consume(found)));
                }
                if read < space {
                    if self.len > 0 && !self.trailing_logged {
                        self.trailing_logged = true;
                        warn!(
                            target: "stream",
                            path = %self.path.display(),
                            trailing = self.len,
                            "trailing_bytes_never_formed_a_record"
                        );
                    }
                    return Ok(None);
                }
                continue;
            }
            let found = self.kind.segment(&self.buf[..self.len]);
            if found > 0 {
                return Ok(Some(self.consume(found)));
            }
            // One record larger than the whole buffer; double it.
            let doubled = self.buf.len() * 2;
            self.buf.resize(doubled, 0);
        }
    }

    fn consume(&mut self, found: usize) -> Range<usize> {
        let range = self.start..self.start + found;
        self.start += found;
        self.len -= found;
        self.position += found as u64;
        range
    }

    /// Return the most recently returned record to the buffer. Succeeds only
    /// when `range` is exactly the last region handed out.
    pub fn unget(&mut self, range: Range<usize>) -> bool {
        if range.end != self.start {
            return false;
        }
        self.start = range.start;
        self.len += range.len();
        self.position -= range.len() as u64;
        true
    }

    /// Shift unread bytes to the buffer start, freeing room for refills.
    /// Invalidates previously returned ranges.
    pub fn trim(&mut self) {
        self.buf.copy_within(self.start..self.start + self.len, 0);
        self.start = 0;
    }

    /// Rewind to the start of the file, discarding buffered bytes.
    pub fn reset(&mut self) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .with_context(|| format!("rewind {}", self.path.display()))?;
        self.start = 0;
        self.len = 0;
        self.position = 0;
        Ok(())
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buf
    }

    /// Bytes consumed so far, for progress reporting.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Total file size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_full(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0usize;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_codec::Writer;
    use std::io::Write as _;
    use tempfile::NamedTempFile;

    fn tweet_record(writer: &mut Writer, user: u32, words: &[u32]) {
        writer.put_varint32(user);
        writer.put_varint32(words.len() as u32);
        for &w in words {
            writer.put_varint32(w);
        }
    }

    fn temp_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn yields_each_record_then_end_of_file() {
        let mut writer = Writer::new();
        tweet_record(&mut writer, 0, &[1, 2, 3]);
        tweet_record(&mut writer, 1, &[300]);
        tweet_record(&mut writer, 0, &[]);
        let file = temp_with(writer.as_slice());

        let mut reader = RecordReader::open(file.path(), RecordKind::Tweet, 64).unwrap();
        let mut seen = 0;
        let mut last_position = 0;
        while let Some(range) = reader.next(false).unwrap() {
            assert!(!range.is_empty());
            assert!(reader.position() > last_position);
            last_position = reader.position();
            seen += 1;
        }
        assert_eq!(seen, 3);
        assert_eq!(reader.position(), reader.size());
        assert!(reader.next(false).unwrap().is_none());
    }

    #[test]
    fn unget_restores_the_last_record_only() {
        let mut writer = Writer::new();
        tweet_record(&mut writer, 7, &[9]);
        tweet_record(&mut writer, 8, &[10, 11]);
        let file = temp_with(writer.as_slice());

        let mut reader = RecordReader::open(file.path(), RecordKind::Tweet, 64).unwrap();
        let first = reader.next(false).unwrap().unwrap();
        let second = reader.next(false).unwrap().unwrap();
        let position = reader.position();

        assert!(!reader.unget(first.clone()), "stale range must be refused");
        assert!(reader.unget(second.clone()));
        assert_eq!(reader.position(), position - second.len() as u64);
        assert_eq!(reader.next(false).unwrap().unwrap(), second);
        assert!(reader.next(false).unwrap().is_none());
    }

    #[test]
    fn oversized_record_grows_the_buffer() {
        let words: Vec<u32> = (0..200).collect();
        let mut writer = Writer::new();
        tweet_record(&mut writer, 3, &words);
        let file = temp_with(writer.as_slice());

        let mut reader = RecordReader::open(file.path(), RecordKind::Tweet, 4).unwrap();
        let range = reader.next(false).unwrap().unwrap();
        assert_eq!(range.len() as u64, reader.size());

        let mut cursor = Reader::new(&reader.buffer()[range]);
        assert_eq!(cursor.read_varint32().unwrap(), 3);
        assert_eq!(cursor.read_varint32().unwrap(), 200);
    }

    #[test]
    fn fixed_mode_stops_at_batch_full_without_losing_records() {
        let mut writer = Writer::new();
        for user in 0..6u32 {
            tweet_record(&mut writer, user, &[user + 100, user + 200]);
        }
        let record_len = writer.len() / 6;
        let file = temp_with(writer.as_slice());

        // Room for exactly three whole records.
        let mut reader =
            RecordReader::open(file.path(), RecordKind::Tweet, record_len * 3).unwrap();
        let mut users = Vec::new();
        loop {
            reader.trim();
            let first = match reader.next(false).unwrap() {
                Some(range) => range,
                None => break,
            };
            let mut batch = vec![first];
            while let Some(range) = reader.next(true).unwrap() {
                batch.push(range);
            }
            assert!(batch.len() <= 3);
            for range in batch {
                let mut cursor = Reader::new(&reader.buffer()[range]);
                users.push(cursor.read_varint32().unwrap());
            }
        }
        assert_eq!(users, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn text_lines_with_mixed_terminators() {
        let file = temp_with(b"alpha\nbeta\r\ngamma\n\rdelta\r");
        let mut reader = RecordReader::open(file.path(), RecordKind::Text, 8).unwrap();
        let mut lines = Vec::new();
        while let Some(range) = reader.next(false).unwrap() {
            lines.push(String::from_utf8(text_payload(&reader.buffer()[range]).to_vec()).unwrap());
        }
        assert_eq!(lines, vec!["alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn unterminated_final_line_is_dropped() {
        let file = temp_with(b"kept\nlost-no-terminator");
        let mut reader = RecordReader::open(file.path(), RecordKind::Text, 64).unwrap();
        let range = reader.next(false).unwrap().unwrap();
        assert_eq!(text_payload(&reader.buffer()[range]), b"kept");
        assert!(reader.next(false).unwrap().is_none());
    }

    #[test]
    fn empty_lines_are_records() {
        let file = temp_with(b"\n\nx\n");
        let mut reader = RecordReader::open(file.path(), RecordKind::Text, 64).unwrap();
        let mut lines = Vec::new();
        while let Some(range) = reader.next(false).unwrap() {
            lines.push(text_payload(&reader.buffer()[range]).to_vec());
        }
        assert_eq!(lines, vec![b"".to_vec(), b"".to_vec(), b"x".to_vec()]);
    }

    #[test]
    fn user_param_records_segment_over_sparse_arrays() {
        let mut writer = Writer::new();
        writer.put_varint32(42);
        writer.put_sparse32(&[0, 5, 0, 0, 9, 0, 0, 0], 0);
        writer.put_varint32(43);
        writer.put_sparse32(&[0; 8], 0);
        let file = temp_with(writer.as_slice());

        let mut reader =
            RecordReader::open(file.path(), RecordKind::UserParam { topics: 8 }, 16).unwrap();
        let first = reader.next(false).unwrap().unwrap();
        let mut cursor = Reader::new(&reader.buffer()[first]);
        assert_eq!(cursor.read_varint32().unwrap(), 42);
        let mut counts = [0u32; 8];
        cursor.read_sparse32(&mut counts).unwrap();
        assert_eq!(counts, [0, 5, 0, 0, 9, 0, 0, 0]);

        let second = reader.next(false).unwrap().unwrap();
        let mut cursor = Reader::new(&reader.buffer()[second]);
        assert_eq!(cursor.read_varint32().unwrap(), 43);
        assert!(reader.next(false).unwrap().is_none());
    }

    #[test]
    fn tweet_param_records_include_tag_bytes() {
        let mut writer = Writer::new();
        writer.put_varint32(2); // topic
        writer.put_varint32(11); // word count -> 2 tag bytes
        writer.put_u8(0b1010_1010);
        writer.put_u8(0b0000_0101);
        let file = temp_with(writer.as_slice());

        let mut reader = RecordReader::open(file.path(), RecordKind::TweetParam, 64).unwrap();
        let range = reader.next(false).unwrap().unwrap();
        assert_eq!(range.len() as u64, reader.size());
        assert!(reader.next(false).unwrap().is_none());
    }

    #[test]
    fn reset_rewinds_to_the_first_record() {
        let mut writer = Writer::new();
        writer.put_varint64(1_000_000);
        writer.put_varint64(2);
        let file = temp_with(writer.as_slice());

        let mut reader = RecordReader::open(file.path(), RecordKind::TweetId, 64).unwrap();
        let first = reader.next(false).unwrap().unwrap();
        let first_bytes = reader.buffer()[first].to_vec();
        while reader.next(false).unwrap().is_some() {}
        reader.reset().unwrap();
        assert_eq!(reader.position(), 0);
        let again = reader.next(false).unwrap().unwrap();
        assert_eq!(reader.buffer()[again].to_vec(), first_bytes);
    }
}
