//! One training iteration: the batch orchestrator.
//!
//! The tweet buffer and the prior tweet-param stream advance in lockstep;
//! they must end on the same record boundary. User params are demand-loaded
//! the first time a user appears — the user-param stream is ordered by first
//! appearance, which the flush protocol preserves, so a plain sequential
//! read suffices. The batch is partitioned into contiguous per-worker spans
//! by record count, sampled against frozen counts, and the orchestrator then
//! replays every old→new assignment difference into the shared tensors in
//! original buffer order. Completed users flush at each batch boundary; only
//! the user whose tweets may continue into the next batch is retained.

use crate::Model;
use crate::sample::sample_span;
use anyhow::{Context, Result};
use core_codec::{Reader, Writer, get_varint32};
use core_pool::even_spans;
use core_stream::{RecordKind, RecordReader};
use rand_chacha::ChaCha8Rng;
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::ops::Range;
use std::path::Path;
use std::time::Instant;
use tracing::info;

struct WorkerCtx<'a> {
    rng: &'a mut ChaCha8Rng,
    scratch: &'a mut crate::sample::SampleScratch,
    out: Writer,
    tweet_bytes: &'a [u8],
    prior_bytes: &'a [u8],
}

fn span_bytes<'a>(buf: &'a [u8], spans: &[Range<usize>], records: &Range<usize>) -> &'a [u8] {
    if records.is_empty() {
        return &[];
    }
    &buf[spans[records.start].start..spans[records.end - 1].end]
}

impl Model {
    /// Sweep the whole tweet buffer once, reading the previous iteration's
    /// parameters and writing the next ones. Returns the fraction of words
    /// whose tag or topic changed — a crude convergence signal.
    pub fn iterate(
        &mut self,
        tweet_path: &Path,
        batch_size: usize,
        input_user_path: &Path,
        input_tweet_param_path: &Path,
        output_user_path: &Path,
        output_tweet_param_path: &Path,
    ) -> Result<f64> {
        let hyper = &self.hyper;
        let pool = &self.pool;
        let counts = &mut self.counts;
        let users = &mut self.users;
        let rngs = &mut self.rngs;
        let scratches = &mut self.scratches;
        let write_bufs = &mut self.write_bufs;

        let mut tweet_reader = RecordReader::open(tweet_path, RecordKind::Tweet, batch_size)?;
        let mut prior_reader =
            RecordReader::open(input_tweet_param_path, RecordKind::TweetParam, batch_size)?;
        let mut user_reader = RecordReader::with_default_buffer(
            input_user_path,
            RecordKind::UserParam {
                topics: hyper.topic_num,
            },
        )?;
        let mut user_out = BufWriter::new(
            File::create(output_user_path)
                .with_context(|| format!("create {}", output_user_path.display()))?,
        );
        let mut tweet_out = BufWriter::new(
            File::create(output_tweet_param_path)
                .with_context(|| format!("create {}", output_tweet_param_path.display()))?,
        );

        users.clear();
        let mut tweet_spans: Vec<Range<usize>> = Vec::new();
        let mut prior_spans: Vec<Range<usize>> = Vec::new();
        let mut user_param_writer = Writer::new();
        let mut processed_words = 0u64;
        let mut updated_words = 0u64;
        let start = Instant::now();

        loop {
            tweet_reader.trim();
            prior_reader.trim();
            tweet_spans.clear();
            prior_spans.clear();

            // Assemble a batch: lockstep pulls until the tweet buffer fills.
            loop {
                let (tweet_span, prior_span) = if tweet_spans.is_empty() {
                    match (tweet_reader.next(false)?, prior_reader.next(false)?) {
                        (None, None) => break,
                        (Some(t), Some(p)) => (t, p),
                        (t, p) => panic!(
                            "tweet and tweet-param streams end on different record boundaries \
                             (tweet record: {}, param record: {})",
                            t.is_some(),
                            p.is_some()
                        ),
                    }
                } else {
                    let Some(tweet_span) = tweet_reader.next(true)? else {
                        break;
                    };
                    match prior_reader.next(true)? {
                        Some(prior_span) => (tweet_span, prior_span),
                        None => {
                            let restored = tweet_reader.unget(tweet_span);
                            debug_assert!(restored, "unget of the just-read record");
                            break;
                        }
                    }
                };

                let (user, _) = get_varint32(&tweet_reader.buffer()[tweet_span.clone()])
                    .expect("tweet record starts with its user id");
                if users.slot_of(user).is_none() {
                    let record = user_reader.next(false)?.unwrap_or_else(|| {
                        panic!("user-param stream exhausted before user {user}")
                    });
                    let mut cursor = Reader::new(&user_reader.buffer()[record]);
                    let param_user = cursor.read_varint32().expect("user-param record truncated");
                    assert_eq!(
                        param_user, user,
                        "user-param stream out of order with the tweet buffer"
                    );
                    let slot = users.insert(user);
                    cursor
                        .read_sparse32(users.counts_mut(slot))
                        .expect("user-param record truncated");
                    users.recompute_total(slot);
                }

                tweet_spans.push(tweet_span);
                prior_spans.push(prior_span);
            }

            if tweet_spans.is_empty() {
                break;
            }

            // Fan out: contiguous record spans, frozen counts, private
            // output buffers.
            let record_spans = even_spans(tweet_spans.len(), pool.workers());
            let tweet_buf = tweet_reader.buffer();
            let prior_buf = prior_reader.buffer();
            let counts_view = &*counts;
            let users_view = &*users;

            let mut contexts = Vec::with_capacity(pool.workers());
            for (((rng, scratch), buf), records) in rngs
                .iter_mut()
                .zip(scratches.iter_mut())
                .zip(write_bufs.iter_mut())
                .zip(record_spans.iter())
            {
                let mut out = std::mem::take(buf);
                out.clear();
                contexts.push(WorkerCtx {
                    rng,
                    scratch,
                    out,
                    tweet_bytes: span_bytes(tweet_buf, &tweet_spans, records),
                    prior_bytes: span_bytes(prior_buf, &prior_spans, records),
                });
            }

            let outputs = pool.run(contexts, |_, mut ctx| {
                sample_span(
                    hyper,
                    counts_view,
                    users_view,
                    ctx.tweet_bytes,
                    ctx.prior_bytes,
                    ctx.rng,
                    ctx.scratch,
                    &mut ctx.out,
                );
                ctx.out
            });

            // Reconcile: replay old→new deltas in original buffer order and
            // stream the new tweet-params out.
            for (worker, records) in record_spans.iter().enumerate() {
                let new_params = &outputs[worker];
                tweet_out
                    .write_all(new_params.as_slice())
                    .with_context(|| format!("write {}", output_tweet_param_path.display()))?;

                let mut tweet_cur = Reader::new(span_bytes(tweet_buf, &tweet_spans, records));
                let mut prior_cur = Reader::new(span_bytes(prior_buf, &prior_spans, records));
                let mut new_cur = Reader::new(new_params.as_slice());
                let background = counts.background();

                while !tweet_cur.is_empty() {
                    let user = tweet_cur.read_varint32().expect("tweet record truncated");
                    let slot = users
                        .slot_of(user)
                        .unwrap_or_else(|| panic!("user {user} vanished before reconciliation"));
                    let word_count =
                        tweet_cur.read_varint32().expect("tweet record truncated") as usize;
                    processed_words += word_count as u64;

                    let prev_topic =
                        prior_cur.read_varint32().expect("prior param truncated") as usize;
                    let prev_word_count =
                        prior_cur.read_varint32().expect("prior param truncated") as usize;
                    assert_eq!(
                        word_count, prev_word_count,
                        "tweet and prior param word counts disagree"
                    );
                    let new_topic = new_cur.read_varint32().expect("new param truncated") as usize;
                    let new_word_count =
                        new_cur.read_varint32().expect("new param truncated") as usize;
                    assert_eq!(
                        word_count, new_word_count,
                        "tweet and new param word counts disagree"
                    );

                    users.reassign(slot, prev_topic, new_topic);

                    let mut base = 0;
                    while base < word_count {
                        let prev_tag = prior_cur.read_u8().expect("prior tag bytes truncated");
                        let new_tag = new_cur.read_u8().expect("new tag bytes truncated");
                        for bit in 0..8.min(word_count - base) {
                            let word =
                                tweet_cur.read_varint32().expect("tweet record truncated") as usize;
                            let prev_set = prev_tag & (1 << bit) != 0;
                            let new_set = new_tag & (1 << bit) != 0;
                            let old_row = if prev_set { prev_topic } else { background };
                            let new_row = if new_set { new_topic } else { background };
                            counts.decrement(old_row, word);
                            counts.increment(new_row, word);
                            if prev_set != new_set
                                || (prev_set && new_set && prev_topic != new_topic)
                            {
                                updated_words += 1;
                            }
                        }
                        base += 8;
                    }
                }
            }

            for (buf, out) in write_bufs.iter_mut().zip(outputs) {
                *buf = out;
            }

            // Flush completed users; the straggler may continue next batch.
            user_param_writer.clear();
            users.flush_completed(|user, counts| {
                user_param_writer.put_varint32(user);
                user_param_writer.put_sparse32(counts, 0);
            });
            user_out
                .write_all(user_param_writer.as_slice())
                .with_context(|| format!("write {}", output_user_path.display()))?;

            let elapsed_ms = start.elapsed().as_millis().max(1) as f64;
            print!(
                "\r{:.2}% progress  {:.4} update/word  {:.2}k word/sec  {:.1} sec  ",
                tweet_reader.position() as f64 * 100.0 / tweet_reader.size().max(1) as f64,
                updated_words as f64 / processed_words.max(1) as f64,
                processed_words as f64 / elapsed_ms,
                elapsed_ms * 0.001
            );
            std::io::stdout().flush().ok();
        }

        user_param_writer.clear();
        users.drain_all(|user, counts| {
            user_param_writer.put_varint32(user);
            user_param_writer.put_sparse32(counts, 0);
        });
        user_out
            .write_all(user_param_writer.as_slice())
            .with_context(|| format!("write {}", output_user_path.display()))?;
        user_out.flush().context("flush user-param output")?;
        tweet_out.flush().context("flush tweet-param output")?;

        println!();
        let update_ratio = if processed_words == 0 {
            0.0
        } else {
            updated_words as f64 / processed_words as f64
        };
        info!(
            target: "model.iterate",
            processed_words,
            updated_words,
            update_ratio,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "iteration_complete"
        );
        Ok(update_ratio)
    }
}
