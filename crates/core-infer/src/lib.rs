//! Batched inference over raw text against a frozen model.
//!
//! Lines stream through the same fixed-buffer batching the trainer uses;
//! each batch fans out across the worker pool by line count. Workers
//! tokenize against the word dictionary (unknown words are skipped, the
//! optional `user\t` prefix is ignored for scoring but echoed in the
//! output) and score with the model's inference kernel. Output lines keep
//! input order: `topic\tscore\toriginal text`, topic `-1` and score `0`
//! when no word survives tokenization.

use anyhow::{Context, Result};
use core_dict::Dictionary;
use core_model::{InferMode, Model};
use core_pool::{Pool, even_spans};
use core_stream::{RecordKind, RecordReader, text_payload};
use std::fs::File;
use std::io::{BufWriter, Write as _};
use std::path::Path;
use std::time::Instant;
use tracing::info;

pub fn infer_file(
    model: &Model,
    mode: InferMode,
    dictionary: &Dictionary,
    input_path: &Path,
    batch_size: usize,
    output_path: &Path,
    thread_num: usize,
) -> Result<()> {
    let pool = Pool::new(thread_num);
    let mut reader = RecordReader::open(input_path, RecordKind::Text, batch_size)?;
    let mut out = BufWriter::new(
        File::create(output_path).with_context(|| format!("create {}", output_path.display()))?,
    );

    let start = Instant::now();
    let mut processed_lines = 0u64;
    let mut line_spans = Vec::new();
    loop {
        reader.trim();
        line_spans.clear();
        loop {
            let fixed = !line_spans.is_empty();
            match reader.next(fixed)? {
                Some(range) => line_spans.push(range),
                None => break,
            }
        }
        if line_spans.is_empty() {
            break;
        }

        let buffer = reader.buffer();
        let spans = &line_spans;
        let results = pool.run(
            even_spans(line_spans.len(), pool.workers()),
            |_, records| {
                let mut scored = Vec::with_capacity(records.len());
                let mut probs = vec![0.0f64; model.topic_num()];
                for index in records {
                    let line = String::from_utf8_lossy(text_payload(&buffer[spans[index].clone()]));
                    let body = line.split_once('\t').map_or(&*line, |(_, rest)| rest);
                    let words: Vec<u32> = body
                        .split(' ')
                        .filter(|token| !token.is_empty())
                        .filter_map(|token| dictionary.id_of(token))
                        .collect();
                    // A line with no dictionary words has nothing to score.
                    let (topic, score) = if words.is_empty() {
                        (None, 0.0)
                    } else {
                        let topic = model.infer(&words, mode, Some(&mut probs));
                        (topic, topic.map_or(0.0, |t| probs[t]))
                    };
                    scored.push((topic, score));
                }
                scored
            },
        );

        for (&(topic, score), range) in results.iter().flatten().zip(line_spans.iter()) {
            let topic = topic.map_or(-1, |t| t as i64);
            write!(out, "{topic}\t{score:.6}\t")?;
            out.write_all(text_payload(&buffer[range.clone()]))?;
            writeln!(out)?;
        }

        processed_lines += line_spans.len() as u64;
        let elapsed_ms = start.elapsed().as_millis().max(1) as f64;
        print!(
            "\r{:.2}% progress  {:.2}k tweet/sec  {:.1} sec  ",
            reader.position() as f64 * 100.0 / reader.size().max(1) as f64,
            processed_lines as f64 / elapsed_ms,
            elapsed_ms * 0.001
        );
        std::io::stdout().flush().ok();
    }
    out.flush()
        .with_context(|| format!("flush {}", output_path.display()))?;
    println!();
    info!(
        target: "infer",
        lines = processed_lines,
        mode = ?mode,
        "inference_complete"
    );
    Ok(())
}
