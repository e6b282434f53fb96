//! Twitter-LDA model state and training engine.
//!
//! A [`Model`] owns the hyperparameters, the topic-word sufficient
//! statistics, the demand-loaded per-user topic counts and the worker pool
//! (with one deterministic PRNG and one recycled output buffer per worker).
//! Training streams the tweet buffer and the prior-iteration parameter
//! files through it batch by batch; between iterations the topic-word
//! tensor is the only state that persists in memory, everything else lives
//! in the parameter streams on disk.
//!
//! The sampling math: each tweet by user `u` draws one topic `z` from
//! `P(t) ∝ theta(u,t) * prod_{w in foreground words} phi(t,w)`, then each
//! word independently redraws its foreground/background tag. `theta` and
//! `phi` are posterior means under Dirichlet priors stored "minus one".

pub mod counts;
pub mod dump;
pub mod hyper;
mod infer;
mod init;
mod iterate;
mod sample;
mod topic_param;
pub mod users;

pub use infer::InferMode;

use core_codec::Writer;
use core_pool::Pool;
use counts::TopicCounts;
use hyper::HyperParams;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use sample::SampleScratch;
use std::path::Path;
use users::UserSlots;

pub struct Model {
    hyper: HyperParams,
    counts: TopicCounts,
    users: UserSlots,
    pool: Pool,
    rngs: Vec<ChaCha8Rng>,
    scratches: Vec<SampleScratch>,
    write_bufs: Vec<Writer>,
    seed: u64,
}

impl Model {
    /// A zero-count model. `seed` drives both initialization and the
    /// per-worker sampling PRNGs; a fixed (seed, thread count, input)
    /// triple reproduces byte-identical parameter files.
    pub fn new(hyper: HyperParams, thread_num: usize, seed: u64) -> Self {
        let pool = Pool::new(thread_num);
        let workers = pool.workers();
        let rngs = (0..workers)
            .map(|id| ChaCha8Rng::seed_from_u64(seed.wrapping_add(id as u64 + 1)))
            .collect();
        let scratches = (0..workers)
            .map(|_| SampleScratch::new(hyper.topic_num))
            .collect();
        let write_bufs = (0..workers).map(|_| Writer::new()).collect();
        let counts = TopicCounts::new(hyper.topic_num, hyper.word_num);
        let users = UserSlots::new(hyper.topic_num);
        Self {
            hyper,
            counts,
            users,
            pool,
            rngs,
            scratches,
            write_bufs,
            seed,
        }
    }

    /// Rebuild a model shell from a persisted hyperparameter file
    /// (continued training, inference, dumps).
    pub fn from_hyper_file(
        path: impl AsRef<Path>,
        thread_num: usize,
        seed: u64,
    ) -> anyhow::Result<Self> {
        let hyper = HyperParams::load(path)?;
        Ok(Self::new(hyper, thread_num, seed))
    }

    pub fn hyper(&self) -> &HyperParams {
        &self.hyper
    }

    pub fn counts(&self) -> &TopicCounts {
        &self.counts
    }

    pub fn topic_num(&self) -> usize {
        self.hyper.topic_num
    }

    pub fn word_num(&self) -> usize {
        self.hyper.word_num
    }
}
