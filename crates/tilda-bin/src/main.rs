//! tilda entrypoint: subcommand dispatch for the Twitter-LDA pipeline.

use anyhow::{Context, Result, ensure};
use clap::{Args, Parser, Subcommand};
use core_config::{Config, defaults};
use core_dict::{Dictionary, MakeBufferOptions, Summary};
use core_model::hyper::HyperParams;
use core_model::{InferMode, Model, dump};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Once;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;

/// CLI arguments.
#[derive(Parser, Debug)]
#[command(name = "tilda", version, about = "Twitter-LDA topic model trainer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Optional configuration file path (overrides discovery of `tilda.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a text corpus to the binary tweet buffer and dictionaries.
    MakeBuffer(MakeBufferArgs),
    /// Train a fresh model.
    Train(TrainArgs),
    /// Continue training from existing parameter files.
    TrainCont(TrainContArgs),
    /// Infer the top topic per input tweet by posterior probability.
    InferProb(InferArgs),
    /// Infer the top topic per input tweet by mean smoothed word count.
    InferScore(InferArgs),
    /// Dump the topic-word distribution as text.
    DumpTopic(DumpArgs),
    /// Dump the user-topic distribution as text.
    DumpUser(DumpArgs),
    /// Dump the topic of every input tweet as text.
    DumpTweet(DumpTweetArgs),
}

#[derive(Args, Debug)]
struct MakeBufferArgs {
    /// Input tweet text file.
    #[arg(long)]
    input: PathBuf,
    /// Path prefix of the buffer files to write.
    #[arg(long)]
    buffer: String,
    /// Stopwords list file.
    #[arg(long)]
    stopword: Option<PathBuf>,
    /// Minimum user frequency (default 1).
    #[arg(long)]
    user_freq: Option<u64>,
    /// Minimum word frequency (default 1).
    #[arg(long)]
    word_freq: Option<u64>,
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// Path prefix of the buffer files.
    #[arg(long)]
    buffer: String,
    /// Path prefix of the output parameter files.
    #[arg(long)]
    output_param: String,
    /// Hyperparameter file to write.
    #[arg(long)]
    hyper_param: PathBuf,
    /// Number of topics (default 100).
    #[arg(long)]
    topic: Option<usize>,
    #[command(flatten)]
    knobs: TrainKnobs,
    /// Alpha minus one (default 0.5).
    #[arg(long)]
    alpha_m1: Option<f64>,
    /// Beta minus one (default 0.01).
    #[arg(long)]
    beta_m1: Option<f64>,
    /// Background beta minus one (default 0.1).
    #[arg(long)]
    beta_bg_m1: Option<f64>,
    /// Gamma minus one (default 20.0).
    #[arg(long)]
    gamma_m1: Option<f64>,
}

#[derive(Args, Debug)]
struct TrainContArgs {
    /// Path prefix of the buffer files.
    #[arg(long)]
    buffer: String,
    /// Path prefix of the input parameter files.
    #[arg(long)]
    input_param: String,
    /// Hyperparameter file written by the original training run.
    #[arg(long)]
    hyper_param: PathBuf,
    /// Path prefix of the output parameter files.
    #[arg(long)]
    output_param: String,
    #[command(flatten)]
    knobs: TrainKnobs,
}

#[derive(Args, Debug)]
struct TrainKnobs {
    /// Number of threads (default 1).
    #[arg(long)]
    thread: Option<usize>,
    /// Batch size in megabytes (default 16).
    #[arg(long)]
    batch: Option<usize>,
    /// Number of iterations (default 100).
    #[arg(long)]
    iterate: Option<u32>,
    /// Base PRNG seed (default 5489).
    #[arg(long)]
    seed: Option<u64>,
}

#[derive(Args, Debug)]
struct InferArgs {
    /// Input tweet text file.
    #[arg(long)]
    input: PathBuf,
    /// Path prefix of the buffer files.
    #[arg(long)]
    buffer: String,
    /// Hyperparameter file.
    #[arg(long)]
    hyper_param: PathBuf,
    /// Path prefix of the input parameter files.
    #[arg(long)]
    input_param: String,
    /// Output text file.
    #[arg(long)]
    output: PathBuf,
    /// Number of threads (default 1).
    #[arg(long)]
    thread: Option<usize>,
    /// Batch size in megabytes (default 16).
    #[arg(long)]
    batch: Option<usize>,
}

#[derive(Args, Debug)]
struct DumpArgs {
    /// Path prefix of the buffer files.
    #[arg(long)]
    buffer: String,
    /// Hyperparameter file.
    #[arg(long)]
    hyper_param: PathBuf,
    /// Path prefix of the input parameter files.
    #[arg(long)]
    input_param: String,
    /// Output text file.
    #[arg(long)]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct DumpTweetArgs {
    /// Input tweet text file the buffer was built from.
    #[arg(long)]
    input: PathBuf,
    /// Path prefix of the buffer files.
    #[arg(long)]
    buffer: String,
    /// Hyperparameter file.
    #[arg(long)]
    hyper_param: PathBuf,
    /// Path prefix of the input parameter files.
    #[arg(long)]
    input_param: String,
    /// Output text file.
    #[arg(long)]
    output: PathBuf,
}

/// The five files derived from a `--buffer` prefix.
struct BufferPaths {
    buffer: PathBuf,
    id: PathBuf,
    word: PathBuf,
    user: PathBuf,
    summary: PathBuf,
}

impl BufferPaths {
    fn new(prefix: &str) -> Self {
        Self {
            buffer: PathBuf::from(format!("{prefix}.buffer.bin")),
            id: PathBuf::from(format!("{prefix}.id.bin")),
            word: PathBuf::from(format!("{prefix}.word.txt")),
            user: PathBuf::from(format!("{prefix}.user.txt")),
            summary: PathBuf::from(format!("{prefix}.summary.txt")),
        }
    }
}

/// The three files derived from an `--input-param` / `--output-param`
/// prefix.
struct ParamPaths {
    tweet: PathBuf,
    user: PathBuf,
    topic: PathBuf,
}

impl ParamPaths {
    fn new(prefix: &str) -> Self {
        Self {
            tweet: PathBuf::from(format!("{prefix}.tweet-param.bin")),
            user: PathBuf::from(format!("{prefix}.user-param.bin")),
            topic: PathBuf::from(format!("{prefix}.topic-param.bin")),
        }
    }
}

/// Checkpoint ping-pong slots: iteration outputs alternate between the two
/// so a crash mid-iteration leaves the previous iteration intact.
struct TempSlots {
    tweet: [PathBuf; 2],
    user: [PathBuf; 2],
}

impl TempSlots {
    fn new(prefix: &str) -> Self {
        Self {
            tweet: [
                PathBuf::from(format!("{prefix}.tweet-param.temp0.bin")),
                PathBuf::from(format!("{prefix}.tweet-param.temp1.bin")),
            ],
            user: [
                PathBuf::from(format!("{prefix}.user-param.temp0.bin")),
                PathBuf::from(format!("{prefix}.user-param.temp1.bin")),
            ],
        }
    }
}

fn configure_logging() -> Option<WorkerGuard> {
    let log_dir = Path::new(".");
    let log_path = log_dir.join("tilda.log");
    if log_path.exists() {
        let _ = std::fs::remove_file(&log_path);
    }

    let file_appender = tracing_appender::rolling::never(log_dir, "tilda.log");
    let (nb_writer, guard) = tracing_appender::non_blocking(file_appender);
    match tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(nb_writer)
        .with_ansi(false)
        .try_init()
    {
        Ok(()) => Some(guard),
        // Global subscriber already installed; drop the guard so the writer
        // shuts down.
        Err(_) => None,
    }
}

fn install_panic_hook() {
    static HOOK: Once = Once::new();
    HOOK.call_once(|| {
        let default_panic = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |panic_info| {
            tracing::error!(target: "runtime.panic", ?panic_info, "panic");
            default_panic(panic_info);
        }));
    });
}

fn run_make_buffer(args: MakeBufferArgs) -> Result<()> {
    let paths = BufferPaths::new(&args.buffer);
    let options = MakeBufferOptions {
        stopword_path: args.stopword,
        min_user_freq: args.user_freq.unwrap_or(defaults::MIN_USER_FREQ),
        min_word_freq: args.word_freq.unwrap_or(defaults::MIN_WORD_FREQ),
    };
    core_dict::make_buffer(
        &args.input,
        &paths.buffer,
        &paths.user,
        &paths.word,
        &paths.id,
        &paths.summary,
        &options,
    )?;
    Ok(())
}

fn run_iterations(
    model: &mut Model,
    buffer: &BufferPaths,
    temp: &TempSlots,
    first_input: Option<&ParamPaths>,
    output: &ParamPaths,
    batch_size: usize,
    iterations: u32,
) -> Result<()> {
    for iteration in 1..=iterations {
        let previous_slot = ((iteration - 1) % 2) as usize;
        let (input_user, input_tweet) = match (iteration, first_input) {
            (1, Some(input)) => (input.user.as_path(), input.tweet.as_path()),
            _ => (
                temp.user[previous_slot].as_path(),
                temp.tweet[previous_slot].as_path(),
            ),
        };
        let next_slot = (iteration % 2) as usize;
        let (output_user, output_tweet) = if iteration == iterations {
            (output.user.as_path(), output.tweet.as_path())
        } else {
            (temp.user[next_slot].as_path(), temp.tweet[next_slot].as_path())
        };

        println!("Iteration {iteration}");
        let update_ratio = model.iterate(
            &buffer.buffer,
            batch_size,
            input_user,
            input_tweet,
            output_user,
            output_tweet,
        )?;
        info!(
            target: "runtime",
            iteration,
            update_ratio,
            "iteration_finished"
        );
    }
    Ok(())
}

fn run_train(args: TrainArgs, config: &Config) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let output = ParamPaths::new(&args.output_param);
    let temp = TempSlots::new(&args.output_param);
    let seed = args.knobs.seed.unwrap_or(defaults::RAND_SEED);

    let summary = Summary::load(&buffer.summary)
        .with_context(|| format!("load summary for buffer prefix {}", args.buffer))?;
    let hyper = HyperParams {
        topic_num: config.topic_num(args.topic),
        word_num: summary.word_num,
        alpha_m1: config.alpha_m1(args.alpha_m1),
        beta_m1: config.beta_m1(args.beta_m1),
        beta_bg_m1: config.beta_bg_m1(args.beta_bg_m1),
        gamma_m1: config.gamma_m1(args.gamma_m1),
    };
    let mut model = Model::new(hyper, config.thread_num(args.knobs.thread), seed);
    model.hyper().save(&args.hyper_param)?;
    model.init_params(&buffer.buffer, &temp.user[0], &temp.tweet[0])?;

    run_iterations(
        &mut model,
        &buffer,
        &temp,
        None,
        &output,
        config.batch_size(args.knobs.batch),
        config.iteration_num(args.knobs.iterate),
    )?;

    model.save_topic_param(&output.topic)?;
    info!(
        target: "runtime",
        density = model.topic_word_density(),
        "training_finished"
    );
    Ok(())
}

fn run_train_cont(args: TrainContArgs, config: &Config) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let input = ParamPaths::new(&args.input_param);
    let output = ParamPaths::new(&args.output_param);
    let temp = TempSlots::new(&args.output_param);
    let seed = args.knobs.seed.unwrap_or(defaults::RAND_SEED);

    let mut model =
        Model::from_hyper_file(&args.hyper_param, config.thread_num(args.knobs.thread), seed)?;
    model.load_topic_param(&input.topic)?;

    run_iterations(
        &mut model,
        &buffer,
        &temp,
        Some(&input),
        &output,
        config.batch_size(args.knobs.batch),
        config.iteration_num(args.knobs.iterate),
    )?;

    model.save_topic_param(&output.topic)?;
    info!(
        target: "runtime",
        density = model.topic_word_density(),
        "training_finished"
    );
    Ok(())
}

fn run_infer(args: InferArgs, mode: InferMode, config: &Config) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let input_param = ParamPaths::new(&args.input_param);
    let mut model = Model::from_hyper_file(&args.hyper_param, 1, defaults::RAND_SEED)?;
    model.load_topic_param(&input_param.topic)?;
    let dictionary = Dictionary::load(&buffer.word)?;
    ensure!(
        dictionary.len() == model.word_num(),
        "word dictionary has {} entries but the model was trained over {}",
        dictionary.len(),
        model.word_num()
    );
    core_infer::infer_file(
        &model,
        mode,
        &dictionary,
        &args.input,
        config.batch_size(args.batch),
        &args.output,
        config.thread_num(args.thread),
    )
}

fn run_dump_topic(args: DumpArgs) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let input = ParamPaths::new(&args.input_param);
    let mut model = Model::from_hyper_file(&args.hyper_param, 1, defaults::RAND_SEED)?;
    model.load_topic_param(&input.topic)?;
    let words = Dictionary::load(&buffer.word)?;
    dump::dump_topics(model.counts(), words.names(), &args.output)
}

fn run_dump_user(args: DumpArgs) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let input = ParamPaths::new(&args.input_param);
    let hyper = HyperParams::load(&args.hyper_param)?;
    let users = Dictionary::load(&buffer.user)?;
    dump::dump_users(hyper.topic_num, &input.user, users.names(), &args.output)
}

fn run_dump_tweet(args: DumpTweetArgs) -> Result<()> {
    let buffer = BufferPaths::new(&args.buffer);
    let input = ParamPaths::new(&args.input_param);
    // Validates the training artifacts exist and parse, like every other
    // consumer of a parameter prefix.
    let _hyper = HyperParams::load(&args.hyper_param)?;
    dump::dump_tweets(&input.tweet, &args.input, &buffer.id, &args.output)
}

fn run(command: Command, config: &Config) -> Result<()> {
    match command {
        Command::MakeBuffer(args) => run_make_buffer(args),
        Command::Train(args) => run_train(args, config),
        Command::TrainCont(args) => run_train_cont(args, config),
        Command::InferProb(args) => run_infer(args, InferMode::Probability, config),
        Command::InferScore(args) => run_infer(args, InferMode::Score, config),
        Command::DumpTopic(args) => run_dump_topic(args),
        Command::DumpUser(args) => run_dump_user(args),
        Command::DumpTweet(args) => run_dump_tweet(args),
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version requests are not errors.
            let code: u8 = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    let _log_guard = configure_logging();
    install_panic_hook();
    info!(target: "runtime", "startup");

    let config = core_config::load_from(cli.config.clone()).unwrap_or_default();
    match run(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(target: "runtime", error = ?e, "command_failed");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
