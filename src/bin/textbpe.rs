use std::fs::{self, File};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use env_logger::Env;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use rayon::ThreadPoolBuilder;
use serde_json::json;
use textbpe::bytes::decode_utf8_dropping_invalid;
use textbpe::config::DEFAULT_READ_WINDOW;
use textbpe::{BpeModel, PairCounting, TokenId, Tokenizer, Trainer, TrainerConfig};

const VOCAB_FILE: &str = "vocab.json";
const MERGES_FILE: &str = "merges.txt";

#[derive(Parser, Debug)]
#[command(author, version, about = "Byte-level BPE toolkit for text", long_about = None)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Decrease verbosity (-q, -qq)
    #[arg(short = 'q', long, global = true, action = ArgAction::Count)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a vocabulary and merge list from a text corpus
    Train(TrainArgs),
    /// Encode text files with a trained vocabulary
    Encode(EncodeArgs),
    /// Decode token ids back into text
    Decode(DecodeArgs),
    /// Inspect a trained vocabulary
    Info(InfoArgs),
}

#[derive(Args, Debug)]
struct TrainArgs {
    /// UTF-8 corpus file
    input: PathBuf,

    /// Directory receiving vocab.json and merges.txt
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    output: PathBuf,

    /// Target vocabulary size (special tokens and 256 bytes included)
    #[arg(long, value_name = "SIZE")]
    vocab_size: Option<usize>,

    /// Special tokens in id order; the first also delimits shards (repeat flag).
    /// Defaults to <|endoftext|>
    #[arg(long = "special-token", value_name = "TOKEN")]
    special_tokens: Vec<String>,

    /// Train without special tokens (implies a single shard unless --shards is given)
    #[arg(long, conflicts_with = "special_tokens")]
    no_special_tokens: bool,

    /// Number of corpus shards pre-tokenized in parallel
    #[arg(long, value_name = "COUNT")]
    shards: Option<usize>,

    /// Read window in bytes used when aligning shard boundaries
    #[arg(long, value_name = "BYTES", default_value_t = DEFAULT_READ_WINDOW)]
    read_window: usize,

    /// Recount every pair after each merge instead of updating incrementally
    #[arg(long)]
    full_recount: bool,

    /// Disable per-iteration logging/progress
    #[arg(long)]
    no_progress: bool,

    /// Limit Rayon worker threads
    #[arg(long, value_name = "N")]
    threads: Option<usize>,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// vocab.json to load
    #[arg(long, value_name = "PATH", default_value = VOCAB_FILE)]
    vocab: PathBuf,

    /// merges.txt to load
    #[arg(long, value_name = "PATH", default_value = MERGES_FILE)]
    merges: PathBuf,

    /// Special tokens kept whole (repeat flag)
    #[arg(long = "special-token", value_name = "TOKEN")]
    special_tokens: Vec<String>,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Text files to encode
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Emit JSON lines instead of human-readable output
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// File containing whitespace separated token ids
    #[arg(long, value_name = "PATH", conflicts_with = "ids")]
    input: Option<PathBuf>,

    /// Token ids to decode
    #[arg(value_name = "ID")]
    ids: Vec<TokenId>,

    /// Write decoded text to this file instead of stdout
    #[arg(long, value_name = "PATH")]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct InfoArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Emit JSON
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Train(args) => run_train(args),
        Commands::Encode(args) => run_encode(args),
        Commands::Decode(args) => run_decode(args),
        Commands::Info(args) => run_info(args),
    }
}

fn init_logging(verbose: u8, quiet: u8) {
    use log::LevelFilter;

    let level = if quiet > 0 {
        match quiet {
            1 => LevelFilter::Warn,
            _ => LevelFilter::Error,
        }
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    builder.format_timestamp_millis();
    builder.filter_level(level);
    let _ = builder.try_init();
}

fn run_train(args: TrainArgs) -> Result<()> {
    if let Some(threads) = args.threads {
        ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .context("unable to configure Rayon thread pool")?;
    }

    let mut cfg = TrainerConfig::builder()
        .read_window(args.read_window)
        .show_progress(!args.no_progress);
    if let Some(vocab_size) = args.vocab_size {
        cfg = cfg.vocab_size(vocab_size);
    }
    if args.no_special_tokens {
        cfg = cfg.special_tokens(Vec::<String>::new()).num_shards(1);
    } else if !args.special_tokens.is_empty() {
        cfg = cfg.special_tokens(args.special_tokens.clone());
    }
    if let Some(shards) = args.shards {
        cfg = cfg.num_shards(shards);
    }
    if args.full_recount {
        cfg = cfg.pair_counting(PairCounting::FullRecount);
    }
    let trainer_cfg = cfg.build()?;

    let corpus_bytes = fs::metadata(&args.input)
        .with_context(|| format!("failed to stat {}", args.input.display()))?
        .len();

    let spinner = if args.no_progress {
        None
    } else {
        let pb = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner} training merges... {elapsed}")?
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        pb.set_style(style);
        pb.enable_steady_tick(Duration::from_millis(80));
        Some(pb)
    };

    let trainer = Trainer::new(trainer_cfg);
    let start = Instant::now();
    let artifacts = trainer
        .train_from_path(&args.input)
        .with_context(|| format!("failed to train on {}", args.input.display()))?;
    if let Some(pb) = spinner {
        pb.finish_with_message("training complete");
    }

    let elapsed = start.elapsed();
    let merges = artifacts.model.merges().len();
    let vocab_size = artifacts.model.vocab_size();
    let throughput = if elapsed.as_secs_f64() > 0.0 {
        bytes_to_mebibytes(corpus_bytes) / elapsed.as_secs_f64()
    } else {
        0.0
    };

    fs::create_dir_all(&args.output)
        .with_context(|| format!("failed to create output directory {}", args.output.display()))?;
    let vocab_path = args.output.join(VOCAB_FILE);
    let merges_path = args.output.join(MERGES_FILE);
    artifacts
        .model
        .save(&vocab_path, &merges_path)
        .with_context(|| format!("failed to save model to {}", args.output.display()))?;

    info!(
        "training complete: merges={merges} vocab={vocab_size} stop={:?} duration={elapsed:.2?} throughput={throughput:.2} MiB/s",
        artifacts.metrics.stop_reason
    );
    println!(
        "✅ wrote vocab {} ({} merges) to {} and {}",
        vocab_size,
        merges,
        vocab_path.display(),
        merges_path.display()
    );
    println!(
        "   corpus {:.2} MiB | duration {:.2?} | throughput {:.2} MiB/s",
        bytes_to_mebibytes(corpus_bytes),
        elapsed,
        throughput
    );

    Ok(())
}

fn load_tokenizer(args: &ModelArgs) -> Result<Tokenizer> {
    Tokenizer::from_files(&args.vocab, &args.merges, &args.special_tokens).with_context(|| {
        format!(
            "failed to load tokenizer from {} and {}",
            args.vocab.display(),
            args.merges.display()
        )
    })
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let tokenizer = load_tokenizer(&args.model)?;
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for path in &args.inputs {
        let data = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
        let text = decode_utf8_dropping_invalid(&data);
        let tokens = tokenizer
            .encode(&text)
            .with_context(|| format!("failed to encode {}", path.display()))?;

        if args.json {
            let record = json!({
                "path": path.display().to_string(),
                "tokens": tokens
            });
            writeln!(out, "{}", serde_json::to_string(&record)?)?;
        } else {
            write!(out, "{}:\t", path.display())?;
            write_token_sequence(&mut out, &tokens)?;
        }
    }

    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let tokenizer = load_tokenizer(&args.model)?;

    let tokens = if let Some(input_path) = &args.input {
        let contents = fs::read_to_string(input_path)
            .with_context(|| format!("failed to read {}", input_path.display()))?;
        parse_token_list(&contents)?
    } else {
        args.ids
    };

    let text = tokenizer.decode(&tokens);

    if let Some(path) = &args.output {
        let mut file =
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
        file.write_all(text.as_bytes())
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {} bytes to {}", text.len(), path.display());
    } else {
        io::stdout().write_all(text.as_bytes())?;
    }

    Ok(())
}

fn run_info(args: InfoArgs) -> Result<()> {
    let model = BpeModel::load(&args.model.vocab, &args.model.merges, &args.model.special_tokens)
        .with_context(|| format!("failed to read {}", args.model.vocab.display()))?;
    let vocab = model.vocab();

    let special_tokens = model
        .special_tokens()
        .iter()
        .map(|token| json!({ "token": token, "id": vocab.id_of(token.as_bytes()) }))
        .collect::<Vec<_>>();
    let longest = vocab.longest_entry().map(|(id, token)| {
        json!({
            "id": id,
            "length": token.len(),
            "bytes": token,
            "text": String::from_utf8_lossy(token),
        })
    });
    let summary = json!({
        "vocab_path": args.model.vocab.display().to_string(),
        "merges_path": args.model.merges.display().to_string(),
        "vocab_size": vocab.len(),
        "merges": model.merges().len(),
        "special_tokens": special_tokens,
        "longest_token": longest,
    });

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Vocab size    : {}", vocab.len());
    println!("Merges        : {}", model.merges().len());
    if model.special_tokens().is_empty() {
        println!("Special tokens: (none)");
    } else {
        let rendered = model
            .special_tokens()
            .iter()
            .map(|token| match vocab.id_of(token.as_bytes()) {
                Some(id) => format!("{token} ({id})"),
                None => format!("{token} (missing)"),
            })
            .collect::<Vec<_>>();
        println!("Special tokens: {}", rendered.join(", "));
    }
    match vocab.longest_entry() {
        Some((id, token)) => println!(
            "Longest token : id {id}, {} bytes, {:?}",
            token.len(),
            bstr::BStr::new(token)
        ),
        None => println!("Longest token : (empty vocabulary)"),
    }

    Ok(())
}

#[must_use]
fn bytes_to_mebibytes(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

fn write_token_sequence<W: Write>(writer: &mut W, tokens: &[TokenId]) -> Result<()> {
    for (idx, token) in tokens.iter().enumerate() {
        if idx > 0 {
            writer.write_all(b" ")?;
        }
        write!(writer, "{token}")?;
    }
    writer.write_all(b"\n")?;
    Ok(())
}

fn parse_token_list(text: &str) -> Result<Vec<TokenId>> {
    text.split_whitespace()
        .map(|part| {
            part.parse::<TokenId>()
                .map_err(|err| anyhow!("invalid token id `{part}`: {err}"))
        })
        .collect()
}
