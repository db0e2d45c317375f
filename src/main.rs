use clap::Parser;
use clap::error::ErrorKind;
use sharpe_allocator::config::{self, TrainConfig};
use sharpe_allocator::prices::load_aligned_prices;
use sharpe_allocator::{AllocationOutput, allocate_from_returns, log_returns};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const EXIT_USAGE: u8 = 1;
const EXIT_DATA: u8 = 2;
const EXIT_TRAINING: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Sharpe-ratio portfolio allocator: trains a small policy network on historical log returns and prints the learned weights as JSON",
    after_help = "EXAMPLES:
    # Allocate across three NASDAQ symbols with default settings
    cargo run --release -- NASDAQ AAPL MSFT NVDA

    # Reproducible run with a custom learning rate
    cargo run --release -- NYSE KO PG JNJ --seed 7 --learning-rate 0.0005

EXIT CODES:
    0 success, 1 usage error, 2 data loading error, 3 training error"
)]
struct Args {
    /// Exchange directory under the data dir (e.g., NASDAQ)
    exchange: String,

    /// Symbols to allocate across; column order of the output weights
    #[arg(required = true, num_args = 1..)]
    symbols: Vec<String>,

    /// Root of the CSV price store (default: $HOME/stock-data/data/data)
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Number of training iterations (default: 50)
    #[arg(long)]
    epochs: Option<usize>,

    /// Adam learning rate (default: 0.001)
    #[arg(long)]
    learning_rate: Option<f64>,

    /// Seed for parameter initialization; omit for a fresh random start
    #[arg(long)]
    seed: Option<u64>,

    /// Use CUDA GPU acceleration (requires --features cuda at compile time)
    #[arg(long)]
    cuda: bool,
}

/// `--help` and `--version` surface as parse errors but are successful runs.
fn is_help_or_version(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::DisplayHelp | ErrorKind::DisplayVersion)
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) if is_help_or_version(e.kind()) => e.exit(),
        Err(e) => {
            eprint!("{}", e);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sharpe_allocator=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    config::init_cpu_parallelism();

    let mut train_config = TrainConfig::default().with_device(config::get_device(args.cuda));
    if let Some(epochs) = args.epochs {
        train_config = train_config.with_epochs(epochs);
    }
    if let Some(lr) = args.learning_rate {
        train_config = train_config.with_learning_rate(lr);
    }
    if let Some(seed) = args.seed {
        train_config = train_config.with_seed(seed);
    }
    if let Err(e) = train_config.validate() {
        error!("{}", e);
        return ExitCode::from(EXIT_USAGE);
    }

    let symbols: Vec<String> = args
        .symbols
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    let data_dir = args.data_dir.unwrap_or_else(config::default_data_dir);

    info!(
        "Loading {} symbols from {}/{}",
        symbols.len(),
        data_dir.display(),
        args.exchange
    );
    let returns = match load_aligned_prices(&data_dir, &args.exchange, &symbols)
        .and_then(|aligned| log_returns(&aligned.prices).map_err(anyhow::Error::from))
    {
        Ok(returns) => returns,
        Err(e) => {
            error!("Error loading data: {:#}", e);
            return ExitCode::from(EXIT_DATA);
        }
    };

    info!(
        "Training on {} return rows x {} assets (epochs={}, lr={})",
        returns.num_rows(),
        returns.num_assets(),
        train_config.epochs,
        train_config.learning_rate
    );
    let allocation = match allocate_from_returns(&returns, train_config) {
        Ok(allocation) => allocation,
        Err(e) => {
            error!("Training error: {}", e);
            return ExitCode::from(EXIT_TRAINING);
        }
    };

    match serde_json::to_string(&AllocationOutput::from(&allocation)) {
        Ok(json) => {
            println!("{}", json);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Failed to serialize weights: {}", e);
            ExitCode::from(EXIT_TRAINING)
        }
    }
}
