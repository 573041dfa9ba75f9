//! Liquidity trap engine - main entry point
//!
//! This binary provides two subcommands:
//! - paper: Drive the engine over historical bars against the paper venue
//! - check-config: Validate a configuration file and print its fingerprint

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

const CONFIG_ENV: &str = "LIQUIDITY_TRAP_CONFIG";
const DEFAULT_CONFIG: &str = "configs/eurusd_h1.json";

#[derive(Parser, Debug)]
#[command(name = "liquidity-trap")]
#[command(about = "Liquidity trap strategy engine with adaptive risk control", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a CSV of bars through the engine with a paper venue
    Paper {
        /// Path to configuration file (falls back to $LIQUIDITY_TRAP_CONFIG)
        #[arg(short, long)]
        config: Option<String>,

        /// CSV file of bars (datetime,open,high,low,close,volume)
        #[arg(short, long)]
        data: String,

        /// Starting balance in the account currency
        #[arg(long, default_value = "10000")]
        balance: f64,

        /// Account currency
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Conversion quote, repeatable. E.g., "EURUSD=1.085"
        #[arg(long = "rate")]
        rates: Vec<String>,

        /// Spread added to the bid, in price units
        #[arg(long, default_value = "0.0001")]
        spread: f64,

        /// Bars closed before the first entry check
        #[arg(long, default_value = "100")]
        warmup: usize,

        /// Bars between analytics and checkpoint passes
        #[arg(long, default_value = "24")]
        timer_bars: usize,

        /// Milliseconds between bars (0 replays as fast as possible)
        #[arg(long, default_value = "0")]
        interval_ms: u64,

        /// Run without the state database
        #[arg(long)]
        no_state: bool,

        /// Hide the progress bar and log to the console instead
        #[arg(long)]
        no_progress: bool,
    },

    /// Validate a configuration file
    CheckConfig {
        /// Path to configuration file (falls back to $LIQUIDITY_TRAP_CONFIG)
        #[arg(short, long)]
        config: Option<String>,
    },
}

fn resolve_config(config: Option<String>) -> String {
    config
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Paper { no_progress, .. } => ("paper", !no_progress),
        Commands::CheckConfig { .. } => ("check-config", false),
    };
    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Paper {
            config,
            data,
            balance,
            currency,
            rates,
            spread,
            warmup,
            timer_bars,
            interval_ms,
            no_state,
            no_progress,
        } => commands::paper::run(commands::paper::PaperArgs {
            config_path: resolve_config(config),
            data_path: data,
            balance,
            currency,
            rates,
            spread,
            warmup,
            timer_bars,
            interval_ms,
            persist: !no_state,
            progress: !no_progress,
        }),

        Commands::CheckConfig { config } => commands::check_config::run(resolve_config(config)),
    }
}
