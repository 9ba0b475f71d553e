//! Vocoder CLI - trains vocoder models and inspects their model directories.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "vocoder", author, version, about = "Train neural vocoders")]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Frame-wise linear vocoder
    #[command(subcommand)]
    Linear(ModelCommand),
}

#[derive(Subcommand, Debug)]
enum ModelCommand {
    /// Train a model, resuming from its latest checkpoint
    ///
    /// The first run writes `<path>/config.yaml` from the model defaults plus
    /// any `key=value` overrides. Later runs must request the same config.
    Train {
        /// Model directory
        #[arg(long)]
        path: PathBuf,

        /// Training data as JSON lines of `{spectrogram, waveform}`
        #[arg(long)]
        dataset: PathBuf,

        /// Config overrides such as `training.eval_frequency=1000`
        updates: Vec<String>,
    },

    /// List the checkpoints saved in a model directory
    Checkpoints {
        /// Model directory
        #[arg(long)]
        path: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber =
        FmtSubscriber::builder().with_max_level(level).without_time().with_target(false).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install logger: {e}");
    }

    let result = match args.command {
        Command::Linear(ModelCommand::Train { path, dataset, updates }) => {
            commands::train::execute(&path, &dataset, &updates)
        }
        Command::Linear(ModelCommand::Checkpoints { path, json }) => commands::checkpoints::execute(&path, json),
    };

    if let Err(e) = result {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}
