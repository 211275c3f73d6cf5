//! Command-line interface for churnserve.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// churnserve - churn prediction serving with versioned models and canary routing.
#[derive(Parser)]
#[command(name = "churnserve")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (JSON)
    #[arg(short, long, env = "CHURN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "CHURN_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Emit JSON logs
    #[arg(long, env = "CHURN_JSON_LOGS")]
    pub json_logs: bool,

    /// Tracking store URI (http(s)://, file:// or a directory)
    #[arg(long, env = "CHURN_TRACKING_URI")]
    pub tracking_uri: Option<String>,

    /// Local model directory
    #[arg(long, env = "CHURN_MODEL_REGISTRY_PATH")]
    pub model_registry_path: Option<PathBuf>,

    /// Database directory
    #[arg(long, env = "CHURN_DATABASE_DIR")]
    pub database_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Start the prediction API
    Serve {
        /// Bind address
        #[arg(long, env = "CHURN_BIND_ADDR")]
        bind_addr: Option<String>,

        /// Seed the canary router for reproducible routing
        #[arg(long, env = "CHURN_ROUTER_SEED")]
        router_seed: Option<u64>,
    },

    /// Train a model and register it as the active version
    Train {
        /// Labelled training CSV (defaults to the raw data file)
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// random_forest or gradient_boosting
        #[arg(short, long)]
        model_type: Option<String>,
    },

    /// Write a synthetic labelled dataset
    GenerateData {
        /// Number of customers
        #[arg(short = 'n', long, default_value_t = 5000)]
        samples: usize,

        /// Output CSV (defaults to the raw data file)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// RNG seed
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },

    /// Score a CSV of customers with the active model
    BatchInference {
        /// Input CSV (defaults to the raw data file)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output CSV (defaults to data/predictions/batch_predictions.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Canary deployment commands
    Canary {
        #[command(subcommand)]
        command: CanaryCommands,
    },

    /// Model registry commands
    Models {
        #[command(subcommand)]
        command: ModelCommands,
    },

    /// Show version information
    Version,
}

/// Canary deployment subcommands.
#[derive(Subcommand)]
pub enum CanaryCommands {
    /// Put a registered version into canary
    Setup {
        /// Version to deploy
        #[arg(long)]
        version: String,

        /// Percent of single requests routed to the canary (0-100)
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
        traffic: Option<u8>,
    },

    /// Promote the canary to active
    Promote {
        /// Canary version
        #[arg(long)]
        version: String,
    },

    /// Deprecate the current canary
    Rollback,
}

/// Model registry subcommands.
#[derive(Subcommand)]
pub enum ModelCommands {
    /// List registered versions, newest first
    List,

    /// Show one version and its metrics
    Show {
        /// Version id
        version: String,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canary_setup() {
        let cli = Cli::try_parse_from([
            "churnserve",
            "canary",
            "setup",
            "--version",
            "v20240101_000000_abcd",
            "--traffic",
            "25",
        ])
        .unwrap();
        match cli.command {
            Commands::Canary {
                command: CanaryCommands::Setup { version, traffic },
            } => {
                assert_eq!(version, "v20240101_000000_abcd");
                assert_eq!(traffic, Some(25));
            }
            _ => panic!("unexpected command"),
        }
    }

    #[test]
    fn test_traffic_out_of_range() {
        assert!(Cli::try_parse_from([
            "churnserve", "canary", "setup", "--version", "v1", "--traffic", "101",
        ])
        .is_err());
    }

    #[test]
    fn test_generate_data_defaults() {
        let cli = Cli::try_parse_from(["churnserve", "generate-data"]).unwrap();
        match cli.command {
            Commands::GenerateData { samples, output, seed } => {
                assert_eq!(samples, 5000);
                assert_eq!(seed, 42);
                assert!(output.is_none());
            }
            _ => panic!("unexpected command"),
        }
    }
}
