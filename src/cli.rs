//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chain Sleuth - strategy-driven address investigation over block explorers
#[derive(Parser, Debug)]
#[command(name = "chain-sleuth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "CHAIN_SLEUTH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "warn",
        env = "CHAIN_SLEUTH_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "CHAIN_SLEUTH_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Classify an address and list the strategies it unlocks
    Classify {
        /// Address to classify
        address: String,
    },

    /// Resolve the explorer used for a chain and category
    Resolve {
        /// Chain name (ethereum, bitcoin, solana, tron, ...)
        chain: String,

        /// Explorer category (general, cross-chain, intent-bridge, intelligence)
        category: String,
    },

    /// List the loaded explorer registry
    Explorers,

    /// List the strategy catalog
    Strategies,

    /// Run a full investigation and stream its events
    Investigate {
        /// Target address
        address: String,

        /// Strategy to queue (repeatable); all applicable strategies when omitted
        #[arg(short, long = "strategy")]
        strategies: Vec<String>,

        /// Transactions scraped per strategy
        #[arg(short, long)]
        limit: Option<usize>,

        /// Replay a recorded site fixture (YAML) instead of the automation service
        #[arg(long)]
        fixture: Option<PathBuf>,

        /// Write the final graph as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print events as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_investigate_args() {
        let cli = Cli::parse_from([
            "chain-sleuth",
            "investigate",
            "0xabc",
            "-s",
            "token_transfers",
            "--strategy",
            "nft_transfers",
            "--limit",
            "5",
        ]);
        match cli.command {
            Command::Investigate {
                address,
                strategies,
                limit,
                ..
            } => {
                assert_eq!(address, "0xabc");
                assert_eq!(strategies, vec!["token_transfers", "nft_transfers"]);
                assert_eq!(limit, Some(5));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
