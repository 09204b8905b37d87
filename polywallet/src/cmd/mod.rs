//! CLI definitions and command implementations.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub mod init;
pub mod serve;

/// polywallet: custodial multi-chain EVM wallet service.
#[derive(Debug, Parser)]
#[command(name = "polywallet")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Generate a default TOML configuration file.
    Init {
        /// Output path for the configuration file.
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,

        /// Overwrite the file if it already exists.
        #[arg(long, default_value_t = false)]
        force: bool,
    },

    /// Start the wallet HTTP server.
    Serve {
        /// Path to the TOML configuration file.
        #[arg(short, long, env = "CONFIG", default_value = "config.toml")]
        config: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Cli::parse_from(["polywallet", "init", "-o", "out.toml", "--force"]);
        assert!(matches!(
            cli.command,
            Commands::Init { ref output, force: true } if output == &PathBuf::from("out.toml")
        ));

        let cli = Cli::parse_from(["polywallet", "serve", "--config", "prod.toml"]);
        assert!(matches!(
            cli.command,
            Commands::Serve { ref config } if config == &PathBuf::from("prod.toml")
        ));
    }
}
