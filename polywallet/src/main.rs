//! polywallet server
//!
//! ```sh
//! polywallet init            # Generate default config.toml
//! polywallet serve           # Start the server
//! ```

use clap::Parser;
use polywallet::cmd::{self, Cli, Commands};

#[tokio::main]
#[allow(clippy::print_stderr)]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { output, force } => cmd::init::run(&output, force),
        Commands::Serve { config } => cmd::serve::run(&config).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
