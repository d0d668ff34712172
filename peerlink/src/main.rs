//! peerlink: inspect invitation tokens and exercise the relay stack.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(about = "TCP relaying over proximity peer-to-peer transports")]
struct Cli {
    /// JSON config file (see `peerlink::Config`)
    #[arg(long, global = true, env = "PEERLINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the generation tag of an identifier advertising under a transport handle
    GenerationTag {
        /// Peer identifier
        identifier: String,
        /// Transport handle
        handle: String,
    },
    /// Parse an invitation context token
    ParseContext {
        /// Token of the form `sender+addressee:generation`
        context: String,
    },
    /// Connect two in-process nodes and push bytes through both relays
    Demo {
        /// Number of bytes to send through the relays
        #[arg(long, default_value_t = 64 * 1024)]
        bytes: usize,
    },
}

#[tokio::main]
async fn main() -> eyre::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerationTag { identifier, handle } => {
            cli::inspect::generation_tag(&identifier, &handle)
        }
        Commands::ParseContext { context } => cli::inspect::parse_context(&context),
        Commands::Demo { bytes } => {
            let config = cli::load_config(cli.config).await?;
            cli::demo::run(config, bytes).await
        }
    }
}
