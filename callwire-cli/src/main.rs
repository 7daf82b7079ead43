//! Demo provider and consumer for the callwire call protocol.

#![allow(
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::missing_docs_in_private_items
)]

mod consumer;
mod fields;
mod provider;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "callwire", version, about = "Cross-process calls over Unix sockets")]
struct Cli {
    /// Enable debug logging.
    #[arg(long, global = true)]
    debug: bool,

    /// Directory holding provider sockets.
    #[arg(
        long,
        global = true,
        env = "CALLWIRE_SOCKET_DIR",
        default_value_os_t = std::env::temp_dir()
    )]
    socket_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the demo provider until interrupted.
    Serve(provider::ServeArgs),

    /// Call an action on a provider.
    ///
    /// Fields are `key=value` (string), `key:int=1`, `key:long=1` or
    /// `key:bool=true`.
    Call(consumer::CallArgs),

    /// List the API versions a provider supports.
    Versions {
        /// Provider name.
        provider: String,
    },

    /// Register a callback and print every event it receives.
    Listen(consumer::ListenArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    FmtSubscriber::builder()
        .with_max_level(if cli.debug { Level::DEBUG } else { Level::WARN })
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();

    if let Err(e) = cli.dispatch().await {
        eprintln!("callwire: {e:#}");
        std::process::exit(1);
    }
}

impl Cli {
    async fn dispatch(self) -> Result<()> {
        let dir = self.socket_dir;
        match self.command {
            Command::Serve(args) => provider::serve(&dir, args).await,
            Command::Call(args) => consumer::call(&dir, args).await,
            Command::Versions { provider } => consumer::versions(&dir, &provider).await,
            Command::Listen(args) => consumer::listen(&dir, args).await,
        }
    }
}
