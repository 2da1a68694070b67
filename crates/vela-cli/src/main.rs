#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::too_many_lines)]

mod commands;
mod logging;

use clap::Parser;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "vela")]
#[command(author, version, about = "On-demand dev server for web applications", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for INFO, -vv for DEBUG)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON logs and, where supported, JSON output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Start the dev server
    Dev {
        /// Project root (defaults to the current directory)
        #[arg(long, value_name = "PATH")]
        root: Option<PathBuf>,

        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to bind (overrides server.host)
        #[arg(long)]
        host: Option<String>,

        /// Config file (defaults to <root>/vela.config.json)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Open the browser once the server is ready
        #[arg(long)]
        open: bool,
    },

    /// Pre-bundle dependencies reachable from the configured entries
    Prebundle {
        /// Project root (defaults to the current directory)
        #[arg(long, value_name = "PATH")]
        root: Option<PathBuf>,

        /// Config file (defaults to <root>/vela.config.json)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Re-bundle even if the cached map is still valid
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.json);

    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    match cli.command {
        Commands::Version => {
            println!("vela {}", vela_core::VERSION);
            Ok(())
        }
        Commands::Dev {
            root,
            port,
            host,
            config,
            open,
        } => {
            let action = commands::dev::DevAction {
                root: root.unwrap_or(cwd),
                config,
                port,
                host,
                open,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::dev::run(action))
        }
        Commands::Prebundle {
            root,
            config,
            force,
        } => {
            let action = commands::prebundle::PrebundleAction {
                root: root.unwrap_or(cwd),
                config,
                force,
                json: cli.json,
            };
            let rt = tokio::runtime::Runtime::new().into_diagnostic()?;
            rt.block_on(commands::prebundle::run(action))
        }
    }
}
