//! `devloop-tools`: stdio tool server used by the devloop pipeline.
//!
//! Speaks newline-delimited JSON-RPC on stdin/stdout. Diagnostics go to
//! stderr through `RUST_LOG`.

mod docs;
mod sandbox;
mod server;
mod tools;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use devloop::exit_codes;
use devloop::io::config::{DEFAULT_CONFIG_FILE, load_config};
use devloop::logging;

use crate::server::Server;
use crate::tools::Toolbox;

#[derive(Parser)]
#[command(
    name = "devloop-tools",
    version,
    about = "Workspace, sandbox and knowledge-base tools over stdio JSON-RPC"
)]
struct Cli {
    /// Config file; the `[tool_server]` table is used.
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Override `tool_server.workspace`.
    #[arg(long)]
    workspace: Option<PathBuf>,

    /// Override `tool_server.docs_dir`.
    #[arg(long)]
    docs_dir: Option<PathBuf>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::INVALID);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut cfg = load_config(&cli.config)?.tool_server;
    if let Some(workspace) = cli.workspace {
        cfg.workspace = workspace;
    }
    if let Some(docs_dir) = cli.docs_dir {
        cfg.docs_dir = docs_dir;
    }
    let toolbox = Toolbox::new(&cfg).context("prepare tools")?;

    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    Server::new(toolbox).serve(stdin.lock(), stdout.lock())
}
