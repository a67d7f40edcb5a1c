//! `devloop` command line.
//!
//! Runs a coding task through the review-loop pipeline, writes a default
//! config, or invokes a single tool through the bridge.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use devloop::core::state::PipelineState;
use devloop::exit_codes;
use devloop::io::bridge::{ToolBridge, ToolInvoker, is_error_reply};
use devloop::io::config::{DEFAULT_CONFIG_FILE, DevloopConfig, load_config, write_config};
use devloop::io::inference::CommandInference;
use devloop::io::protocol::{ToolArgs, parse_arg};
use devloop::logging;
use devloop::pipeline::{Pipeline, StageFailed};
use devloop::stages::Stages;

#[derive(Parser)]
#[command(
    name = "devloop",
    version,
    about = "Bounded review-loop pipeline for code generation tasks"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Run a task through the pipeline and print the final state.
    Run {
        /// Task description.
        #[arg(long)]
        task: String,
        /// Override the configured revision bound.
        #[arg(long)]
        max_revisions: Option<u32>,
        /// Print the final state as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Invoke one tool through the bridge and print its reply.
    Tool {
        /// Tool name (e.g. `list_directory`).
        name: String,
        /// Tool argument, repeatable.
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
    },
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{err:#}");
            if err.downcast_ref::<StageFailed>().is_some() {
                exit_codes::STAGE_FAILED
            } else {
                exit_codes::INVALID
            }
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => cmd_init(&cli.config, force),
        Command::Run {
            task,
            max_revisions,
            json,
        } => cmd_run(&cli.config, &task, max_revisions, json),
        Command::Tool { name, args } => cmd_tool(&cli.config, &name, &args),
    }
}

fn cmd_init(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    write_config(path, &DevloopConfig::default())
        .with_context(|| format!("write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn cmd_run(config_path: &Path, task: &str, max_revisions: Option<u32>, json: bool) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let inference = CommandInference::new(&cfg.inference)?;
    let bridge = ToolBridge::stdio(&cfg.tools)?;
    let stages = Stages::standard(Arc::new(inference), Arc::new(bridge));
    let pipeline = Pipeline::new(stages, max_revisions.unwrap_or(cfg.max_revisions));

    let state = pipeline.run_with(task, |entry| {
        eprintln!("[{}] {}", entry.stage, entry.message);
    })?;

    if json {
        let payload = serde_json::to_string_pretty(&state).context("serialize final state")?;
        println!("{payload}");
    } else {
        print!("{}", render_report(&state));
    }
    Ok(exit_codes::OK)
}

fn cmd_tool(config_path: &Path, name: &str, raw_args: &[String]) -> Result<i32> {
    let cfg = load_config(config_path)?;
    let args = raw_args
        .iter()
        .map(|raw| parse_arg(raw))
        .collect::<Result<ToolArgs>>()?;
    let bridge = ToolBridge::stdio(&cfg.tools)?;
    let reply = bridge.invoke(name, &args);
    println!("{reply}");
    Ok(if is_error_reply(&reply) {
        exit_codes::INVALID
    } else {
        exit_codes::OK
    })
}

fn render_report(state: &PipelineState) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "== code ==\n{}\n", state.code());
    let _ = writeln!(out, "== review ==\n{}\n", state.review());
    let _ = writeln!(
        out,
        "== test results ({}) ==\n{}\n",
        state.test_results().outcome.as_str(),
        state.test_results().output
    );
    let _ = writeln!(out, "== iterations: {} ==\n", state.iteration_count());
    let _ = writeln!(out, "== activity log ==");
    for (idx, entry) in state.activity_log().iter().enumerate() {
        let _ = writeln!(out, "{}. [{}] {}", idx + 1, entry.stage, entry.message);
    }
    out
}
