//! imblock - run or single-step a saved block program against a microscope.
//!
//! `imblock run scan.xml` runs to completion; `imblock step scan.xml` stops on
//! every block and waits for Enter. Device primitives go to the action API at
//! `--base-url` (or `IMBLOCK_BASE_URL`); `--offline` answers them locally.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use imblock_compiler::{compile, xml, BlockProgram};
use imblock_runner::{
    ActionApi, ActionBridge, HttpActionApi, Mode, Outcome, ProgramChange, Prompter, Reply,
    RunnerConfig, Scheduler, SchedulerHandle, ScriptedApi, Session, Snapshot,
};

#[derive(Parser, Debug)]
#[command(name = "imblock")]
#[command(about = "Run or step block programs against a remote microscope")]
#[command(version)]
struct Cli {
    /// Runner configuration file (TOML)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Microscope server address
    #[arg(long, value_name = "URL", global = true)]
    base_url: Option<String>,

    /// Answer device actions locally instead of contacting a server
    #[arg(long, global = true)]
    offline: bool,

    /// Poll unsettled actions forever
    #[arg(long, global = true)]
    unbounded_polling: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run a workspace file to completion
    Run {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
    /// Step through a workspace file block by block
    Step {
        #[arg(value_name = "FILE")]
        input: PathBuf,
    },
}

/// Reads prompt answers from the terminal.
struct StdinPrompter;

impl Prompter for StdinPrompter {
    fn prompt(&mut self, message: &str, _numeric: bool) -> Option<String> {
        tokio::task::block_in_place(|| {
            eprint!("{} ", message);
            let _ = std::io::stderr().flush();
            let mut line = String::new();
            match std::io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
            }
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = RunnerConfig::load(cli.config.as_deref())?;
    if let Some(url) = &cli.base_url {
        config.base_url = url.clone();
    }
    if cli.unbounded_polling {
        config.max_polls = None;
    }

    let (input, stepping) = match &cli.command {
        CliCommand::Run { input } => (input, false),
        CliCommand::Step { input } => (input, true),
    };
    let program = load_program(input)?;

    tracing::info!(
        input = %input.display(),
        base_url = %config.base_url,
        offline = cli.offline,
        "starting imblock"
    );

    let outcome = if cli.offline {
        drive(offline_api(), &config, program, stepping).await?
    } else {
        drive(HttpActionApi::new(), &config, program, stepping).await?
    };

    if outcome.is_some_and(|outcome| outcome.is_failure()) {
        std::process::exit(1);
    }
    Ok(())
}

fn load_program(path: &Path) -> anyhow::Result<BlockProgram> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let program = xml::from_xml(&text).with_context(|| format!("loading {}", path.display()))?;
    // Report compile errors before anything talks to the microscope.
    compile(&program).with_context(|| format!("compiling {}", path.display()))?;
    Ok(program)
}

/// Replies for running without hardware: every action settles at once.
fn offline_api() -> ScriptedApi {
    let api = ScriptedApi::new();
    api.always(
        "instrument/state/stage/position",
        Reply::Json(json!({ "x": 0, "y": 0, "z": 0 })),
    )
    .always("measure_sharpness", Reply::Json(json!({ "sharpness": 0 })));
    api
}

async fn drive<A: ActionApi>(
    api: A,
    config: &RunnerConfig,
    program: BlockProgram,
    stepping: bool,
) -> anyhow::Result<Option<Outcome>> {
    let session = Session::new(ActionBridge::new(api, config), config).with_prompter(StdinPrompter);
    let (handle, task) = Scheduler::spawn(session, config);
    handle.edit(ProgramChange::Structural(program)).await?;

    let outcome = if stepping {
        step_interactively(&handle).await?
    } else {
        let mut snapshots = handle.subscribe();
        snapshots.borrow_and_update();
        handle.run().await?;
        let mut printed = 0;
        follow(&mut snapshots, &mut printed, |_| false).await?.outcome
    };

    handle.shutdown().await?;
    task.await.context("scheduler task failed")?;
    Ok(outcome)
}

async fn step_interactively(handle: &SchedulerHandle) -> anyhow::Result<Option<Outcome>> {
    eprintln!("Enter: step to the next block, r: run to the end, q: quit");
    let mut printed = 0;
    loop {
        let Some(line) = read_line().await? else {
            return Ok(None);
        };
        let mut snapshots = handle.subscribe();
        snapshots.borrow_and_update();
        match line.trim() {
            "q" => return Ok(None),
            "r" => handle.run().await?,
            _ => handle.step().await?,
        }

        let snapshot = follow(&mut snapshots, &mut printed, |s| s.mode == Mode::Paused).await?;
        if snapshot.outcome.is_some() {
            return Ok(snapshot.outcome);
        }
        if let Some(block) = &snapshot.current_block {
            eprintln!("-- paused at block {}", block);
        }
    }
}

/// Echo new transcript lines until a run ends or `stop` holds.
async fn follow(
    snapshots: &mut watch::Receiver<Snapshot>,
    printed: &mut usize,
    stop: impl Fn(&Snapshot) -> bool,
) -> anyhow::Result<Snapshot> {
    loop {
        snapshots
            .changed()
            .await
            .context("scheduler stopped unexpectedly")?;
        let snapshot = snapshots.borrow_and_update().clone();
        if snapshot.transcript.len() < *printed {
            *printed = 0;
        }
        for line in &snapshot.transcript[*printed..] {
            println!("{}", line);
        }
        *printed = snapshot.transcript.len();
        if snapshot.outcome.is_some() || stop(&snapshot) {
            return Ok(snapshot);
        }
    }
}

async fn read_line() -> anyhow::Result<Option<String>> {
    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        let read = std::io::stdin().lock().read_line(&mut line)?;
        Ok::<_, std::io::Error>((read > 0).then_some(line))
    })
    .await??;
    Ok(line)
}
