/// imblock compiler CLI

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use imblock_compiler::{CompileOptions, Compiler};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "imblockc")]
#[command(about = "imblock compiler - turns a saved block workspace into instrumented script text")]
#[command(version)]
struct Args {
    /// Input workspace XML file
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Write the compiled program here instead of stdout
    #[arg(short, long, value_name = "OUT")]
    output: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Also list the marked block ids
    #[arg(long)]
    list_marks: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(args) {
        eprintln!("Compilation failed: {:#}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let mut options = CompileOptions::new(&args.input);
    if let Some(output) = &args.output {
        options = options.output(output);
    }

    let output = Compiler::new(options)
        .compile()
        .with_context(|| format!("compiling {}", args.input.display()))?;

    if args.output.is_none() {
        print!("{}", output.compiled.code);
    }

    if args.list_marks {
        eprintln!("Marked blocks ({}):", output.compiled.block_ids.len());
        for id in &output.compiled.block_ids {
            let kind = output.program.find(id).map_or("?", |b| b.kind.as_str());
            eprintln!("  {:<24} {}", id, kind);
        }
    }

    Ok(())
}
