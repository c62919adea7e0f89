// src/main.rs
//
// Command-line driver.
//
// Examples:
//
//   llg-engine run tests/pbc.py
//       -> runs the script with python, serving engine commands over FIFOs;
//          outputs (config.json, client modules, autosaves) go to tests/pbc.py.out/
//
//   llg-engine serve --output out/
//       -> JSON-lines protocol on stdin/stdout
//
//   llg-engine replay session.jsonl --output out/
//       -> executes a recorded list of requests
//
//   llg-engine apigen client/       llg-engine docgen doc/       llg-engine modules

use std::io::{stdin, stdout, BufReader};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use llg_engine::api::Api;
use llg_engine::engine::Engine;
use llg_engine::logging::init_tracing;
use llg_engine::{apigen, docgen, ipc, modules};

/// Scriptable finite-difference micromagnetic engine
#[derive(Parser)]
#[command(name = "llg-engine")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Log filter, e.g. "llg_engine=debug" (default: $LLG_LOG or llg_engine=info)
    #[arg(long, global = true)]
    log: Option<String>,

    /// Output directory (default for `run`: <script>.out)
    #[arg(long, short, global = true)]
    output: Option<PathBuf>,

    /// Interpreter for scripts, overriding the choice by file extension
    #[arg(long, global = true)]
    script_cmd: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a script (e.g. a .py file using the mumax2 client)
    Run {
        #[arg(name = "SCRIPT")]
        script: PathBuf,
    },

    /// Serve the JSON-lines protocol on stdin/stdout
    Serve,

    /// Execute a file of JSON-lines requests
    Replay {
        #[arg(name = "FILE")]
        file: PathBuf,
    },

    /// Write the Python client modules into a directory
    Apigen {
        #[arg(name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// Write LaTeX documentation of all modules into a directory
    Docgen {
        #[arg(name = "DIR", default_value = ".")]
        dir: PathBuf,
    },

    /// List the registered modules
    Modules,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());
    let output = cli.output.clone().unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Run { script } => {
            let out = cli
                .output
                .clone()
                .unwrap_or_else(|| ipc::default_output_dir(&script));
            ipc::run_script(&script, &out, cli.script_cmd.as_deref())
                .with_context(|| format!("running {}", script.display()))?;
        }
        Commands::Serve => {
            info!(output = %output.display(), "serving on stdin/stdout");
            let mut api = Api::new(Engine::new(&output));
            ipc::serve(&mut api, BufReader::new(stdin().lock()), stdout().lock())?;
        }
        Commands::Replay { file } => {
            let mut api = Api::new(Engine::new(&output));
            ipc::replay(&mut api, &file).with_context(|| format!("replaying {}", file.display()))?;
        }
        Commands::Apigen { dir } => {
            for p in apigen::write_python(&dir)? {
                println!("{}", p.display());
            }
        }
        Commands::Docgen { dir } => {
            let p = docgen::write_docs(&dir)?;
            println!("{}", p.display());
        }
        Commands::Modules => print!("{}", modules::describe()),
    }
    Ok(())
}
