//! `kiln`: the project build driver.
//!
//! A thin wrapper around `kilnc`: owns project configuration (`Kiln.toml`,
//! §11.3), dependency resolution, CLI ergonomics, and the logger backend
//! (§11.1). All compiler work — lexing, parsing, semantic analysis,
//! lifetime checking, and the library codec — lives in `kilnc`; this binary
//! calls into its public entry points and renders the results.

mod build;
mod manifest;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use manifest::Manifest;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Project build driver for the Kiln compiler", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (repeatable: -v, -vv, -vvv). Ignored if
    /// `RUST_LOG` is set in the environment.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse, analyse, and lifetime-check the project without emitting a
    /// library bundle.
    Check {
        /// Project directory (must contain `Kiln.toml`).
        #[arg(default_value = ".")]
        project_dir: PathBuf,
    },
    /// Compile the project and, optionally, emit a library bundle.
    Build {
        /// Project directory (must contain `Kiln.toml`).
        #[arg(default_value = ".")]
        project_dir: PathBuf,

        /// Path to write the serialized library bundle to.
        #[arg(long)]
        emit_library: Option<PathBuf>,

        /// Root directory `system = true` dependencies are resolved under.
        #[arg(long)]
        system_libs: Option<PathBuf>,
    },
}

fn init_logger(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();
}

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    init_logger(cli.verbose);

    match cli.command {
        Commands::Check { project_dir } => run_check(&project_dir),
        Commands::Build { project_dir, emit_library, system_libs } => {
            run_build(&project_dir, emit_library.as_deref(), system_libs.as_deref())
        }
    }
}

fn run_check(project_dir: &std::path::Path) -> anyhow::Result<ExitCode> {
    let manifest = Manifest::load(project_dir)?;
    let outcome = build::compile_package(project_dir, &manifest, None)?;
    Ok(report(&outcome))
}

fn run_build(project_dir: &std::path::Path, emit_library: Option<&std::path::Path>, system_libs: Option<&std::path::Path>) -> anyhow::Result<ExitCode> {
    let manifest = Manifest::load(project_dir)?;
    let outcome = build::compile_package(project_dir, &manifest, system_libs)?;
    if outcome.error_count() == 0 {
        if let Some(out) = emit_library {
            build::export_bundle(&outcome, out).context("emitting library bundle")?;
            println!("wrote library bundle to {}", out.display());
        }
    }
    Ok(report(&outcome))
}

/// Prints every diagnostic in `outcome`'s sink and returns the process exit
/// code (: the `Sink` channel, not a `Result`, is how the core
/// reports problems with the user's program).
fn report(outcome: &build::BuildOutcome) -> ExitCode {
    for diag in outcome.sink.diagnostics() {
        eprint!("{diag}");
    }
    if outcome.error_count() > 0 {
        eprintln!("kiln: {} error(s)", outcome.error_count());
        ExitCode::FAILURE
    } else {
        println!("kiln: ok");
        ExitCode::SUCCESS
    }
}
