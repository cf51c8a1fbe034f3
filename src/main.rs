// src/main.rs
//! `synapse` command line: run, check and build Synapse programs.
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use synapse::config::SynapseConfig;
use synapse::error::CompileError;
use synapse::runtime::reflex::PodSet;
use synapse::{Artifact, Runtime, RuntimeError, compile};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const EXIT_FAILURE: u8 = 1;
const EXIT_ENVIRONMENT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "synapse", version, about = "Compile and run event-driven Synapse programs")]
struct Cli {
    /// Configuration file (defaults to ./synapse.toml when present)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compile and execute a program until it goes idle
    Run { file: PathBuf },
    /// Compile only and report diagnostics
    Check { file: PathBuf },
    /// Compile and write the artifact as JSON
    Build {
        file: PathBuf,
        /// Output path; stdout when omitted
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match SynapseConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {}", err);
            return ExitCode::from(EXIT_ENVIRONMENT);
        }
    };
    init_tracing(&config);

    match dispatch(cli.command, &config) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(EXIT_ENVIRONMENT)
        }
    }
}

/// `SYNAPSE_LOG` wins over the config file's `[log] filter`.
fn init_tracing(config: &SynapseConfig) {
    let filter = EnvFilter::try_from_env("SYNAPSE_LOG")
        .or_else(|_| EnvFilter::try_new(&config.log.filter))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(command: Command, config: &SynapseConfig) -> anyhow::Result<ExitCode> {
    match command {
        Command::Run { file } => {
            let Some(artifact) = compile_file(&file)? else {
                return Ok(ExitCode::from(EXIT_FAILURE));
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(config.runtime.worker_threads)
                .enable_all()
                .build()
                .context("cannot start the async runtime")?;
            runtime.block_on(run(artifact, config))
        }
        Command::Check { file } => Ok(match compile_file(&file)? {
            Some(artifact) => {
                println!(
                    "{}: ok ({} functions, {} classes, {} handlers)",
                    file.display(),
                    artifact.functions.len(),
                    artifact.classes.len(),
                    artifact.handlers.len()
                );
                ExitCode::SUCCESS
            }
            None => ExitCode::from(EXIT_FAILURE),
        }),
        Command::Build { file, output } => {
            let Some(artifact) = compile_file(&file)? else {
                return Ok(ExitCode::from(EXIT_FAILURE));
            };
            let json = artifact.to_json().context("cannot serialize artifact")?;
            match output {
                Some(path) => {
                    fs::write(&path, json).with_context(|| format!("cannot write `{}`", path.display()))?;
                    info!(path = %path.display(), "artifact written");
                }
                None => println!("{}", json),
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// `Ok(None)` when the source has errors; they are already printed.
fn compile_file(path: &Path) -> anyhow::Result<Option<Artifact>> {
    let source = fs::read_to_string(path).with_context(|| format!("cannot read `{}`", path.display()))?;
    match compile(&source, &path.display().to_string()) {
        Ok(artifact) => Ok(Some(artifact)),
        Err(errors) => {
            report(&errors);
            Ok(None)
        }
    }
}

fn report(errors: &[CompileError]) {
    for err in errors {
        eprintln!("{}", err);
    }
    eprintln!("{} error(s)", errors.len());
}

async fn run(artifact: Artifact, config: &SynapseConfig) -> anyhow::Result<ExitCode> {
    let bus = config.event_bus();
    let pods = PodSet::from_config(&bus, &config.reflex)?;
    let program = Runtime::new()
        .bus(bus)
        .capabilities(config.capabilities())
        .max_call_depth(config.runtime.max_call_depth)
        .load(artifact)?;

    let outcome = program.start().await;
    program.idle().await;
    program.shutdown();
    debug!(pods = pods.len(), "program idle");
    drop(pods);

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(err @ RuntimeError::UncaughtException(_)) => {
            eprintln!("{}", err);
            Ok(ExitCode::from(EXIT_FAILURE))
        }
        Err(err) => Err(err.into()),
    }
}
