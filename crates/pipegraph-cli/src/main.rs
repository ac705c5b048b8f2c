//! Pipeline manifest tool
//!
//! Loads a YAML pipeline manifest, builds it against the in-memory backend and reports
//! what a real pipeline would do: the execution order, the resolved pipes or the
//! effect of a surface resize. Construction errors are printed as-is, naming the
//! stages and pipes involved.
//!
//! # Usage
//! ```bash
//! pipegraph check manifests/deferred.yaml
//! pipegraph inspect manifests/deferred.yaml --json
//! pipegraph resize manifests/deferred.yaml --to 1280x720
//! ```

mod report;

use clap::{Parser, Subcommand};
use pipegraph::{HeadlessBackend, PipelineManager, PipelineManifest, SurfaceSize};
use report::{OrderReport, ResizeReport, SnapshotReport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

/// Command-line arguments
#[derive(Parser)]
#[command(version, about = "Validates and inspects render pipeline manifests")]
struct Args {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the pipeline and print its execution order
    Check {
        /// Manifest file path
        manifest: PathBuf,
    },
    /// Print the resolved stages and pipes
    Inspect {
        /// Manifest file path
        manifest: PathBuf,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,

        /// Surface size to build for, overriding the manifest (e.g. 2560x1440)
        #[arg(long, value_name = "WxH")]
        surface: Option<SurfaceSize>,
    },
    /// Build the pipeline, resize it and print the affected stages
    Resize {
        /// Manifest file path
        manifest: PathBuf,

        /// New surface size (e.g. 1280x720)
        #[arg(long, value_name = "WxH")]
        to: SurfaceSize,
    },
}

fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

/// Loads a manifest and finalizes it on the headless backend
///
/// # Arguments
/// * `path` - Manifest file path
/// * `surface` - Surface size replacing the manifest's, if any
fn load(path: &Path, surface: Option<SurfaceSize>) -> Result<(String, PipelineManager<HeadlessBackend>), Box<dyn std::error::Error>> {
    let manifest = PipelineManifest::from_file(path)?;
    tracing::info!(name = %manifest.name, stages = manifest.stages.len(), "Loaded manifest");

    let mut pipeline = manifest.instantiate(HeadlessBackend::new())?;
    if let Some(surface) = surface {
        pipeline.resize(surface)?;
    }
    pipeline.finalize()?;
    Ok((manifest.name, pipeline))
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Check { manifest } => {
            let (name, pipeline) = load(&manifest, None)?;
            let order = pipeline.execution_order();
            print!(
                "{}",
                OrderReport {
                    name: &name,
                    order: &order,
                    resources: pipeline.backend().live_count(),
                }
            );
        }
        Command::Inspect { manifest, json, surface } => {
            let (_, pipeline) = load(&manifest, surface)?;
            let snapshot = pipeline.snapshot()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            } else {
                print!("{}", SnapshotReport(&snapshot));
            }
        }
        Command::Resize { manifest, to } => {
            let (_, mut pipeline) = load(&manifest, None)?;
            let event = pipeline.resize(to)?;
            let snapshot = pipeline.snapshot()?;
            print!("{}", ResizeReport { event: &event, snapshot: &snapshot });
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt().with_max_level(log_level(args.verbose)).with_writer(std::io::stderr).init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}
