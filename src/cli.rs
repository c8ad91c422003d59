//! CLI struct definitions for the hivemined command-line interface.
//!
//! All clap-derived top-level types live here; each plugin owns its subcommand tree.

use crate::core::output::OutputFormat;
use crate::plugins::{baseline, coordinator, drone, image, worker};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "hivemined",
    version = env!("CARGO_PKG_VERSION"),
    about = "Lifecycle and dependency engine for containerized game servers: workers, their data, shared baselines and backup drones.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    /// Config file (default: <state-dir>/hivemined.toml).
    #[clap(long, global = true)]
    pub config: Option<PathBuf>,
    /// State directory holding the database and audit log.
    #[clap(long, global = true)]
    pub state_dir: Option<PathBuf>,
    /// Container engine endpoint, e.g. unix:///var/run/docker.sock.
    #[clap(long, global = true)]
    pub engine_host: Option<String>,
    #[clap(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
    /// Run against an in-memory engine and store; nothing outside the process changes.
    #[clap(long, global = true, default_value_t = false)]
    pub dry_run: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    Worker(worker::WorkerCli),
    Baseline(baseline::BaselineCli),
    Drone(drone::DroneCli),
    Coordinator(coordinator::CoordinatorCli),
    Image(image::ImageCli),
    /// Re-sync recorded container ids and states with the engine.
    Reconcile,
    /// Print the command schema of every subsystem as JSON.
    Schema,
    Version,
}
