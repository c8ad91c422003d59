//! Workers: long-running game-server containers.
//!
//! A worker mounts its data companion (`<name>-data`, storage only) and a baseline, in that
//! order. Console commands are forwarded to the server through the image's `cmd` helper.

use crate::core::entity::{
    Entity, EntityDetail, EntityKind, EntityRef, PortPolicy, ResourceLimits, RestartMode,
    RestartPolicy, validate_name,
};
use crate::core::error::{DependencyError, EntityError, HiveError};
use crate::core::hive::Hive;
use crate::core::output::{self, OutputFormat};
use crate::plugins::baseline;
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;

/// Port the game server listens on inside the container.
pub const SERVER_PORT: u16 = 25565;
pub const DATA_SUFFIX: &str = "-data";
const CONSOLE_HELPER: &str = "cmd";
const SHELL: [&str; 2] = ["/bin/bash", "-l"];

#[derive(Parser, Debug)]
#[clap(name = "worker", about = "Manage game-server workers")]
pub struct WorkerCli {
    #[clap(subcommand)]
    pub command: WorkerCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkerCommand {
    /// Create a worker on top of a baseline (registered on the fly if unknown).
    Create {
        name: String,
        #[clap(long, short = 'b')]
        baseline: String,
        /// Host port bound to the server port. All ports are published when omitted.
        #[clap(long, short = 'p')]
        port: Option<u16>,
        #[clap(long)]
        memory: Option<String>,
        #[clap(long)]
        swap: Option<String>,
        #[clap(long)]
        cpu_shares: Option<u32>,
        #[clap(long, value_enum)]
        restart: Option<RestartMode>,
        #[clap(long)]
        max_retries: Option<u32>,
        /// Skip the data companion.
        #[clap(long, default_value_t = false)]
        no_data: bool,
        /// Start the worker once created.
        #[clap(long, default_value_t = false)]
        start: bool,
        /// Arguments passed to the server process.
        #[clap(last = true)]
        args: Vec<String>,
    },
    /// Delete a worker. Its data companion goes too unless --keep-data is given.
    Delete {
        name: String,
        #[clap(long, default_value_t = false)]
        keep_data: bool,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Restart {
        name: String,
    },
    /// Send a console command to a running worker.
    Command {
        name: String,
        #[clap(required = true, num_args = 1..)]
        args: Vec<String>,
    },
    /// Open an interactive login shell inside a running worker.
    Shell {
        name: String,
    },
    /// Refresh the worker image and recreate its container.
    Update {
        name: String,
    },
    List {
        /// Include data companions.
        #[clap(long, default_value_t = false)]
        all: bool,
    },
}

/// Everything needed to create one worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub name: String,
    pub baseline: String,
    pub args: Vec<String>,
    pub port: Option<u16>,
    pub limits: ResourceLimits,
    pub restart: RestartPolicy,
    pub data: bool,
}

impl WorkerSpec {
    /// Spec with the configured worker defaults.
    pub fn new(hive: &Hive, name: impl Into<String>, baseline: impl Into<String>) -> Self {
        let defaults = &hive.config().worker;
        Self {
            name: name.into(),
            baseline: baseline.into(),
            args: Vec::new(),
            port: None,
            limits: defaults.limits(),
            restart: defaults.restart_policy(),
            data: true,
        }
    }
}

pub fn worker_ref(name: &str) -> EntityRef {
    EntityRef::new(EntityKind::Worker, name)
}

pub fn companion_name(worker: &str) -> String {
    format!("{}{}", worker, DATA_SUFFIX)
}

fn companion_entity(hive: &Hive, worker: &str) -> Result<Entity, HiveError> {
    Ok(Entity::new(
        companion_name(worker),
        hive.config().images.worker.to_image_ref(),
        EntityDetail::Worker {
            data_companion: None,
            companion_of: Some(worker.to_string()),
        },
        hive.label_prefix(),
    )?
    .with_entrypoint("true")
    .with_restart(RestartPolicy::new(RestartMode::Never, 0)))
}

/// Returns the companion for `worker`, creating and registering it when needed.
fn ensure_companion(hive: &Hive, worker: &str) -> Result<Entity, HiveError> {
    let registry = hive.registry(EntityKind::Worker);
    let name = companion_name(worker);
    if let Some(existing) = registry.get(&name)? {
        if existing.detail
            != (EntityDetail::Worker {
                data_companion: None,
                companion_of: Some(worker.to_string()),
            })
        {
            return Err(HiveError::Validation(format!(
                "worker '{}' exists and is not the data companion of '{}'",
                name, worker
            )));
        }
        if existing.runtime.is_some() {
            return Ok(existing);
        }
        return hive.mutate_locked(&existing.reference(), |lc, e| lc.create(e));
    }
    let mut companion = companion_entity(hive, worker)?;
    hive.lifecycle().create(&mut companion)?;
    registry.insert_new(companion.clone())?;
    Ok(companion)
}

/// Creates a worker: baseline and data companion first, then the worker container.
/// Nothing is registered for the worker itself when its create fails.
pub fn create_worker(hive: &Hive, spec: WorkerSpec) -> Result<Entity, HiveError> {
    validate_name(&spec.name)?;
    validate_name(&spec.baseline)?;

    let me = worker_ref(&spec.name);
    let data = worker_ref(&companion_name(&spec.name));
    let comb = baseline::baseline_ref(&spec.baseline);
    let mut roots = vec![me.clone(), comb.clone()];
    if spec.data {
        roots.push(data.clone());
    }
    let _guard = hive.lock(&roots)?;

    if hive.registry(EntityKind::Worker).contains(&spec.name)? {
        return Err(EntityError::Duplicate {
            kind: EntityKind::Worker,
            name: spec.name,
        }
        .into());
    }
    baseline::register_if_missing(hive, &spec.baseline)?;

    let mut dependents = Vec::with_capacity(2);
    let mut data_companion = None;
    if spec.data {
        ensure_companion(hive, &spec.name).map_err(|source| DependencyError {
            dependency: data.name.clone(),
            source: Box::new(source),
        })?;
        dependents.push(data.clone());
        data_companion = Some(data.name.clone());
    }
    dependents.push(comb);

    let ports = match spec.port {
        Some(host) => PortPolicy::Bind {
            host,
            container: SERVER_PORT,
        },
        None => PortPolicy::PublishAll,
    };
    let worker = Entity::new(
        spec.name,
        hive.config().images.worker.to_image_ref(),
        EntityDetail::Worker {
            data_companion,
            companion_of: None,
        },
        hive.label_prefix(),
    )?
    .with_command(spec.args)
    .with_dependents(dependents)
    .with_limits(spec.limits)
    .with_restart(spec.restart)
    .with_ports(ports);

    let worker = hive.create_locked(worker)?;
    info!(worker = %worker.name, "worker created");
    Ok(worker)
}

/// Deletes the worker and, when `with_volumes` is set, its data companion. The worker is
/// removed first; a companion failure is reported without bringing the worker back.
pub fn delete_worker(hive: &Hive, name: &str, with_volumes: bool) -> Result<(), HiveError> {
    let me = worker_ref(name);
    let _guard = hive.lock(std::slice::from_ref(&me))?;
    let worker = hive.registry(EntityKind::Worker).require(name)?;
    if worker.is_storage_only() {
        return Err(HiveError::Validation(format!(
            "'{}' is a data companion; delete its worker instead",
            name
        )));
    }
    hive.delete_locked(&me, true)?;

    if with_volumes && let Some(companion) = worker.data_companion() {
        let companion = worker_ref(companion);
        if hive.get(&companion)?.is_some() {
            hive.delete_locked(&companion, true)?;
        }
    }
    Ok(())
}

/// Forwards `args` to the server console. The worker must be running.
pub fn send_command(hive: &Hive, name: &str, args: &[String]) -> Result<String, HiveError> {
    let mut command = Vec::with_capacity(args.len() + 1);
    command.push(CONSOLE_HELPER.to_string());
    command.extend(args.iter().cloned());
    hive.exec(&worker_ref(name), &command, false)
}

pub fn open_shell(hive: &Hive, name: &str) -> Result<String, HiveError> {
    let command: Vec<String> = SHELL.iter().map(|s| s.to_string()).collect();
    hive.exec(&worker_ref(name), &command, true)
}

pub fn list_workers(hive: &Hive, include_companions: bool) -> Result<Vec<Entity>, HiveError> {
    Ok(hive
        .list(EntityKind::Worker)?
        .into_iter()
        .filter(|w| include_companions || !w.is_storage_only())
        .collect())
}

pub fn run_worker_cli(hive: &Hive, cli: WorkerCli, format: OutputFormat) -> Result<(), HiveError> {
    match cli.command {
        WorkerCommand::Create {
            name,
            baseline,
            port,
            memory,
            swap,
            cpu_shares,
            restart,
            max_retries,
            no_data,
            start,
            args,
        } => {
            let mut spec = WorkerSpec::new(hive, name, baseline);
            spec.args = args;
            spec.port = port;
            spec.data = !no_data;
            if memory.is_some() {
                spec.limits.memory = memory;
            }
            if swap.is_some() {
                spec.limits.swap = swap;
            }
            if cpu_shares.is_some() {
                spec.limits.cpu_shares = cpu_shares;
            }
            if let Some(mode) = restart {
                spec.restart.mode = mode;
            }
            if let Some(retries) = max_retries {
                spec.restart.max_retries = retries;
            }
            let mut worker = create_worker(hive, spec)?;
            if start {
                worker = hive.start(&worker.reference())?;
            }
            output::emit(
                format,
                "worker.create",
                &format!("worker '{}' {}", worker.name, worker.state()),
                json!({ "worker": output::entity_json(&worker) }),
            );
        }
        WorkerCommand::Delete { name, keep_data } => {
            delete_worker(hive, &name, !keep_data)?;
            output::emit(
                format,
                "worker.delete",
                &format!("worker '{}' deleted", name),
                json!({ "name": name, "with_volumes": !keep_data }),
            );
        }
        WorkerCommand::Start { name } => {
            let worker = hive.start(&worker_ref(&name))?;
            emit_state(format, "worker.start", &worker);
        }
        WorkerCommand::Stop { name } => {
            let worker = hive.stop(&worker_ref(&name))?;
            emit_state(format, "worker.stop", &worker);
        }
        WorkerCommand::Restart { name } => {
            let worker = hive.restart(&worker_ref(&name))?;
            emit_state(format, "worker.restart", &worker);
        }
        WorkerCommand::Update { name } => {
            let worker = hive.update(&worker_ref(&name))?;
            emit_state(format, "worker.update", &worker);
        }
        WorkerCommand::Command { name, args } => {
            let out = send_command(hive, &name, &args)?;
            output::emit(
                format,
                "worker.command",
                &output::compact_line(&out, 400),
                json!({ "name": name, "output": out }),
            );
        }
        WorkerCommand::Shell { name } => {
            open_shell(hive, &name)?;
        }
        WorkerCommand::List { all } => {
            output::print_entities(format, &list_workers(hive, all)?);
        }
    }
    Ok(())
}

fn emit_state(format: OutputFormat, cmd: &str, worker: &Entity) {
    output::emit(
        format,
        cmd,
        &format!("worker '{}' {}", worker.name, worker.state()),
        json!({ "worker": output::entity_json(worker) }),
    );
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "worker",
        "version": "0.3.0",
        "description": "Game-server workers with a data companion and a shared baseline",
        "commands": [
            { "name": "create", "parameters": ["name", "baseline", "port", "memory", "swap", "cpu_shares", "restart", "max_retries", "no_data", "start", "args"] },
            { "name": "delete", "parameters": ["name", "keep_data"] },
            { "name": "start", "parameters": ["name"] },
            { "name": "stop", "parameters": ["name"] },
            { "name": "restart", "parameters": ["name"] },
            { "name": "command", "parameters": ["name", "args"] },
            { "name": "shell", "parameters": ["name"] },
            { "name": "update", "parameters": ["name"] },
            { "name": "list", "parameters": ["all"] }
        ],
        "mount_order": ["<name>-data", "<baseline>"],
        "server_port": SERVER_PORT
    })
}
