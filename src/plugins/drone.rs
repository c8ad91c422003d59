//! Drones: one-shot utility containers that back up or restore a worker's data.
//!
//! A drone mounts the coordinator and its target, runs its task to completion and is left
//! behind as a stopped container until pruned. Completion is not tracked here.

use crate::core::entity::{DroneTask, Entity, EntityDetail, EntityKind, EntityRef, LifecycleState};
use crate::core::error::HiveError;
use crate::core::hive::Hive;
use crate::core::output::{self, OutputFormat};
use crate::core::time;
use crate::plugins::{baseline, coordinator, worker};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[clap(name = "drone", about = "Launch backup and restore tasks")]
pub struct DroneCli {
    #[clap(subcommand)]
    pub command: DroneCommand,
}

#[derive(Subcommand, Debug)]
pub enum DroneCommand {
    /// Back up a worker (or, with --baseline, a baseline).
    Backup {
        target: String,
        #[clap(long, default_value_t = false)]
        baseline: bool,
    },
    /// Restore a worker from a backup.
    Restore {
        target: String,
        backup_path: String,
        #[clap(long, default_value_t = false)]
        baseline: bool,
    },
    List,
    /// Forget drones whose containers are gone. With --finished, also remove stopped ones.
    Prune {
        #[clap(long, default_value_t = false)]
        finished: bool,
    },
}

pub fn drone_name(task: &DroneTask, target: &EntityRef) -> String {
    format!("drone-{}-{}-{}", task.as_str(), target.name, time::short_id())
}

/// Validates the task and launches a drone against `target`: create and start, once each.
/// An invalid task fails before the engine or the registry is touched.
pub fn launch(
    hive: &Hive,
    task: &str,
    backup_path: Option<&str>,
    target: EntityRef,
) -> Result<Entity, HiveError> {
    let task = DroneTask::parse(task, backup_path)?;
    launch_task(hive, task, target)
}

pub fn launch_task(hive: &Hive, task: DroneTask, target: EntityRef) -> Result<Entity, HiveError> {
    if !matches!(target.kind, EntityKind::Worker | EntityKind::Baseline) {
        return Err(HiveError::Validation(format!(
            "drones can only target workers and baselines, not {}",
            target
        )));
    }
    let queen = coordinator::coordinator_ref(hive);
    let name = drone_name(&task, &target);
    let me = EntityRef::new(EntityKind::Drone, name.clone());

    let _guard = hive.lock(&[me.clone(), queen.clone(), target.clone()])?;
    hive.registry(target.kind).require(&target.name)?;
    coordinator::register_if_missing(hive)?;

    let drone = Entity::new(
        name,
        hive.config().images.drone.to_image_ref(),
        EntityDetail::Drone {
            task: task.clone(),
            coordinator: queen.name.clone(),
            target: target.clone(),
        },
        hive.label_prefix(),
    )?
    .with_command(task.command())
    .with_dependents(vec![queen, target]);

    hive.create_locked(drone)?;
    let drone = hive.mutate_locked(&me, |lc, e| lc.start(e))?;
    info!(drone = %drone.name, task = task.as_str(), "drone launched");
    Ok(drone)
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

/// Reconciles with the engine, then drops drones without a container (and, when
/// `finished` is set, stopped drones together with their containers).
pub fn prune(hive: &Hive, finished: bool) -> Result<PruneReport, HiveError> {
    hive.reconcile()?;
    let mut report = PruneReport::default();
    for drone in hive.list(EntityKind::Drone)? {
        let eligible = match drone.state() {
            LifecycleState::Absent => true,
            LifecycleState::Stopped => finished,
            _ => false,
        };
        if !eligible {
            continue;
        }
        match hive.delete(&drone.reference(), true) {
            Ok(()) => report.removed.push(drone.name),
            Err(err) => {
                warn!(drone = %drone.name, error = %err, "prune failed");
                report.failed.push(drone.name);
            }
        }
    }
    Ok(report)
}

fn target_ref(name: &str, baseline_target: bool) -> EntityRef {
    if baseline_target {
        baseline::baseline_ref(name)
    } else {
        worker::worker_ref(name)
    }
}

pub fn run_drone_cli(hive: &Hive, cli: DroneCli, format: OutputFormat) -> Result<(), HiveError> {
    let (task, path, target) = match cli.command {
        DroneCommand::Backup { target, baseline } => ("backup", None, target_ref(&target, baseline)),
        DroneCommand::Restore {
            target,
            backup_path,
            baseline,
        } => ("restore", Some(backup_path), target_ref(&target, baseline)),
        DroneCommand::List => {
            output::print_entities(format, &hive.list(EntityKind::Drone)?);
            return Ok(());
        }
        DroneCommand::Prune { finished } => {
            let report = prune(hive, finished)?;
            output::emit(
                format,
                "drone.prune",
                &format!(
                    "pruned {} drone(s), {} failed",
                    report.removed.len(),
                    report.failed.len()
                ),
                json!({ "removed": report.removed, "failed": report.failed }),
            );
            return Ok(());
        }
    };

    let drone = launch(hive, task, path.as_deref(), target)?;
    output::emit(
        format,
        &format!("drone.{}", task),
        &format!("drone '{}' {}", drone.name, drone.state()),
        json!({ "drone": output::entity_json(&drone) }),
    );
    Ok(())
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "drone",
        "version": "0.3.0",
        "description": "One-shot backup/restore task containers",
        "commands": [
            { "name": "backup", "parameters": ["target", "baseline"] },
            { "name": "restore", "parameters": ["target", "backup_path", "baseline"] },
            { "name": "list", "parameters": [] },
            { "name": "prune", "parameters": ["finished"] }
        ],
        "mount_order": ["<coordinator>", "<target>"]
    })
}
