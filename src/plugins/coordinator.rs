//! The coordinator: the orchestrator's own management container.
//!
//! It is never created by us. `create` adopts the container already carrying the
//! coordinator label, and every other lifecycle operation is refused.

use crate::core::entity::{Entity, EntityDetail, EntityKind, EntityRef};
use crate::core::error::HiveError;
use crate::core::hive::Hive;
use crate::core::output::{self, OutputFormat};
use clap::{Parser, Subcommand};
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(name = "coordinator", about = "Inspect the management container")]
pub struct CoordinatorCli {
    #[clap(subcommand)]
    pub command: CoordinatorCommand,
}

#[derive(Subcommand, Debug)]
pub enum CoordinatorCommand {
    /// Record the running management container.
    Adopt,
    Show,
}

pub fn coordinator_ref(hive: &Hive) -> EntityRef {
    EntityRef::new(EntityKind::Coordinator, hive.config().coordinator.name.clone())
}

pub fn coordinator_entity(hive: &Hive) -> Result<Entity, HiveError> {
    Ok(Entity::new(
        hive.config().coordinator.name.clone(),
        hive.config().images.coordinator.to_image_ref(),
        EntityDetail::Coordinator,
        hive.label_prefix(),
    )?)
}

/// Registers the coordinator record if needed, leaving adoption to dependency resolution.
/// Caller holds the lock.
pub fn register_if_missing(hive: &Hive) -> Result<EntityRef, HiveError> {
    let reference = coordinator_ref(hive);
    let registry = hive.registry(EntityKind::Coordinator);
    if !registry.contains(&reference.name)? {
        registry.insert_new(coordinator_entity(hive)?)?;
    }
    Ok(reference)
}

/// Registers and adopts the coordinator, returning the stored record.
pub fn adopt(hive: &Hive) -> Result<Entity, HiveError> {
    let reference = coordinator_ref(hive);
    let _guard = hive.lock(std::slice::from_ref(&reference))?;
    match hive.get(&reference)? {
        Some(_) => hive.mutate_locked(&reference, |lc, e| lc.create(e)),
        None => hive.create_locked(coordinator_entity(hive)?),
    }
}

pub fn run_coordinator_cli(
    hive: &Hive,
    cli: CoordinatorCli,
    format: OutputFormat,
) -> Result<(), HiveError> {
    match cli.command {
        CoordinatorCommand::Adopt => {
            let queen = adopt(hive)?;
            output::emit(
                format,
                "coordinator.adopt",
                &format!(
                    "coordinator '{}' adopted {}",
                    queen.name,
                    queen.runtime_id().unwrap_or("-")
                ),
                json!({ "coordinator": output::entity_json(&queen) }),
            );
        }
        CoordinatorCommand::Show => {
            let entities: Vec<Entity> = hive.get(&coordinator_ref(hive))?.into_iter().collect();
            output::print_entities(format, &entities);
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "coordinator",
        "version": "0.3.0",
        "description": "Singleton management container, adopted by label",
        "commands": [
            { "name": "adopt", "parameters": [] },
            { "name": "show", "parameters": [] }
        ],
        "supported_operations": ["create"]
    })
}
