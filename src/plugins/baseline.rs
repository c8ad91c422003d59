//! Baselines: containers that only carry shared server binaries and default configuration
//! for workers to mount.

use crate::core::entity::{Entity, EntityDetail, EntityKind, EntityRef};
use crate::core::error::HiveError;
use crate::core::hive::Hive;
use crate::core::image::ImageRef;
use crate::core::output::{self, OutputFormat};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[clap(name = "baseline", about = "Manage shared server baselines")]
pub struct BaselineCli {
    #[clap(subcommand)]
    pub command: BaselineCommand,
}

#[derive(Subcommand, Debug)]
pub enum BaselineCommand {
    /// Register and create a baseline. The image defaults to the baseline name.
    Create {
        name: String,
        #[clap(long)]
        image: Option<String>,
        #[clap(long)]
        tag: Option<String>,
        /// Build context used instead of pulling.
        #[clap(long)]
        path: Option<PathBuf>,
    },
    Delete {
        name: String,
    },
    /// Refresh the image and recreate the container.
    Update {
        name: String,
    },
    List,
}

pub fn baseline_ref(name: &str) -> EntityRef {
    EntityRef::new(EntityKind::Baseline, name)
}

pub fn baseline_entity(hive: &Hive, name: &str, image: ImageRef) -> Result<Entity, HiveError> {
    Ok(
        Entity::new(name, image, EntityDetail::Baseline, hive.label_prefix())?
            .with_command(["true"]),
    )
}

pub fn create_baseline(hive: &Hive, name: &str, image: ImageRef) -> Result<Entity, HiveError> {
    let baseline = hive.create(baseline_entity(hive, name, image)?)?;
    info!(baseline = %baseline.name, "baseline created");
    Ok(baseline)
}

/// Registers `name` with an image of the same name unless it is already known. The
/// container is left for dependency resolution to create. Caller holds the lock.
pub fn register_if_missing(hive: &Hive, name: &str) -> Result<(), HiveError> {
    let registry = hive.registry(EntityKind::Baseline);
    if registry.contains(name)? {
        return Ok(());
    }
    registry.insert_new(baseline_entity(hive, name, ImageRef::new(name))?)?;
    info!(baseline = %name, "baseline registered on demand");
    Ok(())
}

pub fn run_baseline_cli(
    hive: &Hive,
    cli: BaselineCli,
    format: OutputFormat,
) -> Result<(), HiveError> {
    match cli.command {
        BaselineCommand::Create {
            name,
            image,
            tag,
            path,
        } => {
            let mut image_ref = ImageRef::new(image.unwrap_or_else(|| name.clone()));
            if let Some(tag) = tag {
                image_ref = image_ref.with_tag(tag);
            }
            if let Some(path) = path {
                image_ref = image_ref.with_build_path(path);
            }
            let baseline = create_baseline(hive, &name, image_ref)?;
            output::emit(
                format,
                "baseline.create",
                &format!("baseline '{}' {}", baseline.name, baseline.state()),
                json!({ "baseline": output::entity_json(&baseline) }),
            );
        }
        BaselineCommand::Delete { name } => {
            hive.delete(&baseline_ref(&name), true)?;
            output::emit(
                format,
                "baseline.delete",
                &format!("baseline '{}' deleted", name),
                json!({ "name": name }),
            );
        }
        BaselineCommand::Update { name } => {
            let baseline = hive.update(&baseline_ref(&name))?;
            output::emit(
                format,
                "baseline.update",
                &format!("baseline '{}' {}", baseline.name, baseline.state()),
                json!({ "baseline": output::entity_json(&baseline) }),
            );
        }
        BaselineCommand::List => {
            output::print_entities(format, &hive.list(EntityKind::Baseline)?);
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "baseline",
        "version": "0.3.0",
        "description": "Shared read-only server binaries and configuration mounted by workers",
        "commands": [
            { "name": "create", "parameters": ["name", "image", "tag", "path"] },
            { "name": "delete", "parameters": ["name"] },
            { "name": "update", "parameters": ["name"] },
            { "name": "list", "parameters": [] }
        ]
    })
}
