//! Image maintenance commands.

use crate::core::error::HiveError;
use crate::core::hive::Hive;
use crate::core::image::ImageRef;
use crate::core::output::{self, OutputFormat};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::PathBuf;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ImageRole {
    Worker,
    Drone,
    Coordinator,
}

#[derive(Parser, Debug)]
#[clap(name = "image", about = "Pull, build and clean images")]
pub struct ImageCli {
    #[clap(subcommand)]
    pub command: ImageCommand,
}

#[derive(Subcommand, Debug)]
pub enum ImageCommand {
    /// Make an image available, pulling or building it when absent.
    Ensure {
        /// Image name. Use --role for one of the configured images instead.
        #[clap(required_unless_present = "role", conflicts_with = "role")]
        name: Option<String>,
        #[clap(long, value_enum)]
        role: Option<ImageRole>,
        #[clap(long)]
        tag: Option<String>,
        #[clap(long)]
        path: Option<PathBuf>,
        /// Pull or build even when the image is present.
        #[clap(long, default_value_t = false)]
        rebuild: bool,
    },
    /// Remove dangling images.
    Clean,
}

pub fn configured_image(hive: &Hive, role: ImageRole) -> ImageRef {
    let images = &hive.config().images;
    match role {
        ImageRole::Worker => images.worker.to_image_ref(),
        ImageRole::Drone => images.drone.to_image_ref(),
        ImageRole::Coordinator => images.coordinator.to_image_ref(),
    }
}

pub fn run_image_cli(hive: &Hive, cli: ImageCli, format: OutputFormat) -> Result<(), HiveError> {
    match cli.command {
        ImageCommand::Ensure {
            name,
            role,
            tag,
            path,
            rebuild,
        } => {
            let mut image = match role {
                Some(role) => configured_image(hive, role),
                None => ImageRef::new(name.unwrap_or_default()),
            };
            if let Some(tag) = tag {
                image = image.with_tag(tag);
            }
            if let Some(path) = path {
                image = image.with_build_path(path);
            }
            hive.images().ensure(&image, rebuild)?;
            output::emit(
                format,
                "image.ensure",
                &format!("image '{}' ready", image),
                json!({ "image": image.reference(), "rebuild": rebuild }),
            );
        }
        ImageCommand::Clean => {
            let removed = hive.images().clean()?;
            output::emit(
                format,
                "image.clean",
                &format!("removed {} dangling image(s)", removed.len()),
                json!({ "removed": removed }),
            );
        }
    }
    Ok(())
}

pub fn schema() -> serde_json::Value {
    json!({
        "name": "image",
        "version": "0.3.0",
        "description": "Image resolution: exists, else build from path, else pull",
        "commands": [
            { "name": "ensure", "parameters": ["name", "role", "tag", "path", "rebuild"] },
            { "name": "clean", "parameters": [] }
        ]
    })
}
