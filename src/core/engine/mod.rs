//! Container engine seam.
//!
//! Everything the lifecycle engine needs from the external container engine goes through
//! [`ContainerEngine`]. The engine handle is passed explicitly into every component that
//! needs it, so several endpoints (or a test double) can coexist in one process.

pub mod docker;
pub mod memory;

use crate::core::entity::{PortPolicy, ResourceLimits, RestartPolicy};
use crate::core::error::EngineError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

pub use docker::DockerCli;
pub use memory::{EngineCall, InMemoryEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Created,
    Running,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSummary {
    pub id: String,
    pub labels: BTreeMap<String, String>,
    pub status: ContainerStatus,
}

/// Everything the engine needs to materialize one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRequest {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub entrypoint: Option<String>,
    /// Runtime ids whose volumes are mounted, in precedence order.
    pub mounts: Vec<String>,
    pub limits: ResourceLimits,
    pub restart: RestartPolicy,
    pub ports: PortPolicy,
    pub labels: BTreeMap<String, String>,
}

pub trait ContainerEngine: Send + Sync {
    /// All containers (running or not) carrying `label`.
    fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, EngineError>;
    fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError>;
    fn start_container(&self, id: &str) -> Result<(), EngineError>;
    fn stop_container(&self, id: &str) -> Result<(), EngineError>;
    fn remove_container(&self, id: &str, with_volumes: bool) -> Result<(), EngineError>;
    fn exec_in_container(
        &self,
        id: &str,
        command: &[String],
        interactive: bool,
    ) -> Result<String, EngineError>;
    /// Returns [`EngineError::NotFound`] when the registry has no such image.
    fn pull_image(&self, name: &str, tag: Option<&str>) -> Result<(), EngineError>;
    fn build_image(&self, path: &Path, tag: &str) -> Result<(), EngineError>;
    fn image_exists(&self, name: &str, tag: Option<&str>) -> Result<bool, EngineError>;
    fn inspect_image(&self, name: &str) -> Result<Option<serde_json::Value>, EngineError>;
    fn remove_dangling_images(&self) -> Result<Vec<String>, EngineError>;
}

/// `name[:tag]` as understood by the engine.
pub fn image_reference(name: &str, tag: Option<&str>) -> String {
    match tag {
        Some(tag) if !tag.is_empty() => format!("{}:{}", name, tag),
        _ => name.to_string(),
    }
}
