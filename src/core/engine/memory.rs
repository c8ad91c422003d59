//! In-process container engine.
//!
//! Keeps containers and images in memory and records every call it receives, which makes
//! it the engine of choice for tests and for `--dry-run` sessions. Failures can be armed
//! per operation to exercise partial-failure paths.

use super::{ContainerEngine, ContainerStatus, ContainerSummary, CreateRequest, image_reference};
use crate::core::error::EngineError;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    ListContainers(String),
    CreateContainer { name: String, mounts: Vec<String> },
    StartContainer(String),
    StopContainer(String),
    RemoveContainer { id: String, with_volumes: bool },
    Exec { id: String, command: Vec<String>, interactive: bool },
    PullImage(String),
    BuildImage { path: String, tag: String },
    ImageExists(String),
    InspectImage(String),
    RemoveDanglingImages,
}

impl EngineCall {
    /// Queries leave engine state untouched; everything else is a mutation.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            EngineCall::ListContainers(_) | EngineCall::ImageExists(_) | EngineCall::InspectImage(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FailOp {
    Create,
    Start,
    Stop,
    Remove,
    Exec,
    Pull,
    Build,
}

#[derive(Debug)]
struct StoredContainer {
    summary: ContainerSummary,
    request: Option<CreateRequest>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: BTreeMap<String, StoredContainer>,
    local_images: BTreeSet<String>,
    remote_images: BTreeSet<String>,
    dangling_images: Vec<String>,
    open_registry: bool,
    failing: BTreeSet<FailOp>,
    failing_containers: BTreeSet<(FailOp, String)>,
    calls: Vec<EngineCall>,
    next_id: u64,
}

impl Inner {
    fn fresh_id(&mut self) -> String {
        self.next_id += 1;
        format!("{:012x}", 0xc0ffee_000000_u64 + self.next_id)
    }

    fn check(&self, op: FailOp, command: &str) -> Result<(), EngineError> {
        if self.failing.contains(&op) {
            return Err(EngineError::Failed {
                command: command.to_string(),
                code: Some(1),
                stderr: format!("injected {:?} failure", op),
            });
        }
        Ok(())
    }

    fn check_container(&self, op: FailOp, id: &str, command: &str) -> Result<(), EngineError> {
        self.check(op, command)?;
        if self.failing_containers.contains(&(op, id.to_string())) {
            return Err(EngineError::Failed {
                command: format!("{} {}", command, id),
                code: Some(1),
                stderr: format!("injected {:?} failure for {}", op, id),
            });
        }
        Ok(())
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut StoredContainer, EngineError> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("no such container: {}", id)))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryEngine {
    inner: Mutex<Inner>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Image already present in local storage.
    pub fn with_local_image(self, reference: &str) -> Self {
        self.state().local_images.insert(reference.to_string());
        self
    }

    /// Image that can be pulled from the registry.
    pub fn with_remote_image(self, reference: &str) -> Self {
        self.state().remote_images.insert(reference.to_string());
        self
    }

    /// Every pull succeeds, whatever the image.
    pub fn with_open_registry(self) -> Self {
        self.state().open_registry = true;
        self
    }

    pub fn with_dangling_image(self, id: &str) -> Self {
        self.state().dangling_images.push(id.to_string());
        self
    }

    /// Registers a container that was not created through this engine handle, e.g. the
    /// coordinator's own management container.
    pub fn add_external_container(&self, label: &str, value: &str, status: ContainerStatus) -> String {
        let mut state = self.state();
        let id = state.fresh_id();
        state.containers.insert(
            id.clone(),
            StoredContainer {
                summary: ContainerSummary {
                    id: id.clone(),
                    labels: BTreeMap::from([(label.to_string(), value.to_string())]),
                    status,
                },
                request: None,
            },
        );
        id
    }

    /// Drops a container behind the orchestrator's back, leaving a stale id.
    pub fn remove_externally(&self, id: &str) -> bool {
        self.state().containers.remove(id).is_some()
    }

    pub fn set_status(&self, id: &str, status: ContainerStatus) {
        if let Some(c) = self.state().containers.get_mut(id) {
            c.summary.status = status;
        }
    }

    pub fn fail_on(&self, op: FailOp) {
        self.state().failing.insert(op);
    }

    /// Fails `op` for one container only.
    pub fn fail_on_container(&self, op: FailOp, id: &str) {
        self.state().failing_containers.insert((op, id.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state();
        state.failing.clear();
        state.failing_containers.clear();
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Calls that changed engine state.
    pub fn mutating_calls(&self) -> Vec<EngineCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| !c.is_query())
            .cloned()
            .collect()
    }

    pub fn count_calls(&self, pred: impl Fn(&EngineCall) -> bool) -> usize {
        self.state().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn container(&self, id: &str) -> Option<ContainerSummary> {
        self.state().containers.get(id).map(|c| c.summary.clone())
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.state().containers.contains_key(id)
    }

    pub fn create_request(&self, id: &str) -> Option<CreateRequest> {
        self.state()
            .containers
            .get(id)
            .and_then(|c| c.request.clone())
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    pub fn has_local_image(&self, reference: &str) -> bool {
        self.state().local_images.contains(reference)
    }
}

fn matches_image(images: &BTreeSet<String>, name: &str, tag: Option<&str>) -> bool {
    match tag {
        Some(tag) if !tag.is_empty() => images.contains(&image_reference(name, Some(tag))),
        _ => images
            .iter()
            .any(|img| img == name || img.starts_with(&format!("{}:", name))),
    }
}

impl ContainerEngine for InMemoryEngine {
    fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::ListContainers(label.to_string()));
        Ok(state
            .containers
            .values()
            .filter(|c| c.summary.labels.contains_key(label))
            .map(|c| c.summary.clone())
            .collect())
    }

    fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::CreateContainer {
            name: request.name.clone(),
            mounts: request.mounts.clone(),
        });
        state.check(FailOp::Create, "create")?;
        if !matches_image(&state.local_images, &request.image, None)
            && !state.local_images.contains(&request.image)
        {
            return Err(EngineError::NotFound(format!("no such image: {}", request.image)));
        }
        for mount in &request.mounts {
            if !state.containers.contains_key(mount) {
                return Err(EngineError::NotFound(format!("no such container: {}", mount)));
            }
        }
        if state
            .containers
            .values()
            .any(|c| c.request.as_ref().is_some_and(|r| r.name == request.name))
        {
            return Err(EngineError::Failed {
                command: "create".to_string(),
                code: Some(125),
                stderr: format!("container name \"{}\" is already in use", request.name),
            });
        }
        let id = state.fresh_id();
        state.containers.insert(
            id.clone(),
            StoredContainer {
                summary: ContainerSummary {
                    id: id.clone(),
                    labels: request.labels.clone(),
                    status: ContainerStatus::Created,
                },
                request: Some(request.clone()),
            },
        );
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::StartContainer(id.to_string()));
        state.check_container(FailOp::Start, id, "start")?;
        state.container_mut(id)?.summary.status = ContainerStatus::Running;
        Ok(())
    }

    fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::StopContainer(id.to_string()));
        state.check_container(FailOp::Stop, id, "stop")?;
        state.container_mut(id)?.summary.status = ContainerStatus::Exited;
        Ok(())
    }

    fn remove_container(&self, id: &str, with_volumes: bool) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveContainer {
            id: id.to_string(),
            with_volumes,
        });
        state.check_container(FailOp::Remove, id, "rm")?;
        let running = state.container_mut(id)?.summary.status == ContainerStatus::Running;
        if running {
            return Err(EngineError::Failed {
                command: format!("rm {}", id),
                code: Some(1),
                stderr: "cannot remove a running container".to_string(),
            });
        }
        state.containers.remove(id);
        Ok(())
    }

    fn exec_in_container(
        &self,
        id: &str,
        command: &[String],
        interactive: bool,
    ) -> Result<String, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::Exec {
            id: id.to_string(),
            command: command.to_vec(),
            interactive,
        });
        state.check(FailOp::Exec, "exec")?;
        if state.container_mut(id)?.summary.status != ContainerStatus::Running {
            return Err(EngineError::Failed {
                command: format!("exec {}", id),
                code: Some(1),
                stderr: format!("container {} is not running", id),
            });
        }
        Ok(command.join(" "))
    }

    fn pull_image(&self, name: &str, tag: Option<&str>) -> Result<(), EngineError> {
        let reference = image_reference(name, tag);
        let mut state = self.state();
        state.calls.push(EngineCall::PullImage(reference.clone()));
        state.check(FailOp::Pull, "pull")?;
        if !state.open_registry && !matches_image(&state.remote_images, name, tag) {
            return Err(EngineError::NotFound(reference));
        }
        state.local_images.insert(reference);
        Ok(())
    }

    fn build_image(&self, path: &Path, tag: &str) -> Result<(), EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::BuildImage {
            path: path.to_string_lossy().to_string(),
            tag: tag.to_string(),
        });
        state.check(FailOp::Build, "build")?;
        state.local_images.insert(tag.to_string());
        Ok(())
    }

    fn image_exists(&self, name: &str, tag: Option<&str>) -> Result<bool, EngineError> {
        let mut state = self.state();
        state
            .calls
            .push(EngineCall::ImageExists(image_reference(name, tag)));
        Ok(matches_image(&state.local_images, name, tag))
    }

    fn inspect_image(&self, name: &str) -> Result<Option<serde_json::Value>, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::InspectImage(name.to_string()));
        if matches_image(&state.local_images, name, None) || state.local_images.contains(name) {
            return Ok(Some(serde_json::json!({ "RepoTags": [name] })));
        }
        Ok(None)
    }

    fn remove_dangling_images(&self) -> Result<Vec<String>, EngineError> {
        let mut state = self.state();
        state.calls.push(EngineCall::RemoveDanglingImages);
        Ok(std::mem::take(&mut state.dangling_images))
    }
}
