//! Lifecycle state machine.
//!
//! ```text
//! Absent --create--> Created --start--> Running --stop--> Stopped
//!    ^                  |                                    |
//!    +------------------+-------------delete-----------------+
//! ```
//!
//! Operations mutate the entity in place and never persist it themselves: the caller
//! commits the entity after every call, whatever the outcome. Operations that are already
//! satisfied return without touching the engine.

use crate::core::dependency::{self, ResolutionPath};
use crate::core::engine::{ContainerEngine, ContainerStatus, CreateRequest};
use crate::core::entity::{Entity, Materialize, Operation, RunStatus, Runtime};
use crate::core::error::{EngineError, EntityError, HiveError};
use crate::core::image::ImageResolver;
use crate::core::registry::Registries;
use crate::core::time;
use tracing::{debug, info, warn};

pub struct Lifecycle<'h> {
    engine: &'h dyn ContainerEngine,
    images: &'h ImageResolver,
    registries: &'h Registries,
}

impl<'h> Lifecycle<'h> {
    pub fn new(
        engine: &'h dyn ContainerEngine,
        images: &'h ImageResolver,
        registries: &'h Registries,
    ) -> Self {
        Self {
            engine,
            images,
            registries,
        }
    }

    pub(crate) fn registries(&self) -> &'h Registries {
        self.registries
    }

    pub fn create(&self, entity: &mut Entity) -> Result<(), HiveError> {
        let mut path = ResolutionPath::starting_at(entity);
        self.create_in(entity, &mut path)
    }

    pub fn start(&self, entity: &mut Entity) -> Result<(), HiveError> {
        let mut path = ResolutionPath::starting_at(entity);
        self.start_in(entity, &mut path)
    }

    pub(crate) fn create_in(
        &self,
        entity: &mut Entity,
        path: &mut ResolutionPath,
    ) -> Result<(), HiveError> {
        allow(entity, Operation::Create)?;
        if entity.runtime.is_some() {
            debug!(entity = %entity.reference(), "create: already materialized");
            return Ok(());
        }
        match entity.profile().materialize {
            Materialize::AdoptByLabel => self.adopt(entity),
            Materialize::Engine => {
                let id = self.materialize(entity, path)?;
                entity.set_runtime(Some(Runtime {
                    id,
                    status: RunStatus::Created,
                }));
                Ok(())
            }
        }
    }

    /// Resolves image and dependencies, then issues the engine create. Returns the new id.
    fn materialize(&self, entity: &Entity, path: &mut ResolutionPath) -> Result<String, HiveError> {
        self.images.ensure(&entity.image, false)?;
        if entity.profile().validate_image {
            self.images.validate(&entity.image)?;
        }
        let mounts = dependency::resolve(self, entity, path)?;
        let request = create_request(entity, mounts);
        let id = self
            .engine
            .create_container(&request)
            .map_err(|source| EntityError::CreateFailed {
                kind: entity.kind,
                name: entity.name.clone(),
                source,
            })?;
        info!(entity = %entity.reference(), id = %id, "container created");
        Ok(id)
    }

    /// Takes over the first engine container carrying the entity's label.
    fn adopt(&self, entity: &mut Entity) -> Result<(), HiveError> {
        let containers = self.engine.list_containers(&entity.label)?;
        let Some(found) = containers.into_iter().next() else {
            return Err(EntityError::CreateFailed {
                kind: entity.kind,
                name: entity.name.clone(),
                source: EngineError::NotFound(format!("container labelled {}", entity.label)),
            }
            .into());
        };
        info!(entity = %entity.reference(), id = %found.id, "adopted existing container");
        entity.set_runtime(Some(Runtime {
            id: found.id,
            status: RunStatus::Running,
        }));
        Ok(())
    }

    pub(crate) fn start_in(
        &self,
        entity: &mut Entity,
        path: &mut ResolutionPath,
    ) -> Result<(), HiveError> {
        allow(entity, Operation::Start)?;
        if entity.runtime.is_none() {
            self.create_in(entity, path)?;
        }
        let Some(id) = entity.runtime_id().map(str::to_string) else {
            return Ok(());
        };
        if entity.runtime.as_ref().is_some_and(|rt| rt.status == RunStatus::Running) {
            debug!(entity = %entity.reference(), "start: already running");
            return Ok(());
        }
        self.engine
            .start_container(&id)
            .map_err(|source| EntityError::StartFailed {
                kind: entity.kind,
                name: entity.name.clone(),
                source,
            })?;
        entity.set_status(RunStatus::Running);
        info!(entity = %entity.reference(), "started");
        Ok(())
    }

    pub fn stop(&self, entity: &mut Entity) -> Result<(), HiveError> {
        allow(entity, Operation::Stop)?;
        self.stop_running(entity)
            .map_err(|source| {
                EntityError::StopFailed {
                    kind: entity.kind,
                    name: entity.name.clone(),
                    source,
                }
                .into()
            })
    }

    fn stop_running(&self, entity: &mut Entity) -> Result<(), EngineError> {
        let running = match &entity.runtime {
            Some(rt) if rt.status == RunStatus::Running => rt.id.clone(),
            _ => {
                debug!(entity = %entity.reference(), "stop: not running");
                return Ok(());
            }
        };
        self.engine.stop_container(&running)?;
        entity.set_status(RunStatus::Stopped);
        info!(entity = %entity.reference(), "stopped");
        Ok(())
    }

    /// Removes the container. The entity's record is the caller's business.
    pub fn delete(&self, entity: &mut Entity, with_volumes: bool) -> Result<(), HiveError> {
        allow(entity, Operation::Delete)?;
        let Some(id) = entity.runtime_id().map(str::to_string) else {
            debug!(entity = %entity.reference(), "delete: nothing to remove");
            return Ok(());
        };
        let (kind, name) = (entity.kind, entity.name.clone());
        let delete_failed = |source: EngineError| EntityError::DeleteFailed {
            kind,
            name: name.clone(),
            source,
        };
        self.stop_running(entity).map_err(delete_failed)?;
        self.engine
            .remove_container(&id, with_volumes)
            .map_err(delete_failed)?;
        entity.set_runtime(None);
        info!(entity = %entity.reference(), with_volumes, "container removed");
        Ok(())
    }

    pub fn restart(&self, entity: &mut Entity) -> Result<(), HiveError> {
        allow(entity, Operation::Restart)?;
        self.stop(entity)?;
        self.start(entity)
    }

    /// Refreshes the image and swaps the container for a new one with the same
    /// dependencies. The entity keeps running if it was running before.
    pub fn update(&self, entity: &mut Entity) -> Result<(), HiveError> {
        allow(entity, Operation::Update)?;
        self.images.ensure(&entity.image, true)?;
        let Some(previous) = entity.runtime.clone() else {
            return self.create(entity);
        };

        let mut path = ResolutionPath::starting_at(entity);
        let id = self.materialize(entity, &mut path)?;
        if let Err(source) = self.retire(entity, &previous) {
            if let Err(err) = self.engine.remove_container(&id, false) {
                warn!(entity = %entity.reference(), id = %id, error = %err, "replacement container left behind");
            }
            return Err(EntityError::DeleteFailed {
                kind: entity.kind,
                name: entity.name.clone(),
                source,
            }
            .into());
        }
        entity.set_runtime(Some(Runtime {
            id,
            status: RunStatus::Created,
        }));
        info!(entity = %entity.reference(), old = %previous.id, "replaced container");

        if previous.status == RunStatus::Running {
            self.start(entity)?;
        }
        Ok(())
    }

    /// Stops and removes the container an update is replacing. The entity keeps pointing
    /// at it until this succeeds.
    fn retire(&self, entity: &mut Entity, previous: &Runtime) -> Result<(), EngineError> {
        if previous.status == RunStatus::Running {
            self.engine.stop_container(&previous.id)?;
            entity.set_status(RunStatus::Stopped);
        }
        self.engine.remove_container(&previous.id, false)
    }

    /// Runs `command` inside the entity's container. The entity must be running.
    pub fn exec(
        &self,
        entity: &Entity,
        command: &[String],
        interactive: bool,
    ) -> Result<String, HiveError> {
        allow(entity, Operation::Command)?;
        let id = match &entity.runtime {
            Some(rt) if rt.status == RunStatus::Running => rt.id.as_str(),
            _ => {
                return Err(EntityError::CommandFailed {
                    kind: entity.kind,
                    name: entity.name.clone(),
                    reason: "not running".to_string(),
                }
                .into());
            }
        };
        self.engine
            .exec_in_container(id, command, interactive)
            .map_err(|err| {
                EntityError::CommandFailed {
                    kind: entity.kind,
                    name: entity.name.clone(),
                    reason: err.to_string(),
                }
                .into()
            })
    }

    /// Brings the recorded runtime in line with what the engine reports. Returns whether
    /// the entity changed.
    pub fn reconcile(&self, entity: &mut Entity, observed: Option<ContainerStatus>) -> bool {
        let Some(runtime) = entity.runtime.clone() else {
            return false;
        };
        match observed {
            None => {
                warn!(entity = %entity.reference(), id = %runtime.id, "stale runtime id, resetting");
                entity.set_runtime(None);
                true
            }
            Some(status) => {
                let status = match status {
                    ContainerStatus::Created => RunStatus::Created,
                    ContainerStatus::Running => RunStatus::Running,
                    ContainerStatus::Exited => RunStatus::Stopped,
                };
                if status == runtime.status {
                    return false;
                }
                debug!(entity = %entity.reference(), ?status, "status refreshed from engine");
                entity.set_status(status);
                true
            }
        }
    }
}

/// Storage-only entities are created and deleted, never run.
fn allow(entity: &Entity, op: Operation) -> Result<(), EntityError> {
    let storage_ok = !entity.is_storage_only()
        || matches!(op, Operation::Create | Operation::Delete);
    if storage_ok && entity.profile().allows(op) {
        Ok(())
    } else {
        Err(EntityError::Unsupported {
            kind: entity.kind,
            name: entity.name.clone(),
            operation: op.as_str(),
        })
    }
}

/// Engine-side container name: `<label with dashes>-<name>-<id8>`. The suffix lets an
/// update create the replacement before the old container is gone.
pub fn container_name(entity: &Entity) -> String {
    format!(
        "{}-{}-{}",
        entity.label.replace('.', "-"),
        entity.name,
        time::short_id()
    )
}

fn create_request(entity: &Entity, mounts: Vec<String>) -> CreateRequest {
    CreateRequest {
        name: container_name(entity),
        image: entity.image.reference(),
        command: entity.command.clone(),
        entrypoint: entity.entrypoint.clone(),
        mounts,
        limits: entity.limits.clone(),
        restart: entity.restart,
        ports: entity.ports,
        labels: entity.labels(),
    }
}
