//! Dependency resolution.
//!
//! Before an entity's container is created, every entry of its `dependents` list must be
//! materialized and, unless it is storage-only, running. The resulting runtime ids are
//! returned in declaration order, which is the mount precedence order.

use crate::core::entity::{Entity, EntityRef, Operation};
use crate::core::error::{DependencyError, EntityError, HiveError};
use crate::core::lifecycle::Lifecycle;
use tracing::debug;

/// Keys of the entities currently being resolved, outermost first.
#[derive(Debug, Default)]
pub struct ResolutionPath {
    stack: Vec<String>,
}

impl ResolutionPath {
    pub fn starting_at(entity: &Entity) -> Self {
        Self {
            stack: vec![entity.key()],
        }
    }

    pub fn contains(&self, reference: &EntityRef) -> bool {
        self.stack.contains(&reference.key())
    }
}

/// Ensures every dependent of `entity` is ready and returns their runtime ids in order.
/// The first failure aborts resolution and is reported as a [`DependencyError`].
pub fn resolve(
    lifecycle: &Lifecycle<'_>,
    entity: &Entity,
    path: &mut ResolutionPath,
) -> Result<Vec<String>, HiveError> {
    let mut ids = Vec::with_capacity(entity.dependents.len());
    for dependency in &entity.dependents {
        let id = ensure_ready(lifecycle, dependency, path).map_err(|source| DependencyError {
            dependency: dependency.name.clone(),
            source: Box::new(source),
        })?;
        ids.push(id);
    }
    Ok(ids)
}

fn ensure_ready(
    lifecycle: &Lifecycle<'_>,
    dependency: &EntityRef,
    path: &mut ResolutionPath,
) -> Result<String, HiveError> {
    if path.contains(dependency) {
        return Err(EntityError::DependencyCycle {
            kind: dependency.kind,
            name: dependency.name.clone(),
        }
        .into());
    }
    let registry = lifecycle.registries().of(dependency.kind);
    let mut entity = registry.require(&dependency.name)?;

    path.stack.push(dependency.key());
    let outcome = bring_up(lifecycle, &mut entity, path);
    path.stack.pop();

    let committed = registry.commit(&entity);
    outcome?;
    committed?;

    debug!(dependency = %dependency, state = %entity.state(), "dependency ready");
    entity.runtime_id().map(str::to_string).ok_or_else(|| {
        HiveError::Validation(format!("{} has no container after resolution", dependency))
    })
}

/// Storage-only entities, and kinds that cannot be started, only need to exist.
fn bring_up(
    lifecycle: &Lifecycle<'_>,
    entity: &mut Entity,
    path: &mut ResolutionPath,
) -> Result<(), HiveError> {
    if entity.is_storage_only() || !entity.profile().allows(Operation::Start) {
        lifecycle.create_in(entity, path)
    } else {
        lifecycle.start_in(entity, path)
    }
}
