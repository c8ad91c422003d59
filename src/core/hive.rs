//! The hive: every registry wired to one engine and one store.
//!
//! All public operations here take the per-entity locks for the entity and everything it
//! depends on, run one lifecycle operation and commit the result. Kind-specific workflows in
//! `plugins` compose the same building blocks ([`Hive::lock`], [`Hive::lifecycle`],
//! [`Hive::registry`]) under a single lock scope.

use crate::core::config::Config;
use crate::core::engine::{ContainerEngine, ContainerStatus};
use crate::core::entity::{Entity, EntityKind, EntityRef};
use crate::core::error::{EntityError, HiveError};
use crate::core::image::ImageResolver;
use crate::core::lifecycle::Lifecycle;
use crate::core::locks::{NameGuard, NameLocks};
use crate::core::registry::{Registries, Registry};
use crate::core::store::PersistenceAdapter;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Corrections applied while reconciling persisted state with the engine.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Entities whose container vanished; now Absent.
    pub reset: Vec<String>,
    /// Entities whose status changed behind our back.
    pub refreshed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.reset.is_empty() && self.refreshed.is_empty()
    }
}

pub struct Hive {
    config: Config,
    engine: Arc<dyn ContainerEngine>,
    images: ImageResolver,
    registries: Registries,
    locks: NameLocks,
}

impl Hive {
    /// Loads every registry from `store` and reconciles it with the engine.
    pub fn open(
        engine: Arc<dyn ContainerEngine>,
        store: Arc<dyn PersistenceAdapter>,
        config: Config,
    ) -> Result<Self, HiveError> {
        let hive = Self {
            images: ImageResolver::new(engine.clone()),
            registries: Registries::load(store)?,
            locks: NameLocks::new(),
            engine,
            config,
        };
        let report = hive.reconcile()?;
        if !report.is_clean() {
            info!(
                reset = report.reset.len(),
                refreshed = report.refreshed.len(),
                "state reconciled with engine"
            );
        }
        Ok(hive)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn label_prefix(&self) -> &str {
        &self.config.labels.prefix
    }

    pub fn engine(&self) -> &dyn ContainerEngine {
        self.engine.as_ref()
    }

    pub fn images(&self) -> &ImageResolver {
        &self.images
    }

    pub fn registry(&self, kind: EntityKind) -> &Registry {
        self.registries.of(kind)
    }

    pub fn lifecycle(&self) -> Lifecycle<'_> {
        Lifecycle::new(self.engine.as_ref(), &self.images, &self.registries)
    }

    /// Resets records whose container is gone and refreshes the status of the rest.
    pub fn reconcile(&self) -> Result<ReconcileReport, HiveError> {
        let mut report = ReconcileReport::default();
        for kind in EntityKind::ALL {
            let observed: BTreeMap<String, ContainerStatus> = self
                .engine
                .list_containers(&kind.label(self.label_prefix()))?
                .into_iter()
                .map(|c| (c.id, c.status))
                .collect();
            let registry = self.registries.of(kind);
            for name in registry.names()? {
                let _guard = self.locks.acquire([EntityRef::new(kind, name.clone()).key()])?;
                let Some(mut entity) = registry.get(&name)? else {
                    continue;
                };
                let Some(id) = entity.runtime_id().map(str::to_string) else {
                    continue;
                };
                let status = observed.get(&id).copied();
                if self.lifecycle().reconcile(&mut entity, status) {
                    registry.commit(&entity)?;
                    if status.is_none() {
                        report.reset.push(entity.key());
                    } else {
                        report.refreshed.push(entity.key());
                    }
                }
            }
        }
        Ok(report)
    }

    /// Every key an operation on `roots` may touch: the roots plus their transitive
    /// dependents as currently registered.
    pub fn closure(&self, roots: &[EntityRef]) -> Result<BTreeSet<String>, HiveError> {
        let mut keys = BTreeSet::new();
        let mut pending: Vec<EntityRef> = roots.to_vec();
        while let Some(reference) = pending.pop() {
            if !keys.insert(reference.key()) {
                continue;
            }
            if let Some(entity) = self.registries.get(&reference)? {
                pending.extend(entity.dependents.iter().cloned());
            }
        }
        Ok(keys)
    }

    /// Locks the closure of `roots`. Retries when the dependency graph grew while waiting.
    pub fn lock(&self, roots: &[EntityRef]) -> Result<NameGuard<'_>, HiveError> {
        loop {
            let keys = self.closure(roots)?;
            let guard = self.locks.acquire(keys)?;
            let current = self.closure(roots)?;
            if guard.covers(&current) {
                return Ok(guard);
            }
            debug!("dependency graph changed while locking, retrying");
        }
    }

    pub fn get(&self, reference: &EntityRef) -> Result<Option<Entity>, HiveError> {
        self.registries.get(reference)
    }

    pub fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, HiveError> {
        self.registries.of(kind).list()
    }

    /// Materializes `entity` and registers it. Nothing is registered when creation fails.
    pub fn create(&self, entity: Entity) -> Result<Entity, HiveError> {
        let mut roots = vec![entity.reference()];
        roots.extend(entity.dependents.iter().cloned());
        let _guard = self.lock(&roots)?;
        self.create_locked(entity)
    }

    /// [`Hive::create`] for callers already holding the locks.
    pub fn create_locked(&self, mut entity: Entity) -> Result<Entity, HiveError> {
        let registry = self.registries.of(entity.kind);
        if registry.contains(&entity.name)? {
            return Err(EntityError::Duplicate {
                kind: entity.kind,
                name: entity.name.clone(),
            }
            .into());
        }
        self.lifecycle().create(&mut entity)?;
        registry.insert_new(entity.clone())?;
        Ok(entity)
    }

    pub fn start(&self, reference: &EntityRef) -> Result<Entity, HiveError> {
        self.mutate(reference, |lc, e| lc.start(e))
    }

    pub fn stop(&self, reference: &EntityRef) -> Result<Entity, HiveError> {
        self.mutate(reference, |lc, e| lc.stop(e))
    }

    pub fn restart(&self, reference: &EntityRef) -> Result<Entity, HiveError> {
        self.mutate(reference, |lc, e| lc.restart(e))
    }

    pub fn update(&self, reference: &EntityRef) -> Result<Entity, HiveError> {
        self.mutate(reference, |lc, e| lc.update(e))
    }

    /// Removes the container and then the record.
    pub fn delete(&self, reference: &EntityRef, with_volumes: bool) -> Result<(), HiveError> {
        let _guard = self.lock(std::slice::from_ref(reference))?;
        self.delete_locked(reference, with_volumes)
    }

    pub fn delete_locked(&self, reference: &EntityRef, with_volumes: bool) -> Result<(), HiveError> {
        let registry = self.registries.of(reference.kind);
        let mut entity = registry.require(&reference.name)?;
        match self.lifecycle().delete(&mut entity, with_volumes) {
            Ok(()) => {
                registry.remove(&reference.name)?;
                Ok(())
            }
            Err(err) => {
                registry.commit(&entity)?;
                Err(err)
            }
        }
    }

    pub fn exec(
        &self,
        reference: &EntityRef,
        command: &[String],
        interactive: bool,
    ) -> Result<String, HiveError> {
        let _guard = self.lock(std::slice::from_ref(reference))?;
        let entity = self.registries.require(reference)?;
        self.lifecycle().exec(&entity, command, interactive)
    }

    /// Runs `op` on the stored entity under lock and commits whatever state it leaves.
    pub fn mutate<F>(&self, reference: &EntityRef, op: F) -> Result<Entity, HiveError>
    where
        F: FnOnce(&Lifecycle<'_>, &mut Entity) -> Result<(), HiveError>,
    {
        let _guard = self.lock(std::slice::from_ref(reference))?;
        self.mutate_locked(reference, op)
    }

    pub fn mutate_locked<F>(&self, reference: &EntityRef, op: F) -> Result<Entity, HiveError>
    where
        F: FnOnce(&Lifecycle<'_>, &mut Entity) -> Result<(), HiveError>,
    {
        let registry = self.registries.of(reference.kind);
        let mut entity = registry.require(&reference.name)?;
        let outcome = op(&self.lifecycle(), &mut entity);
        let committed = registry.commit(&entity);
        outcome?;
        committed?;
        Ok(entity)
    }
}
