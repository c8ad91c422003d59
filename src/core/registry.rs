//! Per-kind entity registries.
//!
//! A registry is the in-memory index of one kind's entities, mirrored into the persistence
//! adapter on every change. The in-memory copy is updated first; a failed write is reported
//! to the caller but not rolled back.

use crate::core::entity::{Entity, EntityKind, EntityRef, entity_key};
use crate::core::error::{EntityError, HiveError, PersistenceError};
use crate::core::store::{PersistenceAdapter, Record};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

pub struct Registry {
    kind: EntityKind,
    store: Arc<dyn PersistenceAdapter>,
    entities: Mutex<BTreeMap<String, Entity>>,
}

impl Registry {
    /// Loads every persisted record of `kind`. Records tagged with another kind, or whose
    /// body no longer decodes, are skipped.
    pub fn load(kind: EntityKind, store: Arc<dyn PersistenceAdapter>) -> Result<Self, HiveError> {
        let prefix = format!("{}/", kind.as_str());
        let mut entities = BTreeMap::new();
        for key in store.list_keys(&prefix)? {
            let Some(record) = store.get(&key)? else {
                continue;
            };
            if record.kind != kind.as_str() {
                warn!(key = %key, stored_kind = %record.kind, "skipping record of another kind");
                continue;
            }
            match serde_json::from_value::<Entity>(record.body) {
                Ok(entity) if entity.kind == kind => {
                    entities.insert(entity.name.clone(), entity);
                }
                Ok(entity) => {
                    warn!(key = %key, body_kind = %entity.kind, "skipping record with mismatched body");
                }
                Err(err) => {
                    warn!(key = %key, error = %err, "skipping undecodable record");
                }
            }
        }
        debug!(kind = %kind, count = entities.len(), "registry loaded");
        Ok(Self {
            kind,
            store,
            entities: Mutex::new(entities),
        })
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    fn entities(&self) -> Result<MutexGuard<'_, BTreeMap<String, Entity>>, HiveError> {
        self.entities
            .lock()
            .map_err(|_| PersistenceError::Poisoned("registry").into())
    }

    pub fn get(&self, name: &str) -> Result<Option<Entity>, HiveError> {
        Ok(self.entities()?.get(name).cloned())
    }

    /// Like [`Registry::get`] but a missing entity is an error.
    pub fn require(&self, name: &str) -> Result<Entity, HiveError> {
        self.get(name)?.ok_or_else(|| {
            EntityError::Missing {
                kind: self.kind,
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn contains(&self, name: &str) -> Result<bool, HiveError> {
        Ok(self.entities()?.contains_key(name))
    }

    /// Registers a new entity and persists it. Fails with `Duplicate` without touching state
    /// when the name is taken.
    pub fn insert_new(&self, entity: Entity) -> Result<(), HiveError> {
        self.ensure_kind(&entity)?;
        {
            let mut entities = self.entities()?;
            if entities.contains_key(&entity.name) {
                return Err(EntityError::Duplicate {
                    kind: self.kind,
                    name: entity.name.clone(),
                }
                .into());
            }
            entities.insert(entity.name.clone(), entity.clone());
        }
        self.persist(&entity)
    }

    /// Stores the full current state of `entity`.
    pub fn commit(&self, entity: &Entity) -> Result<(), HiveError> {
        self.ensure_kind(entity)?;
        self.entities()?
            .insert(entity.name.clone(), entity.clone());
        self.persist(entity)
    }

    /// Forgets `name` in memory and in storage.
    pub fn remove(&self, name: &str) -> Result<Entity, HiveError> {
        let removed = self.entities()?.remove(name).ok_or_else(|| EntityError::Missing {
            kind: self.kind,
            name: name.to_string(),
        })?;
        self.store.delete(&entity_key(self.kind, name))?;
        debug!(kind = %self.kind, name = %name, "record removed");
        Ok(removed)
    }

    pub fn list(&self) -> Result<Vec<Entity>, HiveError> {
        Ok(self.entities()?.values().cloned().collect())
    }

    pub fn names(&self) -> Result<Vec<String>, HiveError> {
        Ok(self.entities()?.keys().cloned().collect())
    }

    fn ensure_kind(&self, entity: &Entity) -> Result<(), HiveError> {
        if entity.kind != self.kind {
            return Err(HiveError::Validation(format!(
                "{} cannot be stored in the {} registry",
                entity.reference(),
                self.kind
            )));
        }
        Ok(())
    }

    fn persist(&self, entity: &Entity) -> Result<(), HiveError> {
        let body = serde_json::to_value(entity).map_err(PersistenceError::from)?;
        self.store
            .put(&Record::new(entity.key(), self.kind.as_str(), body))?;
        Ok(())
    }
}

/// One registry per kind, sharing a single persistence adapter.
pub struct Registries {
    workers: Registry,
    drones: Registry,
    baselines: Registry,
    coordinators: Registry,
}

impl Registries {
    pub fn load(store: Arc<dyn PersistenceAdapter>) -> Result<Self, HiveError> {
        Ok(Self {
            workers: Registry::load(EntityKind::Worker, store.clone())?,
            drones: Registry::load(EntityKind::Drone, store.clone())?,
            baselines: Registry::load(EntityKind::Baseline, store.clone())?,
            coordinators: Registry::load(EntityKind::Coordinator, store)?,
        })
    }

    pub fn of(&self, kind: EntityKind) -> &Registry {
        match kind {
            EntityKind::Worker => &self.workers,
            EntityKind::Drone => &self.drones,
            EntityKind::Baseline => &self.baselines,
            EntityKind::Coordinator => &self.coordinators,
        }
    }

    pub fn get(&self, reference: &EntityRef) -> Result<Option<Entity>, HiveError> {
        self.of(reference.kind).get(&reference.name)
    }

    pub fn require(&self, reference: &EntityRef) -> Result<Entity, HiveError> {
        self.of(reference.kind).require(&reference.name)
    }

    pub fn commit(&self, entity: &Entity) -> Result<(), HiveError> {
        self.of(entity.kind).commit(entity)
    }

    pub fn all(&self) -> impl Iterator<Item = &Registry> {
        EntityKind::ALL.into_iter().map(|kind| self.of(kind))
    }
}
