use crate::core::entity::EntityKind;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failures reported by a container engine implementation.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("failed to spawn engine binary '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: io::Error,
    },
    #[error("engine command `{command}` failed (exit {code:?}): {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("engine object not found: {0}")]
    NotFound(String),
    #[error("unparseable engine output: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Path is not defined")]
    Undefined,
    #[error("Path does not exist or is not a directory: {}", .0.display())]
    Missing(PathBuf),
}

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("Image is not defined")]
    Undefined,
    #[error("Image '{0}' does not exist and could not be pulled or built")]
    Missing(String),
    #[error("Image '{image}' failed to pull: {source}")]
    PullFailed {
        image: String,
        #[source]
        source: EngineError,
    },
    #[error("Image '{image}' failed to build: {source}")]
    BuildFailed {
        image: String,
        #[source]
        source: EngineError,
    },
    #[error("Image '{0}' is not a valid baseline image")]
    Invalid(String),
    #[error(transparent)]
    Path(#[from] PathError),
}

#[derive(Error, Debug)]
pub enum EntityError {
    #[error("{kind} '{name}' already exists")]
    Duplicate { kind: EntityKind, name: String },
    #[error("{kind} '{name}' not found")]
    Missing { kind: EntityKind, name: String },
    #[error("{kind} '{name}' cannot be created: {source}")]
    CreateFailed {
        kind: EntityKind,
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("{kind} '{name}' cannot be deleted: {source}")]
    DeleteFailed {
        kind: EntityKind,
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("{kind} '{name}' cannot be started: {source}")]
    StartFailed {
        kind: EntityKind,
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("{kind} '{name}' cannot be stopped: {source}")]
    StopFailed {
        kind: EntityKind,
        name: String,
        #[source]
        source: EngineError,
    },
    #[error("command on {kind} '{name}' failed: {reason}")]
    CommandFailed {
        kind: EntityKind,
        name: String,
        reason: String,
    },
    #[error("operation '{operation}' is not supported on {kind} '{name}'")]
    Unsupported {
        kind: EntityKind,
        name: String,
        operation: &'static str,
    },
    #[error("invalid drone task '{task}': {reason}")]
    InvalidTask { task: String, reason: String },
    #[error("invalid entity name '{0}'")]
    InvalidName(String),
    #[error("dependency cycle through {kind} '{name}'")]
    DependencyCycle { kind: EntityKind, name: String },
}

/// Wraps the failure of one dependency, tagged with the dependency's name.
#[derive(Error, Debug)]
#[error("dependency '{dependency}' could not be resolved: {source}")]
pub struct DependencyError {
    pub dependency: String,
    #[source]
    pub source: Box<HiveError>,
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("record encoding error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

#[derive(Error, Debug)]
pub enum HiveError {
    #[error(transparent)]
    Image(#[from] ImageError),
    #[error(transparent)]
    Entity(#[from] EntityError),
    #[error(transparent)]
    Dependency(#[from] DependencyError),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<rusqlite::Error> for HiveError {
    fn from(err: rusqlite::Error) -> Self {
        HiveError::Persistence(PersistenceError::Sqlite(err))
    }
}

impl HiveError {
    /// Returns the entity-level error, looking through dependency wrappers.
    pub fn root_entity_error(&self) -> Option<&EntityError> {
        match self {
            HiveError::Entity(err) => Some(err),
            HiveError::Dependency(dep) => dep.source.root_entity_error(),
            _ => None,
        }
    }

    /// Returns the image-level error, looking through dependency wrappers.
    pub fn root_image_error(&self) -> Option<&ImageError> {
        match self {
            HiveError::Image(err) => Some(err),
            HiveError::Dependency(dep) => dep.source.root_image_error(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dependency_error_names_the_dependency() {
        let err = DependencyError {
            dependency: "vanilla".to_string(),
            source: Box::new(HiveError::Image(ImageError::Missing("vanilla".to_string()))),
        };
        let msg = err.to_string();
        assert!(msg.contains("vanilla"));
        assert!(msg.contains("could not be pulled or built"));
    }

    #[test]
    fn root_errors_unwrap_nested_dependencies() {
        let inner = HiveError::Entity(EntityError::Missing {
            kind: EntityKind::Baseline,
            name: "vanilla".to_string(),
        });
        let outer = HiveError::Dependency(DependencyError {
            dependency: "alpha-data".to_string(),
            source: Box::new(HiveError::Dependency(DependencyError {
                dependency: "vanilla".to_string(),
                source: Box::new(inner),
            })),
        });
        assert!(matches!(
            outer.root_entity_error(),
            Some(EntityError::Missing { .. })
        ));
        assert!(outer.root_image_error().is_none());
    }

    #[test]
    fn entity_error_messages_carry_kind_and_name() {
        let err = EntityError::CommandFailed {
            kind: EntityKind::Worker,
            name: "alpha".to_string(),
            reason: "not running".to_string(),
        };
        assert_eq!(err.to_string(), "command on worker 'alpha' failed: not running");
    }
}
