//! Entity model: one named, persisted record per managed container.
//!
//! Kinds are a closed set. Everything that differs between kinds (how the container is
//! materialized, which operations are allowed, default restart mode) lives in the
//! [`KindProfile`] table instead of being spread over per-kind types; per-kind data rides
//! along in [`EntityDetail`].

use crate::core::error::EntityError;
use crate::core::image::ImageRef;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

static NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid name pattern"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Worker,
    Drone,
    Baseline,
    Coordinator,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::Worker,
        EntityKind::Drone,
        EntityKind::Baseline,
        EntityKind::Coordinator,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Worker => "worker",
            EntityKind::Drone => "drone",
            EntityKind::Baseline => "baseline",
            EntityKind::Coordinator => "coordinator",
        }
    }

    pub fn profile(self) -> &'static KindProfile {
        match self {
            EntityKind::Worker => &WORKER_PROFILE,
            EntityKind::Drone => &DRONE_PROFILE,
            EntityKind::Baseline => &BASELINE_PROFILE,
            EntityKind::Coordinator => &COORDINATOR_PROFILE,
        }
    }

    /// Engine label marking containers of this kind, e.g. `hivemined.worker`.
    pub fn label(self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.as_str())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Start,
    Stop,
    Delete,
    Restart,
    Update,
    Command,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Create => "create",
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Delete => "delete",
            Operation::Restart => "restart",
            Operation::Update => "update",
            Operation::Command => "command",
        }
    }
}

/// How `create` produces the underlying container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Materialize {
    /// Issue an engine create call.
    Engine,
    /// Adopt the single existing container carrying the kind's label.
    AdoptByLabel,
}

/// Per-kind strategy table.
#[derive(Debug)]
pub struct KindProfile {
    pub kind: EntityKind,
    pub materialize: Materialize,
    pub allowed: &'static [Operation],
    pub default_restart: RestartMode,
    /// Reject images the engine cannot inspect before creating the container.
    pub validate_image: bool,
}

impl KindProfile {
    pub fn allows(&self, op: Operation) -> bool {
        self.allowed.contains(&op)
    }
}

const ALL_OPERATIONS: &[Operation] = &[
    Operation::Create,
    Operation::Start,
    Operation::Stop,
    Operation::Delete,
    Operation::Restart,
    Operation::Update,
    Operation::Command,
];

static WORKER_PROFILE: KindProfile = KindProfile {
    kind: EntityKind::Worker,
    materialize: Materialize::Engine,
    allowed: ALL_OPERATIONS,
    default_restart: RestartMode::Always,
    validate_image: false,
};

static BASELINE_PROFILE: KindProfile = KindProfile {
    kind: EntityKind::Baseline,
    materialize: Materialize::Engine,
    allowed: &[
        Operation::Create,
        Operation::Start,
        Operation::Stop,
        Operation::Delete,
        Operation::Restart,
        Operation::Update,
    ],
    default_restart: RestartMode::Never,
    validate_image: true,
};

static DRONE_PROFILE: KindProfile = KindProfile {
    kind: EntityKind::Drone,
    materialize: Materialize::Engine,
    allowed: &[
        Operation::Create,
        Operation::Start,
        Operation::Stop,
        Operation::Delete,
    ],
    default_restart: RestartMode::Never,
    validate_image: false,
};

static COORDINATOR_PROFILE: KindProfile = KindProfile {
    kind: EntityKind::Coordinator,
    materialize: Materialize::AdoptByLabel,
    allowed: &[Operation::Create],
    default_restart: RestartMode::Always,
    validate_image: false,
};

/// Reference to an entity in another registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub name: String,
}

impl EntityRef {
    pub fn new(kind: EntityKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Registry/persistence/lock key: `<kind>/<name>`.
    pub fn key(&self) -> String {
        entity_key(self.kind, &self.name)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} '{}'", self.kind, self.name)
    }
}

pub fn entity_key(kind: EntityKind, name: &str) -> String {
    format!("{}/{}", kind.as_str(), name)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub memory: Option<String>,
    pub swap: Option<String>,
    pub cpu_shares: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RestartMode {
    Always,
    OnFailure,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    pub mode: RestartMode,
    pub max_retries: u32,
}

impl RestartPolicy {
    pub fn new(mode: RestartMode, max_retries: u32) -> Self {
        Self { mode, max_retries }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum PortPolicy {
    #[default]
    None,
    PublishAll,
    Bind { host: u16, container: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Stopped,
}

/// Engine-side handle. Present exactly while a container exists for the entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Runtime {
    pub id: String,
    pub status: RunStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Absent,
    Created,
    Running,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Created => "created",
            LifecycleState::Running => "running",
            LifecycleState::Stopped => "stopped",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "task")]
pub enum DroneTask {
    Backup,
    Restore { backup_path: String },
}

impl DroneTask {
    /// Accepts `backup`, or `restore` together with a non-empty backup path.
    pub fn parse(task: &str, backup_path: Option<&str>) -> Result<Self, EntityError> {
        match task {
            "backup" => Ok(DroneTask::Backup),
            "restore" => match backup_path.map(str::trim) {
                Some(path) if !path.is_empty() => Ok(DroneTask::Restore {
                    backup_path: path.to_string(),
                }),
                _ => Err(EntityError::InvalidTask {
                    task: task.to_string(),
                    reason: "restore requires a backup path".to_string(),
                }),
            },
            other => Err(EntityError::InvalidTask {
                task: other.to_string(),
                reason: "expected 'backup' or 'restore'".to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DroneTask::Backup => "backup",
            DroneTask::Restore { .. } => "restore",
        }
    }

    pub fn command(&self) -> Vec<String> {
        match self {
            DroneTask::Backup => vec!["backup".to_string()],
            DroneTask::Restore { backup_path } => {
                vec!["restore".to_string(), backup_path.clone()]
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum EntityDetail {
    Worker {
        data_companion: Option<String>,
        companion_of: Option<String>,
    },
    Drone {
        task: DroneTask,
        coordinator: String,
        target: EntityRef,
    },
    Baseline,
    Coordinator,
}

impl EntityDetail {
    pub fn kind(&self) -> EntityKind {
        match self {
            EntityDetail::Worker { .. } => EntityKind::Worker,
            EntityDetail::Drone { .. } => EntityKind::Drone,
            EntityDetail::Baseline => EntityKind::Baseline,
            EntityDetail::Coordinator => EntityKind::Coordinator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub kind: EntityKind,
    pub image: ImageRef,
    pub command: Vec<String>,
    pub entrypoint: Option<String>,
    pub dependents: Vec<EntityRef>,
    pub limits: ResourceLimits,
    pub restart: RestartPolicy,
    pub ports: PortPolicy,
    pub label: String,
    pub runtime: Option<Runtime>,
    pub detail: EntityDetail,
    pub created_at: String,
    pub updated_at: String,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        image: ImageRef,
        detail: EntityDetail,
        label_prefix: &str,
    ) -> Result<Self, EntityError> {
        let name = name.into();
        validate_name(&name)?;
        let kind = detail.kind();
        let now = time::now_epoch_z();
        Ok(Self {
            name,
            kind,
            image,
            command: Vec::new(),
            entrypoint: None,
            dependents: Vec::new(),
            limits: ResourceLimits::default(),
            restart: RestartPolicy::new(kind.profile().default_restart, 0),
            ports: PortPolicy::None,
            label: kind.label(label_prefix),
            runtime: None,
            detail,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_entrypoint(mut self, entrypoint: impl Into<String>) -> Self {
        self.entrypoint = Some(entrypoint.into());
        self
    }

    pub fn with_dependents(mut self, dependents: Vec<EntityRef>) -> Self {
        self.dependents = dependents;
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_restart(mut self, restart: RestartPolicy) -> Self {
        self.restart = restart;
        self
    }

    pub fn with_ports(mut self, ports: PortPolicy) -> Self {
        self.ports = ports;
        self
    }

    pub fn reference(&self) -> EntityRef {
        EntityRef::new(self.kind, self.name.clone())
    }

    pub fn key(&self) -> String {
        entity_key(self.kind, &self.name)
    }

    pub fn profile(&self) -> &'static KindProfile {
        self.kind.profile()
    }

    pub fn runtime_id(&self) -> Option<&str> {
        self.runtime.as_ref().map(|rt| rt.id.as_str())
    }

    pub fn state(&self) -> LifecycleState {
        match &self.runtime {
            None => LifecycleState::Absent,
            Some(rt) => match rt.status {
                RunStatus::Created => LifecycleState::Created,
                RunStatus::Running => LifecycleState::Running,
                RunStatus::Stopped => LifecycleState::Stopped,
            },
        }
    }

    /// Data companions only hold a mount point; they are never started as a service.
    pub fn is_storage_only(&self) -> bool {
        matches!(
            &self.detail,
            EntityDetail::Worker {
                companion_of: Some(_),
                ..
            }
        )
    }

    pub fn data_companion(&self) -> Option<&str> {
        match &self.detail {
            EntityDetail::Worker { data_companion, .. } => data_companion.as_deref(),
            _ => None,
        }
    }

    /// Engine labels attached at creation: `<prefix>.<kind>=<name>`.
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([(self.label.clone(), self.name.clone())])
    }

    pub fn set_runtime(&mut self, runtime: Option<Runtime>) {
        self.runtime = runtime;
        self.touch();
    }

    pub fn set_status(&mut self, status: RunStatus) {
        if let Some(rt) = self.runtime.as_mut() {
            rt.status = status;
        }
        self.touch();
    }

    pub fn touch(&mut self) {
        self.updated_at = time::now_epoch_z();
    }
}

pub fn validate_name(name: &str) -> Result<(), EntityError> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(EntityError::InvalidName(name.to_string()))
    }
}
