//! Container engine backed by the `docker` (or `podman`) command-line client.

use super::{ContainerEngine, ContainerStatus, ContainerSummary, CreateRequest, image_reference};
use crate::core::entity::{PortPolicy, RestartMode, RestartPolicy};
use crate::core::error::EngineError;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host: host.filter(|h| !h.trim().is_empty()),
        }
    }

    /// Picks `docker`, falling back to `podman`, whichever answers `--version`.
    pub fn detect(host: Option<String>) -> Result<Self, EngineError> {
        for candidate in ["docker", "podman"] {
            if command_exists(candidate) {
                return Ok(Self::new(candidate, host));
            }
        }
        Err(EngineError::NotFound(
            "no container runtime found (docker/podman)".to_string(),
        ))
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("-H").arg(host);
        }
        cmd
    }

    fn run(&self, args: &[String]) -> Result<String, EngineError> {
        debug!(binary = %self.binary, args = ?args, "engine call");
        let output = self
            .base_command()
            .args(args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }
        Err(EngineError::Failed {
            command: format!("{} {}", self.binary, args.join(" ")),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    fn run_attached(&self, args: &[String]) -> Result<(), EngineError> {
        debug!(binary = %self.binary, args = ?args, "engine call (attached)");
        let status = self
            .base_command()
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|source| EngineError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;
        if status.success() {
            return Ok(());
        }
        Err(EngineError::Failed {
            command: format!("{} {}", self.binary, args.join(" ")),
            code: status.code(),
            stderr: String::new(),
        })
    }
}

impl ContainerEngine for DockerCli {
    fn list_containers(&self, label: &str) -> Result<Vec<ContainerSummary>, EngineError> {
        let out = self.run(&strings(&[
            "ps",
            "-a",
            "--no-trunc",
            "--filter",
            &format!("label={}", label),
            "--format",
            "{{json .}}",
        ]))?;
        out.lines()
            .filter(|line| !line.trim().is_empty())
            .map(parse_ps_line)
            .collect()
    }

    fn create_container(&self, request: &CreateRequest) -> Result<String, EngineError> {
        let id = self.run(&build_create_args(request))?;
        let id = id.lines().last().unwrap_or_default().trim().to_string();
        if id.is_empty() {
            return Err(EngineError::Parse(
                "create returned no container id".to_string(),
            ));
        }
        Ok(id)
    }

    fn start_container(&self, id: &str) -> Result<(), EngineError> {
        self.run(&strings(&["start", id])).map(|_| ())
    }

    fn stop_container(&self, id: &str) -> Result<(), EngineError> {
        self.run(&strings(&["stop", id])).map(|_| ())
    }

    fn remove_container(&self, id: &str, with_volumes: bool) -> Result<(), EngineError> {
        let mut args = strings(&["rm"]);
        if with_volumes {
            args.push("-v".to_string());
        }
        args.push(id.to_string());
        self.run(&args).map(|_| ())
    }

    fn exec_in_container(
        &self,
        id: &str,
        command: &[String],
        interactive: bool,
    ) -> Result<String, EngineError> {
        let mut args = strings(&["exec"]);
        if interactive {
            args.push("-it".to_string());
        }
        args.push(id.to_string());
        args.extend(command.iter().cloned());
        if interactive {
            self.run_attached(&args)?;
            return Ok(String::new());
        }
        self.run(&args)
    }

    fn pull_image(&self, name: &str, tag: Option<&str>) -> Result<(), EngineError> {
        let reference = image_reference(name, tag);
        match self.run(&strings(&["pull", &reference])) {
            Ok(_) => Ok(()),
            Err(EngineError::Failed { stderr, .. }) if is_not_found(&stderr) => {
                Err(EngineError::NotFound(reference))
            }
            Err(err) => Err(err),
        }
    }

    fn build_image(&self, path: &Path, tag: &str) -> Result<(), EngineError> {
        let path = path.to_string_lossy().to_string();
        self.run(&strings(&["build", "-q", "-t", tag, &path]))
            .map(|_| ())
    }

    fn image_exists(&self, name: &str, tag: Option<&str>) -> Result<bool, EngineError> {
        let out = self.run(&strings(&["images", "-q", &image_reference(name, tag)]))?;
        Ok(!out.is_empty())
    }

    fn inspect_image(&self, name: &str) -> Result<Option<serde_json::Value>, EngineError> {
        match self.run(&strings(&["image", "inspect", name])) {
            Ok(out) => {
                let parsed: serde_json::Value = serde_json::from_str(&out)
                    .map_err(|e| EngineError::Parse(format!("image inspect: {}", e)))?;
                Ok(parsed.as_array().and_then(|items| items.first().cloned()))
            }
            Err(EngineError::Failed { stderr, .. }) if is_not_found(&stderr) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn remove_dangling_images(&self) -> Result<Vec<String>, EngineError> {
        let out = self.run(&strings(&["images", "-q", "--filter", "dangling=true"]))?;
        let ids: Vec<String> = out
            .lines()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .collect();
        for id in &ids {
            self.run(&strings(&["rmi", id]))?;
        }
        Ok(ids)
    }
}

/// Arguments for `docker create`, in the order the CLI expects them.
pub fn build_create_args(request: &CreateRequest) -> Vec<String> {
    let mut args = vec![
        "create".to_string(),
        "--name".to_string(),
        request.name.clone(),
    ];
    for (key, value) in &request.labels {
        args.push("--label".to_string());
        args.push(format!("{}={}", key, value));
    }
    for mount in &request.mounts {
        args.push("--volumes-from".to_string());
        args.push(mount.clone());
    }
    if let Some(memory) = &request.limits.memory {
        args.push("--memory".to_string());
        args.push(memory.clone());
    }
    if let Some(swap) = &request.limits.swap {
        args.push("--memory-swap".to_string());
        args.push(swap.clone());
    }
    if let Some(shares) = request.limits.cpu_shares {
        args.push("--cpu-shares".to_string());
        args.push(shares.to_string());
    }
    args.push("--restart".to_string());
    args.push(restart_flag(&request.restart));
    match request.ports {
        PortPolicy::None => {}
        PortPolicy::PublishAll => args.push("-P".to_string()),
        PortPolicy::Bind { host, container } => {
            args.push("-p".to_string());
            args.push(format!("{}:{}", host, container));
        }
    }
    if let Some(entrypoint) = &request.entrypoint {
        args.push("--entrypoint".to_string());
        args.push(entrypoint.clone());
    }
    args.push(request.image.clone());
    args.extend(request.command.iter().cloned());
    args
}

fn restart_flag(policy: &RestartPolicy) -> String {
    match policy.mode {
        RestartMode::Always => "always".to_string(),
        RestartMode::OnFailure if policy.max_retries > 0 => {
            format!("on-failure:{}", policy.max_retries)
        }
        RestartMode::OnFailure => "on-failure".to_string(),
        RestartMode::Never => "no".to_string(),
    }
}

/// Parses one `ps --format '{{json .}}'` line. Docker reports labels as `k=v,k=v`,
/// podman as an object; both spell the id differently.
fn parse_ps_line(line: &str) -> Result<ContainerSummary, EngineError> {
    let value: serde_json::Value = serde_json::from_str(line)
        .map_err(|e| EngineError::Parse(format!("ps line: {}", e)))?;
    let id = value
        .get("ID")
        .or_else(|| value.get("Id"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| EngineError::Parse(format!("ps line without id: {}", line)))?
        .to_string();
    let labels = match value.get("Labels") {
        Some(serde_json::Value::String(raw)) => parse_label_string(raw),
        Some(serde_json::Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().unwrap_or_default().to_string()))
            .collect(),
        _ => BTreeMap::new(),
    };
    let state = value
        .get("State")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    Ok(ContainerSummary {
        id,
        labels,
        status: parse_state(&state),
    })
}

fn parse_label_string(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .filter(|pair| !pair.trim().is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (pair.trim().to_string(), String::new()),
        })
        .collect()
}

fn parse_state(state: &str) -> ContainerStatus {
    match state {
        "running" | "restarting" | "paused" => ContainerStatus::Running,
        "created" | "configured" => ContainerStatus::Created,
        _ => ContainerStatus::Exited,
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    ["not found", "no such image", "does not exist", "pull access denied", "manifest unknown"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn command_exists(cmd: &str) -> bool {
    Command::new(cmd)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}
