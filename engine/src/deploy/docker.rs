//! Container launcher (docker CLI)

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::deploy::supervisor::{Instance, LaunchRequest, Launcher};
use crate::errors::EngineError;
use crate::models::deployment::ProcessRef;
use crate::models::tool::{substitute_port, LaunchConfig};

/// Bound for `docker inspect` liveness checks
const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Container name for a deployment
pub fn container_name(deployment_id: &str) -> String {
    format!("toolhost-{}", deployment_id)
}

/// Launches container tools through the local docker daemon
#[derive(Debug, Clone)]
pub struct ContainerLauncher {
    docker: String,
}

impl Default for ContainerLauncher {
    fn default() -> Self {
        Self::with_binary("docker")
    }
}

impl ContainerLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive containers through another docker-compatible CLI
    pub fn with_binary(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }
}

/// Build the `docker run` argument list
pub fn run_args(
    name: &str,
    image: &str,
    args: &[String],
    env: &std::collections::HashMap<String, String>,
    host_port: u16,
    container_port: u16,
) -> Vec<String> {
    let mut run = vec![
        "run".to_string(),
        "-d".to_string(),
        "--name".to_string(),
        name.to_string(),
        "-p".to_string(),
        format!("{}:{}", host_port, container_port),
        "-e".to_string(),
        format!("PORT={}", container_port),
    ];

    let mut env: Vec<_> = env.iter().collect();
    env.sort();
    for (key, value) in env {
        run.push("-e".to_string());
        run.push(format!("{}={}", key, value));
    }

    run.push(image.to_string());
    run.extend(substitute_port(args, container_port));
    run
}

#[async_trait]
impl Launcher for ContainerLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Instance>, EngineError> {
        let LaunchConfig::Container {
            image,
            args,
            env,
            container_port,
        } = &request.tool.launch_config
        else {
            return Err(EngineError::StartFailure(format!(
                "{} is not a container tool",
                request.tool.slug
            )));
        };

        let name = container_name(&request.deployment_id);
        info!("Deploying container {} from {}", name, image);

        // Remove a stale container with the same name, if any
        let _ = Command::new(&self.docker)
            .args(["rm", "-f", &name])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        let run = run_args(&name, image, args, env, request.port, *container_port);
        debug!("docker {:?}", run);

        let output = Command::new(&self.docker)
            .args(&run)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::StartFailure(format!("Failed to run docker: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::StartFailure(format!(
                "docker run failed for {}: {}",
                image,
                stderr.trim()
            )));
        }

        Ok(Box::new(ContainerInstance {
            docker: self.docker.clone(),
            name,
        }))
    }

    async fn terminate_orphan(
        &self,
        process: &ProcessRef,
        grace: Duration,
    ) -> Result<(), EngineError> {
        match process {
            ProcessRef::Container { name } => remove_container(&self.docker, name, grace).await,
            _ => Ok(()),
        }
    }
}

/// A container started for one deployment
pub struct ContainerInstance {
    docker: String,
    name: String,
}

impl ContainerInstance {
    pub fn new(docker: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            name: name.into(),
        }
    }
}

#[async_trait]
impl Instance for ContainerInstance {
    fn process_ref(&self) -> ProcessRef {
        ProcessRef::Container {
            name: self.name.clone(),
        }
    }

    /// Only a confirmed exit counts as dead. A slow or unreachable daemon
    /// keeps the container alive for this check.
    async fn is_alive(&self) -> bool {
        match container_state(&self.docker, &self.name).await {
            ContainerState::Running => true,
            ContainerState::Gone => false,
            ContainerState::Unknown => {
                debug!("State of container {} unknown, assuming alive", self.name);
                true
            }
        }
    }

    async fn terminate(&self, grace: Duration) -> Result<(), EngineError> {
        remove_container(&self.docker, &self.name, grace).await
    }
}

/// What `docker inspect` says about a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    /// Exited or no longer present
    Gone,
    /// The daemon could not be asked or did not answer
    Unknown,
}

/// Classify the result of `docker inspect -f {{.State.Running}}`
pub fn parse_inspect(success: bool, stdout: &str, stderr: &str) -> ContainerState {
    if success {
        return match stdout.trim() {
            "true" => ContainerState::Running,
            "false" => ContainerState::Gone,
            _ => ContainerState::Unknown,
        };
    }
    if stderr.contains("No such object") || stderr.contains("No such container") {
        ContainerState::Gone
    } else {
        ContainerState::Unknown
    }
}

/// Ask the daemon for the state of the named container
pub async fn container_state(docker: &str, name: &str) -> ContainerState {
    let inspect = Command::new(docker)
        .args(["inspect", "-f", "{{.State.Running}}", name])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(INSPECT_TIMEOUT, inspect).await {
        Ok(Ok(output)) => parse_inspect(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        ),
        Ok(Err(e)) => {
            warn!("{} inspect failed for {}: {}", docker, name, e);
            ContainerState::Unknown
        }
        Err(_) => {
            warn!("{} inspect timed out for {}", docker, name);
            ContainerState::Unknown
        }
    }
}

/// Stop (graceful, then forced by docker after `grace`) and remove a container.
/// Missing containers are not an error.
pub async fn remove_container(
    docker: &str,
    name: &str,
    grace: Duration,
) -> Result<(), EngineError> {
    let grace_secs = grace.as_secs().to_string();
    debug!("Stopping container {} (grace {}s)", name, grace_secs);

    Command::new(docker)
        .args(["stop", "-t", &grace_secs, name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;

    let _ = Command::new(docker)
        .args(["rm", "-f", name])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    Ok(())
}
