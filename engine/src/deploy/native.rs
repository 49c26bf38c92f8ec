//! Native process launcher

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::deploy::supervisor::{Instance, LaunchRequest, Launcher};
use crate::errors::EngineError;
use crate::filesys::dir::Dir;
use crate::models::deployment::ProcessRef;
use crate::models::tool::{substitute_port, LaunchConfig};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launches tools as child processes of the engine
pub struct NativeLauncher {
    log_dir: Option<Dir>,
}

impl NativeLauncher {
    pub fn new(log_dir: Option<Dir>) -> Self {
        Self { log_dir }
    }

    async fn output_for(&self, deployment_id: &str) -> (Stdio, Stdio) {
        let Some(dir) = &self.log_dir else {
            return (Stdio::null(), Stdio::null());
        };

        if let Err(e) = dir.create().await {
            warn!("Unable to create instance log directory: {}", e);
            return (Stdio::null(), Stdio::null());
        }

        let path = dir.file(&format!("{}.log", deployment_id)).path().to_path_buf();
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);
        match file.and_then(|f| Ok((f.try_clone()?, f))) {
            Ok((stdout, stderr)) => (Stdio::from(stdout), Stdio::from(stderr)),
            Err(e) => {
                warn!("Unable to open instance log {}: {}", path.display(), e);
                (Stdio::null(), Stdio::null())
            }
        }
    }
}

#[async_trait]
impl Launcher for NativeLauncher {
    async fn launch(&self, request: &LaunchRequest) -> Result<Box<dyn Instance>, EngineError> {
        let LaunchConfig::Process {
            command,
            args,
            env,
            working_dir,
        } = &request.tool.launch_config
        else {
            return Err(EngineError::StartFailure(format!(
                "{} is not a process tool",
                request.tool.slug
            )));
        };

        let args = substitute_port(args, request.port);
        debug!("Spawning {} {:?}", command, args);

        let (stdout, stderr) = self.output_for(&request.deployment_id).await;

        let mut cmd = Command::new(command);
        cmd.args(&args)
            .envs(env)
            .env("PORT", request.port.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(true);
        if let Some(dir) = working_dir {
            cmd.current_dir(dir);
        }

        let child = cmd
            .spawn()
            .map_err(|e| EngineError::StartFailure(format!("Failed to run {}: {}", command, e)))?;
        let pid = child
            .id()
            .ok_or_else(|| EngineError::StartFailure(format!("{} exited during spawn", command)))?;

        info!("Spawned {} (pid {})", command, pid);
        Ok(Box::new(NativeInstance {
            pid,
            child: Mutex::new(child),
        }))
    }

    async fn terminate_orphan(
        &self,
        process: &ProcessRef,
        grace: Duration,
    ) -> Result<(), EngineError> {
        match process {
            ProcessRef::Native { pid } => terminate_pid(*pid, grace).await,
            _ => Ok(()),
        }
    }
}

/// A child process owned by the engine
pub struct NativeInstance {
    pid: u32,
    child: Mutex<Child>,
}

#[async_trait]
impl Instance for NativeInstance {
    fn process_ref(&self) -> ProcessRef {
        ProcessRef::Native { pid: self.pid }
    }

    async fn is_alive(&self) -> bool {
        match self.child.try_lock() {
            Ok(mut child) => matches!(child.try_wait(), Ok(None)),
            // Being terminated right now
            Err(_) => pid_alive(self.pid),
        }
    }

    async fn terminate(&self, grace: Duration) -> Result<(), EngineError> {
        let mut child = self.child.lock().await;

        if let Ok(Some(status)) = child.try_wait() {
            debug!("Process {} already exited ({})", self.pid, status);
            return Ok(());
        }

        send_terminate(self.pid);
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Process {} exited gracefully ({})", self.pid, status);
                Ok(())
            }
            Ok(Err(e)) => Err(EngineError::IoError(e)),
            Err(_) => {
                warn!("Process {} ignored termination for {:?}, killing", self.pid, grace);
                child.kill().await?;
                Ok(())
            }
        }
    }
}

/// Whether a process with this pid exists and is not a zombie
pub fn pid_alive(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    sys.process(pid)
        .map(|p| p.status() != ProcessStatus::Zombie)
        .unwrap_or(false)
}

/// Terminate a process the engine does not hold a handle for
pub async fn terminate_pid(pid: u32, grace: Duration) -> Result<(), EngineError> {
    if !pid_alive(pid) {
        return Ok(());
    }

    info!("Terminating orphaned process {}", pid);
    send_terminate(pid);

    let deadline = tokio::time::Instant::now() + grace;
    while tokio::time::Instant::now() < deadline {
        if !pid_alive(pid) {
            return Ok(());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }

    if pid_alive(pid) {
        warn!("Orphaned process {} still alive after {:?}, killing", pid, grace);
        send_kill(pid);
    }
    Ok(())
}

fn send_terminate(pid: u32) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(pid as i32, libc::SIGTERM);
        }
    }
    #[cfg(not(unix))]
    {
        send_kill(pid);
    }
}

fn send_kill(pid: u32) {
    #[cfg(unix)]
    {
        unsafe {
            libc::kill(pid as i32, libc::SIGKILL);
        }
    }
    #[cfg(not(unix))]
    {
        let mut sys = System::new();
        let pid = Pid::from_u32(pid);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = sys.process(pid) {
            process.kill();
        }
    }
}
