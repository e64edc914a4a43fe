//! Supervision of a single managed child process.
//!
//! ```text
//! Idle ──start()──▶ Running ──stop()──▶ Stopping ──▶ Idle (terminated)
//!                     │
//!                     └── launch failure / restart limit ──▶ Idle (halted)
//! ```
//!
//! The monitor task owns the child handle. All other state lives behind one
//! mutex that is never held across an await.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::process::Child;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::command::CommandLine;
use crate::error::SupervisorError;

/// Restart policy for a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartPolicy {
    /// Maximum relaunches after the first start; `None` is unlimited.
    pub max_restarts: Option<u32>,

    /// Delay between an exit and the next launch.
    pub restart_delay: Duration,

    /// Time allowed between SIGTERM and SIGKILL on stop.
    pub stop_grace: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_restarts: None,
            restart_delay: Duration::from_secs(3),
            stop_grace: Duration::from_secs(5),
        }
    }
}

impl RestartPolicy {
    /// Build a policy from a signed limit where any negative value means
    /// unlimited.
    pub fn from_signed_limit(max_restarts: i64, restart_delay: Duration) -> Self {
        Self {
            max_restarts: u32::try_from(max_restarts).ok(),
            restart_delay,
            ..Self::default()
        }
    }
}

/// Lifecycle phase of a supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorPhase {
    /// Not supervising anything.
    Idle,
    /// The monitor loop is active.
    Running,
    /// `stop()` is in progress.
    Stopping,
}

struct SupervisorState {
    phase: SupervisorPhase,
    stop_requested: bool,
    restart_count: u32,
    pid: Option<u32>,
    monitor: Option<JoinHandle<()>>,
    halt_reason: Option<SupervisorError>,
}

struct Shared {
    command: CommandLine,
    policy: RestartPolicy,
    state: Mutex<SupervisorState>,
    cancel: watch::Sender<bool>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn halt(&self, reason: SupervisorError) {
        let mut state = self.lock();
        state.phase = SupervisorPhase::Idle;
        state.pid = None;
        state.halt_reason = Some(reason);
    }
}

/// Keeps one command running, relaunching it when it exits.
///
/// A supervisor is single-use: once stopped or halted it cannot be started
/// again.
#[derive(Clone)]
pub struct ProcessSupervisor {
    shared: Arc<Shared>,
}

impl ProcessSupervisor {
    /// Create an idle supervisor for `command`.
    pub fn new(command: CommandLine, policy: RestartPolicy) -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                command,
                policy,
                state: Mutex::new(SupervisorState {
                    phase: SupervisorPhase::Idle,
                    stop_requested: false,
                    restart_count: 0,
                    pid: None,
                    monitor: None,
                    halt_reason: None,
                }),
                cancel,
            }),
        }
    }

    /// The supervised command.
    pub fn command(&self) -> &CommandLine {
        &self.shared.command
    }

    /// Begin supervision. The process itself is launched by the monitor task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<(), SupervisorError> {
        if self.shared.command.program().is_empty() {
            return Err(SupervisorError::EmptyCommand);
        }

        let mut state = self.shared.lock();
        if state.phase != SupervisorPhase::Idle {
            return Err(SupervisorError::AlreadyRunning);
        }
        if state.stop_requested || state.halt_reason.is_some() {
            return Err(SupervisorError::Terminated);
        }
        state.phase = SupervisorPhase::Running;

        let shared = Arc::clone(&self.shared);
        let cancel = self.shared.cancel.subscribe();
        state.monitor = Some(tokio::spawn(monitor(shared, cancel)));
        Ok(())
    }

    /// Stop supervision and terminate the process.
    ///
    /// Sends SIGTERM, waits up to the grace period, then kills. A no-op if
    /// the supervisor is not running or is already stopping.
    pub async fn stop(&self) {
        let monitor = {
            let mut state = self.shared.lock();
            if state.phase != SupervisorPhase::Running || state.stop_requested {
                return;
            }
            state.stop_requested = true;
            state.phase = SupervisorPhase::Stopping;
            state.monitor.take()
        };

        info!(command = %self.shared.command, "Stopping managed process");
        self.shared.cancel.send_replace(true);

        if let Some(monitor) = monitor {
            if let Err(e) = monitor.await {
                warn!(error = %e, "Monitor task ended abnormally");
            }
        }

        let mut state = self.shared.lock();
        state.phase = SupervisorPhase::Idle;
        state.pid = None;
    }

    /// True while supervising and not stopping.
    pub fn is_running(&self) -> bool {
        let state = self.shared.lock();
        state.phase == SupervisorPhase::Running && !state.stop_requested
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SupervisorPhase {
        self.shared.lock().phase
    }

    /// Number of relaunches so far. Never decreases.
    pub fn restart_count(&self) -> u32 {
        self.shared.lock().restart_count
    }

    /// PID of the current child, if one is running.
    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().pid
    }

    /// Why supervision ended on its own, if it did.
    pub fn halt_reason(&self) -> Option<SupervisorError> {
        self.shared.lock().halt_reason.clone()
    }
}

async fn monitor(shared: Arc<Shared>, mut cancel: watch::Receiver<bool>) {
    let command = &shared.command;

    loop {
        if *cancel.borrow() {
            return;
        }

        info!(command = %command, "Starting process");
        let mut child = match command.to_command().kill_on_drop(true).spawn() {
            Ok(child) => child,
            Err(e) => {
                error!(command = %command, error = %e, "Failed to start process");
                shared.halt(SupervisorError::LaunchFailed {
                    program: command.program().to_string(),
                    reason: e.to_string(),
                });
                return;
            }
        };
        shared.lock().pid = child.id();

        let status = tokio::select! {
            status = child.wait() => status,
            _ = cancelled(&mut cancel) => {
                terminate(&mut child, shared.policy.stop_grace).await;
                return;
            }
        };
        shared.lock().pid = None;

        let exit_code = match status {
            Ok(status) => status.code().unwrap_or(0),
            Err(e) => {
                warn!(error = %e, "Failed to wait for process");
                0
            }
        };

        let restart_delay = {
            let mut state = shared.lock();
            if state.stop_requested {
                debug!("Process stopped by request");
                return;
            }

            if exit_code != 0 {
                warn!(exit_code, "Process exited with non-zero code, will restart");
            } else {
                warn!("Process exited normally, will restart");
            }

            if let Some(max_restarts) = shared.policy.max_restarts {
                if state.restart_count >= max_restarts {
                    error!(max_restarts, "Max restarts reached, giving up on process");
                    state.phase = SupervisorPhase::Idle;
                    state.halt_reason = Some(SupervisorError::RestartLimitExceeded { max_restarts });
                    return;
                }
            }
            state.restart_count += 1;
            info!(
                restart_count = state.restart_count,
                delay_ms = shared.policy.restart_delay.as_millis() as u64,
                "Restarting process after delay"
            );
            shared.policy.restart_delay
        };

        tokio::select! {
            _ = tokio::time::sleep(restart_delay) => {}
            _ = cancelled(&mut cancel) => return,
        }
    }
}

/// Resolve once cancellation has been requested.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL.
async fn terminate(child: &mut Child, grace: Duration) {
    let Some(pid) = child.id() else {
        return;
    };

    match i32::try_from(pid) {
        Ok(raw) => {
            if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
                warn!(pid, error = %e, "Failed to send SIGTERM");
            }
        }
        Err(_) => warn!(pid, "PID out of range for signal delivery"),
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => info!(pid, status = %status, "Process exited after SIGTERM"),
        Ok(Err(e)) => warn!(pid, error = %e, "Failed to wait for process"),
        Err(_) => {
            warn!(pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(pid, error = %e, "Failed to kill process");
            }
        }
    }
}
