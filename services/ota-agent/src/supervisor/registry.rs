//! Registry holding the agent's one managed process.
//!
//! The registry lock covers only which supervisor is current and the command
//! it was started with. Supervisor internals have their own lock, so reads
//! such as [`ProcessSupervisor::is_running`] are not excluded by it.

use tokio::sync::Mutex;
use tracing::info;

use super::process::{ProcessSupervisor, RestartPolicy};
use crate::command::CommandLine;
use crate::error::SupervisorError;

/// Owns at most one active [`ProcessSupervisor`].
pub struct SupervisorRegistry {
    policy: RestartPolicy,
    current: Mutex<Option<ProcessSupervisor>>,
}

impl SupervisorRegistry {
    /// Create an empty registry; supervisors it creates use `policy`.
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            policy,
            current: Mutex::new(None),
        }
    }

    /// Make sure `command` is running under supervision.
    ///
    /// A no-op if it already is. A different command, or a supervisor that
    /// has halted, is replaced by a fresh supervisor after the old one is
    /// stopped. Returns true if a new supervisor was started.
    pub async fn ensure(&self, command: &CommandLine, reason: &str) -> Result<bool, SupervisorError> {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.as_ref() {
            if existing.command() == command && existing.is_running() {
                return Ok(false);
            }
            if existing.command() != command {
                info!(old = %existing.command(), new = %command, "Managed command changed, stopping old process");
            }
            existing.stop().await;
        }

        info!(command = %command, reason, "Starting managed process");
        *current = Some(self.spawn(command)?);
        Ok(true)
    }

    /// Replace the current supervisor with a fresh one for `command`.
    pub async fn restart(&self, command: &CommandLine, reason: &str) -> Result<(), SupervisorError> {
        let mut current = self.current.lock().await;

        if let Some(existing) = current.take() {
            info!(command = %existing.command(), reason, "Restarting managed process");
            existing.stop().await;
        }

        *current = Some(self.spawn(command)?);
        Ok(())
    }

    /// Stop and forget the current supervisor.
    pub async fn stop_all(&self) {
        let mut current = self.current.lock().await;
        if let Some(existing) = current.take() {
            existing.stop().await;
        }
    }

    /// The current supervisor, if any.
    pub async fn current(&self) -> Option<ProcessSupervisor> {
        self.current.lock().await.clone()
    }

    fn spawn(&self, command: &CommandLine) -> Result<ProcessSupervisor, SupervisorError> {
        let supervisor = ProcessSupervisor::new(command.clone(), self.policy.clone());
        supervisor.start()?;
        Ok(supervisor)
    }
}
