//! Managed process supervision.
//!
//! - [`ProcessSupervisor`]: keeps one command alive under a [`RestartPolicy`]
//! - [`SupervisorRegistry`]: owns the agent's single supervisor and replaces
//!   it when the desired command changes

mod process;
mod registry;

pub use process::{ProcessSupervisor, RestartPolicy, SupervisorPhase};
pub use registry::SupervisorRegistry;
