//! Over-the-air update agent.
//!
//! The agent polls a remote manifest and converges local files to it:
//! each file is downloaded next to its target, checked against its SHA-256,
//! and swapped in with a rename so readers never see a partial file. The
//! previous content is kept as `<target>.bak` and restored if the restart
//! command fails.
//!
//! ## Architecture
//!
//! - **Fetcher**: HTTP GET with fixed-delay retries, streaming downloads
//! - **Pipeline**: per-file verify, replace, restart and rollback
//! - **Reconciler**: one cycle per tick, gated by the aggregate version marker
//! - **Supervisor**: keeps an optional managed process running
//!
//! Version markers are plain text files: the aggregate at the configured
//! path and one per file at `<path>.<name>`.

pub mod command;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod logging;
pub mod pipeline;
pub mod reconciler;
pub mod replace;
pub mod supervisor;
pub mod version_store;

pub use command::{CommandLine, CommandRunner, ProcessRunner};
pub use config::{Config, LogFormat};
pub use error::{PermissionError, ReplaceError, SupervisorError, UpdateError};
pub use fetcher::HttpFetcher;
pub use pipeline::{FileOutcome, FileUpdater};
pub use reconciler::{CycleReport, Reconciler, ReconcilerConfig};
pub use supervisor::{ProcessSupervisor, RestartPolicy, SupervisorPhase, SupervisorRegistry};
pub use version_store::VersionStore;

/// Agent version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
