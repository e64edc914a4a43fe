//! Structured command lines and the runner used for restart commands.
//!
//! Command lines are split on whitespace once, when they enter the agent.
//! There is no shell quoting: `sh -c "a b"` becomes four arguments. Callers
//! that need quoting should construct a [`CommandLine`] directly.

use std::fmt;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

/// A program and its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandLine {
    program: String,
    args: Vec<String>,
}

impl CommandLine {
    /// Create a command line from a program and arguments.
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a whitespace-delimited command line.
    ///
    /// Returns `None` for blank input.
    pub fn parse(input: &str) -> Option<Self> {
        let mut parts = input.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    /// The program to execute.
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments passed to the program.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Build a tokio command with stdio inherited from the agent.
    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs a command to completion.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run the command; an error means it could not start or exited non-zero.
    async fn run(&self, command: &CommandLine) -> Result<()>;
}

/// Runs commands as child processes of the agent.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &CommandLine) -> Result<()> {
        debug!(command = %command, "Running command");
        let status = command
            .to_command()
            .status()
            .await
            .with_context(|| format!("failed to run {}", command.program()))?;

        if !status.success() {
            bail!("{} exited with {}", command.program(), status);
        }
        Ok(())
    }
}
