//! `[[jobs]]` declarations from the config file, and the shell-command
//! task that executes them.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use tempo_scheduler::{JobTask, Priority, Schedule, TaskContext, TaskError};

/// How often a running command re-checks its cancellation token.
const CANCEL_POLL: Duration = Duration::from_millis(250);

/// One `[[jobs]]` table from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct JobDecl {
    pub name: String,
    /// Shell command, run via `sh -c`.
    pub command: String,
    pub schedule: Schedule,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Names of jobs declared earlier in the same file.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_max_retries() -> u32 {
    tempo_scheduler::DEFAULT_MAX_RETRIES
}

/// The `jobs` section of the config file, loaded through the same
/// figment chain as [`tempo_core::TempoConfig`].
#[derive(Debug, Default, Deserialize)]
pub struct JobsFile {
    #[serde(default)]
    pub jobs: Vec<JobDecl>,
}

impl JobsFile {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let file: JobsFile = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("TEMPO_").split("__"))
            .extract()?;
        Ok(file)
    }
}

/// Runs a declared shell command, polling the cancellation token while
/// the child is alive. Non-zero exit is a failure (and thus retryable).
pub struct CommandTask {
    command: String,
}

impl CommandTask {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
        }
    }
}

#[async_trait]
impl JobTask for CommandTask {
    async fn run(&self, ctx: &TaskContext) -> Result<(), TaskError> {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| TaskError::Failed(format!("failed to spawn command: {e}")))?;

        loop {
            tokio::select! {
                status = child.wait() => {
                    return match status {
                        Ok(status) if status.success() => Ok(()),
                        Ok(status) => Err(TaskError::Failed(format!(
                            "command exited with {status}"
                        ))),
                        Err(e) => Err(TaskError::Failed(format!("wait failed: {e}"))),
                    };
                }
                _ = tokio::time::sleep(CANCEL_POLL) => {
                    if ctx.cancellation.is_cancelled() {
                        let _ = child.kill().await;
                        return Err(TaskError::Cancelled);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempo_scheduler::{CancellationToken, JobId};

    fn ctx() -> TaskContext {
        TaskContext {
            job_id: JobId::new_v4(),
            attempt: 1,
            cancellation: CancellationToken::new(),
        }
    }

    #[test]
    fn jobs_file_parses_declarations() {
        let file: JobsFile = Figment::new()
            .merge(Toml::string(
                r#"
                [[jobs]]
                name = "backup"
                command = "echo backup"
                priority = "high"
                schedule = { kind = "cron", expr = "0 3 * * *" }

                [[jobs]]
                name = "report"
                command = "echo report"
                depends_on = ["backup"]
                schedule = { kind = "interval", every_ms = 60000 }
                "#,
            ))
            .extract()
            .unwrap();

        assert_eq!(file.jobs.len(), 2);
        assert_eq!(file.jobs[0].name, "backup");
        assert_eq!(file.jobs[0].priority, Priority::High);
        assert_eq!(file.jobs[0].max_retries, tempo_scheduler::DEFAULT_MAX_RETRIES);
        assert_eq!(file.jobs[1].depends_on, vec!["backup".to_string()]);
        assert!(matches!(file.jobs[1].schedule, Schedule::Interval { .. }));
    }

    #[tokio::test]
    async fn command_task_reports_exit_status() {
        let ok = CommandTask::new("true");
        assert!(ok.run(&ctx()).await.is_ok());

        let err = CommandTask::new("false").run(&ctx()).await.unwrap_err();
        assert!(matches!(err, TaskError::Failed(_)));
    }

    #[tokio::test]
    async fn command_task_is_shareable_across_attempts() {
        let task = Arc::new(CommandTask::new("echo retry"));
        assert!(task.run(&ctx()).await.is_ok());
        assert!(task.run(&ctx()).await.is_ok());
    }
}
