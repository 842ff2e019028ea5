//! The runner: quota gate, executors and history wired together.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandExecutor;
use crate::config::RunnerConfig;
use crate::history::{HistoryError, HistoryRecord, HistoryRecorder, Identity};
use crate::limits::duration_ms;
use crate::quota::{FixedWindowQuota, QuotaDecision, QuotaGate};
use crate::script::ScriptExecutor;

/// Prefix of every output produced by a fault rather than by the program.
pub const ERROR_MARKER: &str = "Error: ";

/// Errors that stop a request before anything executes.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The caller used up its quota for the current window
    #[error("quota exceeded for {key}, retry in {}s", .retry_after.as_secs())]
    QuotaExceeded {
        /// The quota key (caller address)
        key: String,
        /// Time until the window resets
        retry_after: Duration,
    },
    /// Shell command execution is turned off
    #[error("command execution is disabled")]
    CommandsDisabled,
    /// History could not be read
    #[error("history unavailable: {0}")]
    History(#[from] HistoryError),
}

/// Result of one script or command run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Captured output, or fault text prefixed with [`ERROR_MARKER`]
    pub output: String,
    /// Whether the run completed without a fault
    pub succeeded: bool,
    /// Exit status of a command that ran to completion
    pub exit_code: Option<i32>,
    /// Whether output was cut at the configured limit
    pub truncated: bool,
    /// Wall-clock time spent
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

/// Who is asking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// Network address of the requester; the quota key.
    pub address: String,
    /// Authenticated account, if any. Only identified callers get history.
    pub identity: Option<Identity>,
}

impl Caller {
    /// A caller with no account.
    pub fn anonymous(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            identity: None,
        }
    }

    /// A caller with an account.
    pub fn identified(address: impl Into<String>, identity: impl Into<Identity>) -> Self {
        Self {
            address: address.into(),
            identity: Some(identity.into()),
        }
    }
}

/// What to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Script source for the sandbox
    Script(String),
    /// Command line for the host shell
    Command(String),
}

/// A submission plus the caller that sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// What to run
    pub submission: Submission,
    /// Who sent it
    pub caller: Caller,
}

/// Execution front door.
///
/// Every request is checked against the quota gate first. Rejected requests
/// run nothing and write no history. Scripts from identified callers are
/// recorded after they finish, whether or not they faulted.
#[derive(Clone)]
pub struct Runner {
    scripts: ScriptExecutor,
    commands: CommandExecutor,
    history: HistoryRecorder,
    quota: Arc<dyn QuotaGate>,
    gate_commands: bool,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("scripts", &self.scripts)
            .field("commands", &self.commands)
            .field("gate_commands", &self.gate_commands)
            .finish_non_exhaustive()
    }
}

impl Default for Runner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

impl Runner {
    /// Create a runner with in-memory history and a fixed-window quota.
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            scripts: ScriptExecutor::new(config.allow_list, config.script),
            commands: CommandExecutor::new(config.command),
            history: HistoryRecorder::default(),
            quota: Arc::new(FixedWindowQuota::from_config(&config.quota)),
            gate_commands: config.quota.gate_commands,
        }
    }

    /// Replace the history recorder.
    pub fn with_history(mut self, history: HistoryRecorder) -> Self {
        self.history = history;
        self
    }

    /// Replace the quota gate.
    pub fn with_quota(mut self, quota: Arc<dyn QuotaGate>) -> Self {
        self.quota = quota;
        self
    }

    /// The history recorder.
    pub fn history(&self) -> &HistoryRecorder {
        &self.history
    }

    /// Handle a request.
    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult, RunnerError> {
        match &request.submission {
            Submission::Script(code) => self.execute_script(&request.caller, code).await,
            Submission::Command(command) => self.execute_command(&request.caller, command).await,
        }
    }

    /// Run a script for `caller`, recording it if the caller is identified.
    pub async fn execute_script(
        &self,
        caller: &Caller,
        code: &str,
    ) -> Result<ExecutionResult, RunnerError> {
        self.admit(caller)?;

        let result = self.scripts.run(code).await;
        tracing::debug!(
            address = %caller.address,
            succeeded = result.succeeded,
            "script executed"
        );

        if let Some(identity) = &caller.identity {
            self.history.record(identity, code, &result.output).await;
        }
        Ok(result)
    }

    /// Run a shell command for `caller`. Commands are not recorded.
    pub async fn execute_command(
        &self,
        caller: &Caller,
        command: &str,
    ) -> Result<ExecutionResult, RunnerError> {
        if !self.commands.limits().enabled {
            return Err(RunnerError::CommandsDisabled);
        }
        if self.gate_commands {
            self.admit(caller)?;
        }

        let result = self.commands.run(command).await;
        tracing::debug!(
            address = %caller.address,
            succeeded = result.succeeded,
            exit_code = ?result.exit_code,
            "command executed"
        );
        Ok(result)
    }

    /// Every history record for `identity`, oldest first.
    pub async fn history_for(&self, identity: &Identity) -> Result<Vec<HistoryRecord>, RunnerError> {
        Ok(self.history.list_for(identity).await?)
    }

    /// A window of `identity`'s history, oldest first.
    pub async fn history_page(
        &self,
        identity: &Identity,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, RunnerError> {
        Ok(self.history.list_page(identity, offset, limit).await?)
    }

    fn admit(&self, caller: &Caller) -> Result<(), RunnerError> {
        match self.quota.check(&caller.address) {
            QuotaDecision::Allow { .. } => Ok(()),
            QuotaDecision::Deny { retry_after } => {
                tracing::warn!(
                    address = %caller.address,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "quota exceeded"
                );
                Err(RunnerError::QuotaExceeded {
                    key: caller.address.clone(),
                    retry_after,
                })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::quota::{QuotaConfig, Unlimited};

    fn config_with_limit(limit: u32) -> RunnerConfig {
        RunnerConfig {
            quota: QuotaConfig {
                limit,
                ..QuotaConfig::default()
            },
            ..RunnerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_identified_script_is_recorded() {
        let runner = Runner::default();
        let caller = Caller::identified("10.0.0.1", "amal");

        let result = runner.execute_script(&caller, "print('hi')").await.unwrap();
        assert_eq!(result.output, "hi\n");

        let history = runner.history_for(&"amal".into()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].code, "print('hi')");
        assert_eq!(history[0].output, "hi\n");
    }

    #[tokio::test]
    async fn test_faulted_script_is_recorded_with_error_text() {
        let runner = Runner::default();
        let caller = Caller::identified("10.0.0.1", "amal");

        let result = runner.execute_script(&caller, "nope()").await.unwrap();
        assert!(!result.succeeded);

        let history = runner.history_for(&"amal".into()).await.unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].output.starts_with(ERROR_MARKER));
    }

    #[tokio::test]
    async fn test_quota_rejects_without_side_effects() {
        let runner = Runner::new(config_with_limit(2));
        let caller = Caller::identified("10.0.0.2", "amal");

        runner.execute_script(&caller, "print(1)").await.unwrap();
        runner.execute_script(&caller, "print(2)").await.unwrap();
        let rejected = runner.execute_script(&caller, "print(3)").await;

        assert!(matches!(rejected, Err(RunnerError::QuotaExceeded { .. })));
        assert_eq!(runner.history_for(&"amal".into()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commands_share_the_quota_by_default() {
        let runner = Runner::new(config_with_limit(1));
        let caller = Caller::anonymous("10.0.0.3");

        runner.execute_command(&caller, "true").await.unwrap();
        let rejected = runner.execute_script(&caller, "print(1)").await;
        assert!(matches!(rejected, Err(RunnerError::QuotaExceeded { .. })));
    }

    #[tokio::test]
    async fn test_ungated_commands() {
        let mut config = config_with_limit(1);
        config.quota.gate_commands = false;
        let runner = Runner::new(config);
        let caller = Caller::anonymous("10.0.0.4");

        for _ in 0..3 {
            assert!(runner.execute_command(&caller, "true").await.is_ok());
        }
        assert!(runner.execute_script(&caller, "print(1)").await.is_ok());
    }

    #[tokio::test]
    async fn test_disabled_commands() {
        let mut config = RunnerConfig::default();
        config.command.enabled = false;
        let runner = Runner::new(config);

        let rejected = runner
            .execute_command(&Caller::anonymous("10.0.0.5"), "echo hi")
            .await;
        assert!(matches!(rejected, Err(RunnerError::CommandsDisabled)));
    }

    #[tokio::test]
    async fn test_execute_dispatches_on_submission() {
        let runner = Runner::default().with_quota(Arc::new(Unlimited));
        let caller = Caller::anonymous("10.0.0.6");

        let script = runner
            .execute(&ExecutionRequest {
                submission: Submission::Script("print('s')".into()),
                caller: caller.clone(),
            })
            .await
            .unwrap();
        assert_eq!(script.output, "s\n");

        let command = runner
            .execute(&ExecutionRequest {
                submission: Submission::Command("echo c".into()),
                caller,
            })
            .await
            .unwrap();
        assert_eq!(command.output, "c\n");
    }

    #[test]
    fn test_quota_error_message() {
        let err = RunnerError::QuotaExceeded {
            key: "1.2.3.4".into(),
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.to_string(), "quota exceeded for 1.2.3.4, retry in 42s");
    }
}
