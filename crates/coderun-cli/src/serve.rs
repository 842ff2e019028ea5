//! JSON-lines request loop over stdio.
//!
//! One request object per input line, one response object per output line.
//! Requests are answered in order.

use coderun::{Caller, ExecutionResult, HistoryRecord, Identity, Runner, RunnerError};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::LOCAL_ADDRESS;

/// A request line.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub(crate) enum Request {
    Script {
        code: String,
        #[serde(default)]
        identity: Option<String>,
        #[serde(default = "default_address")]
        address: String,
    },
    Command {
        command: String,
        #[serde(default = "default_address")]
        address: String,
    },
    History {
        identity: String,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
    },
}

fn default_address() -> String {
    LOCAL_ADDRESS.to_string()
}

/// A response line.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum Response {
    Output { output: String, succeeded: bool },
    History { history: Vec<HistoryRecord> },
    Error { error: ErrorBody },
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody {
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ErrorKind {
    QuotaExceeded,
    CommandsDisabled,
    InvalidRequest,
    HistoryUnavailable,
}

impl Response {
    fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorBody {
                kind,
                message: message.into(),
            },
        }
    }
}

impl From<ExecutionResult> for Response {
    fn from(result: ExecutionResult) -> Self {
        Self::Output {
            output: result.output,
            succeeded: result.succeeded,
        }
    }
}

impl From<RunnerError> for Response {
    fn from(err: RunnerError) -> Self {
        let kind = match &err {
            RunnerError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            RunnerError::CommandsDisabled => ErrorKind::CommandsDisabled,
            RunnerError::History(_) => ErrorKind::HistoryUnavailable,
        };
        Self::error(kind, err.to_string())
    }
}

/// Answer one raw request line.
pub(crate) async fn handle_line(runner: &Runner, line: &str) -> Response {
    let request = match serde_json::from_str::<Request>(line) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = %e, "rejecting malformed request");
            return Response::error(ErrorKind::InvalidRequest, e.to_string());
        }
    };

    let outcome = match request {
        Request::Script {
            code,
            identity,
            address,
        } => {
            let caller = Caller {
                address,
                identity: identity.map(Identity::from),
            };
            runner.execute_script(&caller, &code).await.map(Response::from)
        }
        Request::Command { command, address } => runner
            .execute_command(&Caller::anonymous(address), &command)
            .await
            .map(Response::from),
        Request::History {
            identity,
            offset,
            limit,
        } => runner
            .history_page(&Identity::from(identity), offset, limit.unwrap_or(usize::MAX))
            .await
            .map(|history| Response::History { history }),
    };

    outcome.unwrap_or_else(Response::from)
}

/// Serve requests from stdin until it closes.
pub(crate) async fn run(runner: Runner) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    serve_lines(&runner, stdin, &mut stdout).await
}

async fn serve_lines<R, W>(runner: &Runner, input: R, output: &mut W) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = handle_line(runner, &line).await;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        output.write_all(&encoded).await?;
        output.flush().await?;
    }
    Ok(())
}
