//! In-process script execution against the capability allow-list.

use std::time::Instant;

use boa_engine::gc::{Gc, GcRefCell};
use boa_engine::{Context, Source};

use crate::allowlist::CapabilityAllowList;
use crate::limits::ScriptLimits;
use crate::runtime::{ERROR_MARKER, ExecutionResult};

/// Why a script did not run to completion.
///
/// Engine errors are rendered to text on the worker thread; interpreter
/// values cannot leave it.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ScriptFault {
    /// Source larger than [`ScriptLimits::max_code_bytes`]
    #[error("script is {actual} bytes, limit is {max}")]
    TooLarge { max: usize, actual: usize },
    /// The sandbox could not be prepared
    #[error("sandbox setup failed: {0}")]
    Setup(String),
    /// The script threw or hit an engine limit
    #[error("{0}")]
    Raised(String),
    /// The worker thread died
    #[error("script worker failed: {0}")]
    Worker(String),
}

/// Per-call output capture.
///
/// Owned by a single evaluation and dropped with it, so nothing written by
/// one script is ever visible to another.
struct OutputCapture {
    buffer: Gc<GcRefCell<String>>,
}

impl OutputCapture {
    fn new() -> Self {
        Self {
            buffer: Gc::new(GcRefCell::new(String::new())),
        }
    }

    fn handle(&self) -> &Gc<GcRefCell<String>> {
        &self.buffer
    }

    fn into_string(self) -> String {
        self.buffer.borrow().clone()
    }
}

/// Runs scripts in a fresh, allow-listed interpreter context per call.
///
/// Evaluation is synchronous and CPU bound; [`ScriptExecutor::run`] moves it
/// onto a blocking worker so async callers are not stalled.
#[derive(Debug, Clone)]
pub struct ScriptExecutor {
    allow_list: CapabilityAllowList,
    limits: ScriptLimits,
}

impl ScriptExecutor {
    /// Create an executor with the given allow-list and limits.
    pub fn new(allow_list: CapabilityAllowList, limits: ScriptLimits) -> Self {
        Self { allow_list, limits }
    }

    /// The names scripts may reference.
    pub fn allow_list(&self) -> &CapabilityAllowList {
        &self.allow_list
    }

    /// Run `code` and return its captured output.
    ///
    /// Never fails: every fault becomes an [`ExecutionResult`] whose output
    /// starts with [`ERROR_MARKER`].
    pub async fn run(&self, code: &str) -> ExecutionResult {
        let start = Instant::now();
        let executor = self.clone();
        let code = code.to_string();

        let outcome = tokio::task::spawn_blocking(move || executor.evaluate(&code))
            .await
            .unwrap_or_else(|e| Err(ScriptFault::Worker(e.to_string())));

        finish(outcome, start)
    }

    /// Run `code` on the current thread.
    pub fn run_blocking(&self, code: &str) -> ExecutionResult {
        let start = Instant::now();
        finish(self.evaluate(code), start)
    }

    fn evaluate(&self, code: &str) -> Result<String, ScriptFault> {
        if code.len() > self.limits.max_code_bytes {
            return Err(ScriptFault::TooLarge {
                max: self.limits.max_code_bytes,
                actual: code.len(),
            });
        }

        let capture = OutputCapture::new();
        let mut context = Context::default();
        self.allow_list
            .install(&mut context, capture.handle(), self.limits.max_output_bytes)
            .map_err(|e| ScriptFault::Setup(e.to_string()))?;

        // Limits go on after setup so the prelude never counts against them.
        let runtime_limits = context.runtime_limits_mut();
        runtime_limits.set_loop_iteration_limit(self.limits.max_loop_iterations);
        runtime_limits.set_recursion_limit(self.limits.max_recursion_depth);

        context
            .eval(Source::from_bytes(code.as_bytes()))
            .map_err(|e| ScriptFault::Raised(e.to_string()))?;

        drop(context);
        Ok(capture.into_string())
    }
}

impl Default for ScriptExecutor {
    fn default() -> Self {
        Self::new(CapabilityAllowList::default(), ScriptLimits::default())
    }
}

fn finish(outcome: Result<String, ScriptFault>, start: Instant) -> ExecutionResult {
    let elapsed = start.elapsed();
    match outcome {
        Ok(output) => {
            tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "script finished");
            ExecutionResult {
                output,
                succeeded: true,
                exit_code: None,
                truncated: false,
                elapsed,
            }
        }
        Err(fault) => {
            tracing::debug!(fault = %fault, "script faulted");
            ExecutionResult {
                output: format!("{ERROR_MARKER}{fault}"),
                succeeded: false,
                exit_code: None,
                truncated: false,
                elapsed,
            }
        }
    }
}
