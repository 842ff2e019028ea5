//! coderun: execution core for a learner code runner
//!
//! Learners submit short scripts or shell commands and get back the captured
//! output. This crate owns the part that actually runs things:
//!
//! - [`ScriptExecutor`]: evaluates JavaScript in a fresh interpreter whose
//!   globals are cut down to a [`CapabilityAllowList`].
//! - [`CommandExecutor`]: runs a command through the host shell with a
//!   wall-clock timeout.
//! - [`HistoryRecorder`]: per-identity log of executed scripts.
//! - [`QuotaGate`]: per-caller request quota checked before anything runs.
//!
//! [`Runner`] ties them together and is what front ends should call.
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), coderun::RunnerError> {
//! use coderun::{Caller, Runner};
//!
//! let runner = Runner::default();
//! let result = runner
//!     .execute_script(&Caller::identified("127.0.0.1", "amal"), "print('hi')")
//!     .await?;
//! assert_eq!(result.output, "hi\n");
//! # Ok(())
//! # }
//! ```

mod allowlist;
mod command;
mod config;
mod limits;
mod quota;
mod runtime;
mod script;

pub mod history;

pub use allowlist::{Capability, CapabilityAllowList, MAX_RANGE_LEN, STANDARD_INTRINSICS};
pub use command::{CommandExecutor, TRUNCATION_NOTICE};
pub use config::{ConfigError, RunnerConfig};
pub use history::{HistoryRecord, HistoryRecorder, Identity};
pub use limits::{CommandLimits, ScriptLimits};
pub use quota::{FixedWindowQuota, QuotaConfig, QuotaDecision, QuotaGate, Unlimited};
pub use runtime::{
    Caller, ERROR_MARKER, ExecutionRequest, ExecutionResult, Runner, RunnerError, Submission,
};
pub use script::ScriptExecutor;
