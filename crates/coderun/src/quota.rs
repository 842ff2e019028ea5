//! Fixed-window request quotas.
//!
//! Each caller key gets `limit` executions per `window`. The window starts
//! at the caller's first request and resets in full once it has elapsed.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::limits::duration_ms;

/// Windows tracked before expired ones are swept.
const SWEEP_THRESHOLD: usize = 4096;

/// Configuration for the quota gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Executions allowed per window per caller (0 = unlimited).
    pub limit: u32,
    /// Window duration.
    #[serde(with = "duration_ms")]
    pub window: Duration,
    /// Whether shell commands count against the quota as well as scripts.
    pub gate_commands: bool,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            window: Duration::from_secs(60),
            gate_commands: true,
        }
    }
}

/// Outcome of a quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Go ahead; `remaining` more requests fit in this window.
    Allow {
        /// Requests left after this one
        remaining: u32,
    },
    /// Over quota until the window resets.
    Deny {
        /// Time until the window resets
        retry_after: Duration,
    },
}

impl QuotaDecision {
    /// Returns true if the request may proceed.
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaDecision::Allow { .. })
    }
}

/// Decides whether a caller may run another execution.
///
/// A check that allows the request also consumes one unit of quota.
pub trait QuotaGate: Send + Sync {
    /// Check and consume quota for `key`.
    fn check(&self, key: &str) -> QuotaDecision;
}

/// A gate that allows everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unlimited;

impl QuotaGate for Unlimited {
    fn check(&self, _key: &str) -> QuotaDecision {
        QuotaDecision::Allow {
            remaining: u32::MAX,
        }
    }
}

#[derive(Debug)]
struct Window {
    used: u32,
    started: Instant,
}

/// Per-key fixed-window counter.
#[derive(Debug)]
pub struct FixedWindowQuota {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, Window>>,
}

impl FixedWindowQuota {
    /// Creates a gate allowing `limit` requests per `window` per key.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a gate from configuration.
    pub fn from_config(config: &QuotaConfig) -> Self {
        Self::new(config.limit, config.window)
    }

    fn check_at(&self, key: &str, now: Instant) -> QuotaDecision {
        if self.limit == 0 {
            return QuotaDecision::Allow {
                remaining: u32::MAX,
            };
        }

        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if windows.len() >= SWEEP_THRESHOLD {
            let period = self.window;
            windows.retain(|_, w| now.saturating_duration_since(w.started) < period);
        }

        let window = windows.entry(key.to_string()).or_insert(Window {
            used: 0,
            started: now,
        });
        let age = now.saturating_duration_since(window.started);
        if age >= self.window {
            window.used = 0;
            window.started = now;
        }

        if window.used < self.limit {
            window.used += 1;
            QuotaDecision::Allow {
                remaining: self.limit - window.used,
            }
        } else {
            QuotaDecision::Deny {
                retry_after: self.window.saturating_sub(now.saturating_duration_since(window.started)),
            }
        }
    }
}

impl QuotaGate for FixedWindowQuota {
    fn check(&self, key: &str) -> QuotaDecision {
        self.check_at(key, Instant::now())
    }
}
