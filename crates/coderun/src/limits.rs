//! Resource limits for script and command execution

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Limits applied to every script evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptLimits {
    /// Maximum source length in bytes
    pub max_code_bytes: usize,
    /// Maximum captured output in bytes
    pub max_output_bytes: usize,
    /// Loop iterations allowed per call frame, summed over every loop in
    /// that frame. Each function call starts a fresh count, so this bounds
    /// straight-line runaways only; there is no wall-clock limit on scripts.
    pub max_loop_iterations: u64,
    /// Maximum call depth
    pub max_recursion_depth: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            max_code_bytes: 64 * 1024,       // 64 KB of source
            max_output_bytes: 1024 * 1024,   // 1 MB output
            max_loop_iterations: 10_000_000, // generous for lessons, fatal for `while (true)`
            max_recursion_depth: 512,
        }
    }
}

/// Limits and switches for shell command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandLimits {
    /// Whether command execution is offered at all
    pub enabled: bool,
    /// Shell used to interpret commands (invoked as `<shell> -c <command>`)
    pub shell: String,
    /// Maximum output (stdout + stderr) in bytes
    pub max_output_bytes: usize,
    /// Wall-clock timeout
    #[serde(with = "duration_ms")]
    pub timeout: Duration,
}

impl Default for CommandLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            shell: "sh".to_string(),
            max_output_bytes: 1024 * 1024,   // 1 MB output
            timeout: Duration::from_secs(5), // 5 second wall clock
        }
    }
}

/// Helper for serializing Duration as milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Buffer that limits how much data can be written
#[derive(Debug, Clone)]
pub(crate) struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl LimitedBuffer {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append as much of `data` as fits. Always reports the full length so
    /// callers keep draining their source after the limit is hit.
    pub(crate) fn write(&mut self, data: &[u8]) -> usize {
        let remaining = self.limit.saturating_sub(self.buffer.len());
        if remaining == 0 {
            self.truncated = true;
            return data.len();
        }

        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);

        if to_write < data.len() {
            self.truncated = true;
        }

        data.len()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub(crate) fn was_truncated(&self) -> bool {
        self.truncated
    }

    #[cfg(test)]
    pub(crate) fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = CommandLimits::default();

        assert!(limits.enabled);
        assert_eq!(limits.shell, "sh");
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
        assert_eq!(limits.timeout, Duration::from_secs(5));

        let script = ScriptLimits::default();
        assert_eq!(script.max_code_bytes, 64 * 1024);
        assert_eq!(script.max_recursion_depth, 512);
    }

    #[test]
    fn test_command_limits_timeout_is_milliseconds() {
        let limits = CommandLimits {
            timeout: Duration::from_millis(2500),
            ..CommandLimits::default()
        };

        let json = serde_json::to_string(&limits).unwrap();
        assert!(json.contains("\"timeout\":2500"));

        let back: CommandLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_partial_limits_fill_defaults() {
        let limits: ScriptLimits = serde_json::from_str(r#"{"max_loop_iterations": 5}"#).unwrap();
        assert_eq!(limits.max_loop_iterations, 5);
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_limited_buffer_under_limit() {
        let mut buffer = LimitedBuffer::new(100);

        let written = buffer.write(b"hello world");
        assert_eq!(written, 11);
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.as_bytes(), b"hello world");
    }

    #[test]
    fn test_limited_buffer_over_limit_truncates() {
        let mut buffer = LimitedBuffer::new(5);

        let written = buffer.write(b"hello world");
        assert_eq!(written, 11);
        assert!(buffer.was_truncated());
        assert_eq!(buffer.as_bytes(), b"hello");
    }

    #[test]
    fn test_limited_buffer_exact_boundary() {
        let mut buffer = LimitedBuffer::new(10);

        buffer.write(b"12345");
        buffer.write(b"67890");
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.as_bytes().len(), 10);

        buffer.write(b"x");
        assert!(buffer.was_truncated());
        assert_eq!(buffer.into_bytes(), b"1234567890");
    }

    #[test]
    fn test_limited_buffer_zero_limit() {
        let mut buffer = LimitedBuffer::new(0);

        assert_eq!(buffer.write(b"hello"), 5);
        assert!(buffer.was_truncated());
    }
}
