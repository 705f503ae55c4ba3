//! Resource limits for sandboxed evaluation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds applied to every evaluation.
///
/// Exceeding any limit aborts the evaluation with a limit error that script
/// code cannot catch.
///
/// ```rust,ignore
/// let limits = SandboxLimits::new()
///     .with_max_steps(500_000)
///     .with_timeout(Duration::from_millis(500));
/// ```
///
/// | Limit | Default |
/// |-------|---------|
/// | `max_steps` | 5,000,000 |
/// | `max_call_depth` | 128 |
/// | `max_string_length` | 16 MiB |
/// | `timeout` | 2 s |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxLimits {
    /// Statements plus expressions evaluated. 0 disables the limit.
    pub max_steps: u64,
    /// Nested calls of script and native functions.
    pub max_call_depth: usize,
    /// Longest string or array the realm may build.
    pub max_string_length: usize,
    /// Wall-clock budget for a single evaluation.
    pub timeout: Duration,
    /// Stack reserved for the evaluating thread.
    pub stack_size: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_steps: 5_000_000,
            max_call_depth: 128,
            max_string_length: 16 * 1024 * 1024,
            timeout: Duration::from_secs(2),
            stack_size: 64 * 1024 * 1024,
        }
    }
}

impl SandboxLimits {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn with_max_steps(mut self, max: u64) -> Self {
        self.max_steps = max;
        self
    }

    pub const fn with_max_call_depth(mut self, max: usize) -> Self {
        self.max_call_depth = max;
        self
    }

    pub const fn with_max_string_length(mut self, max: usize) -> Self {
        self.max_string_length = max;
        self
    }

    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the timeout in milliseconds.
    pub const fn with_timeout_ms(self, ms: u64) -> Self {
        self.with_timeout(Duration::from_millis(ms))
    }

    pub const fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let limits = SandboxLimits::new()
            .with_max_steps(10)
            .with_max_call_depth(3)
            .with_timeout_ms(50);
        assert_eq!(limits.max_steps, 10);
        assert_eq!(limits.max_call_depth, 3);
        assert_eq!(limits.timeout, Duration::from_millis(50));
        assert_eq!(limits.max_string_length, SandboxLimits::default().max_string_length);
    }
}
