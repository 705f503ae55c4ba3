//! Evaluator backed by a disposable worker thread.

use crate::config::SandboxLimits;
use crate::interpreter::Interpreter;
use crate::{Sandbox, Value};
use async_trait::async_trait;
use decloak_utils::errors::EvalError;
use std::thread;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Extra time granted to the worker on top of the interpreter's own clock.
const GRACE: Duration = Duration::from_millis(250);

/// Runs every evaluation on its own worker thread.
///
/// The worker owns the realm for its whole life and is discarded afterwards.
/// The caller only awaits a channel, so the async runtime is never blocked;
/// if the worker does not answer within the timeout the evaluation fails
/// with [`EvalError::Timeout`] and the worker is left to hit its own limits.
#[derive(Debug, Clone, Default)]
pub struct WorkerSandbox {
    limits: SandboxLimits,
}

impl WorkerSandbox {
    pub const fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub const fn limits(&self) -> &SandboxLimits {
        &self.limits
    }
}

#[async_trait]
impl Sandbox for WorkerSandbox {
    async fn evaluate(&self, source: &str) -> Result<Value, EvalError> {
        let limits = self.limits;
        let source = source.to_string();
        let (tx, rx) = oneshot::channel();

        thread::Builder::new()
            .name("decloak-sandbox-worker".to_string())
            .stack_size(limits.stack_size)
            .spawn(move || {
                let result = Interpreter::new(limits).evaluate(&source);
                // The receiver is gone when the caller timed out.
                let _ = tx.send(result);
            })
            .map_err(|e| EvalError::Worker(e.to_string()))?;

        match tokio::time::timeout(limits.timeout + GRACE, rx).await {
            Ok(Ok(result)) => {
                if let Err(e) = &result {
                    debug!("sandbox evaluation failed: {e}");
                }
                result
            }
            Ok(Err(_)) => Err(EvalError::Worker("worker exited without a result".to_string())),
            Err(_) => {
                warn!("sandbox worker did not answer within {:?}", limits.timeout);
                Err(EvalError::Timeout {
                    millis: limits.timeout.as_millis() as u64,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decoder_call() {
        let sandbox = WorkerSandbox::default();
        let src = "
            var arr = ['world', 'hello'];
            function dec(i) { return arr[i - 0x100]; }
            dec(0x101) + ' ' + dec(0x100)";
        assert_eq!(
            sandbox.evaluate(src).await.unwrap(),
            Value::String("hello world".into())
        );
    }

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        let limits = SandboxLimits::default()
            .with_max_steps(0)
            .with_timeout_ms(50);
        let err = WorkerSandbox::new(limits)
            .evaluate("while (true) {}")
            .await
            .unwrap_err();
        assert!(err.is_limit(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_step_limit() {
        let limits = SandboxLimits::default().with_max_steps(1_000);
        let err = WorkerSandbox::new(limits)
            .evaluate("for (var i = 0; ; i++) {}")
            .await
            .unwrap_err();
        assert!(matches!(err, EvalError::StepLimit { limit: 1_000, .. }));
    }

    #[tokio::test]
    async fn test_syntax_error() {
        let err = WorkerSandbox::default().evaluate("function (").await.unwrap_err();
        assert!(matches!(err, EvalError::Syntax(_)));
    }
}
