//! In-process evaluator.

use crate::config::SandboxLimits;
use crate::interpreter::Interpreter;
use crate::{Sandbox, Value};
use async_trait::async_trait;
use decloak_utils::errors::EvalError;
use std::thread;
use tracing::debug;

/// Evaluates each fragment in a fresh realm and waits for the result.
///
/// The interpreter recurses on the Rust stack, so every evaluation runs on a
/// scoped thread with [`SandboxLimits::stack_size`] bytes of stack. The async
/// [`Sandbox::evaluate`] waits for that thread from tokio's blocking pool,
/// leaving the runtime's worker threads free.
#[derive(Debug, Clone, Default)]
pub struct IsolatedSandbox {
    limits: SandboxLimits,
}

impl IsolatedSandbox {
    pub const fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }

    pub const fn limits(&self) -> &SandboxLimits {
        &self.limits
    }

    /// Synchronous evaluation.
    pub fn evaluate_blocking(&self, source: &str) -> Result<Value, EvalError> {
        let limits = self.limits;
        thread::scope(|scope| {
            let handle = thread::Builder::new()
                .name("decloak-sandbox".to_string())
                .stack_size(limits.stack_size)
                .spawn_scoped(scope, move || Interpreter::new(limits).evaluate(source))
                .map_err(|e| EvalError::Worker(e.to_string()))?;
            handle
                .join()
                .map_err(|_| EvalError::Worker("evaluation panicked".to_string()))?
        })
        .inspect_err(|e| debug!("sandbox evaluation failed: {e}"))
    }
}

#[async_trait]
impl Sandbox for IsolatedSandbox {
    async fn evaluate(&self, source: &str) -> Result<Value, EvalError> {
        let sandbox = self.clone();
        let source = source.to_string();
        tokio::task::spawn_blocking(move || sandbox.evaluate_blocking(&source))
            .await
            .map_err(|e| EvalError::Worker(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_realms_are_fresh() {
        let sandbox = IsolatedSandbox::default();
        sandbox.evaluate("var leaked = 1; leaked").await.unwrap();
        assert!(matches!(
            sandbox.evaluate("leaked").await,
            Err(EvalError::Reference(name)) if name == "leaked"
        ));
    }

    #[tokio::test]
    async fn test_isolation_fails_closed() {
        let sandbox = IsolatedSandbox::default();
        for source in [
            "require('fs').readFileSync('/etc/passwd')",
            "process.exit(1)",
            "globalThis.fetch('https://example.com')",
            "new Function('return this')()",
            "setTimeout(function () {}, 0)",
        ] {
            assert!(sandbox.evaluate(source).await.is_err(), "{source} evaluated");
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_evaluation_leaves_runtime_free() {
        let sandbox = IsolatedSandbox::default();
        let ticker = tokio::spawn(async {
            tokio::task::yield_now().await;
            1
        });
        let value = sandbox
            .evaluate("var n = 0; for (var i = 0; i < 20000; i++) { n += i; } n")
            .await
            .unwrap();
        assert_eq!(value, Value::Number(199_990_000.0));
        assert_eq!(ticker.await.unwrap(), 1);
    }

    #[test]
    fn test_deep_recursion_hits_call_depth() {
        let sandbox = IsolatedSandbox::new(SandboxLimits::default().with_max_call_depth(500));
        let err = sandbox
            .evaluate_blocking("function f(n) { return n ? f(n - 1) : 0; } f(100000)")
            .unwrap_err();
        assert!(matches!(err, EvalError::CallDepth(500)));
    }
}
