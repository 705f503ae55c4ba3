//! Sandboxed evaluation of JavaScript fragments.
//!
//! The deobfuscator hands string decoders, rotated arrays and their call
//! sites to a [`Sandbox`] and inlines whatever comes back. Implementations
//! must be pure computation: no I/O, no timers, no host objects, and bounded
//! in time so that a hostile fragment fails instead of hanging the pipeline.
//!
//! Two evaluators ship with the crate:
//!
//! - [`IsolatedSandbox`] runs a fresh interpreter realm per call on a
//!   dedicated stack and waits for it.
//! - [`WorkerSandbox`] runs the realm on a detached worker thread and awaits
//!   it with a timeout, so a stuck evaluation never blocks the caller.
//!
//! Any `Fn(&str) -> Result<Value, EvalError>` closure is a sandbox as well.

pub mod config;
pub mod interpreter;
pub mod isolated;
pub mod worker;

pub use config::SandboxLimits;
pub use interpreter::Interpreter;
pub use isolated::IsolatedSandbox;
pub use worker::WorkerSandbox;

use async_trait::async_trait;
use decloak_utils::errors::EvalError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A value that crossed the sandbox boundary.
///
/// Only data survives the trip; functions and regular expressions stay
/// inside the realm that created them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(IndexMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Whether the value can be written back as a literal.
    pub fn is_primitive(&self) -> bool {
        !matches!(self, Self::Array(_) | Self::Object(_))
    }
}

/// Evaluates a source fragment in isolation.
///
/// The result is the completion value of the fragment: the value of its last
/// top-level expression statement, or the argument of a top-level `return`.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn evaluate(&self, source: &str) -> Result<Value, EvalError>;
}

#[async_trait]
impl<F> Sandbox for F
where
    F: Fn(&str) -> Result<Value, EvalError> + Send + Sync,
{
    async fn evaluate(&self, source: &str) -> Result<Value, EvalError> {
        self(source)
    }
}

/// The evaluator used when the caller does not supply one.
pub fn default_sandbox() -> Arc<dyn Sandbox> {
    Arc::new(WorkerSandbox::new(SandboxLimits::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closure_sandbox() {
        let fixed = |source: &str| -> Result<Value, EvalError> {
            Ok(Value::String(source.to_uppercase()))
        };
        assert_eq!(fixed.evaluate("abc").await.unwrap(), Value::String("ABC".into()));
    }

    #[tokio::test]
    async fn test_default_sandbox_evaluates() {
        let sandbox = default_sandbox();
        let value = sandbox.evaluate("['b', 'a'].reverse().join('')").await.unwrap();
        assert_eq!(value.as_str(), Some("ab"));
    }
}
