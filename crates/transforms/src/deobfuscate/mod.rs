//! Obfuscation removal.
//!
//! [`Deobfuscator`] alternates sandbox-backed string decoding with the
//! structural passes in [`rules`] until neither changes the tree: decoding
//! exposes the literal keys control-flow objects are indexed with, and
//! inlining those objects exposes new decoder calls. The remaining passes
//! run later in the pipeline, once the code is readable.

pub mod control_flow_object;
pub mod control_flow_switch;
pub mod dead_code;
pub mod debug_protection;
mod decoder;
pub mod evaluate;
pub mod merge_object_assignments;
mod rotator;
pub mod self_defending;
mod string_array;
pub mod var_functions;

pub use control_flow_object::ControlFlowObject;
pub use control_flow_switch::ControlFlowSwitch;
pub use dead_code::DeadCode;
pub use debug_protection::DebugProtection;
pub use evaluate::StringDecoding;
pub use merge_object_assignments::MergeObjectAssignments;
pub use self_defending::SelfDefending;
pub use var_functions::VarFunctions;

use crate::pass::{apply_async, apply_many};
use crate::unminify::{ComputedProperties, MergeStrings};
use crate::util::{AsyncTransform, FixpointConfig, Transform};
use async_trait::async_trait;
use decloak_sandbox::Sandbox;
use decloak_utils::errors::TransformError;
use swc_core::common::sync::Lrc;
use swc_core::common::SourceMap;
use swc_core::ecma::ast::Module;
use tracing::warn;

/// Structural passes run between decoding rounds.
pub fn rules() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(MergeStrings),
        Box::new(ControlFlowObject),
        Box::new(ControlFlowSwitch),
        Box::new(DeadCode),
        Box::new(ComputedProperties),
    ]
}

pub struct Deobfuscator {
    decoding: StringDecoding,
    rules: Vec<Box<dyn Transform>>,
    cfg: FixpointConfig,
}

impl Deobfuscator {
    pub fn new(source_map: Lrc<SourceMap>, cfg: FixpointConfig) -> Self {
        Self {
            decoding: StringDecoding::new(source_map),
            rules: rules(),
            cfg,
        }
    }
}

#[async_trait]
impl AsyncTransform for Deobfuscator {
    fn name(&self) -> &'static str {
        "deobfuscate"
    }

    async fn apply(&self, module: &mut Module, sandbox: &dyn Sandbox) -> Result<usize, TransformError> {
        let mut total = 0;
        for _ in 0..self.cfg.max_iterations {
            let changes = apply_async(module, &self.decoding, sandbox).await?
                + apply_many(module, &self.rules, &self.cfg)?;
            if changes == 0 {
                return Ok(total);
            }
            total += changes;
        }
        warn!("deobfuscation did not converge after {} rounds", self.cfg.max_iterations);
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::{codegen::generate, normalize, parse};
    use decloak_sandbox::{IsolatedSandbox, SandboxLimits};

    #[tokio::test]
    async fn test_decoding_feeds_control_flow_objects() {
        let mut tree = parse(
            r#"
            var _0x3c = ["log", "abc", "hello"];
            function _0x1f(i) { return _0x3c[i]; }
            function main() {
                var _0x5e = { "abc": "hello", def: function (a, b) { return a(b); } };
                _0x5e[_0x1f(1)] === "hello" ? _0x5e.def(console[_0x1f(0)], _0x1f(2)) : f();
            }
            "#,
        )
        .unwrap();
        let unit = Deobfuscator::new(tree.source_map.clone(), FixpointConfig::default());
        let sandbox = IsolatedSandbox::new(SandboxLimits::default());
        let changes = apply_async(&mut tree.module, &unit, &sandbox).await.unwrap();
        assert!(changes > 0);
        assert_eq!(
            generate(&tree).unwrap(),
            normalize(r#"function main() { console.log("hello"); }"#).unwrap()
        );
    }
}
