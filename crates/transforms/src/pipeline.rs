//! The stage pipeline.
//!
//! Stages run in a fixed order over one tree, each included or skipped based
//! on [`Options`]. Progress is reported after every stage as a percentage of
//! the included stages. A failing stage aborts the run; everything weaker
//! than that (parse diagnostics, non-converging groups, sandbox failures,
//! unresolved requires) is logged and processing continues.

use crate::deobfuscate::{
    DebugProtection, Deobfuscator, MergeObjectAssignments, SelfDefending, VarFunctions,
};
use crate::jsx::Jsx;
use crate::mangle::{Mangle, NameFilter};
use crate::pass::{apply, apply_async, apply_many};
use crate::unminify::{BlockStatements, Sequence, SplitVariableDeclarations};
use crate::util::{FixpointConfig, Transform};
use crate::{transpile, unminify};
use decloak_analysis::{collect_metrics, compare};
use decloak_core::codegen::generate;
use decloak_core::matchers::Mappings;
use decloak_core::{parse, SyntaxTree};
use decloak_sandbox::{default_sandbox, Sandbox};
use decloak_unpack::{unpack, Bundle};
use decloak_utils::errors::{PipelineError, TransformError};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Receives progress in percent, from 0 to 100.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Which bindings the mangle stage renames.
#[derive(Clone, Default)]
pub enum MangleMode {
    #[default]
    Off,
    All,
    /// Bindings whose original name passes the predicate.
    Filter(NameFilter),
}

impl MangleMode {
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, Self::Off)
    }
}

impl fmt::Debug for MangleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => f.write_str("Off"),
            Self::All => f.write_str("All"),
            Self::Filter(_) => f.write_str("Filter(..)"),
        }
    }
}

/// Configuration for a pipeline run.
#[derive(Clone)]
pub struct Options {
    /// Rebuild JSX from compiled element factory calls.
    pub jsx: bool,
    /// Split recognised bundles into modules.
    pub unpack: bool,
    /// Reverse obfuscator transformations.
    pub deobfuscate: bool,
    /// Undo minification and lowered syntax.
    pub unminify: bool,
    pub mangle: MangleMode,
    /// Path overrides for unpacked modules.
    pub mappings: Mappings,
    /// Evaluator for string decoders, created once per run.
    pub sandbox: Arc<dyn Sandbox>,
    pub on_progress: ProgressFn,
    pub fixpoint: FixpointConfig,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            jsx: true,
            unpack: true,
            deobfuscate: true,
            unminify: true,
            mangle: MangleMode::Off,
            mappings: Mappings::new(),
            sandbox: default_sandbox(),
            on_progress: Arc::new(|_| {}),
            fixpoint: FixpointConfig::default(),
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("jsx", &self.jsx)
            .field("unpack", &self.unpack)
            .field("deobfuscate", &self.deobfuscate)
            .field("unminify", &self.unminify)
            .field("mangle", &self.mangle)
            .field("mappings", &self.mappings)
            .field("fixpoint", &self.fixpoint)
            .finish_non_exhaustive()
    }
}

impl Options {
    pub fn with_jsx(mut self, enabled: bool) -> Self {
        self.jsx = enabled;
        self
    }

    pub fn with_unpack(mut self, enabled: bool) -> Self {
        self.unpack = enabled;
        self
    }

    pub fn with_deobfuscate(mut self, enabled: bool) -> Self {
        self.deobfuscate = enabled;
        self
    }

    pub fn with_unminify(mut self, enabled: bool) -> Self {
        self.unminify = enabled;
        self
    }

    pub fn with_mangle(mut self, mode: MangleMode) -> Self {
        self.mangle = mode;
        self
    }

    pub fn with_mappings(mut self, mappings: Mappings) -> Self {
        self.mappings = mappings;
        self
    }

    pub fn with_sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = sandbox;
        self
    }

    pub fn with_progress(mut self, on_progress: ProgressFn) -> Self {
        self.on_progress = on_progress;
        self
    }

    pub fn with_fixpoint(mut self, fixpoint: FixpointConfig) -> Self {
        self.fixpoint = fixpoint;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Prepare,
    Deobfuscate,
    Unminify,
    Mangle,
    Structural,
    Merge,
    Emit,
    Unpack,
}

impl Stage {
    const ALL: [Stage; 8] = [
        Stage::Prepare,
        Stage::Deobfuscate,
        Stage::Unminify,
        Stage::Mangle,
        Stage::Structural,
        Stage::Merge,
        Stage::Emit,
        Stage::Unpack,
    ];

    const fn name(self) -> &'static str {
        match self {
            Stage::Prepare => "prepare",
            Stage::Deobfuscate => "deobfuscate",
            Stage::Unminify => "unminify",
            Stage::Mangle => "mangle",
            Stage::Structural => "structural",
            Stage::Merge => "merge",
            Stage::Emit => "emit",
            Stage::Unpack => "unpack",
        }
    }

    fn is_included(self, options: &Options) -> bool {
        match self {
            Stage::Prepare | Stage::Emit => true,
            Stage::Deobfuscate | Stage::Merge => options.deobfuscate,
            Stage::Unminify => options.unminify,
            Stage::Mangle => options.mangle.is_enabled(),
            Stage::Structural => options.deobfuscate || options.jsx,
            Stage::Unpack => options.unpack,
        }
    }
}

/// Output of a pipeline run.
#[derive(Debug, Clone)]
pub struct DeobfuscationResult {
    pub code: String,
    /// Present when the input was a recognised bundle and unpacking was on.
    pub bundle: Option<Bundle>,
}

impl DeobfuscationResult {
    /// Writes `deobfuscated.js` into `dir`, followed by the bundle's modules.
    pub fn save(&self, dir: impl AsRef<Path>) -> Result<(), PipelineError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join("deobfuscated.js"), &self.code)?;
        if let Some(bundle) = &self.bundle {
            bundle.save(dir)?;
        }
        Ok(())
    }
}

fn prepare_rules() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(BlockStatements),
        Box::new(Sequence),
        Box::new(SplitVariableDeclarations),
        Box::new(VarFunctions),
    ]
}

async fn run_stage(
    stage: Stage,
    tree: &mut SyntaxTree,
    options: &Options,
) -> Result<usize, TransformError> {
    let cfg = &options.fixpoint;
    let module = &mut tree.module;
    match stage {
        Stage::Prepare => apply_many(module, &prepare_rules(), cfg),
        Stage::Deobfuscate => {
            let unit = Deobfuscator::new(tree.source_map.clone(), *cfg);
            apply_async(module, &unit, options.sandbox.as_ref()).await
        }
        Stage::Unminify => {
            let lowered = apply_many(module, &transpile::rules(), cfg)?;
            Ok(lowered + apply_many(module, &unminify::rules(), cfg)?)
        }
        Stage::Mangle => match &options.mangle {
            MangleMode::Off => Ok(0),
            MangleMode::All => apply(module, &Mangle::all()),
            MangleMode::Filter(filter) => apply(module, &Mangle::with_filter(filter.clone())),
        },
        Stage::Structural => {
            let mut units: Vec<Box<dyn Transform>> = Vec::new();
            if options.deobfuscate {
                units.push(Box::new(SelfDefending));
                units.push(Box::new(DebugProtection));
            }
            if options.jsx {
                units.push(Box::new(Jsx));
            }
            apply_many(module, &units, cfg)
        }
        Stage::Merge => apply(module, &MergeObjectAssignments),
        Stage::Emit | Stage::Unpack => Ok(0),
    }
}

/// Runs every included stage over `code`.
pub async fn deobfuscate(code: &str, options: Options) -> Result<DeobfuscationResult, PipelineError> {
    let mut tree = parse(code)?;
    for diagnostic in &tree.diagnostics {
        warn!("parse: {diagnostic}");
    }

    let stages: Vec<Stage> = Stage::ALL
        .into_iter()
        .filter(|s| s.is_included(&options))
        .collect();
    debug!(
        "stages: {}",
        stages.iter().map(|s| s.name()).collect::<Vec<_>>().join(" → ")
    );
    (options.on_progress)(0.0);

    let mut output = String::new();
    let mut bundle = None;
    for (done, stage) in stages.iter().copied().enumerate() {
        let started = Instant::now();
        match stage {
            Stage::Emit => output = generate(&tree)?,
            Stage::Unpack => {
                bundle = unpack(&tree.module, &tree.source_map, &options.mappings);
                if let Some(bundle) = &bundle {
                    info!("unpacked {:?} bundle with {} modules", bundle.kind, bundle.modules.len());
                }
            }
            _ => {
                let before = collect_metrics(&tree.module);
                let changes = run_stage(stage, &mut tree, &options)
                    .await
                    .map_err(|source| PipelineError::Stage {
                        stage: stage.name(),
                        source,
                    })?;
                let after = collect_metrics(&tree.module);
                info!(
                    "{:<12} {changes:>5} changes, readability {:+.2} in {:?}",
                    stage.name(),
                    compare(&before, &after),
                    started.elapsed()
                );
            }
        }
        (options.on_progress)(100.0 * (done + 1) as f64 / stages.len() as f64);
    }

    Ok(DeobfuscationResult {
        code: output,
        bundle,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::normalize;
    use decloak_sandbox::Value;
    use decloak_utils::errors::EvalError;
    use std::sync::Mutex;

    fn offline() -> Options {
        let refuse = |_: &str| -> Result<Value, EvalError> { Err(EvalError::Unsupported("offline".into())) };
        Options::default().with_sandbox(Arc::new(refuse))
    }

    #[tokio::test]
    async fn test_unminifies_by_default() {
        let result = deobfuscate("if (a) b(), c();", offline()).await.unwrap();
        assert_eq!(result.code, normalize("if (a) { b(); c(); }").unwrap());
        assert!(result.bundle.is_none());
    }

    #[tokio::test]
    async fn test_progress_per_stage() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = offline().with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));
        deobfuscate("x;", options).await.unwrap();

        let seen = seen.lock().unwrap();
        // prepare, deobfuscate, unminify, structural, merge, emit, unpack
        assert_eq!(seen.len(), 8);
        assert_eq!(seen.first(), Some(&0.0));
        assert_eq!(seen.last(), Some(&100.0));
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_disabled_stages_are_skipped() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = offline()
            .with_jsx(false)
            .with_unpack(false)
            .with_deobfuscate(false)
            .with_unminify(false)
            .with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));
        let result = deobfuscate("x = !0;", options).await.unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0.0, 50.0, 100.0]);
        assert_eq!(result.code, normalize("x = !0;").unwrap());
    }

    #[tokio::test]
    async fn test_mangle_stage() {
        let options = offline().with_mangle(MangleMode::All);
        let result = deobfuscate("function foo(bar) { return bar; }", options).await.unwrap();
        assert_eq!(result.code, normalize("function f(p) { return p; }").unwrap());
    }

    #[tokio::test]
    async fn test_bookmarklet_input() {
        let result = deobfuscate("javascript:alert(%22hi%22)", offline()).await.unwrap();
        assert_eq!(result.code, normalize(r#"alert("hi");"#).unwrap());
    }

    #[tokio::test]
    async fn test_save_writes_code() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let result = deobfuscate("a && b();", offline()).await.unwrap();
        result.save(&out).unwrap();

        let saved = fs::read_to_string(out.join("deobfuscated.js")).unwrap();
        assert_eq!(saved, result.code);
        assert_eq!(saved, normalize("if (a) { b(); }").unwrap());
    }
}
