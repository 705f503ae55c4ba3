//! Sandbox-backed string decoding.

use super::decoder::{self, is_constant};
use super::{rotator, string_array};
use crate::pass::apply;
use crate::unminify::ExtractTernaryCalls;
use crate::util::{rewrite_exprs, AsyncTransform};
use async_trait::async_trait;
use decloak_analysis::bindings::count_references;
use decloak_core::ast::{bool_lit, null_lit, num_lit, str_lit, undefined};
use decloak_core::codegen::{emit_expr, emit_stmts};
use decloak_sandbox::{Sandbox, Value};
use decloak_utils::errors::TransformError;
use std::collections::{HashMap, HashSet};
use swc_core::common::sync::Lrc;
use swc_core::common::SourceMap;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::{debug, warn};

/// Replaces calls of the obfuscator's string decoders with the strings they
/// return.
///
/// The string array, its rotator and the decoders are emitted as a setup
/// fragment and every decoder call with constant arguments is evaluated
/// after it. All candidates go to the sandbox in one batch first; if the
/// batch fails, each candidate is retried alone and failures leave their
/// call untouched. Setup code is removed once nothing refers to it.
pub struct StringDecoding {
    source_map: Lrc<SourceMap>,
}

impl StringDecoding {
    pub fn new(source_map: Lrc<SourceMap>) -> Self {
        Self { source_map }
    }
}

struct Setup {
    indices: Vec<usize>,
    names: Vec<String>,
    decoders: Vec<String>,
}

fn locate(module: &Module) -> Option<Setup> {
    let array = string_array::find(module)?;
    let decoders = decoder::find(module, &array);
    if decoders.is_empty() {
        return None;
    }
    let mut indices: Vec<usize> = decoders.iter().map(|d| d.index).collect();
    indices.push(array.index);
    indices.extend(rotator::find(module, &array));
    indices.sort_unstable();

    // Obfuscator tables are only touched by their decoders and rotator.
    let owned: usize = indices
        .iter()
        .map(|&i| count_references(&module.body[i], &array.name))
        .sum();
    if owned != count_references(module, &array.name) {
        debug!("{} is used outside its decoders, not decoding", array.name);
        return None;
    }
    let decoders: Vec<String> = decoders.into_iter().map(|d| d.name).collect();
    let mut names = decoders.clone();
    names.push(array.name);
    Some(Setup {
        indices,
        names,
        decoders,
    })
}

fn decoder_call<'a>(expr: &'a Expr, decoders: &HashSet<&str>) -> Option<&'a CallExpr> {
    let Expr::Call(call) = expr else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(callee) = &**callee else {
        return None;
    };
    let evaluable = decoders.contains(&*callee.sym)
        && call
            .args
            .iter()
            .all(|a| a.spread.is_none() && is_constant(&a.expr));
    evaluable.then_some(call)
}

struct Candidates<'a> {
    decoders: HashSet<&'a str>,
    source_map: &'a Lrc<SourceMap>,
    seen: HashSet<String>,
    found: Vec<String>,
    error: Option<TransformError>,
}

impl Visit for Candidates<'_> {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.error.is_some() {
            return;
        }
        let Some(call) = decoder_call(expr, &self.decoders) else {
            expr.visit_children_with(self);
            return;
        };
        match emit_expr(&Expr::Call(call.clone()), self.source_map) {
            Ok(code) => {
                if self.seen.insert(code.clone()) {
                    self.found.push(code);
                }
            }
            Err(e) => self.error = Some(e.into()),
        }
    }
}

fn to_literal(value: &Value) -> Option<Expr> {
    Some(match value {
        Value::String(s) => str_lit(s),
        Value::Number(n) => num_lit(*n),
        Value::Bool(b) => bool_lit(*b),
        Value::Null => null_lit(),
        Value::Undefined => undefined(),
        Value::Array(_) | Value::Object(_) => return None,
    })
}

impl StringDecoding {
    async fn evaluate(
        &self,
        sandbox: &dyn Sandbox,
        setup: &str,
        candidates: &[String],
    ) -> HashMap<String, Expr> {
        let mut values = HashMap::new();
        let batch = format!("{setup}\n[{}];", candidates.join(",\n"));
        match sandbox.evaluate(&batch).await {
            Ok(Value::Array(results)) if results.len() == candidates.len() => {
                for (code, value) in candidates.iter().zip(&results) {
                    if let Some(literal) = to_literal(value) {
                        values.insert(code.clone(), literal);
                    }
                }
                return values;
            }
            Ok(other) => debug!("batched decoding returned {other:?}, retrying one by one"),
            Err(e) => debug!("batched decoding failed ({e}), retrying one by one"),
        }
        for code in candidates {
            match sandbox.evaluate(&format!("{setup}\n{code};")).await {
                Ok(value) => {
                    if let Some(literal) = to_literal(&value) {
                        values.insert(code.clone(), literal);
                    }
                }
                Err(e) => warn!("could not decode {code}: {e}"),
            }
        }
        values
    }
}

#[async_trait]
impl AsyncTransform for StringDecoding {
    fn name(&self) -> &'static str {
        "string_decoding"
    }

    async fn apply(&self, module: &mut Module, sandbox: &dyn Sandbox) -> Result<usize, TransformError> {
        let Some(found) = locate(module) else {
            return Ok(0);
        };
        let mut changes = decoder::inline_aliases(module, &found.decoders);
        changes += decoder::inline_wrappers(module, &found.decoders);
        for name in &found.decoders {
            changes += apply(module, &ExtractTernaryCalls::with_callee(name.as_str()))?;
        }
        // Inlining removed statements, so positions are looked up again.
        let Some(setup) = locate(module) else {
            return Ok(changes);
        };

        let setup_stmts: Vec<Stmt> = setup
            .indices
            .iter()
            .filter_map(|&i| module.body[i].as_stmt().cloned())
            .collect();
        let setup_code = emit_stmts(&setup_stmts, &self.source_map)?;

        let mut candidates = Candidates {
            decoders: setup.decoders.iter().map(String::as_str).collect(),
            source_map: &self.source_map,
            seen: HashSet::new(),
            found: Vec::new(),
            error: None,
        };
        for (i, item) in module.body.iter().enumerate() {
            if !setup.indices.contains(&i) {
                item.visit_with(&mut candidates);
            }
        }
        if let Some(e) = candidates.error {
            return Err(e);
        }
        let codes = candidates.found;
        if !codes.is_empty() {
            debug!("decoding {} distinct strings", codes.len());
            let values = self.evaluate(sandbox, &setup_code, &codes).await;
            let decoders: HashSet<&str> = setup.decoders.iter().map(String::as_str).collect();
            let source_map = &self.source_map;
            for (i, item) in module.body.iter_mut().enumerate() {
                if setup.indices.contains(&i) {
                    continue;
                }
                changes += rewrite_exprs(item, |expr| {
                    decoder_call(expr, &decoders)?;
                    let code = emit_expr(expr, source_map).ok()?;
                    values.get(&code).cloned()
                });
            }
        }

        let referenced = module
            .body
            .iter()
            .enumerate()
            .filter(|(i, _)| !setup.indices.contains(i))
            .any(|(_, item)| setup.names.iter().any(|n| count_references(item, n) > 0));
        if !referenced {
            debug!("removing string array {}", setup.names.join(", "));
            for &i in setup.indices.iter().rev() {
                module.body.remove(i);
            }
            changes += setup.indices.len();
        }
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::apply_async;
    use decloak_core::{codegen::generate, normalize, parse};
    use decloak_sandbox::{IsolatedSandbox, SandboxLimits};
    use decloak_utils::errors::EvalError;

    async fn decode(code: &str, sandbox: &dyn Sandbox) -> (String, usize) {
        let mut tree = parse(code).unwrap();
        let unit = StringDecoding::new(tree.source_map.clone());
        let changes = apply_async(&mut tree.module, &unit, sandbox).await.unwrap();
        (generate(&tree).unwrap(), changes)
    }

    const OBFUSCATED: &str = r#"
        var _0x4a = ["log", "world", "hello"];
        (function (arr, n) {
            var rotate = function (k) { while (--k) { arr["push"](arr["shift"]()); } };
            rotate(++n);
        })(_0x4a, 0x1);
        var _0x1b = function (i, unused) {
            i = i - 0x0;
            return _0x4a[i];
        };
        function greet() {
            const d = _0x1b;
            console[d(0x0)](_0x1b(0x2) + " " + d(0x1));
        }
    "#;

    #[tokio::test]
    async fn test_decodes_rotated_array() {
        let sandbox = IsolatedSandbox::new(SandboxLimits::default());
        let (out, changes) = decode(OBFUSCATED, &sandbox).await;
        assert!(changes > 0);
        assert_eq!(
            out,
            normalize(r#"function greet() { console["world"]("log" + " " + "hello"); }"#).unwrap()
        );
    }

    #[tokio::test]
    async fn test_falls_back_to_single_candidates() {
        // Rejects any batch and the one candidate mentioning "bad".
        let sandbox = |source: &str| -> Result<Value, EvalError> {
            let last = source.lines().last().unwrap_or_default();
            if last.ends_with("];") || last.contains("bad") {
                return Err(EvalError::Thrown("no".into()));
            }
            Ok(Value::String("decoded".into()))
        };
        let (out, _) = decode(
            r#"
            var _0xa = ["a"];
            function _0xd(i) { return _0xa[i]; }
            x = _0xd(0);
            y = _0xd("bad");
            "#,
            &sandbox,
        )
        .await;
        // The failed candidate keeps the setup alive.
        assert!(out.contains(r#"x = "decoded""#), "{out}");
        assert!(out.contains(r#"y = _0xd("bad")"#), "{out}");
        assert!(out.contains("function _0xd"), "{out}");
    }

    #[tokio::test]
    async fn test_ignores_code_without_string_array() {
        let sandbox = |_: &str| -> Result<Value, EvalError> { panic!("sandbox must not run") };
        let (out, changes) = decode("var a = [1, 2]; f(a[0]);", &sandbox).await;
        assert_eq!(changes, 0);
        assert_eq!(out, normalize("var a = [1, 2]; f(a[0]);").unwrap());
    }

    #[tokio::test]
    async fn test_ignores_arrays_shared_with_other_code() {
        let sandbox = |_: &str| -> Result<Value, EvalError> { panic!("sandbox must not run") };
        let code = r#"
            var names = ["a", "b"];
            function get(i) { return names[i]; }
            names.push("c");
            f(get(2));
        "#;
        let (out, changes) = decode(code, &sandbox).await;
        assert_eq!(changes, 0);
        assert_eq!(out, normalize(code).unwrap());
    }
}
