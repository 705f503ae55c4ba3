//! Removal of obfuscator.io's self-defending code.
//!
//! ```js
//! const ctrl = (function () {
//!     let first = true;
//!     return function (context, fn) { /* call fn once */ };
//! })();
//! const guard = ctrl(this, function () {
//!     return guard.toString().search("(((.+)+)+)+$").toString().constructor(guard).search("(((.+)+)+)+$");
//! });
//! guard();
//! ```
//!
//! Formatting the output makes `guard` spin in catastrophic regex
//! backtracking.

use crate::util::{process_stmt_lists, single_declarator, StmtListPass, Transform};
use decloak_analysis::bindings::count_references;
use decloak_core::ast::{iife_function, is_ident, FunctionLike};
use decloak_core::matchers::{function_expr, string};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use tracing::debug;

const REDOS: &str = "(((.+)+)+)+$";

pub struct SelfDefending;

/// `var guard = ctrl(this, function () { ... REDOS ... })`.
fn guard(stmt: &Stmt) -> Option<(String, String)> {
    let (_, name, Some(Expr::Call(call))) = single_declarator(stmt)? else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(controller) = &**callee else {
        return None;
    };
    let [context, body] = call.args.as_slice() else {
        return None;
    };
    let guarded = matches!(&*context.expr, Expr::This(_))
        && function_expr().matches(&body.expr)
        && string(REDOS).find_in(&*body.expr);
    guarded.then(|| (name.sym.to_string(), controller.sym.to_string()))
}

/// `name();`
pub(super) fn is_call_of(stmt: &Stmt, name: &str) -> bool {
    let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
        return false;
    };
    let Expr::Call(call) = &**expr else {
        return false;
    };
    matches!(&call.callee, Callee::Expr(callee) if is_ident(callee, name))
}

/// `var ctrl = (function () { var first = true; return function (a, b) {...}; })();`
fn is_controller(stmt: &Stmt, name: &str) -> bool {
    let Some((_, binding, Some(init))) = single_declarator(stmt) else {
        return false;
    };
    if *binding.sym != *name {
        return false;
    }
    let Some((_, function)) = iife_function(init) else {
        return false;
    };
    let Some(body) = function.body_stmts() else {
        return false;
    };
    let has_flag = body.iter().any(|s| {
        matches!(
            single_declarator(s),
            Some((_, _, Some(Expr::Lit(Lit::Bool(Bool { value: true, .. })))))
        )
    });
    let returns_handler = body.iter().any(|s| match s {
        Stmt::Return(ReturnStmt { arg: Some(arg), .. }) => {
            FunctionLike::from_expr(arg).is_some_and(|f| f.param_count() == 2)
        }
        _ => false,
    });
    has_flag && returns_handler
}

/// Drops the call-once controllers in `names` that nothing in `stmts` uses
/// any more.
pub(super) fn remove_unused_controllers(stmts: &mut Vec<Stmt>, names: &[String]) -> usize {
    let mut removed = 0;
    for name in names {
        let Some(index) = stmts.iter().position(|s| is_controller(s, name)) else {
            continue;
        };
        let uses: usize = stmts.iter().map(|s| count_references(s, name)).sum();
        if uses == 1 {
            stmts.remove(index);
            removed += 1;
        }
    }
    removed
}

struct Remover;

impl StmtListPass for Remover {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let mut guards = Vec::new();
        let mut controllers = Vec::new();
        stmts.retain(|stmt| match guard(stmt) {
            Some((name, controller)) => {
                guards.push(name);
                controllers.push(controller);
                false
            }
            None => true,
        });
        if guards.is_empty() {
            return 0;
        }
        debug!("removing self-defending guards {}", guards.join(", "));
        let before = stmts.len();
        stmts.retain(|stmt| !guards.iter().any(|g| is_call_of(stmt, g)));
        guards.len() + before - stmts.len() + remove_unused_controllers(stmts, &controllers)
    }
}

impl Transform for SelfDefending {
    fn name(&self) -> &'static str {
        "self_defending"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(process_stmt_lists(module, &mut Remover))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    const CONTROLLER: &str = r#"
        var _0xc = (function () {
            var first = true;
            return function (context, fn) {
                var rfn = first ? function () {
                    if (fn) { var res = fn.apply(context, arguments); fn = null; return res; }
                } : function () {};
                first = false;
                return rfn;
            };
        })();
    "#;

    #[test]
    fn test_removes_guard_and_controller() {
        let code = format!(
            r#"{CONTROLLER}
            var _0xg = _0xc(this, function () {{
                return _0xg.toString().search("(((.+)+)+)+$").toString().constructor(_0xg).search("(((.+)+)+)+$");
            }});
            _0xg();
            console.log("hi");
            "#
        );
        assert_transform(&SelfDefending, &code, r#"console.log("hi");"#);
    }

    #[test]
    fn test_keeps_shared_controller() {
        let code = format!(
            r#"{CONTROLLER}
            var _0xg = _0xc(this, function () {{ return _0xg.toString().search("(((.+)+)+)+$"); }});
            _0xg();
            var other = _0xc(this, function () {{ work(); }});
            "#
        );
        let expected = format!(
            r#"{CONTROLLER}
            var other = _0xc(this, function () {{ work(); }});
            "#
        );
        assert_transform(&SelfDefending, &code, &expected);
    }

    #[test]
    fn test_ignores_plain_calls() {
        assert_unchanged(&SelfDefending, "var a = b(this, function () { return 1; }); a();");
    }
}
