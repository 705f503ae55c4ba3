use super::self_defending::{is_call_of, remove_unused_controllers};
use crate::util::{process_stmt_lists, single_declarator, StmtListPass, Transform};
use decloak_analysis::bindings::count_references;
use decloak_core::ast::callee_expr;
use decloak_core::matchers::{any, call, member, or, string};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::debug;

/// Removes the anti-debugging loop that keeps a devtools session paused on
/// `debugger`:
///
/// ```js
/// function _0xd(c) {
///     function inner(n) {
///         if (typeof n === "string") return function () {}.constructor("while (true) {}").apply("counter");
///         (function () { return true; }).constructor("debugger").call("action");
///         inner(++n);
///     }
///     try { if (c) return inner; inner(0); } catch (e) {}
/// }
/// ```
///
/// Statements in the same block that call it (directly, through an IIFE or
/// from a `setInterval` callback) go with it.
pub struct DebugProtection;

#[derive(Default)]
struct HasDebugger {
    found: bool,
}

impl Visit for HasDebugger {
    fn visit_debugger_stmt(&mut self, _: &DebuggerStmt) {
        self.found = true;
    }
}

fn is_debug_protection(function: &Function) -> bool {
    let triggers = or(vec![string("debugger"), string("debu")]).find_in(function) || {
        let mut has = HasDebugger::default();
        function.visit_with(&mut has);
        has.found
    };
    let spins = or(vec![
        string("while (true) {}"),
        call(member(any(), "constructor"), None),
    ])
    .find_in(function);
    triggers && spins
}

/// The outer function of the protection. Its recursive inner helper also
/// matches the shape but refers to itself.
fn protection_name(stmt: &Stmt) -> Option<String> {
    let (name, function) = match stmt {
        Stmt::Decl(Decl::Fn(f)) => (&*f.ident.sym, &*f.function),
        _ => match single_declarator(stmt)? {
            (_, name, Some(Expr::Fn(f))) => (&*name.sym, &*f.function),
            _ => return None,
        },
    };
    (is_debug_protection(function) && count_references(function, name) == 0)
        .then(|| name.to_string())
}

struct Remover;

impl StmtListPass for Remover {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let Some(index) = stmts.iter().position(|s| protection_name(s).is_some()) else {
            return 0;
        };
        let stmt = stmts.remove(index);
        let Some(name) = protection_name(&stmt) else {
            return 0;
        };
        debug!("removing debug protection {name}");
        let before = stmts.len() + 1;

        // Callers, and variables holding a caller together with their calls.
        let mut holders = Vec::new();
        let mut controllers = Vec::new();
        stmts.retain(|s| {
            if count_references(s, &name) == 0 {
                return true;
            }
            if let Some((_, holder, init)) = single_declarator(s) {
                holders.push(holder.sym.to_string());
                if let Some(Expr::Call(c)) = init {
                    if let Some(Expr::Ident(controller)) = callee_expr(c) {
                        controllers.push(controller.sym.to_string());
                    }
                }
                return false;
            }
            !matches!(s, Stmt::Expr(_))
        });
        stmts.retain(|s| !holders.iter().any(|h| is_call_of(s, h)));
        before - stmts.len() + remove_unused_controllers(stmts, &controllers)
    }
}

impl Transform for DebugProtection {
    fn name(&self) -> &'static str {
        "debug_protection"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(process_stmt_lists(module, &mut Remover))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_removes_protection_and_callers() {
        assert_transform(
            &DebugProtection,
            r#"
            (function () { _0xd(); })();
            setInterval(function () { _0xd(); }, 4000);
            function _0xd(c) {
                function inner(n) {
                    if (typeof n === "string") {
                        return function (x) {}.constructor("while (true) {}").apply("counter");
                    }
                    (function () { return true; }).constructor("debugger").call("action");
                    inner(++n);
                }
                try { if (c) { return inner; } inner(0); } catch (e) {}
            }
            main();
            "#,
            "main();",
        );
    }

    #[test]
    fn test_keeps_plain_debugger_statements() {
        assert_unchanged(&DebugProtection, "function f() { debugger; return 1; } f();");
    }
}
