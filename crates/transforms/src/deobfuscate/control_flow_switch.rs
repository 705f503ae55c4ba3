use crate::util::{process_stmt_lists, StmtListPass, Transform};
use decloak_analysis::bindings::count_references;
use decloak_core::ast::{as_number, as_str, callee_expr, is_member_named, pat_ident_name};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

/// Reverses switch-based control-flow flattening:
///
/// ```js
/// var order = "1|0|2".split("|"), i = 0;
/// while (true) {
///     switch (order[i++]) {
///         case "0": b(); continue;
///         case "1": a(); continue;
///         case "2": c(); continue;
///     }
///     break;
/// }
/// ```
///
/// becomes `a(); b(); c();`.
pub struct ControlFlowSwitch;

/// `"1|0|2".split("|")`
fn order(init: &Expr) -> Option<Vec<String>> {
    let Expr::Call(call) = init else {
        return None;
    };
    let callee = callee_expr(call)?;
    let Expr::Member(member) = callee else {
        return None;
    };
    if !is_member_named(callee, "split") {
        return None;
    }
    let [separator] = call.args.as_slice() else {
        return None;
    };
    let separator = as_str(&separator.expr)?;
    let sequence = as_str(&member.obj)?;
    Some(sequence.split(separator).map(str::to_string).collect())
}

fn declarators(stmt: &Stmt) -> Option<&[VarDeclarator]> {
    match stmt {
        Stmt::Decl(Decl::Var(var)) => Some(var.decls.as_slice()),
        _ => None,
    }
}

/// `(statements used, order name, steps, counter name)` declared either in
/// one statement or two.
fn header(stmts: &[Stmt]) -> Option<(usize, String, Vec<String>, String)> {
    let mut steps: Option<(String, Vec<String>)> = None;
    let mut counter: Option<String> = None;
    for (used, stmt) in stmts.iter().take(2).enumerate() {
        for decl in declarators(stmt)? {
            let name = pat_ident_name(&decl.name)?.to_string();
            let init = decl.init.as_deref()?;
            match order(init) {
                Some(order) if steps.is_none() => steps = Some((name, order)),
                None if counter.is_none() && as_number(init) == Some(0.0) => counter = Some(name),
                _ => return None,
            }
        }
        if let (Some((order, steps)), Some(counter)) = (&steps, &counter) {
            return Some((used + 1, order.clone(), steps.clone(), counter.clone()));
        }
    }
    None
}

fn is_truthy(expr: &Expr) -> bool {
    match expr {
        Expr::Lit(Lit::Bool(b)) => b.value,
        Expr::Lit(Lit::Num(n)) => n.value != 0.0,
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang,
            arg,
            ..
        }) => match &**arg {
            Expr::Lit(Lit::Num(n)) => n.value == 0.0,
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Bang,
                arg,
                ..
            }) => matches!(&**arg, Expr::Array(_) | Expr::Object(_)),
            _ => false,
        },
        _ => false,
    }
}

fn loop_body(stmt: &Stmt) -> Option<&[Stmt]> {
    let body = match stmt {
        Stmt::While(w) if is_truthy(&w.test) => &w.body,
        Stmt::For(f)
            if f.init.is_none()
                && f.update.is_none()
                && f.test.as_deref().map_or(true, is_truthy) =>
        {
            &f.body
        }
        _ => return None,
    };
    match &**body {
        Stmt::Block(block) => Some(block.stmts.as_slice()),
        _ => None,
    }
}

/// `order[counter++]`
fn dispatches(discriminant: &Expr, order: &str, counter: &str) -> bool {
    let Expr::Member(member) = discriminant else {
        return false;
    };
    let MemberProp::Computed(prop) = &member.prop else {
        return false;
    };
    let increments = matches!(
        &*prop.expr,
        Expr::Update(UpdateExpr { op: UpdateOp::PlusPlus, prefix: false, arg, .. })
            if matches!(&**arg, Expr::Ident(i) if *i.sym == *counter)
    );
    increments && matches!(&*member.obj, Expr::Ident(i) if *i.sym == *order)
}

/// Looks for `break`/`continue` that would leave the case body.
#[derive(Default)]
struct Jumps {
    loops: usize,
    switches: usize,
    found: bool,
}

impl Visit for Jumps {
    fn visit_break_stmt(&mut self, stmt: &BreakStmt) {
        if self.loops + self.switches == 0 || stmt.label.is_some() {
            self.found = true;
        }
    }

    fn visit_continue_stmt(&mut self, stmt: &ContinueStmt) {
        if self.loops == 0 || stmt.label.is_some() {
            self.found = true;
        }
    }

    fn visit_stmt(&mut self, stmt: &Stmt) {
        let is_loop = matches!(
            stmt,
            Stmt::For(_) | Stmt::ForIn(_) | Stmt::ForOf(_) | Stmt::While(_) | Stmt::DoWhile(_)
        );
        let is_switch = matches!(stmt, Stmt::Switch(_));
        self.loops += usize::from(is_loop);
        self.switches += usize::from(is_switch);
        stmt.visit_children_with(self);
        self.loops -= usize::from(is_loop);
        self.switches -= usize::from(is_switch);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}
}

fn leaves_case(stmts: &[Stmt]) -> bool {
    let mut jumps = Jumps::default();
    for stmt in stmts {
        stmt.visit_with(&mut jumps);
    }
    jumps.found
}

fn unflatten(stmt: &Stmt, order: &str, steps: &[String], counter: &str) -> Option<Vec<Stmt>> {
    let [Stmt::Switch(switch), Stmt::Break(BreakStmt { label: None, .. })] = loop_body(stmt)? else {
        return None;
    };
    if !dispatches(&switch.discriminant, order, counter) {
        return None;
    }
    let mut out = Vec::new();
    for step in steps {
        let case = switch
            .cases
            .iter()
            .find(|c| c.test.as_deref().and_then(as_str) == Some(step.as_str()))?;
        let body = match case.cons.as_slice() {
            [body @ .., Stmt::Continue(ContinueStmt { label: None, .. })] => body,
            // The last step may return instead.
            body @ [.., Stmt::Return(_)] => body,
            _ => return None,
        };
        if leaves_case(body) {
            return None;
        }
        out.extend(body.iter().cloned());
    }
    Some(out)
}

struct Unflatten;

impl StmtListPass for Unflatten {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let mut changes = 0;
        let mut i = 0;
        while i < stmts.len() {
            let Some((used, order, steps, counter)) = header(&stmts[i..]) else {
                i += 1;
                continue;
            };
            let Some(lp) = stmts.get(i + used) else {
                break;
            };
            let Some(body) = unflatten(lp, &order, &steps, &counter) else {
                i += 1;
                continue;
            };
            let elsewhere = stmts[i + used + 1..]
                .iter()
                .any(|s| count_references(s, &order) + count_references(s, &counter) > 0);
            if elsewhere {
                i += 1;
                continue;
            }
            let inserted = body.len();
            stmts.splice(i..=i + used, body);
            changes += 1;
            i += inserted;
        }
        changes
    }
}

impl Transform for ControlFlowSwitch {
    fn name(&self) -> &'static str {
        "control_flow_switch"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(process_stmt_lists(module, &mut Unflatten))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_unflattens_while_loop() {
        assert_transform(
            &ControlFlowSwitch,
            r#"
            function f() {
                var o = "1|0|2".split("|"), i = 0;
                while (!![]) {
                    switch (o[i++]) {
                        case "0": b(); continue;
                        case "1": a(); continue;
                        case "2": c(); continue;
                    }
                    break;
                }
            }
            "#,
            "function f() { a(); b(); c(); }",
        );
    }

    #[test]
    fn test_unflattens_for_loop_with_separate_declarations() {
        assert_transform(
            &ControlFlowSwitch,
            r#"
            const o = "2|1|0"["split"]("|");
            let i = 0;
            for (;;) {
                switch (o[i++]) {
                    case "0": return x;
                    case "1": y = 2; continue;
                    case "2": y = 1; continue;
                }
                break;
            }
            "#,
            "y = 1; y = 2; return x;",
        );
    }

    #[test]
    fn test_keeps_loops_with_inner_jumps() {
        assert_unchanged(
            &ControlFlowSwitch,
            r#"
            var o = "0|1".split("|"), i = 0;
            while (true) {
                switch (o[i++]) {
                    case "0": if (a) break; continue;
                    case "1": b(); continue;
                }
                break;
            }
            "#,
        );
    }
}
