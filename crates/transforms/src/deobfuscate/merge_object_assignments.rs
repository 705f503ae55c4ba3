use crate::util::{process_stmt_lists, StmtListPass, Transform};
use decloak_analysis::bindings::count_references;
use decloak_core::ast::{is_identifier_name, member_prop_name, pat_ident_name};
use decloak_utils::errors::TransformError;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;

/// `const o = {}; o.a = 1; o["b-c"] = 2;` → `const o = { a: 1, "b-c": 2 };`
///
/// Assignments are merged while they directly follow the declaration and
/// their values cannot observe the object. Calls, member reads and other
/// expressions with side effects stop the merge, since they could read the
/// binding before its initializer has run.
pub struct MergeObjectAssignments;

/// Values whose evaluation runs no user code: literals, other bindings,
/// functions (their bodies run later) and literals built from those.
fn is_safe_value(expr: &Expr, name: &str) -> bool {
    match expr {
        Expr::Lit(_) | Expr::Fn(_) | Expr::Arrow(_) => true,
        Expr::Ident(ident) => *ident.sym != *name,
        Expr::Tpl(tpl) => tpl.exprs.is_empty(),
        Expr::Unary(unary) => {
            !matches!(unary.op, UnaryOp::Delete) && is_safe_value(&unary.arg, name)
        }
        Expr::Array(array) => array.elems.iter().flatten().all(|elem| {
            elem.spread.is_none() && is_safe_value(&elem.expr, name)
        }),
        Expr::Object(object) => object.props.iter().all(|prop| match prop {
            PropOrSpread::Prop(prop) => match &**prop {
                Prop::KeyValue(kv) => {
                    !matches!(kv.key, PropName::Computed(_)) && is_safe_value(&kv.value, name)
                }
                Prop::Shorthand(ident) => *ident.sym != *name,
                _ => false,
            },
            PropOrSpread::Spread(_) => false,
        }),
        _ => false,
    }
}

/// `name.key = value`
fn property_assignment<'a>(stmt: &'a Stmt, name: &str) -> Option<(String, &'a Expr)> {
    let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
        return None;
    };
    let Expr::Assign(assign) = &**expr else {
        return None;
    };
    if assign.op != AssignOp::Assign {
        return None;
    }
    let AssignTarget::Simple(SimpleAssignTarget::Member(member)) = &assign.left else {
        return None;
    };
    if !matches!(&*member.obj, Expr::Ident(i) if *i.sym == *name)
        || count_references(&*assign.right, name) > 0
        || !is_safe_value(&assign.right, name)
    {
        return None;
    }
    let prop = member_prop_name(&member.prop)?;
    (prop != "__proto__").then_some((prop, &*assign.right))
}

fn key(name: String) -> PropName {
    if is_identifier_name(&name) {
        PropName::Ident(IdentName {
            span: DUMMY_SP,
            sym: name.into(),
        })
    } else {
        PropName::Str(Str {
            span: DUMMY_SP,
            value: name.into(),
            raw: None,
        })
    }
}

/// The object literal initialising a single declarator.
fn object_decl(stmt: &mut Stmt) -> Option<(String, &mut ObjectLit)> {
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };
    let [decl] = var.decls.as_mut_slice() else {
        return None;
    };
    let name = pat_ident_name(&decl.name)?.to_string();
    match decl.init.as_deref_mut() {
        Some(Expr::Object(object)) => Some((name, object)),
        _ => None,
    }
}

struct Merger;

impl StmtListPass for Merger {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let mut changes = 0;
        let mut i = 0;
        while i < stmts.len() {
            let (head, tail) = stmts.split_at_mut(i + 1);
            let Some((name, object)) = object_decl(&mut head[i]) else {
                i += 1;
                continue;
            };
            let mut merged = 0;
            for stmt in tail.iter() {
                let Some((prop, value)) = property_assignment(stmt, &name) else {
                    break;
                };
                object
                    .props
                    .push(PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
                        key: key(prop),
                        value: Box::new(value.clone()),
                    }))));
                merged += 1;
            }
            stmts.drain(i + 1..i + 1 + merged);
            changes += merged;
            i += 1;
        }
        changes
    }
}

impl Transform for MergeObjectAssignments {
    fn name(&self) -> &'static str {
        "merge_object_assignments"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(process_stmt_lists(module, &mut Merger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_merges_assignments() {
        assert_transform(
            &MergeObjectAssignments,
            r#"const o = { x: 0 }; o.a = 1; o["b-c"] = function () { return 2; }; o.d = [!0, b]; g(o);"#,
            r#"const o = { x: 0, a: 1, "b-c": function () { return 2; }, d: [!0, b] }; g(o);"#,
        );
    }

    #[test]
    fn test_stops_at_self_references() {
        assert_transform(
            &MergeObjectAssignments,
            "var o = {}; o.a = 1; o.b = o.a; o.c = 2;",
            "var o = { a: 1 }; o.b = o.a; o.c = 2;",
        );
        assert_unchanged(&MergeObjectAssignments, "var o = {}; f(); o.a = 1;");
    }

    #[test]
    fn test_stops_at_values_that_run_code() {
        assert_transform(
            &MergeObjectAssignments,
            "function f() { return o.x; } const o = {}; o.a = 1; o.b = f(); o.c = 2;",
            "function f() { return o.x; } const o = { a: 1 }; o.b = f(); o.c = 2;",
        );
        assert_unchanged(&MergeObjectAssignments, "let o = {}; o.a = p.q;");
        assert_unchanged(&MergeObjectAssignments, "let o = {}; o.a = { [k]: 1 };");
        assert_unchanged(&MergeObjectAssignments, "var o = {}; o.__proto__ = p;");
    }
}
