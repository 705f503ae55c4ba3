use crate::util::{process_stmt_lists, rewrite_exprs, single_declarator, StmtListPass, Transform};
use decloak_analysis::bindings::count_references;
use decloak_core::ast::{is_literal, member_prop_name, pat_ident_name, prop_name_str};
use decloak_utils::errors::TransformError;
use std::collections::HashMap;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

/// Inlines the lookup objects control-flow obfuscation routes strings and
/// operators through:
///
/// ```js
/// const o = { abc: "log", def: function (a, b) { return a + b; } };
/// console[o.abc](o.def(x, 1));   // → console["log"](x + 1)
/// ```
///
/// An object qualifies when every property is a literal or a one-line
/// proxy function using each parameter once, in order, and later code only
/// reads its properties. It is removed once no reads remain.
pub struct ControlFlowObject;

#[derive(Debug, Clone)]
enum Entry {
    Literal(Expr),
    Proxy { params: Vec<String>, body: Expr },
}

#[derive(Default)]
struct BodyIdents {
    names: Vec<String>,
    opaque: bool,
}

impl Visit for BodyIdents {
    fn visit_ident(&mut self, ident: &Ident) {
        self.names.push(ident.sym.to_string());
    }

    fn visit_this_expr(&mut self, _: &ThisExpr) {
        self.opaque = true;
    }

    fn visit_function(&mut self, _: &Function) {
        self.opaque = true;
    }

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {
        self.opaque = true;
    }
}

fn proxy(function: &Function) -> Option<Entry> {
    let params = function
        .params
        .iter()
        .map(|p| pat_ident_name(&p.pat).map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    let [Stmt::Return(ReturnStmt { arg: Some(body), .. })] = function.body.as_ref()?.stmts.as_slice()
    else {
        return None;
    };
    let mut idents = BodyIdents::default();
    body.visit_with(&mut idents);
    if idents.opaque || idents.names != params {
        return None;
    }
    Some(Entry::Proxy {
        params,
        body: (**body).clone(),
    })
}

fn entries(object: &ObjectLit) -> Option<HashMap<String, Entry>> {
    let mut entries = HashMap::new();
    for prop in &object.props {
        let PropOrSpread::Prop(prop) = prop else {
            return None;
        };
        let Prop::KeyValue(kv) = &**prop else {
            return None;
        };
        let key = prop_name_str(&kv.key)?;
        let entry = match &*kv.value {
            value if is_literal(value) => Entry::Literal(value.clone()),
            Expr::Fn(f) => proxy(&f.function)?,
            _ => return None,
        };
        entries.insert(key, entry);
    }
    (!entries.is_empty()).then_some(entries)
}

fn declaration(stmt: &Stmt) -> Option<(String, HashMap<String, Entry>)> {
    let (_, ident, Some(Expr::Object(object))) = single_declarator(stmt)? else {
        return None;
    };
    Some((ident.sym.to_string(), entries(object)?))
}

/// Succeeds when every occurrence of `name` is a static read of a known key.
struct ReadOnly<'a> {
    name: &'a str,
    entries: &'a HashMap<String, Entry>,
    escaped: bool,
}

impl ReadOnly<'_> {
    fn is_object(&self, expr: &Expr) -> bool {
        matches!(expr, Expr::Ident(i) if *i.sym == *self.name)
    }
}

impl Visit for ReadOnly<'_> {
    fn visit_member_expr(&mut self, member: &MemberExpr) {
        if self.is_object(&member.obj) {
            let known = member_prop_name(&member.prop).is_some_and(|k| self.entries.contains_key(&k));
            if !known {
                self.escaped = true;
            }
            return;
        }
        member.visit_children_with(self);
    }

    fn visit_simple_assign_target(&mut self, target: &SimpleAssignTarget) {
        match target {
            SimpleAssignTarget::Member(m) if self.is_object(&m.obj) => self.escaped = true,
            _ => target.visit_children_with(self),
        }
    }

    fn visit_update_expr(&mut self, expr: &UpdateExpr) {
        match &*expr.arg {
            Expr::Member(m) if self.is_object(&m.obj) => self.escaped = true,
            _ => expr.visit_children_with(self),
        }
    }

    fn visit_unary_expr(&mut self, expr: &UnaryExpr) {
        match &*expr.arg {
            Expr::Member(m) if expr.op == UnaryOp::Delete && self.is_object(&m.obj) => {
                self.escaped = true
            }
            _ => expr.visit_children_with(self),
        }
    }

    fn visit_ident(&mut self, ident: &Ident) {
        if *ident.sym == *self.name {
            self.escaped = true;
        }
    }
}

struct Substitute<'a> {
    args: HashMap<&'a str, Expr>,
}

impl VisitMut for Substitute<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if let Expr::Ident(ident) = expr {
            if let Some(arg) = self.args.remove(&*ident.sym) {
                *expr = arg;
            }
            return;
        }
        expr.visit_mut_children_with(self);
    }
}

fn lookup<'a>(expr: &Expr, name: &str, entries: &'a HashMap<String, Entry>) -> Option<&'a Entry> {
    let Expr::Member(member) = expr else {
        return None;
    };
    if !matches!(&*member.obj, Expr::Ident(i) if *i.sym == *name) {
        return None;
    }
    entries.get(&member_prop_name(&member.prop)?)
}

fn inline(stmt: &mut Stmt, name: &str, entries: &HashMap<String, Entry>) -> usize {
    rewrite_exprs(stmt, |expr| match expr {
        Expr::Call(call) => {
            let Callee::Expr(callee) = &call.callee else {
                return None;
            };
            let Entry::Proxy { params, body } = lookup(callee, name, entries)? else {
                return None;
            };
            if call.args.len() != params.len() || call.args.iter().any(|a| a.spread.is_some()) {
                return None;
            }
            let mut substitute = Substitute {
                args: params
                    .iter()
                    .map(String::as_str)
                    .zip(call.args.iter().map(|a| (*a.expr).clone()))
                    .collect(),
            };
            let mut body = body.clone();
            body.visit_mut_with(&mut substitute);
            Some(body)
        }
        _ => match lookup(expr, name, entries)? {
            Entry::Literal(value) => Some(value.clone()),
            Entry::Proxy { .. } => None,
        },
    })
}

struct Inliner;

impl StmtListPass for Inliner {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize {
        let mut changes = 0;
        let mut i = 0;
        while i < stmts.len() {
            let Some((name, entries)) = declaration(&stmts[i]) else {
                i += 1;
                continue;
            };
            let rest = &mut stmts[i + 1..];
            let mut check = ReadOnly {
                name: &name,
                entries: &entries,
                escaped: false,
            };
            for stmt in rest.iter() {
                stmt.visit_with(&mut check);
            }
            if check.escaped {
                i += 1;
                continue;
            }
            changes += rest
                .iter_mut()
                .map(|stmt| inline(stmt, &name, &entries))
                .sum::<usize>();
            if rest.iter().all(|stmt| count_references(stmt, &name) == 0) {
                stmts.remove(i);
                changes += 1;
                continue;
            }
            i += 1;
        }
        changes
    }
}

impl Transform for ControlFlowObject {
    fn name(&self) -> &'static str {
        "control_flow_object"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(process_stmt_lists(module, &mut Inliner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_inlines_strings_and_proxies() {
        assert_transform(
            &ControlFlowObject,
            r#"
            function f(x, g) {
                const o = {
                    "abc": "log",
                    def: function (a, b) { return a + b; },
                    ghi: function (c, d) { return c(d); },
                };
                console[o.abc](o.def(x, 1));
                o["ghi"](g, x);
            }
            "#,
            r#"function f(x, g) { console["log"](x + 1); g(x); }"#,
        );
    }

    #[test]
    fn test_keeps_written_objects() {
        assert_unchanged(&ControlFlowObject, r#"var o = { a: "b" }; o.a = "c"; f(o.a);"#);
        assert_unchanged(&ControlFlowObject, r#"var o = { a: "b" }; f(o);"#);
    }

    #[test]
    fn test_rejects_reordering_proxies() {
        assert_unchanged(
            &ControlFlowObject,
            "var o = { a: function (x, y) { return y(x); } }; o.a(f(), g);",
        );
    }
}
