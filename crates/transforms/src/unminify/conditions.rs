//! Conditional and loop shapes minifiers prefer over statements.

use crate::util::{rewrite_exprs, rewrite_stmts, take_expr, take_stmt, Transform};
use decloak_core::ast::{block, bool_lit, expr_stmt, is_literal, unary};
use decloak_utils::errors::TransformError;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// `"a" === x` → `x === "a"`, `0 < x` → `x > 0`.
pub struct Yoda;

fn is_constant(expr: &Expr) -> bool {
    is_literal(expr)
        || matches!(expr, Expr::Ident(i) if matches!(&*i.sym, "undefined" | "NaN" | "Infinity"))
}

fn flipped(op: BinaryOp) -> Option<BinaryOp> {
    Some(match op {
        BinaryOp::EqEq | BinaryOp::EqEqEq | BinaryOp::NotEq | BinaryOp::NotEqEq => op,
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::LtEq => BinaryOp::GtEq,
        BinaryOp::GtEq => BinaryOp::LtEq,
        _ => return None,
    })
}

impl Transform for Yoda {
    fn name(&self) -> &'static str {
        "yoda"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            if !is_constant(&bin.left) || is_constant(&bin.right) {
                return None;
            }
            Some(Expr::Bin(BinExpr {
                span: bin.span,
                op: flipped(bin.op)?,
                left: bin.right.clone(),
                right: bin.left.clone(),
            }))
        }))
    }
}

/// Negates a condition, unwrapping an existing `!`.
fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang,
            arg,
            ..
        }) => *arg,
        other => unary(UnaryOp::Bang, other),
    }
}

fn if_stmt(test: Expr, cons: Expr, alt: Option<Expr>) -> Stmt {
    Stmt::If(IfStmt {
        span: DUMMY_SP,
        test: Box::new(test),
        cons: Box::new(Stmt::Block(block(vec![expr_stmt(cons)]))),
        alt: alt.map(|alt| Box::new(Stmt::Block(block(vec![expr_stmt(alt)])))),
    })
}

/// `a && b();` → `if (a) { b(); }` and `a || b();` → `if (!a) { b(); }`.
pub struct LogicalToIf;

impl Transform for LogicalToIf {
    fn name(&self) -> &'static str {
        "logical_to_if"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_stmts(module, |stmt| {
            let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
                return None;
            };
            let Expr::Bin(bin) = &mut **expr else {
                return None;
            };
            let test = match bin.op {
                BinaryOp::LogicalAnd => take_expr(&mut bin.left),
                BinaryOp::LogicalOr => negate(take_expr(&mut bin.left)),
                _ => return None,
            };
            Some(if_stmt(test, take_expr(&mut bin.right), None))
        }))
    }
}

/// `a ? b() : c();` → `if (a) { b(); } else { c(); }`.
pub struct TernaryToIf;

impl Transform for TernaryToIf {
    fn name(&self) -> &'static str {
        "ternary_to_if"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_stmts(module, |stmt| {
            let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
                return None;
            };
            let Expr::Cond(cond) = &mut **expr else {
                return None;
            };
            Some(if_stmt(
                take_expr(&mut cond.test),
                take_expr(&mut cond.cons),
                Some(take_expr(&mut cond.alt)),
            ))
        }))
    }
}

/// `else { if (b) {} }` → `else if (b) {}`.
pub struct MergeElseIf;

impl Transform for MergeElseIf {
    fn name(&self) -> &'static str {
        "merge_else_if"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_stmts(module, |stmt| {
            let Stmt::If(if_stmt) = stmt else {
                return None;
            };
            let alt = if_stmt.alt.as_mut()?;
            let Stmt::Block(inner) = &mut **alt else {
                return None;
            };
            if !matches!(inner.stmts.as_slice(), [Stmt::If(_)]) {
                return None;
            }
            let nested = inner.stmts.pop()?;
            **alt = nested;
            Some(take_stmt(stmt))
        }))
    }
}

/// Drops `!!` where only truthiness matters: conditions of `if`, loops and
/// `?:`, and operands of `!`.
pub struct RemoveDoubleNot;

#[derive(Default)]
struct DoubleNot {
    changes: usize,
}

impl DoubleNot {
    fn strip(&mut self, expr: &mut Expr) {
        while let Expr::Unary(UnaryExpr {
            op: UnaryOp::Bang,
            arg,
            ..
        }) = expr
        {
            let Expr::Unary(UnaryExpr {
                op: UnaryOp::Bang,
                arg: inner,
                ..
            }) = &mut **arg
            else {
                return;
            };
            *expr = take_expr(inner);
            self.changes += 1;
        }
    }
}

impl VisitMut for DoubleNot {
    fn visit_mut_if_stmt(&mut self, stmt: &mut IfStmt) {
        stmt.visit_mut_children_with(self);
        self.strip(&mut stmt.test);
    }

    fn visit_mut_while_stmt(&mut self, stmt: &mut WhileStmt) {
        stmt.visit_mut_children_with(self);
        self.strip(&mut stmt.test);
    }

    fn visit_mut_do_while_stmt(&mut self, stmt: &mut DoWhileStmt) {
        stmt.visit_mut_children_with(self);
        self.strip(&mut stmt.test);
    }

    fn visit_mut_for_stmt(&mut self, stmt: &mut ForStmt) {
        stmt.visit_mut_children_with(self);
        if let Some(test) = &mut stmt.test {
            self.strip(test);
        }
    }

    fn visit_mut_cond_expr(&mut self, expr: &mut CondExpr) {
        expr.visit_mut_children_with(self);
        self.strip(&mut expr.test);
    }

    fn visit_mut_unary_expr(&mut self, expr: &mut UnaryExpr) {
        expr.visit_mut_children_with(self);
        if expr.op == UnaryOp::Bang {
            self.strip(&mut expr.arg);
        }
    }
}

impl Transform for RemoveDoubleNot {
    fn name(&self) -> &'static str {
        "remove_double_not"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let mut visitor = DoubleNot::default();
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

/// `for (;;)` → `while (true)`, `for (; a;)` → `while (a)`.
pub struct ForToWhile;

impl Transform for ForToWhile {
    fn name(&self) -> &'static str {
        "for_to_while"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_stmts(module, |stmt| {
            let Stmt::For(for_stmt) = stmt else {
                return None;
            };
            if for_stmt.init.is_some() || for_stmt.update.is_some() {
                return None;
            }
            let test = for_stmt.test.take().map_or_else(|| bool_lit(true), |t| *t);
            Some(Stmt::While(WhileStmt {
                span: for_stmt.span,
                test: Box::new(test),
                body: Box::new(take_stmt(&mut for_stmt.body)),
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_yoda() {
        assert_transform(&Yoda, r#"if ("a" === x) {} b = 0 < y; c = undefined == z;"#, r#"if (x === "a") {} b = y > 0; c = z == undefined;"#);
        assert_unchanged(&Yoda, "a = 1 === 2; b = 1 + x;");
    }

    #[test]
    fn test_logical_to_if() {
        assert_transform(&LogicalToIf, "a && b();", "if (a) { b(); }");
        assert_transform(&LogicalToIf, "a || b();", "if (!a) { b(); }");
        assert_transform(&LogicalToIf, "!a || b();", "if (a) { b(); }");
        assert_unchanged(&LogicalToIf, "x = a && b();");
    }

    #[test]
    fn test_ternary_to_if() {
        assert_transform(&TernaryToIf, "a ? b() : c();", "if (a) { b(); } else { c(); }");
        assert_unchanged(&TernaryToIf, "x = a ? b : c;");
    }

    #[test]
    fn test_merge_else_if() {
        assert_transform(
            &MergeElseIf,
            "if (a) { x(); } else { if (b) { y(); } else { z(); } }",
            "if (a) { x(); } else if (b) { y(); } else { z(); }",
        );
        assert_unchanged(&MergeElseIf, "if (a) {} else { if (b) {} c(); }");
    }

    #[test]
    fn test_remove_double_not() {
        assert_transform(
            &RemoveDoubleNot,
            "if (!!a) {} while (!!b) {} x = !!c ? 1 : 2; y = !!!d; z = !!e;",
            "if (a) {} while (b) {} x = c ? 1 : 2; y = !d; z = !!e;",
        );
    }

    #[test]
    fn test_for_to_while() {
        assert_transform(&ForToWhile, "for (;;) { a(); }", "while (true) { a(); }");
        assert_transform(&ForToWhile, "for (; a < b;) {}", "while (a < b) {}");
        assert_unchanged(&ForToWhile, "for (i = 0;;) {}");
    }
}
