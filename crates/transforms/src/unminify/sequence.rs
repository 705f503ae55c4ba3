use crate::util::{split_stmts, take_stmt, Transform};
use decloak_core::ast::expr_stmt;
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;

/// Turns comma expressions into statements.
///
/// `a(), b();` becomes two statements, and the leading parts of a sequence
/// in a `return`, `if`, `throw`, `switch`, `for-in`/`for-of` head, `for`
/// initializer or variable initializer are moved in front of the statement.
pub struct Sequence;

/// `a, b, c` → statements `a; b;`, leaving `c` in place.
fn unsequence(expr: &mut Box<Expr>) -> Option<Vec<Stmt>> {
    let Expr::Seq(seq) = &mut **expr else {
        return None;
    };
    let last = seq.exprs.pop()?;
    let leading = seq.exprs.drain(..).map(|e| expr_stmt(*e)).collect();
    *expr = last;
    Some(leading)
}

fn split(stmt: &mut Stmt) -> Option<Vec<Stmt>> {
    if let Stmt::Expr(ExprStmt { expr, .. }) = stmt {
        let Expr::Seq(seq) = &mut **expr else {
            return None;
        };
        return Some(seq.exprs.drain(..).map(|e| expr_stmt(*e)).collect());
    }

    let mut leading = match stmt {
        Stmt::Return(ReturnStmt { arg: Some(arg), .. }) => unsequence(arg)?,
        Stmt::If(s) => unsequence(&mut s.test)?,
        Stmt::Throw(s) => unsequence(&mut s.arg)?,
        Stmt::Switch(s) => unsequence(&mut s.discriminant)?,
        Stmt::ForIn(s) => unsequence(&mut s.right)?,
        Stmt::ForOf(s) => unsequence(&mut s.right)?,
        Stmt::For(s) => {
            let Some(VarDeclOrExpr::Expr(init)) = &mut s.init else {
                return None;
            };
            let Expr::Seq(seq) = &mut **init else {
                return None;
            };
            let moved = seq.exprs.drain(..).map(|e| expr_stmt(*e)).collect();
            s.init = None;
            moved
        }
        Stmt::Decl(Decl::Var(var)) if var.decls.len() == 1 => {
            unsequence(var.decls[0].init.as_mut()?)?
        }
        _ => return None,
    };
    leading.push(take_stmt(stmt));
    Some(leading)
}

impl Transform for Sequence {
    fn name(&self) -> &'static str {
        "sequence"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(split_stmts(module, split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_to_statements() {
        assert_transform(&Sequence, "if (a) b(), c();", "if (a) { b(); c(); }");
        assert_transform(&Sequence, "a(), b(), c();", "a(); b(); c();");
    }

    #[test]
    fn test_rearrange_from_return() {
        assert_transform(
            &Sequence,
            "function f() { return a(), b(), c(); }",
            "function f() { a(); b(); return c(); }",
        );
    }

    #[test]
    fn test_rearrange_from_if() {
        assert_transform(
            &Sequence,
            "function f() { if (a(), b()) c(); }",
            "function f() { a(); if (b()) c(); }",
        );
    }

    #[test]
    fn test_rearrange_from_for_in() {
        assert_transform(
            &Sequence,
            "for (let key in a = 1, object) {}",
            "a = 1; for (let key in object) {}",
        );
    }

    #[test]
    fn test_rearrange_from_for_init_and_declaration() {
        assert_transform(&Sequence, "for (a(), b(); c;) {}", "a(); b(); for (; c;) {}");
        assert_transform(&Sequence, "var x = (a(), b);", "a(); var x = b;");
    }

    #[test]
    fn test_keeps_loop_updates() {
        assert_unchanged(&Sequence, "for (i = 0; i < n; i++, j++) {}");
        assert_unchanged(&Sequence, "while (a(), b) {}");
    }
}
