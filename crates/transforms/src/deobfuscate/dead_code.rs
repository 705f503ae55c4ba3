use crate::util::{rewrite_exprs, split_stmts, take_expr, take_stmt, Transform};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;

/// Removes branches guarded by comparisons of two literals, e.g.
/// `if ("abc" === "abc") { a(); } else { b(); }` → `a();`.
pub struct DeadCode;

fn literal_comparison(expr: &Expr) -> Option<bool> {
    let Expr::Bin(bin) = expr else {
        return None;
    };
    let expect_equal = match bin.op {
        BinaryOp::EqEqEq | BinaryOp::EqEq => true,
        BinaryOp::NotEqEq | BinaryOp::NotEq => false,
        _ => return None,
    };
    let equal = match (&*bin.left, &*bin.right) {
        (Expr::Lit(Lit::Str(a)), Expr::Lit(Lit::Str(b))) => a.value == b.value,
        (Expr::Lit(Lit::Num(a)), Expr::Lit(Lit::Num(b))) => a.value == b.value,
        _ => return None,
    };
    Some(equal == expect_equal)
}

fn is_lexical(stmt: &Stmt) -> bool {
    match stmt {
        Stmt::Decl(Decl::Var(var)) => var.kind != VarDeclKind::Var,
        Stmt::Decl(_) => true,
        _ => false,
    }
}

/// A branch's statements, keeping the block when it scopes declarations.
fn unwrap_branch(stmt: Stmt) -> Vec<Stmt> {
    match stmt {
        Stmt::Block(block) if !block.stmts.iter().any(is_lexical) => block.stmts,
        other => vec![other],
    }
}

impl Transform for DeadCode {
    fn name(&self) -> &'static str {
        "dead_code"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let mut changes = split_stmts(module, |stmt| {
            let Stmt::If(if_stmt) = stmt else {
                return None;
            };
            let taken = if literal_comparison(&if_stmt.test)? {
                Some(take_stmt(&mut if_stmt.cons))
            } else {
                if_stmt.alt.as_deref_mut().map(take_stmt)
            };
            Some(taken.map(unwrap_branch).unwrap_or_default())
        });
        changes += rewrite_exprs(module, |expr| {
            let Expr::Cond(cond) = expr else {
                return None;
            };
            Some(if literal_comparison(&cond.test)? {
                take_expr(&mut cond.cons)
            } else {
                take_expr(&mut cond.alt)
            })
        });
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_removes_dead_branches() {
        assert_transform(
            &DeadCode,
            r#"if ("abc" === "abc") { a(); } else { b(); }"#,
            "a();",
        );
        assert_transform(&DeadCode, r#"if ("abc" !== "abc") { a(); } else { b(); }"#, "b();");
        assert_transform(&DeadCode, r#"if ("x" === "y") { a(); } c();"#, "c();");
        assert_transform(&DeadCode, "x = 1 === 2 ? a : b;", "x = b;");
    }

    #[test]
    fn test_keeps_scoped_declarations() {
        assert_transform(
            &DeadCode,
            r#"if ("a" == "a") { let x = 1; f(x); }"#,
            "{ let x = 1; f(x); }",
        );
    }

    #[test]
    fn test_ignores_dynamic_tests() {
        assert_unchanged(&DeadCode, r#"if (a === "abc") { b(); }"#);
        assert_unchanged(&DeadCode, r#"x = 1 === "1" ? a : b;"#);
    }
}
