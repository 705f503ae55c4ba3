use crate::util::{rewrite_exprs, take_expr, Transform};
use decloak_utils::errors::TransformError;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;

/// `f(a ? b : c)` → `a ? f(b) : f(c)`, through nested conditionals.
///
/// Only plain identifier callees are duplicated. With a callee filter only
/// calls of that function are rewritten.
#[derive(Debug, Clone, Default)]
pub struct ExtractTernaryCalls {
    callee: Option<String>,
}

impl ExtractTernaryCalls {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_callee(callee: impl Into<String>) -> Self {
        Self {
            callee: Some(callee.into()),
        }
    }
}

fn distribute(callee: &Ident, template: &CallExpr, branch: Expr) -> Expr {
    match branch {
        Expr::Cond(cond) => Expr::Cond(CondExpr {
            span: cond.span,
            test: cond.test,
            cons: Box::new(distribute(callee, template, *cond.cons)),
            alt: Box::new(distribute(callee, template, *cond.alt)),
        }),
        other => Expr::Call(CallExpr {
            span: DUMMY_SP,
            args: vec![ExprOrSpread {
                spread: None,
                expr: Box::new(other),
            }],
            callee: Callee::Expr(Box::new(Expr::Ident(callee.clone()))),
            ..template.clone()
        }),
    }
}

impl Transform for ExtractTernaryCalls {
    fn name(&self) -> &'static str {
        "extract_ternary_calls"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Call(call) = expr else {
                return None;
            };
            let Callee::Expr(callee) = &call.callee else {
                return None;
            };
            let Expr::Ident(callee) = &**callee else {
                return None;
            };
            if self.callee.as_deref().is_some_and(|name| name != &*callee.sym) {
                return None;
            }
            let [arg] = call.args.as_mut_slice() else {
                return None;
            };
            if arg.spread.is_some() || !matches!(*arg.expr, Expr::Cond(_)) {
                return None;
            }
            let branch = take_expr(&mut arg.expr);
            let callee = callee.clone();
            Some(distribute(&callee, call, branch))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    const CODE: &str = "__DECODE__(100 < o ? 10753 : 5 < o ? 2382 : 2820); log(p ? 8590 : 5814);";

    #[test]
    fn test_extract_all() {
        assert_transform(
            &ExtractTernaryCalls::new(),
            CODE,
            "100 < o ? __DECODE__(10753) : 5 < o ? __DECODE__(2382) : __DECODE__(2820); p ? log(8590) : log(5814);",
        );
    }

    #[test]
    fn test_extract_with_filter() {
        assert_transform(
            &ExtractTernaryCalls::with_callee("__DECODE__"),
            CODE,
            "100 < o ? __DECODE__(10753) : 5 < o ? __DECODE__(2382) : __DECODE__(2820); log(p ? 8590 : 5814);",
        );
    }

    #[test]
    fn test_ignores_member_callees() {
        assert_unchanged(&ExtractTernaryCalls::new(), "a.b(c ? 1 : 2);");
    }
}
