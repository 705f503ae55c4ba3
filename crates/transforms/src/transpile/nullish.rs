//! Lowered `?.` and `??`.

use crate::util::{rewrite_exprs, Transform};
use decloak_utils::errors::TransformError;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;

fn is_null(expr: &Expr) -> bool {
    matches!(expr, Expr::Lit(Lit::Null(_)))
}

fn is_undefined(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(i) => &*i.sym == "undefined",
        Expr::Unary(UnaryExpr {
            op: UnaryOp::Void,
            arg,
            ..
        }) => matches!(&**arg, Expr::Lit(Lit::Num(_))),
        _ => false,
    }
}

/// The identifier compared by `x <op> <constant>`, either operand order.
fn compared<'a>(expr: &'a Expr, op: BinaryOp, constant: fn(&Expr) -> bool) -> Option<&'a Ident> {
    let Expr::Bin(bin) = expr else {
        return None;
    };
    if bin.op != op {
        return None;
    }
    match (&*bin.left, &*bin.right) {
        (Expr::Ident(i), other) | (other, Expr::Ident(i)) if constant(other) => Some(i),
        _ => None,
    }
}

/// `a === null || a === void 0` or `a == null`, when `negated` is false;
/// `a !== null && a !== void 0` or `a != null` otherwise.
fn null_check(test: &Expr, negated: bool) -> Option<&Ident> {
    let (loose, strict, join) = if negated {
        (BinaryOp::NotEq, BinaryOp::NotEqEq, BinaryOp::LogicalAnd)
    } else {
        (BinaryOp::EqEq, BinaryOp::EqEqEq, BinaryOp::LogicalOr)
    };
    if let Some(ident) = compared(test, loose, is_null) {
        return Some(ident);
    }
    let Expr::Bin(bin) = test else {
        return None;
    };
    if bin.op != join {
        return None;
    }
    let a = compared(&bin.left, strict, is_null)?;
    let b = compared(&bin.right, strict, is_undefined)?;
    (a.sym == b.sym).then_some(a)
}

/// `a === null || a === void 0 ? void 0 : a.b` → `a?.b`.
pub struct OptionalChaining;

impl Transform for OptionalChaining {
    fn name(&self) -> &'static str {
        "optional_chaining"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Cond(cond) = expr else {
                return None;
            };
            let ident = null_check(&cond.test, false)?;
            if !is_undefined(&cond.cons) {
                return None;
            }
            let Expr::Member(member) = &*cond.alt else {
                return None;
            };
            if !matches!(&*member.obj, Expr::Ident(obj) if obj.sym == ident.sym) {
                return None;
            }
            Some(Expr::OptChain(OptChainExpr {
                span: DUMMY_SP,
                optional: true,
                base: Box::new(OptChainBase::Member(member.clone())),
            }))
        }))
    }
}

/// `a !== null && a !== void 0 ? a : b` → `a ?? b`.
pub struct NullishCoalescing;

impl Transform for NullishCoalescing {
    fn name(&self) -> &'static str {
        "nullish_coalescing"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Cond(cond) = expr else {
                return None;
            };
            let ident = null_check(&cond.test, true)?;
            if !matches!(&*cond.cons, Expr::Ident(cons) if cons.sym == ident.sym) {
                return None;
            }
            Some(Expr::Bin(BinExpr {
                span: DUMMY_SP,
                op: BinaryOp::NullishCoalescing,
                left: cond.cons.clone(),
                right: cond.alt.clone(),
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_optional_chaining() {
        assert_transform(
            &OptionalChaining,
            "x = a === null || a === void 0 ? void 0 : a.b;",
            "x = a?.b;",
        );
        assert_transform(&OptionalChaining, "x = a == null ? undefined : a[k];", "x = a?.[k];");
        assert_unchanged(&OptionalChaining, "x = a === null || b === void 0 ? void 0 : a.b;");
    }

    #[test]
    fn test_nullish_coalescing() {
        assert_transform(
            &NullishCoalescing,
            "x = a !== null && a !== void 0 ? a : b;",
            "x = a ?? b;",
        );
        assert_transform(&NullishCoalescing, "x = null != a ? a : 1;", "x = a ?? 1;");
        assert_unchanged(&NullishCoalescing, "x = a !== null && a !== void 0 ? c : b;");
    }
}
