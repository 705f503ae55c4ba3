use crate::util::{is_pure_operand, rewrite_exprs, Transform};
use decloak_utils::errors::TransformError;
use swc_core::common::{EqIgnoreSpan, DUMMY_SP};
use swc_core::ecma::ast::*;

/// `a || (a = b)` → `a ||= b`, likewise for `&&` and `??`.
///
/// Member targets are accepted when their object is side-effect free.
pub struct LogicalAssignments;

fn same_target(expr: &Expr, target: &AssignTarget) -> bool {
    match (expr, target) {
        (Expr::Ident(ident), AssignTarget::Simple(SimpleAssignTarget::Ident(binding))) => {
            ident.sym == binding.id.sym
        }
        (Expr::Member(member), AssignTarget::Simple(SimpleAssignTarget::Member(target))) => {
            is_pure_operand(&member.obj) && member.eq_ignore_span(target)
        }
        _ => false,
    }
}

impl Transform for LogicalAssignments {
    fn name(&self) -> &'static str {
        "logical_assignments"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            let op = match bin.op {
                BinaryOp::LogicalOr => AssignOp::OrAssign,
                BinaryOp::LogicalAnd => AssignOp::AndAssign,
                BinaryOp::NullishCoalescing => AssignOp::NullishAssign,
                _ => return None,
            };
            let Expr::Assign(assign) = &*bin.right else {
                return None;
            };
            if assign.op != AssignOp::Assign || !same_target(&bin.left, &assign.left) {
                return None;
            }
            Some(Expr::Assign(AssignExpr {
                span: DUMMY_SP,
                op,
                left: assign.left.clone(),
                right: assign.right.clone(),
            }))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_logical_assignments() {
        assert_transform(&LogicalAssignments, "a || (a = b);", "a ||= b;");
        assert_transform(&LogicalAssignments, "a.x && (a.x = 1);", "a.x &&= 1;");
        assert_transform(&LogicalAssignments, "a ?? (a = []);", "a ??= [];");
    }

    #[test]
    fn test_requires_same_target() {
        assert_unchanged(&LogicalAssignments, "a || (b = 1);");
        assert_unchanged(&LogicalAssignments, "f().x || (f().x = 1);");
    }
}
