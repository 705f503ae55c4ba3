use crate::util::{split_stmts, Transform};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;

/// `const a = 1, b = 2;` → one declaration per binding.
///
/// Loop heads keep their declarator lists.
pub struct SplitVariableDeclarations;

fn split(stmt: &mut Stmt) -> Option<Vec<Stmt>> {
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };
    if var.decls.len() < 2 {
        return None;
    }
    let (span, ctxt, kind, declare) = (var.span, var.ctxt, var.kind, var.declare);
    let decls = std::mem::take(&mut var.decls);
    Some(
        decls
            .into_iter()
            .map(|decl| {
                Stmt::Decl(Decl::Var(Box::new(VarDecl {
                    span,
                    ctxt,
                    kind,
                    declare,
                    decls: vec![decl],
                })))
            })
            .collect(),
    )
}

impl Transform for SplitVariableDeclarations {
    fn name(&self) -> &'static str {
        "split_variable_declarations"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(split_stmts(module, split))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::assert_transform;

    #[test]
    fn test_split_variable_declaration() {
        assert_transform(
            &SplitVariableDeclarations,
            "const a = 1, b = 2, c = 3;",
            "const a = 1; const b = 2; const c = 3;",
        );
    }

    #[test]
    fn test_dont_split_in_for_loop() {
        assert_transform(
            &SplitVariableDeclarations,
            "for (let i = 0, j = 1; i < 10; i++, j++) var a, b;",
            "for (let i = 0, j = 1; i < 10; i++, j++) { var a; var b; }",
        );
    }
}
