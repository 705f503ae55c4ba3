use crate::util::{rewrite_stmts, single_declarator, Transform};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;

/// `var a = function a() {}` → `function a() {}`.
pub struct VarFunctions;

impl Transform for VarFunctions {
    fn name(&self) -> &'static str {
        "var_functions"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_stmts(module, |stmt| {
            let (var, binding, Some(Expr::Fn(f))) = single_declarator(stmt)? else {
                return None;
            };
            if var.kind != VarDeclKind::Var {
                return None;
            }
            let name = f.ident.as_ref()?;
            if name.sym != binding.sym {
                return None;
            }
            Some(Stmt::Decl(Decl::Fn(FnDecl {
                ident: name.clone(),
                declare: false,
                function: f.function.clone(),
            })))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_var_functions() {
        assert_transform(
            &VarFunctions,
            "var a = function a(b) { return b; };",
            "function a(b) { return b; }",
        );
    }

    #[test]
    fn test_requires_matching_name() {
        assert_unchanged(&VarFunctions, "var a = function b() {};");
        assert_unchanged(&VarFunctions, "let a = function a() {};");
        assert_unchanged(&VarFunctions, "var a = function () {};");
    }
}
