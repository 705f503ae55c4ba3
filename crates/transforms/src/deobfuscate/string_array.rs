//! The obfuscator's string table.

use crate::util::single_declarator;
use decloak_core::matchers::{any_string, array_of};
use swc_core::ecma::ast::*;

/// A top-level string table, either `var a = ["..", ...]` or the
/// self-replacing function form
/// `function a() { var t = [...]; a = function () { return t; }; return a(); }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StringArray {
    pub(crate) name: String,
    /// Position in the module body.
    pub(crate) index: usize,
    pub(crate) length: usize,
}

fn string_literals(expr: &Expr) -> Option<usize> {
    let Expr::Array(array) = expr else {
        return None;
    };
    (!array.elems.is_empty() && array_of(any_string()).matches(expr)).then_some(array.elems.len())
}

fn reassigns(stmt: &Stmt, name: &str) -> bool {
    let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
        return false;
    };
    let Expr::Assign(assign) = &**expr else {
        return false;
    };
    matches!(
        &assign.left,
        AssignTarget::Simple(SimpleAssignTarget::Ident(b)) if &*b.id.sym == name
    )
}

fn from_stmt(stmt: &Stmt) -> Option<(String, usize)> {
    if let Some((_, ident, Some(init))) = single_declarator(stmt) {
        return Some((ident.sym.to_string(), string_literals(init)?));
    }
    let Stmt::Decl(Decl::Fn(f)) = stmt else {
        return None;
    };
    let name = f.ident.sym.to_string();
    let body = &f.function.body.as_ref()?.stmts;
    let (_, _, Some(init)) = single_declarator(body.first()?)? else {
        return None;
    };
    let length = string_literals(init)?;
    body.iter().any(|s| reassigns(s, &name)).then_some((name, length))
}

pub(crate) fn find(module: &Module) -> Option<StringArray> {
    module.body.iter().enumerate().find_map(|(index, item)| {
        let ModuleItem::Stmt(stmt) = item else {
            return None;
        };
        let (name, length) = from_stmt(stmt)?;
        Some(StringArray {
            name,
            index,
            length,
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::parse;

    #[test]
    fn test_finds_variable_form() {
        let module = parse(r#"foo(); var _0x1 = ["a", "b", "c"];"#).unwrap().module;
        let array = find(&module).unwrap();
        assert_eq!(array.name, "_0x1");
        assert_eq!(array.index, 1);
        assert_eq!(array.length, 3);
    }

    #[test]
    fn test_finds_function_form() {
        let module = parse(
            r#"function _0x2() { var t = ["x", "y"]; _0x2 = function () { return t; }; return _0x2(); }"#,
        )
        .unwrap()
        .module;
        assert_eq!(find(&module).unwrap().name, "_0x2");
    }

    #[test]
    fn test_ignores_mixed_arrays() {
        let module = parse(r#"var a = ["x", 1];"#).unwrap().module;
        assert!(find(&module).is_none());
    }
}
