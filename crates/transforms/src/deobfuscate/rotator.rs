use super::string_array::StringArray;
use decloak_core::ast::{iife_function, is_ident};
use decloak_core::matchers::{any, call, member};
use swc_core::ecma::ast::*;

/// Position of the IIFE that rotates the string array in place with
/// `push(shift())` until a checksum over decoded strings matches.
pub(crate) fn find(module: &Module, array: &StringArray) -> Option<usize> {
    let push = call(member(any(), "push"), None);
    let shift = call(member(any(), "shift"), None);
    module.body.iter().enumerate().find_map(|(index, item)| {
        let ModuleItem::Stmt(Stmt::Expr(ExprStmt { expr, .. })) = item else {
            return None;
        };
        let (iife, _) = iife_function(expr)?;
        let passes_array = iife
            .args
            .iter()
            .any(|arg| arg.spread.is_none() && is_ident(&arg.expr, &array.name));
        (passes_array && push.find_in(&**expr) && shift.find_in(&**expr)).then_some(index)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deobfuscate::string_array;
    use decloak_core::parse;

    #[test]
    fn test_finds_rotator() {
        let module = parse(
            r#"
            var _0xa = ["b", "a"];
            (function (arr, n) {
                while (--n) arr["push"](arr["shift"]());
            })(_0xa, 0x1);
            "#,
        )
        .unwrap()
        .module;
        let array = string_array::find(&module).unwrap();
        assert_eq!(find(&module, &array), Some(1));
    }

    #[test]
    fn test_requires_array_argument() {
        let module = parse(
            r#"
            var _0xa = ["b", "a"];
            (function (arr) { arr.push(arr.shift()); })(other);
            "#,
        )
        .unwrap()
        .module;
        let array = string_array::find(&module).unwrap();
        assert_eq!(find(&module, &array), None);
    }
}
