//! Literal normalisation: escapes, minified constants and constant folding.

use crate::util::{rewrite_exprs, Transform};
use decloak_analysis::declared_names;
use decloak_core::ast::{as_number, binary, bool_lit, ident_expr, num_lit, str_lit, unary};
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// Drops the raw source text of string and number literals whose source form
/// is not the one the emitter would print: `'a'` → `"a"`, `"\x61"` → `"a"`,
/// `0x1` → `1`. Literals already in printed form are left alone.
pub struct RawLiterals;

#[derive(Default)]
struct RawStripper {
    changes: usize,
}

/// Characters the emitter prints as themselves inside a double-quoted string.
fn is_printable(c: char) -> bool {
    c == ' '
        || !(c.is_control()
            || c.is_whitespace()
            || matches!(c, '"' | '\'' | '\\' | '\u{feff}'))
}

/// Whether a string literal's raw text differs from its printed form: single
/// quotes the emitter would swap, or escapes of printable characters.
fn is_non_canonical_str(raw: &str) -> bool {
    let Some(quote) = raw.chars().next() else {
        return false;
    };
    let body = &raw[quote.len_utf8()..raw.len().saturating_sub(1).max(quote.len_utf8())];
    if quote == '\'' && !body.contains('"') {
        return true;
    }

    let mut chars = body.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            continue;
        }
        let escaped = match chars.next() {
            Some('x') => {
                let hex: String = chars.by_ref().take(2).collect();
                u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
            }
            Some('u') if chars.peek() == Some(&'{') => {
                chars.next();
                let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
            }
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32)
            }
            Some(d @ '0'..='7') => {
                let mut digits = String::from(d);
                while digits.len() < 3 && chars.peek().is_some_and(|c| ('0'..='7').contains(c)) {
                    digits.extend(chars.next());
                }
                u32::from_str_radix(&digits, 8).ok().and_then(char::from_u32)
            }
            _ => None,
        };
        if escaped.is_some_and(is_printable) {
            return true;
        }
    }
    false
}

/// Hex, octal, binary, separated and legacy octal forms print as decimal.
fn is_non_canonical_number(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    lower.starts_with("0x")
        || lower.starts_with("0o")
        || lower.starts_with("0b")
        || raw.contains('_')
        || (raw.len() > 1 && raw.starts_with('0') && raw.bytes().all(|b| b.is_ascii_digit()))
}

impl VisitMut for RawStripper {
    fn visit_mut_str(&mut self, s: &mut Str) {
        if s.raw.as_deref().is_some_and(is_non_canonical_str) {
            s.raw = None;
            self.changes += 1;
        }
    }

    // JSX attribute strings have no escapes; their raw text is the value.
    fn visit_mut_jsx_attr_value(&mut self, value: &mut JSXAttrValue) {
        if !matches!(value, JSXAttrValue::Lit(_)) {
            value.visit_mut_children_with(self);
        }
    }

    fn visit_mut_number(&mut self, n: &mut Number) {
        if n.raw.as_deref().is_some_and(is_non_canonical_number) {
            n.raw = None;
            self.changes += 1;
        }
    }
}

impl Transform for RawLiterals {
    fn name(&self) -> &'static str {
        "raw_literals"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let mut visitor = RawStripper::default();
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

/// `!0` → `true`, `!1` → `false`.
pub struct UnminifyBooleans;

impl Transform for UnminifyBooleans {
    fn name(&self) -> &'static str {
        "unminify_booleans"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| match expr {
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Bang,
                arg,
                ..
            }) => match &**arg {
                Expr::Lit(Lit::Num(n)) if n.value == 0.0 => Some(bool_lit(true)),
                Expr::Lit(Lit::Num(n)) if n.value == 1.0 => Some(bool_lit(false)),
                _ => None,
            },
            _ => None,
        }))
    }
}

/// `void 0` → `undefined`, unless the program declares its own `undefined`.
pub struct VoidToUndefined;

impl Transform for VoidToUndefined {
    fn name(&self) -> &'static str {
        "void_to_undefined"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        if declared_names(module).contains("undefined") {
            return Ok(0);
        }
        Ok(rewrite_exprs(module, |expr| match expr {
            Expr::Unary(UnaryExpr {
                op: UnaryOp::Void,
                arg,
                ..
            }) if matches!(&**arg, Expr::Lit(Lit::Num(_))) => Some(ident_expr("undefined")),
            _ => None,
        }))
    }
}

/// `1 / 0` → `Infinity`, `-1 / 0` → `-Infinity`.
pub struct Infinity;

impl Transform for Infinity {
    fn name(&self) -> &'static str {
        "infinity"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        if declared_names(module).contains("Infinity") {
            return Ok(0);
        }
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            if bin.op != BinaryOp::Div || as_number(&bin.right) != Some(0.0) {
                return None;
            }
            match as_number(&bin.left)? {
                v if v == 1.0 => Some(ident_expr("Infinity")),
                v if v == -1.0 => Some(unary(UnaryOp::Minus, ident_expr("Infinity"))),
                _ => None,
            }
        }))
    }
}

/// Folds arithmetic on number literals when the result is a finite integer:
/// `-0x1a3 + 0x2b * 10` → `11`.
pub struct NumberExpressions;

fn fold(op: BinaryOp, l: f64, r: f64) -> Option<f64> {
    let value = match op {
        BinaryOp::Add => l + r,
        BinaryOp::Sub => l - r,
        BinaryOp::Mul => l * r,
        BinaryOp::Div => l / r,
        BinaryOp::Mod => l % r,
        BinaryOp::Exp => l.powf(r),
        _ => return None,
    };
    (value.is_finite() && value.fract() == 0.0 && !(value == 0.0 && value.is_sign_negative()))
        .then_some(value)
}

impl Transform for NumberExpressions {
    fn name(&self) -> &'static str {
        "number_expressions"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            let value = fold(bin.op, as_number(&bin.left)?, as_number(&bin.right)?)?;
            Some(num_lit(value))
        }))
    }
}

/// `"a" + "b"` → `"ab"`, also at the end of a concatenation chain.
pub struct MergeStrings;

fn str_value(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Lit(Lit::Str(s)) => Some(&*s.value),
        _ => None,
    }
}

impl Transform for MergeStrings {
    fn name(&self) -> &'static str {
        "merge_strings"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            if bin.op != BinaryOp::Add {
                return None;
            }
            let right = str_value(&bin.right)?;
            if let Some(left) = str_value(&bin.left) {
                return Some(str_lit(&format!("{left}{right}")));
            }
            // (x + "a") + "b" → x + "ab"
            let Expr::Bin(inner) = &*bin.left else {
                return None;
            };
            if inner.op != BinaryOp::Add {
                return None;
            }
            let middle = str_value(&inner.right)?;
            Some(binary(
                BinaryOp::Add,
                (*inner.left).clone(),
                str_lit(&format!("{middle}{right}")),
            ))
        }))
    }
}

/// `typeof x > "u"` → `typeof x === "undefined"` and `typeof x < "u"` →
/// `typeof x !== "undefined"`.
pub struct TypeofUndefined;

impl Transform for TypeofUndefined {
    fn name(&self) -> &'static str {
        "typeof_undefined"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Bin(bin) = expr else {
                return None;
            };
            let op = match bin.op {
                BinaryOp::Gt => BinaryOp::EqEqEq,
                BinaryOp::Lt => BinaryOp::NotEqEq,
                _ => return None,
            };
            let is_typeof = matches!(
                &*bin.left,
                Expr::Unary(UnaryExpr { op: UnaryOp::TypeOf, .. })
            );
            if !is_typeof || str_value(&bin.right) != Some("u") {
                return None;
            }
            Some(binary(op, (*bin.left).clone(), str_lit("undefined")))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_raw_literals() {
        assert_transform(&RawLiterals, r#"const a = "\x61";"#, r#"const a = "a";"#);
        assert_transform(&RawLiterals, "const a = 0x1;", "const a = 1;");
        assert_transform(&RawLiterals, "const a = 'b';", r#"const a = "b";"#);
        assert_transform(&RawLiterals, r#"const a = "\u{62}\x63";"#, r#"const a = "bc";"#);
    }

    #[test]
    fn test_raw_literals_keep_printed_forms() {
        assert_unchanged(&RawLiterals, r#"const a = "\x00\u2028";"#);
        assert_unchanged(&RawLiterals, r#"const a = "b", c = 1.5, d = 0, e = "\n\"", f = '"';"#);
        assert_unchanged(&RawLiterals, r#"const a = "\x00 ";"#);
        assert_unchanged(&RawLiterals, r#"x = <a title='\x61' />;"#);
    }

    #[test]
    fn test_booleans_and_void() {
        assert_transform(&UnminifyBooleans, "a = !0; b = !1; c = !2;", "a = true; b = false; c = !2;");
        assert_transform(&VoidToUndefined, "a = void 0;", "a = undefined;");
        assert_unchanged(&VoidToUndefined, "var undefined = 1; a = void 0;");
    }

    #[test]
    fn test_infinity() {
        assert_transform(&Infinity, "a = 1 / 0; b = -1 / 0;", "a = Infinity; b = -Infinity;");
        assert_unchanged(&Infinity, "a = 2 / 0;");
    }

    #[test]
    fn test_number_expressions() {
        assert_transform(&NumberExpressions, "a = -0x1a3 + 0x2b * 10;", "a = 11;");
        assert_transform(&NumberExpressions, "a = 3 - 10;", "a = -7;");
        assert_unchanged(&NumberExpressions, "a = 1 / 3;");
        assert_unchanged(&NumberExpressions, "a = 1 + b;");
    }

    #[test]
    fn test_merge_strings() {
        assert_transform(&MergeStrings, r#"a = "a" + "b" + "c";"#, r#"a = "abc";"#);
        assert_transform(&MergeStrings, r#"a = x + "b" + "c";"#, r#"a = x + "bc";"#);
        assert_unchanged(&MergeStrings, r#"a = "a" + x;"#);
    }

    #[test]
    fn test_typeof_undefined() {
        assert_transform(
            &TypeofUndefined,
            r#"a = typeof x > "u"; b = typeof y < "u";"#,
            r#"a = typeof x === "undefined"; b = typeof y !== "undefined";"#,
        );
    }
}
