use crate::util::{rewrite_exprs, Transform};
use decloak_core::ast::{callee_expr, is_member_named, str_lit};
use decloak_utils::errors::TransformError;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;

/// `"a".concat(b, "c")` → `` `a${b}c` ``, the lowered form of a template
/// literal.
pub struct TemplateLiterals;

/// Alternating text and expressions; always starts and ends with text.
struct Segments {
    quasis: Vec<String>,
    exprs: Vec<Box<Expr>>,
}

impl Segments {
    fn from_base(expr: &Expr) -> Option<Self> {
        match expr {
            Expr::Lit(Lit::Str(s)) => Some(Self {
                quasis: vec![s.value.to_string()],
                exprs: Vec::new(),
            }),
            Expr::Tpl(tpl) => Some(Self {
                quasis: tpl
                    .quasis
                    .iter()
                    .map(|q| q.cooked.as_ref().map(|c| c.to_string()))
                    .collect::<Option<_>>()?,
                exprs: tpl.exprs.clone(),
            }),
            _ => None,
        }
    }

    fn push(&mut self, expr: &Expr) {
        match expr {
            Expr::Lit(Lit::Str(s)) => {
                if let Some(last) = self.quasis.last_mut() {
                    last.push_str(&s.value);
                }
            }
            other => {
                self.exprs.push(Box::new(other.clone()));
                self.quasis.push(String::new());
            }
        }
    }

    fn into_expr(self) -> Expr {
        if self.exprs.is_empty() {
            return str_lit(&self.quasis.concat());
        }
        let last = self.quasis.len() - 1;
        Expr::Tpl(Tpl {
            span: DUMMY_SP,
            exprs: self.exprs,
            quasis: self
                .quasis
                .into_iter()
                .enumerate()
                .map(|(i, text)| TplElement {
                    span: DUMMY_SP,
                    tail: i == last,
                    raw: escape(&text).into(),
                    cooked: Some(text.into()),
                })
                .collect(),
        })
    }
}

fn escape(text: &str) -> String {
    let mut raw = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => raw.push_str("\\\\"),
            '`' => raw.push_str("\\`"),
            '$' if chars.peek() == Some(&'{') => raw.push_str("\\$"),
            '\r' => raw.push_str("\\r"),
            other => raw.push(other),
        }
    }
    raw
}

impl Transform for TemplateLiterals {
    fn name(&self) -> &'static str {
        "template_literals"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        Ok(rewrite_exprs(module, |expr| {
            let Expr::Call(call) = expr else {
                return None;
            };
            let callee = callee_expr(call)?;
            let Expr::Member(member) = callee else {
                return None;
            };
            if !is_member_named(callee, "concat") || call.args.iter().any(|a| a.spread.is_some()) {
                return None;
            }
            let mut segments = Segments::from_base(&member.obj)?;
            for arg in &call.args {
                segments.push(&arg.expr);
            }
            Some(segments.into_expr())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_concat_to_template() {
        assert_transform(&TemplateLiterals, r#"x = "a".concat(b, "c");"#, "x = `a${b}c`;");
        assert_transform(
            &TemplateLiterals,
            r#"x = "".concat(a, " ").concat(b);"#,
            "x = `${a} ${b}`;",
        );
    }

    #[test]
    fn test_escapes_template_syntax() {
        assert_transform(&TemplateLiterals, r#"x = "`${".concat(a);"#, r"x = `\`\${${a}`;");
    }

    #[test]
    fn test_ignores_non_string_receivers() {
        assert_unchanged(&TemplateLiterals, "x = a.concat(b);");
        assert_unchanged(&TemplateLiterals, r#"x = "a".concat(...b);"#);
    }
}
