use crate::util::{rewrite_exprs, Transform};
use decloak_core::ast::{as_str, bool_lit, callee_expr, is_identifier_name, is_member_named, null_lit, num_lit, str_lit};
use decloak_utils::errors::TransformError;
use serde_json::Value;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;

/// `JSON.parse('{"a":[1,2]}')` → `{ a: [1, 2] }`.
pub struct JsonParse;

fn to_expr(value: Value) -> Expr {
    match value {
        Value::Null => null_lit(),
        Value::Bool(b) => bool_lit(b),
        Value::Number(n) => num_lit(n.as_f64().unwrap_or(f64::NAN)),
        Value::String(s) => str_lit(&s),
        Value::Array(items) => Expr::Array(ArrayLit {
            span: DUMMY_SP,
            elems: items
                .into_iter()
                .map(|item| {
                    Some(ExprOrSpread {
                        spread: None,
                        expr: Box::new(to_expr(item)),
                    })
                })
                .collect(),
        }),
        Value::Object(entries) => Expr::Object(ObjectLit {
            span: DUMMY_SP,
            props: entries
                .into_iter()
                .map(|(key, value)| {
                    let key = if is_identifier_name(&key) {
                        PropName::Ident(IdentName::new(key.into(), DUMMY_SP))
                    } else {
                        PropName::Str(Str {
                            span: DUMMY_SP,
                            value: key.into(),
                            raw: None,
                        })
                    };
                    PropOrSpread::Prop(Box::new(Prop::KeyValue(KeyValueProp {
                        key,
                        value: Box::new(to_expr(value)),
                    })))
                })
                .collect(),
        }),
    }
}

impl Transform for JsonParse {
    fn name(&self) -> &'static str {
        "json_parse"
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
            if !is_member_named(callee, "parse") || !matches!(&*member.obj, Expr::Ident(i) if &*i.sym == "JSON") {
                return None;
            }
            let [arg] = call.args.as_slice() else {
                return None;
            };
            let text = as_str(&arg.expr)?;
            let value: Value = serde_json::from_str(text).ok()?;
            Some(to_expr(value))
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_parses_literal_json() {
        assert_transform(
            &JsonParse,
            r#"a = JSON.parse('{"z":1,"b":[true,null,"x"],"c-d":{}}');"#,
            r#"a = { z: 1, b: [true, null, "x"], "c-d": {} };"#,
        );
    }

    #[test]
    fn test_keeps_invalid_or_dynamic_input() {
        assert_unchanged(&JsonParse, "a = JSON.parse('{a:1}');");
        assert_unchanged(&JsonParse, "a = JSON.parse(text);");
    }
}
