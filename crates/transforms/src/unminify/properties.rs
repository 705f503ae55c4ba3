use crate::util::Transform;
use decloak_core::ast::is_identifier_name;
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// `a["b"]` → `a.b` and `{ "b": 1 }` → `{ b: 1 }`.
///
/// Keys that are not identifier names stay quoted. Computed `__proto__`
/// and `constructor` keys keep their special meaning and are left alone.
pub struct ComputedProperties;

#[derive(Default)]
struct Properties {
    changes: usize,
}

fn static_key(expr: &Expr) -> Option<&Str> {
    match expr {
        Expr::Lit(Lit::Str(s)) => Some(s),
        _ => None,
    }
}

impl VisitMut for Properties {
    fn visit_mut_member_prop(&mut self, prop: &mut MemberProp) {
        prop.visit_mut_children_with(self);
        let MemberProp::Computed(computed) = prop else {
            return;
        };
        let Some(key) = static_key(&computed.expr) else {
            return;
        };
        if is_identifier_name(&key.value) {
            *prop = MemberProp::Ident(IdentName::new(key.value.clone(), computed.span));
            self.changes += 1;
        }
    }

    fn visit_mut_super_prop(&mut self, prop: &mut SuperProp) {
        prop.visit_mut_children_with(self);
        let SuperProp::Computed(computed) = prop else {
            return;
        };
        let Some(key) = static_key(&computed.expr) else {
            return;
        };
        if is_identifier_name(&key.value) {
            *prop = SuperProp::Ident(IdentName::new(key.value.clone(), computed.span));
            self.changes += 1;
        }
    }

    fn visit_mut_prop_name(&mut self, name: &mut PropName) {
        name.visit_mut_children_with(self);
        match name {
            PropName::Computed(computed) => {
                let Some(key) = static_key(&computed.expr) else {
                    return;
                };
                if matches!(&*key.value, "__proto__" | "constructor") {
                    return;
                }
                *name = if is_identifier_name(&key.value) {
                    PropName::Ident(IdentName::new(key.value.clone(), key.span))
                } else {
                    PropName::Str(key.clone())
                };
                self.changes += 1;
            }
            PropName::Str(key) if is_identifier_name(&key.value) => {
                *name = PropName::Ident(IdentName::new(key.value.clone(), key.span));
                self.changes += 1;
            }
            _ => {}
        }
    }
}

impl Transform for ComputedProperties {
    fn name(&self) -> &'static str {
        "computed_properties"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let mut visitor = Properties::default();
        module.visit_mut_with(&mut visitor);
        Ok(visitor.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_convert_to_identifier() {
        assert_transform(&ComputedProperties, r#"console["log"]("hello");"#, r#"console.log("hello");"#);
    }

    #[test]
    fn test_ignore_invalid_identifier() {
        assert_unchanged(&ComputedProperties, r#"console["1"]("hello");"#);
        assert_unchanged(&ComputedProperties, r#"a["b-c"];"#);
    }

    #[test]
    fn test_object_and_class_keys() {
        assert_transform(
            &ComputedProperties,
            r#"x = { "a": 1, ["b"]: 2, ["c d"]: 3 }; class A { ["m"]() {} }"#,
            r#"x = { a: 1, b: 2, "c d": 3 }; class A { m() {} }"#,
        );
        assert_unchanged(&ComputedProperties, r#"x = { ["__proto__"]: 1 };"#);
    }
}
