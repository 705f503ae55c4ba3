//! Undoes minification.
//!
//! Each rule is a small [`Transform`]; [`rules`] returns the set the
//! pipeline runs to fixpoint after transpilation.

pub mod blocks;
pub mod conditions;
pub mod declarations;
pub mod json_parse;
pub mod literals;
pub mod properties;
pub mod sequence;
pub mod ternary_calls;

pub use blocks::BlockStatements;
pub use conditions::{ForToWhile, LogicalToIf, MergeElseIf, RemoveDoubleNot, TernaryToIf, Yoda};
pub use declarations::SplitVariableDeclarations;
pub use json_parse::JsonParse;
pub use literals::{
    Infinity, MergeStrings, NumberExpressions, RawLiterals, TypeofUndefined, UnminifyBooleans,
    VoidToUndefined,
};
pub use properties::ComputedProperties;
pub use sequence::Sequence;
pub use ternary_calls::ExtractTernaryCalls;

use crate::util::Transform;

/// The unminify rule set in application order.
///
/// [`ExtractTernaryCalls`] is not part of it: duplicating arbitrary calls
/// grows the code, so it only runs filtered to string decoders.
pub fn rules() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(RawLiterals),
        Box::new(BlockStatements),
        Box::new(Sequence),
        Box::new(SplitVariableDeclarations),
        Box::new(ComputedProperties),
        Box::new(RemoveDoubleNot),
        Box::new(MergeElseIf),
        Box::new(MergeStrings),
        Box::new(NumberExpressions),
        Box::new(UnminifyBooleans),
        Box::new(VoidToUndefined),
        Box::new(Yoda),
        Box::new(TypeofUndefined),
        Box::new(Infinity),
        Box::new(JsonParse),
        Box::new(LogicalToIf),
        Box::new(TernaryToIf),
        Box::new(ForToWhile),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pass::apply_many;
    use crate::util::testing::assert_fixpoint;
    use decloak_core::{codegen::generate, parse};
    use std::collections::HashSet;

    const MINIFIED: &str = r#"
        function f(e, t) {
            for (var n = 0, r = [], o = !0; ; ) {
                if (n++, !!o && "x" === t[n]) return r.push(e["value"]), void 0 === e ? 1 / 0 : r;
                o ? g() : h(), typeof e > "u" || k(), e && (t = JSON.parse("[1,2]"));
                if (n > 0x10) { break; } else { if (t) { continue; } }
            }
        }
    "#;

    #[test]
    fn test_rule_names_are_unique() {
        let names: HashSet<_> = rules().iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), rules().len());
    }

    #[test]
    fn test_unminify_is_idempotent() {
        let units = rules();
        let mut tree = parse(MINIFIED).unwrap();
        assert!(apply_many(&mut tree.module, &units, &Default::default()).unwrap() > 0);
        let once = generate(&tree).unwrap();

        let mut tree = parse(&once).unwrap();
        assert_eq!(apply_many(&mut tree.module, &units, &Default::default()).unwrap(), 0);
        assert_eq!(generate(&tree).unwrap(), once);
    }

    #[test]
    fn test_unminify_readable_output() {
        assert_fixpoint(
            &rules(),
            "if (a) b(), c(); !0 && d['e'](void 0 === f);",
            "if (a) { b(); c(); } if (true) { d.e(f === undefined); }",
        );
    }
}
