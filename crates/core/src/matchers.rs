//! Tree-shape predicates with named captures.
//!
//! A [`Matcher`] is a cheap, clonable predicate over expressions. Matchers
//! compose: `call(ident("require"), [string_matching(...)])` checks a shape,
//! and `capture("name", m)` records the matched node so the caller can act on
//! it. The deobfuscation passes use them to recognise obfuscator idioms and
//! the bundle unpacker uses them for user supplied path mappings.

use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

use crate::ast::{callee_expr, member_prop_name, prop_name_str};

/// Nodes recorded by [`capture`] during a successful match.
pub type Captures = HashMap<&'static str, Expr>;

type MatchFn = dyn Fn(&Expr, &mut Captures) -> bool + Send + Sync;

/// A composable expression predicate.
#[derive(Clone)]
pub struct Matcher {
    inner: Arc<MatchFn>,
    label: Arc<str>,
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Matcher({})", self.label)
    }
}

impl Matcher {
    /// Builds a matcher from a closure.
    pub fn new(
        label: impl Into<String>,
        f: impl Fn(&Expr, &mut Captures) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(f),
            label: Arc::from(label.into()),
        }
    }

    pub fn matches(&self, expr: &Expr) -> bool {
        (self.inner)(expr, &mut Captures::new())
    }

    /// Matches and returns the captures on success.
    pub fn captures(&self, expr: &Expr) -> Option<Captures> {
        let mut caps = Captures::new();
        (self.inner)(expr, &mut caps).then_some(caps)
    }

    fn test(&self, expr: &Expr, caps: &mut Captures) -> bool {
        (self.inner)(expr, caps)
    }

    /// True if any expression inside `node` matches.
    pub fn find_in<N: VisitWith<Finder>>(&self, node: &N) -> bool {
        let mut finder = Finder {
            matcher: self.clone(),
            found: None,
        };
        node.visit_with(&mut finder);
        finder.found.is_some()
    }

    /// Captures of the first expression inside `node` that matches.
    pub fn find_captures<N: VisitWith<Finder>>(&self, node: &N) -> Option<Captures> {
        let mut finder = Finder {
            matcher: self.clone(),
            found: None,
        };
        node.visit_with(&mut finder);
        finder.found
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Visitor behind [`Matcher::find_in`].
#[derive(Debug)]
pub struct Finder {
    matcher: Matcher,
    found: Option<Captures>,
}

impl Visit for Finder {
    fn visit_expr(&mut self, expr: &Expr) {
        if self.found.is_some() {
            return;
        }
        if let Some(caps) = self.matcher.captures(expr) {
            self.found = Some(caps);
            return;
        }
        expr.visit_children_with(self);
    }
}

pub fn any() -> Matcher {
    Matcher::new("any", |_, _| true)
}

pub fn from_fn(label: &str, f: impl Fn(&Expr) -> bool + Send + Sync + 'static) -> Matcher {
    Matcher::new(label, move |e, _| f(e))
}

/// Records the matched expression under `name` when `inner` matches.
pub fn capture(name: &'static str, inner: Matcher) -> Matcher {
    let label = format!("capture({name}, {})", inner.label);
    Matcher::new(label, move |e, caps| {
        if inner.test(e, caps) {
            caps.insert(name, e.clone());
            true
        } else {
            false
        }
    })
}

pub fn or(options: Vec<Matcher>) -> Matcher {
    Matcher::new("or", move |e, caps| options.iter().any(|m| m.test(e, caps)))
}

pub fn and(all: Vec<Matcher>) -> Matcher {
    Matcher::new("and", move |e, caps| all.iter().all(|m| m.test(e, caps)))
}

pub fn not(inner: Matcher) -> Matcher {
    Matcher::new("not", move |e, _| !inner.matches(e))
}

pub fn ident(name: &str) -> Matcher {
    let name = name.to_string();
    Matcher::new(format!("ident({name})"), move |e, _| {
        matches!(e, Expr::Ident(i) if *i.sym == *name)
    })
}

pub fn any_ident() -> Matcher {
    Matcher::new("any_ident", |e, _| matches!(e, Expr::Ident(_)))
}

pub fn string(value: &str) -> Matcher {
    let value = value.to_string();
    Matcher::new(format!("string({value:?})"), move |e, _| {
        matches!(e, Expr::Lit(Lit::Str(s)) if *s.value == *value)
    })
}

pub fn any_string() -> Matcher {
    Matcher::new("any_string", |e, _| matches!(e, Expr::Lit(Lit::Str(_))))
}

/// A string literal whose value matches `pattern`.
pub fn string_matching(pattern: Regex) -> Matcher {
    Matcher::new(format!("string_matching({pattern})"), move |e, _| {
        matches!(e, Expr::Lit(Lit::Str(s)) if pattern.is_match(&s.value))
    })
}

pub fn number(value: f64) -> Matcher {
    Matcher::new(format!("number({value})"), move |e, _| {
        matches!(e, Expr::Lit(Lit::Num(n)) if n.value == value)
    })
}

pub fn any_number() -> Matcher {
    Matcher::new("any_number", |e, _| matches!(e, Expr::Lit(Lit::Num(_))))
}

/// A regular expression literal with exactly this source.
pub fn regex_literal(pattern: &str) -> Matcher {
    let pattern = pattern.to_string();
    Matcher::new(format!("regex_literal(/{pattern}/)"), move |e, _| {
        matches!(e, Expr::Lit(Lit::Regex(r)) if *r.exp == *pattern)
    })
}

/// `obj.prop` / `obj["prop"]`.
pub fn member(obj: Matcher, prop: &str) -> Matcher {
    let prop = prop.to_string();
    Matcher::new(format!("member({}, {prop})", obj.label), move |e, caps| match e {
        Expr::Member(m) => {
            member_prop_name(&m.prop).as_deref() == Some(prop.as_str()) && obj.test(&m.obj, caps)
        }
        _ => false,
    })
}

/// A call whose callee and positional arguments match. `None` for `args`
/// accepts any argument list.
pub fn call(callee: Matcher, args: Option<Vec<Matcher>>) -> Matcher {
    Matcher::new(format!("call({})", callee.label), move |e, caps| {
        let Expr::Call(c) = e else {
            return false;
        };
        let Some(callee_e) = callee_expr(c) else {
            return false;
        };
        if !callee.test(callee_e, caps) {
            return false;
        }
        match &args {
            None => true,
            Some(args) => {
                args.len() == c.args.len()
                    && args
                        .iter()
                        .zip(&c.args)
                        .all(|(m, a)| a.spread.is_none() && m.test(&a.expr, caps))
            }
        }
    })
}

pub fn function_expr() -> Matcher {
    Matcher::new("function_expr", |e, _| matches!(e, Expr::Fn(_) | Expr::Arrow(_)))
}

/// An object literal that has (at least) these static keys.
pub fn object_with_keys(keys: &[&str]) -> Matcher {
    let keys: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
    Matcher::new(format!("object_with_keys({keys:?})"), move |e, _| {
        let Expr::Object(obj) = e else {
            return false;
        };
        let present: Vec<String> = obj
            .props
            .iter()
            .filter_map(|p| match p {
                PropOrSpread::Prop(prop) => match &**prop {
                    Prop::KeyValue(kv) => prop_name_str(&kv.key),
                    Prop::Method(m) => prop_name_str(&m.key),
                    Prop::Shorthand(i) => Some(i.sym.to_string()),
                    _ => None,
                },
                PropOrSpread::Spread(_) => None,
            })
            .collect();
        keys.iter().all(|k| present.contains(k))
    })
}

/// An array literal whose every element matches `element`.
pub fn array_of(element: Matcher) -> Matcher {
    Matcher::new(format!("array_of({})", element.label), move |e, caps| {
        let Expr::Array(arr) = e else {
            return false;
        };
        arr.elems.iter().all(|el| {
            el.as_ref()
                .is_some_and(|el| el.spread.is_none() && element.test(&el.expr, caps))
        })
    })
}

/// Ordered path → pattern table used by the bundle unpacker.
#[derive(Debug, Clone, Default)]
pub struct Mappings {
    entries: Vec<(String, Matcher)>,
}

impl Mappings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, matcher: Matcher) -> Self {
        self.entries.push((path.into(), matcher));
        self
    }

    pub fn push(&mut self, path: impl Into<String>, matcher: Matcher) {
        self.entries.push((path.into(), matcher));
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Matcher)> {
        self.entries.iter().map(|(p, m)| (p.as_str(), m))
    }

    /// First path whose pattern matches anywhere in `node`.
    pub fn resolve<N: VisitWith<Finder>>(&self, node: &N) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, m)| m.find_in(node))
            .map(|(p, _)| p.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    fn first_expr(code: &str) -> Expr {
        let tree = parse(code).unwrap();
        match tree.module.body.into_iter().next() {
            Some(ModuleItem::Stmt(Stmt::Expr(s))) => *s.expr,
            other => panic!("unexpected statement {other:?}"),
        }
    }

    #[test]
    fn test_call_with_capture() {
        let m = call(
            ident("require"),
            Some(vec![capture("id", any_number())]),
        );
        let caps = m.captures(&first_expr("require(12)")).unwrap();
        assert!(matches!(caps["id"], Expr::Lit(Lit::Num(ref n)) if n.value == 12.0));
        assert!(!m.matches(&first_expr("require('a', 1)")));
    }

    #[test]
    fn test_member_and_string_regex() {
        let m = call(
            member(any_ident(), "test"),
            Some(vec![string_matching(Regex::new("^#").unwrap())]),
        );
        assert!(m.matches(&first_expr("re.test('#fff')")));
        assert!(!m.matches(&first_expr("re['test']('fff')")));
    }

    #[test]
    fn test_find_in_and_mappings() {
        let tree = parse("module.exports = function () { return /^#([0-9a-f]{3}){1,2}$/; };")
            .unwrap();
        let mappings = Mappings::new()
            .with("./utils/other.js", string("nope"))
            .with("./utils/color.js", regex_literal("^#([0-9a-f]{3}){1,2}$"));
        assert_eq!(mappings.resolve(&tree.module), Some("./utils/color.js"));
    }
}
