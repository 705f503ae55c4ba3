//! JSX reconstruction from compiled element factories.
//!
//! Two call shapes are recognised:
//!
//! - classic: `React.createElement(type, props, ...children)` and `h(...)`;
//! - automatic runtime: `jsx(type, props, key)` and its `jsxs`/`_jsx`/
//!   `jsxDEV` variants, including `(0, r.jsx)(...)` as bundlers emit it,
//!   where children travel in `props.children`.
//!
//! JSX reads lowercase names as intrinsic tags, so a lowercase binding used
//! as an element type is renamed first: `h(e, null)` becomes `<E />`.
//! Lowercase globals are left as calls.

use crate::mangle::{ClearContexts, Collector, Renamer};
use crate::util::{rewrite_exprs, Transform};
use decloak_core::ast::{callee_expr, is_ident, is_member_named, prop_name_str};
use decloak_utils::errors::TransformError;
use std::collections::{HashMap, HashSet};
use swc_core::common::{Globals, Mark, DUMMY_SP, GLOBALS};
use swc_core::ecma::ast::*;
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{Visit, VisitMutWith, VisitWith};
use tracing::debug;

pub struct Jsx;

const AUTOMATIC: &[&str] = &["jsx", "jsxs", "_jsx", "_jsxs", "jsxDEV", "_jsxDEV"];

enum Runtime {
    Classic,
    Automatic,
}

fn runtime(call: &CallExpr) -> Option<Runtime> {
    let callee = match callee_expr(call)? {
        // `(0, r.jsx)(...)`
        Expr::Seq(seq) if seq.exprs.len() == 2 => &*seq.exprs[1],
        other => other,
    };
    match callee {
        Expr::Ident(i) if &*i.sym == "h" => Some(Runtime::Classic),
        Expr::Ident(i) if AUTOMATIC.contains(&&*i.sym) => Some(Runtime::Automatic),
        Expr::Member(m) if is_member_named(callee, "createElement") && !is_ident(&m.obj, "document") => {
            Some(Runtime::Classic)
        }
        Expr::Member(_) if AUTOMATIC.iter().any(|n| is_member_named(callee, n)) => {
            Some(Runtime::Automatic)
        }
        _ => None,
    }
}

enum Tag {
    Element(JSXElementName),
    Fragment,
}

fn is_fragment(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(i) => matches!(&*i.sym, "Fragment" | "_Fragment"),
        Expr::Member(_) => is_member_named(expr, "Fragment"),
        _ => false,
    }
}

fn jsx_object(expr: &Expr) -> Option<JSXObject> {
    match expr {
        Expr::Ident(i) => Some(JSXObject::Ident(i.clone())),
        Expr::Member(m) => Some(JSXObject::JSXMemberExpr(Box::new(jsx_member(m)?))),
        _ => None,
    }
}

fn jsx_member(member: &MemberExpr) -> Option<JSXMemberExpr> {
    let MemberProp::Ident(prop) = &member.prop else {
        return None;
    };
    Some(JSXMemberExpr {
        span: DUMMY_SP,
        obj: jsx_object(&member.obj)?,
        prop: prop.clone(),
    })
}

fn tag(expr: &Expr) -> Option<Tag> {
    if is_fragment(expr) {
        return Some(Tag::Fragment);
    }
    let name = match expr {
        Expr::Lit(Lit::Str(s)) if is_attr_name(&s.value) => JSXElementName::Ident(Ident::new_no_ctxt(
            s.value.clone(),
            DUMMY_SP,
        )),
        Expr::Ident(i) if i.sym.starts_with(|c: char| c.is_ascii_uppercase()) => {
            JSXElementName::Ident(i.clone())
        }
        Expr::Member(m) => JSXElementName::JSXMemberExpr(jsx_member(m)?),
        _ => return None,
    };
    Some(Tag::Element(name))
}

/// Names usable as tags and attributes, hyphens included.
fn is_attr_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '$' | '-'))
}

fn container(expr: Expr) -> JSXExprContainer {
    JSXExprContainer {
        span: DUMMY_SP,
        expr: JSXExpr::Expr(Box::new(expr)),
    }
}

fn attr(name: &str, value: Expr) -> JSXAttrOrSpread {
    let value = match value {
        Expr::Lit(Lit::Str(s)) if !s.value.contains(['"', '\\', '\n', '&', '{', '}']) => {
            JSXAttrValue::Lit(Lit::Str(Str {
                span: DUMMY_SP,
                value: s.value,
                raw: None,
            }))
        }
        other => JSXAttrValue::JSXExprContainer(container(other)),
    };
    JSXAttrOrSpread::JSXAttr(JSXAttr {
        span: DUMMY_SP,
        name: JSXAttrName::Ident(IdentName::new(name.into(), DUMMY_SP)),
        value: Some(value),
    })
}

fn child(expr: Expr) -> JSXElementChild {
    match expr {
        Expr::JSXElement(element) => JSXElementChild::JSXElement(element),
        Expr::JSXFragment(fragment) => JSXElementChild::JSXFragment(fragment),
        Expr::Lit(Lit::Str(s))
            if !s.value.is_empty()
                && s.value.trim() == &*s.value
                && !s.value.contains(['{', '}', '<', '>', '\n', '&']) =>
        {
            JSXElementChild::JSXText(JSXText {
                span: DUMMY_SP,
                value: s.value.clone(),
                raw: s.value,
            })
        }
        other => JSXElementChild::JSXExprContainer(container(other)),
    }
}

/// Attributes and `children` of a props argument.
fn props(expr: &Expr, take_children: bool) -> Option<(Vec<JSXAttrOrSpread>, Option<Expr>)> {
    let object = match expr {
        Expr::Lit(Lit::Null(_)) => return Some((Vec::new(), None)),
        Expr::Ident(i) if &*i.sym == "undefined" => return Some((Vec::new(), None)),
        Expr::Object(object) => object,
        other => {
            return Some((
                vec![JSXAttrOrSpread::SpreadElement(SpreadElement {
                    dot3_token: DUMMY_SP,
                    expr: Box::new(other.clone()),
                })],
                None,
            ))
        }
    };
    let mut attrs = Vec::new();
    let mut children = None;
    for prop in &object.props {
        let prop = match prop {
            PropOrSpread::Spread(spread) => {
                attrs.push(JSXAttrOrSpread::SpreadElement(spread.clone()));
                continue;
            }
            PropOrSpread::Prop(prop) => prop,
        };
        let (name, value) = match &**prop {
            Prop::KeyValue(kv) => (prop_name_str(&kv.key)?, (*kv.value).clone()),
            Prop::Shorthand(i) => (i.sym.to_string(), Expr::Ident(i.clone())),
            _ => return None,
        };
        if take_children && name == "children" {
            children = Some(value);
            continue;
        }
        if !is_attr_name(&name) {
            return None;
        }
        attrs.push(attr(&name, value));
    }
    Some((attrs, children))
}

fn build(tag: Tag, attrs: Vec<JSXAttrOrSpread>, children: Vec<JSXElementChild>) -> Option<Expr> {
    match tag {
        Tag::Fragment => attrs.is_empty().then(|| {
            Expr::JSXFragment(JSXFragment {
                span: DUMMY_SP,
                opening: JSXOpeningFragment { span: DUMMY_SP },
                children,
                closing: JSXClosingFragment { span: DUMMY_SP },
            })
        }),
        Tag::Element(name) => {
            let self_closing = children.is_empty();
            Some(Expr::JSXElement(Box::new(JSXElement {
                span: DUMMY_SP,
                opening: JSXOpeningElement {
                    span: DUMMY_SP,
                    name: name.clone(),
                    attrs,
                    self_closing,
                    type_args: None,
                },
                children,
                closing: (!self_closing).then(|| JSXClosingElement {
                    span: DUMMY_SP,
                    name,
                }),
            })))
        }
    }
}

fn spread_child(expr: Expr) -> JSXElementChild {
    JSXElementChild::JSXSpreadChild(JSXSpreadChild {
        span: DUMMY_SP,
        expr: Box::new(expr),
    })
}

fn children_of(args: impl IntoIterator<Item = ExprOrSpread>) -> Vec<JSXElementChild> {
    args.into_iter()
        .map(|arg| match arg.spread {
            Some(_) => spread_child(*arg.expr),
            None => child(*arg.expr),
        })
        .collect()
}

fn classic(call: &CallExpr) -> Option<Expr> {
    let [first, props_arg, children @ ..] = call.args.as_slice() else {
        return None;
    };
    if first.spread.is_some() || props_arg.spread.is_some() {
        return None;
    }
    let tag = tag(&first.expr)?;
    let (attrs, _) = props(&props_arg.expr, false)?;
    build(tag, attrs, children_of(children.iter().cloned()))
}

fn automatic(call: &CallExpr) -> Option<Expr> {
    if call.args.iter().any(|a| a.spread.is_some()) || call.args.len() < 2 {
        return None;
    }
    let tag = tag(&call.args[0].expr)?;
    let (mut attrs, children) = props(&call.args[1].expr, true)?;
    if let Some(key) = call.args.get(2) {
        if !matches!(&*key.expr, Expr::Ident(i) if &*i.sym == "undefined") {
            attrs.insert(0, attr("key", (*key.expr).clone()));
        }
    }
    let children = match children {
        None => Vec::new(),
        Some(Expr::Array(array)) => children_of(array.elems.into_iter().collect::<Option<Vec<_>>>()?),
        Some(other) => vec![child(other)],
    };
    build(tag, attrs, children)
}

/// Lowercase identifiers passed as element types.
#[derive(Default)]
struct LowercaseTypes {
    ids: Vec<Id>,
}

impl Visit for LowercaseTypes {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        if runtime(call).is_some() {
            if let Some(ExprOrSpread { spread: None, expr }) = call.args.first() {
                if let Expr::Ident(i) = &**expr {
                    if i.sym.starts_with(|c: char| c.is_ascii_lowercase()) {
                        self.ids.push(i.to_id());
                    }
                }
            }
        }
        call.visit_children_with(self);
    }
}

fn capitalized(name: &str, taken: &mut HashSet<String>) -> String {
    let mut chars = name.chars();
    let base: String = chars
        .next()
        .map(|c| c.to_ascii_uppercase())
        .into_iter()
        .chain(chars)
        .collect();
    let mut candidate = base.clone();
    let mut n = 1;
    while !taken.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{base}{n}");
    }
    candidate
}

/// Renames local, non-exported bindings in [`LowercaseTypes`] to a
/// capitalised name.
fn capitalize_components(module: &mut Module) -> usize {
    let mut types = LowercaseTypes::default();
    module.visit_with(&mut types);
    if types.ids.is_empty() {
        return 0;
    }
    GLOBALS.set(&Globals::new(), || {
        module.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
        let mut types = LowercaseTypes::default();
        module.visit_with(&mut types);
        let mut bindings = Collector::default();
        module.visit_with(&mut bindings);

        let mut renames: HashMap<Id, String> = HashMap::new();
        for id in types.ids {
            if !bindings.seen.contains(&id) || bindings.exported.contains(&id) || renames.contains_key(&id) {
                continue;
            }
            let name = capitalized(&id.0, &mut bindings.symbols);
            debug!("renaming component {} to {name}", id.0);
            renames.insert(id, name);
        }
        module.visit_mut_with(&mut Renamer { renames: &renames });
        module.visit_mut_with(&mut ClearContexts);
        renames.len()
    })
}

impl Transform for Jsx {
    fn name(&self) -> &'static str {
        "jsx"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let renamed = capitalize_components(module);
        Ok(renamed
            + rewrite_exprs(module, |expr| {
                let Expr::Call(call) = expr else {
                    return None;
                };
                match runtime(call)? {
                    Runtime::Classic => classic(call),
                    Runtime::Automatic => automatic(call),
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_classic_runtime() {
        assert_transform(
            &Jsx,
            r#"x = React.createElement("div", { className: "box", id: y }, "Hello", React.createElement(Item, null));"#,
            r#"x = <div className="box" id={y}>Hello<Item /></div>;"#,
        );
        assert_transform(
            &Jsx,
            "x = React.createElement(React.Fragment, null, a);",
            "x = <>{a}</>;",
        );
    }

    #[test]
    fn test_automatic_runtime() {
        assert_transform(
            &Jsx,
            r#"x = (0, r.jsxs)("ul", { children: [(0, r.jsx)("li", { children: "a" }, k), b] });"#,
            r#"x = <ul><li key={k}>a</li>{b}</ul>;"#,
        );
        assert_transform(
            &Jsx,
            "x = _jsx(Foo.Bar, { ...rest, on: true });",
            "x = <Foo.Bar {...rest} on={true} />;",
        );
    }

    #[test]
    fn test_keeps_unrepresentable_calls() {
        assert_unchanged(&Jsx, r#"x = React.createElement(tag, null);"#);
        assert_unchanged(&Jsx, r#"x = React.createElement("div", { get a() { return 1; } });"#);
    }

    #[test]
    fn test_text_children() {
        assert_transform(
            &Jsx,
            r#"x = h("p", null, "hi", " padded ", "a{b}");"#,
            r#"x = <p>hi{" padded "}{"a{b}"}</p>;"#,
        );
        assert_unchanged(&Jsx, r#"x = document.createElement("div", opts);"#);
    }

    #[test]
    fn test_lowercase_component_bindings_are_capitalised() {
        assert_transform(
            &Jsx,
            "function App() { const e = Foo; return React.createElement(e, null); }",
            "function App() { const E = Foo; return <E />; }",
        );
        assert_transform(
            &Jsx,
            "const e = a, E = b; x = h(e, { e: 1 });",
            "const E2 = a, E = b; x = <E2 e={1} />;",
        );
    }

    #[test]
    fn test_spread_children() {
        assert_transform(
            &Jsx,
            "x = React.createElement(\"ul\", null, a, ...items);",
            "x = <ul>{a}{...items}</ul>;",
        );
        assert_transform(
            &Jsx,
            "x = jsxs(\"ul\", { children: [...items] });",
            "x = <ul>{...items}</ul>;",
        );
    }
}
