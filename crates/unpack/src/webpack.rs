//! Webpack registry detection.
//!
//! Three shapes are recognised:
//!
//! - webpack 4: `(function (modules) { ...runtime... })([function (e, t, n) {}, ...])`
//!   with the entry selected through `__webpack_require__.s = id`;
//! - webpack 5: `(() => { var modules = { 12: (e, t, n) => {} }; function require(id) {} ... })()`
//!   where the entry is either a trailing `require(id)` or inlined code;
//! - chunks: `(self.webpackChunk = self.webpackChunk || []).push([[ids], { ...modules }])`.

use crate::bundle::{BundleKind, RawModule};
use crate::require::ModuleFunction;
use decloak_core::ast::{
    as_number, as_str, callee_expr, iife_function, is_member_named, number_to_string,
    prop_name_str, FunctionLike,
};
use std::collections::HashMap;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::debug;

/// Id of the module made from webpack 5's inlined entry code.
pub(crate) const INLINE_ENTRY_ID: &str = "entry";

pub(crate) fn detect(module: &Module) -> Option<(BundleKind, Vec<RawModule>)> {
    module.body.iter().find_map(|item| {
        let ModuleItem::Stmt(Stmt::Expr(stmt)) = item else {
            return None;
        };
        webpack4(&stmt.expr)
            .map(|modules| (BundleKind::Webpack4, modules))
            .or_else(|| webpack5(&stmt.expr).map(|modules| (BundleKind::Webpack5, modules)))
            .or_else(|| chunk(&stmt.expr).map(|modules| (BundleKind::WebpackChunk, modules)))
    })
}

/// Module initializers of an array or object registry literal.
pub(crate) fn registry(expr: &Expr) -> Option<Vec<(String, ModuleFunction)>> {
    let modules: Vec<(String, ModuleFunction)> = match expr {
        Expr::Array(array) => array
            .elems
            .iter()
            .enumerate()
            .filter_map(|(i, elem)| elem.as_ref().map(|elem| (i, elem)))
            .map(|(i, elem)| {
                (elem.spread.is_none())
                    .then(|| ModuleFunction::from_expr(&elem.expr))
                    .flatten()
                    .map(|f| (i.to_string(), f))
            })
            .collect::<Option<_>>()?,
        Expr::Object(object) => object
            .props
            .iter()
            .map(|prop| match prop {
                PropOrSpread::Prop(prop) => match &**prop {
                    Prop::KeyValue(kv) => {
                        Some((prop_name_str(&kv.key)?, ModuleFunction::from_expr(&kv.value)?))
                    }
                    _ => None,
                },
                PropOrSpread::Spread(_) => None,
            })
            .collect::<Option<_>>()?,
        _ => return None,
    };
    (!modules.is_empty()).then_some(modules)
}

fn raw(modules: Vec<(String, ModuleFunction)>, entries: &[String]) -> Vec<RawModule> {
    modules
        .into_iter()
        .map(|(id, function)| RawModule {
            is_entry: entries.contains(&id),
            id,
            function,
            dependencies: HashMap::new(),
        })
        .collect()
}

/// Finds `registry[id].call(...)` or `registry[id](...)`.
struct RegistryCall<'a> {
    registry: &'a Id,
    found: bool,
}

impl Visit for RegistryCall<'_> {
    fn visit_call_expr(&mut self, call: &CallExpr) {
        let is_registry_lookup = |expr: &Expr| match expr {
            Expr::Member(m) => {
                matches!(m.prop, MemberProp::Computed(_))
                    && matches!(&*m.obj, Expr::Ident(i) if i.to_id() == *self.registry)
            }
            _ => false,
        };
        if let Some(callee) = callee_expr(call) {
            let direct = is_registry_lookup(callee);
            let via_call = matches!(callee, Expr::Member(m) if is_member_named(callee, "call") && is_registry_lookup(&m.obj));
            if direct || via_call {
                self.found = true;
                return;
            }
        }
        call.visit_children_with(self);
    }
}

fn calls_registry<N>(node: &N, registry: &Id) -> bool
where
    N: for<'a> VisitWith<RegistryCall<'a>>,
{
    let mut finder = RegistryCall {
        registry,
        found: false,
    };
    node.visit_with(&mut finder);
    finder.found
}

/// Literal right-hand sides of `<anything>.s = <literal>`.
struct EntryAssignments {
    ids: Vec<String>,
}

impl Visit for EntryAssignments {
    fn visit_assign_expr(&mut self, assign: &AssignExpr) {
        if let AssignTarget::Simple(SimpleAssignTarget::Member(m)) = &assign.left {
            if matches!(&m.prop, MemberProp::Ident(p) if &*p.sym == "s") {
                if let Some(id) = literal_id(&assign.right) {
                    self.ids.push(id);
                }
            }
        }
        assign.visit_children_with(self);
    }
}

fn literal_id(expr: &Expr) -> Option<String> {
    as_number(expr)
        .map(number_to_string)
        .or_else(|| as_str(expr).map(str::to_string))
}

fn webpack4(expr: &Expr) -> Option<Vec<RawModule>> {
    let (call, FunctionLike::Function(f)) = iife_function(expr)? else {
        return None;
    };
    let ([param], [arg]) = (f.params.as_slice(), call.args.as_slice()) else {
        return None;
    };
    let Pat::Ident(param) = &param.pat else {
        return None;
    };
    let param = param.id.to_id();
    let modules = registry(&arg.expr)?;
    let body = f.body.as_ref()?;
    if !calls_registry(body, &param) {
        return None;
    }

    let mut entries = EntryAssignments { ids: Vec::new() };
    body.visit_with(&mut entries);
    debug!("webpack 4 runtime with {} modules, entries {:?}", modules.len(), entries.ids);
    Some(raw(modules, &entries.ids))
}

fn webpack5(expr: &Expr) -> Option<Vec<RawModule>> {
    let (call, function) = iife_function(expr)?;
    if !call.args.is_empty() || function.param_count() != 0 {
        return None;
    }
    let stmts = function.body_stmts()?;

    let (registry_id, modules) = stmts.iter().find_map(|stmt| {
        let Stmt::Decl(Decl::Var(var)) = stmt else {
            return None;
        };
        var.decls.iter().find_map(|decl| {
            let Pat::Ident(binding) = &decl.name else {
                return None;
            };
            Some((binding.id.to_id(), registry(decl.init.as_deref()?)?))
        })
    })?;

    // The require function is the one that looks modules up in the registry.
    let require = stmts.iter().find_map(|stmt| match stmt {
        Stmt::Decl(Decl::Fn(f)) if calls_registry(&*f.function, &registry_id) => Some(f.ident.to_id()),
        _ => None,
    })?;

    let mut entries = Vec::new();
    let mut modules = modules;
    match stmts.last() {
        Some(last) if required_id(last, &require).is_some() => {
            entries.extend(required_id(last, &require));
        }
        Some(Stmt::Expr(last)) => {
            if let Some((_, inline)) = iife_function(&last.expr) {
                if let Some(body) = inline.body_stmts().filter(|b| !only_runtime(b, &require)) {
                    modules.push((
                        INLINE_ENTRY_ID.to_string(),
                        ModuleFunction {
                            params: vec![None, None, Some(require.clone())],
                            body: body.to_vec(),
                        },
                    ));
                    entries.push(INLINE_ENTRY_ID.to_string());
                }
            }
        }
        _ => {}
    }
    debug!("webpack 5 runtime with {} modules, entries {entries:?}", modules.len());
    Some(raw(modules, &entries))
}

/// `require(id)` or `var x = require(id)` with a literal id.
fn required_id(stmt: &Stmt, require: &Id) -> Option<String> {
    let expr = match stmt {
        Stmt::Expr(e) => &*e.expr,
        Stmt::Decl(Decl::Var(var)) => var.decls.last()?.init.as_deref()?,
        _ => return None,
    };
    let Expr::Call(call) = expr else {
        return None;
    };
    match (callee_expr(call)?, call.args.as_slice()) {
        (Expr::Ident(callee), [arg]) if callee.to_id() == *require => literal_id(&arg.expr),
        _ => None,
    }
}

/// Runtime helper IIFEs only assign `require.<helper> = ...`.
fn only_runtime(stmts: &[Stmt], require: &Id) -> bool {
    stmts.iter().all(|stmt| match stmt {
        Stmt::Expr(e) => match &*e.expr {
            Expr::Assign(assign) => matches!(
                &assign.left,
                AssignTarget::Simple(SimpleAssignTarget::Member(m))
                    if matches!(&*m.obj, Expr::Ident(i) if i.to_id() == *require)
            ),
            _ => false,
        },
        _ => false,
    })
}

fn chunk(expr: &Expr) -> Option<Vec<RawModule>> {
    let Expr::Call(call) = expr else {
        return None;
    };
    if !is_member_named(callee_expr(call)?, "push") {
        return None;
    }
    let [arg] = call.args.as_slice() else {
        return None;
    };
    let Expr::Array(array) = &*arg.expr else {
        return None;
    };
    let registry_expr = array.elems.get(1)?.as_ref()?;
    let modules = registry(&registry_expr.expr)?;
    debug!("webpack chunk with {} modules", modules.len());
    Some(raw(modules, &[]))
}
