//! Browserify registry detection.
//!
//! `(function e(t, n, r) { ...prelude... })({ 1: [function (require, module, exports) {}, { "./a": 2 }] }, {}, [1])`

use crate::bundle::RawModule;
use crate::require::ModuleFunction;
use decloak_core::ast::{as_number, as_str, number_to_string, prop_name_str};
use std::collections::HashMap;
use swc_core::ecma::ast::*;
use tracing::debug;

pub(crate) fn detect(module: &Module) -> Option<Vec<RawModule>> {
    module.body.iter().find_map(|item| {
        let ModuleItem::Stmt(Stmt::Expr(stmt)) = item else {
            return None;
        };
        bundle_call(&stmt.expr)
    })
}

fn bundle_call(expr: &Expr) -> Option<Vec<RawModule>> {
    let expr = match expr {
        Expr::Unary(UnaryExpr { arg, .. }) => &**arg,
        // `require = (function () { ... })()({...}, {}, [1])`
        Expr::Assign(assign) => &*assign.right,
        other => other,
    };
    let Expr::Call(call) = expr else {
        return None;
    };
    let [registry, cache, entries] = call.args.as_slice() else {
        return None;
    };
    if !matches!(&*cache.expr, Expr::Object(_)) {
        return None;
    }
    let Expr::Array(entries) = &*entries.expr else {
        return None;
    };
    let entries: Vec<String> = entries
        .elems
        .iter()
        .map(|elem| id_of(&elem.as_ref()?.expr))
        .collect::<Option<_>>()?;
    let Expr::Object(registry) = &*registry.expr else {
        return None;
    };

    let modules: Vec<RawModule> = registry
        .props
        .iter()
        .map(|prop| {
            let PropOrSpread::Prop(prop) = prop else {
                return None;
            };
            let Prop::KeyValue(kv) = &**prop else {
                return None;
            };
            let id = prop_name_str(&kv.key)?;
            let (function, dependencies) = module_entry(&kv.value)?;
            Some(RawModule {
                is_entry: entries.contains(&id),
                id,
                function,
                dependencies,
            })
        })
        .collect::<Option<_>>()?;
    if modules.is_empty() {
        return None;
    }
    debug!("browserify bundle with {} modules, entries {entries:?}", modules.len());
    Some(modules)
}

/// `[function (require, module, exports) {}, { "./dep": 2 }]`
fn module_entry(expr: &Expr) -> Option<(ModuleFunction, HashMap<String, String>)> {
    let Expr::Array(pair) = expr else {
        return None;
    };
    let [Some(function), Some(deps)] = pair.elems.as_slice() else {
        return None;
    };
    let function = ModuleFunction::from_expr(&function.expr)?;
    let Expr::Object(deps) = &*deps.expr else {
        return None;
    };
    let mut dependencies = HashMap::new();
    for prop in &deps.props {
        let PropOrSpread::Prop(prop) = prop else {
            return None;
        };
        let Prop::KeyValue(kv) = &**prop else {
            return None;
        };
        let request = prop_name_str(&kv.key)?;
        // Packages excluded from the bundle map to `void 0`.
        if let Some(id) = id_of(&kv.value) {
            dependencies.insert(request, id);
        }
    }
    Some((function, dependencies))
}

fn id_of(expr: &Expr) -> Option<String> {
    as_number(expr)
        .map(number_to_string)
        .or_else(|| as_str(expr).map(str::to_string))
}
