//! String decoders and the indirections obfuscators put in front of them.

use super::string_array::StringArray;
use crate::util::{rewrite_exprs, single_declarator, split_stmts};
use decloak_analysis::bindings::count_references;
use decloak_analysis::{assigned_names, reference_counts};
use decloak_core::ast::pat_ident_name;
use std::collections::{HashMap, HashSet};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};

/// A top-level function that reads the string array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decoder {
    pub(crate) name: String,
    pub(crate) index: usize,
}

/// Parameter names of a function and of every function nested in it.
#[derive(Default)]
struct ParamNames {
    names: HashSet<String>,
}

impl Visit for ParamNames {
    fn visit_param(&mut self, param: &Param) {
        self.names.extend(pat_ident_name(&param.pat).map(str::to_string));
        param.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        self.names
            .extend(arrow.params.iter().filter_map(pat_ident_name).map(str::to_string));
        arrow.visit_children_with(self);
    }
}

/// Looks for `x[..param..]`.
struct ParamIndex<'a> {
    params: &'a HashSet<String>,
    found: bool,
}

impl Visit for ParamIndex<'_> {
    fn visit_member_expr(&mut self, member: &MemberExpr) {
        if let MemberProp::Computed(prop) = &member.prop {
            let mut names = IdentNames::default();
            prop.expr.visit_with(&mut names);
            self.found |= names.names.iter().any(|n| self.params.contains(n));
        }
        member.visit_children_with(self);
    }
}

/// Decoders take an index and read the table with it, usually after
/// subtracting an offset: `function d(i) { i = i - 0x1b7; return t[i]; }`.
/// A function that only pops or shifts the array does not qualify.
fn indexes_by_param<N>(function: &N, arity: usize) -> bool
where
    N: VisitWith<ParamNames> + for<'a> VisitWith<ParamIndex<'a>>,
{
    if arity == 0 {
        return false;
    }
    let mut params = ParamNames::default();
    function.visit_with(&mut params);
    let mut index = ParamIndex {
        params: &params.names,
        found: false,
    };
    function.visit_with(&mut index);
    index.found
}

fn decoder_name(stmt: &Stmt, array: &str) -> Option<String> {
    if let Stmt::Decl(Decl::Fn(f)) = stmt {
        let function = &*f.function;
        return (count_references(function, array) > 0
            && indexes_by_param(function, function.params.len()))
        .then(|| f.ident.sym.to_string());
    }
    let (_, ident, Some(init)) = single_declarator(stmt)? else {
        return None;
    };
    let arity = match init {
        Expr::Fn(f) => f.function.params.len(),
        Expr::Arrow(a) => a.params.len(),
        _ => return None,
    };
    (count_references(init, array) > 0 && indexes_by_param(init, arity)).then(|| ident.sym.to_string())
}

pub(crate) fn find(module: &Module, array: &StringArray) -> Vec<Decoder> {
    module
        .body
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != array.index)
        .filter_map(|(index, item)| {
            let ModuleItem::Stmt(stmt) = item else {
                return None;
            };
            let name = decoder_name(stmt, &array.name)?;
            Some(Decoder { name, index })
        })
        .collect()
}

/// Literal arguments the sandbox can evaluate without any context.
pub(crate) fn is_constant(expr: &Expr) -> bool {
    match expr {
        Expr::Lit(Lit::Str(_) | Lit::Num(_) | Lit::Bool(_) | Lit::Null(_)) => true,
        Expr::Unary(u) => u.op != UnaryOp::Delete && is_constant(&u.arg),
        Expr::Bin(b) => is_constant(&b.left) && is_constant(&b.right),
        Expr::Paren(p) => is_constant(&p.expr),
        Expr::Tpl(t) => t.exprs.is_empty(),
        Expr::Array(a) => a
            .elems
            .iter()
            .all(|e| e.as_ref().is_some_and(|e| e.spread.is_none() && is_constant(&e.expr))),
        _ => false,
    }
}

#[derive(Default)]
struct AliasFinder<'a> {
    targets: &'a [String],
    assigned: HashSet<String>,
    aliases: HashMap<String, String>,
}

impl Visit for AliasFinder<'_> {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        if let Stmt::Decl(Decl::Var(var)) = stmt {
            for decl in &var.decls {
                let (Some(alias), Some(Expr::Ident(target))) =
                    (pat_ident_name(&decl.name), decl.init.as_deref())
                else {
                    continue;
                };
                if self.targets.iter().any(|t| *t == *target.sym) && !self.assigned.contains(alias) {
                    self.aliases.insert(alias.to_string(), target.sym.to_string());
                }
            }
        }
        stmt.visit_children_with(self);
    }
}

struct AliasInliner<'a> {
    aliases: &'a HashMap<String, String>,
    changes: usize,
}

impl AliasInliner<'_> {
    fn is_alias_decl(&self, decl: &VarDeclarator) -> bool {
        let (Some(alias), Some(Expr::Ident(target))) =
            (pat_ident_name(&decl.name), decl.init.as_deref())
        else {
            return false;
        };
        self.aliases.get(alias).is_some_and(|t| *t == *target.sym)
    }
}

impl VisitMut for AliasInliner<'_> {
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        if let Stmt::Decl(Decl::Var(var)) = stmt {
            let before = var.decls.len();
            var.decls.retain(|d| !self.is_alias_decl(d));
            self.changes += before - var.decls.len();
            if var.decls.is_empty() {
                let span = var.span;
                *stmt = Stmt::Empty(EmptyStmt { span });
                return;
            }
        }
        stmt.visit_mut_children_with(self);
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        stmts.retain(|s| !matches!(s, Stmt::Empty(_)));
    }

    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        items.visit_mut_children_with(self);
        items.retain(|i| !matches!(i, ModuleItem::Stmt(Stmt::Empty(_))));
    }

    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if let Some(target) = self.aliases.get(&*ident.sym) {
            ident.sym = target.as_str().into();
        }
    }
}

/// Replaces `const d2 = d;` aliases of `decoders` with the decoder itself.
/// Aliases that are reassigned anywhere are left alone.
pub(crate) fn inline_aliases(module: &mut Module, decoders: &[String]) -> usize {
    let mut total = 0;
    loop {
        let mut finder = AliasFinder {
            targets: decoders,
            assigned: assigned_names(&*module),
            ..Default::default()
        };
        module.visit_with(&mut finder);
        if finder.aliases.is_empty() {
            return total;
        }
        let mut inliner = AliasInliner {
            aliases: &finder.aliases,
            changes: 0,
        };
        module.visit_mut_with(&mut inliner);
        if inliner.changes == 0 {
            return total;
        }
        total += inliner.changes;
    }
}

/// `function w(a, b) { return d(b - 0x1b7, a); }`: a function that only
/// forwards to a decoder (or another wrapper) with its own parameters.
#[derive(Debug, Clone)]
struct Wrapper {
    params: Vec<String>,
    body: Expr,
}

#[derive(Default)]
struct IdentNames {
    names: Vec<String>,
    opaque: bool,
}

impl Visit for IdentNames {
    fn visit_ident(&mut self, ident: &Ident) {
        self.names.push(ident.sym.to_string());
    }

    fn visit_this_expr(&mut self, _: &ThisExpr) {
        self.opaque = true;
    }

    fn visit_function(&mut self, _: &Function) {
        self.opaque = true;
    }

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {
        self.opaque = true;
    }
}

fn wrapper_of(function: &Function, targets: &HashSet<String>) -> Option<Wrapper> {
    let params = function
        .params
        .iter()
        .map(|p| pat_ident_name(&p.pat).map(str::to_string))
        .collect::<Option<Vec<_>>>()?;
    let [Stmt::Return(ReturnStmt { arg: Some(body), .. })] = function.body.as_ref()?.stmts.as_slice()
    else {
        return None;
    };
    let Expr::Call(call) = &**body else {
        return None;
    };
    let Callee::Expr(callee) = &call.callee else {
        return None;
    };
    let Expr::Ident(callee) = &**callee else {
        return None;
    };
    if !targets.contains(&*callee.sym) || call.args.iter().any(|a| a.spread.is_some()) {
        return None;
    }
    let mut names = IdentNames::default();
    for arg in &call.args {
        arg.expr.visit_with(&mut names);
    }
    if names.opaque || names.names.iter().any(|n| !params.contains(n)) {
        return None;
    }
    Some(Wrapper {
        params,
        body: (**body).clone(),
    })
}

struct WrapperFinder<'a> {
    targets: &'a HashSet<String>,
    found: HashMap<String, Wrapper>,
}

impl WrapperFinder<'_> {
    fn consider(&mut self, name: &str, function: &Function) {
        if self.targets.contains(name) {
            return;
        }
        if let Some(wrapper) = wrapper_of(function, self.targets) {
            self.found.insert(name.to_string(), wrapper);
        }
    }
}

impl Visit for WrapperFinder<'_> {
    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        self.consider(&decl.ident.sym, &decl.function);
        decl.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, decl: &VarDeclarator) {
        if let (Some(name), Some(Expr::Fn(f))) = (pat_ident_name(&decl.name), decl.init.as_deref()) {
            self.consider(name, &f.function);
        }
        decl.visit_children_with(self);
    }
}

fn find_wrappers(module: &Module, decoders: &[String]) -> HashMap<String, Wrapper> {
    let mut targets: HashSet<String> = decoders.iter().cloned().collect();
    let mut wrappers = HashMap::new();
    loop {
        let mut finder = WrapperFinder {
            targets: &targets,
            found: HashMap::new(),
        };
        module.visit_with(&mut finder);
        let before = wrappers.len();
        for (name, wrapper) in finder.found {
            targets.insert(name.clone());
            wrappers.insert(name, wrapper);
        }
        if wrappers.len() == before {
            return wrappers;
        }
    }
}

struct Substitute<'a> {
    args: HashMap<&'a str, &'a Expr>,
}

impl VisitMut for Substitute<'_> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        if let Expr::Ident(ident) = expr {
            if let Some(arg) = self.args.get(&*ident.sym) {
                *expr = (*arg).clone();
            }
            return;
        }
        expr.visit_mut_children_with(self);
    }
}

fn expand(wrapper: &Wrapper, call: &CallExpr) -> Option<Expr> {
    if call.args.len() != wrapper.params.len()
        || call.args.iter().any(|a| a.spread.is_some() || !is_constant(&a.expr))
    {
        return None;
    }
    let mut body = wrapper.body.clone();
    let Expr::Call(inner) = &mut body else {
        return None;
    };
    let mut substitute = Substitute {
        args: wrapper
            .params
            .iter()
            .map(String::as_str)
            .zip(call.args.iter().map(|a| &*a.expr))
            .collect(),
    };
    inner.args.visit_mut_with(&mut substitute);
    Some(body)
}

fn wrapper_decl_name<'a>(stmt: &'a Stmt, wrappers: &HashMap<String, Wrapper>) -> Option<&'a str> {
    let name: &str = match stmt {
        Stmt::Decl(Decl::Fn(f)) => &*f.ident.sym,
        _ => match single_declarator(stmt)? {
            (_, ident, Some(Expr::Fn(_))) => &*ident.sym,
            _ => return None,
        },
    };
    wrappers.contains_key(name).then_some(name)
}

/// Inlines wrapper calls whose arguments are constant, then drops wrappers
/// nothing calls any more.
pub(crate) fn inline_wrappers(module: &mut Module, decoders: &[String]) -> usize {
    let wrappers = find_wrappers(module, decoders);
    if wrappers.is_empty() {
        return 0;
    }
    let mut total = 0;
    // Each round peels one level off wrapper chains.
    for _ in 0..=wrappers.len() {
        let changes = rewrite_exprs(module, |expr| {
            let Expr::Call(call) = expr else {
                return None;
            };
            let Callee::Expr(callee) = &call.callee else {
                return None;
            };
            let Expr::Ident(callee) = &**callee else {
                return None;
            };
            expand(wrappers.get(&*callee.sym)?, call)
        });
        if changes == 0 {
            break;
        }
        total += changes;
    }
    loop {
        let counts = reference_counts(&*module);
        let removed = split_stmts(module, |stmt| {
            let name = wrapper_decl_name(stmt, &wrappers)?;
            (counts.get(name) == count_references(&*stmt, name)).then(Vec::new)
        });
        if removed == 0 {
            return total;
        }
        total += removed;
    }
}
