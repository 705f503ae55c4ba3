//! Renames bindings to short names derived from what they bind.
//!
//! Scopes come from swc's resolver, so two bindings that share a name in
//! different scopes are told apart. Every new name is unique in the whole
//! module, which rules out shadowing by construction. Exported declarations
//! keep their names; object shorthands and export specifiers are expanded so
//! the property and export names the outside world sees stay the same.

use crate::util::Transform;
use decloak_core::ast::is_binding_name;
use decloak_utils::errors::TransformError;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use swc_core::common::{Globals, Mark, SyntaxContext, DUMMY_SP, GLOBALS};
use swc_core::ecma::ast::*;
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

/// Predicate over original binding names; `true` means rename.
pub type NameFilter = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct Mangle {
    filter: Option<NameFilter>,
}

impl fmt::Debug for Mangle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mangle")
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

impl Mangle {
    /// Renames every binding.
    pub fn all() -> Self {
        Self::default()
    }

    /// Renames the bindings whose original name passes `filter`.
    pub fn with_filter(filter: NameFilter) -> Self {
        Self {
            filter: Some(filter),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Variable,
    Function,
    Class,
    Param,
    Catch,
}

impl Kind {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Variable => "v",
            Self::Function => "f",
            Self::Class => "C",
            Self::Param => "p",
            Self::Catch => "e",
        }
    }
}

#[derive(Default)]
struct PatBindings {
    ids: Vec<Id>,
}

impl Visit for PatBindings {
    fn visit_binding_ident(&mut self, binding: &BindingIdent) {
        self.ids.push(binding.id.to_id());
    }
}

fn pat_ids(pat: &Pat) -> Vec<Id> {
    let mut bindings = PatBindings::default();
    pat.visit_with(&mut bindings);
    bindings.ids
}

/// Bindings of a resolved module in declaration order.
#[derive(Default)]
pub(crate) struct Collector {
    bindings: Vec<(Id, Kind)>,
    pub(crate) seen: HashSet<Id>,
    pub(crate) exported: HashSet<Id>,
    pub(crate) symbols: HashSet<String>,
}

impl Collector {
    fn add(&mut self, id: Id, kind: Kind) {
        if self.seen.insert(id.clone()) {
            self.bindings.push((id, kind));
        }
    }

    fn add_pat(&mut self, pat: &Pat, kind: Kind) {
        for id in pat_ids(pat) {
            self.add(id, kind);
        }
    }
}

impl Visit for Collector {
    fn visit_ident(&mut self, ident: &Ident) {
        self.symbols.insert(ident.sym.to_string());
    }

    fn visit_export_decl(&mut self, export: &ExportDecl) {
        match &export.decl {
            Decl::Fn(f) => {
                self.exported.insert(f.ident.to_id());
            }
            Decl::Class(c) => {
                self.exported.insert(c.ident.to_id());
            }
            Decl::Var(var) => {
                for decl in &var.decls {
                    self.exported.extend(pat_ids(&decl.name));
                }
            }
            _ => {}
        }
        export.visit_children_with(self);
    }

    fn visit_export_default_decl(&mut self, export: &ExportDefaultDecl) {
        match &export.decl {
            DefaultDecl::Fn(FnExpr { ident: Some(i), .. }) | DefaultDecl::Class(ClassExpr { ident: Some(i), .. }) => {
                self.exported.insert(i.to_id());
            }
            _ => {}
        }
        export.visit_children_with(self);
    }

    fn visit_var_declarator(&mut self, decl: &VarDeclarator) {
        self.add_pat(&decl.name, Kind::Variable);
        decl.visit_children_with(self);
    }

    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        self.add(decl.ident.to_id(), Kind::Function);
        decl.visit_children_with(self);
    }

    fn visit_fn_expr(&mut self, expr: &FnExpr) {
        if let Some(ident) = &expr.ident {
            self.add(ident.to_id(), Kind::Function);
        }
        expr.visit_children_with(self);
    }

    fn visit_class_decl(&mut self, decl: &ClassDecl) {
        self.add(decl.ident.to_id(), Kind::Class);
        decl.visit_children_with(self);
    }

    fn visit_class_expr(&mut self, expr: &ClassExpr) {
        if let Some(ident) = &expr.ident {
            self.add(ident.to_id(), Kind::Class);
        }
        expr.visit_children_with(self);
    }

    fn visit_param(&mut self, param: &Param) {
        self.add_pat(&param.pat, Kind::Param);
        param.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, arrow: &ArrowExpr) {
        for pat in &arrow.params {
            self.add_pat(pat, Kind::Param);
        }
        arrow.visit_children_with(self);
    }

    fn visit_catch_clause(&mut self, clause: &CatchClause) {
        if let Some(pat) = &clause.param {
            self.add_pat(pat, Kind::Catch);
        }
        clause.visit_children_with(self);
    }
}

/// Hands out `v`, `v2`, `v3`, ... per prefix, skipping names in use.
struct Names {
    taken: HashSet<String>,
    counters: HashMap<&'static str, usize>,
}

impl Names {
    fn next(&mut self, prefix: &'static str) -> String {
        let counter = self.counters.entry(prefix).or_default();
        loop {
            *counter += 1;
            let name = match *counter {
                1 => prefix.to_string(),
                n => format!("{prefix}{n}"),
            };
            if is_binding_name(&name) && self.taken.insert(name.clone()) {
                return name;
            }
        }
    }
}

/// Renames resolved bindings, keeping property and export names intact.
pub(crate) struct Renamer<'a> {
    pub(crate) renames: &'a HashMap<Id, String>,
}

impl Renamer<'_> {
    fn renamed(&self, ident: &Ident) -> Option<Ident> {
        let name = self.renames.get(&ident.to_id())?;
        Some(Ident {
            sym: name.as_str().into(),
            ..ident.clone()
        })
    }
}

impl VisitMut for Renamer<'_> {
    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if let Some(renamed) = self.renamed(ident) {
            *ident = renamed;
        }
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        if let Prop::Shorthand(ident) = prop {
            if let Some(renamed) = self.renamed(ident) {
                *prop = Prop::KeyValue(KeyValueProp {
                    key: PropName::Ident(IdentName::new(ident.sym.clone(), DUMMY_SP)),
                    value: Box::new(Expr::Ident(renamed)),
                });
            }
            return;
        }
        prop.visit_mut_children_with(self);
    }

    fn visit_mut_object_pat_prop(&mut self, prop: &mut ObjectPatProp) {
        prop.visit_mut_children_with(self);
        // Children are renamed already; the key is rebuilt from the
        // original name.
        let ObjectPatProp::Assign(assign) = prop else {
            return;
        };
        let Some(original) = self
            .renames
            .iter()
            .find(|(id, name)| id.1 == assign.key.id.ctxt && **name == *assign.key.id.sym)
            .map(|(id, _)| id.0.clone())
        else {
            return;
        };
        let binding = Pat::Ident(assign.key.clone());
        let value = match assign.value.take() {
            Some(default) => Pat::Assign(AssignPat {
                span: DUMMY_SP,
                left: Box::new(binding),
                right: default,
            }),
            None => binding,
        };
        *prop = ObjectPatProp::KeyValue(KeyValuePatProp {
            key: PropName::Ident(IdentName::new(original, DUMMY_SP)),
            value: Box::new(value),
        });
    }

    fn visit_mut_export_named_specifier(&mut self, spec: &mut ExportNamedSpecifier) {
        let ModuleExportName::Ident(orig) = &mut spec.orig else {
            return;
        };
        let Some(renamed) = self.renamed(orig) else {
            return;
        };
        if spec.exported.is_none() {
            spec.exported = Some(ModuleExportName::Ident(Ident::new_no_ctxt(
                orig.sym.clone(),
                DUMMY_SP,
            )));
        }
        *orig = renamed;
    }
}

pub(crate) struct ClearContexts;

impl VisitMut for ClearContexts {
    fn visit_mut_syntax_context(&mut self, ctxt: &mut SyntaxContext) {
        *ctxt = SyntaxContext::empty();
    }
}

impl Transform for Mangle {
    fn name(&self) -> &'static str {
        "mangle"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let renamed = GLOBALS.set(&Globals::new(), || {
            module.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));

            let mut collector = Collector::default();
            module.visit_with(&mut collector);
            let mut names = Names {
                taken: collector.symbols,
                counters: HashMap::new(),
            };
            let renames: HashMap<Id, String> = collector
                .bindings
                .into_iter()
                .filter(|(id, _)| !collector.exported.contains(id))
                .filter(|(id, _)| self.filter.as_ref().map_or(true, |f| f(&id.0)))
                .map(|(id, kind)| {
                    let name = names.next(kind.prefix());
                    (id, name)
                })
                .collect();

            module.visit_mut_with(&mut Renamer { renames: &renames });
            module.visit_mut_with(&mut ClearContexts);
            renames.len()
        });
        debug!("renamed {renamed} bindings");
        Ok(renamed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_renames_by_kind() {
        assert_transform(
            &Mangle::all(),
            "function _0x1(_0x2) { var _0x3 = _0x2; try {} catch (_0x4) {} class _0x5 {} return _0x3; }",
            "function f(p) { var v = p; try {} catch (e) {} class C {} return v; }",
        );
    }

    #[test]
    fn test_separates_scopes_and_avoids_globals() {
        assert_transform(
            &Mangle::all(),
            "var a = v; function g() { var a = 2; return a; }",
            "var v2 = v; function f() { var v3 = 2; return v3; }",
        );
    }

    #[test]
    fn test_preserves_public_names() {
        assert_transform(
            &Mangle::all(),
            "const a = 1; const { b } = o; f({ a }); export { a }; export const c = b;",
            "const v = 1; const { b: v2 } = o; f({ a: v }); export { v as a }; export const c = v2;",
        );
    }

    #[test]
    fn test_filter_selects_names() {
        let filter: NameFilter = Arc::new(|name: &str| name.starts_with("_0x"));
        assert_transform(
            &Mangle::with_filter(filter.clone()),
            "var _0xab = 1, keep = _0xab;",
            "var v = 1, keep = v;",
        );
        assert_unchanged(&Mangle::with_filter(filter), "var keep = 1;");
    }
}
