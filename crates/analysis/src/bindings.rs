//! Name-level binding and reference analysis.
//!
//! The deobfuscation passes only need coarse answers ("is this helper still
//! used anywhere", "is this alias ever reassigned"), so the analysis works on
//! identifier names rather than resolved scopes. Obfuscators emit globally
//! unique hex names, which makes the approximation safe in practice.

use std::collections::{HashMap, HashSet};
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

/// Number of identifier occurrences per name, declarations included.
#[derive(Debug, Clone, Default)]
pub struct ReferenceCounts {
    counts: HashMap<String, usize>,
}

impl ReferenceCounts {
    pub fn get(&self, name: &str) -> usize {
        self.counts.get(name).copied().unwrap_or(0)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.counts.keys().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.counts.contains_key(name)
    }
}

/// Counts identifier occurrences. Property names are not identifiers and are
/// not counted.
#[derive(Debug, Default)]
pub struct IdentCounter {
    counts: HashMap<String, usize>,
}

impl Visit for IdentCounter {
    fn visit_ident(&mut self, ident: &Ident) {
        *self.counts.entry(ident.sym.to_string()).or_default() += 1;
    }
}

pub fn reference_counts<N: VisitWith<IdentCounter>>(node: &N) -> ReferenceCounts {
    let mut counter = IdentCounter::default();
    node.visit_with(&mut counter);
    ReferenceCounts {
        counts: counter.counts,
    }
}

/// Occurrences of one name inside `node`.
pub fn count_references<N: VisitWith<IdentCounter>>(node: &N, name: &str) -> usize {
    reference_counts(node).get(name)
}

/// Collects every declared binding name.
#[derive(Debug, Default)]
pub struct DeclCollector {
    names: HashSet<String>,
}

impl Visit for DeclCollector {
    fn visit_binding_ident(&mut self, binding: &BindingIdent) {
        self.names.insert(binding.id.sym.to_string());
    }

    fn visit_simple_assign_target(&mut self, target: &SimpleAssignTarget) {
        // `a = 1` stores into a BindingIdent but declares nothing.
        if let SimpleAssignTarget::Ident(_) = target {
            return;
        }
        target.visit_children_with(self);
    }

    fn visit_fn_decl(&mut self, decl: &FnDecl) {
        self.names.insert(decl.ident.sym.to_string());
        decl.visit_children_with(self);
    }

    fn visit_fn_expr(&mut self, expr: &FnExpr) {
        if let Some(ident) = &expr.ident {
            self.names.insert(ident.sym.to_string());
        }
        expr.visit_children_with(self);
    }

    fn visit_class_decl(&mut self, decl: &ClassDecl) {
        self.names.insert(decl.ident.sym.to_string());
        decl.visit_children_with(self);
    }

    fn visit_class_expr(&mut self, expr: &ClassExpr) {
        if let Some(ident) = &expr.ident {
            self.names.insert(ident.sym.to_string());
        }
        expr.visit_children_with(self);
    }

    fn visit_import_named_specifier(&mut self, spec: &ImportNamedSpecifier) {
        self.names.insert(spec.local.sym.to_string());
    }

    fn visit_import_default_specifier(&mut self, spec: &ImportDefaultSpecifier) {
        self.names.insert(spec.local.sym.to_string());
    }

    fn visit_import_star_as_specifier(&mut self, spec: &ImportStarAsSpecifier) {
        self.names.insert(spec.local.sym.to_string());
    }
}

pub fn declared_names<N: VisitWith<DeclCollector>>(node: &N) -> HashSet<String> {
    let mut collector = DeclCollector::default();
    node.visit_with(&mut collector);
    collector.names
}

/// Collects names that are written after their declaration.
#[derive(Debug, Default)]
pub struct AssignCollector {
    names: HashSet<String>,
}

impl Visit for AssignCollector {
    fn visit_assign_expr(&mut self, expr: &AssignExpr) {
        match &expr.left {
            AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => {
                self.names.insert(binding.id.sym.to_string());
            }
            AssignTarget::Pat(pat) => {
                let mut decls = DeclCollector::default();
                pat.visit_with(&mut decls);
                self.names.extend(decls.names);
            }
            AssignTarget::Simple(_) => {}
        }
        expr.visit_children_with(self);
    }

    fn visit_update_expr(&mut self, expr: &UpdateExpr) {
        if let Expr::Ident(ident) = &*expr.arg {
            self.names.insert(ident.sym.to_string());
        }
        expr.visit_children_with(self);
    }

    fn visit_for_head(&mut self, head: &ForHead) {
        if let ForHead::Pat(pat) = head {
            let mut decls = DeclCollector::default();
            pat.visit_with(&mut decls);
            self.names.extend(decls.names);
        }
        head.visit_children_with(self);
    }
}

pub fn assigned_names<N: VisitWith<AssignCollector>>(node: &N) -> HashSet<String> {
    let mut collector = AssignCollector::default();
    node.visit_with(&mut collector);
    collector.names
}

/// True if `name` occurs in `node` more often than `own_occurrences`, i.e. it
/// is used somewhere besides the occurrences the caller already accounts for.
pub fn is_referenced_outside<N: VisitWith<IdentCounter>>(
    node: &N,
    name: &str,
    own_occurrences: usize,
) -> bool {
    count_references(node, name) > own_occurrences
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::parse;

    #[test]
    fn test_reference_counts_skip_properties() {
        let tree = parse("var a = 1; a.a = a; b({ a });").unwrap();
        let counts = reference_counts(&tree.module);
        assert_eq!(counts.get("a"), 4);
        assert_eq!(counts.get("b"), 1);
    }

    #[test]
    fn test_declared_names() {
        let tree = parse(
            "var a; function f(p, { q }) { let [r] = []; } class C {} x = 1; try {} catch (e) {}",
        )
        .unwrap();
        let names = declared_names(&tree.module);
        for n in ["a", "f", "p", "q", "r", "C", "e"] {
            assert!(names.contains(n), "missing {n}");
        }
        assert!(!names.contains("x"));
    }

    #[test]
    fn test_assigned_names() {
        let tree = parse("var a = 1, b = 2, c; a = 3; b++; for (c in o);").unwrap();
        let names = assigned_names(&tree.module);
        assert!(names.contains("a"));
        assert!(names.contains("b"));
        assert!(names.contains("c"));
    }
}
