/// Module for computing readability metrics used to evaluate deobfuscation stages.
///
/// Implements a minimal set of metrics quantified by statement count, nesting
/// depth and identifier shape to summarise how far a stage moved the tree
/// toward readable code. The pipeline collects metrics before and after each
/// stage and logs the delta; the numbers never influence which rewrites run.
///
/// # Usage
/// ```rust,ignore
/// let tree = decloak_core::parse("var _0x1a2b = 1;").unwrap();
/// let metrics = metrics::collect_metrics(&tree.module);
/// println!("{metrics:?}");
/// ```
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};
use tracing::trace;

/// Represents a set of analytical metrics for a syntax tree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of statements, at any nesting level.
    pub statements: usize,
    /// Number of function-like nodes.
    pub functions: usize,
    /// Number of identifier occurrences.
    pub identifiers: usize,
    /// Number of distinct identifier names.
    pub unique_identifiers: usize,
    /// Fraction of distinct names that look generated (`_0x1f2e`, `a1`).
    pub generated_name_ratio: f64,
    /// Deepest statement nesting.
    pub max_depth: usize,
    /// Composite readability score (higher is more readable).
    pub readability: f64,
}

#[derive(Default)]
struct Collector {
    statements: usize,
    functions: usize,
    identifiers: usize,
    names: HashSet<String>,
    depth: usize,
    max_depth: usize,
}

impl Visit for Collector {
    fn visit_stmt(&mut self, stmt: &Stmt) {
        self.statements += 1;
        self.depth += 1;
        self.max_depth = self.max_depth.max(self.depth);
        stmt.visit_children_with(self);
        self.depth -= 1;
    }

    fn visit_function(&mut self, f: &Function) {
        self.functions += 1;
        f.visit_children_with(self);
    }

    fn visit_arrow_expr(&mut self, a: &ArrowExpr) {
        self.functions += 1;
        a.visit_children_with(self);
    }

    fn visit_ident(&mut self, ident: &Ident) {
        self.identifiers += 1;
        self.names.insert(ident.sym.to_string());
    }
}

/// Heuristic for names produced by obfuscators and minifiers.
pub fn is_generated_name(name: &str) -> bool {
    if let Some(hex) = name.strip_prefix("_0x") {
        return !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit());
    }
    let letters = name.chars().filter(|c| c.is_ascii_alphabetic()).count();
    name.len() <= 2 && letters <= 2
}

/// Collects metrics for a module.
pub fn collect_metrics(module: &Module) -> Metrics {
    let mut c = Collector::default();
    module.visit_with(&mut c);

    let generated = c.names.iter().filter(|n| is_generated_name(n)).count();
    let generated_name_ratio = if c.names.is_empty() {
        0.0
    } else {
        generated as f64 / c.names.len() as f64
    };
    let avg_len = if c.names.is_empty() {
        0.0
    } else {
        c.names.iter().map(String::len).sum::<usize>() as f64 / c.names.len() as f64
    };

    let metrics = Metrics {
        statements: c.statements,
        functions: c.functions,
        identifiers: c.identifiers,
        unique_identifiers: c.names.len(),
        generated_name_ratio,
        max_depth: c.max_depth,
        readability: score(avg_len, generated_name_ratio, c.max_depth),
    };
    trace!(
        "{} statements, {} names ({generated} generated), depth {}",
        metrics.statements,
        metrics.unique_identifiers,
        metrics.max_depth
    );
    metrics
}

/// Rewards descriptive names and penalises generated names and deep nesting.
/// Weights are tuned by eye against obfuscator.io and terser output.
fn score(avg_name_len: f64, generated_ratio: f64, max_depth: usize) -> f64 {
    10.0 * avg_name_len.ln_1p() - 20.0 * generated_ratio - 0.5 * max_depth as f64
}

/// Difference in readability between two snapshots (positive is better).
pub fn compare(before: &Metrics, after: &Metrics) -> f64 {
    after.readability - before.readability
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::parse;

    #[test]
    fn test_generated_names() {
        assert!(is_generated_name("_0x1f2e"));
        assert!(is_generated_name("a"));
        assert!(is_generated_name("e1"));
        assert!(!is_generated_name("_0x"));
        assert!(!is_generated_name("counter"));
    }

    #[test]
    fn test_collect_metrics() {
        let tree = parse("function f(a) { if (a) { return a; } }").unwrap();
        let m = collect_metrics(&tree.module);
        assert_eq!(m.functions, 1);
        assert_eq!(m.statements, 4);
        assert_eq!(m.max_depth, 4);
        assert_eq!(m.unique_identifiers, 2);
        assert_eq!(m.generated_name_ratio, 1.0);
    }

    #[test]
    fn test_compare_prefers_readable_names() {
        let obfuscated = collect_metrics(&parse("var _0x1a = 1;").unwrap().module);
        let readable = collect_metrics(&parse("var counter = 1;").unwrap().module);
        assert!(compare(&obfuscated, &readable) > 0.0);
    }
}
