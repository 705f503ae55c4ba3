use async_trait::async_trait;
use decloak_core::ast::{block, StmtLike};
use decloak_sandbox::Sandbox;
use decloak_utils::errors::TransformError;
use serde::{Deserialize, Serialize};
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// A named rewrite over the whole tree.
pub trait Transform: Send + Sync {
    /// Returns the transform's name for logging and identification.
    fn name(&self) -> &'static str;
    /// Applies the transform once, returning the number of rewrites performed.
    fn apply(&self, module: &mut Module) -> Result<usize, TransformError>;
}

/// A rewrite that needs the sandbox to compute replacement values.
#[async_trait]
pub trait AsyncTransform: Send + Sync {
    fn name(&self) -> &'static str;
    /// Applies the transform once. Sandbox evaluations are awaited one at a
    /// time.
    async fn apply(&self, module: &mut Module, sandbox: &dyn Sandbox)
        -> Result<usize, TransformError>;
}

/// Configuration for repeated application of transforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixpointConfig {
    /// Full sweeps before a group is reported as not converging.
    pub max_iterations: usize,
}

impl Default for FixpointConfig {
    fn default() -> Self {
        Self { max_iterations: 32 }
    }
}

impl FixpointConfig {
    pub const fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }
}

/// Post-order expression rewriting.
pub(crate) struct ExprRewriter<F> {
    rewrite: F,
    changes: usize,
}

impl<F: FnMut(&mut Expr) -> Option<Expr>> VisitMut for ExprRewriter<F> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);
        if let Some(replacement) = (self.rewrite)(expr) {
            *expr = replacement;
            self.changes += 1;
        }
    }
}

/// Replaces every expression for which `rewrite` returns a node, children
/// first. Returns the number of replacements.
pub(crate) fn rewrite_exprs<N, F>(node: &mut N, rewrite: F) -> usize
where
    N: VisitMutWith<ExprRewriter<F>> + ?Sized,
    F: FnMut(&mut Expr) -> Option<Expr>,
{
    let mut rewriter = ExprRewriter {
        rewrite,
        changes: 0,
    };
    node.visit_mut_with(&mut rewriter);
    rewriter.changes
}

/// Post-order statement rewriting, one statement for one statement.
struct StmtRewriter<F> {
    rewrite: F,
    changes: usize,
}

impl<F: FnMut(&mut Stmt) -> Option<Stmt>> VisitMut for StmtRewriter<F> {
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        if let Some(replacement) = (self.rewrite)(stmt) {
            *stmt = replacement;
            self.changes += 1;
        }
    }
}

pub(crate) fn rewrite_stmts(module: &mut Module, rewrite: impl FnMut(&mut Stmt) -> Option<Stmt>) -> usize {
    let mut rewriter = StmtRewriter {
        rewrite,
        changes: 0,
    };
    module.visit_mut_with(&mut rewriter);
    rewriter.changes
}

/// Replaces single statements with several.
///
/// Inside statement lists the replacement is spliced in place. Where only a
/// single statement is allowed (`if (a) stmt`, loop bodies) it is wrapped in
/// a block.
struct StmtSplitter<F> {
    split: F,
    changes: usize,
}

impl<F: FnMut(&mut Stmt) -> Option<Vec<Stmt>>> StmtSplitter<F> {
    fn splice<T: StmtLike>(&mut self, items: &mut Vec<T>) {
        let old = std::mem::take(items);
        items.reserve(old.len());
        for mut item in old {
            let replacement = item.as_stmt_mut().and_then(&mut self.split);
            match replacement {
                Some(stmts) => {
                    self.changes += 1;
                    items.extend(stmts.into_iter().map(T::from_stmt));
                }
                None => items.push(item),
            }
        }
    }
}

impl<F: FnMut(&mut Stmt) -> Option<Vec<Stmt>>> VisitMut for StmtSplitter<F> {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        for item in items.iter_mut() {
            match item {
                ModuleItem::Stmt(stmt) => stmt.visit_mut_children_with(self),
                ModuleItem::ModuleDecl(decl) => decl.visit_mut_with(self),
            }
        }
        self.splice(items);
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        for stmt in stmts.iter_mut() {
            stmt.visit_mut_children_with(self);
        }
        self.splice(stmts);
    }

    // Only reached for statements outside of lists.
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);
        if let Some(stmts) = (self.split)(stmt) {
            *stmt = Stmt::Block(block(stmts));
            self.changes += 1;
        }
    }
}

pub(crate) fn split_stmts(
    module: &mut Module,
    split: impl FnMut(&mut Stmt) -> Option<Vec<Stmt>>,
) -> usize {
    let mut splitter = StmtSplitter { split, changes: 0 };
    module.visit_mut_with(&mut splitter);
    splitter.changes
}

/// Statement lists, visited after their children.
///
/// Passes that look at neighbouring statements (a declaration followed by
/// its uses) implement this and get both module bodies and nested blocks.
pub(crate) trait StmtListPass {
    fn process(&mut self, stmts: &mut Vec<Stmt>) -> usize;
}

struct ListVisitor<'a, P: ?Sized> {
    pass: &'a mut P,
    changes: usize,
}

impl<P: StmtListPass + ?Sized> VisitMut for ListVisitor<'_, P> {
    fn visit_mut_module_items(&mut self, items: &mut Vec<ModuleItem>) {
        items.visit_mut_children_with(self);
        // Runs of plain statements are processed as lists; module
        // declarations split them.
        let old = std::mem::take(items);
        let mut run: Vec<Stmt> = Vec::new();
        for item in old {
            match item.into_stmt() {
                Ok(stmt) => run.push(stmt),
                Err(decl) => {
                    self.flush(&mut run, items);
                    items.push(decl);
                }
            }
        }
        self.flush(&mut run, items);
    }

    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);
        self.changes += self.pass.process(stmts);
    }
}

impl<P: StmtListPass + ?Sized> ListVisitor<'_, P> {
    fn flush(&mut self, run: &mut Vec<Stmt>, items: &mut Vec<ModuleItem>) {
        if run.is_empty() {
            return;
        }
        self.changes += self.pass.process(run);
        items.extend(run.drain(..).map(ModuleItem::Stmt));
    }
}

pub(crate) fn process_stmt_lists<P: StmtListPass + ?Sized>(module: &mut Module, pass: &mut P) -> usize {
    let mut visitor = ListVisitor { pass, changes: 0 };
    module.visit_mut_with(&mut visitor);
    visitor.changes
}

/// Moves a statement out, leaving an empty statement behind.
pub(crate) fn take_stmt(stmt: &mut Stmt) -> Stmt {
    std::mem::replace(stmt, Stmt::Empty(EmptyStmt { span: DUMMY_SP }))
}

/// Moves an expression out, leaving an invalid placeholder behind.
pub(crate) fn take_expr(expr: &mut Expr) -> Expr {
    std::mem::replace(expr, Expr::Invalid(Invalid { span: DUMMY_SP }))
}

/// The identifier declared by a single-declarator variable statement.
pub(crate) fn single_declarator(stmt: &Stmt) -> Option<(&VarDecl, &Ident, Option<&Expr>)> {
    let Stmt::Decl(Decl::Var(var)) = stmt else {
        return None;
    };
    let [decl] = var.decls.as_slice() else {
        return None;
    };
    let Pat::Ident(binding) = &decl.name else {
        return None;
    };
    Some((var, &binding.id, decl.init.as_deref()))
}

/// Expressions without side effects that are safe to duplicate or drop.
pub(crate) fn is_pure_operand(expr: &Expr) -> bool {
    match expr {
        Expr::Ident(_) | Expr::Lit(_) | Expr::This(_) => true,
        Expr::Unary(u) => u.op != UnaryOp::Delete && is_pure_operand(&u.arg),
        Expr::Member(m) => {
            is_pure_operand(&m.obj)
                && match &m.prop {
                    MemberProp::Computed(c) => is_pure_operand(&c.expr),
                    _ => true,
                }
        }
        _ => false,
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Helpers comparing the emitted form of a transformed snippet with the
    //! emitted form of the expected code.

    use super::Transform;
    use crate::pass::{apply, apply_many};
    use decloak_core::{codegen::generate, normalize, parse};

    pub(crate) fn run(unit: &dyn Transform, code: &str) -> (String, usize) {
        let mut tree = parse(code).unwrap();
        let changes = apply(&mut tree.module, unit).unwrap();
        (generate(&tree).unwrap(), changes)
    }

    /// Applies `unit` once and compares with `expected`.
    pub(crate) fn assert_transform(unit: &dyn Transform, code: &str, expected: &str) {
        let (actual, _) = run(unit, code);
        assert_eq!(actual, normalize(expected).unwrap(), "input: {code}");
    }

    /// Applies `unit` and asserts nothing changed.
    pub(crate) fn assert_unchanged(unit: &dyn Transform, code: &str) {
        let (actual, changes) = run(unit, code);
        assert_eq!(changes, 0, "unexpected rewrite of {code}");
        assert_eq!(actual, normalize(code).unwrap());
    }

    /// Runs a group to fixpoint and compares with `expected`.
    pub(crate) fn assert_fixpoint(units: &[Box<dyn Transform>], code: &str, expected: &str) {
        let mut tree = parse(code).unwrap();
        apply_many(&mut tree.module, units, &Default::default()).unwrap();
        assert_eq!(generate(&tree).unwrap(), normalize(expected).unwrap(), "input: {code}");
    }
}
