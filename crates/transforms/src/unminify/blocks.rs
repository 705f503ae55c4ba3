use crate::util::{take_stmt, Transform};
use decloak_core::ast::into_block;
use decloak_utils::errors::TransformError;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// Wraps the bodies of `if`, `else` and loops in braces.
///
/// `else if` chains are kept as they are.
pub struct BlockStatements;

#[derive(Default)]
struct Braces {
    changes: usize,
}

impl Braces {
    fn wrap(&mut self, body: &mut Stmt) {
        if matches!(body, Stmt::Block(_)) {
            return;
        }
        *body = Stmt::Block(into_block(take_stmt(body)));
        self.changes += 1;
    }
}

impl VisitMut for Braces {
    fn visit_mut_if_stmt(&mut self, stmt: &mut IfStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.cons);
        if let Some(alt) = &mut stmt.alt {
            if !matches!(**alt, Stmt::If(_)) {
                self.wrap(alt);
            }
        }
    }

    fn visit_mut_for_stmt(&mut self, stmt: &mut ForStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.body);
    }

    fn visit_mut_for_in_stmt(&mut self, stmt: &mut ForInStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.body);
    }

    fn visit_mut_for_of_stmt(&mut self, stmt: &mut ForOfStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.body);
    }

    fn visit_mut_while_stmt(&mut self, stmt: &mut WhileStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.body);
    }

    fn visit_mut_do_while_stmt(&mut self, stmt: &mut DoWhileStmt) {
        stmt.visit_mut_children_with(self);
        self.wrap(&mut stmt.body);
    }
}

impl Transform for BlockStatements {
    fn name(&self) -> &'static str {
        "block_statements"
    }

    fn apply(&self, module: &mut Module) -> Result<usize, TransformError> {
        let mut braces = Braces::default();
        module.visit_mut_with(&mut braces);
        Ok(braces.changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::testing::{assert_transform, assert_unchanged};

    #[test]
    fn test_wraps_bodies() {
        assert_transform(
            &BlockStatements,
            "if (a) b(); while (a) b(); for (;;) b(); for (const key in object) b(); for (const item of array) b(); do b(); while (a);",
            "if (a) { b(); } while (a) { b(); } for (;;) { b(); } for (const key in object) { b(); } for (const item of array) { b(); } do { b(); } while (a);",
        );
    }

    #[test]
    fn test_keeps_else_if_chains() {
        assert_transform(
            &BlockStatements,
            "if (a) b(); else if (c) d(); else e();",
            "if (a) { b(); } else if (c) { d(); } else { e(); }",
        );
    }

    #[test]
    fn test_empty_bodies() {
        assert_transform(&BlockStatements, "for (;;);", "for (;;) {}");
        assert_unchanged(&BlockStatements, "if (a) {} else {}");
    }
}
