//! Serialises syntax trees back to JavaScript text.
//!
//! Transforms build nodes without parentheses, so the tree is cloned and run
//! through the fixer before emission. The caller's tree is never touched.

use crate::parser::SyntaxTree;
use decloak_utils::errors::CodegenError;
use swc_core::common::{sync::Lrc, SourceMap};
use swc_core::ecma::ast::{EsVersion, Expr, ExprStmt, Module, ModuleItem, Stmt};
use swc_core::ecma::codegen::{text_writer::JsWriter, Config, Emitter};
use swc_core::ecma::transforms::base::fixer::fixer;
use swc_core::ecma::visit::VisitMutWith;

/// Emits the tree's module.
pub fn generate(tree: &SyntaxTree) -> Result<String, CodegenError> {
    emit_module(&tree.module, &tree.source_map)
}

/// Emits a module with a given source map.
pub fn emit_module(module: &Module, source_map: &Lrc<SourceMap>) -> Result<String, CodegenError> {
    let mut module = module.clone();
    module.visit_mut_with(&mut fixer(None));

    let mut buf = vec![];
    {
        let mut emitter = Emitter {
            cfg: Config::default().with_target(EsVersion::latest()),
            cm: source_map.clone(),
            comments: None,
            wr: JsWriter::new(source_map.clone(), "\n", &mut buf, None),
        };
        emitter.emit_module(&module)?;
    }

    Ok(String::from_utf8(buf)?)
}

/// Emits a single expression, without a trailing semicolon.
///
/// Used for log lines and for building sandbox fragments.
pub fn emit_expr(expr: &Expr, source_map: &Lrc<SourceMap>) -> Result<String, CodegenError> {
    let module = Module {
        span: Default::default(),
        body: vec![ModuleItem::Stmt(Stmt::Expr(ExprStmt {
            span: Default::default(),
            expr: Box::new(expr.clone()),
        }))],
        shebang: None,
    };
    let code = emit_module(&module, source_map)?;
    Ok(code.trim_end().trim_end_matches(';').to_string())
}

/// Emits a list of statements as a standalone program.
pub fn emit_stmts(stmts: &[Stmt], source_map: &Lrc<SourceMap>) -> Result<String, CodegenError> {
    let module = Module {
        span: Default::default(),
        body: stmts.iter().cloned().map(ModuleItem::Stmt).collect(),
        shebang: None,
    };
    emit_module(&module, source_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;

    #[test]
    fn test_roundtrip_is_stable() {
        let tree = parse("if (a) { b(); }").unwrap();
        let once = generate(&tree).unwrap();
        let twice = generate(&parse(&once).unwrap()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_emit_expr() {
        let tree = parse("a + b * c;").unwrap();
        let ModuleItem::Stmt(Stmt::Expr(stmt)) = &tree.module.body[0] else {
            panic!("expected expression statement");
        };
        assert_eq!(emit_expr(&stmt.expr, &tree.source_map).unwrap(), "a + b * c");
    }
}
