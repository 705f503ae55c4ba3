pub mod ast;
pub mod codegen;
pub mod matchers;
pub mod parser;

pub use parser::{parse, Diagnostic, SyntaxTree};
pub use swc_core::ecma::ast as js;

/// Parses `source` and emits it again without any rewriting.
///
/// Useful wherever two snippets must be compared modulo formatting.
pub fn normalize(source: &str) -> Result<String, Box<dyn std::error::Error + Send + Sync>> {
    let tree = parse(source)?;
    Ok(codegen::generate(&tree)?)
}
