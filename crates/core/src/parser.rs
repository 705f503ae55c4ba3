//! decloak's single entry point for turning JavaScript text into a syntax tree.
//!
//! Parsing is error-recovering: diagnostics the parser can recover from are
//! collected on the [`SyntaxTree`] and logged, and only unrecoverable errors
//! surface as [`ParseError`]. Scripts are lifted into a module body so that
//! every later stage works on a single tree shape.

use decloak_utils::errors::ParseError;
use std::{fs, path::Path};
use swc_core::common::{sync::Lrc, FileName, SourceMap, Span, Spanned};
use swc_core::ecma::ast::{EsVersion, Module, ModuleItem, Program};
use swc_core::ecma::parser::{EsSyntax, Lexer, Parser, StringInput, Syntax};
use swc_core::ecma::transforms::base::fixer::paren_remover;
use swc_core::ecma::visit::VisitMutWith;
use tracing::{debug, warn};

/// A parsed program plus the source map its spans point into.
#[derive(Clone)]
pub struct SyntaxTree {
    /// The whole program. Scripts are stored as module bodies.
    pub module: Module,
    /// Source map shared with code generation.
    pub source_map: Lrc<SourceMap>,
    /// Recoverable errors reported while parsing.
    pub diagnostics: Vec<Diagnostic>,
}

impl std::fmt::Debug for SyntaxTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyntaxTree")
            .field("statements", &self.module.body.len())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl SyntaxTree {
    /// Wraps an already built module, e.g. one extracted from a bundle.
    pub fn from_module(module: Module, source_map: Lrc<SourceMap>) -> Self {
        Self {
            module,
            source_map,
            diagnostics: Vec::new(),
        }
    }
}

/// A recoverable parse error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

/// Parses JavaScript (with JSX) into a [`SyntaxTree`].
///
/// `javascript:` bookmarklets are decoded first. `return` outside of a
/// function is accepted since bundles and bookmarklets routinely contain it.
pub fn parse(source: &str) -> Result<SyntaxTree, ParseError> {
    let source = if is_bookmarklet(source) {
        debug!("Decoding javascript: bookmarklet");
        decode_bookmarklet(source)?
    } else {
        source.to_string()
    };

    let source_map: Lrc<SourceMap> = Default::default();
    let fm = source_map.new_source_file(FileName::Anon.into(), source);

    let syntax = Syntax::Es(EsSyntax {
        jsx: true,
        allow_return_outside_function: true,
        ..Default::default()
    });
    let lexer = Lexer::new(syntax, EsVersion::latest(), StringInput::from(&*fm), None);
    let mut parser = Parser::new_from(lexer);

    let program = parser.parse_program().map_err(|e| {
        let (line, column) = position(&source_map, e.span());
        ParseError::Syntax {
            line,
            column,
            msg: e.kind().msg().to_string(),
        }
    })?;

    let diagnostics: Vec<Diagnostic> = parser
        .take_errors()
        .into_iter()
        .map(|e| {
            let (line, column) = position(&source_map, e.span());
            Diagnostic {
                line,
                column,
                message: e.kind().msg().to_string(),
            }
        })
        .collect();
    if !diagnostics.is_empty() {
        warn!("Parsed with {} recoverable errors", diagnostics.len());
        for d in &diagnostics {
            debug!("  {}:{}: {}", d.line, d.column, d.message);
        }
    }

    let mut module = match program {
        Program::Module(module) => module,
        Program::Script(script) => Module {
            span: script.span,
            body: script.body.into_iter().map(ModuleItem::Stmt).collect(),
            shebang: script.shebang,
        },
    };
    module.visit_mut_with(&mut paren_remover(None));

    Ok(SyntaxTree {
        module,
        source_map,
        diagnostics,
    })
}

/// Reads and parses a file.
pub fn parse_file(path: &Path) -> Result<SyntaxTree, ParseError> {
    let source = fs::read_to_string(path).map_err(|e| ParseError::FileRead {
        path: path.display().to_string(),
        source: e,
    })?;
    parse(&source)
}

fn position(source_map: &SourceMap, span: Span) -> (usize, usize) {
    let loc = source_map.lookup_char_pos(span.lo);
    (loc.line, loc.col_display)
}

/// Returns true for `javascript:` URIs with a non-empty body.
pub fn is_bookmarklet(source: &str) -> bool {
    source
        .strip_prefix("javascript:")
        .is_some_and(|rest| !rest.is_empty() && !rest.starts_with('\n'))
}

/// Decodes a `javascript:` bookmarklet.
///
/// The scheme is stripped and the remainder is split on every `%` that does
/// not start a two-digit hex escape. Each segment is percent-decoded on its
/// own and the segments are joined with a literal `%`, so a stray `%` (e.g. a
/// modulo operator) survives decoding.
pub fn decode_bookmarklet(source: &str) -> Result<String, ParseError> {
    let body = source.strip_prefix("javascript:").unwrap_or(source);
    let bytes = body.as_bytes();

    let mut segments = Vec::new();
    let mut start = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'%' && !starts_escape(&bytes[i..]) {
            segments.push(&body[start..i]);
            start = i + 1;
        }
    }
    segments.push(&body[start..]);

    let decoded = segments
        .into_iter()
        .map(percent_decode)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(decoded.join("%"))
}

fn starts_escape(bytes: &[u8]) -> bool {
    bytes.len() >= 3 && bytes[1].is_ascii_hexdigit() && bytes[2].is_ascii_hexdigit()
}

/// Percent-decodes one segment with `decodeURIComponent` semantics.
pub fn percent_decode(segment: &str) -> Result<String, ParseError> {
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && starts_escape(&bytes[i..]) {
            let byte = hex::decode(&segment[i + 1..i + 3])
                .map_err(|e| ParseError::Bookmarklet(e.to_string()))?;
            out.extend_from_slice(&byte);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).map_err(|e| ParseError::Bookmarklet(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bookmarklet_detection() {
        assert!(is_bookmarklet("javascript:alert(1)"));
        assert!(!is_bookmarklet("javascript:"));
        assert!(!is_bookmarklet("alert(1)"));
    }

    #[test]
    fn test_decode_bookmarklet_keeps_bare_percent() {
        let decoded = decode_bookmarklet("javascript:alert(5%2)%3B%20x%25").unwrap();
        assert_eq!(decoded, "alert(5%2); x%");
    }

    #[test]
    fn test_decode_bookmarklet_utf8() {
        let decoded = decode_bookmarklet("javascript:%C3%A9").unwrap();
        assert_eq!(decoded, "é");
        assert!(decode_bookmarklet("javascript:%C3").is_err());
    }

    #[test]
    fn test_parse_script_as_module_body() {
        let tree = parse("var a = 1; a++;").unwrap();
        assert_eq!(tree.module.body.len(), 2);
        assert!(tree.diagnostics.is_empty());
    }

    #[test]
    fn test_parse_allows_top_level_return() {
        assert!(parse("return 1;").is_ok());
    }

    #[test]
    fn test_parse_fatal_error() {
        let err = parse("function (").unwrap_err();
        assert!(matches!(err, ParseError::Syntax { line: 1, .. }));
    }
}
