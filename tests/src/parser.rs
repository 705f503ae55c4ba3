use decloak_core::codegen::generate;
use decloak_core::parser::parse_file;
use decloak_core::{normalize, parse};
use decloak_utils::errors::ParseError;

#[test]
fn test_parentheses_are_normalized() {
    assert_eq!(normalize("x = ((a));").unwrap(), normalize("x = a;").unwrap());
    let code = normalize("x = (a + b) * c;").unwrap();
    assert!(code.contains("(a + b) * c"), "{code}");
}

#[test]
fn test_jsx_round_trips() {
    let code = normalize(r#"x = <div className="a">{y}</div>;"#).unwrap();
    assert!(code.contains(r#"<div className="a">{y}</div>"#), "{code}");
}

#[test]
fn test_bookmarklet_is_decoded_before_parsing() {
    let tree = parse("javascript:void%20alert(%22a%25b%22)").unwrap();
    assert_eq!(generate(&tree).unwrap(), normalize(r#"void alert("a%b");"#).unwrap());
}

#[test]
fn test_parse_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.js");
    std::fs::write(&path, "let a = 1;\nexport default a;").unwrap();
    let tree = parse_file(&path).unwrap();
    assert_eq!(tree.module.body.len(), 2);

    let missing = parse_file(&dir.path().join("missing.js")).unwrap_err();
    assert!(matches!(missing, ParseError::FileRead { .. }));
}
