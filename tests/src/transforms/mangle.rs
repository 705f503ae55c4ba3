use decloak_analysis::collect_metrics;
use decloak_core::codegen::generate;
use decloak_core::{normalize, parse};
use decloak_transform::mangle::{Mangle, NameFilter};
use decloak_transform::{apply, deobfuscate, MangleMode, Options};
use decloak_sandbox::Value;
use decloak_utils::errors::EvalError;
use std::sync::Arc;

#[test]
fn test_shadowed_bindings_stay_distinct() {
    let mut tree = parse(
        r#"
        var _0x1 = 1;
        function _0x2(_0x1) {
            return function () { var _0x1 = 2; return _0x1; }() + _0x1;
        }
        _0x2(_0x1);
        "#,
    )
    .unwrap();
    assert_eq!(apply(&mut tree.module, &Mangle::all()).unwrap(), 4);
    assert_eq!(
        generate(&tree).unwrap(),
        normalize(
            "var v = 1; function f(p) { return function () { var v2 = 2; return v2; }() + p; } f(v);"
        )
        .unwrap()
    );
}

#[test]
fn test_filter_lowers_generated_name_ratio() {
    let code = "function _0xab(_0xcd) { var count = _0xcd; return count; }";
    let mut tree = parse(code).unwrap();
    let before = collect_metrics(&tree.module);

    let filter: NameFilter = Arc::new(|name: &str| name.starts_with("_0x"));
    apply(&mut tree.module, &Mangle::with_filter(filter)).unwrap();
    let code = generate(&tree).unwrap();
    assert!(code.contains("var count = p"), "{code}");
    assert!(collect_metrics(&tree.module).unique_identifiers <= before.unique_identifiers);
}

#[tokio::test]
async fn test_pipeline_mangle_keeps_exports() {
    let refuse = |_: &str| -> Result<Value, EvalError> { Err(EvalError::Unsupported("test".into())) };
    let options = Options::default()
        .with_sandbox(Arc::new(refuse))
        .with_mangle(MangleMode::All);
    let result = deobfuscate("const value = 1; export { value }; export function run(arg) { return arg; }", options)
        .await
        .unwrap();
    assert_eq!(
        result.code,
        normalize("const v = 1; export { v as value }; export function run(p) { return p; }").unwrap()
    );
}
