use crate::init_tracing;
use decloak_analysis::collect_metrics;
use decloak_core::{normalize, parse};
use decloak_sandbox::{IsolatedSandbox, SandboxLimits, Value, WorkerSandbox};
use decloak_transform::deobfuscate::{ControlFlowSwitch, DebugProtection, Deobfuscator};
use decloak_transform::{apply, apply_async, deobfuscate, FixpointConfig, Options};
use decloak_utils::errors::EvalError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Rotated string array, decoder and an alias, as obfuscator.io emits them.
const STRING_ARRAY: &str = r#"
    var _0x4a = ["hello", "log", "world"];
    (function (arr, n) {
        var rotate = function (k) { while (--k) { arr["push"](arr["shift"]()); } };
        rotate(++n);
    })(_0x4a, 0x1);
    var _0x1b = function (i, unused) {
        i = i - 0x0;
        return _0x4a[i];
    };
    function greet() {
        const d = _0x1b;
        console[d(0x0)](d(0x2) + " " + d(0x1));
    }
    greet();
"#;

#[tokio::test]
async fn test_string_array_through_pipeline() {
    init_tracing();
    let options = Options::default().with_sandbox(Arc::new(IsolatedSandbox::new(SandboxLimits::default())));
    let result = deobfuscate(STRING_ARRAY, options).await.unwrap();
    assert_eq!(
        result.code,
        normalize(r#"function greet() { console.log("hello world"); } greet();"#).unwrap()
    );
}

#[tokio::test]
async fn test_worker_sandbox_decodes_like_isolated() {
    let options = Options::default().with_sandbox(Arc::new(WorkerSandbox::new(SandboxLimits::default())));
    let result = deobfuscate(STRING_ARRAY, options).await.unwrap();
    assert!(result.code.contains(r#"console.log("hello world")"#), "{}", result.code);
}

#[tokio::test]
async fn test_failed_evaluations_leave_calls() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let refuse = move |_: &str| -> Result<Value, EvalError> {
        counter.fetch_add(1, Ordering::Relaxed);
        Err(EvalError::Unsupported("test".into()))
    };
    let mut tree = parse(STRING_ARRAY).unwrap();
    let unit = Deobfuscator::new(tree.source_map.clone(), FixpointConfig::default());
    apply_async(&mut tree.module, &unit, &refuse).await.unwrap();

    assert!(calls.load(Ordering::Relaxed) > 0);
    // Nothing decoded, so the array and its decoder must survive.
    let names = decloak_analysis::declared_names(&tree.module);
    assert!(names.contains("_0x4a"));
    assert!(names.contains("_0x1b"));
}

#[test]
fn test_control_flow_switch_reduces_statements() {
    let mut tree = parse(
        r#"
        function f() {
            var order = "2|0|1".split("|"), i = 0;
            while (true) {
                switch (order[i++]) {
                    case "0": b(); continue;
                    case "1": c(); continue;
                    case "2": a(); continue;
                }
                break;
            }
        }
        "#,
    )
    .unwrap();
    let before = collect_metrics(&tree.module);
    assert!(apply(&mut tree.module, &ControlFlowSwitch).unwrap() > 0);
    let after = collect_metrics(&tree.module);
    assert!(after.statements < before.statements);
    assert!(after.max_depth < before.max_depth);
}

#[tokio::test]
async fn test_debug_protection_removed_in_structural_stage() {
    let code = r#"
        (function () { _0xd(); })();
        setInterval(function () { _0xd(); }, 4000);
        function _0xd(c) {
            function inner(n) {
                if (typeof n === "string") {
                    return function (x) {}.constructor("while (true) {}").apply("counter");
                }
                (function () { return true; }).constructor("debugger").call("action");
                inner(++n);
            }
            try { if (c) { return inner; } inner(0); } catch (e) {}
        }
        main();
    "#;
    let mut tree = parse(code).unwrap();
    assert!(apply(&mut tree.module, &DebugProtection).unwrap() > 0);

    let options = Options::default().with_sandbox(Arc::new(IsolatedSandbox::default()));
    let result = deobfuscate(code, options).await.unwrap();
    assert_eq!(result.code, normalize("main();").unwrap());
}

#[tokio::test]
async fn test_stateful_array_functions_are_not_folded() {
    let code = r#"var queue = ["a", "b"]; function next() { return queue.shift(); } console.log(next(), next());"#;
    let options = Options::default().with_sandbox(Arc::new(IsolatedSandbox::new(SandboxLimits::default())));
    let result = deobfuscate(code, options).await.unwrap();
    assert!(result.code.contains("console.log(next(), next())"), "{}", result.code);
    assert!(result.code.contains("queue.shift()"), "{}", result.code);
}

#[tokio::test]
async fn test_merge_keeps_calls_that_read_the_object() {
    let code = "function f() { return o.x; } const o = {}; o.a = f();";
    let sandbox = |_: &str| -> Result<Value, EvalError> { Err(EvalError::Unsupported("test".into())) };
    let result = deobfuscate(code, Options::default().with_sandbox(Arc::new(sandbox))).await.unwrap();
    assert_eq!(result.code, normalize(code).unwrap());
}
