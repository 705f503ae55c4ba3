use decloak_sandbox::{IsolatedSandbox, Sandbox, SandboxLimits, Value, WorkerSandbox};
use decloak_utils::errors::EvalError;

const DECODER: &str = r#"
    var table = ["d2hlZQ==", "Zm9v"];
    function decode(i) { return atob(table[i]); }
    [decode(0), decode(1).toUpperCase(), String.fromCharCode(0x61, 0x62)]
"#;

fn strings(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect(),
        other => panic!("expected array, got {other:?}"),
    }
}

#[tokio::test]
async fn test_both_evaluators_agree() {
    let isolated = IsolatedSandbox::default().evaluate(DECODER).await.unwrap();
    let worker = WorkerSandbox::default().evaluate(DECODER).await.unwrap();
    assert_eq!(strings(isolated.clone()), vec!["whee", "FOO", "ab"]);
    assert_eq!(isolated, worker);
}

#[tokio::test]
async fn test_limits_are_not_catchable() {
    let limits = SandboxLimits::default().with_max_steps(10_000);
    for sandbox in [
        Box::new(IsolatedSandbox::new(limits)) as Box<dyn Sandbox>,
        Box::new(WorkerSandbox::new(limits)),
    ] {
        let err = sandbox
            .evaluate("try { while (true) {} } catch (e) { 'escaped' }")
            .await
            .unwrap_err();
        assert!(err.is_limit(), "{err}");
    }
}

#[tokio::test]
async fn test_host_capabilities_are_absent() {
    let sandbox = WorkerSandbox::default();
    for source in ["require('child_process')", "process.env", "fetch('https://example.com')"] {
        assert!(
            matches!(sandbox.evaluate(source).await, Err(EvalError::Reference(_))),
            "{source} should not resolve"
        );
    }
}
