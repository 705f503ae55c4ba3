use crate::init_tracing;
use decloak_core::matchers::{self, Mappings};
use decloak_core::normalize;
use decloak_sandbox::Value;
use decloak_transform::{deobfuscate, Options};
use decloak_unpack::BundleKind;
use decloak_utils::errors::EvalError;
use std::fs;
use std::sync::{Arc, Mutex};

fn options() -> Options {
    let refuse = |_: &str| -> Result<Value, EvalError> { Err(EvalError::Unsupported("test".into())) };
    Options::default().with_sandbox(Arc::new(refuse))
}

const WEBPACK4: &str = r##"
    (function (e) {
        var t = {};
        function n(r) {
            if (t[r]) return t[r].exports;
            var o = t[r] = { i: r, l: !1, exports: {} };
            return e[r].call(o.exports, o, o.exports, n), o.l = !0, o.exports;
        }
        n(n.s = 2);
    })([
        function (e, t, n) { e.exports = function (a) { return /^#([0-9a-f]{3}){1,2}$/.test(a); }; },
        function (e, t, n) { var c = n(0); t.isColor = c; },
        function (e, t, n) { var u = n(1); u.isColor("#fff") && console.log("ok"); }
    ]);
"##;

#[tokio::test]
async fn test_bundle_is_unpacked_and_saved() {
    init_tracing();
    let result = deobfuscate(WEBPACK4, options()).await.unwrap();
    let bundle = result.bundle.as_ref().expect("webpack bundle");
    assert_eq!(bundle.kind, BundleKind::Webpack4);
    assert_eq!(bundle.modules.len(), 3);

    let dir = tempfile::tempdir().unwrap();
    result.save(dir.path()).unwrap();
    assert_eq!(
        fs::read_to_string(dir.path().join("deobfuscated.js")).unwrap(),
        result.code
    );
    let entry = fs::read_to_string(dir.path().join("index.js")).unwrap();
    assert!(entry.contains(r#"require("./1.js")"#), "{entry}");
    assert!(entry.contains("if (u.isColor"), "{entry}");
    assert!(dir.path().join("0.js").exists());
}

#[tokio::test]
async fn test_mappings_name_modules() {
    let mappings = Mappings::new().with("lib/color.js", matchers::regex_literal("^#([0-9a-f]{3}){1,2}$"));
    let result = deobfuscate(WEBPACK4, options().with_mappings(mappings)).await.unwrap();
    let bundle = result.bundle.unwrap();
    assert_eq!(bundle.modules["0"].path, "lib/color.js");
    let requirer = bundle.code("1").unwrap().unwrap();
    assert!(requirer.contains(r#"require("./lib/color.js")"#), "{requirer}");
}

#[tokio::test]
async fn test_unpack_disabled_or_not_a_bundle() {
    let result = deobfuscate(WEBPACK4, options().with_unpack(false)).await.unwrap();
    assert!(result.bundle.is_none());

    let result = deobfuscate("console.log(1);", options()).await.unwrap();
    assert!(result.bundle.is_none());
}

#[tokio::test]
async fn test_jsx_and_progress() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let options = options().with_progress(Arc::new(move |p| sink.lock().unwrap().push(p)));
    let result = deobfuscate(
        r#"const App = () => React.createElement("main", { id: "root" }, React.createElement(Header, null));"#,
        options,
    )
    .await
    .unwrap();
    assert_eq!(
        result.code,
        normalize(r#"const App = () => <main id="root"><Header /></main>;"#).unwrap()
    );

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first(), Some(&0.0));
    assert_eq!(seen.last(), Some(&100.0));
}
