use decloak_core::codegen::generate;
use decloak_core::{normalize, parse};
use decloak_transform::unminify::{self, ExtractTernaryCalls, Sequence};
use decloak_transform::{apply, apply_many, transpile, FixpointConfig, Transform};

fn unminify(code: &str) -> String {
    let mut tree = parse(code).unwrap();
    let cfg = FixpointConfig::default();
    apply_many(&mut tree.module, &transpile::rules(), &cfg).unwrap();
    apply_many(&mut tree.module, &unminify::rules(), &cfg).unwrap();
    generate(&tree).unwrap()
}

const MINIFIED: &str = r#"
    var a = 1, b = !0;
    function f(x) {
        return x === null || x === void 0 ? void 0 : x.y;
    }
    "u" > typeof window && (a = 0x10, b = !1);
    for (;;) if ("x" == c) break; else c = "\x61".concat(c, "b");
    x = o["key"] + 1 / 0;
"#;

#[test]
fn test_rule_set_output() {
    assert_eq!(
        unminify(MINIFIED),
        normalize(
            r#"
            var a = 1;
            var b = true;
            function f(x) {
                return x?.y;
            }
            if (typeof window !== "undefined") {
                a = 16;
                b = false;
            }
            while (true) {
                if (c == "x") {
                    break;
                } else {
                    c = `a${c}b`;
                }
            }
            x = o.key + Infinity;
            "#
        )
        .unwrap()
    );
}

#[test]
fn test_rule_set_is_idempotent() {
    let once = unminify(MINIFIED);
    let mut tree = parse(&once).unwrap();
    let cfg = FixpointConfig::default();
    assert_eq!(apply_many(&mut tree.module, &transpile::rules(), &cfg).unwrap(), 0);
    assert_eq!(apply_many(&mut tree.module, &unminify::rules(), &cfg).unwrap(), 0);
    assert_eq!(generate(&tree).unwrap(), once);
}

#[test]
fn test_sequence_in_for_in_head() {
    let mut tree = parse("for (let k in (a = 1, object)) {}").unwrap();
    assert!(apply(&mut tree.module, &Sequence).unwrap() > 0);
    assert_eq!(
        generate(&tree).unwrap(),
        normalize("a = 1; for (let k in object) {}").unwrap()
    );
}

#[test]
fn test_ternary_call_extraction_filter() {
    let code = "e(c ? 1 : 2); d(c ? 1 : 2);";
    let run = |unit: &dyn Transform| {
        let mut tree = parse(code).unwrap();
        apply(&mut tree.module, unit).unwrap();
        generate(&tree).unwrap()
    };
    assert_eq!(
        run(&ExtractTernaryCalls::with_callee("d")),
        normalize("e(c ? 1 : 2); c ? d(1) : d(2);").unwrap()
    );
    assert_eq!(
        run(&ExtractTernaryCalls::new()),
        normalize("c ? e(1) : e(2); c ? d(1) : d(2);").unwrap()
    );
}
