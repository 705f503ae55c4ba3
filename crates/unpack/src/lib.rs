//! Bundle unpacking.
//!
//! Runs on the already deobfuscated tree. When the top level matches a
//! known module loader (webpack 4/5, webpack chunks, browserify) the
//! registry is split into one [`BundleModule`] per initializer, a dependency
//! graph is built from the literal `require` calls, every module is given a
//! file path and the require arguments are rewritten to point at those files.
//! Everything else yields `None`.

pub mod browserify;
pub mod bundle;
pub mod graph;
pub mod paths;
pub mod require;
pub mod webpack;

pub use bundle::{Bundle, BundleKind, BundleModule};
pub use graph::ModuleGraph;

use decloak_core::matchers::Mappings;
use swc_core::common::{sync::Lrc, Globals, Mark, SourceMap, GLOBALS};
use swc_core::ecma::ast::Module;
use swc_core::ecma::transforms::base::resolver;
use swc_core::ecma::visit::VisitMutWith;
use tracing::debug;

/// Detects a bundle in `module` and extracts it.
///
/// `mappings` assign paths to modules that contain a matching expression;
/// the first matching entry wins over the default path.
pub fn unpack(module: &Module, source_map: &Lrc<SourceMap>, mappings: &Mappings) -> Option<Bundle> {
    GLOBALS.set(&Globals::new(), || {
        let mut module = module.clone();
        module.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));

        let (kind, modules, roles) = if let Some((kind, modules)) = webpack::detect(&module) {
            (kind, modules, &require::WEBPACK_PARAMS)
        } else if let Some(modules) = browserify::detect(&module) {
            (BundleKind::Browserify, modules, &require::BROWSERIFY_PARAMS)
        } else {
            debug!("No bundle detected");
            return None;
        };
        Some(Bundle::build(kind, modules, roles, source_map.clone(), mappings))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::matchers;
    use decloak_core::parse;

    fn unpack_source(code: &str, mappings: &Mappings) -> Option<Bundle> {
        let tree = parse(code).unwrap();
        unpack(&tree.module, &tree.source_map, mappings)
    }

    fn code(bundle: &Bundle, id: &str) -> String {
        bundle.code(id).unwrap().unwrap()
    }

    const WEBPACK4: &str = r##"
        (function (e) {
            var t = {};
            function n(r) {
                if (t[r]) return t[r].exports;
                var o = t[r] = { i: r, l: false, exports: {} };
                e[r].call(o.exports, o, o.exports, n);
                o.l = true;
                return o.exports;
            }
            return n(n.s = 2);
        })([
            function (e, t, n) { e.exports = function (a) { return /^#([0-9a-f]{3}){1,2}$/.test(a); }; },
            function (e, t, n) { var c = n(0); t.isColor = c; },
            function (e, t, n) { var u = n(1); console.log(u.isColor("#fff")); }
        ]);
    "##;

    #[test]
    fn test_webpack4_bundle() {
        let bundle = unpack_source(WEBPACK4, &Mappings::new()).unwrap();
        assert_eq!(bundle.kind, BundleKind::Webpack4);
        assert_eq!(bundle.modules.len(), 3);
        assert_eq!(bundle.modules["2"].path, "index.js");
        assert!(bundle.modules["2"].is_entry);
        assert_eq!(bundle.modules["0"].path, "0.js");
        assert!(code(&bundle, "2").contains(r#"require("./1.js")"#));
        assert!(code(&bundle, "1").contains("exports.isColor = c"));
    }

    #[test]
    fn test_mappings_override_default_paths() {
        let mappings = Mappings::new()
            .with("./nothing.js", matchers::string("never"))
            .with("./utils/color.js", matchers::regex_literal("^#([0-9a-f]{3}){1,2}$"));
        let bundle = unpack_source(WEBPACK4, &mappings).unwrap();
        assert_eq!(bundle.modules["0"].path, "utils/color.js");
        assert!(code(&bundle, "1").contains(r#"require("./utils/color.js")"#));
    }

    #[test]
    fn test_webpack5_bundle_with_inline_entry() {
        let src = r#"
            (() => {
                var e = {
                    10: (e, t, n) => { n.r(t); n.d(t, { default: () => r }); const r = 42; },
                };
                var t = {};
                function n(r) {
                    var o = t[r];
                    if (o !== undefined) return o.exports;
                    var i = t[r] = { exports: {} };
                    e[r](i, i.exports, n);
                    return i.exports;
                }
                (() => { n.d = (e, t) => {}; })();
                (() => { "use strict"; var a = n(10); console.log(a.default); })();
            })();
        "#;
        let bundle = unpack_source(src, &Mappings::new()).unwrap();
        assert_eq!(bundle.kind, BundleKind::Webpack5);
        assert_eq!(bundle.modules["entry"].path, "index.js");
        assert_eq!(bundle.modules["10"].path, "10.js");
        assert!(code(&bundle, "10").contains("export { r as default }"));
        assert!(code(&bundle, "entry").contains(r#"require("./10.js")"#));
    }

    #[test]
    fn test_webpack5_string_ids() {
        let src = r#"
            (() => {
                var e = {
                    "./src/a.js": (e, t, n) => { var m = n("./src/missing.js"); e.exports = m; },
                    "../node_modules/lib/index.js": (e) => { e.exports = 1; },
                };
                var t = {};
                function n(r) {
                    var o = t[r];
                    if (o !== undefined) return o.exports;
                    var i = t[r] = { exports: {} };
                    e[r](i, i.exports, n);
                    return i.exports;
                }
                (() => { var a = n("./src/a.js"); var l = n("../node_modules/lib/index.js"); })();
            })();
        "#;
        let bundle = unpack_source(src, &Mappings::new()).unwrap();
        assert_eq!(bundle.modules["./src/a.js"].path, "src/a.js");
        assert_eq!(bundle.modules["../node_modules/lib/index.js"].path, "node_modules/lib/index.js");

        let entry = code(&bundle, "entry");
        assert!(entry.contains(r#"require("./src/a.js")"#), "{entry}");
        assert!(entry.contains(r#"require("./node_modules/lib/index.js")"#), "{entry}");
        let bindings: Vec<_> = bundle
            .graph()
            .imports("entry")
            .into_iter()
            .map(|(dep, target)| (dep.binding.as_deref(), target))
            .collect();
        assert_eq!(
            bindings,
            vec![(Some("a"), "./src/a.js"), (Some("l"), "../node_modules/lib/index.js")]
        );

        let dir = tempfile::tempdir().unwrap();
        bundle.save(dir.path()).unwrap();
        assert!(dir.path().join("node_modules/lib/index.js").is_file());
    }

    #[test]
    fn test_requires_of_absent_modules_are_kept() {
        let src = r#"
            (function (e) {
                var t = {};
                function n(r) {
                    if (t[r]) return t[r].exports;
                    var o = t[r] = { i: r, l: false, exports: {} };
                    e[r].call(o.exports, o, o.exports, n);
                    o.l = true;
                    return o.exports;
                }
                return n(n.s = 0);
            })([
                function (e, t, n) { var a = n(1); var b = n(7); }
            , function (e) { e.exports = 1; }]);
        "#;
        let bundle = unpack_source(src, &Mappings::new()).unwrap();
        assert_eq!(bundle.graph().dependencies("0"), vec![("1", "1")]);
        let entry = code(&bundle, "0");
        assert!(entry.contains(r#"require("./1.js")"#), "{entry}");
        assert!(entry.contains("require(7)"), "{entry}");
    }

    #[test]
    fn test_browserify_bundle() {
        let src = r#"
            (function () { function r(e, n, t) { return e; } return r; })()({
                1: [function (require, module, exports) {
                    var a = require("./lib/a");
                    var react = require("react");
                }, { "./lib/a": 2, "react": 3 }],
                2: [function (require, module, exports) {
                    module.exports = require("../b");
                }, { "../b": 4 }],
                3: [function (require, module, exports) { module.exports = {}; }, {}],
                4: [function (require, module, exports) { module.exports = 4; }, {}]
            }, {}, [1]);
        "#;
        let bundle = unpack_source(src, &Mappings::new()).unwrap();
        assert_eq!(bundle.kind, BundleKind::Browserify);
        let path = |id: &str| bundle.modules[id].path.as_str();
        assert_eq!(path("1"), "index.js");
        assert_eq!(path("2"), "lib/a.js");
        assert_eq!(path("3"), "node_modules/react/index.js");
        assert_eq!(path("4"), "b.js");
        assert!(code(&bundle, "2").contains(r#"require("../b.js")"#));
        assert!(code(&bundle, "1").contains(r#"require("./node_modules/react/index.js")"#));
    }

    #[test]
    fn test_require_paths_resolve_back_to_their_modules() {
        let bundle = unpack_source(WEBPACK4, &Mappings::new()).unwrap();
        for module in bundle.modules.values() {
            for (_, target) in bundle.graph().dependencies(&module.id) {
                let expected = &bundle.modules[target].path;
                let request = paths::relative(&module.path, expected);
                assert_eq!(paths::join(&module.path, &request).as_ref(), Some(expected));
                assert!(code(&bundle, &module.id).contains(&format!("require(\"{request}\")")));
            }
        }
    }

    #[test]
    fn test_non_bundles_are_ignored() {
        assert!(unpack_source("console.log(1); (function () {})();", &Mappings::new()).is_none());
        assert!(unpack_source("[function () {}].forEach(f => f());", &Mappings::new()).is_none());
    }

    #[test]
    fn test_save_writes_modules() {
        let bundle = unpack_source(WEBPACK4, &Mappings::new()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        bundle.save(dir.path()).unwrap();
        for name in ["index.js", "0.js", "1.js"] {
            assert!(dir.path().join(name).is_file(), "{name} missing");
        }
    }
}
