//! Rewrites inside a module initializer function.
//!
//! Bundlers hand every module its `module`, `exports` and `require` as
//! (usually minified) parameters. Extraction renames them back, drops the
//! webpack runtime markers and turns `require.d` getters into `export`
//! declarations. Require calls are collected so the unpacker can build the
//! dependency graph and later point them at the assigned files.

use decloak_core::ast::{callee_expr, ident, is_member_named, str_lit, FunctionLike};
use swc_core::atoms::Atom;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitMut, VisitMutWith, VisitWith};
use tracing::debug;

/// Parameter roles of a module initializer, in declaration order.
pub(crate) const WEBPACK_PARAMS: [&str; 3] = ["module", "exports", "require"];
pub(crate) const BROWSERIFY_PARAMS: [&str; 3] = ["require", "module", "exports"];

/// Body and parameters of a module initializer function.
pub(crate) struct ModuleFunction {
    pub(crate) params: Vec<Option<Id>>,
    pub(crate) body: Vec<Stmt>,
}

impl ModuleFunction {
    pub(crate) fn from_expr(expr: &Expr) -> Option<Self> {
        let function = FunctionLike::from_expr(expr)?;
        let params = match function {
            FunctionLike::Function(f) => f.params.iter().map(|p| binding_id(&p.pat)).collect(),
            FunctionLike::Arrow(a) => a.params.iter().map(binding_id).collect(),
        };
        let body = match function {
            FunctionLike::Function(f) => f.body.as_ref()?.stmts.clone(),
            FunctionLike::Arrow(a) => match &*a.body {
                BlockStmtOrExpr::BlockStmt(block) => block.stmts.clone(),
                BlockStmtOrExpr::Expr(expr) => vec![Stmt::Expr(ExprStmt {
                    span: DUMMY_SP,
                    expr: expr.clone(),
                })],
            },
        };
        Some(Self { params, body })
    }

    /// Renames the parameters to their roles and converts the body into
    /// module items. Returns the binding `require` calls go through.
    pub(crate) fn into_module(self, roles: &[&str]) -> (Module, Option<Id>) {
        let mut body = self.body;
        let mut require = None;
        for (param, role) in self.params.iter().zip(roles) {
            let Some(id) = param else {
                continue;
            };
            let target = (Atom::from(*role), id.1);
            if id.0 != target.0 {
                if binds_other(&body, id, role) {
                    debug!("keeping parameter {} since '{role}' is taken", id.0);
                    if *role == "require" {
                        require = Some(id.clone());
                    }
                    continue;
                }
                body.visit_mut_with(&mut Renamer {
                    from: id.clone(),
                    to: target.0.clone(),
                });
            }
            if *role == "require" {
                require = Some(target);
            }
        }

        let mut items: Vec<ModuleItem> = Vec::with_capacity(body.len());
        for stmt in body {
            match require.as_ref().and_then(|r| runtime_helper(&stmt, r)) {
                Some(Helper::MarkEsModule) => {}
                Some(Helper::Exports(specifiers)) => {
                    items.push(ModuleItem::ModuleDecl(ModuleDecl::ExportNamed(NamedExport {
                        span: DUMMY_SP,
                        specifiers,
                        src: None,
                        type_only: false,
                        with: None,
                    })));
                }
                _ => items.push(ModuleItem::Stmt(stmt)),
            }
        }

        let module = Module {
            span: DUMMY_SP,
            body: items,
            shebang: None,
        };
        (module, require)
    }
}

fn binding_id(pat: &Pat) -> Option<Id> {
    match pat {
        Pat::Ident(binding) => Some(binding.id.to_id()),
        _ => None,
    }
}

/// True if `name` already means something other than `id` inside `body`.
fn binds_other(body: &[Stmt], id: &Id, name: &str) -> bool {
    struct Finder<'a> {
        id: &'a Id,
        name: &'a str,
        found: bool,
    }
    impl Visit for Finder<'_> {
        fn visit_ident(&mut self, i: &Ident) {
            if &*i.sym == self.name && i.ctxt != self.id.1 {
                self.found = true;
            }
        }
    }
    let mut finder = Finder {
        id,
        name,
        found: false,
    };
    body.visit_with(&mut finder);
    finder.found
}

/// Renames one resolved binding.
struct Renamer {
    from: Id,
    to: Atom,
}

impl VisitMut for Renamer {
    fn visit_mut_ident(&mut self, i: &mut Ident) {
        if i.sym == self.from.0 && i.ctxt == self.from.1 {
            i.sym = self.to.clone();
        }
    }

    fn visit_mut_prop(&mut self, prop: &mut Prop) {
        // `{ e }` keeps its key when `e` is renamed.
        if let Prop::Shorthand(i) = prop {
            if i.sym == self.from.0 && i.ctxt == self.from.1 {
                let key = PropName::Ident(IdentName::new(i.sym.clone(), i.span));
                let mut value = i.clone();
                value.sym = self.to.clone();
                *prop = Prop::KeyValue(KeyValueProp {
                    key,
                    value: Box::new(Expr::Ident(value)),
                });
                return;
            }
        }
        prop.visit_mut_children_with(self);
    }
}

enum Helper {
    /// `require.r(exports)`
    MarkEsModule,
    /// `require.d(exports, { name: () => local })`
    Exports(Vec<ExportSpecifier>),
}

fn is_require_member(expr: &Expr, require: &Id, prop: &str) -> bool {
    match expr {
        Expr::Member(m) if is_member_named(expr, prop) => {
            matches!(&*m.obj, Expr::Ident(i) if i.sym == require.0 && i.ctxt == require.1)
        }
        _ => false,
    }
}

fn runtime_helper(stmt: &Stmt, require: &Id) -> Option<Helper> {
    let Stmt::Expr(ExprStmt { expr, .. }) = stmt else {
        return None;
    };
    let Expr::Call(call) = &**expr else {
        return None;
    };
    let callee = callee_expr(call)?;
    if is_require_member(callee, require, "r") && call.args.len() == 1 {
        return Some(Helper::MarkEsModule);
    }
    if !is_require_member(callee, require, "d") {
        return None;
    }
    let specifiers = match call.args.as_slice() {
        // webpack 5: require.d(exports, { a: () => b })
        [_, getters] => {
            let Expr::Object(obj) = &*getters.expr else {
                return None;
            };
            obj.props
                .iter()
                .map(|prop| match prop {
                    PropOrSpread::Prop(prop) => match &**prop {
                        Prop::KeyValue(kv) => {
                            let name = decloak_core::ast::prop_name_str(&kv.key)?;
                            Some(specifier(&name, getter_target(&kv.value)?))
                        }
                        _ => None,
                    },
                    PropOrSpread::Spread(_) => None,
                })
                .collect::<Option<Vec<_>>>()?
        }
        // webpack 4: require.d(exports, "a", function () { return b; })
        [_, name, getter] => {
            let name = decloak_core::ast::as_str(&name.expr)?;
            vec![specifier(name, getter_target(&getter.expr)?)]
        }
        _ => return None,
    };
    Some(Helper::Exports(specifiers))
}

/// The local binding a getter returns.
fn getter_target(getter: &Expr) -> Option<&Ident> {
    let function = FunctionLike::from_expr(getter)?;
    let returned: &Expr = match function {
        FunctionLike::Arrow(a) => match &*a.body {
            BlockStmtOrExpr::Expr(expr) => expr,
            BlockStmtOrExpr::BlockStmt(block) => single_return(&block.stmts)?,
        },
        FunctionLike::Function(f) => single_return(&f.body.as_ref()?.stmts)?,
    };
    match returned {
        Expr::Ident(i) => Some(i),
        _ => None,
    }
}

fn single_return(stmts: &[Stmt]) -> Option<&Expr> {
    match stmts {
        [Stmt::Return(ReturnStmt { arg: Some(arg), .. })] => Some(arg),
        _ => None,
    }
}

fn specifier(exported: &str, local: &Ident) -> ExportSpecifier {
    let exported = (*local.sym != *exported).then(|| {
        if decloak_core::ast::is_identifier_name(exported) {
            ModuleExportName::Ident(ident(exported))
        } else {
            match str_lit(exported) {
                Expr::Lit(Lit::Str(s)) => ModuleExportName::Str(s),
                _ => ModuleExportName::Ident(ident(exported)),
            }
        }
    });
    ExportSpecifier::Named(ExportNamedSpecifier {
        span: DUMMY_SP,
        orig: ModuleExportName::Ident(local.clone()),
        exported,
        is_type_only: false,
    })
}

/// A `require(<literal>)` call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RequireCall {
    /// The literal argument as written: a module id or a request string.
    pub(crate) request: String,
    /// `x` in `var x = require(..)`.
    pub(crate) binding: Option<String>,
}

fn require_request(call: &CallExpr, require: &Id) -> Option<String> {
    let Expr::Ident(callee) = callee_expr(call)? else {
        return None;
    };
    if callee.sym != require.0 || callee.ctxt != require.1 {
        return None;
    }
    match call.args.as_slice() {
        [arg] if arg.spread.is_none() => match &*arg.expr {
            Expr::Lit(Lit::Str(s)) => Some(s.value.to_string()),
            Expr::Lit(Lit::Num(n)) => Some(decloak_core::ast::number_to_string(n.value)),
            _ => None,
        },
        _ => None,
    }
}

/// Every literal `require` call inside `module`, in source order.
pub(crate) fn collect_requires(module: &Module, require: &Id) -> Vec<RequireCall> {
    struct Collector<'a> {
        require: &'a Id,
        /// Name of the declarator whose initializer is visited next.
        binding: Option<String>,
        calls: Vec<RequireCall>,
    }
    impl Visit for Collector<'_> {
        fn visit_var_declarator(&mut self, decl: &VarDeclarator) {
            let direct = match (&decl.name, decl.init.as_deref()) {
                (Pat::Ident(name), Some(Expr::Call(call)))
                    if require_request(call, self.require).is_some() =>
                {
                    Some(name.id.sym.to_string())
                }
                _ => None,
            };
            self.binding = direct;
            decl.visit_children_with(self);
            self.binding = None;
        }

        fn visit_call_expr(&mut self, call: &CallExpr) {
            if let Some(request) = require_request(call, self.require) {
                let binding = self.binding.take();
                self.calls.push(RequireCall { request, binding });
            }
            call.visit_children_with(self);
        }
    }
    let mut collector = Collector {
        require,
        binding: None,
        calls: Vec::new(),
    };
    module.visit_with(&mut collector);
    collector.calls
}

/// Replaces require arguments with the string `rewrite` returns.
pub(crate) fn rewrite_requires(
    module: &mut Module,
    require: &Id,
    rewrite: impl Fn(&str) -> Option<String>,
) -> usize {
    struct Rewriter<'a, F> {
        require: &'a Id,
        rewrite: F,
        count: usize,
    }
    impl<F: Fn(&str) -> Option<String>> VisitMut for Rewriter<'_, F> {
        fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
            call.visit_mut_children_with(self);
            let Some(request) = require_request(call, self.require) else {
                return;
            };
            if let Some(path) = (self.rewrite)(&request) {
                call.args[0].expr = Box::new(str_lit(&path));
                self.count += 1;
            }
        }
    }
    let mut rewriter = Rewriter {
        require,
        rewrite,
        count: 0,
    };
    module.visit_mut_with(&mut rewriter);
    rewriter.count
}

#[cfg(test)]
mod tests {
    use super::*;
    use decloak_core::codegen::emit_module;
    use decloak_core::parse;
    use swc_core::common::{Globals, Mark, GLOBALS};
    use swc_core::ecma::transforms::base::resolver;

    fn extract(code: &str, roles: &[&str]) -> (String, Vec<RequireCall>) {
        GLOBALS.set(&Globals::new(), || {
            let mut tree = parse(code).unwrap();
            tree.module.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
            let ModuleItem::Stmt(Stmt::Expr(stmt)) = &tree.module.body[0] else {
                panic!("expected an expression statement");
            };
            let function = ModuleFunction::from_expr(&stmt.expr).unwrap();
            let (module, require) = function.into_module(roles);
            let requires = require
                .map(|r| collect_requires(&module, &r))
                .unwrap_or_default();
            (emit_module(&module, &tree.source_map).unwrap(), requires)
        })
    }

    fn normalized(code: &str) -> String {
        decloak_core::normalize(code).unwrap()
    }

    #[test]
    fn test_webpack_params_are_renamed() {
        let (code, requires) = extract(
            "(function (e, t, n) { var r = n(4); e.exports = { r, t }; })",
            &WEBPACK_PARAMS,
        );
        assert_eq!(
            code,
            normalized("var r = require(4); module.exports = { r, t: exports };")
        );
        assert_eq!(
            requires,
            vec![RequireCall {
                request: "4".into(),
                binding: Some("r".into()),
            }]
        );
    }

    #[test]
    fn test_taken_name_is_not_reused() {
        let (code, _) = extract(
            "(function (e, t, n) { var module = 1; e.exports = module; })",
            &WEBPACK_PARAMS,
        );
        assert!(code.contains("e.exports = module"), "{code}");
    }

    #[test]
    fn test_runtime_helpers_become_exports() {
        let (code, _) = extract(
            "((e, t, n) => { n.r(t); n.d(t, { default: () => a, foo: () => foo }); const a = 1; function foo() {} })",
            &WEBPACK_PARAMS,
        );
        assert_eq!(
            code,
            normalized("export { a as default, foo }; const a = 1; function foo() {}")
        );
    }

    #[test]
    fn test_webpack4_define_getter() {
        let (code, _) = extract(
            "(function (e, t, n) { n.d(t, \"a\", function () { return r; }); var r = 2; })",
            &WEBPACK_PARAMS,
        );
        assert_eq!(code, normalized("export { r as a }; var r = 2;"));
    }

    #[test]
    fn test_require_bindings() {
        let (_, requires) = extract(
            "(function (e, t, n) { const a = n(1), b = n(2).x; n(3); })",
            &WEBPACK_PARAMS,
        );
        let bindings: Vec<_> = requires
            .iter()
            .map(|r| (r.request.as_str(), r.binding.as_deref()))
            .collect();
        assert_eq!(bindings, vec![("1", Some("a")), ("2", None), ("3", None)]);
    }
}
