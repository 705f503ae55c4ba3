//! Statement execution.

use super::scope::{self, Scope, ScopeKind, ScopeRef};
use super::value::{Body, Callable, Class as ObjectClass, Closure, JsValue};
use super::{Abrupt, Interpreter};
use decloak_utils::errors::EvalError;
use std::rc::Rc;
use swc_core::ecma::ast::*;
use swc_core::ecma::visit::{Visit, VisitWith};

/// Outcome of a statement that did not throw.
#[derive(Debug)]
pub(crate) enum Completion {
    Normal,
    Return(JsValue),
    Break(Option<String>),
    Continue(Option<String>),
}

/// How a pattern introduces its names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BindMode {
    /// `var`: writes the hoisted binding in the function scope.
    Var,
    /// `let`/`const`/parameters/catch: declares in the given scope.
    Lexical,
    /// Plain assignment to existing bindings.
    Assign,
}

/// `var` names declared directly in a function body, nested blocks included.
#[derive(Default)]
struct VarNames(Vec<String>);

impl Visit for VarNames {
    fn visit_var_decl(&mut self, decl: &VarDecl) {
        if decl.kind == VarDeclKind::Var {
            for d in &decl.decls {
                let mut names = BindingNames::default();
                d.name.visit_with(&mut names);
                self.0.extend(names.0);
            }
        }
        decl.visit_children_with(self);
    }

    fn visit_function(&mut self, _: &Function) {}

    fn visit_arrow_expr(&mut self, _: &ArrowExpr) {}

    fn visit_class(&mut self, _: &Class) {}
}

#[derive(Default)]
struct BindingNames(Vec<String>);

impl Visit for BindingNames {
    fn visit_binding_ident(&mut self, binding: &BindingIdent) {
        self.0.push(binding.id.sym.to_string());
    }

    fn visit_expr(&mut self, _: &Expr) {}
}

fn loop_matches(labels: &[String], label: &Option<String>) -> bool {
    match label {
        None => true,
        Some(l) => labels.contains(l),
    }
}

/// What a loop does with its body's completion.
enum LoopStep {
    Next,
    Exit(Completion),
}

fn loop_step(completion: Completion, labels: &[String]) -> LoopStep {
    match completion {
        Completion::Normal => LoopStep::Next,
        Completion::Continue(label) if loop_matches(labels, &label) => LoopStep::Next,
        Completion::Break(label) if loop_matches(labels, &label) => LoopStep::Exit(Completion::Normal),
        other => LoopStep::Exit(other),
    }
}

impl Interpreter {
    pub(crate) fn hoist_vars(&mut self, stmts: &[Stmt], scope: &ScopeRef) {
        let mut names = VarNames::default();
        for stmt in stmts {
            stmt.visit_with(&mut names);
        }
        let target = scope::function_scope(scope);
        for name in names.0 {
            scope::declare_hoisted(&target, &name);
        }
    }

    /// Function declarations of one statement list are initialised before
    /// the list runs.
    pub(crate) fn hoist_functions(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Result<(), Abrupt> {
        for stmt in stmts {
            if let Stmt::Decl(Decl::Fn(decl)) = stmt {
                let function = self.make_function(&decl.ident.sym, &decl.function, scope)?;
                scope::declare(scope, &decl.ident.sym, function);
            }
        }
        Ok(())
    }

    pub(crate) fn make_function(
        &mut self,
        name: &str,
        function: &Function,
        scope: &ScopeRef,
    ) -> Result<JsValue, Abrupt> {
        if function.is_generator || function.is_async {
            return Err(EvalError::Unsupported("generator and async functions".to_string()).into());
        }
        let body = function
            .body
            .as_ref()
            .map(|b| b.stmts.clone())
            .unwrap_or_default();
        Ok(self.make_closure(Closure {
            name: name.to_string(),
            params: function.params.iter().map(|p| p.pat.clone()).collect(),
            body: Body::Block(body),
            scope: scope.clone(),
            is_arrow: false,
        }))
    }

    pub(crate) fn make_closure(&self, closure: Closure) -> JsValue {
        JsValue::Object(self.alloc(
            ObjectClass::Function(Callable::Closure(Rc::new(closure))),
            Some(self.realm.function_proto.clone()),
        ))
    }

    pub(crate) fn call_closure(
        &mut self,
        closure: &Rc<Closure>,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, Abrupt> {
        let fn_scope = Scope::child(&closure.scope, ScopeKind::Function);
        if !closure.is_arrow {
            scope::declare(&fn_scope, "this", this);
            let arguments = self.new_array(args.to_vec())?;
            scope::declare(&fn_scope, "arguments", arguments);
        }
        for (i, param) in closure.params.iter().enumerate() {
            if let Pat::Rest(rest) = param {
                let rest_args = self.new_array(args.get(i..).unwrap_or_default().to_vec())?;
                self.bind_pattern(&rest.arg, rest_args, &fn_scope, BindMode::Lexical)?;
                break;
            }
            let arg = args.get(i).cloned().unwrap_or(JsValue::Undefined);
            self.bind_pattern(param, arg, &fn_scope, BindMode::Lexical)?;
        }

        match &closure.body {
            Body::Expr(expr) => self.eval(expr, &fn_scope),
            Body::Block(stmts) => {
                self.hoist_vars(stmts, &fn_scope);
                self.hoist_functions(stmts, &fn_scope)?;
                match self.exec_stmts(stmts, &fn_scope)? {
                    Completion::Return(value) => Ok(value),
                    _ => Ok(JsValue::Undefined),
                }
            }
        }
    }

    pub(crate) fn exec_stmts(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Result<Completion, Abrupt> {
        for stmt in stmts {
            match self.exec_stmt(stmt, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &ScopeRef) -> Result<Completion, Abrupt> {
        let block_scope = Scope::child(scope, ScopeKind::Block);
        self.hoist_functions(stmts, &block_scope)?;
        self.exec_stmts(stmts, &block_scope)
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &Stmt, scope: &ScopeRef) -> Result<Completion, Abrupt> {
        self.exec_labeled(stmt, scope, &[])
    }

    fn exec_labeled(
        &mut self,
        stmt: &Stmt,
        scope: &ScopeRef,
        labels: &[String],
    ) -> Result<Completion, Abrupt> {
        self.tick()?;
        match stmt {
            Stmt::Block(block) => self.exec_block(&block.stmts, scope),
            Stmt::Empty(_) | Stmt::Debugger(_) => Ok(Completion::Normal),
            Stmt::Expr(expr) => {
                self.eval(&expr.expr, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Return(ret) => {
                let value = match &ret.arg {
                    Some(arg) => self.eval(arg, scope)?,
                    None => JsValue::Undefined,
                };
                Ok(Completion::Return(value))
            }
            Stmt::Labeled(labeled) => {
                let label = labeled.label.sym.to_string();
                let mut inner = labels.to_vec();
                inner.push(label.clone());
                match self.exec_labeled(&labeled.body, scope, &inner)? {
                    Completion::Break(Some(l)) if l == label => Ok(Completion::Normal),
                    other => Ok(other),
                }
            }
            Stmt::Break(b) => Ok(Completion::Break(b.label.as_ref().map(|l| l.sym.to_string()))),
            Stmt::Continue(c) => Ok(Completion::Continue(
                c.label.as_ref().map(|l| l.sym.to_string()),
            )),
            Stmt::If(s) => {
                if self.eval(&s.test, scope)?.truthy() {
                    self.exec_stmt(&s.cons, scope)
                } else if let Some(alt) = &s.alt {
                    self.exec_stmt(alt, scope)
                } else {
                    Ok(Completion::Normal)
                }
            }
            Stmt::Switch(s) => self.exec_switch(s, scope),
            Stmt::Throw(t) => {
                let value = self.eval(&t.arg, scope)?;
                Err(Abrupt::Throw(value))
            }
            Stmt::Try(t) => self.exec_try(t, scope),
            Stmt::While(w) => {
                loop {
                    if !self.eval(&w.test, scope)?.truthy() {
                        return Ok(Completion::Normal);
                    }
                    let completion = self.exec_stmt(&w.body, scope)?;
                    if let LoopStep::Exit(c) = loop_step(completion, labels) {
                        return Ok(c);
                    }
                }
            }
            Stmt::DoWhile(w) => {
                loop {
                    let completion = self.exec_stmt(&w.body, scope)?;
                    if let LoopStep::Exit(c) = loop_step(completion, labels) {
                        return Ok(c);
                    }
                    if !self.eval(&w.test, scope)?.truthy() {
                        return Ok(Completion::Normal);
                    }
                }
            }
            Stmt::For(f) => self.exec_for(f, scope, labels),
            Stmt::ForIn(f) => {
                let object = self.eval(&f.right, scope)?;
                let keys = self.enumerable_keys(&object);
                let items = keys.into_iter().map(JsValue::from).collect();
                self.exec_for_each(&f.left, items, &f.body, scope, labels)
            }
            Stmt::ForOf(f) => {
                if f.is_await {
                    return Err(EvalError::Unsupported("for await".to_string()).into());
                }
                let iterable = self.eval(&f.right, scope)?;
                let items = self.iterate(&iterable)?;
                self.exec_for_each(&f.left, items, &f.body, scope, labels)
            }
            Stmt::Decl(Decl::Var(decl)) => {
                self.exec_var_decl(decl, scope)?;
                Ok(Completion::Normal)
            }
            Stmt::Decl(Decl::Fn(_)) => Ok(Completion::Normal),
            Stmt::Decl(_) => Err(EvalError::Unsupported("class and using declarations".to_string()).into()),
            Stmt::With(_) => Err(EvalError::Unsupported("with statements".to_string()).into()),
        }
    }

    pub(crate) fn exec_var_decl(&mut self, decl: &VarDecl, scope: &ScopeRef) -> Result<(), Abrupt> {
        let mode = match decl.kind {
            VarDeclKind::Var => BindMode::Var,
            VarDeclKind::Let | VarDeclKind::Const => BindMode::Lexical,
        };
        for d in &decl.decls {
            match &d.init {
                Some(init) => {
                    let value = self.eval(init, scope)?;
                    self.bind_pattern(&d.name, value, scope, mode)?;
                }
                None if mode == BindMode::Lexical => {
                    self.bind_pattern(&d.name, JsValue::Undefined, scope, mode)?;
                }
                None => {}
            }
        }
        Ok(())
    }

    fn exec_switch(&mut self, s: &SwitchStmt, scope: &ScopeRef) -> Result<Completion, Abrupt> {
        let discriminant = self.eval(&s.discriminant, scope)?;
        let switch_scope = Scope::child(scope, ScopeKind::Block);

        let mut start = None;
        for (i, case) in s.cases.iter().enumerate() {
            if let Some(test) = &case.test {
                let value = self.eval(test, &switch_scope)?;
                if super::value::strict_equals(&discriminant, &value) {
                    start = Some(i);
                    break;
                }
            }
        }
        let start = start.or_else(|| s.cases.iter().position(|c| c.test.is_none()));
        let Some(start) = start else {
            return Ok(Completion::Normal);
        };

        for case in &s.cases[start..] {
            self.hoist_functions(&case.cons, &switch_scope)?;
            match self.exec_stmts(&case.cons, &switch_scope)? {
                Completion::Normal => {}
                Completion::Break(None) => return Ok(Completion::Normal),
                other => return Ok(other),
            }
        }
        Ok(Completion::Normal)
    }

    fn exec_try(&mut self, t: &TryStmt, scope: &ScopeRef) -> Result<Completion, Abrupt> {
        let result = self.exec_block(&t.block.stmts, scope);
        let result = match (result, &t.handler) {
            (Err(Abrupt::Throw(thrown)), Some(handler)) => {
                let catch_scope = Scope::child(scope, ScopeKind::Block);
                if let Some(param) = &handler.param {
                    self.bind_pattern(param, thrown, &catch_scope, BindMode::Lexical)?;
                }
                self.exec_block(&handler.body.stmts, &catch_scope)
            }
            (other, _) => other,
        };

        if let Some(finalizer) = &t.finalizer {
            if let Err(Abrupt::Fatal(_)) = result {
                return result;
            }
            match self.exec_block(&finalizer.stmts, scope)? {
                Completion::Normal => {}
                abrupt => return Ok(abrupt),
            }
        }
        result
    }

    fn exec_for(&mut self, f: &ForStmt, scope: &ScopeRef, labels: &[String]) -> Result<Completion, Abrupt> {
        let loop_scope = Scope::child(scope, ScopeKind::Block);
        match &f.init {
            Some(VarDeclOrExpr::VarDecl(decl)) => self.exec_var_decl(decl, &loop_scope)?,
            Some(VarDeclOrExpr::Expr(expr)) => {
                self.eval(expr, &loop_scope)?;
            }
            None => {}
        }
        loop {
            if let Some(test) = &f.test {
                if !self.eval(test, &loop_scope)?.truthy() {
                    return Ok(Completion::Normal);
                }
            }
            let completion = self.exec_stmt(&f.body, &loop_scope)?;
            if let LoopStep::Exit(c) = loop_step(completion, labels) {
                return Ok(c);
            }
            if let Some(update) = &f.update {
                self.eval(update, &loop_scope)?;
            }
        }
    }

    fn exec_for_each(
        &mut self,
        head: &ForHead,
        items: Vec<JsValue>,
        body: &Stmt,
        scope: &ScopeRef,
        labels: &[String],
    ) -> Result<Completion, Abrupt> {
        for item in items {
            let iteration_scope = Scope::child(scope, ScopeKind::Block);
            match head {
                ForHead::VarDecl(decl) => {
                    let mode = if decl.kind == VarDeclKind::Var {
                        BindMode::Var
                    } else {
                        BindMode::Lexical
                    };
                    if let Some(d) = decl.decls.first() {
                        self.bind_pattern(&d.name, item, &iteration_scope, mode)?;
                    }
                }
                ForHead::Pat(pat) => {
                    self.bind_pattern(pat, item, &iteration_scope, BindMode::Assign)?;
                }
                ForHead::UsingDecl(_) => {
                    return Err(EvalError::Unsupported("using declarations".to_string()).into());
                }
            }
            let completion = self.exec_stmt(body, &iteration_scope)?;
            if let LoopStep::Exit(c) = loop_step(completion, labels) {
                return Ok(c);
            }
        }
        Ok(Completion::Normal)
    }

    /// Keys visited by `for ... in`.
    fn enumerable_keys(&self, value: &JsValue) -> Vec<String> {
        match value {
            JsValue::String(s) => (0..s.encode_utf16().count()).map(|i| i.to_string()).collect(),
            JsValue::Object(obj) => {
                let mut keys = obj.borrow().own_keys();
                let mut proto = obj.borrow().proto.clone();
                while let Some(p) = proto {
                    if Rc::ptr_eq(&p, &self.realm.object_proto)
                        || Rc::ptr_eq(&p, &self.realm.array_proto)
                        || Rc::ptr_eq(&p, &self.realm.function_proto)
                    {
                        break;
                    }
                    for key in p.borrow().own_keys() {
                        if !keys.contains(&key) {
                            keys.push(key);
                        }
                    }
                    proto = p.borrow().proto.clone();
                }
                keys
            }
            _ => Vec::new(),
        }
    }

    /// Values visited by `for ... of` and spread.
    pub(crate) fn iterate(&self, value: &JsValue) -> Result<Vec<JsValue>, Abrupt> {
        match value {
            JsValue::String(s) => Ok(s.chars().map(|c| JsValue::from(c.to_string())).collect()),
            JsValue::Object(obj) => match &obj.borrow().class {
                ObjectClass::Array(items) => Ok(items.clone()),
                _ => Err(self.type_error("object is not iterable")),
            },
            other => Err(self.type_error(format!("{} is not iterable", other.type_of()))),
        }
    }

    pub(crate) fn bind_pattern(
        &mut self,
        pat: &Pat,
        value: JsValue,
        scope: &ScopeRef,
        mode: BindMode,
    ) -> Result<(), Abrupt> {
        match pat {
            Pat::Ident(binding) => {
                let name = &*binding.id.sym;
                match mode {
                    BindMode::Var => {
                        if !scope::assign(scope, name, value.clone()) {
                            scope::declare(&scope::function_scope(scope), name, value);
                        }
                    }
                    BindMode::Lexical => scope::declare(scope, name, value),
                    BindMode::Assign => self.assign_name(name, value, scope),
                }
                Ok(())
            }
            Pat::Array(array) => {
                let items = self.iterate(&value)?;
                for (i, elem) in array.elems.iter().enumerate() {
                    match elem {
                        None => {}
                        Some(Pat::Rest(rest)) => {
                            let rest_items = self.new_array(items.get(i..).unwrap_or_default().to_vec())?;
                            self.bind_pattern(&rest.arg, rest_items, scope, mode)?;
                            break;
                        }
                        Some(p) => {
                            let item = items.get(i).cloned().unwrap_or(JsValue::Undefined);
                            self.bind_pattern(p, item, scope, mode)?;
                        }
                    }
                }
                Ok(())
            }
            Pat::Object(object) => {
                for prop in &object.props {
                    match prop {
                        ObjectPatProp::KeyValue(kv) => {
                            let key = self.prop_name_key(&kv.key, scope)?;
                            let item = self.get(&value, &key)?;
                            self.bind_pattern(&kv.value, item, scope, mode)?;
                        }
                        ObjectPatProp::Assign(assign) => {
                            let name = &*assign.key.sym;
                            let mut item = self.get(&value, name)?;
                            if let (JsValue::Undefined, Some(default)) = (&item, &assign.value) {
                                item = self.eval(default, scope)?;
                            }
                            let target = Pat::Ident(assign.key.clone());
                            self.bind_pattern(&target, item, scope, mode)?;
                        }
                        ObjectPatProp::Rest(_) => {
                            return Err(EvalError::Unsupported("object rest patterns".to_string()).into());
                        }
                    }
                }
                Ok(())
            }
            Pat::Assign(assign) => {
                let value = match value {
                    JsValue::Undefined => self.eval(&assign.right, scope)?,
                    other => other,
                };
                self.bind_pattern(&assign.left, value, scope, mode)
            }
            Pat::Expr(expr) => {
                let reference = self.reference(expr, scope)?;
                self.put_reference(&reference, value, scope)
            }
            Pat::Rest(_) | Pat::Invalid(_) => {
                Err(EvalError::Syntax("invalid binding pattern".to_string()).into())
            }
        }
    }

    /// Writes an existing binding, or creates a global one as sloppy-mode
    /// scripts do.
    pub(crate) fn assign_name(&mut self, name: &str, value: JsValue, scope: &ScopeRef) {
        if !scope::assign(scope, name, value.clone()) {
            scope::declare(&scope::root(scope), name, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SandboxLimits;
    use crate::interpreter::Interpreter;
    use crate::Value;

    fn eval(source: &str) -> Value {
        Interpreter::new(SandboxLimits::default())
            .evaluate(source)
            .unwrap()
    }

    #[test]
    fn test_loops_and_labels() {
        let src = "
            var out = [];
            outer: for (var i = 0; i < 3; i++) {
                for (var j = 0; j < 3; j++) {
                    if (j === 1) continue outer;
                    if (i === 2) break outer;
                    out.push(i + '' + j);
                }
            }
            out.join(',')";
        assert_eq!(eval(src), Value::String("00,10".into()));
    }

    #[test]
    fn test_switch_dispatch_loop() {
        let src = "
            var order = '2|0|1'.split('|'), i = 0, out = '';
            while (true) {
                switch (order[i++]) {
                    case '0': out += 'b'; continue;
                    case '1': out += 'c'; continue;
                    case '2': out += 'a'; continue;
                }
                break;
            }
            out";
        assert_eq!(eval(src), Value::String("abc".into()));
    }

    #[test]
    fn test_for_in_and_of() {
        assert_eq!(
            eval("var k = ''; for (var p in { a: 1, b: 2 }) k += p; k"),
            Value::String("ab".into())
        );
        assert_eq!(
            eval("var s = 0; for (const v of [1, 2, 3]) s += v; s"),
            Value::Number(6.0)
        );
    }

    #[test]
    fn test_destructuring() {
        assert_eq!(
            eval("var [a, , b = 5, ...r] = [1, 2, undefined, 4, 6]; var { x, y: z = 3 } = { x: a }; [a, b, r.length, x, z]"),
            Value::Array(vec![
                Value::Number(1.0),
                Value::Number(5.0),
                Value::Number(2.0),
                Value::Number(1.0),
                Value::Number(3.0),
            ])
        );
    }

    #[test]
    fn test_block_scoping() {
        assert_eq!(
            eval("let a = 1; { let a = 2; } a"),
            Value::Number(1.0)
        );
        assert_eq!(eval("{ var v = 'x'; } v"), Value::String("x".into()));
    }
}
