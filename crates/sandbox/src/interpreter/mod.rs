//! A bounded tree-walking interpreter for the JavaScript subset that string
//! decoders and array rotators are written in.
//!
//! Every evaluation gets a fresh realm: its own global scope and its own
//! built-in prototypes. Nothing from the host is reachable; the globals are
//! pure functions over strings, numbers, arrays and plain objects. Resource
//! limits surface as [`Abrupt::Fatal`], which `try`/`catch` never sees.

mod builtins;
mod eval;
mod exec;
mod scope;
mod value;

use crate::config::SandboxLimits;
use crate::Value;
use decloak_utils::errors::EvalError;
use indexmap::IndexMap;
use scope::{Scope, ScopeRef};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Instant;
use swc_core::ecma::ast::{ModuleItem, Stmt};
use value::{Callable, Class, JsObject, JsValue, ObjectRef};

/// Why evaluation left the normal flow.
#[derive(Debug)]
pub(crate) enum Abrupt {
    /// A JavaScript exception, catchable by script code.
    Throw(JsValue),
    /// A limit or an unsupported construct. Unwinds the whole evaluation.
    Fatal(EvalError),
}

impl From<EvalError> for Abrupt {
    fn from(e: EvalError) -> Self {
        Self::Fatal(e)
    }
}

/// Built-in prototypes of one realm.
#[derive(Debug)]
pub(crate) struct Realm {
    pub(crate) object_proto: ObjectRef,
    pub(crate) function_proto: ObjectRef,
    pub(crate) array_proto: ObjectRef,
    pub(crate) string_proto: ObjectRef,
    pub(crate) number_proto: ObjectRef,
    pub(crate) boolean_proto: ObjectRef,
    pub(crate) error_proto: ObjectRef,
    /// `TypeError.prototype` and friends, by constructor name.
    pub(crate) error_protos: HashMap<&'static str, ObjectRef>,
    pub(crate) regexp_proto: ObjectRef,
}

/// One sandbox realm.
///
/// Not `Send`: an interpreter lives and dies on the thread that evaluates.
pub struct Interpreter {
    limits: SandboxLimits,
    steps: u64,
    depth: usize,
    started: Instant,
    global: ScopeRef,
    realm: Realm,
}

impl fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interpreter")
            .field("limits", &self.limits)
            .field("steps", &self.steps)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl Drop for Interpreter {
    fn drop(&mut self) {
        self.global.borrow_mut().clear();
    }
}

impl Interpreter {
    pub fn new(limits: SandboxLimits) -> Self {
        let global = Scope::global();
        let realm = builtins::install(&global);
        Self {
            limits,
            steps: 0,
            depth: 0,
            started: Instant::now(),
            global,
            realm,
        }
    }

    /// Runs `source` and returns the value of its last top-level expression
    /// statement, or the argument of a top-level `return`.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, EvalError> {
        let tree = decloak_core::parse(source).map_err(|e| EvalError::Syntax(e.to_string()))?;
        if let Some(diagnostic) = tree.diagnostics.first() {
            return Err(EvalError::Syntax(diagnostic.to_string()));
        }
        let stmts = tree
            .module
            .body
            .into_iter()
            .map(|item| match item {
                ModuleItem::Stmt(stmt) => Ok(stmt),
                ModuleItem::ModuleDecl(_) => {
                    Err(EvalError::Unsupported("module declarations".to_string()))
                }
            })
            .collect::<Result<Vec<Stmt>, _>>()?;

        self.steps = 0;
        self.depth = 0;
        self.started = Instant::now();

        let completion = self.run_program(&stmts).map_err(|abrupt| self.uncaught(abrupt))?;
        to_output(&completion, 0)
    }

    fn run_program(&mut self, stmts: &[Stmt]) -> Result<JsValue, Abrupt> {
        let global = self.global.clone();
        self.hoist_vars(stmts, &global);
        self.hoist_functions(stmts, &global)?;

        let mut last = JsValue::Undefined;
        for stmt in stmts {
            if let Stmt::Expr(expr) = stmt {
                self.tick()?;
                last = self.eval(&expr.expr, &global)?;
                continue;
            }
            if let exec::Completion::Return(value) = self.exec_stmt(stmt, &global)? {
                return Ok(value);
            }
        }
        Ok(last)
    }

    /// Counts one unit of work against the step and time budgets.
    pub(crate) fn tick(&mut self) -> Result<(), Abrupt> {
        self.steps += 1;
        if self.limits.max_steps > 0 && self.steps > self.limits.max_steps {
            return Err(Abrupt::Fatal(EvalError::StepLimit {
                executed: self.steps,
                limit: self.limits.max_steps,
            }));
        }
        if self.steps % 1024 == 0 && self.started.elapsed() > self.limits.timeout {
            return Err(Abrupt::Fatal(EvalError::Timeout {
                millis: self.limits.timeout.as_millis() as u64,
            }));
        }
        Ok(())
    }

    pub(crate) fn check_length(&self, len: usize) -> Result<(), Abrupt> {
        if len > self.limits.max_string_length {
            return Err(Abrupt::Fatal(EvalError::Allocation(self.limits.max_string_length)));
        }
        Ok(())
    }

    /// Calls any callable value.
    pub(crate) fn call(
        &mut self,
        callee: &JsValue,
        this: JsValue,
        args: &[JsValue],
    ) -> Result<JsValue, Abrupt> {
        let callable = match callee {
            JsValue::Object(obj) => match &obj.borrow().class {
                Class::Function(callable) => Some(callable.clone()),
                _ => None,
            },
            _ => None,
        };
        let Some(callable) = callable else {
            return Err(self.type_error(format!("{} is not a function", callee.type_of())));
        };

        self.depth += 1;
        if self.depth > self.limits.max_call_depth {
            self.depth -= 1;
            return Err(Abrupt::Fatal(EvalError::CallDepth(self.limits.max_call_depth)));
        }
        let result = match callable {
            Callable::Native(native) => (native.call)(self, &this, args),
            Callable::Closure(closure) => self.call_closure(&closure, this, args),
        };
        self.depth -= 1;
        result
    }

    /// `new callee(...args)`.
    pub(crate) fn construct(&mut self, callee: &JsValue, args: &[JsValue]) -> Result<JsValue, Abrupt> {
        let is_closure = callee.as_object().is_some_and(|o| {
            matches!(o.borrow().class, Class::Function(Callable::Closure(_)))
        });
        if !is_closure {
            // Built-in constructors behave the same with and without `new`.
            return self.call(callee, JsValue::Undefined, args);
        }
        let proto = match self.get(callee, "prototype")? {
            JsValue::Object(proto) => proto,
            _ => self.realm.object_proto.clone(),
        };
        let instance = JsValue::Object(self.alloc(Class::Ordinary, Some(proto)));
        let result = self.call(callee, instance.clone(), args)?;
        Ok(match result {
            JsValue::Object(_) => result,
            _ => instance,
        })
    }

    pub(crate) fn alloc(&self, class: Class, proto: Option<ObjectRef>) -> ObjectRef {
        Rc::new(std::cell::RefCell::new(JsObject::new(class, proto)))
    }

    pub(crate) fn new_object(&self) -> ObjectRef {
        self.alloc(Class::Ordinary, Some(self.realm.object_proto.clone()))
    }

    pub(crate) fn new_array(&self, items: Vec<JsValue>) -> Result<JsValue, Abrupt> {
        self.check_length(items.len())?;
        Ok(JsValue::Object(
            self.alloc(Class::Array(items), Some(self.realm.array_proto.clone())),
        ))
    }

    pub(crate) fn new_string(&self, s: String) -> Result<JsValue, Abrupt> {
        self.check_length(s.len())?;
        Ok(JsValue::from(s))
    }

    /// A native error object of the given constructor name.
    pub(crate) fn error_object(&self, name: &str, message: &str) -> JsValue {
        let proto = self
            .realm
            .error_protos
            .get(name)
            .unwrap_or(&self.realm.error_proto)
            .clone();
        let obj = self.alloc(Class::Error, Some(proto));
        {
            let mut o = obj.borrow_mut();
            o.props.insert("name".to_string(), JsValue::from(name));
            o.props.insert("message".to_string(), JsValue::from(message));
        }
        JsValue::Object(obj)
    }

    pub(crate) fn throw(&self, name: &str, message: impl AsRef<str>) -> Abrupt {
        Abrupt::Throw(self.error_object(name, message.as_ref()))
    }

    pub(crate) fn type_error(&self, message: impl AsRef<str>) -> Abrupt {
        self.throw("TypeError", message)
    }

    /// Property read with prototype lookup and primitive boxing.
    pub(crate) fn get(&mut self, target: &JsValue, key: &str) -> Result<JsValue, Abrupt> {
        let proto = match target {
            JsValue::Undefined | JsValue::Null => {
                return Err(self.type_error(format!(
                    "Cannot read properties of {target:?} (reading '{key}')"
                )));
            }
            JsValue::Bool(_) => self.realm.boolean_proto.clone(),
            JsValue::Number(_) => self.realm.number_proto.clone(),
            JsValue::String(s) => {
                if key == "length" {
                    return Ok(JsValue::Number(s.encode_utf16().count() as f64));
                }
                if let Some(index) = value::array_index(key) {
                    return Ok(s
                        .encode_utf16()
                        .nth(index)
                        .map(|unit| JsValue::from(value::from_code_units(&[unit])))
                        .unwrap_or(JsValue::Undefined));
                }
                self.realm.string_proto.clone()
            }
            JsValue::Object(obj) => {
                if key == "prototype" {
                    self.ensure_prototype(obj);
                }
                return Ok(lookup_property(obj, key).unwrap_or(JsValue::Undefined));
            }
        };
        Ok(lookup_property(&proto, key).unwrap_or(JsValue::Undefined))
    }

    /// Script functions get their `prototype` object on first use.
    fn ensure_prototype(&self, obj: &ObjectRef) {
        let needs = {
            let o = obj.borrow();
            matches!(o.class, Class::Function(Callable::Closure(_))) && !o.props.contains_key("prototype")
        };
        if needs {
            let proto = self.new_object();
            proto
                .borrow_mut()
                .props
                .insert("constructor".to_string(), JsValue::Object(obj.clone()));
            obj.borrow_mut()
                .props
                .insert("prototype".to_string(), JsValue::Object(proto));
        }
    }

    /// Property write. Writes to primitives are dropped, as in sloppy mode.
    pub(crate) fn set(&mut self, target: &JsValue, key: String, value: JsValue) -> Result<(), Abrupt> {
        let obj = match target {
            JsValue::Undefined | JsValue::Null => {
                return Err(self.type_error(format!(
                    "Cannot set properties of {target:?} (setting '{key}')"
                )));
            }
            JsValue::Object(obj) => obj,
            _ => return Ok(()),
        };
        let mut o = obj.borrow_mut();
        if let Class::Array(items) = &mut o.class {
            if key == "length" {
                let len = value.to_number();
                if len < 0.0 || len.fract() != 0.0 || len > u32::MAX as f64 {
                    drop(o);
                    return Err(self.throw("RangeError", "Invalid array length"));
                }
                let len = len as usize;
                if len > self.limits.max_string_length {
                    return Err(Abrupt::Fatal(EvalError::Allocation(self.limits.max_string_length)));
                }
                items.resize(len, JsValue::Undefined);
                return Ok(());
            }
            if let Some(index) = value::array_index(&key) {
                if index >= items.len() {
                    if index >= self.limits.max_string_length {
                        return Err(Abrupt::Fatal(EvalError::Allocation(
                            self.limits.max_string_length,
                        )));
                    }
                    items.resize(index + 1, JsValue::Undefined);
                }
                items[index] = value;
                return Ok(());
            }
        }
        o.props.insert(key, value);
        Ok(())
    }

    /// Maps an uncaught abrupt completion onto the crate's error type.
    fn uncaught(&self, abrupt: Abrupt) -> EvalError {
        let thrown = match abrupt {
            Abrupt::Fatal(e) => return e,
            Abrupt::Throw(value) => value,
        };
        let error_parts = thrown.as_object().and_then(|o| {
            let o = o.borrow();
            matches!(o.class, Class::Error).then(|| {
                (
                    o.props.get("name").map(JsValue::to_js_string).unwrap_or_default(),
                    o.props.get("message").map(JsValue::to_js_string).unwrap_or_default(),
                )
            })
        });
        match error_parts {
            Some((name, message)) if name == "ReferenceError" => EvalError::Reference(
                message
                    .strip_suffix(" is not defined")
                    .unwrap_or(&message)
                    .to_string(),
            ),
            Some((name, message)) if name == "TypeError" => EvalError::Type(message),
            _ => EvalError::Thrown(thrown.to_js_string()),
        }
    }
}

/// Own property, then the prototype chain.
pub(crate) fn lookup_property(obj: &ObjectRef, key: &str) -> Option<JsValue> {
    let mut current = obj.clone();
    loop {
        if let Some(value) = current.borrow().get_own(key) {
            return Some(value);
        }
        let proto = current.borrow().proto.clone();
        current = proto?;
    }
}

/// Copies a realm value out as a plain [`Value`].
fn to_output(value: &JsValue, depth: usize) -> Result<Value, EvalError> {
    if depth > 64 {
        return Err(EvalError::NotTransferable("value nests too deeply".to_string()));
    }
    Ok(match value {
        JsValue::Undefined => Value::Undefined,
        JsValue::Null => Value::Null,
        JsValue::Bool(b) => Value::Bool(*b),
        JsValue::Number(n) => Value::Number(*n),
        JsValue::String(s) => Value::String(s.to_string()),
        JsValue::Object(obj) => {
            let o = obj.borrow();
            match &o.class {
                Class::Array(items) => Value::Array(
                    items
                        .iter()
                        .map(|item| to_output(item, depth + 1))
                        .collect::<Result<_, _>>()?,
                ),
                Class::Ordinary | Class::Error => {
                    let mut map = IndexMap::new();
                    for key in o.own_keys() {
                        if let Some(item) = o.props.get(&key) {
                            map.insert(key, to_output(item, depth + 1)?);
                        }
                    }
                    Value::Object(map)
                }
                Class::Function(callable) => {
                    return Err(EvalError::NotTransferable(format!(
                        "function {}",
                        callable.name()
                    )));
                }
                Class::RegExp(re) => {
                    return Err(EvalError::NotTransferable(format!("/{}/{}", re.source, re.flags)));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str) -> Result<Value, EvalError> {
        Interpreter::new(SandboxLimits::default()).evaluate(source)
    }

    fn eval_str(source: &str) -> String {
        match eval(source) {
            Ok(Value::String(s)) => s,
            other => panic!("expected a string from {source:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_completion_value() {
        assert_eq!(eval("1 + 2; 'a' + 'b'").unwrap(), Value::String("ab".into()));
        assert_eq!(eval("var x = 5; x * 2").unwrap(), Value::Number(10.0));
        assert_eq!(eval("return [1, 'a'];").unwrap(), Value::Array(vec![
            Value::Number(1.0),
            Value::String("a".into()),
        ]));
        assert_eq!(eval("var a;").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_closures_and_hoisting() {
        let src = "
            function counter() { var n = 0; return function () { return ++n; }; }
            var c = counter(); c(); c(); c()";
        assert_eq!(eval(src).unwrap(), Value::Number(3.0));
        assert_eq!(eval("f(); function f() { return 'hoisted'; }").unwrap(), Value::String("hoisted".into()));
    }

    #[test]
    fn test_self_replacing_function() {
        let src = "
            function arr() { var s = ['x', 'y']; arr = function () { return s; }; return arr(); }
            arr()[1] + arr().length";
        assert_eq!(eval_str(src), "y2");
    }

    #[test]
    fn test_rotation_idiom() {
        let src = "
            var a = ['c', 'a', 'b'];
            (function (arr, n) {
                while (--n) { arr.push(arr.shift()); }
            })(a, 2);
            a.join('')";
        assert_eq!(eval_str(src), "abc");
    }

    #[test]
    fn test_try_catch_and_errors() {
        assert_eq!(
            eval_str("var r; try { missing(); } catch (e) { r = e.name; } r"),
            "ReferenceError"
        );
        assert_eq!(
            eval_str("var r; try { null.x; } catch (e) { r = e instanceof TypeError ? 'te' : 'x'; } r"),
            "te"
        );
        assert_eq!(
            eval_str("var r = ''; try { r += 'a'; } finally { r += 'b'; } r"),
            "ab"
        );
        assert!(matches!(eval("missing"), Err(EvalError::Reference(name)) if name == "missing"));
        assert!(matches!(eval("throw 'boom'"), Err(EvalError::Thrown(msg)) if msg == "boom"));
    }

    #[test]
    fn test_limits_are_not_catchable() {
        let limits = SandboxLimits::default().with_max_steps(10_000);
        let err = Interpreter::new(limits)
            .evaluate("try { while (true) {} } catch (e) {} 'escaped'")
            .unwrap_err();
        assert!(matches!(err, EvalError::StepLimit { .. }));

        let limits = SandboxLimits::default().with_max_call_depth(16);
        let err = Interpreter::new(limits)
            .evaluate("function f() { return f(); } try { f() } catch (e) { 1 }")
            .unwrap_err();
        assert!(matches!(err, EvalError::CallDepth(_)));
    }

    #[test]
    fn test_timeout() {
        let limits = SandboxLimits::default()
            .with_max_steps(0)
            .with_timeout_ms(20);
        let err = Interpreter::new(limits).evaluate("for (;;) {}").unwrap_err();
        assert!(matches!(err, EvalError::Timeout { millis: 20 }));
    }

    #[test]
    fn test_no_host_capabilities() {
        for global in ["require", "process", "window", "document", "fetch", "eval", "Function"] {
            let err = eval(global).unwrap_err();
            assert!(matches!(err, EvalError::Reference(_)), "{global} is reachable");
        }
    }

    #[test]
    fn test_functions_do_not_transfer() {
        assert!(matches!(eval("(function () {})"), Err(EvalError::NotTransferable(_))));
        assert_eq!(
            eval("({ b: 1, a: [true, null] })").unwrap(),
            Value::Object(IndexMap::from([
                ("b".to_string(), Value::Number(1.0)),
                ("a".to_string(), Value::Array(vec![Value::Bool(true), Value::Null])),
            ]))
        );
    }
}
