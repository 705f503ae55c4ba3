//! Lexical environments.

use super::value::JsValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) type ScopeRef = Rc<RefCell<Scope>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    /// Receives `var` declarations.
    Function,
    Block,
}

#[derive(Debug)]
pub(crate) struct Scope {
    vars: HashMap<String, JsValue>,
    parent: Option<ScopeRef>,
    kind: ScopeKind,
}

impl Scope {
    pub(crate) fn global() -> ScopeRef {
        Rc::new(RefCell::new(Self {
            vars: HashMap::new(),
            parent: None,
            kind: ScopeKind::Function,
        }))
    }

    pub(crate) fn child(parent: &ScopeRef, kind: ScopeKind) -> ScopeRef {
        Rc::new(RefCell::new(Self {
            vars: HashMap::new(),
            parent: Some(parent.clone()),
            kind,
        }))
    }

    /// Drops every binding; breaks closure cycles when a realm is torn down.
    pub(crate) fn clear(&mut self) {
        self.vars.clear();
    }
}

pub(crate) fn declare(scope: &ScopeRef, name: &str, value: JsValue) {
    scope.borrow_mut().vars.insert(name.to_string(), value);
}

/// Declares `name` without overwriting an existing binding, as `var x;` does.
pub(crate) fn declare_hoisted(scope: &ScopeRef, name: &str) {
    scope
        .borrow_mut()
        .vars
        .entry(name.to_string())
        .or_insert(JsValue::Undefined);
}

pub(crate) fn lookup(scope: &ScopeRef, name: &str) -> Option<JsValue> {
    let mut current = scope.clone();
    loop {
        if let Some(value) = current.borrow().vars.get(name) {
            return Some(value.clone());
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(parent) => current = parent,
            None => return None,
        }
    }
}

/// Writes to the nearest binding. Returns false when none exists.
pub(crate) fn assign(scope: &ScopeRef, name: &str, value: JsValue) -> bool {
    let mut current = scope.clone();
    loop {
        if let Some(slot) = current.borrow_mut().vars.get_mut(name) {
            *slot = value;
            return true;
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(parent) => current = parent,
            None => return false,
        }
    }
}

/// The nearest scope that receives `var` declarations.
pub(crate) fn function_scope(scope: &ScopeRef) -> ScopeRef {
    let mut current = scope.clone();
    loop {
        if current.borrow().kind == ScopeKind::Function {
            return current;
        }
        let parent = current.borrow().parent.clone();
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

/// The outermost scope.
pub(crate) fn root(scope: &ScopeRef) -> ScopeRef {
    let mut current = scope.clone();
    loop {
        let parent = current.borrow().parent.clone();
        match parent {
            Some(parent) => current = parent,
            None => return current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shadowing_and_assignment() {
        let global = Scope::global();
        declare(&global, "a", JsValue::Number(1.0));
        let block = Scope::child(&global, ScopeKind::Block);
        declare(&block, "a", JsValue::Number(2.0));

        assert!(matches!(lookup(&block, "a"), Some(JsValue::Number(n)) if n == 2.0));
        assert!(assign(&block, "a", JsValue::Number(3.0)));
        assert!(matches!(lookup(&global, "a"), Some(JsValue::Number(n)) if n == 1.0));
        assert!(!assign(&block, "missing", JsValue::Undefined));
        assert!(Rc::ptr_eq(&function_scope(&block), &global));
    }
}
