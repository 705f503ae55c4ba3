//! Expression evaluation.

use super::exec::BindMode;
use super::scope::{self, Scope, ScopeKind, ScopeRef};
use super::value::{
    loose_equals, strict_equals, Body, Class as ObjectClass, Closure, JsRegExp, JsValue,
};
use super::{lookup_property, Abrupt, Interpreter};
use decloak_utils::errors::EvalError;
use std::rc::Rc;
use swc_core::ecma::ast::*;

/// An assignable location.
#[derive(Debug)]
pub(crate) enum Reference {
    Binding(String),
    Property(JsValue, String),
}

fn unsupported(what: &str) -> Abrupt {
    Abrupt::Fatal(EvalError::Unsupported(what.to_string()))
}

impl Interpreter {
    pub(crate) fn eval(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        self.tick()?;
        match expr {
            Expr::This(_) => Ok(scope::lookup(scope, "this").unwrap_or(JsValue::Undefined)),
            Expr::Ident(ident) => self.lookup_ident(&ident.sym, scope),
            Expr::Lit(lit) => self.eval_lit(lit),
            Expr::Paren(paren) => self.eval(&paren.expr, scope),
            Expr::Array(array) => {
                let mut items = Vec::with_capacity(array.elems.len());
                for elem in &array.elems {
                    match elem {
                        None => items.push(JsValue::Undefined),
                        Some(ExprOrSpread { spread: Some(_), expr }) => {
                            let value = self.eval(expr, scope)?;
                            items.extend(self.iterate(&value)?);
                        }
                        Some(ExprOrSpread { expr, .. }) => items.push(self.eval(expr, scope)?),
                    }
                }
                self.new_array(items)
            }
            Expr::Object(object) => self.eval_object(object, scope),
            Expr::Fn(f) => {
                let name = f.ident.as_ref().map(|i| i.sym.to_string());
                match name {
                    Some(name) => {
                        // Named function expressions see their own name.
                        let own = Scope::child(scope, ScopeKind::Block);
                        let function = self.make_function(&name, &f.function, &own)?;
                        scope::declare(&own, &name, function.clone());
                        Ok(function)
                    }
                    None => self.make_function("", &f.function, scope),
                }
            }
            Expr::Arrow(arrow) => {
                if arrow.is_async || arrow.is_generator {
                    return Err(unsupported("async arrow functions"));
                }
                let body = match &*arrow.body {
                    BlockStmtOrExpr::BlockStmt(block) => Body::Block(block.stmts.clone()),
                    BlockStmtOrExpr::Expr(expr) => Body::Expr(expr.clone()),
                };
                Ok(self.make_closure(Closure {
                    name: String::new(),
                    params: arrow.params.clone(),
                    body,
                    scope: scope.clone(),
                    is_arrow: true,
                }))
            }
            Expr::Unary(unary) => self.eval_unary(unary, scope),
            Expr::Update(update) => {
                let reference = self.reference(&update.arg, scope)?;
                let old = self.get_reference(&reference, scope)?.to_number();
                let new = match update.op {
                    UpdateOp::PlusPlus => old + 1.0,
                    UpdateOp::MinusMinus => old - 1.0,
                };
                self.put_reference(&reference, JsValue::Number(new), scope)?;
                Ok(JsValue::Number(if update.prefix { new } else { old }))
            }
            Expr::Bin(bin) => self.eval_binary(bin, scope),
            Expr::Assign(assign) => self.eval_assign(assign, scope),
            Expr::Member(member) => {
                let object = self.eval(&member.obj, scope)?;
                let key = self.member_key(&member.prop, scope)?;
                self.get(&object, &key)
            }
            Expr::Cond(cond) => {
                if self.eval(&cond.test, scope)?.truthy() {
                    self.eval(&cond.cons, scope)
                } else {
                    self.eval(&cond.alt, scope)
                }
            }
            Expr::Call(call) => {
                let Callee::Expr(callee) = &call.callee else {
                    return Err(unsupported("super and import calls"));
                };
                let (function, this) = self.eval_callee(callee, scope)?;
                let args = self.eval_args(&call.args, scope)?;
                if !function.is_callable() {
                    return Err(self.type_error(format!("{} is not a function", describe(callee))));
                }
                self.call(&function, this, &args)
            }
            Expr::New(new) => {
                let callee = self.eval(&new.callee, scope)?;
                let args = match &new.args {
                    Some(args) => self.eval_args(args, scope)?,
                    None => Vec::new(),
                };
                if !callee.is_callable() {
                    return Err(self.type_error(format!("{} is not a constructor", describe(&new.callee))));
                }
                self.construct(&callee, &args)
            }
            Expr::Seq(seq) => {
                let mut last = JsValue::Undefined;
                for expr in &seq.exprs {
                    last = self.eval(expr, scope)?;
                }
                Ok(last)
            }
            Expr::Tpl(tpl) => {
                let mut out = String::new();
                for (i, quasi) in tpl.quasis.iter().enumerate() {
                    match &quasi.cooked {
                        Some(cooked) => out.push_str(cooked),
                        None => out.push_str(&quasi.raw),
                    }
                    if let Some(expr) = tpl.exprs.get(i) {
                        out.push_str(&self.eval(expr, scope)?.to_js_string());
                    }
                }
                self.new_string(out)
            }
            Expr::OptChain(chain) => self.eval_opt_chain(chain, scope),
            Expr::Class(_) => Err(unsupported("classes")),
            Expr::TaggedTpl(_) => Err(unsupported("tagged templates")),
            Expr::Yield(_) | Expr::Await(_) => Err(unsupported("yield and await")),
            Expr::MetaProp(_) | Expr::SuperProp(_) => Err(unsupported("meta and super properties")),
            Expr::JSXMember(_)
            | Expr::JSXNamespacedName(_)
            | Expr::JSXEmpty(_)
            | Expr::JSXElement(_)
            | Expr::JSXFragment(_) => Err(unsupported("JSX")),
            _ => Err(unsupported("expression kind")),
        }
    }

    fn lookup_ident(&mut self, name: &str, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        match scope::lookup(scope, name) {
            Some(value) => Ok(value),
            None => Err(self.throw("ReferenceError", format!("{name} is not defined"))),
        }
    }

    fn eval_lit(&mut self, lit: &Lit) -> Result<JsValue, Abrupt> {
        match lit {
            Lit::Str(s) => Ok(JsValue::from(&*s.value)),
            Lit::Num(n) => Ok(JsValue::Number(n.value)),
            Lit::Bool(b) => Ok(JsValue::Bool(b.value)),
            Lit::Null(_) => Ok(JsValue::Null),
            Lit::Regex(re) => self.new_regexp(&re.exp, &re.flags),
            Lit::BigInt(_) => Err(unsupported("bigint")),
            Lit::JSXText(_) => Err(unsupported("JSX")),
        }
    }

    /// Builds a RegExp object, translating JavaScript flags to inline flags.
    pub(crate) fn new_regexp(&mut self, source: &str, flags: &str) -> Result<JsValue, Abrupt> {
        let mut inline = String::new();
        for flag in flags.chars() {
            match flag {
                'i' | 'm' | 's' => inline.push(flag),
                'g' | 'y' | 'u' | 'd' => {}
                other => {
                    return Err(self.throw("SyntaxError", format!("invalid regular expression flag {other}")));
                }
            }
        }
        let pattern = if inline.is_empty() {
            source.to_string()
        } else {
            format!("(?{inline}){source}")
        };
        let regex = regex::Regex::new(&pattern)
            .map_err(|e| self.throw("SyntaxError", format!("invalid regular expression: {e}")))?;
        Ok(JsValue::Object(self.alloc(
            ObjectClass::RegExp(JsRegExp {
                source: source.to_string(),
                flags: flags.to_string(),
                regex,
            }),
            Some(self.realm.regexp_proto.clone()),
        )))
    }

    fn eval_object(&mut self, object: &ObjectLit, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        let obj = self.new_object();
        let target = JsValue::Object(obj.clone());
        for prop in &object.props {
            match prop {
                PropOrSpread::Spread(spread) => {
                    let source = self.eval(&spread.expr, scope)?;
                    if let JsValue::Object(src) = &source {
                        let keys = src.borrow().own_keys();
                        for key in keys {
                            let value = self.get(&source, &key)?;
                            self.set(&target, key, value)?;
                        }
                    }
                }
                PropOrSpread::Prop(prop) => match &**prop {
                    Prop::Shorthand(ident) => {
                        let value = self.lookup_ident(&ident.sym, scope)?;
                        self.set(&target, ident.sym.to_string(), value)?;
                    }
                    Prop::KeyValue(kv) => {
                        let key = self.prop_name_key(&kv.key, scope)?;
                        let value = self.eval(&kv.value, scope)?;
                        self.set(&target, key, value)?;
                    }
                    Prop::Method(method) => {
                        let key = self.prop_name_key(&method.key, scope)?;
                        let value = self.make_function(&key, &method.function, scope)?;
                        self.set(&target, key, value)?;
                    }
                    Prop::Getter(_) | Prop::Setter(_) => return Err(unsupported("accessors")),
                    Prop::Assign(_) => {
                        return Err(EvalError::Syntax("shorthand default outside a pattern".to_string()).into());
                    }
                },
            }
        }
        Ok(target)
    }

    pub(crate) fn prop_name_key(&mut self, key: &PropName, scope: &ScopeRef) -> Result<String, Abrupt> {
        Ok(match key {
            PropName::Ident(name) => name.sym.to_string(),
            PropName::Str(s) => s.value.to_string(),
            PropName::Num(n) => JsValue::Number(n.value).to_js_string(),
            PropName::Computed(computed) => self.eval(&computed.expr, scope)?.to_property_key(),
            PropName::BigInt(_) => return Err(unsupported("bigint keys")),
        })
    }

    fn member_key(&mut self, prop: &MemberProp, scope: &ScopeRef) -> Result<String, Abrupt> {
        match prop {
            MemberProp::Ident(name) => Ok(name.sym.to_string()),
            MemberProp::Computed(computed) => Ok(self.eval(&computed.expr, scope)?.to_property_key()),
            MemberProp::PrivateName(_) => Err(unsupported("private names")),
        }
    }

    /// Evaluates a callee, keeping the receiver of a method call.
    fn eval_callee(&mut self, callee: &Expr, scope: &ScopeRef) -> Result<(JsValue, JsValue), Abrupt> {
        match callee {
            Expr::Member(member) => {
                let object = self.eval(&member.obj, scope)?;
                let key = self.member_key(&member.prop, scope)?;
                let function = self.get(&object, &key)?;
                Ok((function, object))
            }
            Expr::Paren(paren) => self.eval_callee(&paren.expr, scope),
            other => Ok((self.eval(other, scope)?, JsValue::Undefined)),
        }
    }

    fn eval_args(&mut self, args: &[ExprOrSpread], scope: &ScopeRef) -> Result<Vec<JsValue>, Abrupt> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            let value = self.eval(&arg.expr, scope)?;
            if arg.spread.is_some() {
                values.extend(self.iterate(&value)?);
            } else {
                values.push(value);
            }
        }
        Ok(values)
    }

    fn eval_opt_chain(&mut self, chain: &OptChainExpr, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        match &*chain.base {
            OptChainBase::Member(member) => {
                let object = self.eval(&member.obj, scope)?;
                if chain.optional && object.is_nullish() {
                    return Ok(JsValue::Undefined);
                }
                let key = self.member_key(&member.prop, scope)?;
                self.get(&object, &key)
            }
            OptChainBase::Call(call) => {
                let (function, this) = self.eval_callee(&call.callee, scope)?;
                if chain.optional && function.is_nullish() {
                    return Ok(JsValue::Undefined);
                }
                let args = self.eval_args(&call.args, scope)?;
                self.call(&function, this, &args)
            }
        }
    }

    fn eval_unary(&mut self, unary: &UnaryExpr, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        match unary.op {
            UnaryOp::TypeOf => {
                if let Expr::Ident(ident) = &*unary.arg {
                    return Ok(match scope::lookup(scope, &ident.sym) {
                        Some(value) => JsValue::from(value.type_of()),
                        None => JsValue::from("undefined"),
                    });
                }
                Ok(JsValue::from(self.eval(&unary.arg, scope)?.type_of()))
            }
            UnaryOp::Delete => {
                if let Expr::Member(member) = &*unary.arg {
                    let object = self.eval(&member.obj, scope)?;
                    let key = self.member_key(&member.prop, scope)?;
                    if let JsValue::Object(obj) = &object {
                        let mut guard = obj.borrow_mut();
                        let o = &mut *guard;
                        match (&mut o.class, super::value::array_index(&key)) {
                            (ObjectClass::Array(items), Some(index)) if index < items.len() => {
                                items[index] = JsValue::Undefined;
                            }
                            _ => {
                                o.props.shift_remove(&key);
                            }
                        }
                    }
                }
                Ok(JsValue::Bool(true))
            }
            UnaryOp::Void => {
                self.eval(&unary.arg, scope)?;
                Ok(JsValue::Undefined)
            }
            UnaryOp::Minus => Ok(JsValue::Number(-self.eval(&unary.arg, scope)?.to_number())),
            UnaryOp::Plus => Ok(JsValue::Number(self.eval(&unary.arg, scope)?.to_number())),
            UnaryOp::Bang => Ok(JsValue::Bool(!self.eval(&unary.arg, scope)?.truthy())),
            UnaryOp::Tilde => Ok(JsValue::Number(f64::from(!self.eval(&unary.arg, scope)?.to_int32()))),
        }
    }

    fn eval_binary(&mut self, bin: &BinExpr, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        let left = self.eval(&bin.left, scope)?;
        match bin.op {
            BinaryOp::LogicalAnd if !left.truthy() => return Ok(left),
            BinaryOp::LogicalOr if left.truthy() => return Ok(left),
            BinaryOp::NullishCoalescing if !left.is_nullish() => return Ok(left),
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullishCoalescing => {
                return self.eval(&bin.right, scope);
            }
            _ => {}
        }
        let right = self.eval(&bin.right, scope)?;
        self.binary(bin.op, &left, &right)
    }

    /// Applies a non-short-circuiting binary operator.
    pub(crate) fn binary(&mut self, op: BinaryOp, left: &JsValue, right: &JsValue) -> Result<JsValue, Abrupt> {
        let num = |v: f64| -> Result<JsValue, Abrupt> { Ok(JsValue::Number(v)) };
        match op {
            BinaryOp::Add => {
                let (l, r) = (left.to_primitive(), right.to_primitive());
                if matches!(l, JsValue::String(_)) || matches!(r, JsValue::String(_)) {
                    let (l, r) = (l.to_js_string(), r.to_js_string());
                    self.check_length(l.len() + r.len())?;
                    Ok(JsValue::from(l + r.as_str()))
                } else {
                    num(l.to_number() + r.to_number())
                }
            }
            BinaryOp::Sub => num(left.to_number() - right.to_number()),
            BinaryOp::Mul => num(left.to_number() * right.to_number()),
            BinaryOp::Div => num(left.to_number() / right.to_number()),
            BinaryOp::Mod => num(left.to_number() % right.to_number()),
            BinaryOp::Exp => num(left.to_number().powf(right.to_number())),
            BinaryOp::BitAnd => num(f64::from(left.to_int32() & right.to_int32())),
            BinaryOp::BitOr => num(f64::from(left.to_int32() | right.to_int32())),
            BinaryOp::BitXor => num(f64::from(left.to_int32() ^ right.to_int32())),
            BinaryOp::LShift => num(f64::from(left.to_int32().wrapping_shl(right.to_uint32() & 31))),
            BinaryOp::RShift => num(f64::from(left.to_int32() >> (right.to_uint32() & 31))),
            BinaryOp::ZeroFillRShift => num(f64::from(left.to_uint32() >> (right.to_uint32() & 31))),
            BinaryOp::EqEqEq => Ok(JsValue::Bool(strict_equals(left, right))),
            BinaryOp::NotEqEq => Ok(JsValue::Bool(!strict_equals(left, right))),
            BinaryOp::EqEq => Ok(JsValue::Bool(loose_equals(left, right))),
            BinaryOp::NotEq => Ok(JsValue::Bool(!loose_equals(left, right))),
            BinaryOp::Lt => Ok(JsValue::Bool(compare(left, right).is_some_and(|o| o.is_lt()))),
            BinaryOp::Gt => Ok(JsValue::Bool(compare(left, right).is_some_and(|o| o.is_gt()))),
            BinaryOp::LtEq => Ok(JsValue::Bool(compare(left, right).is_some_and(|o| o.is_le()))),
            BinaryOp::GtEq => Ok(JsValue::Bool(compare(left, right).is_some_and(|o| o.is_ge()))),
            BinaryOp::In => match right {
                JsValue::Object(obj) => Ok(JsValue::Bool(
                    lookup_property(obj, &left.to_property_key()).is_some(),
                )),
                _ => Err(self.type_error("cannot use 'in' operator on a primitive")),
            },
            BinaryOp::InstanceOf => {
                if !right.is_callable() {
                    return Err(self.type_error("right-hand side of 'instanceof' is not callable"));
                }
                let JsValue::Object(proto) = self.get(right, "prototype")? else {
                    return Ok(JsValue::Bool(false));
                };
                let mut current = left.as_object().and_then(|o| o.borrow().proto.clone());
                while let Some(p) = current {
                    if Rc::ptr_eq(&p, &proto) {
                        return Ok(JsValue::Bool(true));
                    }
                    current = p.borrow().proto.clone();
                }
                Ok(JsValue::Bool(false))
            }
            BinaryOp::LogicalAnd | BinaryOp::LogicalOr | BinaryOp::NullishCoalescing => {
                Err(unsupported("short-circuit operator outside evaluation"))
            }
        }
    }

    fn eval_assign(&mut self, assign: &AssignExpr, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        let reference = match &assign.left {
            AssignTarget::Pat(pat) => {
                let value = self.eval(&assign.right, scope)?;
                let pat: Pat = match pat {
                    AssignTargetPat::Array(a) => Pat::Array(a.clone()),
                    AssignTargetPat::Object(o) => Pat::Object(o.clone()),
                    AssignTargetPat::Invalid(_) => {
                        return Err(EvalError::Syntax("invalid assignment target".to_string()).into());
                    }
                };
                self.bind_pattern(&pat, value.clone(), scope, BindMode::Assign)?;
                return Ok(value);
            }
            AssignTarget::Simple(SimpleAssignTarget::Ident(binding)) => {
                Reference::Binding(binding.id.sym.to_string())
            }
            AssignTarget::Simple(SimpleAssignTarget::Member(member)) => {
                let object = self.eval(&member.obj, scope)?;
                let key = self.member_key(&member.prop, scope)?;
                Reference::Property(object, key)
            }
            AssignTarget::Simple(SimpleAssignTarget::Paren(paren)) => self.reference(&paren.expr, scope)?,
            AssignTarget::Simple(_) => return Err(unsupported("assignment target")),
        };

        let binary_op = match assign.op {
            AssignOp::Assign => None,
            AssignOp::AndAssign | AssignOp::OrAssign | AssignOp::NullishAssign => {
                let current = self.get_reference(&reference, scope)?;
                let keep = match assign.op {
                    AssignOp::AndAssign => !current.truthy(),
                    AssignOp::OrAssign => current.truthy(),
                    _ => !current.is_nullish(),
                };
                if keep {
                    return Ok(current);
                }
                None
            }
            AssignOp::AddAssign => Some(BinaryOp::Add),
            AssignOp::SubAssign => Some(BinaryOp::Sub),
            AssignOp::MulAssign => Some(BinaryOp::Mul),
            AssignOp::DivAssign => Some(BinaryOp::Div),
            AssignOp::ModAssign => Some(BinaryOp::Mod),
            AssignOp::ExpAssign => Some(BinaryOp::Exp),
            AssignOp::LShiftAssign => Some(BinaryOp::LShift),
            AssignOp::RShiftAssign => Some(BinaryOp::RShift),
            AssignOp::ZeroFillRShiftAssign => Some(BinaryOp::ZeroFillRShift),
            AssignOp::BitOrAssign => Some(BinaryOp::BitOr),
            AssignOp::BitXorAssign => Some(BinaryOp::BitXor),
            AssignOp::BitAndAssign => Some(BinaryOp::BitAnd),
        };

        let value = match binary_op {
            None => self.eval(&assign.right, scope)?,
            Some(op) => {
                let current = self.get_reference(&reference, scope)?;
                let right = self.eval(&assign.right, scope)?;
                self.binary(op, &current, &right)?
            }
        };
        self.put_reference(&reference, value.clone(), scope)?;
        Ok(value)
    }

    /// Resolves an expression used as an assignment target.
    pub(crate) fn reference(&mut self, expr: &Expr, scope: &ScopeRef) -> Result<Reference, Abrupt> {
        match expr {
            Expr::Ident(ident) => Ok(Reference::Binding(ident.sym.to_string())),
            Expr::Member(member) => {
                let object = self.eval(&member.obj, scope)?;
                let key = self.member_key(&member.prop, scope)?;
                Ok(Reference::Property(object, key))
            }
            Expr::Paren(paren) => self.reference(&paren.expr, scope),
            _ => Err(EvalError::Syntax("invalid assignment target".to_string()).into()),
        }
    }

    pub(crate) fn get_reference(&mut self, reference: &Reference, scope: &ScopeRef) -> Result<JsValue, Abrupt> {
        match reference {
            Reference::Binding(name) => self.lookup_ident(name, scope),
            Reference::Property(object, key) => self.get(object, key),
        }
    }

    pub(crate) fn put_reference(
        &mut self,
        reference: &Reference,
        value: JsValue,
        scope: &ScopeRef,
    ) -> Result<(), Abrupt> {
        match reference {
            Reference::Binding(name) => {
                self.assign_name(name, value, scope);
                Ok(())
            }
            Reference::Property(object, key) => self.set(object, key.clone(), value),
        }
    }
}

/// Abstract relational comparison; `None` when either side is NaN.
fn compare(left: &JsValue, right: &JsValue) -> Option<std::cmp::Ordering> {
    let (l, r) = (left.to_primitive(), right.to_primitive());
    if let (JsValue::String(a), JsValue::String(b)) = (&l, &r) {
        return Some(a.encode_utf16().cmp(b.encode_utf16()));
    }
    l.to_number().partial_cmp(&r.to_number())
}

/// Short source-ish description of a callee for error messages.
fn describe(expr: &Expr) -> String {
    match expr {
        Expr::Ident(ident) => ident.sym.to_string(),
        Expr::Member(member) => match &member.prop {
            MemberProp::Ident(name) => format!("{}.{}", describe(&member.obj), name.sym),
            _ => format!("{}[...]", describe(&member.obj)),
        },
        Expr::This(_) => "this".to_string(),
        _ => "expression".to_string(),
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

    fn num(source: &str) -> f64 {
        match eval(source) {
            Value::Number(n) => n,
            other => panic!("expected a number from {source:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_arithmetic_and_bitwise() {
        assert_eq!(num("0x1a - -2 * 3"), 32.0);
        assert_eq!(num("-7 % 3"), -1.0);
        assert_eq!(num("255 & 300 >> (-2 * 3 & 6)"), 75.0);
        assert_eq!(num("~5"), -6.0);
        assert_eq!(num("-1 >>> 28"), 15.0);
        assert_eq!(num("1 << 31"), -2147483648.0);
        assert_eq!(num("2 ** 10"), 1024.0);
    }

    #[test]
    fn test_coercions() {
        assert_eq!(eval("'a' + 1 + 2"), Value::String("a12".into()));
        assert_eq!(eval("1 + 2 + 'a'"), Value::String("3a".into()));
        assert_eq!(eval("[1, 2] + ''"), Value::String("1,2".into()));
        assert_eq!(eval("!![]"), Value::Bool(true));
        assert_eq!(eval("'10' == 10"), Value::Bool(true));
        assert_eq!(eval("'b' > 'a'"), Value::Bool(true));
        assert_eq!(eval("typeof missing"), Value::String("undefined".into()));
        assert_eq!(eval("typeof function () {}"), Value::String("function".into()));
    }

    #[test]
    fn test_assignment_operators() {
        assert_eq!(num("var a = 1; a += 2; a *= 3; a"), 9.0);
        assert_eq!(num("var o = { n: 1 }; o.n++; o['n'] <<= 2; o.n"), 8.0);
        assert_eq!(num("var a = 0; a ||= 5; a &&= a + 1; a ??= 9; a"), 6.0);
        assert_eq!(num("var a, b; [a, b] = [1, 2]; ({ a } = { a: b }); a"), 2.0);
    }

    #[test]
    fn test_this_and_arguments() {
        assert_eq!(num("var o = { v: 4, f: function () { return this.v; } }; o.f()"), 4.0);
        assert_eq!(num("(function () { return arguments.length; })(1, 2, 3)"), 3.0);
        assert_eq!(
            num("var o = { v: 2, f: function () { return [1].map(x => this.v + x)[0]; } }; o.f()"),
            3.0
        );
    }

    #[test]
    fn test_function_properties() {
        let src = "
            var d = function (i) {
                if (d.cache === undefined) { d.cache = {}; }
                return d.cache[i] || (d.cache[i] = 'v' + i);
            };
            d(1); d(1) + Object.keys(d.cache).length";
        assert_eq!(eval(src), Value::String("v11".into()));
    }

    #[test]
    fn test_constructors() {
        let src = "
            function P(x) { this.x = x; }
            P.prototype.get = function () { return this.x * 2; };
            var p = new P(21);
            p instanceof P ? p.get() : 0";
        assert_eq!(num(src), 42.0);
    }

    #[test]
    fn test_optional_chaining() {
        assert_eq!(eval("var a = null; a?.b"), Value::Undefined);
        assert_eq!(eval("var a = { b: 1 }; a?.b"), Value::Number(1.0));
        assert_eq!(eval("var f; f?.()"), Value::Undefined);
    }
}
