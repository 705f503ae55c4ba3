//! Runtime values of the sandbox realm and the abstract conversions over them.

use super::scope::ScopeRef;
use super::{Abrupt, Interpreter};
use decloak_core::ast::number_to_string;
use indexmap::IndexMap;
use regex::Regex;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use swc_core::ecma::ast::{Expr, Pat, Stmt};

pub(crate) type ObjectRef = Rc<RefCell<JsObject>>;

pub(crate) type NativeFn = fn(&mut Interpreter, &JsValue, &[JsValue]) -> Result<JsValue, Abrupt>;

#[derive(Clone)]
pub(crate) enum JsValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
}

impl fmt::Debug for JsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", number_to_string(*n)),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "[object {}]", o.borrow().class_name()),
        }
    }
}

#[derive(Debug)]
pub(crate) struct JsObject {
    pub(crate) class: Class,
    pub(crate) props: IndexMap<String, JsValue>,
    pub(crate) proto: Option<ObjectRef>,
}

pub(crate) enum Class {
    Ordinary,
    Array(Vec<JsValue>),
    Function(Callable),
    Error,
    RegExp(JsRegExp),
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary => write!(f, "Ordinary"),
            Self::Array(items) => write!(f, "Array({})", items.len()),
            Self::Function(c) => write!(f, "Function({})", c.name()),
            Self::Error => write!(f, "Error"),
            Self::RegExp(re) => write!(f, "RegExp(/{}/{})", re.source, re.flags),
        }
    }
}

#[derive(Clone)]
pub(crate) enum Callable {
    Closure(Rc<Closure>),
    Native(Native),
}

impl Callable {
    pub(crate) fn name(&self) -> &str {
        match self {
            Self::Closure(c) => &c.name,
            Self::Native(n) => n.name,
        }
    }
}

#[derive(Clone, Copy)]
pub(crate) struct Native {
    pub(crate) name: &'static str,
    pub(crate) call: NativeFn,
}

pub(crate) enum Body {
    Block(Vec<Stmt>),
    Expr(Box<Expr>),
}

pub(crate) struct Closure {
    pub(crate) name: String,
    pub(crate) params: Vec<Pat>,
    pub(crate) body: Body,
    pub(crate) scope: ScopeRef,
    /// Arrows bind neither `this` nor `arguments`; both resolve through
    /// the defining scope.
    pub(crate) is_arrow: bool,
}

impl Closure {
    /// Parameters before the first default or rest parameter.
    pub(crate) fn arity(&self) -> usize {
        self.params
            .iter()
            .take_while(|p| matches!(p, Pat::Ident(_) | Pat::Array(_) | Pat::Object(_)))
            .count()
    }
}

pub(crate) struct JsRegExp {
    pub(crate) source: String,
    pub(crate) flags: String,
    pub(crate) regex: Regex,
}

impl JsRegExp {
    pub(crate) fn global(&self) -> bool {
        self.flags.contains('g')
    }
}

impl JsObject {
    pub(crate) fn new(class: Class, proto: Option<ObjectRef>) -> Self {
        Self {
            class,
            props: IndexMap::new(),
            proto,
        }
    }

    pub(crate) const fn class_name(&self) -> &'static str {
        match self.class {
            Class::Ordinary => "Object",
            Class::Array(_) => "Array",
            Class::Function(_) => "Function",
            Class::Error => "Error",
            Class::RegExp(_) => "RegExp",
        }
    }

    pub(crate) const fn is_callable(&self) -> bool {
        matches!(self.class, Class::Function(_))
    }

    /// Own property lookup, array elements and `length` included.
    pub(crate) fn get_own(&self, key: &str) -> Option<JsValue> {
        if let Class::Array(items) = &self.class {
            if key == "length" {
                return Some(JsValue::Number(items.len() as f64));
            }
            if let Some(index) = array_index(key) {
                return items.get(index).cloned();
            }
        }
        if let Class::Function(callable) = &self.class {
            if let Some(value) = self.props.get(key) {
                return Some(value.clone());
            }
            match (key, callable) {
                ("name", c) => return Some(JsValue::from(c.name())),
                ("length", Callable::Closure(c)) => return Some(JsValue::Number(c.arity() as f64)),
                ("length", Callable::Native(_)) => return Some(JsValue::Number(0.0)),
                _ => {}
            }
        }
        if let Class::RegExp(re) = &self.class {
            match key {
                "source" => return Some(JsValue::from(re.source.as_str())),
                "flags" => return Some(JsValue::from(re.flags.as_str())),
                "global" => return Some(JsValue::Bool(re.global())),
                _ => {}
            }
        }
        self.props.get(key).cloned()
    }

    pub(crate) fn has_own(&self, key: &str) -> bool {
        self.get_own(key).is_some()
    }

    /// Own enumerable keys in JavaScript order: indices, then insertion order.
    pub(crate) fn own_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        if let Class::Array(items) = &self.class {
            keys.extend((0..items.len()).map(|i| i.to_string()));
        }
        let (mut indexed, named): (Vec<&String>, Vec<&String>) =
            self.props.keys().partition(|k| array_index(k).is_some());
        indexed.sort_by_key(|k| array_index(k).unwrap_or(usize::MAX));
        keys.extend(indexed.into_iter().cloned());
        keys.extend(named.into_iter().cloned());
        keys
    }
}

pub(crate) fn array_index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    key.parse::<usize>().ok()
}

impl From<&str> for JsValue {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for JsValue {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<f64> for JsValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for JsValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl JsValue {
    pub(crate) const fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub(crate) fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub(crate) fn is_callable(&self) -> bool {
        self.as_object().is_some_and(|o| o.borrow().is_callable())
    }

    pub(crate) fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(o) if o.borrow().is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    pub(crate) fn truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) => true,
        }
    }

    pub(crate) fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => string_to_number(s),
            Self::Object(_) => string_to_number(&self.to_js_string()),
        }
    }

    pub(crate) fn to_js_string(&self) -> String {
        to_string_depth(self, 0)
    }

    /// Property key of a computed member access.
    pub(crate) fn to_property_key(&self) -> String {
        self.to_js_string()
    }

    pub(crate) fn to_int32(&self) -> i32 {
        to_int32(self.to_number())
    }

    pub(crate) fn to_uint32(&self) -> u32 {
        to_int32(self.to_number()) as u32
    }

    /// ToPrimitive without user-defined `valueOf`/`toString`.
    pub(crate) fn to_primitive(&self) -> Self {
        match self {
            Self::Object(_) => Self::from(self.to_js_string()),
            other => other.clone(),
        }
    }
}

fn to_string_depth(value: &JsValue, depth: usize) -> String {
    match value {
        JsValue::Undefined => "undefined".to_string(),
        JsValue::Null => "null".to_string(),
        JsValue::Bool(b) => b.to_string(),
        JsValue::Number(n) => number_to_string(*n),
        JsValue::String(s) => s.to_string(),
        JsValue::Object(o) => {
            let obj = o.borrow();
            match &obj.class {
                Class::Array(items) if depth < 32 => items
                    .iter()
                    .map(|item| match item {
                        JsValue::Undefined | JsValue::Null => String::new(),
                        other => to_string_depth(other, depth + 1),
                    })
                    .collect::<Vec<_>>()
                    .join(","),
                Class::Array(_) => String::new(),
                Class::Function(c) => format!("function {}() {{ [native code] }}", c.name()),
                Class::Error => {
                    let name = obj.props.get("name").map(JsValue::to_js_string);
                    let message = obj.props.get("message").map(JsValue::to_js_string);
                    match (name, message) {
                        (Some(n), Some(m)) if !m.is_empty() => format!("{n}: {m}"),
                        (Some(n), _) => n,
                        _ => "Error".to_string(),
                    }
                }
                Class::RegExp(re) => format!("/{}/{}", re.source, re.flags),
                Class::Ordinary => "[object Object]".to_string(),
            }
        }
    }
}

/// StringToNumber: decimal, `0x`/`0o`/`0b` prefixes and `Infinity`.
pub(crate) fn string_to_number(s: &str) -> f64 {
    let s = s.trim();
    if s.is_empty() {
        return 0.0;
    }
    let radix = |prefix: [&str; 2], radix: u32| {
        prefix
            .iter()
            .find_map(|p| s.strip_prefix(p))
            .map(|digits| match u64::from_str_radix(digits, radix) {
                Ok(v) => v as f64,
                Err(_) => f64::NAN,
            })
    };
    if let Some(v) = radix(["0x", "0X"], 16)
        .or_else(|| radix(["0o", "0O"], 8))
        .or_else(|| radix(["0b", "0B"], 2))
    {
        return v;
    }
    match s {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if !s
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'))
    {
        return f64::NAN;
    }
    s.parse::<f64>().unwrap_or(f64::NAN)
}

pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let n = n.trunc().rem_euclid(4_294_967_296.0);
    if n >= 2_147_483_648.0 {
        (n - 4_294_967_296.0) as i32
    } else {
        n as i32
    }
}

pub(crate) fn strict_equals(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Undefined, JsValue::Undefined) | (JsValue::Null, JsValue::Null) => true,
        (JsValue::Bool(x), JsValue::Bool(y)) => x == y,
        (JsValue::Number(x), JsValue::Number(y)) => x == y,
        (JsValue::String(x), JsValue::String(y)) => x == y,
        (JsValue::Object(x), JsValue::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

pub(crate) fn loose_equals(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (x, y) if x.is_nullish() && y.is_nullish() => true,
        (x, y) if x.is_nullish() || y.is_nullish() => false,
        (JsValue::Object(_), JsValue::Object(_)) => strict_equals(a, b),
        (JsValue::Object(_), _) => loose_equals(&a.to_primitive(), b),
        (_, JsValue::Object(_)) => loose_equals(a, &b.to_primitive()),
        (JsValue::String(x), JsValue::String(y)) => x == y,
        _ => a.to_number() == b.to_number(),
    }
}

/// `SameValueZero`, used by `includes`.
pub(crate) fn same_value_zero(a: &JsValue, b: &JsValue) -> bool {
    match (a, b) {
        (JsValue::Number(x), JsValue::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

/// `Number.prototype.toString(radix)`.
pub(crate) fn number_to_radix(value: f64, radix: u32) -> String {
    if radix == 10 || !value.is_finite() {
        return number_to_string(value);
    }
    let negative = value < 0.0;
    let mut int = value.abs().trunc();
    let mut frac = value.abs() - int;
    let mut digits = Vec::new();
    if int == 0.0 {
        digits.push('0');
    }
    while int >= 1.0 {
        let d = (int % f64::from(radix)) as u32;
        digits.push(std::char::from_digit(d, radix).unwrap_or('0'));
        int = (int / f64::from(radix)).trunc();
    }
    digits.reverse();
    let mut out: String = digits.into_iter().collect();
    if frac > 0.0 {
        out.push('.');
        for _ in 0..20 {
            frac *= f64::from(radix);
            let d = frac.trunc() as u32;
            out.push(std::char::from_digit(d, radix).unwrap_or('0'));
            frac -= frac.trunc();
            if frac == 0.0 {
                break;
            }
        }
    }
    if negative {
        out.insert(0, '-');
    }
    out
}

/// UTF-16 code units of a string, as `charCodeAt` and `length` see them.
pub(crate) fn code_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

pub(crate) fn from_code_units(units: &[u16]) -> String {
    String::from_utf16_lossy(units)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_to_number() {
        assert_eq!(string_to_number(" 42 "), 42.0);
        assert_eq!(string_to_number("0x1f"), 31.0);
        assert_eq!(string_to_number(""), 0.0);
        assert!(string_to_number("12px").is_nan());
        assert!(string_to_number("inf").is_nan());
        assert_eq!(string_to_number("-Infinity"), f64::NEG_INFINITY);
    }

    #[test]
    fn test_to_int32() {
        assert_eq!(to_int32(4_294_967_295.0), -1);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
    }

    #[test]
    fn test_equality() {
        let one = JsValue::Number(1.0);
        assert!(loose_equals(&one, &JsValue::from("1")));
        assert!(!strict_equals(&one, &JsValue::from("1")));
        assert!(loose_equals(&JsValue::Null, &JsValue::Undefined));
        assert!(!loose_equals(&JsValue::Null, &JsValue::Number(0.0)));
        assert!(same_value_zero(&JsValue::Number(f64::NAN), &JsValue::Number(f64::NAN)));
    }

    #[test]
    fn test_number_to_radix() {
        assert_eq!(number_to_radix(255.0, 16), "ff");
        assert_eq!(number_to_radix(-8.0, 2), "-1000");
        assert_eq!(number_to_radix(0.5, 2), "0.1");
        assert_eq!(number_to_radix(7.0, 10), "7");
    }
}
