//! Global bindings and built-in prototypes of a realm.
//!
//! Only deterministic, side-effect free built-ins are installed. There is no
//! `eval`, no `Function` constructor, no timers, no `Math.random` and no
//! access to anything outside the realm.

use super::scope::{self, ScopeRef};
use super::value::{
    code_units, from_code_units, number_to_radix, same_value_zero, strict_equals, Callable, Class,
    JsObject, JsValue, Native, NativeFn, ObjectRef,
};
use super::{lookup_property, Abrupt, Interpreter, Realm};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// `atob` accepts input with or without padding.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

const ERROR_KINDS: [&str; 5] = ["TypeError", "RangeError", "SyntaxError", "ReferenceError", "URIError"];

type NativeResult = Result<JsValue, Abrupt>;

fn arg(args: &[JsValue], i: usize) -> JsValue {
    args.get(i).cloned().unwrap_or(JsValue::Undefined)
}

fn object(class: Class, proto: Option<&ObjectRef>) -> ObjectRef {
    Rc::new(RefCell::new(JsObject::new(class, proto.cloned())))
}

fn define(target: &ObjectRef, key: &str, value: JsValue) {
    target.borrow_mut().props.insert(key.to_string(), value);
}

struct Installer {
    function_proto: ObjectRef,
}

impl Installer {
    fn native(&self, name: &'static str, call: NativeFn) -> ObjectRef {
        object(
            Class::Function(Callable::Native(Native { name, call })),
            Some(&self.function_proto),
        )
    }

    fn methods(&self, target: &ObjectRef, methods: &[(&'static str, NativeFn)]) {
        for (name, call) in methods {
            define(target, name, JsValue::Object(self.native(name, *call)));
        }
    }

    /// A constructor linked to its prototype object.
    fn constructor(&self, name: &'static str, call: NativeFn, proto: &ObjectRef) -> ObjectRef {
        let ctor = self.native(name, call);
        define(&ctor, "prototype", JsValue::Object(proto.clone()));
        define(proto, "constructor", JsValue::Object(ctor.clone()));
        ctor
    }
}

pub(super) fn install(global: &ScopeRef) -> Realm {
    let object_proto = object(Class::Ordinary, None);
    let function_proto = object(
        Class::Function(Callable::Native(Native {
            name: "",
            call: |_, _, _| Ok(JsValue::Undefined),
        })),
        Some(&object_proto),
    );
    let array_proto = object(Class::Array(Vec::new()), Some(&object_proto));
    let string_proto = object(Class::Ordinary, Some(&object_proto));
    let number_proto = object(Class::Ordinary, Some(&object_proto));
    let boolean_proto = object(Class::Ordinary, Some(&object_proto));
    let error_proto = object(Class::Ordinary, Some(&object_proto));
    let regexp_proto = object(Class::Ordinary, Some(&object_proto));

    let i = Installer {
        function_proto: function_proto.clone(),
    };

    i.methods(&object_proto, &[
        ("hasOwnProperty", object_has_own_property),
        ("toString", object_to_string),
        ("valueOf", |_, this, _| Ok(this.clone())),
    ]);
    i.methods(&function_proto, &[
        ("call", function_call),
        ("apply", function_apply),
        ("toString", |_, this, _| Ok(JsValue::from(this.to_js_string()))),
    ]);
    i.methods(&array_proto, &[
        ("push", array_push),
        ("pop", array_pop),
        ("shift", array_shift),
        ("unshift", array_unshift),
        ("slice", array_slice),
        ("splice", array_splice),
        ("concat", array_concat),
        ("join", array_join),
        ("reverse", array_reverse),
        ("indexOf", array_index_of),
        ("lastIndexOf", array_last_index_of),
        ("includes", array_includes),
        ("fill", array_fill),
        ("map", array_map),
        ("forEach", array_for_each),
        ("filter", array_filter),
        ("some", array_some),
        ("every", array_every),
        ("find", array_find),
        ("findIndex", array_find_index),
        ("reduce", array_reduce),
        ("sort", array_sort),
        ("toString", |interp, this, _| array_join(interp, this, &[])),
    ]);
    i.methods(&string_proto, &[
        ("charAt", string_char_at),
        ("charCodeAt", string_char_code_at),
        ("indexOf", string_index_of),
        ("lastIndexOf", string_last_index_of),
        ("includes", string_includes),
        ("startsWith", string_starts_with),
        ("endsWith", string_ends_with),
        ("slice", string_slice),
        ("substring", string_substring),
        ("substr", string_substr),
        ("toLowerCase", string_to_lower_case),
        ("toUpperCase", string_to_upper_case),
        ("trim", string_trim),
        ("trimStart", string_trim_start),
        ("trimEnd", string_trim_end),
        ("split", string_split),
        ("replace", string_replace),
        ("replaceAll", string_replace_all),
        ("match", string_match),
        ("concat", string_concat),
        ("repeat", string_repeat),
        ("padStart", string_pad_start),
        ("padEnd", string_pad_end),
        ("toString", string_value_of),
        ("valueOf", string_value_of),
    ]);
    i.methods(&number_proto, &[
        ("toString", number_to_string_method),
        ("toFixed", number_to_fixed),
        ("valueOf", |_, this, _| Ok(JsValue::Number(this.to_number()))),
    ]);
    i.methods(&boolean_proto, &[
        ("toString", |_, this, _| Ok(JsValue::from(this.to_js_string()))),
        ("valueOf", |_, this, _| Ok(JsValue::Bool(this.truthy()))),
    ]);
    i.methods(&regexp_proto, &[
        ("test", regexp_test),
        ("exec", regexp_exec),
        ("toString", |_, this, _| Ok(JsValue::from(this.to_js_string()))),
    ]);
    define(&error_proto, "name", JsValue::from("Error"));
    define(&error_proto, "message", JsValue::from(""));
    i.methods(&error_proto, &[("toString", |_, this, _| Ok(JsValue::from(this.to_js_string())))]);

    let declare = |name: &str, value: JsValue| scope::declare(global, name, value);
    let declare_obj = |name: &str, obj: ObjectRef| scope::declare(global, name, JsValue::Object(obj));

    declare("this", JsValue::Undefined);
    declare("undefined", JsValue::Undefined);
    declare("NaN", JsValue::Number(f64::NAN));
    declare("Infinity", JsValue::Number(f64::INFINITY));

    let object_ctor = i.constructor("Object", object_ctor, &object_proto);
    i.methods(&object_ctor, &[
        ("keys", object_keys),
        ("values", object_values),
        ("entries", object_entries),
        ("assign", object_assign),
        ("create", object_create),
        ("freeze", |_, _, args| Ok(arg(args, 0))),
        ("defineProperty", object_define_property),
        ("getPrototypeOf", object_get_prototype_of),
        ("getOwnPropertyNames", object_keys),
    ]);
    declare_obj("Object", object_ctor);

    let array_ctor = i.constructor("Array", array_ctor, &array_proto);
    i.methods(&array_ctor, &[
        ("isArray", |_, _, args| Ok(JsValue::Bool(as_array(&arg(args, 0)).is_some()))),
        ("from", array_from),
        ("of", |interp, _, args| interp.new_array(args.to_vec())),
    ]);
    declare_obj("Array", array_ctor);

    let string_ctor = i.constructor("String", string_ctor, &string_proto);
    i.methods(&string_ctor, &[("fromCharCode", string_from_char_code)]);
    declare_obj("String", string_ctor);

    let number_ctor = i.constructor("Number", number_ctor, &number_proto);
    i.methods(&number_ctor, &[
        ("isInteger", |_, _, args| {
            Ok(JsValue::Bool(matches!(arg(args, 0), JsValue::Number(n) if n.is_finite() && n.trunc() == n)))
        }),
        ("isNaN", |_, _, args| Ok(JsValue::Bool(matches!(arg(args, 0), JsValue::Number(n) if n.is_nan())))),
        ("parseInt", parse_int),
        ("parseFloat", parse_float),
    ]);
    declare_obj("Number", number_ctor);

    declare_obj(
        "Boolean",
        i.constructor("Boolean", |_, _, args| Ok(JsValue::Bool(arg(args, 0).truthy())), &boolean_proto),
    );
    declare_obj("RegExp", i.constructor("RegExp", regexp_ctor, &regexp_proto));
    declare_obj("Error", i.constructor("Error", error_ctor, &error_proto));

    let mut error_protos = HashMap::new();
    let kinds: [(&'static str, NativeFn); 5] = [
        (ERROR_KINDS[0], type_error_ctor),
        (ERROR_KINDS[1], range_error_ctor),
        (ERROR_KINDS[2], syntax_error_ctor),
        (ERROR_KINDS[3], reference_error_ctor),
        (ERROR_KINDS[4], uri_error_ctor),
    ];
    for (name, call) in kinds {
        let proto = object(Class::Ordinary, Some(&error_proto));
        define(&proto, "name", JsValue::from(name));
        declare_obj(name, i.constructor(name, call, &proto));
        error_protos.insert(name, proto);
    }

    let math = object(Class::Ordinary, Some(&object_proto));
    define(&math, "PI", JsValue::Number(std::f64::consts::PI));
    define(&math, "E", JsValue::Number(std::f64::consts::E));
    i.methods(&math, &[
        ("floor", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().floor()))),
        ("ceil", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().ceil()))),
        ("round", |_, _, a| Ok(JsValue::Number((arg(a, 0).to_number() + 0.5).floor()))),
        ("trunc", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().trunc()))),
        ("abs", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().abs()))),
        ("sqrt", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().sqrt()))),
        ("log", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().ln()))),
        ("exp", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().exp()))),
        ("sign", math_sign),
        ("pow", |_, _, a| Ok(JsValue::Number(arg(a, 0).to_number().powf(arg(a, 1).to_number())))),
        ("imul", |_, _, a| Ok(JsValue::Number(f64::from(arg(a, 0).to_int32().wrapping_mul(arg(a, 1).to_int32()))))),
        ("max", math_max),
        ("min", math_min),
    ]);
    declare_obj("Math", math);

    let json = object(Class::Ordinary, Some(&object_proto));
    i.methods(&json, &[("parse", json_parse), ("stringify", json_stringify)]);
    declare_obj("JSON", json);

    let globals: [(&'static str, NativeFn); 12] = [
        ("parseInt", parse_int),
        ("parseFloat", parse_float),
        ("isNaN", |_, _, a| Ok(JsValue::Bool(arg(a, 0).to_number().is_nan()))),
        ("isFinite", |_, _, a| Ok(JsValue::Bool(arg(a, 0).to_number().is_finite()))),
        ("atob", atob),
        ("btoa", btoa),
        ("decodeURIComponent", decode_uri_component),
        ("decodeURI", decode_uri_component),
        ("encodeURIComponent", encode_uri_component),
        ("encodeURI", encode_uri),
        ("escape", escape),
        ("unescape", unescape),
    ];
    for (name, call) in globals {
        declare_obj(name, i.native(name, call));
    }

    Realm {
        object_proto,
        function_proto,
        array_proto,
        string_proto,
        number_proto,
        boolean_proto,
        error_proto,
        error_protos,
        regexp_proto,
    }
}

// ---------------------------------------------------------------------------
// Object and Function

fn object_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    match arg(args, 0) {
        value @ JsValue::Object(_) => Ok(value),
        _ => Ok(JsValue::Object(interp.new_object())),
    }
}

fn object_has_own_property(_: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let key = arg(args, 0).to_property_key();
    Ok(JsValue::Bool(match this {
        JsValue::Object(obj) => obj.borrow().has_own(&key),
        JsValue::String(s) => {
            key == "length" || super::value::array_index(&key).is_some_and(|i| i < code_units(s).len())
        }
        _ => false,
    }))
}

fn object_to_string(_: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    let tag = match this {
        JsValue::Undefined => "Undefined",
        JsValue::Null => "Null",
        JsValue::Bool(_) => "Boolean",
        JsValue::Number(_) => "Number",
        JsValue::String(_) => "String",
        JsValue::Object(obj) => obj.borrow().class_name(),
    };
    Ok(JsValue::from(format!("[object {tag}]")))
}

fn own_keys_of(interp: &Interpreter, value: &JsValue) -> Result<Vec<String>, Abrupt> {
    match value {
        JsValue::Object(obj) => Ok(obj.borrow().own_keys()),
        JsValue::String(s) => Ok((0..code_units(s).len()).map(|i| i.to_string()).collect()),
        JsValue::Undefined | JsValue::Null => {
            Err(interp.type_error("Cannot convert undefined or null to object"))
        }
        _ => Ok(Vec::new()),
    }
}

fn object_keys(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let keys = own_keys_of(interp, &arg(args, 0))?;
    interp.new_array(keys.into_iter().map(JsValue::from).collect())
}

fn object_values(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let target = arg(args, 0);
    let mut values = Vec::new();
    for key in own_keys_of(interp, &target)? {
        values.push(interp.get(&target, &key)?);
    }
    interp.new_array(values)
}

fn object_entries(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let target = arg(args, 0);
    let mut entries = Vec::new();
    for key in own_keys_of(interp, &target)? {
        let value = interp.get(&target, &key)?;
        entries.push(interp.new_array(vec![JsValue::from(key), value])?);
    }
    interp.new_array(entries)
}

fn object_assign(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let target = arg(args, 0);
    for source in args.iter().skip(1) {
        if source.is_nullish() {
            continue;
        }
        for key in own_keys_of(interp, source)? {
            let value = interp.get(source, &key)?;
            interp.set(&target, key, value)?;
        }
    }
    Ok(target)
}

fn object_create(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let proto = match arg(args, 0) {
        JsValue::Object(proto) => Some(proto),
        JsValue::Null => None,
        _ => return Err(interp.type_error("Object prototype may only be an Object or null")),
    };
    Ok(JsValue::Object(interp.alloc(Class::Ordinary, proto)))
}

fn object_define_property(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let target = arg(args, 0);
    let key = arg(args, 1).to_property_key();
    let descriptor = arg(args, 2);
    if let JsValue::Object(desc) = &descriptor {
        if lookup_property(desc, "get").is_some() || lookup_property(desc, "set").is_some() {
            return Err(decloak_utils::errors::EvalError::Unsupported("accessor properties".to_string()).into());
        }
    }
    let value = match &descriptor {
        JsValue::Object(_) => interp.get(&descriptor, "value")?,
        _ => JsValue::Undefined,
    };
    interp.set(&target, key, value)?;
    Ok(target)
}

fn object_get_prototype_of(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(match arg(args, 0).as_object().and_then(|o| o.borrow().proto.clone()) {
        Some(proto) => JsValue::Object(proto),
        None => JsValue::Null,
    })
}

fn function_call(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    interp.call(this, arg(args, 0), args.get(1..).unwrap_or_default())
}

fn function_apply(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let call_args = match arg(args, 1) {
        JsValue::Undefined | JsValue::Null => Vec::new(),
        list => interp.iterate(&list)?,
    };
    interp.call(this, arg(args, 0), &call_args)
}

// ---------------------------------------------------------------------------
// Array

fn as_array(value: &JsValue) -> Option<ObjectRef> {
    value
        .as_object()
        .filter(|o| matches!(o.borrow().class, Class::Array(_)))
        .cloned()
}

fn this_array(interp: &Interpreter, this: &JsValue, method: &str) -> Result<ObjectRef, Abrupt> {
    as_array(this).ok_or_else(|| interp.type_error(format!("Array.prototype.{method} called on a non-array")))
}

fn items_of(array: &ObjectRef) -> Vec<JsValue> {
    match &array.borrow().class {
        Class::Array(items) => items.clone(),
        _ => Vec::new(),
    }
}

/// Runs `f` on the backing vector of an array object.
fn with_items<T>(array: &ObjectRef, f: impl FnOnce(&mut Vec<JsValue>) -> T) -> Option<T> {
    match &mut array.borrow_mut().class {
        Class::Array(items) => Some(f(items)),
        _ => None,
    }
}

/// Integer conversion used by index arguments.
fn to_integer(value: &JsValue) -> f64 {
    let n = value.to_number();
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}

/// Resolves a possibly negative index against `len`, as `slice` does.
fn relative_index(value: &JsValue, len: usize, default: usize) -> usize {
    if matches!(value, JsValue::Undefined) {
        return default;
    }
    let n = to_integer(value);
    if n < 0.0 {
        (len as f64 + n).max(0.0) as usize
    } else {
        n.min(len as f64) as usize
    }
}

fn callback(interp: &Interpreter, args: &[JsValue], method: &str) -> Result<JsValue, Abrupt> {
    let f = arg(args, 0);
    if f.is_callable() {
        Ok(f)
    } else {
        Err(interp.type_error(format!("{method}: callback is not a function")))
    }
}

fn array_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    if let [JsValue::Number(n)] = args {
        if *n < 0.0 || n.fract() != 0.0 || *n > f64::from(u32::MAX) {
            return Err(interp.throw("RangeError", "Invalid array length"));
        }
        interp.check_length(*n as usize)?;
        return interp.new_array(vec![JsValue::Undefined; *n as usize]);
    }
    interp.new_array(args.to_vec())
}

fn array_from(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let source = arg(args, 0);
    let items = match &source {
        JsValue::Object(obj) if !matches!(obj.borrow().class, Class::Array(_)) => {
            let len = interp.get(&source, "length")?.to_number();
            let len = if len.is_nan() || len < 0.0 { 0 } else { len as usize };
            interp.check_length(len)?;
            let mut items = Vec::with_capacity(len);
            for i in 0..len {
                items.push(interp.get(&source, &i.to_string())?);
            }
            items
        }
        other => interp.iterate(other)?,
    };
    let mapper = arg(args, 1);
    if mapper.is_callable() {
        let mut mapped = Vec::with_capacity(items.len());
        for (i, item) in items.into_iter().enumerate() {
            mapped.push(interp.call(&mapper, JsValue::Undefined, &[item, JsValue::Number(i as f64)])?);
        }
        return interp.new_array(mapped);
    }
    interp.new_array(items)
}

fn array_push(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "push")?;
    interp.check_length(items_of(&array).len() + args.len())?;
    let len = with_items(&array, |items| {
        items.extend_from_slice(args);
        items.len()
    })
    .unwrap_or_default();
    Ok(JsValue::Number(len as f64))
}

fn array_pop(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "pop")?;
    Ok(with_items(&array, Vec::pop).flatten().unwrap_or(JsValue::Undefined))
}

fn array_shift(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "shift")?;
    Ok(with_items(&array, |items| (!items.is_empty()).then(|| items.remove(0)))
        .flatten()
        .unwrap_or(JsValue::Undefined))
}

fn array_unshift(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "unshift")?;
    interp.check_length(items_of(&array).len() + args.len())?;
    let len = with_items(&array, |items| {
        items.splice(0..0, args.iter().cloned());
        items.len()
    })
    .unwrap_or_default();
    Ok(JsValue::Number(len as f64))
}

fn array_slice(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "slice")?;
    let items = items_of(&array);
    let start = relative_index(&arg(args, 0), items.len(), 0);
    let end = relative_index(&arg(args, 1), items.len(), items.len());
    interp.new_array(items.get(start..end.max(start)).unwrap_or_default().to_vec())
}

fn array_splice(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "splice")?;
    let len = items_of(&array).len();
    let start = relative_index(&arg(args, 0), len, 0);
    let delete = match args.get(1) {
        None => len - start,
        Some(count) => (to_integer(count).max(0.0) as usize).min(len - start),
    };
    let inserted = args.get(2..).unwrap_or_default().to_vec();
    interp.check_length(len - delete + inserted.len())?;
    let removed = with_items(&array, |items| {
        items.splice(start..start + delete, inserted).collect::<Vec<_>>()
    })
    .unwrap_or_default();
    interp.new_array(removed)
}

fn array_concat(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "concat")?;
    let mut items = items_of(&array);
    for value in args {
        match as_array(value) {
            Some(other) => items.extend(items_of(&other)),
            None => items.push(value.clone()),
        }
        interp.check_length(items.len())?;
    }
    interp.new_array(items)
}

fn array_join(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "join")?;
    let separator = match arg(args, 0) {
        JsValue::Undefined => ",".to_string(),
        other => other.to_js_string(),
    };
    let joined = items_of(&array)
        .iter()
        .map(|item| match item {
            JsValue::Undefined | JsValue::Null => String::new(),
            other => other.to_js_string(),
        })
        .collect::<Vec<_>>()
        .join(&separator);
    interp.new_string(joined)
}

fn array_reverse(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "reverse")?;
    with_items(&array, |items| items.reverse());
    Ok(this.clone())
}

fn array_index_of(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "indexOf")?;
    let items = items_of(&array);
    let from = relative_index(&arg(args, 1), items.len(), 0);
    let needle = arg(args, 0);
    let found = items
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, item)| strict_equals(item, &needle))
        .map(|(i, _)| i as f64);
    Ok(JsValue::Number(found.unwrap_or(-1.0)))
}

fn array_last_index_of(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "lastIndexOf")?;
    let needle = arg(args, 0);
    let found = items_of(&array)
        .iter()
        .rposition(|item| strict_equals(item, &needle))
        .map(|i| i as f64);
    Ok(JsValue::Number(found.unwrap_or(-1.0)))
}

fn array_includes(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "includes")?;
    let needle = arg(args, 0);
    Ok(JsValue::Bool(
        items_of(&array).iter().any(|item| same_value_zero(item, &needle)),
    ))
}

fn array_fill(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "fill")?;
    let len = items_of(&array).len();
    let start = relative_index(&arg(args, 1), len, 0);
    let end = relative_index(&arg(args, 2), len, len);
    let value = arg(args, 0);
    with_items(&array, |items| {
        for item in items.iter_mut().take(end).skip(start) {
            *item = value.clone();
        }
    });
    Ok(this.clone())
}

/// Calls `f(item, index, array)` for every element, stopping when `visit`
/// returns `Some`.
fn each<T>(
    interp: &mut Interpreter,
    this: &JsValue,
    args: &[JsValue],
    method: &str,
    mut visit: impl FnMut(usize, JsValue, JsValue) -> Option<T>,
) -> Result<Option<T>, Abrupt> {
    let array = this_array(interp, this, method)?;
    let f = callback(interp, args, method)?;
    let this_arg = arg(args, 1);
    for (i, item) in items_of(&array).into_iter().enumerate() {
        let result = interp.call(&f, this_arg.clone(), &[item.clone(), JsValue::Number(i as f64), this.clone()])?;
        if let Some(done) = visit(i, item, result) {
            return Ok(Some(done));
        }
    }
    Ok(None)
}

fn array_map(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut out = Vec::new();
    each::<()>(interp, this, args, "map", |_, _, result| {
        out.push(result);
        None
    })?;
    interp.new_array(out)
}

fn array_for_each(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    each::<()>(interp, this, args, "forEach", |_, _, _| None)?;
    Ok(JsValue::Undefined)
}

fn array_filter(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut out = Vec::new();
    each::<()>(interp, this, args, "filter", |_, item, result| {
        if result.truthy() {
            out.push(item);
        }
        None
    })?;
    interp.new_array(out)
}

fn array_some(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let found = each(interp, this, args, "some", |_, _, r| r.truthy().then_some(()))?;
    Ok(JsValue::Bool(found.is_some()))
}

fn array_every(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let failed = each(interp, this, args, "every", |_, _, r| (!r.truthy()).then_some(()))?;
    Ok(JsValue::Bool(failed.is_none()))
}

fn array_find(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let found = each(interp, this, args, "find", |_, item, r| r.truthy().then_some(item))?;
    Ok(found.unwrap_or(JsValue::Undefined))
}

fn array_find_index(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let found = each(interp, this, args, "findIndex", |i, _, r| r.truthy().then_some(i))?;
    Ok(JsValue::Number(found.map_or(-1.0, |i| i as f64)))
}

fn array_reduce(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "reduce")?;
    let f = callback(interp, args, "reduce")?;
    let mut items = items_of(&array).into_iter().enumerate();
    let mut acc = match args.get(1) {
        Some(initial) => initial.clone(),
        None => match items.next() {
            Some((_, first)) => first,
            None => return Err(interp.type_error("Reduce of empty array with no initial value")),
        },
    };
    for (i, item) in items {
        acc = interp.call(&f, JsValue::Undefined, &[acc, item, JsValue::Number(i as f64), this.clone()])?;
    }
    Ok(acc)
}

fn array_sort(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let array = this_array(interp, this, "sort")?;
    let comparator = arg(args, 0);
    let sorted = merge_sort(interp, items_of(&array), &comparator)?;
    with_items(&array, |items| *items = sorted);
    Ok(this.clone())
}

fn sort_before(interp: &mut Interpreter, a: &JsValue, b: &JsValue, comparator: &JsValue) -> Result<bool, Abrupt> {
    match (a, b) {
        (JsValue::Undefined, _) => return Ok(false),
        (_, JsValue::Undefined) => return Ok(true),
        _ => {}
    }
    if comparator.is_callable() {
        let order = interp.call(comparator, JsValue::Undefined, &[a.clone(), b.clone()])?;
        return Ok(order.to_number() <= 0.0);
    }
    Ok(code_units(&a.to_js_string()) <= code_units(&b.to_js_string()))
}

/// Stable merge sort with a fallible comparator.
fn merge_sort(interp: &mut Interpreter, mut items: Vec<JsValue>, comparator: &JsValue) -> Result<Vec<JsValue>, Abrupt> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort(interp, items, comparator)?;
    let right = merge_sort(interp, right, comparator)?;
    let mut merged = Vec::with_capacity(left.len() + right.len());
    let (mut l, mut r) = (left.into_iter().peekable(), right.into_iter().peekable());
    loop {
        let take_left = match (l.peek(), r.peek()) {
            (Some(a), Some(b)) => sort_before(interp, a, b, comparator)?,
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (None, None) => break,
        };
        let next = if take_left { l.next() } else { r.next() };
        merged.extend(next);
    }
    Ok(merged)
}

// ---------------------------------------------------------------------------
// String

fn this_string(interp: &Interpreter, this: &JsValue, method: &str) -> Result<String, Abrupt> {
    if this.is_nullish() {
        return Err(interp.type_error(format!("String.prototype.{method} called on null or undefined")));
    }
    Ok(this.to_js_string())
}

fn units_string(units: &[u16]) -> JsValue {
    JsValue::from(from_code_units(units))
}

fn find_units(haystack: &[u16], needle: &[u16], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    (from..=haystack.len().saturating_sub(needle.len()))
        .find(|&i| haystack.get(i..i + needle.len()) == Some(needle))
}

fn string_ctor(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(match args.first() {
        None => JsValue::from(""),
        Some(value) => JsValue::from(value.to_js_string()),
    })
}

fn string_from_char_code(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let units: Vec<u16> = args.iter().map(|a| (a.to_uint32() & 0xFFFF) as u16).collect();
    interp.new_string(from_code_units(&units))
}

fn string_value_of(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "valueOf")?))
}

fn string_char_at(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "charAt")?);
    let index = to_integer(&arg(args, 0));
    Ok(if index >= 0.0 && (index as usize) < units.len() {
        units_string(&units[index as usize..=index as usize])
    } else {
        JsValue::from("")
    })
}

fn string_char_code_at(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "charCodeAt")?);
    let index = to_integer(&arg(args, 0));
    Ok(JsValue::Number(if index >= 0.0 {
        units.get(index as usize).map_or(f64::NAN, |u| f64::from(*u))
    } else {
        f64::NAN
    }))
}

fn string_index_of(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "indexOf")?);
    let needle = code_units(&arg(args, 0).to_js_string());
    let from = to_integer(&arg(args, 1)).max(0.0) as usize;
    Ok(JsValue::Number(find_units(&units, &needle, from).map_or(-1.0, |i| i as f64)))
}

fn string_last_index_of(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "lastIndexOf")?);
    let needle = code_units(&arg(args, 0).to_js_string());
    let found = (0..=units.len().saturating_sub(needle.len()))
        .rev()
        .find(|&i| units.get(i..i + needle.len()) == Some(needle.as_slice()));
    Ok(JsValue::Number(found.map_or(-1.0, |i| i as f64)))
}

fn string_includes(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let s = this_string(interp, this, "includes")?;
    Ok(JsValue::Bool(s.contains(&arg(args, 0).to_js_string())))
}

fn string_starts_with(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "startsWith")?);
    let needle = code_units(&arg(args, 0).to_js_string());
    let at = relative_index(&arg(args, 1), units.len(), 0);
    Ok(JsValue::Bool(units[at..].starts_with(&needle)))
}

fn string_ends_with(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "endsWith")?);
    let needle = code_units(&arg(args, 0).to_js_string());
    let end = relative_index(&arg(args, 1), units.len(), units.len());
    Ok(JsValue::Bool(units[..end].ends_with(&needle)))
}

fn string_slice(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "slice")?);
    let start = relative_index(&arg(args, 0), units.len(), 0);
    let end = relative_index(&arg(args, 1), units.len(), units.len());
    Ok(units_string(units.get(start..end.max(start)).unwrap_or_default()))
}

fn string_substring(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "substring")?);
    let clamp = |v: &JsValue, default: usize| match v {
        JsValue::Undefined => default,
        v => to_integer(v).clamp(0.0, units.len() as f64) as usize,
    };
    let a = clamp(&arg(args, 0), 0);
    let b = clamp(&arg(args, 1), units.len());
    Ok(units_string(&units[a.min(b)..a.max(b)]))
}

fn string_substr(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&this_string(interp, this, "substr")?);
    let start = relative_index(&arg(args, 0), units.len(), 0);
    let len = match arg(args, 1) {
        JsValue::Undefined => units.len() - start,
        v => (to_integer(&v).max(0.0) as usize).min(units.len() - start),
    };
    Ok(units_string(&units[start..start + len]))
}

fn string_to_lower_case(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "toLowerCase")?.to_lowercase()))
}

fn string_to_upper_case(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "toUpperCase")?.to_uppercase()))
}

fn string_trim(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "trim")?.trim()))
}

fn string_trim_start(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "trimStart")?.trim_start()))
}

fn string_trim_end(interp: &mut Interpreter, this: &JsValue, _: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(this_string(interp, this, "trimEnd")?.trim_end()))
}

fn regexp_of(value: &JsValue) -> Option<(regex::Regex, bool)> {
    let obj = value.as_object()?;
    let o = obj.borrow();
    match &o.class {
        Class::RegExp(re) => Some((re.regex.clone(), re.global())),
        _ => None,
    }
}

fn string_split(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let s = this_string(interp, this, "split")?;
    let limit = match arg(args, 1) {
        JsValue::Undefined => usize::MAX,
        v => v.to_uint32() as usize,
    };
    let separator = arg(args, 0);
    let parts: Vec<JsValue> = if let Some((regex, _)) = regexp_of(&separator) {
        regex.split(&s).map(JsValue::from).take(limit).collect()
    } else {
        match separator {
            JsValue::Undefined => vec![JsValue::from(s)],
            sep => {
                let sep = sep.to_js_string();
                if sep.is_empty() {
                    code_units(&s)
                        .chunks(1)
                        .map(units_string)
                        .take(limit)
                        .collect()
                } else {
                    s.split(sep.as_str()).map(JsValue::from).take(limit).collect()
                }
            }
        }
    };
    interp.new_array(parts)
}

/// One match: byte range plus capture groups.
struct Found {
    start: usize,
    end: usize,
    groups: Vec<Option<String>>,
}

fn find_matches(s: &str, pattern: &JsValue, all: bool) -> Vec<Found> {
    if let Some((regex, global)) = regexp_of(pattern) {
        let to_found = |caps: regex::Captures<'_>| {
            let whole = caps.get(0).map_or(0..0, |m| m.range());
            Found {
                start: whole.start,
                end: whole.end,
                groups: caps
                    .iter()
                    .skip(1)
                    .map(|g| g.map(|m| m.as_str().to_string()))
                    .collect(),
            }
        };
        if global || all {
            regex.captures_iter(s).map(to_found).collect()
        } else {
            regex.captures(s).map(to_found).into_iter().collect()
        }
    } else {
        let needle = pattern.to_js_string();
        let found = s.match_indices(needle.as_str()).map(|(start, m)| Found {
            start,
            end: start + m.len(),
            groups: Vec::new(),
        });
        if all {
            found.collect()
        } else {
            found.take(1).collect()
        }
    }
}

/// Expands `$&`, `$1`, `` $` ``, `$'` and `$$` in a replacement string.
fn expand_replacement(template: &str, s: &str, found: &Found) -> String {
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('&') => {
                chars.next();
                out.push_str(&s[found.start..found.end]);
            }
            Some('`') => {
                chars.next();
                out.push_str(&s[..found.start]);
            }
            Some('\'') => {
                chars.next();
                out.push_str(&s[found.end..]);
            }
            Some(d) if d.is_ascii_digit() => {
                chars.next();
                let index = d.to_digit(10).unwrap_or(0) as usize;
                match found.groups.get(index.wrapping_sub(1)) {
                    Some(group) => out.push_str(group.as_deref().unwrap_or("")),
                    None => {
                        out.push('$');
                        out.push(d);
                    }
                }
            }
            _ => out.push('$'),
        }
    }
    out
}

fn replace(interp: &mut Interpreter, this: &JsValue, args: &[JsValue], all: bool) -> NativeResult {
    let s = this_string(interp, this, "replace")?;
    let replacement = arg(args, 1);
    let mut out = String::new();
    let mut last = 0;
    for found in find_matches(&s, &arg(args, 0), all) {
        out.push_str(&s[last..found.start]);
        if replacement.is_callable() {
            let mut call_args = vec![JsValue::from(&s[found.start..found.end])];
            call_args.extend(found.groups.iter().map(|g| match g {
                Some(g) => JsValue::from(g.as_str()),
                None => JsValue::Undefined,
            }));
            call_args.push(JsValue::Number(s[..found.start].encode_utf16().count() as f64));
            call_args.push(JsValue::from(s.as_str()));
            let value = interp.call(&replacement, JsValue::Undefined, &call_args)?;
            out.push_str(&value.to_js_string());
        } else {
            out.push_str(&expand_replacement(&replacement.to_js_string(), &s, &found));
        }
        interp.check_length(out.len())?;
        last = found.end;
    }
    out.push_str(&s[last..]);
    interp.new_string(out)
}

fn string_replace(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    replace(interp, this, args, false)
}

fn string_replace_all(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    replace(interp, this, args, true)
}

fn string_match(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let s = this_string(interp, this, "match")?;
    let pattern = arg(args, 0);
    let global = regexp_of(&pattern).is_some_and(|(_, g)| g);
    let found = find_matches(&s, &pattern, false);
    if found.is_empty() {
        return Ok(JsValue::Null);
    }
    if global {
        let all = find_matches(&s, &pattern, true)
            .iter()
            .map(|f| JsValue::from(&s[f.start..f.end]))
            .collect();
        return interp.new_array(all);
    }
    match_result(interp, &s, &found[0])
}

fn match_result(interp: &mut Interpreter, s: &str, found: &Found) -> NativeResult {
    let mut items = vec![JsValue::from(&s[found.start..found.end])];
    items.extend(found.groups.iter().map(|g| match g {
        Some(g) => JsValue::from(g.as_str()),
        None => JsValue::Undefined,
    }));
    let result = interp.new_array(items)?;
    interp.set(&result, "index".to_string(), JsValue::Number(s[..found.start].encode_utf16().count() as f64))?;
    interp.set(&result, "input".to_string(), JsValue::from(s))?;
    Ok(result)
}

fn string_concat(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut s = this_string(interp, this, "concat")?;
    for value in args {
        s.push_str(&value.to_js_string());
        interp.check_length(s.len())?;
    }
    Ok(JsValue::from(s))
}

fn string_repeat(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let s = this_string(interp, this, "repeat")?;
    let count = to_integer(&arg(args, 0));
    if count < 0.0 || count.is_infinite() {
        return Err(interp.throw("RangeError", "Invalid count value"));
    }
    interp.check_length(s.len().saturating_mul(count as usize))?;
    Ok(JsValue::from(s.repeat(count as usize)))
}

fn pad(interp: &mut Interpreter, this: &JsValue, args: &[JsValue], at_start: bool) -> NativeResult {
    let s = this_string(interp, this, "padStart")?;
    let units = code_units(&s);
    let target = to_integer(&arg(args, 0)).max(0.0) as usize;
    interp.check_length(target)?;
    let fill = match arg(args, 1) {
        JsValue::Undefined => vec![u16::from(b' ')],
        v => code_units(&v.to_js_string()),
    };
    if target <= units.len() || fill.is_empty() {
        return Ok(JsValue::from(s));
    }
    let padding: Vec<u16> = fill.iter().copied().cycle().take(target - units.len()).collect();
    let joined = if at_start {
        [padding, units].concat()
    } else {
        [units, padding].concat()
    };
    Ok(units_string(&joined))
}

fn string_pad_start(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    pad(interp, this, args, true)
}

fn string_pad_end(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    pad(interp, this, args, false)
}

// ---------------------------------------------------------------------------
// Number, RegExp, Error

fn number_ctor(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(JsValue::Number(args.first().map_or(0.0, JsValue::to_number)))
}

fn number_to_string_method(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let radix = match arg(args, 0) {
        JsValue::Undefined => 10,
        r => to_integer(&r) as i64,
    };
    if !(2..=36).contains(&radix) {
        return Err(interp.throw("RangeError", "toString() radix must be between 2 and 36"));
    }
    Ok(JsValue::from(number_to_radix(this.to_number(), radix as u32)))
}

fn number_to_fixed(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let digits = to_integer(&arg(args, 0));
    if !(0.0..=100.0).contains(&digits) {
        return Err(interp.throw("RangeError", "toFixed() digits argument must be between 0 and 100"));
    }
    let n = this.to_number();
    if !n.is_finite() {
        return Ok(JsValue::from(this.to_js_string()));
    }
    Ok(JsValue::from(format!("{n:.prec$}", prec = digits as usize)))
}

fn regexp_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let pattern = arg(args, 0);
    let existing = pattern.as_object().and_then(|o| match &o.borrow().class {
        Class::RegExp(re) => Some(re.source.clone()),
        _ => None,
    });
    let source = match existing {
        Some(source) => source,
        None => match pattern {
            JsValue::Undefined => "(?:)".to_string(),
            p => p.to_js_string(),
        },
    };
    let flags = match arg(args, 1) {
        JsValue::Undefined => String::new(),
        f => f.to_js_string(),
    };
    interp.new_regexp(&source, &flags)
}

fn regexp_test(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    let Some((regex, _)) = regexp_of(this) else {
        return Err(interp.type_error("RegExp.prototype.test called on a non-RegExp"));
    };
    Ok(JsValue::Bool(regex.is_match(&arg(args, 0).to_js_string())))
}

fn regexp_exec(interp: &mut Interpreter, this: &JsValue, args: &[JsValue]) -> NativeResult {
    if regexp_of(this).is_none() {
        return Err(interp.type_error("RegExp.prototype.exec called on a non-RegExp"));
    }
    let s = arg(args, 0).to_js_string();
    match find_matches(&s, this, false).first() {
        Some(found) => match_result(interp, &s, found),
        None => Ok(JsValue::Null),
    }
}

fn error_message(args: &[JsValue]) -> String {
    match arg(args, 0) {
        JsValue::Undefined => String::new(),
        message => message.to_js_string(),
    }
}

fn error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("Error", &error_message(args)))
}

fn type_error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("TypeError", &error_message(args)))
}

fn range_error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("RangeError", &error_message(args)))
}

fn syntax_error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("SyntaxError", &error_message(args)))
}

fn reference_error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("ReferenceError", &error_message(args)))
}

fn uri_error_ctor(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(interp.error_object("URIError", &error_message(args)))
}

// ---------------------------------------------------------------------------
// Math and JSON

fn math_sign(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let n = arg(args, 0).to_number();
    Ok(JsValue::Number(if n.is_nan() || n == 0.0 { n } else { n.signum() }))
}

fn math_max(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut max = f64::NEG_INFINITY;
    for n in args.iter().map(JsValue::to_number) {
        if n.is_nan() {
            return Ok(JsValue::Number(f64::NAN));
        }
        max = max.max(n);
    }
    Ok(JsValue::Number(max))
}

fn math_min(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut min = f64::INFINITY;
    for n in args.iter().map(JsValue::to_number) {
        if n.is_nan() {
            return Ok(JsValue::Number(f64::NAN));
        }
        min = min.min(n);
    }
    Ok(JsValue::Number(min))
}

fn from_json(interp: &mut Interpreter, value: serde_json::Value) -> NativeResult {
    Ok(match value {
        serde_json::Value::Null => JsValue::Null,
        serde_json::Value::Bool(b) => JsValue::Bool(b),
        serde_json::Value::Number(n) => JsValue::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => JsValue::from(s),
        serde_json::Value::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                values.push(from_json(interp, item)?);
            }
            interp.new_array(values)?
        }
        serde_json::Value::Object(map) => {
            let obj = JsValue::Object(interp.new_object());
            for (key, item) in map {
                let value = from_json(interp, item)?;
                interp.set(&obj, key, value)?;
            }
            obj
        }
    })
}

fn to_json(interp: &Interpreter, value: &JsValue, depth: usize) -> Result<Option<serde_json::Value>, Abrupt> {
    if depth > 64 {
        return Err(interp.type_error("Converting circular structure to JSON"));
    }
    Ok(Some(match value {
        JsValue::Undefined => return Ok(None),
        JsValue::Null => serde_json::Value::Null,
        JsValue::Bool(b) => serde_json::Value::Bool(*b),
        JsValue::Number(n) if !n.is_finite() => serde_json::Value::Null,
        JsValue::Number(n) if n.trunc() == *n && n.abs() < 9_007_199_254_740_992.0 => {
            serde_json::Value::from(*n as i64)
        }
        JsValue::Number(n) => serde_json::Number::from_f64(*n).map_or(serde_json::Value::Null, serde_json::Value::Number),
        JsValue::String(s) => serde_json::Value::String(s.to_string()),
        JsValue::Object(obj) => {
            let o = obj.borrow();
            match &o.class {
                Class::Function(_) => return Ok(None),
                Class::Array(items) => serde_json::Value::Array(
                    items
                        .iter()
                        .map(|item| Ok(to_json(interp, item, depth + 1)?.unwrap_or(serde_json::Value::Null)))
                        .collect::<Result<_, Abrupt>>()?,
                ),
                _ => {
                    let mut map = serde_json::Map::new();
                    for key in o.own_keys() {
                        if let Some(item) = o.props.get(&key) {
                            if let Some(json) = to_json(interp, item, depth + 1)? {
                                map.insert(key, json);
                            }
                        }
                    }
                    serde_json::Value::Object(map)
                }
            }
        }
    }))
}

fn json_parse(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let text = arg(args, 0).to_js_string();
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| interp.throw("SyntaxError", format!("JSON.parse: {e}")))?;
    from_json(interp, value)
}

fn json_stringify(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    match to_json(interp, &arg(args, 0), 0)? {
        Some(json) => Ok(JsValue::from(json.to_string())),
        None => Ok(JsValue::Undefined),
    }
}

// ---------------------------------------------------------------------------
// Global functions

fn parse_int(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let input = arg(args, 0).to_js_string();
    let mut s = input.trim_start();
    let negative = s.starts_with('-');
    if let Some(rest) = s.strip_prefix('-').or_else(|| s.strip_prefix('+')) {
        s = rest;
    }
    let mut radix = arg(args, 1).to_int32();
    let has_hex_prefix = s.starts_with("0x") || s.starts_with("0X");
    if radix == 0 {
        radix = if has_hex_prefix { 16 } else { 10 };
    }
    if radix == 16 && has_hex_prefix {
        s = &s[2..];
    }
    if !(2..=36).contains(&radix) {
        return Ok(JsValue::Number(f64::NAN));
    }
    let digits: Vec<u32> = s.chars().map_while(|c| c.to_digit(radix as u32)).collect();
    if digits.is_empty() {
        return Ok(JsValue::Number(f64::NAN));
    }
    let value = digits
        .iter()
        .fold(0.0, |acc, d| acc * f64::from(radix) + f64::from(*d));
    Ok(JsValue::Number(if negative { -value } else { value }))
}

fn parse_float(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let input = arg(args, 0).to_js_string();
    let s = input.trim_start();
    let unsigned = s.strip_prefix(['+', '-']).unwrap_or(s);
    if unsigned.starts_with("Infinity") {
        let inf = if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
        return Ok(JsValue::Number(inf));
    }

    let bytes = s.as_bytes();
    let mut end = usize::from(s.len() != unsigned.len());
    let digits_from = |mut i: usize| {
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        i
    };
    let int_end = digits_from(end);
    let mut mantissa_digits = int_end - end;
    end = int_end;
    if end < bytes.len() && bytes[end] == b'.' {
        let frac_end = digits_from(end + 1);
        mantissa_digits += frac_end - end - 1;
        end = frac_end;
    }
    if mantissa_digits == 0 {
        return Ok(JsValue::Number(f64::NAN));
    }
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp = end + 1;
        if exp < bytes.len() && matches!(bytes[exp], b'+' | b'-') {
            exp += 1;
        }
        let exp_end = digits_from(exp);
        if exp_end > exp {
            end = exp_end;
        }
    }
    Ok(JsValue::Number(s[..end].parse::<f64>().unwrap_or(f64::NAN)))
}

fn atob(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let input: String = arg(args, 0)
        .to_js_string()
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();
    let bytes = LENIENT_BASE64
        .decode(input.trim_end_matches('='))
        .map_err(|e| interp.throw("InvalidCharacterError", format!("atob: {e}")))?;
    Ok(JsValue::from(bytes.into_iter().map(char::from).collect::<String>()))
}

fn btoa(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let input = arg(args, 0).to_js_string();
    let bytes = input
        .chars()
        .map(|c| u8::try_from(u32::from(c)))
        .collect::<Result<Vec<u8>, _>>()
        .map_err(|_| interp.throw("InvalidCharacterError", "btoa: character out of Latin1 range"))?;
    Ok(JsValue::from(STANDARD.encode(bytes)))
}

fn decode_uri_component(interp: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let input = arg(args, 0).to_js_string();
    decloak_core::parser::percent_decode(&input)
        .map(JsValue::from)
        .map_err(|_| interp.throw("URIError", "URI malformed"))
}

fn percent_encode(input: &str, keep: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || "-_.!~*'()".contains(c) || keep.contains(c) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        }
    }
    out
}

fn encode_uri_component(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(percent_encode(&arg(args, 0).to_js_string(), "")))
}

fn encode_uri(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    Ok(JsValue::from(percent_encode(&arg(args, 0).to_js_string(), ";,/?:@&=+$#")))
}

fn escape(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let mut out = String::new();
    for unit in code_units(&arg(args, 0).to_js_string()) {
        match u8::try_from(unit) {
            Ok(b) if b.is_ascii_alphanumeric() || b"@*_+-./".contains(&b) => out.push(char::from(b)),
            Ok(b) => out.push_str(&format!("%{b:02X}")),
            Err(_) => out.push_str(&format!("%u{unit:04X}")),
        }
    }
    Ok(JsValue::from(out))
}

fn unescape(_: &mut Interpreter, _: &JsValue, args: &[JsValue]) -> NativeResult {
    let units = code_units(&arg(args, 0).to_js_string());
    let hex = |slice: &[u16]| {
        String::from_utf16(slice)
            .ok()
            .and_then(|s| u16::from_str_radix(&s, 16).ok())
    };
    let mut out = Vec::with_capacity(units.len());
    let mut i = 0;
    while i < units.len() {
        if units[i] == u16::from(b'%') {
            if units.get(i + 1) == Some(&u16::from(b'u')) {
                if let Some(v) = units.get(i + 2..i + 6).and_then(hex) {
                    out.push(v);
                    i += 6;
                    continue;
                }
            } else if let Some(v) = units.get(i + 1..i + 3).and_then(hex) {
                out.push(v);
                i += 3;
                continue;
            }
        }
        out.push(units[i]);
        i += 1;
    }
    Ok(JsValue::from(from_code_units(&out)))
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

    fn s(source: &str) -> String {
        match eval(source) {
            Value::String(s) => s,
            other => panic!("expected a string from {source:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_string_methods() {
        assert_eq!(s("'abc'.charAt(1) + 'abc'.charCodeAt(2)"), "b99");
        assert_eq!(s("'hello'.slice(-3) + '|' + 'hello'.substring(3, 1) + '|' + 'hello'.substr(1, 2)"), "llo|el|el");
        assert_eq!(s("'a,b,,c'.split(',').join('-')"), "a-b--c");
        assert_eq!(s("'abc'.split('').reverse().join('')"), "cba");
        assert_eq!(s("'a-b-c'.replace('-', '+')"), "a+b-c");
        assert_eq!(s("'a1b22'.replace(/\\d+/g, function (m) { return '<' + m + '>'; })"), "a<1>b<22>");
        assert_eq!(s("'John Smith'.replace(/(\\w+)\\s(\\w+)/, '$2, $1')"), "Smith, John");
        assert_eq!(s("String.fromCharCode(72, 105)"), "Hi");
        assert_eq!(s("(255).toString(16) + ('00' + (10).toString(16)).slice(-2)"), "ff0a");
    }

    #[test]
    fn test_number_parsing() {
        assert_eq!(eval("parseInt('0x1f')"), Value::Number(31.0));
        assert_eq!(eval("parseInt('42px')"), Value::Number(42.0));
        assert_eq!(eval("parseInt('-12', 8)"), Value::Number(-10.0));
        assert_eq!(eval("parseFloat('3.5e2abc')"), Value::Number(350.0));
        assert_eq!(eval("isNaN(parseInt('x'))"), Value::Bool(true));
    }

    #[test]
    fn test_obfuscator_base64_decoder() {
        let src = r#"
            var decode = function (c) {
                var d = 'abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/=';
                var e = '', f = '';
                for (var g = 0, h, i, j = 0; i = c.charAt(j++); ~i && (h = g % 4 ? h * 64 + i : i, g++ % 4) ? e += String.fromCharCode(255 & h >> (-2 * g & 6)) : 0) {
                    i = d.indexOf(i);
                }
                for (var k = 0, l = e.length; k < l; k++) {
                    f += '%' + ('00' + e.charCodeAt(k).toString(16)).slice(-2);
                }
                return decodeURIComponent(f);
            };
            decode('DgvZDa')
        "#;
        assert_eq!(s(src), "test");
    }

    #[test]
    fn test_base64_and_uri() {
        assert_eq!(s("atob('aGVsbG8=') + atob('aGk')"), "hellohi");
        assert_eq!(s("btoa('hi')"), "aGk=");
        assert_eq!(s("decodeURIComponent('%E2%9C%93%20ok')"), "\u{2713} ok");
        assert_eq!(s("encodeURIComponent('a b/\u{e9}')"), "a%20b%2F%C3%A9");
        assert_eq!(s("unescape(escape('x\u{e9}\u{4e2d}'))"), "x\u{e9}\u{4e2d}");
    }

    #[test]
    fn test_array_methods() {
        assert_eq!(s("[3, 1, 2].sort().join('')"), "123");
        assert_eq!(s("[3, 10, 2].sort(function (a, b) { return b - a; }).join(',')"), "10,3,2");
        assert_eq!(s("var a = [1, 2, 3, 4]; a.splice(1, 2, 'x'); a.join('')"), "1x4");
        assert_eq!(eval("[1, 2, 3].reduce(function (a, b) { return a + b; })"), Value::Number(6.0));
        assert_eq!(s("[1, 2, 3].filter(function (x) { return x % 2; }).map(String).join('')"), "13");
        assert_eq!(eval("[NaN].includes(NaN) && [NaN].indexOf(NaN) === -1"), Value::Bool(true));
    }

    #[test]
    fn test_json_and_objects() {
        assert_eq!(s("JSON.stringify(JSON.parse('{\"a\":[1,2.5,\"x\"]}'))"), r#"{"a":[1,2.5,"x"]}"#);
        assert_eq!(s("Object.keys({ b: 1, a: 2 }).join('')"), "ba");
        assert_eq!(eval("({ a: 1 }).hasOwnProperty('a')"), Value::Bool(true));
        assert_eq!(s("Object.prototype.toString.call([])"), "[object Array]");
    }

    #[test]
    fn test_call_and_apply() {
        assert_eq!(eval("Math.max.apply(null, [1, 5, 3])"), Value::Number(5.0));
        assert_eq!(s("(function (a) { return this.p + a; }).call({ p: 'x' }, 'y')"), "xy");
    }
}
