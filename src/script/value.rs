use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use super::ast::{ClassDef, FunctionDef};
use super::interp::{Env, Flow, Interpreter};

pub(crate) type ObjRef = Rc<RefCell<Object>>;
pub(crate) type NativeFn = Rc<dyn Fn(&mut Interpreter, &Value, &[Value]) -> Flow<Value>>;

#[derive(Clone)]
pub(crate) enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(Rc<str>),
    Object(ObjRef),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(_) => write!(f, "[object]"),
        }
    }
}

impl From<&str> for Value {
    fn from(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }
}

impl From<String> for Value {
    fn from(text: String) -> Value {
        Value::Str(Rc::from(text.as_str()))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Value {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Value {
        Value::Bool(b)
    }
}

/// Data that lets a class constructor run field initializers and reach its parent.
pub(crate) struct ClassInfo {
    pub(crate) def: Rc<ClassDef>,
    pub(crate) env: Env,
    pub(crate) parent: Option<Value>,
}

pub(crate) enum Callable {
    Closure {
        def: Rc<FunctionDef>,
        env: Env,
        /// Object whose prototype `super.x` looks in.
        home: Option<ObjRef>,
        class: Option<Rc<ClassInfo>>,
    },
    Native {
        name: Rc<str>,
        func: NativeFn,
    },
    Bound {
        target: Value,
        this: Value,
        args: Vec<Value>,
    },
}

pub(crate) enum ObjectKind {
    Plain,
    Array(Vec<Value>),
    Function(Callable),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
}

#[derive(Clone)]
pub(crate) struct Property {
    pub(crate) value: Value,
    pub(crate) enumerable: bool,
}

/// Named properties kept in insertion order.
#[derive(Default)]
pub(crate) struct PropertyMap {
    order: Vec<Rc<str>>,
    slots: HashMap<Rc<str>, Property>,
}

impl PropertyMap {
    pub(crate) fn get(&self, key: &str) -> Option<&Property> {
        self.slots.get(key)
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(key)
    }

    pub(crate) fn insert(&mut self, key: &str, value: Value, enumerable: bool) {
        match self.slots.get_mut(key) {
            Some(slot) => slot.value = value,
            None => {
                let key: Rc<str> = Rc::from(key);
                self.order.push(key.clone());
                self.slots.insert(key, Property { value, enumerable });
            }
        }
    }

    pub(crate) fn remove(&mut self, key: &str) -> bool {
        if self.slots.remove(key).is_some() {
            self.order.retain(|k| k.as_ref() != key);
            true
        } else {
            false
        }
    }

    /// Keys in creation order, integer-like keys first as in property enumeration.
    pub(crate) fn keys(&self, enumerable_only: bool) -> Vec<Rc<str>> {
        let mut indices: Vec<(u32, Rc<str>)> = Vec::new();
        let mut names = Vec::new();
        for key in &self.order {
            if enumerable_only && !self.slots.get(key).map(|p| p.enumerable).unwrap_or(false) {
                continue;
            }
            match array_index(key) {
                Some(index) => indices.push((index, key.clone())),
                None => names.push(key.clone()),
            }
        }
        indices.sort_by_key(|(index, _)| *index);
        indices.into_iter().map(|(_, key)| key).chain(names).collect()
    }

    pub(crate) fn clear(&mut self) {
        self.order.clear();
        self.slots.clear();
    }
}

pub(crate) struct Object {
    pub(crate) kind: ObjectKind,
    pub(crate) props: PropertyMap,
    pub(crate) proto: Option<ObjRef>,
}

impl Object {
    pub(crate) fn new(kind: ObjectKind, proto: Option<ObjRef>) -> ObjRef {
        Rc::new(RefCell::new(Object {
            kind,
            props: PropertyMap::default(),
            proto,
        }))
    }

    pub(crate) fn is_callable(&self) -> bool {
        matches!(self.kind, ObjectKind::Function(_))
    }
}

/// Canonical array index for `key`, if it is one.
pub(crate) fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

impl Value {
    pub(crate) fn truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::Str(s) => !s.is_empty(),
            Value::Object(_) => true,
        }
    }

    pub(crate) fn type_of(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Object(obj) => {
                if obj.borrow().is_callable() {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    pub(crate) fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub(crate) fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub(crate) fn is_callable(&self) -> bool {
        self.as_object().map(|obj| obj.borrow().is_callable()).unwrap_or(false)
    }

    pub(crate) fn is_array(&self) -> bool {
        self.as_object()
            .map(|obj| matches!(obj.borrow().kind, ObjectKind::Array(_)))
            .unwrap_or(false)
    }

    /// Number conversion for primitives; objects must go through the interpreter first.
    pub(crate) fn primitive_to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Number(n) => *n,
            Value::Str(s) => string_to_number(s),
            Value::Object(_) => f64::NAN,
        }
    }

    pub(crate) fn primitive_to_string(&self) -> Rc<str> {
        match self {
            Value::Undefined => Rc::from("undefined"),
            Value::Null => Rc::from("null"),
            Value::Bool(b) => Rc::from(if *b { "true" } else { "false" }),
            Value::Number(n) => Rc::from(number_to_string(*n).as_str()),
            Value::Str(s) => s.clone(),
            Value::Object(_) => Rc::from("[object Object]"),
        }
    }
}

pub(crate) fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// Equality used by `includes` and collections: like `===` but NaN equals NaN.
pub(crate) fn same_value_zero(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) if x.is_nan() && y.is_nan() => true,
        _ => strict_equals(a, b),
    }
}

pub(crate) fn string_to_number(text: &str) -> f64 {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let (sign, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    for (prefix, radix) in [("0x", 16), ("0X", 16), ("0b", 2), ("0B", 2), ("0o", 8), ("0O", 8)] {
        if let Some(digits) = trimmed.strip_prefix(prefix) {
            return u64::from_str_radix(digits, radix)
                .map(|n| n as f64)
                .unwrap_or(f64::NAN);
        }
    }
    let valid = unsigned
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '+' | '-'));
    if !valid {
        return f64::NAN;
    }
    unsigned.parse::<f64>().map(|n| sign * n).unwrap_or(f64::NAN)
}

/// Formats a number the way JavaScript's `String(n)` does.
pub(crate) fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return "NaN".to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if n == 0.0 {
        return "0".to_string();
    }
    let exp_form = format!("{:e}", n);
    let (mantissa, exponent) = match exp_form.split_once('e') {
        Some((m, e)) => (m.to_string(), e.parse::<i32>().unwrap_or(0)),
        None => return exp_form,
    };
    if (-6..21).contains(&exponent) {
        format!("{}", n)
    } else if exponent >= 0 {
        format!("{}e+{}", mantissa, exponent)
    } else {
        format!("{}e{}", mantissa, exponent)
    }
}

pub(crate) fn to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let wrapped = n.trunc().rem_euclid(4294967296.0);
    wrapped as u32 as i32
}

pub(crate) fn to_uint32(n: f64) -> u32 {
    to_int32(n) as u32
}

/// Integer conversion used by index arguments: NaN is 0, fractions truncate.
pub(crate) fn to_integer(n: f64) -> f64 {
    if n.is_nan() {
        0.0
    } else {
        n.trunc()
    }
}
