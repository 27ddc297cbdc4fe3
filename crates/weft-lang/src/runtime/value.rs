use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::EvalError;

/// A native function callable from expressions. The receiver is the
/// enclosing object for member calls and `Undefined` for bare calls.
pub type NativeFnInner = dyn Fn(&Value, &[Value]) -> Result<Value, EvalError>;

pub struct FnValue {
    pub name: String,
    func: Box<NativeFnInner>,
}

impl FnValue {
    pub fn new(
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self { name: name.into(), func: Box::new(f) }
    }

    pub fn call(&self, receiver: &Value, args: &[Value]) -> Result<Value, EvalError> {
        (self.func)(receiver, args)
    }
}

impl fmt::Debug for FnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FnValue({})", self.name)
    }
}

/// An embedder-provided host handle. The expression engine never looks
/// inside; it only honours the `guarded` flag (see the safety gate).
#[derive(Debug)]
pub struct OpaqueValue {
    pub type_name: String,
    pub guarded: bool,
}

pub type Object = Rc<RefCell<IndexMap<String, Value>>>;
pub type Array = Rc<RefCell<Vec<Value>>>;

/// Dynamic tagged value. Collections share structure through `Rc`, so
/// cloning a `Value` is cheap and aliases the same storage — the semantics
/// scopes and watchers depend on.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Array(Array),
    Object(Object),
    Function(Rc<FnValue>),
    Opaque(Rc<OpaqueValue>),
}

impl Value {
    pub fn string(s: impl AsRef<str>) -> Self {
        Self::String(Rc::from(s.as_ref()))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Self::Array(Rc::new(RefCell::new(items)))
    }

    pub fn empty_object() -> Self {
        Self::Object(Rc::new(RefCell::new(IndexMap::new())))
    }

    pub fn object(entries: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self::Object(Rc::new(RefCell::new(entries.into_iter().collect())))
    }

    pub fn function(
        name: impl Into<String>,
        f: impl Fn(&[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self::Function(Rc::new(FnValue::new(name, move |_this, args| f(args))))
    }

    /// Like [`Value::function`] but the closure also receives the receiver.
    pub fn method(
        name: impl Into<String>,
        f: impl Fn(&Value, &[Value]) -> Result<Value, EvalError> + 'static,
    ) -> Self {
        Self::Function(Rc::new(FnValue::new(name, f)))
    }

    pub fn opaque(type_name: impl Into<String>, guarded: bool) -> Self {
        Self::Opaque(Rc::new(OpaqueValue { type_name: type_name.into(), guarded }))
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self, Self::Undefined)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::Opaque(_) => "opaque",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Array(_) | Self::Object(_) | Self::Function(_) | Self::Opaque(_) => true,
        }
    }

    /// Numeric coercion for arithmetic. `Undefined` coerces to NaN; callers
    /// that substitute 0 for missing operands do so before coercing.
    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => {
                if *b { 1.0 } else { 0.0 }
            }
            Self::Number(n) => *n,
            Self::String(s) => {
                let t = s.trim();
                if t.is_empty() { 0.0 } else { t.parse().unwrap_or(f64::NAN) }
            }
            Self::Array(_) | Self::Object(_) | Self::Function(_) | Self::Opaque(_) => f64::NAN,
        }
    }

    /// String coercion, used for concatenation and computed member names.
    pub fn to_display(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Array(items) => {
                let items = items.borrow();
                items.iter().map(|v| v.to_display()).collect::<Vec<_>>().join(",")
            }
            Self::Object(_) => "[object Object]".into(),
            Self::Function(f) => format!("function {}", f.name),
            Self::Opaque(o) => format!("[object {}]", o.type_name),
        }
    }
}

/// Render a number the way a dynamic language prints it: integral values
/// without a fraction part, non-finite values by name.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n == n.trunc() && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Interpret a number as a sequence index.
pub fn as_index(n: f64) -> Option<usize> {
    if n.is_finite() && n >= 0.0 && n == n.trunc() {
        Some(n as usize)
    } else {
        None
    }
}

// ─── Equality ────────────────────────────────────────────────────────────────

/// Identity comparison used by the dirty checker: scalars by value with
/// `NaN == NaN`, collections and callables by pointer.
pub fn ref_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined, Value::Undefined) => true,
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => Rc::ptr_eq(x, y),
        (Value::Object(x), Value::Object(y)) => Rc::ptr_eq(x, y),
        (Value::Function(x), Value::Function(y)) => Rc::ptr_eq(x, y),
        (Value::Opaque(x), Value::Opaque(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// The expression language's `===`: like [`ref_eq`] except `NaN !== NaN`.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    if let (Value::Number(x), Value::Number(y)) = (a, b) {
        return x == y;
    }
    ref_eq(a, b)
}

/// The expression language's `==`: strict equality plus the usual
/// cross-type coercions (`null == undefined`, number/string, bool).
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Undefined | Value::Null, Value::Undefined | Value::Null) => true,
        (Value::Number(_), Value::String(_)) | (Value::String(_), Value::Number(_)) => {
            let (x, y) = (a.to_number(), b.to_number());
            x == y
        }
        (Value::Bool(_), _) => {
            let x = a.to_number();
            loose_eq(&Value::Number(x), b)
        }
        (_, Value::Bool(_)) => {
            let y = b.to_number();
            loose_eq(a, &Value::Number(y))
        }
        _ => strict_eq(a, b),
    }
}

/// Structural equality used by value-comparing watchers. Two `NaN`s are
/// equal; callables and opaques fall back to identity.
pub fn deep_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Array(x), Value::Array(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len() && x.iter().zip(y.iter()).all(|(a, b)| deep_eq(a, b))
        }
        (Value::Object(x), Value::Object(y)) => {
            if Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| deep_eq(v, w)))
        }
        _ => ref_eq(a, b),
    }
}

// ─── Cloning ─────────────────────────────────────────────────────────────────

/// Structural copy: arrays and objects get fresh storage all the way down;
/// callables and opaques share their handle.
pub fn deep_clone(v: &Value) -> Value {
    match v {
        Value::Array(items) => {
            let items = items.borrow();
            Value::array(items.iter().map(deep_clone).collect())
        }
        Value::Object(map) => {
            let map = map.borrow();
            Value::object(map.iter().map(|(k, v)| (k.clone(), deep_clone(v))))
        }
        other => other.clone(),
    }
}

/// One-level copy: fresh top-level storage, elements aliased.
pub fn shallow_clone(v: &Value) -> Value {
    match v {
        Value::Array(items) => Value::array(items.borrow().clone()),
        Value::Object(map) => {
            Value::object(map.borrow().iter().map(|(k, v)| (k.clone(), v.clone())))
        }
        other => other.clone(),
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
