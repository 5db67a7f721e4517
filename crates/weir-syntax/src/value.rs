use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A runtime value produced by expression evaluation.
///
/// Values are immutable once constructed and cheap to clone: arrays and
/// objects clone their elements, functions and capsules clone an `Arc`.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    /// Ordered map; iteration order is deterministic
    Object(BTreeMap<String, Value>),
    /// A callable installed into the scope by the host
    Function(FunctionValue),
    /// An opaque handle passed between components (appenders, consumers)
    Capsule(Capsule),
}

impl Value {
    /// The kind name, used in type errors
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
            Value::Function(_) => "function",
            Value::Capsule(_) => "capsule",
        }
    }

    /// Build an object value from key/value pairs
    pub fn object(fields: impl IntoIterator<Item = (String, Value)>) -> Value {
        Value::Object(fields.into_iter().collect())
    }

    /// Numeric widening: the float form of an int or float value
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// The string form, for string-kinded values only
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Project to a `serde_json::Value` for introspection payloads.
    ///
    /// Functions and capsules have no JSON form; they render as tagged
    /// strings so UI consumers can at least see what occupied the slot.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(n) => serde_json::Value::Number((*n).into()),
            Value::Float(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(fields) => serde_json::Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Value::Function(f) => serde_json::Value::String(format!("<function {}>", f.name)),
            Value::Capsule(c) => serde_json::Value::String(format!("<capsule {}>", c.kind)),
        }
    }

    /// Convert a `serde_json::Value` into a runtime value
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Array(items) => f.debug_list().entries(items).finish(),
            Value::Object(fields) => f.debug_map().entries(fields).finish(),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Capsule(capsule) => write!(f, "<capsule {}>", capsule.kind),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(&a.func, &b.func),
            (Value::Capsule(a), Value::Capsule(b)) => Arc::ptr_eq(&a.payload, &b.payload),
            _ => false,
        }
    }
}

/// A host-provided function callable from expressions.
#[derive(Clone)]
pub struct FunctionValue {
    pub name: &'static str,
    #[allow(clippy::type_complexity)]
    func: Arc<dyn Fn(&[Value]) -> Result<Value, String> + Send + Sync>,
}

impl FunctionValue {
    /// Wrap a host function
    pub fn new(
        name: &'static str,
        func: impl Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        FunctionValue {
            name,
            func: Arc::new(func),
        }
    }

    /// Invoke with already-evaluated arguments
    pub fn call(&self, args: &[Value]) -> Result<Value, String> {
        (self.func)(args)
    }
}

/// An opaque runtime handle carried through configuration expressions.
///
/// A capsule wraps a concrete payload type behind `Any`; consumers that know
/// the payload type recover it with [`Capsule::downcast`]. The `kind` string
/// names the payload for error messages and introspection.
#[derive(Clone)]
pub struct Capsule {
    pub kind: &'static str,
    payload: Arc<dyn Any + Send + Sync>,
}

impl Capsule {
    /// Wrap a payload value
    pub fn new<T: Any + Send + Sync>(kind: &'static str, payload: T) -> Self {
        Capsule {
            kind,
            payload: Arc::new(payload),
        }
    }

    /// Recover the payload by cloning it out, if the type matches
    pub fn downcast<T: Any + Clone>(&self) -> Option<T> {
        self.payload.downcast_ref::<T>().cloned()
    }
}
