use crate::value::{FunctionValue, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An immutable name-resolution frame.
///
/// A scope is a snapshot: once constructed its bindings never change, so an
/// evaluation sees one consistent view even while the controller rebinds
/// exports for the next evaluation. Child frames shadow parents.
#[derive(Clone, Default)]
pub struct Scope {
    bindings: Arc<BTreeMap<String, Value>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    /// A root scope with the given bindings
    pub fn new(bindings: BTreeMap<String, Value>) -> Self {
        Scope {
            bindings: Arc::new(bindings),
            parent: None,
        }
    }

    /// A root scope with the builtin function set installed
    pub fn with_stdlib(mut bindings: BTreeMap<String, Value>) -> Self {
        for func in stdlib() {
            bindings
                .entry(func.name.to_string())
                .or_insert(Value::Function(func));
        }
        Scope::new(bindings)
    }

    /// A child frame whose bindings shadow this scope
    pub fn child(&self, bindings: BTreeMap<String, Value>) -> Self {
        Scope {
            bindings: Arc::new(bindings),
            parent: Some(Arc::new(self.clone())),
        }
    }

    /// Resolve a name, innermost frame first
    pub fn lookup(&self, name: &str) -> Option<&Value> {
        self.bindings
            .get(name)
            .or_else(|| self.parent.as_deref().and_then(|p| p.lookup(name)))
    }
}

/// The builtin functions installed by [`Scope::with_stdlib`].
pub fn stdlib() -> Vec<FunctionValue> {
    vec![
        FunctionValue::new("len", |args| match args {
            [Value::String(s)] => Ok(Value::Int(s.chars().count() as i64)),
            [Value::Array(items)] => Ok(Value::Int(items.len() as i64)),
            [Value::Object(fields)] => Ok(Value::Int(fields.len() as i64)),
            [other] => Err(format!("len: cannot take the length of {}", other.kind())),
            _ => Err("len: expected exactly one argument".to_string()),
        }),
        FunctionValue::new("concat", |args| {
            let mut out = Vec::new();
            for arg in args {
                match arg {
                    Value::Array(items) => out.extend(items.iter().cloned()),
                    other => return Err(format!("concat: expected array, got {}", other.kind())),
                }
            }
            Ok(Value::Array(out))
        }),
        FunctionValue::new("format", |args| {
            let (fmt, rest) = match args {
                [Value::String(fmt), rest @ ..] => (fmt, rest),
                _ => return Err("format: first argument must be a string".to_string()),
            };
            let mut out = String::new();
            let mut values = rest.iter();
            let mut chars = fmt.chars().peekable();
            while let Some(ch) = chars.next() {
                if ch == '{' && chars.peek() == Some(&'}') {
                    chars.next();
                    match values.next() {
                        Some(Value::String(s)) => out.push_str(s),
                        Some(other) => out.push_str(&format!("{:?}", other)),
                        None => return Err("format: not enough arguments".to_string()),
                    }
                } else {
                    out.push(ch);
                }
            }
            Ok(Value::String(out))
        }),
        FunctionValue::new("json_decode", |args| match args {
            [Value::String(s)] => serde_json::from_str::<serde_json::Value>(s)
                .map(|json| Value::from_json(&json))
                .map_err(|err| format!("json_decode: {}", err)),
            _ => Err("json_decode: expected one string argument".to_string()),
        }),
        FunctionValue::new("json_encode", |args| match args {
            [value] => Ok(Value::String(value.to_json().to_string())),
            _ => Err("json_encode: expected one argument".to_string()),
        }),
        FunctionValue::new("to_string", |args| match args {
            [Value::String(s)] => Ok(Value::String(s.clone())),
            [Value::Int(n)] => Ok(Value::String(n.to_string())),
            [Value::Float(n)] => Ok(Value::String(n.to_string())),
            [Value::Bool(b)] => Ok(Value::String(b.to_string())),
            [Value::Null] => Ok(Value::String(String::new())),
            [other] => Err(format!("to_string: cannot convert {}", other.kind())),
            _ => Err("to_string: expected exactly one argument".to_string()),
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_shadowing() {
        let root = Scope::new(BTreeMap::from([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]));
        let child = root.child(BTreeMap::from([("a".to_string(), Value::Int(10))]));

        assert_eq!(child.lookup("a"), Some(&Value::Int(10)));
        assert_eq!(child.lookup("b"), Some(&Value::Int(2)));
        assert_eq!(child.lookup("c"), None);
    }

    #[test]
    fn test_stdlib_installed() {
        let scope = Scope::with_stdlib(BTreeMap::new());
        assert!(matches!(scope.lookup("len"), Some(Value::Function(_))));
        assert!(matches!(scope.lookup("concat"), Some(Value::Function(_))));
    }

    #[test]
    fn test_stdlib_does_not_shadow_user_bindings() {
        let scope = Scope::with_stdlib(BTreeMap::from([("len".to_string(), Value::Int(5))]));
        assert_eq!(scope.lookup("len"), Some(&Value::Int(5)));
    }

    #[test]
    fn test_format_builtin() {
        let funcs = stdlib();
        let format = funcs.iter().find(|f| f.name == "format").unwrap();
        let out = format
            .call(&[
                Value::String("{} -> {}".into()),
                Value::String("in".into()),
                Value::String("out".into()),
            ])
            .unwrap();
        assert_eq!(out, Value::String("in -> out".into()));
    }
}
