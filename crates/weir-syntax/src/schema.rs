//! Argument schemas and the projection of evaluated values into typed
//! argument structs.
//!
//! A component's registration declares an [`ArgSchema`]: which attributes
//! and blocks its body accepts and which are required. The controller
//! validates a block body against the schema before the component ever sees
//! it, so component `build`/`update` code can assume the shape is right and
//! only has to decode. Decoding goes through [`FromValue`], a schema-guided
//! projection rather than reflection over host types.

use crate::ast::Body;
use crate::diag::{codes, Diagnostic, Span};
use crate::value::{Capsule, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Whether a schema field is an attribute (`name = expr`) or a block
/// (`name { … }`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Attr,
    Block,
}

/// One field of an argument schema.
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    /// Blocks may repeat; the evaluated body then carries an array
    pub repeated: bool,
}

impl Field {
    /// A required attribute
    pub const fn attr(name: &'static str) -> Field {
        Field {
            name,
            kind: FieldKind::Attr,
            required: true,
            repeated: false,
        }
    }

    /// An optional attribute
    pub const fn attr_optional(name: &'static str) -> Field {
        Field {
            name,
            kind: FieldKind::Attr,
            required: false,
            repeated: false,
        }
    }

    /// An optional block that may appear any number of times
    pub const fn block_repeated(name: &'static str) -> Field {
        Field {
            name,
            kind: FieldKind::Block,
            required: false,
            repeated: true,
        }
    }

    /// An optional singleton block
    pub const fn block_optional(name: &'static str) -> Field {
        Field {
            name,
            kind: FieldKind::Block,
            required: false,
            repeated: false,
        }
    }
}

/// The declared argument surface of a component.
#[derive(Debug, Clone, Copy)]
pub struct ArgSchema {
    pub fields: &'static [Field],
}

impl ArgSchema {
    /// A schema with no fields
    pub const fn empty() -> ArgSchema {
        ArgSchema { fields: &[] }
    }

    pub const fn new(fields: &'static [Field]) -> ArgSchema {
        ArgSchema { fields }
    }

    fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a block body against this schema.
    ///
    /// Checks that every attribute and block in the body is declared, that
    /// declared kinds match usage, that non-repeated fields appear at most
    /// once, and that required fields are present.
    pub fn validate_body(&self, body: &Body) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        let mut seen: BTreeMap<&str, u32> = BTreeMap::new();

        for stmt in &body.stmts {
            let name = stmt.name();
            let span = stmt.span();
            let used_as = match stmt {
                crate::ast::Stmt::Attribute(_) => FieldKind::Attr,
                crate::ast::Stmt::Block(_) => FieldKind::Block,
            };

            let field = match self.field(&name) {
                Some(field) => field,
                None => {
                    diags.push(Diagnostic::error(
                        codes::ERR_UNKNOWN_FIELD,
                        format!("unknown {} {:?}", kind_noun(used_as), name),
                        span,
                    ));
                    continue;
                }
            };

            if field.kind != used_as {
                diags.push(Diagnostic::error(
                    codes::ERR_TYPE,
                    format!(
                        "{:?} must be used as {} but was used as {}",
                        name,
                        kind_noun(field.kind),
                        kind_noun(used_as)
                    ),
                    span,
                ));
                continue;
            }

            let count = seen.entry(field.name).or_insert(0);
            *count += 1;
            if *count > 1 && !field.repeated {
                diags.push(Diagnostic::error(
                    codes::ERR_TYPE,
                    format!("{} {:?} may only be provided once", kind_noun(field.kind), name),
                    span,
                ));
            }
        }

        for field in self.fields {
            if field.required && !seen.contains_key(field.name) {
                diags.push(Diagnostic::error_nospan(
                    codes::ERR_MISSING_FIELD,
                    format!("missing required {} {:?}", kind_noun(field.kind), field.name),
                ));
            }
        }

        diags
    }

    /// Check a structurally-typed object value against this schema.
    ///
    /// Used when an expression yields a whole object assigned into a
    /// schema'd target: missing required fields are errors, extra fields
    /// are warnings.
    pub fn check_object(&self, fields: &BTreeMap<String, Value>, span: Span) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for (name, _) in fields {
            if self.field(name).is_none() {
                diags.push(Diagnostic::warning(
                    codes::ERR_UNKNOWN_FIELD,
                    format!("field {:?} is not used by the target schema", name),
                    span,
                ));
            }
        }
        for field in self.fields {
            if field.required && !fields.contains_key(field.name) {
                diags.push(Diagnostic::error(
                    codes::ERR_MISSING_FIELD,
                    format!("missing required field {:?}", field.name),
                    span,
                ));
            }
        }
        diags
    }
}

fn kind_noun(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Attr => "attribute",
        FieldKind::Block => "block",
    }
}

/// Failure to project a [`Value`] into a typed argument struct.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DecodeError {
    pub message: String,
}

impl DecodeError {
    pub fn new(message: impl Into<String>) -> Self {
        DecodeError {
            message: message.into(),
        }
    }

    fn expected(what: &str, got: &Value) -> Self {
        DecodeError::new(format!("expected {}, got {}", what, got.kind()))
    }

    /// Prefix the error with the field it occurred in
    pub fn in_field(self, name: &str) -> Self {
        DecodeError::new(format!("{}: {}", name, self.message))
    }
}

/// Schema-guided projection from a [`Value`] into a host type.
pub trait FromValue: Sized {
    fn from_value(value: &Value) -> Result<Self, DecodeError>;
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        Ok(value.clone())
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Bool(b) => Ok(*b),
            other => Err(DecodeError::expected("bool", other)),
        }
    }
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int(n) => Ok(*n),
            other => Err(DecodeError::expected("int", other)),
        }
    }
}

impl FromValue for u64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int(n) if *n >= 0 => Ok(*n as u64),
            Value::Int(n) => Err(DecodeError::new(format!("expected non-negative int, got {}", n))),
            other => Err(DecodeError::expected("int", other)),
        }
    }
}

impl FromValue for usize {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let n = u64::from_value(value)?;
        usize::try_from(n).map_err(|_| DecodeError::new(format!("{} does not fit in usize", n)))
    }
}

impl FromValue for f64 {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        // int -> float widening
        value
            .as_f64()
            .ok_or_else(|| DecodeError::expected("number", value))
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            other => Err(DecodeError::expected("string", other)),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Array(items) => items.iter().map(T::from_value).collect(),
            other => Err(DecodeError::expected("array", other)),
        }
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(v)?)))
                .collect(),
            other => Err(DecodeError::expected("object", other)),
        }
    }
}

impl<T: FromValue> FromValue for std::collections::HashMap<String, T> {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(fields) => fields
                .iter()
                .map(|(k, v)| Ok((k.clone(), T::from_value(v)?)))
                .collect(),
            other => Err(DecodeError::expected("object", other)),
        }
    }
}

/// Durations accept `"300ms"`, `"10s"`, `"5m"`, `"1h"` or a bare number of
/// seconds: the string↔duration coercion for tagged fields.
impl FromValue for Duration {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int(n) if *n >= 0 => Ok(Duration::from_secs(*n as u64)),
            Value::String(s) => parse_duration(s)
                .ok_or_else(|| DecodeError::new(format!("invalid duration {:?}", s))),
            other => Err(DecodeError::expected("duration string", other)),
        }
    }
}

fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, unit) = s.split_at(split);
    let number: f64 = number.parse().ok()?;
    if number < 0.0 {
        return None;
    }
    let secs = match unit {
        "ms" => number / 1000.0,
        "s" => number,
        "m" => number * 60.0,
        "h" => number * 3600.0,
        _ => return None,
    };
    Some(Duration::from_secs_f64(secs))
}

/// A byte count decoded from `"64KiB"`, `"10MB"`, `"512"` forms: the
/// string↔size coercion for tagged fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ByteSize(pub u64);

impl FromValue for ByteSize {
    fn from_value(value: &Value) -> Result<Self, DecodeError> {
        match value {
            Value::Int(n) if *n >= 0 => Ok(ByteSize(*n as u64)),
            Value::String(s) => parse_byte_size(s)
                .map(ByteSize)
                .ok_or_else(|| DecodeError::new(format!("invalid size {:?}", s))),
            other => Err(DecodeError::expected("size string", other)),
        }
    }
}

fn parse_byte_size(s: &str) -> Option<u64> {
    let s = s.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let number: u64 = number.parse().ok()?;
    let multiplier: u64 = match unit.trim() {
        "" | "B" => 1,
        "KB" => 1000,
        "MB" => 1000 * 1000,
        "GB" => 1000 * 1000 * 1000,
        "KiB" => 1024,
        "MiB" => 1024 * 1024,
        "GiB" => 1024 * 1024 * 1024,
        _ => return None,
    };
    number.checked_mul(multiplier)
}

/// Recover a typed capsule payload.
pub fn capsule_payload<T: std::any::Any + Clone>(
    value: &Value,
    expected_kind: &str,
) -> Result<T, DecodeError> {
    match value {
        Value::Capsule(capsule) => capsule.downcast::<T>().ok_or_else(|| {
            DecodeError::new(format!(
                "expected {} capsule, got {} capsule",
                expected_kind, capsule.kind
            ))
        }),
        other => Err(DecodeError::expected(expected_kind, other)),
    }
}

/// Field-by-field decoding helper for `Arguments` structs.
///
/// ```
/// use weir_syntax::schema::{FromValue, ObjectDecoder, DecodeError};
/// use weir_syntax::value::Value;
///
/// struct Arguments {
///     endpoint: String,
///     retries: i64,
/// }
///
/// impl FromValue for Arguments {
///     fn from_value(value: &Value) -> Result<Self, DecodeError> {
///         let object = ObjectDecoder::new(value)?;
///         Ok(Arguments {
///             endpoint: object.required("endpoint")?,
///             retries: object.optional_or("retries", 3)?,
///         })
///     }
/// }
/// ```
pub struct ObjectDecoder<'a> {
    fields: &'a BTreeMap<String, Value>,
}

impl<'a> ObjectDecoder<'a> {
    /// Expect an object value
    pub fn new(value: &'a Value) -> Result<Self, DecodeError> {
        match value {
            Value::Object(fields) => Ok(ObjectDecoder { fields }),
            other => Err(DecodeError::expected("object", other)),
        }
    }

    /// The raw value of a field, if present
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Decode a required field
    pub fn required<T: FromValue>(&self, name: &str) -> Result<T, DecodeError> {
        match self.fields.get(name) {
            Some(value) => T::from_value(value).map_err(|e| e.in_field(name)),
            None => Err(DecodeError::new(format!("missing required field {:?}", name))),
        }
    }

    /// Decode an optional field
    pub fn optional<T: FromValue>(&self, name: &str) -> Result<Option<T>, DecodeError> {
        match self.fields.get(name) {
            Some(Value::Null) | None => Ok(None),
            Some(value) => T::from_value(value).map(Some).map_err(|e| e.in_field(name)),
        }
    }

    /// Decode an optional field, falling back to a default
    pub fn optional_or<T: FromValue>(&self, name: &str, default: T) -> Result<T, DecodeError> {
        Ok(self.optional(name)?.unwrap_or(default))
    }

    /// Decode a repeated block field: absent means empty.
    pub fn repeated<T: FromValue>(&self, name: &str) -> Result<Vec<T>, DecodeError> {
        match self.fields.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(Value::Array(items)) => items
                .iter()
                .map(T::from_value)
                .collect::<Result<_, _>>()
                .map_err(|e| e.in_field(name)),
            // A single occurrence evaluates to a bare object.
            Some(value) => Ok(vec![T::from_value(value).map_err(|e| e.in_field(name))?]),
        }
    }
}

/// Make a capsule value from a payload; convenience for exports.
pub fn capsule<T: std::any::Any + Send + Sync>(kind: &'static str, payload: T) -> Value {
    Value::Capsule(Capsule::new(kind, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_file;

    const SCHEMA: ArgSchema = ArgSchema::new(&[
        Field::attr("forward_to"),
        Field::attr_optional("max_cache_size"),
        Field::block_repeated("rule"),
    ]);

    fn body_of(src: &str) -> Body {
        parse_file(src).expect("parse failed").body
    }

    #[test]
    fn test_validate_body_accepts_known_fields() {
        let body = body_of(
            r#"
            forward_to = []
            max_cache_size = 1000
            rule { }
            rule { }
            "#,
        );
        assert!(SCHEMA.validate_body(&body).is_empty());
    }

    #[test]
    fn test_validate_body_unknown_attribute() {
        let body = body_of("forward_to = []\nbogus = 1");
        let diags = SCHEMA.validate_body(&body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::ERR_UNKNOWN_FIELD);
        assert!(diags[0].message.contains("bogus"));
    }

    #[test]
    fn test_validate_body_missing_required() {
        let body = body_of("max_cache_size = 1000");
        let diags = SCHEMA.validate_body(&body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::ERR_MISSING_FIELD);
        assert!(diags[0].message.contains("forward_to"));
    }

    #[test]
    fn test_validate_body_attr_used_as_block() {
        let body = body_of("forward_to { }");
        let diags = SCHEMA.validate_body(&body);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].code, codes::ERR_TYPE);
    }

    #[test]
    fn test_validate_body_duplicate_attribute() {
        let body = body_of("forward_to = []\nforward_to = []");
        let diags = SCHEMA.validate_body(&body);
        assert!(diags
            .iter()
            .any(|d| d.message.contains("may only be provided once")));
    }

    #[test]
    fn test_check_object_extra_field_is_warning() {
        let fields = BTreeMap::from([
            ("forward_to".to_string(), Value::Array(vec![])),
            ("extra".to_string(), Value::Int(1)),
        ]);
        let diags = SCHEMA.check_object(&fields, Span::new(1, 1));
        assert_eq!(diags.len(), 1);
        assert!(!diags[0].is_error());
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(i64::from_value(&Value::Int(5)).unwrap(), 5);
        assert_eq!(f64::from_value(&Value::Int(5)).unwrap(), 5.0);
        assert_eq!(
            String::from_value(&Value::String("x".into())).unwrap(),
            "x"
        );
        assert!(u64::from_value(&Value::Int(-1)).is_err());
        assert!(bool::from_value(&Value::Int(1)).is_err());
    }

    #[test]
    fn test_decode_duration() {
        assert_eq!(
            Duration::from_value(&Value::String("300ms".into())).unwrap(),
            Duration::from_millis(300)
        );
        assert_eq!(
            Duration::from_value(&Value::String("5m".into())).unwrap(),
            Duration::from_secs(300)
        );
        assert_eq!(
            Duration::from_value(&Value::Int(10)).unwrap(),
            Duration::from_secs(10)
        );
        assert!(Duration::from_value(&Value::String("5 parsecs".into())).is_err());
    }

    #[test]
    fn test_decode_byte_size() {
        assert_eq!(
            ByteSize::from_value(&Value::String("64KiB".into())).unwrap(),
            ByteSize(64 * 1024)
        );
        assert_eq!(
            ByteSize::from_value(&Value::String("10MB".into())).unwrap(),
            ByteSize(10_000_000)
        );
        assert_eq!(
            ByteSize::from_value(&Value::Int(512)).unwrap(),
            ByteSize(512)
        );
    }

    #[test]
    fn test_object_decoder() {
        let value = Value::object([
            ("endpoint".to_string(), Value::String("http://x".into())),
            ("retries".to_string(), Value::Int(5)),
        ]);
        let object = ObjectDecoder::new(&value).unwrap();
        assert_eq!(object.required::<String>("endpoint").unwrap(), "http://x");
        assert_eq!(object.optional_or("retries", 3i64).unwrap(), 5);
        assert_eq!(object.optional_or("timeout", 30i64).unwrap(), 30);
        assert!(object.required::<String>("missing").is_err());
    }

    #[test]
    fn test_object_decoder_repeated() {
        let value = Value::object([(
            "rule".to_string(),
            Value::Array(vec![
                Value::object([("action".to_string(), Value::String("drop".into()))]),
                Value::object([("action".to_string(), Value::String("keep".into()))]),
            ]),
        )]);
        let object = ObjectDecoder::new(&value).unwrap();
        let rules: Vec<Value> = object.repeated("rule").unwrap();
        assert_eq!(rules.len(), 2);

        let empty = Value::object([]);
        let object = ObjectDecoder::new(&empty).unwrap();
        assert!(object.repeated::<Value>("rule").unwrap().is_empty());
    }

    #[test]
    fn test_capsule_payload() {
        #[derive(Clone, Debug, PartialEq)]
        struct Handle(&'static str);

        let value = capsule("handle", Handle("h"));
        assert_eq!(
            capsule_payload::<Handle>(&value, "handle").unwrap(),
            Handle("h")
        );
        assert!(capsule_payload::<String>(&value, "handle").is_err());
        assert!(capsule_payload::<Handle>(&Value::Int(1), "handle").is_err());
    }
}
