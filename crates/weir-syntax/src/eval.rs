//! Expression evaluation against a [`Scope`].
//!
//! Evaluation is pure: the scope is read-only and the result is a new
//! [`Value`]. Alongside the value the evaluator records every identifier
//! path it resolved against the scope; the controller turns those paths
//! into graph edges. [`references`] extracts the same paths from an AST
//! without evaluating, which is what the loader uses before any exports
//! exist.

use crate::ast::{BinaryOp, Expr, ExprKind, UnaryOp};
use crate::diag::{codes, Diagnostic, Span};
use crate::scope::Scope;
use crate::value::Value;

/// A dotted identifier path rooted in a scope binding, e.g.
/// `metrics.relabel.default.receiver`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RefPath {
    pub segments: Vec<String>,
    pub span: Span,
}

impl RefPath {
    /// The path joined with dots
    pub fn join(&self) -> String {
        self.segments.join(".")
    }
}

/// Evaluate an expression, discarding the recorded reference set.
pub fn eval(expr: &Expr, scope: &Scope) -> Result<Value, Diagnostic> {
    let mut refs = Vec::new();
    eval_inner(expr, scope, &mut refs)
}

/// Evaluate an expression and return the identifier paths resolved against
/// the scope along the way.
pub fn eval_recording(expr: &Expr, scope: &Scope) -> Result<(Value, Vec<RefPath>), Diagnostic> {
    let mut refs = Vec::new();
    let value = eval_inner(expr, scope, &mut refs)?;
    Ok((value, refs))
}

/// Extract the maximal identifier member-paths of an expression without
/// evaluating it. `a.x + f(b.y.z)` yields `[a.x, b.y.z]` (and `f`).
pub fn references(expr: &Expr) -> Vec<RefPath> {
    let mut out = Vec::new();
    collect_references(expr, &mut out);
    out
}

fn collect_references(expr: &Expr, out: &mut Vec<RefPath>) {
    if let Some(path) = flatten_path(expr) {
        out.push(path);
        return;
    }
    match &expr.kind {
        ExprKind::Member(base, _) => collect_references(base, out),
        ExprKind::Index(base, index) => {
            collect_references(base, out);
            collect_references(index, out);
        }
        ExprKind::Call(callee, args) => {
            collect_references(callee, out);
            for arg in args {
                collect_references(arg, out);
            }
        }
        ExprKind::Unary(_, operand) => collect_references(operand, out),
        ExprKind::Binary(_, lhs, rhs) => {
            collect_references(lhs, out);
            collect_references(rhs, out);
        }
        ExprKind::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        ExprKind::Object(fields) => {
            for (_, value) in fields {
                collect_references(value, out);
            }
        }
        // Literals carry no references; bare identifiers were already
        // captured by flatten_path above.
        ExprKind::Null
        | ExprKind::Bool(_)
        | ExprKind::Int(_)
        | ExprKind::Float(_)
        | ExprKind::String(_)
        | ExprKind::Ident(_) => {}
    }
}

/// Flatten a pure `ident.field.field…` chain; anything else returns `None`.
fn flatten_path(expr: &Expr) -> Option<RefPath> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(RefPath {
            segments: vec![name.clone()],
            span: expr.span,
        }),
        ExprKind::Member(base, field) => {
            let mut path = flatten_path(base)?;
            path.segments.push(field.clone());
            Some(path)
        }
        _ => None,
    }
}

fn eval_inner(expr: &Expr, scope: &Scope, refs: &mut Vec<RefPath>) -> Result<Value, Diagnostic> {
    // Identifier chains resolve as a unit so the recorded reference is the
    // full path, not just its root.
    if let Some(path) = flatten_path(expr) {
        return resolve_path(&path, scope, refs);
    }

    match &expr.kind {
        ExprKind::Null => Ok(Value::Null),
        ExprKind::Bool(b) => Ok(Value::Bool(*b)),
        ExprKind::Int(n) => Ok(Value::Int(*n)),
        ExprKind::Float(n) => Ok(Value::Float(*n)),
        ExprKind::String(s) => Ok(Value::String(s.clone())),

        // Handled by flatten_path above.
        ExprKind::Ident(_) => unreachable!("bare identifiers flatten to paths"),

        ExprKind::Member(base, field) => {
            let base_value = eval_inner(base, scope, refs)?;
            member(&base_value, field, expr.span)
        }

        ExprKind::Index(base, index) => {
            let base_value = eval_inner(base, scope, refs)?;
            let index_value = eval_inner(index, scope, refs)?;
            match (&base_value, &index_value) {
                (Value::Array(items), Value::Int(i)) => {
                    let idx = usize::try_from(*i).map_err(|_| {
                        Diagnostic::error(
                            codes::ERR_TYPE,
                            format!("array index {} out of range", i),
                            expr.span,
                        )
                    })?;
                    items.get(idx).cloned().ok_or_else(|| {
                        Diagnostic::error(
                            codes::ERR_TYPE,
                            format!("array index {} out of range (len {})", i, items.len()),
                            expr.span,
                        )
                    })
                }
                (Value::Object(_), Value::String(key)) => member(&base_value, key, expr.span),
                (base, index) => Err(Diagnostic::error(
                    codes::ERR_TYPE,
                    format!("cannot index {} with {}", base.kind(), index.kind()),
                    expr.span,
                )),
            }
        }

        ExprKind::Call(callee, args) => {
            let callee_value = eval_inner(callee, scope, refs)?;
            let func = match callee_value {
                Value::Function(func) => func,
                other => {
                    return Err(Diagnostic::error(
                        codes::ERR_TYPE,
                        format!("{} is not callable", other.kind()),
                        expr.span,
                    ));
                }
            };
            let mut arg_values = Vec::with_capacity(args.len());
            for arg in args {
                arg_values.push(eval_inner(arg, scope, refs)?);
            }
            func.call(&arg_values)
                .map_err(|message| Diagnostic::error(codes::ERR_TYPE, message, expr.span))
        }

        ExprKind::Unary(op, operand) => {
            let value = eval_inner(operand, scope, refs)?;
            match (op, value) {
                (UnaryOp::Neg, Value::Int(n)) => Ok(Value::Int(-n)),
                (UnaryOp::Neg, Value::Float(n)) => Ok(Value::Float(-n)),
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Neg, other) => Err(Diagnostic::error(
                    codes::ERR_TYPE,
                    format!("cannot negate {}", other.kind()),
                    expr.span,
                )),
                (UnaryOp::Not, other) => Err(Diagnostic::error(
                    codes::ERR_TYPE,
                    format!("'!' expects bool, got {}", other.kind()),
                    expr.span,
                )),
            }
        }

        ExprKind::Binary(op, lhs, rhs) => {
            // Logical operators short-circuit; everything else is strict.
            if matches!(op, BinaryOp::And | BinaryOp::Or) {
                let lhs_value = eval_inner(lhs, scope, refs)?;
                let lhs_bool = expect_bool(&lhs_value, op, expr.span)?;
                match (op, lhs_bool) {
                    (BinaryOp::And, false) => return Ok(Value::Bool(false)),
                    (BinaryOp::Or, true) => return Ok(Value::Bool(true)),
                    _ => {}
                }
                let rhs_value = eval_inner(rhs, scope, refs)?;
                let rhs_bool = expect_bool(&rhs_value, op, expr.span)?;
                return Ok(Value::Bool(rhs_bool));
            }

            let lhs_value = eval_inner(lhs, scope, refs)?;
            let rhs_value = eval_inner(rhs, scope, refs)?;
            binary(*op, lhs_value, rhs_value, expr.span)
        }

        ExprKind::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_inner(item, scope, refs)?);
            }
            Ok(Value::Array(out))
        }

        ExprKind::Object(fields) => {
            let mut out = std::collections::BTreeMap::new();
            for (key, value_expr) in fields {
                let value = eval_inner(value_expr, scope, refs)?;
                out.insert(key.clone(), value);
            }
            Ok(Value::Object(out))
        }
    }
}

/// Resolve an identifier chain against the scope, recording the path.
fn resolve_path(path: &RefPath, scope: &Scope, refs: &mut Vec<RefPath>) -> Result<Value, Diagnostic> {
    let root = &path.segments[0];
    let mut current = scope
        .lookup(root)
        .ok_or_else(|| {
            Diagnostic::error(
                codes::ERR_UNDEFINED,
                format!("{} is not defined", root),
                path.span,
            )
        })?
        .clone();

    refs.push(path.clone());

    for (depth, field) in path.segments[1..].iter().enumerate() {
        current = member(&current, field, path.span).map_err(|mut diag| {
            // Rewrite the message so the user sees the full path context.
            diag.message = format!(
                "{} (while resolving {})",
                diag.message,
                path.segments[..depth + 2].join(".")
            );
            diag
        })?;
    }
    Ok(current)
}

fn member(base: &Value, field: &str, span: Span) -> Result<Value, Diagnostic> {
    match base {
        Value::Object(fields) => fields.get(field).cloned().ok_or_else(|| {
            Diagnostic::error(
                codes::ERR_UNKNOWN_FIELD,
                format!("field {:?} does not exist", field),
                span,
            )
        }),
        other => Err(Diagnostic::error(
            codes::ERR_TYPE,
            format!("cannot access field {:?} of {}", field, other.kind()),
            span,
        )),
    }
}

fn expect_bool(value: &Value, op: &BinaryOp, span: Span) -> Result<bool, Diagnostic> {
    match value {
        Value::Bool(b) => Ok(*b),
        other => Err(Diagnostic::error(
            codes::ERR_TYPE,
            format!("'{}' expects bool operands, got {}", op.symbol(), other.kind()),
            span,
        )),
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value, span: Span) -> Result<Value, Diagnostic> {
    use BinaryOp::*;

    let type_error = |lhs: &Value, rhs: &Value| {
        Diagnostic::error(
            codes::ERR_TYPE,
            format!(
                "'{}' is not defined for {} and {}",
                op.symbol(),
                lhs.kind(),
                rhs.kind()
            ),
            span,
        )
    };

    match op {
        Add => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a.wrapping_add(*b))),
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Value::Array(out))
            }
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => Ok(Value::Float(a + b)),
                _ => Err(type_error(&lhs, &rhs)),
            },
        },
        Sub | Mul | Div | Rem => match (&lhs, &rhs) {
            (Value::Int(a), Value::Int(b)) => match op {
                Sub => Ok(Value::Int(a.wrapping_sub(*b))),
                Mul => Ok(Value::Int(a.wrapping_mul(*b))),
                Div | Rem => {
                    if *b == 0 {
                        Err(Diagnostic::error(codes::ERR_TYPE, "division by zero", span))
                    } else if op == Div {
                        Ok(Value::Int(a / b))
                    } else {
                        Ok(Value::Int(a % b))
                    }
                }
                _ => unreachable!(),
            },
            _ => match (lhs.as_f64(), rhs.as_f64()) {
                (Some(a), Some(b)) => match op {
                    Sub => Ok(Value::Float(a - b)),
                    Mul => Ok(Value::Float(a * b)),
                    Div => Ok(Value::Float(a / b)),
                    Rem => Ok(Value::Float(a % b)),
                    _ => unreachable!(),
                },
                _ => Err(type_error(&lhs, &rhs)),
            },
        },
        Eq => Ok(Value::Bool(lhs == rhs)),
        Ne => Ok(Value::Bool(lhs != rhs)),
        Lt | Le | Gt | Ge => {
            let ordering = match (&lhs, &rhs) {
                (Value::String(a), Value::String(b)) => a.partial_cmp(b),
                _ => match (lhs.as_f64(), rhs.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => return Err(type_error(&lhs, &rhs)),
                },
            };
            let ordering = ordering.ok_or_else(|| type_error(&lhs, &rhs))?;
            let result = match op {
                Lt => ordering.is_lt(),
                Le => ordering.is_le(),
                Gt => ordering.is_gt(),
                Ge => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(Value::Bool(result))
        }
        And | Or => unreachable!("logical operators are handled by the caller"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_expression;
    use std::collections::BTreeMap;

    fn scope() -> Scope {
        let exports = Value::object([(
            "default".to_string(),
            Value::object([(
                "output".to_string(),
                Value::object([("count".to_string(), Value::Int(7))]),
            )]),
        )]);
        Scope::with_stdlib(BTreeMap::from([
            ("x".to_string(), Value::Int(3)),
            ("name".to_string(), Value::String("weir".into())),
            ("relabel".to_string(), exports),
        ]))
    }

    fn eval_str(src: &str) -> Result<Value, Diagnostic> {
        eval(&parse_expression(src).unwrap(), &scope())
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(eval_str("1 + 2 * 3").unwrap(), Value::Int(7));
        assert_eq!(eval_str("10 / 4").unwrap(), Value::Int(2));
        assert_eq!(eval_str("10.0 / 4").unwrap(), Value::Float(2.5));
        assert_eq!(eval_str("7 % 3").unwrap(), Value::Int(1));
        assert_eq!(eval_str("-x").unwrap(), Value::Int(-3));
    }

    #[test]
    fn test_int_float_widening() {
        assert_eq!(eval_str("1 + 0.5").unwrap(), Value::Float(1.5));
        assert_eq!(eval_str("2 == 2.0").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_string_concat() {
        assert_eq!(
            eval_str(r#"name + "-agent""#).unwrap(),
            Value::String("weir-agent".into())
        );
    }

    #[test]
    fn test_comparisons_and_logic() {
        assert_eq!(eval_str("x < 5 && x > 1").unwrap(), Value::Bool(true));
        assert_eq!(eval_str(r#""a" < "b" || false"#).unwrap(), Value::Bool(true));
        assert_eq!(eval_str("!(x == 3)").unwrap(), Value::Bool(false));
    }

    #[test]
    fn test_short_circuit() {
        // The right side would fail to evaluate; short-circuiting skips it.
        assert_eq!(eval_str("false && missing").unwrap(), Value::Bool(false));
        assert_eq!(eval_str("true || missing").unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_member_path_resolution() {
        assert_eq!(eval_str("relabel.default.output.count").unwrap(), Value::Int(7));
    }

    #[test]
    fn test_undefined_identifier() {
        let err = eval_str("nope").unwrap_err();
        assert_eq!(err.code, codes::ERR_UNDEFINED);
    }

    #[test]
    fn test_unknown_field() {
        let err = eval_str("relabel.default.missing").unwrap_err();
        assert_eq!(err.code, codes::ERR_UNKNOWN_FIELD);
        assert!(err.message.contains("relabel.default.missing"));
    }

    #[test]
    fn test_type_errors() {
        assert_eq!(eval_str("1 + true").unwrap_err().code, codes::ERR_TYPE);
        assert_eq!(eval_str("name(1)").unwrap_err().code, codes::ERR_TYPE);
        assert_eq!(eval_str("1 / 0").unwrap_err().code, codes::ERR_TYPE);
    }

    #[test]
    fn test_array_and_object_constructors() {
        let value = eval_str(r#"{ items = [1, 2] + [3], label = name }"#).unwrap();
        match value {
            Value::Object(fields) => {
                assert_eq!(
                    fields["items"],
                    Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
                );
                assert_eq!(fields["label"], Value::String("weir".into()));
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_index_access() {
        assert_eq!(eval_str("[10, 20][1]").unwrap(), Value::Int(20));
        assert!(eval_str("[10][5]").is_err());
    }

    #[test]
    fn test_builtin_calls() {
        assert_eq!(eval_str("len(name)").unwrap(), Value::Int(4));
        assert_eq!(
            eval_str("concat([1], [2, 3])").unwrap(),
            Value::Array(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
        );
    }

    #[test]
    fn test_recording_references() {
        let expr = parse_expression("relabel.default.output.count + x").unwrap();
        let (_, refs) = eval_recording(&expr, &scope()).unwrap();
        let paths: Vec<String> = refs.iter().map(RefPath::join).collect();
        assert_eq!(paths, vec!["relabel.default.output.count", "x"]);
    }

    #[test]
    fn test_references_without_scope() {
        let expr = parse_expression("f(a.b.c) + d[e.g]").unwrap();
        let paths: Vec<String> = references(&expr).iter().map(RefPath::join).collect();
        assert_eq!(paths, vec!["f", "a.b.c", "d", "e.g"]);
    }
}
