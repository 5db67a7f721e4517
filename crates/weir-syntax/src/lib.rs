//!
//! weir-syntax - configuration language for the weir agent
//!
//! This crate owns everything between raw configuration text and typed
//! component arguments: tokenizing and parsing the block/attribute
//! language, evaluating expressions against a scope, extracting the
//! references that become graph edges, and projecting evaluated values
//! into the argument structs components declare.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Abstract syntax tree for configuration files
pub mod ast;

/// Structured diagnostics with source spans
pub mod diag;

/// Expression evaluation and reference extraction
pub mod eval;

/// Parser for the block/attribute language
pub mod parser;

/// Name-resolution scopes and the builtin function set
pub mod scope;

/// Argument schemas and typed-value projection
pub mod schema;

/// Lexer
pub mod token;

/// The runtime value model
pub mod value;

pub use ast::{Attribute, Block, Body, Expr, File, Stmt};
pub use diag::{codes, Diagnostic, Severity, Span, SyntaxError};
pub use eval::{eval, eval_recording, references, RefPath};
pub use parser::{parse_expression, parse_file};
pub use scope::Scope;
pub use schema::{ArgSchema, DecodeError, Field, FieldKind, FromValue, ObjectDecoder};
pub use value::{Capsule, FunctionValue, Value};
