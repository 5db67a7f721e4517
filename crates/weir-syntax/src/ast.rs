use crate::diag::Span;

/// A parsed configuration file.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub body: Body,
}

/// The contents of a file or a block: an ordered list of statements.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Body {
    pub stmts: Vec<Stmt>,
}

impl Body {
    /// All attribute statements, in order
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.stmts.iter().filter_map(|stmt| match stmt {
            Stmt::Attribute(attr) => Some(attr),
            Stmt::Block(_) => None,
        })
    }

    /// All block statements, in order
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.stmts.iter().filter_map(|stmt| match stmt {
            Stmt::Block(block) => Some(block),
            Stmt::Attribute(_) => None,
        })
    }
}

/// A single statement in a body.
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Attribute(Attribute),
    Block(Block),
}

impl Stmt {
    /// The name the statement binds or declares
    pub fn name(&self) -> String {
        match self {
            Stmt::Attribute(attr) => attr.name.clone(),
            Stmt::Block(block) => block.name.join("."),
        }
    }

    /// The source location of the statement
    pub fn span(&self) -> Span {
        match self {
            Stmt::Attribute(attr) => attr.span,
            Stmt::Block(block) => block.span,
        }
    }
}

/// `name = expr`
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub value: Expr,
    pub span: Span,
}

/// `part.part "label" { body }`
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Dotted name parts, e.g. `["metrics", "relabel"]`
    pub name: Vec<String>,
    /// Optional user label, e.g. `"default"`
    pub label: Option<String>,
    pub body: Body,
    pub span: Span,
}

impl Block {
    /// The dotted block name, e.g. `metrics.relabel`
    pub fn name_str(&self) -> String {
        self.name.join(".")
    }

    /// The fully-qualified node id: name plus label when present,
    /// e.g. `metrics.relabel.default`
    pub fn node_id(&self) -> String {
        match &self.label {
            Some(label) => format!("{}.{}", self.name_str(), label),
            None => self.name_str(),
        }
    }
}

/// An expression with its source location.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

/// Expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),

    /// A bare identifier, resolved against the scope
    Ident(String),
    /// `base.field`
    Member(Box<Expr>, String),
    /// `base[index]`
    Index(Box<Expr>, Box<Expr>),
    /// `callee(args...)`
    Call(Box<Expr>, Vec<Expr>),

    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),

    /// `[a, b, c]`
    Array(Vec<Expr>),
    /// `{ key = expr, ... }`
    Object(Vec<(String, Expr)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// Operator symbol for error messages
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}
