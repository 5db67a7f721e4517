use crate::ast::{Attribute, BinaryOp, Block, Body, Expr, ExprKind, File, Stmt, UnaryOp};
use crate::diag::{codes, Diagnostic, Span};
use crate::token::{tokenize, Token, TokenKind};

/// Parse configuration source text into a [`File`].
///
/// Statement-level errors accumulate (parsing resumes at the next statement
/// boundary); expression-level errors abort the enclosing statement.
pub fn parse_file(src: &str) -> Result<File, Vec<Diagnostic>> {
    let tokens = tokenize(src).map_err(|diag| vec![diag])?;
    let mut parser = Parser::new(tokens);
    let body = parser.body(TokenKind::Eof);
    if parser.diags.is_empty() {
        Ok(File { body })
    } else {
        Err(parser.diags)
    }
}

/// Parse a single expression, for tests and ad-hoc evaluation.
pub fn parse_expression(src: &str) -> Result<Expr, Diagnostic> {
    let tokens = tokenize(src)?;
    let mut parser = Parser::new(tokens);
    let expr = parser.expression(0)?;
    parser.expect(TokenKind::Eof)?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    diags: Vec<Diagnostic>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens,
            pos: 0,
            diags: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn bump(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn at(&self, kind: &TokenKind) -> bool {
        &self.peek().kind == kind
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, Diagnostic> {
        if self.at(&kind) {
            Ok(self.bump())
        } else {
            let found = self.peek();
            Err(Diagnostic::error(
                codes::ERR_PARSE,
                format!("expected {}, found {}", kind.describe(), found.kind.describe()),
                found.span,
            ))
        }
    }

    /// Parse statements until the closing token. Errors are recorded and
    /// parsing skips to the next plausible statement start.
    fn body(&mut self, until: TokenKind) -> Body {
        let mut stmts = Vec::new();
        while !self.at(&until) && !self.at(&TokenKind::Eof) {
            match self.statement() {
                Ok(stmt) => stmts.push(stmt),
                Err(diag) => {
                    self.diags.push(diag);
                    self.recover(&until);
                }
            }
        }
        if !self.at(&until) {
            // Hitting Eof while looking for '}' means an unclosed block.
            if until != TokenKind::Eof {
                let span = self.peek().span;
                self.diags.push(Diagnostic::error(
                    codes::ERR_PARSE,
                    "unexpected end of input, expected '}'",
                    span,
                ));
            }
        } else if until != TokenKind::Eof {
            self.bump();
        }
        Body { stmts }
    }

    /// Skip tokens until the next statement boundary
    fn recover(&mut self, until: &TokenKind) {
        let mut depth = 0usize;
        loop {
            match &self.peek().kind {
                TokenKind::Eof => return,
                kind if kind == until && depth == 0 => return,
                TokenKind::LBrace => {
                    depth += 1;
                    self.bump();
                }
                TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                    self.bump();
                }
                TokenKind::Ident(_) if depth == 0 => return,
                _ => {
                    self.bump();
                }
            }
        }
    }

    fn statement(&mut self) -> Result<Stmt, Diagnostic> {
        let start = self.peek().span;
        let first = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            other => {
                let message = format!("expected attribute or block, found {}", other.describe());
                return Err(Diagnostic::error(codes::ERR_PARSE, message, start));
            }
        };
        self.bump();

        let mut name = vec![first];
        while self.eat(&TokenKind::Dot) {
            match self.bump() {
                Token {
                    kind: TokenKind::Ident(part),
                    ..
                } => name.push(part),
                token => {
                    return Err(Diagnostic::error(
                        codes::ERR_PARSE,
                        format!("expected identifier after '.', found {}", token.kind.describe()),
                        token.span,
                    ));
                }
            }
        }

        if name.len() == 1 && self.eat(&TokenKind::Assign) {
            let value = self.expression(0)?;
            return Ok(Stmt::Attribute(Attribute {
                name: name.remove(0),
                value,
                span: start,
            }));
        }

        let label = match &self.peek().kind {
            TokenKind::String(text) => {
                let label = text.clone();
                self.bump();
                Some(label)
            }
            _ => None,
        };

        self.expect(TokenKind::LBrace)?;
        let body = self.body(TokenKind::RBrace);

        Ok(Stmt::Block(Block {
            name,
            label,
            body,
            span: start,
        }))
    }

    /// Precedence-climbing expression parser
    fn expression(&mut self, min_prec: u8) -> Result<Expr, Diagnostic> {
        let mut lhs = self.unary()?;

        loop {
            let op = match binary_op(&self.peek().kind) {
                Some(op) => op,
                None => break,
            };
            let prec = precedence(op);
            if prec < min_prec {
                break;
            }
            let span = self.bump().span;
            let rhs = self.expression(prec + 1)?;
            lhs = Expr {
                kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
                span,
            };
        }

        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.peek().clone();
        match token.kind {
            TokenKind::Minus => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Neg, Box::new(operand)),
                    span: token.span,
                })
            }
            TokenKind::Not => {
                self.bump();
                let operand = self.unary()?;
                Ok(Expr {
                    kind: ExprKind::Unary(UnaryOp::Not, Box::new(operand)),
                    span: token.span,
                })
            }
            _ => self.postfix(),
        }
    }

    fn postfix(&mut self) -> Result<Expr, Diagnostic> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(&TokenKind::Dot) {
                let token = self.bump();
                match token.kind {
                    TokenKind::Ident(field) => {
                        expr = Expr {
                            span: token.span,
                            kind: ExprKind::Member(Box::new(expr), field),
                        };
                    }
                    other => {
                        return Err(Diagnostic::error(
                            codes::ERR_PARSE,
                            format!("expected field name after '.', found {}", other.describe()),
                            token.span,
                        ));
                    }
                }
            } else if self.at(&TokenKind::LBracket) {
                let span = self.bump().span;
                let index = self.expression(0)?;
                self.expect(TokenKind::RBracket)?;
                expr = Expr {
                    span,
                    kind: ExprKind::Index(Box::new(expr), Box::new(index)),
                };
            } else if self.at(&TokenKind::LParen) {
                let span = self.bump().span;
                let mut args = Vec::new();
                if !self.at(&TokenKind::RParen) {
                    loop {
                        args.push(self.expression(0)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
                expr = Expr {
                    span,
                    kind: ExprKind::Call(Box::new(expr), args),
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> Result<Expr, Diagnostic> {
        let token = self.bump();
        let span = token.span;
        let kind = match token.kind {
            TokenKind::Null => ExprKind::Null,
            TokenKind::Bool(b) => ExprKind::Bool(b),
            TokenKind::Int(n) => ExprKind::Int(n),
            TokenKind::Float(n) => ExprKind::Float(n),
            TokenKind::String(s) => ExprKind::String(s),
            TokenKind::Ident(name) => ExprKind::Ident(name),
            TokenKind::LParen => {
                let inner = self.expression(0)?;
                self.expect(TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => {
                let mut items = Vec::new();
                if !self.at(&TokenKind::RBracket) {
                    loop {
                        items.push(self.expression(0)?);
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBracket)?;
                ExprKind::Array(items)
            }
            TokenKind::LBrace => {
                let mut fields = Vec::new();
                if !self.at(&TokenKind::RBrace) {
                    loop {
                        let key = match self.bump() {
                            Token {
                                kind: TokenKind::Ident(name),
                                ..
                            } => name,
                            Token {
                                kind: TokenKind::String(name),
                                ..
                            } => name,
                            token => {
                                return Err(Diagnostic::error(
                                    codes::ERR_PARSE,
                                    format!(
                                        "expected object key, found {}",
                                        token.kind.describe()
                                    ),
                                    token.span,
                                ));
                            }
                        };
                        self.expect(TokenKind::Assign)?;
                        let value = self.expression(0)?;
                        fields.push((key, value));
                        if !self.eat(&TokenKind::Comma) {
                            break;
                        }
                        // Allow a trailing comma before '}'.
                        if self.at(&TokenKind::RBrace) {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RBrace)?;
                ExprKind::Object(fields)
            }
            other => {
                return Err(Diagnostic::error(
                    codes::ERR_PARSE,
                    format!("expected expression, found {}", other.describe()),
                    span,
                ));
            }
        };
        Ok(Expr { kind, span })
    }
}

fn binary_op(kind: &TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::OrOr => BinaryOp::Or,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::Eq => BinaryOp::Eq,
        TokenKind::Ne => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Le => BinaryOp::Le,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::Ge => BinaryOp::Ge,
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        _ => return None,
    })
}

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq | BinaryOp::Ne => 3,
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => 4,
        BinaryOp::Add | BinaryOp::Sub => 5,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
    }
}
