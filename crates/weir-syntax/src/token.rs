use crate::diag::{codes, Diagnostic, Span};

/// A lexical token with its source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

/// The kinds of token the configuration language recognizes.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,

    LBrace,
    RBrace,
    LBracket,
    RBracket,
    LParen,
    RParen,
    Assign,
    Comma,
    Dot,

    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Not,

    Eof,
}

impl TokenKind {
    /// Short human-readable description used in parse errors
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier {:?}", name),
            TokenKind::String(_) => "string literal".to_string(),
            TokenKind::Int(_) | TokenKind::Float(_) => "number literal".to_string(),
            TokenKind::Bool(_) => "bool literal".to_string(),
            TokenKind::Null => "null".to_string(),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::LBracket => "'['".to_string(),
            TokenKind::RBracket => "']'".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Assign => "'='".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Plus => "'+'".to_string(),
            TokenKind::Minus => "'-'".to_string(),
            TokenKind::Star => "'*'".to_string(),
            TokenKind::Slash => "'/'".to_string(),
            TokenKind::Percent => "'%'".to_string(),
            TokenKind::Eq => "'=='".to_string(),
            TokenKind::Ne => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::AndAnd => "'&&'".to_string(),
            TokenKind::OrOr => "'||'".to_string(),
            TokenKind::Not => "'!'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// Tokenize configuration source text.
///
/// Produces the full token stream (terminated by `Eof`) or the first
/// lexical error encountered.
pub fn tokenize(src: &str) -> Result<Vec<Token>, Diagnostic> {
    let mut lexer = Lexer::new(src);
    let mut tokens = Vec::new();
    loop {
        let token = lexer.next_token()?;
        let done = token.kind == TokenKind::Eof;
        tokens.push(token);
        if done {
            return Ok(tokens);
        }
    }
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: u32,
    column: u32,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Lexer {
            chars: src.chars().peekable(),
            line: 1,
            column: 1,
        }
    }

    fn span(&self) -> Span {
        Span::new(self.line, self.column)
    }

    fn bump(&mut self) -> Option<char> {
        let ch = self.chars.next()?;
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.bump();
            true
        } else {
            false
        }
    }

    fn next_token(&mut self) -> Result<Token, Diagnostic> {
        self.skip_trivia()?;

        let span = self.span();
        let ch = match self.bump() {
            Some(ch) => ch,
            None => {
                return Ok(Token {
                    kind: TokenKind::Eof,
                    span,
                })
            }
        };

        let kind = match ch {
            '{' => TokenKind::LBrace,
            '}' => TokenKind::RBrace,
            '[' => TokenKind::LBracket,
            ']' => TokenKind::RBracket,
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            '.' => TokenKind::Dot,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '%' => TokenKind::Percent,
            '=' => {
                if self.eat('=') {
                    TokenKind::Eq
                } else {
                    TokenKind::Assign
                }
            }
            '!' => {
                if self.eat('=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            '<' => {
                if self.eat('=') {
                    TokenKind::Le
                } else {
                    TokenKind::Lt
                }
            }
            '>' => {
                if self.eat('=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            '&' => {
                if self.eat('&') {
                    TokenKind::AndAnd
                } else {
                    return Err(Diagnostic::error(
                        codes::ERR_PARSE,
                        "expected '&&'",
                        span,
                    ));
                }
            }
            '|' => {
                if self.eat('|') {
                    TokenKind::OrOr
                } else {
                    return Err(Diagnostic::error(
                        codes::ERR_PARSE,
                        "expected '||'",
                        span,
                    ));
                }
            }
            '"' => self.string(span)?,
            ch if ch.is_ascii_digit() => self.number(ch, span)?,
            ch if is_ident_start(ch) => self.ident(ch),
            other => {
                return Err(Diagnostic::error(
                    codes::ERR_PARSE,
                    format!("unexpected character {:?}", other),
                    span,
                ));
            }
        };

        Ok(Token { kind, span })
    }

    fn skip_trivia(&mut self) -> Result<(), Diagnostic> {
        loop {
            match self.peek() {
                Some(ch) if ch.is_whitespace() => {
                    self.bump();
                }
                Some('/') => {
                    // Lookahead for // or /* without consuming a lone slash.
                    let mut clone = self.chars.clone();
                    clone.next();
                    match clone.next() {
                        Some('/') => {
                            while let Some(ch) = self.bump() {
                                if ch == '\n' {
                                    break;
                                }
                            }
                        }
                        Some('*') => {
                            let open = self.span();
                            self.bump();
                            self.bump();
                            let mut closed = false;
                            while let Some(ch) = self.bump() {
                                if ch == '*' && self.eat('/') {
                                    closed = true;
                                    break;
                                }
                            }
                            if !closed {
                                return Err(Diagnostic::error(
                                    codes::ERR_PARSE,
                                    "unterminated block comment",
                                    open,
                                ));
                            }
                        }
                        _ => return Ok(()),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string(&mut self, open: Span) -> Result<TokenKind, Diagnostic> {
        let mut text = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(TokenKind::String(text)),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('"') => text.push('"'),
                    Some('\\') => text.push('\\'),
                    Some(other) => {
                        return Err(Diagnostic::error(
                            codes::ERR_PARSE,
                            format!("invalid escape sequence '\\{}'", other),
                            self.span(),
                        ));
                    }
                    None => {
                        return Err(Diagnostic::error(
                            codes::ERR_PARSE,
                            "unterminated string literal",
                            open,
                        ));
                    }
                },
                Some('\n') | None => {
                    return Err(Diagnostic::error(
                        codes::ERR_PARSE,
                        "unterminated string literal",
                        open,
                    ));
                }
                Some(ch) => text.push(ch),
            }
        }
    }

    fn number(&mut self, first: char, span: Span) -> Result<TokenKind, Diagnostic> {
        let mut text = String::new();
        text.push(first);
        let mut is_float = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                text.push(ch);
                self.bump();
            } else if ch == '.' {
                // A dot only continues the number when followed by a digit;
                // otherwise it is member access on a literal.
                let mut clone = self.chars.clone();
                clone.next();
                if clone.next().map(|c| c.is_ascii_digit()) != Some(true) {
                    break;
                }
                if is_float {
                    break;
                }
                is_float = true;
                text.push(ch);
                self.bump();
            } else if ch == 'e' || ch == 'E' {
                is_float = true;
                text.push(ch);
                self.bump();
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    text.push(sign);
                    self.bump();
                }
            } else {
                break;
            }
        }

        if is_float {
            text.parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|err| Diagnostic::error(codes::ERR_PARSE, format!("invalid number: {}", err), span))
        } else {
            text.parse::<i64>()
                .map(TokenKind::Int)
                .map_err(|err| Diagnostic::error(codes::ERR_PARSE, format!("invalid number: {}", err), span))
        }
    }

    fn ident(&mut self, first: char) -> TokenKind {
        let mut text = String::new();
        text.push(first);
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                text.push(ch);
                self.bump();
            } else {
                break;
            }
        }
        match text.as_str() {
            "true" => TokenKind::Bool(true),
            "false" => TokenKind::Bool(false),
            "null" => TokenKind::Null,
            _ => TokenKind::Ident(text),
        }
    }
}

fn is_ident_start(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .expect("tokenize failed")
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_block_header() {
        assert_eq!(
            kinds(r#"metrics.relabel "default" {"#),
            vec![
                TokenKind::Ident("metrics".into()),
                TokenKind::Dot,
                TokenKind::Ident("relabel".into()),
                TokenKind::String("default".into()),
                TokenKind::LBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        assert_eq!(
            kinds("1 2.5 1e3 10"),
            vec![
                TokenKind::Int(1),
                TokenKind::Float(2.5),
                TokenKind::Float(1000.0),
                TokenKind::Int(10),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_member_access_on_int() {
        // "a.1" is not a number continuation; "1.x" keeps the dot separate.
        assert_eq!(
            kinds("x.y"),
            vec![
                TokenKind::Ident("x".into()),
                TokenKind::Dot,
                TokenKind::Ident("y".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        assert_eq!(
            kinds("== != <= >= && || ! = < >"),
            vec![
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Le,
                TokenKind::Ge,
                TokenKind::AndAnd,
                TokenKind::OrOr,
                TokenKind::Not,
                TokenKind::Assign,
                TokenKind::Lt,
                TokenKind::Gt,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_string_escapes() {
        assert_eq!(
            kinds(r#""a\nb\"c""#),
            vec![TokenKind::String("a\nb\"c".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_tokenize_comments() {
        assert_eq!(
            kinds("a // trailing\n/* block\ncomment */ b"),
            vec![
                TokenKind::Ident("a".into()),
                TokenKind::Ident("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_keywords() {
        assert_eq!(
            kinds("true false null truth"),
            vec![
                TokenKind::Bool(true),
                TokenKind::Bool(false),
                TokenKind::Null,
                TokenKind::Ident("truth".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string_reports_open_position() {
        let err = tokenize("x = \"abc").unwrap_err();
        assert_eq!(err.code, codes::ERR_PARSE);
        assert!(err.message.contains("unterminated string"));
        assert_eq!(err.span.unwrap().column, 5);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize("/* never closed").unwrap_err();
        assert!(err.message.contains("unterminated block comment"));
    }

    #[test]
    fn test_spans_track_lines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!(tokens[0].span, Span::new(1, 1));
        assert_eq!(tokens[1].span, Span::new(2, 3));
    }

    #[test]
    fn test_lone_ampersand_is_an_error() {
        assert!(tokenize("a & b").is_err());
    }
}
