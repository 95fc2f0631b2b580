use crate::Span;
use crate::lexer::{LexerError, Token, TokenKind};
use crate::types::Node;
use std::iter::Peekable;
use std::vec::IntoIter; // To iterate over Vec<Token>
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error(
        "Parse Error [at {}]: Unexpected token '{}', expected {}",
        .found.span, .found.kind, .expected
    )]
    UnexpectedToken { found: Token, expected: String }, // Found token, Expected description
    #[error("Parse Error: Unexpected end of input during parsing. Expected {0}")]
    UnexpectedEof(String),
    #[error("Lexer Error during parse: {0}")]
    LexerError(#[from] LexerError),
    #[error("Parse Error [at {0}]: Map literal must contain an even number of forms")]
    OddMapLiteral(Span),
}

impl ParseError {
    /// Location to point diagnostics at. End-of-input errors have none.
    pub fn span(&self) -> Option<Span> {
        match self {
            ParseError::UnexpectedToken { found, .. } => Some(found.span),
            ParseError::UnexpectedEof(_) => None,
            ParseError::LexerError(lex_err) => Some(lex_err.span),
            ParseError::OddMapLiteral(span) => Some(*span),
        }
    }
}

// Result type alias for convenience
type ParseResult<T> = Result<T, ParseError>;

pub struct Parser {
    // We iterate over owned Tokens, consuming them.
    tokens: Peekable<IntoIter<Token>>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser {
            tokens: tokens.into_iter().peekable(),
        }
    }

    // Consumes the next token if available.
    fn next_token(&mut self) -> Option<Token> {
        self.tokens.next()
    }

    fn is_at_end(&mut self) -> bool {
        self.tokens.peek().is_none()
    }

    /// Parses a single expression starting with `token`.
    pub fn parse_expr_with_token(&mut self, token: Option<Token>) -> ParseResult<Node> {
        match token {
            Some(Token {
                kind: TokenKind::LParen,
                span,
            }) => {
                let (items, end) = self.parse_sequence(&TokenKind::RParen, "')'")?;
                Ok(Node::new_list(items, span.merge(&end)))
            }
            Some(Token {
                kind: TokenKind::LBracket,
                span,
            }) => {
                let (items, end) = self.parse_sequence(&TokenKind::RBracket, "']'")?;
                Ok(Node::new_vector(items, span.merge(&end)))
            }
            Some(Token {
                kind: TokenKind::LBrace,
                span,
            }) => {
                let (items, end) = self.parse_sequence(&TokenKind::RBrace, "'}'")?;
                let span = span.merge(&end);
                if items.len() % 2 != 0 {
                    return Err(ParseError::OddMapLiteral(span));
                }
                let mut entries = Vec::with_capacity(items.len() / 2);
                let mut items = items.into_iter();
                while let (Some(key), Some(value)) = (items.next(), items.next()) {
                    entries.push((key, value));
                }
                Ok(Node::new_map(entries, span))
            }
            Some(Token {
                kind: TokenKind::Quote,
                span,
            }) => {
                // 'expr is sugar for (quote expr)
                let quoted_expr = self.parse_expr()?;
                Ok(Node::new_quote(quoted_expr, span))
            }
            Some(atom) => self.parse_atom(atom), // Handle atoms if not an opening delimiter
            None => Err(ParseError::UnexpectedEof("an expression".to_string())),
        }
    }

    pub fn parse_expr(&mut self) -> ParseResult<Node> {
        let token = self.next_token();
        self.parse_expr_with_token(token)
    }

    /// Parses an atomic expression (symbol, keyword, number, boolean, string, nil).
    fn parse_atom(&mut self, token: Token) -> ParseResult<Node> {
        let span = token.span;
        match token.kind {
            TokenKind::Symbol(s) => Ok(Node::new_symbol(&s, span)),
            TokenKind::Keyword(k) => Ok(Node::new_keyword(&k, span)),
            TokenKind::Number(n) => Ok(Node::new_number(n, span)),
            TokenKind::Boolean(b) => Ok(Node::new_bool(b, span)),
            TokenKind::String(s) => Ok(Node::new_string(&s, span)),
            TokenKind::Nil => Ok(Node::new_nil(span)),
            other_token => Err(ParseError::UnexpectedToken {
                found: Token {
                    kind: other_token,
                    span,
                },
                expected: "an expression".to_string(),
            }),
        }
    }

    /// Parses elements up to and including the `close` delimiter.
    /// Returns the elements and the span of the closing token.
    fn parse_sequence(
        &mut self,
        close: &TokenKind,
        expected: &str,
    ) -> ParseResult<(Vec<Node>, Span)> {
        let mut items = Vec::new();
        loop {
            match self.next_token() {
                Some(Token { kind, span }) if kind == *close => return Ok((items, span)),
                Some(Token {
                    kind: kind @ (TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace),
                    span,
                }) => {
                    return Err(ParseError::UnexpectedToken {
                        found: Token { kind, span },
                        expected: expected.to_string(),
                    });
                }
                Some(token) => items.push(self.parse_expr_with_token(Some(token))?),
                None => return Err(ParseError::UnexpectedEof(expected.to_string())),
            }
        }
    }

    /// Parses exactly one top-level expression; trailing tokens are an error.
    pub fn parse(mut self) -> ParseResult<Node> {
        let expr = self.parse_expr()?;

        if let Some(found) = self.next_token() {
            Err(ParseError::UnexpectedToken {
                found,
                expected: "end of input".to_string(),
            })
        } else {
            Ok(expr)
        }
    }

    /// Parses every top-level expression until the tokens run out.
    pub fn parse_all(mut self) -> ParseResult<Vec<Node>> {
        let mut expressions = Vec::new();
        while !self.is_at_end() {
            expressions.push(self.parse_expr()?);
        }
        Ok(expressions)
    }
}

// Helper function to lex and parse a string directly (useful for tests and REPL)
pub fn parse_str(input: &str) -> ParseResult<Node> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).parse()
}

/// Lexes and parses all forms of a source text, e.g. a script or module file.
pub fn parse_program(input: &str) -> ParseResult<Vec<Node>> {
    let tokens = crate::lexer::tokenize(input)?;
    Parser::new(tokens).parse_all()
}
