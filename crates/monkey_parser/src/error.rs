use monkey_lexer::{Span, TokenKind};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    UnexpectedToken { expected: String, found: TokenKind, span: Span },
    UnexpectedEof { expected: String, span: Span },
    NoPrefixParseFn { found: TokenKind, span: Span },
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, span } => write!(
                f,
                "[ParseError] expected {} but found {:?} at line {}, column {}",
                expected, found, span.line, span.column
            ),
            ParseError::UnexpectedEof { expected, span } => write!(
                f,
                "[ParseError] expected {} but reached end of file at line {}",
                expected, span.line
            ),
            ParseError::NoPrefixParseFn { found, span } => write!(
                f,
                "[ParseError] no prefix parse function for {:?} at line {}, column {}",
                found, span.line, span.column
            ),
        }
    }
}

impl std::error::Error for ParseError {}

pub type ParseResult<T> = Result<T, ParseError>;
