pub mod error;
pub mod lexer;
pub mod token;

pub use error::LexError;
pub use lexer::Lexer;
pub use token::{lookup_keyword, Span, Token, TokenKind};

pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    Lexer::tokenize(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_source() {
        let (tokens, errors) = tokenize("");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_full_program_tokenizes_cleanly() {
        let src = "let five = 5;\nlet ten = 10;\n\nlet add = fn(x, y) {\n  x + y;\n};\n\nlet result = add(five, ten);";
        let (_, errors) = tokenize(src);
        assert!(errors.is_empty(), "{:?}", errors);
    }
}
