use crate::error::LexError;
use crate::token::{lookup_keyword, Span, Token, TokenKind};

pub struct Lexer {
    input: Vec<u8>,
    position: usize,
    read_position: usize,
    ch: u8,
    line: usize,
    column: usize,
    errors: Vec<LexError>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        let mut lexer = Lexer {
            input: source.as_bytes().to_vec(),
            position: 0,
            read_position: 0,
            ch: 0,
            line: 1,
            column: 0,
            errors: Vec::new(),
        };
        lexer.read_char();
        lexer
    }

    pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token();
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        (tokens, lexer.errors)
    }

    fn read_char(&mut self) {
        if self.ch == b'\n' {
            self.line += 1;
            self.column = 0;
        }
        self.ch = if self.read_position >= self.input.len() { 0 } else { self.input[self.read_position] };
        self.position = self.read_position;
        self.read_position += 1;
        self.column += 1;
    }

    fn peek_char(&self) -> u8 {
        if self.read_position >= self.input.len() { 0 } else { self.input[self.read_position] }
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.ch.is_ascii_whitespace() {
                self.read_char();
            }
            if self.ch == b'/' && self.peek_char() == b'/' {
                while self.ch != b'\n' && self.ch != 0 {
                    self.read_char();
                }
                continue;
            }
            break;
        }
    }

    pub fn next_token(&mut self) -> Token {
        self.skip_whitespace_and_comments();

        let start = self.position;
        let (line, column) = (self.line, self.column);
        let make = |kind: TokenKind, lexeme: &str, end: usize| Token {
            kind,
            span: Span::new(line, column, start, end),
            lexeme: lexeme.to_string(),
        };

        let tok = match self.ch {
            b'=' if self.peek_char() == b'=' => {
                self.read_char();
                make(TokenKind::Eq, "==", self.position + 1)
            }
            b'=' => make(TokenKind::Assign, "=", self.position + 1),
            b'+' => make(TokenKind::Plus, "+", self.position + 1),
            b'-' => make(TokenKind::Minus, "-", self.position + 1),
            b'!' if self.peek_char() == b'=' => {
                self.read_char();
                make(TokenKind::NotEq, "!=", self.position + 1)
            }
            b'!' => make(TokenKind::Bang, "!", self.position + 1),
            b'/' => make(TokenKind::Slash, "/", self.position + 1),
            b'*' => make(TokenKind::Asterisk, "*", self.position + 1),
            b'<' => make(TokenKind::Lt, "<", self.position + 1),
            b'>' => make(TokenKind::Gt, ">", self.position + 1),
            b';' => make(TokenKind::Semicolon, ";", self.position + 1),
            b':' => make(TokenKind::Colon, ":", self.position + 1),
            b',' => make(TokenKind::Comma, ",", self.position + 1),
            b'(' => make(TokenKind::Lparen, "(", self.position + 1),
            b')' => make(TokenKind::Rparen, ")", self.position + 1),
            b'{' => make(TokenKind::Lbrace, "{", self.position + 1),
            b'}' => make(TokenKind::Rbrace, "}", self.position + 1),
            b'[' => make(TokenKind::Lbracket, "[", self.position + 1),
            b']' => make(TokenKind::Rbracket, "]", self.position + 1),
            b'"' => return self.read_string(line, column, start),
            0 => make(TokenKind::Eof, "", self.position),
            c if c.is_ascii_digit() => return self.read_number(line, column, start),
            c if c.is_ascii_alphabetic() || c == b'_' => return self.read_ident(line, column, start),
            c => {
                let ch = c as char;
                self.errors.push(LexError::UnexpectedCharacter {
                    ch,
                    span: Span::new(line, column, start, self.position + 1),
                });
                make(TokenKind::Illegal, &ch.to_string(), self.position + 1)
            }
        };
        self.read_char();
        tok
    }

    fn read_ident(&mut self, line: usize, column: usize, start: usize) -> Token {
        while self.ch.is_ascii_alphanumeric() || self.ch == b'_' {
            self.read_char();
        }
        let lexeme = String::from_utf8_lossy(&self.input[start..self.position]).into_owned();
        let kind = lookup_keyword(&lexeme).unwrap_or_else(|| TokenKind::Ident(lexeme.clone()));
        Token { kind, span: Span::new(line, column, start, self.position), lexeme }
    }

    fn read_number(&mut self, line: usize, column: usize, start: usize) -> Token {
        while self.ch.is_ascii_digit() {
            self.read_char();
        }
        let lexeme = String::from_utf8_lossy(&self.input[start..self.position]).into_owned();
        let value = lexeme.parse::<i64>().unwrap_or(0);
        Token { kind: TokenKind::Int(value), span: Span::new(line, column, start, self.position), lexeme }
    }

    fn read_string(&mut self, line: usize, column: usize, start: usize) -> Token {
        self.read_char(); // consume opening quote
        let content_start = self.position;
        while self.ch != b'"' && self.ch != 0 {
            self.read_char();
        }
        let content = String::from_utf8_lossy(&self.input[content_start..self.position]).into_owned();
        if self.ch == 0 {
            self.errors.push(LexError::UnterminatedString {
                span: Span::new(line, column, start, self.position),
            });
            return Token {
                kind: TokenKind::Illegal,
                span: Span::new(line, column, start, self.position),
                lexeme: content,
            };
        }
        self.read_char(); // consume closing quote
        Token {
            kind: TokenKind::Str(content.clone()),
            span: Span::new(line, column, start, self.position),
            lexeme: content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src).0.into_iter().map(|t| t.kind).collect()
    }

    #[test] fn test_empty_source() { assert_eq!(kinds(""), vec![TokenKind::Eof]); }
    #[test] fn test_integer_literal() { assert_eq!(kinds("5"), vec![TokenKind::Int(5), TokenKind::Eof]); }
    #[test] fn test_string_literal() { assert_eq!(kinds(r#""foo bar""#), vec![TokenKind::Str("foo bar".into()), TokenKind::Eof]); }
    #[test] fn test_unterminated_string_reports_error() {
        let (_, errs) = Lexer::tokenize(r#""unterminated"#);
        assert!(matches!(errs[0], LexError::UnterminatedString { .. }));
    }
    #[test] fn test_keywords() {
        assert_eq!(
            kinds("fn let true false if else return"),
            vec![
                TokenKind::Function, TokenKind::Let, TokenKind::True, TokenKind::False,
                TokenKind::If, TokenKind::Else, TokenKind::Return, TokenKind::Eof,
            ]
        );
    }
    #[test] fn test_identifiers() { assert_eq!(kinds("foobar foo_bar2"), vec![TokenKind::Ident("foobar".into()), TokenKind::Ident("foo_bar2".into()), TokenKind::Eof]); }
    #[test] fn test_two_char_operators() {
        assert_eq!(kinds("== !="), vec![TokenKind::Eq, TokenKind::NotEq, TokenKind::Eof]);
    }
    #[test] fn test_delimiters() {
        assert_eq!(
            kinds("(){}[],;:"),
            vec![
                TokenKind::Lparen, TokenKind::Rparen, TokenKind::Lbrace, TokenKind::Rbrace,
                TokenKind::Lbracket, TokenKind::Rbracket, TokenKind::Comma, TokenKind::Semicolon,
                TokenKind::Colon, TokenKind::Eof,
            ]
        );
    }
    #[test] fn test_comment_skipped() {
        assert_eq!(kinds("5 // a comment\n6"), vec![TokenKind::Int(5), TokenKind::Int(6), TokenKind::Eof]);
    }
    #[test] fn test_illegal_character_reports_error() {
        let (_, errs) = Lexer::tokenize("@");
        assert!(matches!(errs[0], LexError::UnexpectedCharacter { ch: '@', .. }));
    }
    #[test] fn test_full_program() {
        let src = "let five = 5;\nlet add = fn(x, y) { x + y; };\nadd(five, 10);";
        let (tokens, errs) = Lexer::tokenize(src);
        assert!(errs.is_empty());
        assert_eq!(tokens.last().unwrap().kind, TokenKind::Eof);
        assert!(tokens.iter().any(|t| t.kind == TokenKind::Function));
    }
    #[test] fn test_span_tracks_line_and_column() {
        let (tokens, _) = Lexer::tokenize("let\nx");
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 2);
    }
}
