use monkey_lexer::{Span, Token, TokenKind};

use crate::ast::*;
use crate::error::{ParseError, ParseResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    Lowest = 0,
    Equals = 1,
    LessGreater = 2,
    Sum = 3,
    Product = 4,
    Prefix = 5,
    Call = 6,
    Index = 7,
}

fn precedence_of(kind: &TokenKind) -> Prec {
    match kind {
        TokenKind::Eq | TokenKind::NotEq => Prec::Equals,
        TokenKind::Lt | TokenKind::Gt => Prec::LessGreater,
        TokenKind::Plus | TokenKind::Minus => Prec::Sum,
        TokenKind::Asterisk | TokenKind::Slash => Prec::Product,
        TokenKind::Lparen => Prec::Call,
        TokenKind::Lbracket => Prec::Index,
        _ => Prec::Lowest,
    }
}

pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    pub errors: Vec<ParseError>,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        Parser { tokens, pos: 0, errors: Vec::new() }
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn cur_kind(&self) -> &TokenKind {
        &self.cur().kind
    }

    fn cur_span(&self) -> Span {
        self.cur().span
    }

    fn advance(&mut self) -> Token {
        let tok = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: &TokenKind, label: &str) -> ParseResult<Token> {
        if std::mem::discriminant(self.cur_kind()) == std::mem::discriminant(kind) {
            Ok(self.advance())
        } else if *self.cur_kind() == TokenKind::Eof {
            Err(ParseError::UnexpectedEof { expected: label.to_string(), span: self.cur_span() })
        } else {
            Err(ParseError::UnexpectedToken {
                expected: label.to_string(),
                found: self.cur_kind().clone(),
                span: self.cur_span(),
            })
        }
    }

    fn skip_semicolon(&mut self) {
        if *self.cur_kind() == TokenKind::Semicolon {
            self.advance();
        }
    }

    /// Parses the whole token stream into a `Program`, recovering from a
    /// failed statement by skipping to the next semicolon so later
    /// statements still get a chance to parse.
    pub fn parse(&mut self) -> Program {
        let mut statements = Vec::new();
        while *self.cur_kind() != TokenKind::Eof {
            match self.parse_statement() {
                Ok(stmt) => statements.push(stmt),
                Err(e) => {
                    self.errors.push(e);
                    while *self.cur_kind() != TokenKind::Semicolon && *self.cur_kind() != TokenKind::Eof {
                        self.advance();
                    }
                    self.skip_semicolon();
                }
            }
        }
        Program { statements }
    }

    fn parse_statement(&mut self) -> ParseResult<Statement> {
        match self.cur_kind() {
            TokenKind::Let => self.parse_let_statement(),
            TokenKind::Return => self.parse_return_statement(),
            _ => self.parse_expression_statement(),
        }
    }

    fn parse_let_statement(&mut self) -> ParseResult<Statement> {
        let span = self.cur_span();
        self.advance();
        let name = match self.cur_kind().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                n
            }
            _ => {
                return Err(ParseError::UnexpectedToken {
                    expected: "identifier".to_string(),
                    found: self.cur_kind().clone(),
                    span: self.cur_span(),
                })
            }
        };
        self.expect(&TokenKind::Assign, "=")?;
        let mut value = self.parse_expression(Prec::Lowest)?;
        if let Expression::FunctionLiteral { name: fn_name, .. } = &mut value {
            *fn_name = Some(name.clone());
        }
        self.skip_semicolon();
        Ok(Statement::Let { name, value, span })
    }

    fn parse_return_statement(&mut self) -> ParseResult<Statement> {
        let span = self.cur_span();
        self.advance();
        let value = self.parse_expression(Prec::Lowest)?;
        self.skip_semicolon();
        Ok(Statement::Return { value, span })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<Statement> {
        let span = self.cur_span();
        let value = self.parse_expression(Prec::Lowest)?;
        self.skip_semicolon();
        Ok(Statement::Expression { value, span })
    }

    fn parse_block(&mut self) -> ParseResult<Block> {
        self.expect(&TokenKind::Lbrace, "{")?;
        let mut statements = Vec::new();
        while *self.cur_kind() != TokenKind::Rbrace && *self.cur_kind() != TokenKind::Eof {
            statements.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::Rbrace, "}")?;
        Ok(Block { statements })
    }

    fn parse_expression(&mut self, precedence: Prec) -> ParseResult<Expression> {
        let mut left = self.parse_prefix()?;
        while *self.cur_kind() != TokenKind::Semicolon && precedence < precedence_of(self.cur_kind()) {
            left = match self.cur_kind() {
                TokenKind::Lparen => self.parse_call(left)?,
                TokenKind::Lbracket => self.parse_index(left)?,
                _ => self.parse_infix(left)?,
            };
        }
        Ok(left)
    }

    fn parse_prefix(&mut self) -> ParseResult<Expression> {
        match self.cur_kind().clone() {
            TokenKind::Ident(name) => {
                self.advance();
                Ok(Expression::Identifier(name))
            }
            TokenKind::Int(value) => {
                self.advance();
                Ok(Expression::IntegerLiteral(value))
            }
            TokenKind::Str(value) => {
                self.advance();
                Ok(Expression::StringLiteral(value))
            }
            TokenKind::True => {
                self.advance();
                Ok(Expression::BooleanLiteral(true))
            }
            TokenKind::False => {
                self.advance();
                Ok(Expression::BooleanLiteral(false))
            }
            TokenKind::Bang | TokenKind::Minus => self.parse_prefix_expression(),
            TokenKind::Lparen => self.parse_grouped(),
            TokenKind::If => self.parse_if_expression(),
            TokenKind::Function => self.parse_function_literal(),
            TokenKind::Lbracket => self.parse_array_literal(),
            TokenKind::Lbrace => self.parse_hash_literal(),
            found => Err(ParseError::NoPrefixParseFn { found, span: self.cur_span() }),
        }
    }

    fn parse_prefix_expression(&mut self) -> ParseResult<Expression> {
        let operator = match self.cur_kind() {
            TokenKind::Bang => "!",
            TokenKind::Minus => "-",
            _ => unreachable!(),
        }
        .to_string();
        self.advance();
        let right = self.parse_expression(Prec::Prefix)?;
        Ok(Expression::Prefix { operator, right: Box::new(right) })
    }

    fn parse_infix(&mut self, left: Expression) -> ParseResult<Expression> {
        let operator = match self.cur_kind() {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Asterisk => "*",
            TokenKind::Slash => "/",
            TokenKind::Eq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            _ => unreachable!(),
        }
        .to_string();
        let precedence = precedence_of(self.cur_kind());
        self.advance();
        let right = self.parse_expression(precedence)?;
        Ok(Expression::Infix { operator, left: Box::new(left), right: Box::new(right) })
    }

    fn parse_grouped(&mut self) -> ParseResult<Expression> {
        self.advance();
        let exp = self.parse_expression(Prec::Lowest)?;
        self.expect(&TokenKind::Rparen, ")")?;
        Ok(exp)
    }

    fn parse_if_expression(&mut self) -> ParseResult<Expression> {
        self.advance();
        self.expect(&TokenKind::Lparen, "(")?;
        let condition = self.parse_expression(Prec::Lowest)?;
        self.expect(&TokenKind::Rparen, ")")?;
        let consequence = self.parse_block()?;
        let alternative = if *self.cur_kind() == TokenKind::Else {
            self.advance();
            Some(self.parse_block()?)
        } else {
            None
        };
        Ok(Expression::If { condition: Box::new(condition), consequence, alternative })
    }

    fn parse_function_literal(&mut self) -> ParseResult<Expression> {
        self.advance();
        let name = match self.cur_kind().clone() {
            TokenKind::Ident(n) => {
                self.advance();
                Some(n)
            }
            _ => None,
        };
        self.expect(&TokenKind::Lparen, "(")?;
        let parameters = self.parse_function_parameters()?;
        let body = self.parse_block()?;
        Ok(Expression::FunctionLiteral { parameters, body, name })
    }

    fn parse_function_parameters(&mut self) -> ParseResult<Vec<String>> {
        let mut params = Vec::new();
        if *self.cur_kind() == TokenKind::Rparen {
            self.advance();
            return Ok(params);
        }
        loop {
            match self.cur_kind().clone() {
                TokenKind::Ident(name) => {
                    self.advance();
                    params.push(name);
                }
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        expected: "parameter name".to_string(),
                        found: self.cur_kind().clone(),
                        span: self.cur_span(),
                    })
                }
            }
            if *self.cur_kind() == TokenKind::Comma {
                self.advance();
                continue;
            }
            break;
        }
        self.expect(&TokenKind::Rparen, ")")?;
        Ok(params)
    }

    fn parse_call(&mut self, function: Expression) -> ParseResult<Expression> {
        self.advance();
        let arguments = self.parse_expression_list(&TokenKind::Rparen)?;
        Ok(Expression::Call { function: Box::new(function), arguments })
    }

    fn parse_index(&mut self, left: Expression) -> ParseResult<Expression> {
        self.advance();
        let index = self.parse_expression(Prec::Lowest)?;
        self.expect(&TokenKind::Rbracket, "]")?;
        Ok(Expression::Index { left: Box::new(left), index: Box::new(index) })
    }

    fn parse_array_literal(&mut self) -> ParseResult<Expression> {
        self.advance();
        let elements = self.parse_expression_list(&TokenKind::Rbracket)?;
        Ok(Expression::ArrayLiteral(elements))
    }

    fn parse_hash_literal(&mut self) -> ParseResult<Expression> {
        self.advance();
        let mut pairs = Vec::new();
        while *self.cur_kind() != TokenKind::Rbrace {
            let key = self.parse_expression(Prec::Lowest)?;
            self.expect(&TokenKind::Colon, ":")?;
            let value = self.parse_expression(Prec::Lowest)?;
            pairs.push((key, value));
            if *self.cur_kind() == TokenKind::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.expect(&TokenKind::Rbrace, "}")?;
        Ok(Expression::HashLiteral(pairs))
    }

    fn parse_expression_list(&mut self, end: &TokenKind) -> ParseResult<Vec<Expression>> {
        let mut list = Vec::new();
        if std::mem::discriminant(self.cur_kind()) == std::mem::discriminant(end) {
            self.advance();
            return Ok(list);
        }
        list.push(self.parse_expression(Prec::Lowest)?);
        while *self.cur_kind() == TokenKind::Comma {
            self.advance();
            list.push(self.parse_expression(Prec::Lowest)?);
        }
        self.expect(end, "closing delimiter")?;
        Ok(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monkey_lexer::tokenize;

    fn parse_ok(src: &str) -> Program {
        let (tokens, lex_errors) = tokenize(src);
        assert!(lex_errors.is_empty(), "lex errors: {:?}", lex_errors);
        let mut parser = Parser::new(tokens);
        let program = parser.parse();
        assert!(parser.errors.is_empty(), "parse errors: {:?}", parser.errors);
        program
    }

    fn first_expr(src: &str) -> Expression {
        match parse_ok(src).statements.into_iter().next().unwrap() {
            Statement::Expression { value, .. } => value,
            Statement::Let { value, .. } => value,
            Statement::Return { value, .. } => value,
        }
    }

    #[test]
    fn test_let_statement() {
        match parse_ok("let x = 5;").statements.into_iter().next().unwrap() {
            Statement::Let { name, value, .. } => {
                assert_eq!(name, "x");
                assert_eq!(value, Expression::IntegerLiteral(5));
            }
            other => panic!("expected Let, got {:?}", other),
        }
    }

    #[test]
    fn test_return_statement() {
        match parse_ok("return 10;").statements.into_iter().next().unwrap() {
            Statement::Return { value, .. } => assert_eq!(value, Expression::IntegerLiteral(10)),
            other => panic!("expected Return, got {:?}", other),
        }
    }

    #[test]
    fn test_identifier_expression() {
        assert_eq!(first_expr("foobar;"), Expression::Identifier("foobar".to_string()));
    }

    #[test]
    fn test_prefix_expressions() {
        assert_eq!(
            first_expr("!5;"),
            Expression::Prefix { operator: "!".into(), right: Box::new(Expression::IntegerLiteral(5)) }
        );
        assert_eq!(
            first_expr("-15;"),
            Expression::Prefix { operator: "-".into(), right: Box::new(Expression::IntegerLiteral(15)) }
        );
    }

    #[test]
    fn test_infix_precedence_mul_over_add() {
        match first_expr("1 + 2 * 3;") {
            Expression::Infix { operator, right, .. } => {
                assert_eq!(operator, "+");
                assert!(matches!(*right, Expression::Infix { operator, .. } if operator == "*"));
            }
            other => panic!("expected Infix, got {:?}", other),
        }
    }

    #[test]
    fn test_less_than_is_not_rewritten_by_the_parser() {
        // The `<` -> swapped-operand `>` rewrite happens in the compiler, not here.
        match first_expr("1 < 2;") {
            Expression::Infix { operator, .. } => assert_eq!(operator, "<"),
            other => panic!("expected Infix, got {:?}", other),
        }
    }

    #[test]
    fn test_if_expression() {
        match first_expr("if (x < y) { x } else { y }") {
            Expression::If { alternative, .. } => assert!(alternative.is_some()),
            other => panic!("expected If, got {:?}", other),
        }
    }

    #[test]
    fn test_function_literal() {
        match first_expr("fn(x, y) { x + y; }") {
            Expression::FunctionLiteral { parameters, .. } => {
                assert_eq!(parameters, vec!["x".to_string(), "y".to_string()])
            }
            other => panic!("expected FunctionLiteral, got {:?}", other),
        }
    }

    #[test]
    fn test_named_function_literal() {
        match parse_ok("fn add(a, b) { a + b; };").statements.into_iter().next().unwrap() {
            Statement::Expression { value: Expression::FunctionLiteral { name, .. }, .. } => {
                assert_eq!(name, Some("add".to_string()))
            }
            other => panic!("expected FunctionLiteral statement, got {:?}", other),
        }
    }

    #[test]
    fn test_call_expression() {
        match first_expr("add(1, 2 * 3, 4 + 5);") {
            Expression::Call { arguments, .. } => assert_eq!(arguments.len(), 3),
            other => panic!("expected Call, got {:?}", other),
        }
    }

    #[test]
    fn test_array_literal() {
        match first_expr("[1, 2 * 2, 3 + 3]") {
            Expression::ArrayLiteral(elements) => assert_eq!(elements.len(), 3),
            other => panic!("expected ArrayLiteral, got {:?}", other),
        }
    }

    #[test]
    fn test_index_expression() {
        assert!(matches!(first_expr("myArray[1 + 1]"), Expression::Index { .. }));
    }

    #[test]
    fn test_hash_literal_preserves_source_order() {
        match first_expr(r#"{"one": 1, "two": 2, "three": 3}"#) {
            Expression::HashLiteral(pairs) => {
                assert_eq!(pairs.len(), 3);
                assert_eq!(pairs[0].0, Expression::StringLiteral("one".into()));
                assert_eq!(pairs[2].0, Expression::StringLiteral("three".into()));
            }
            other => panic!("expected HashLiteral, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_hash_literal() {
        assert_eq!(first_expr("{}"), Expression::HashLiteral(vec![]));
    }

    #[test]
    fn test_string_literal_expression() {
        assert_eq!(first_expr(r#""hello world";"#), Expression::StringLiteral("hello world".into()));
    }

    #[test]
    fn test_error_recovery_continues_parsing() {
        let (tokens, _) = tokenize("let = 5; let y = 10;");
        let mut parser = Parser::new(tokens);
        let program = parser.parse();
        assert!(!parser.errors.is_empty());
        assert_eq!(program.statements.len(), 1);
    }
}
