use crate::ast::{ExprId, Expression, FunctionDecl, Literal, Statement};
use crate::token::{Token, TokenType};
use std::mem;
use std::rc::Rc;
use thiserror::Error;

const MAX_ARGUMENTS: usize = 255;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("[line {line}] Parse Error at '{lexeme}': {message}")]
pub struct ParseError {
    message: String,
    lexeme: String,
    line: i32,
}

impl ParseError {
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn line(&self) -> i32 {
        self.line
    }
}

pub fn parse(tokens: &[Token]) -> Result<Vec<Statement>, ParseError> {
    Parser::new(tokens).parse()
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    current: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Parser<'a> {
        Parser { tokens, current: 0 }
    }
    pub fn parse(&mut self) -> Result<Vec<Statement>, ParseError> {
        match self.tokens.last() {
            Some(Token {
                tokentype: TokenType::EOF,
                ..
            }) => (),
            last => {
                return Err(ParseError {
                    message: "Expect token stream to end with EOF.".to_string(),
                    lexeme: last.map_or_else(String::new, |t| t.lexeme.clone()),
                    line: last.map_or(0, |t| t.line),
                })
            }
        }
        let mut statements: Vec<Statement> = Vec::new();
        while !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        Ok(statements)
    }
    fn declaration(&mut self) -> Result<Statement, ParseError> {
        match self.peek().tokentype {
            TokenType::Var => {
                self.advance();
                self.var_declaration()
            }
            TokenType::Fun => {
                self.advance();
                Ok(Statement::Function(self.function("function")?))
            }
            TokenType::Class => {
                self.advance();
                self.class_declaration()
            }
            _ => self.statement(),
        }
    }
    fn class_declaration(&mut self) -> Result<Statement, ParseError> {
        let name = self.identifier("Expect class name.")?;
        let superclass = if self.next_if(&TokenType::Less) {
            let superclass_name = self.identifier("Expect superclass name.")?;
            Some(Expression::Variable {
                id: ExprId::fresh(),
                name: superclass_name,
            })
        } else {
            None
        };
        self.consume(&TokenType::LeftBrace, "Expect '{' before class body.")?;
        let mut methods = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            methods.push(self.function("method")?);
        }
        self.consume(&TokenType::RightBrace, "Expect '}' after class body.")?;
        Ok(Statement::Class {
            name,
            superclass,
            methods,
        })
    }
    fn function(&mut self, kind: &str) -> Result<Rc<FunctionDecl>, ParseError> {
        let name = self.identifier(&format!("Expect {} name.", kind))?;
        self.consume(
            &TokenType::LeftParen,
            &format!("Expect '(' after {} name.", kind),
        )?;
        let mut params = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if params.len() >= MAX_ARGUMENTS {
                    return Err(self.error("Can't have more than 255 parameters."));
                }
                params.push(self.identifier("Expect parameter name.")?);
                if !self.next_if(&TokenType::Comma) {
                    break;
                }
            }
        }
        self.consume(&TokenType::RightParen, "Expect ')' after parameters.")?;
        self.consume(
            &TokenType::LeftBrace,
            &format!("Expect '{{' before {} body.", kind),
        )?;
        let body = self.block()?;
        Ok(Rc::new(FunctionDecl { name, params, body }))
    }
    fn var_declaration(&mut self) -> Result<Statement, ParseError> {
        let name = self.identifier("Expect variable name.")?;
        let initializer = if self.next_if(&TokenType::Equal) {
            Some(self.expression()?)
        } else {
            None
        };
        self.consume(
            &TokenType::Semicolon,
            "Expect ';' after variable declaration.",
        )?;
        Ok(Statement::Var { name, initializer })
    }
    fn statement(&mut self) -> Result<Statement, ParseError> {
        match self.peek().tokentype {
            TokenType::If => {
                self.advance();
                self.if_statement()
            }
            TokenType::Print => {
                self.advance();
                self.print_statement()
            }
            TokenType::Return => {
                self.advance();
                self.return_statement()
            }
            TokenType::Require => {
                self.advance();
                self.require_statement()
            }
            TokenType::LeftBrace => {
                self.advance();
                Ok(Statement::Block(self.block()?))
            }
            TokenType::While => {
                self.advance();
                self.while_statement()
            }
            TokenType::For => {
                self.advance();
                self.for_statement()
            }
            _ => self.expression_statement(),
        }
    }
    fn for_statement(&mut self) -> Result<Statement, ParseError> {
        self.consume(&TokenType::LeftParen, "Expect '(' after 'for'.")?;
        let initializer = match self.peek().tokentype {
            TokenType::Semicolon => {
                self.advance();
                None
            }
            TokenType::Var => {
                self.advance();
                Some(self.var_declaration()?)
            }
            _ => Some(self.expression_statement()?),
        };

        let condition = match self.peek().tokentype {
            TokenType::Semicolon => Expression::Literal(Literal::Boolean(true)),
            _ => self.expression()?,
        };
        self.consume(&TokenType::Semicolon, "Expect ';' after loop condition.")?;

        let increment = match self.peek().tokentype {
            TokenType::RightParen => None,
            _ => Some(self.expression()?),
        };
        self.consume(&TokenType::RightParen, "Expect ')' after for clauses.")?;

        let mut body = self.statement()?;

        if let Some(x) = increment {
            body = Statement::Block(vec![body, Statement::Expression(x)])
        }
        body = Statement::While {
            condition,
            body: Box::new(body),
        };
        match initializer {
            None => Ok(body),
            Some(x) => Ok(Statement::Block(vec![x, body])),
        }
    }
    fn while_statement(&mut self) -> Result<Statement, ParseError> {
        self.consume(&TokenType::LeftParen, "Expect '(' after 'while'.")?;
        let condition = self.expression()?;
        self.consume(&TokenType::RightParen, "Expect ')' after condition.")?;
        let body = self.statement()?;
        Ok(Statement::While {
            condition,
            body: Box::new(body),
        })
    }
    fn if_statement(&mut self) -> Result<Statement, ParseError> {
        self.consume(&TokenType::LeftParen, "Expect '(' after 'if'.")?;
        let condition = self.expression()?;
        self.consume(&TokenType::RightParen, "Expect ')' after if condition.")?;
        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.next_if(&TokenType::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Ok(Statement::If {
            condition,
            then_branch,
            else_branch,
        })
    }
    fn block(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements: Vec<Statement> = Vec::new();
        while !self.check(&TokenType::RightBrace) && !self.is_at_end() {
            statements.push(self.declaration()?);
        }
        self.consume(&TokenType::RightBrace, "Expect '}' after block.")?;
        Ok(statements)
    }
    fn print_statement(&mut self) -> Result<Statement, ParseError> {
        let expr = self.expression()?;
        self.consume(&TokenType::Semicolon, "Expect ';' after value.")?;
        Ok(Statement::Print(expr))
    }
    fn return_statement(&mut self) -> Result<Statement, ParseError> {
        let keyword = self.previous().clone();
        let value = if self.check(&TokenType::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.consume(&TokenType::Semicolon, "Expect ';' after return value.")?;
        Ok(Statement::Return { keyword, value })
    }
    fn require_statement(&mut self) -> Result<Statement, ParseError> {
        let keyword = self.previous().clone();
        let path = match &self.peek().tokentype {
            TokenType::String(path) => path.clone(),
            _ => return Err(self.error("Expect path string after 'require'.")),
        };
        self.advance();
        self.consume(&TokenType::Semicolon, "Expect ';' after require path.")?;
        Ok(Statement::Require { keyword, path })
    }
    fn expression_statement(&mut self) -> Result<Statement, ParseError> {
        let expr = self.expression()?;
        self.consume(&TokenType::Semicolon, "Expect ';' after expression.")?;
        Ok(Statement::Expression(expr))
    }
    fn expression(&mut self) -> Result<Expression, ParseError> {
        self.assignment()
    }
    fn assignment(&mut self) -> Result<Expression, ParseError> {
        let expr = self.or()?;
        match self.peek().tokentype {
            TokenType::Equal => {
                self.advance();
                let equals = self.previous().clone();
                let value = Box::new(self.assignment()?);
                match expr {
                    Expression::Variable { name, .. } => Ok(Expression::Assign {
                        id: ExprId::fresh(),
                        name,
                        value,
                    }),
                    Expression::Get { object, name } => Ok(Expression::Set {
                        object,
                        name,
                        value,
                    }),
                    _ => Err(ParseError {
                        message: "Invalid assignment target.".to_string(),
                        lexeme: equals.lexeme,
                        line: equals.line,
                    }),
                }
            }
            _ => Ok(expr),
        }
    }
    fn or(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.and()?;
        while self.next_if(&TokenType::Or) {
            let operator = self.previous().clone();
            let right = self.and()?;
            expr = Expression::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn and(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.equality()?;
        while self.next_if(&TokenType::And) {
            let operator = self.previous().clone();
            let right = self.equality()?;
            expr = Expression::Logical {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn binary(
        &mut self,
        operators: &[TokenType],
        operand: fn(&mut Self) -> Result<Expression, ParseError>,
    ) -> Result<Expression, ParseError> {
        let mut expr = operand(self)?;
        while operators.iter().any(|op| self.check(op)) {
            self.advance();
            let operator = self.previous().clone();
            let right = operand(self)?;
            expr = Expression::Binary {
                left: Box::new(expr),
                operator,
                right: Box::new(right),
            };
        }
        Ok(expr)
    }
    fn equality(&mut self) -> Result<Expression, ParseError> {
        self.binary(
            &[TokenType::BangEqual, TokenType::EqualEqual],
            Self::comparison,
        )
    }
    fn comparison(&mut self) -> Result<Expression, ParseError> {
        self.binary(
            &[
                TokenType::Greater,
                TokenType::GreaterEqual,
                TokenType::Less,
                TokenType::LessEqual,
            ],
            Self::addition,
        )
    }
    fn addition(&mut self) -> Result<Expression, ParseError> {
        self.binary(&[TokenType::Minus, TokenType::Plus], Self::multiplication)
    }
    fn multiplication(&mut self) -> Result<Expression, ParseError> {
        self.binary(&[TokenType::Slash, TokenType::Star], Self::unary)
    }
    fn unary(&mut self) -> Result<Expression, ParseError> {
        match self.peek().tokentype {
            TokenType::Bang | TokenType::Minus => {
                self.advance();
                let operator = self.previous().clone();
                let right = self.unary()?;
                Ok(Expression::Unary {
                    operator,
                    right: Box::new(right),
                })
            }
            _ => self.call(),
        }
    }
    fn call(&mut self) -> Result<Expression, ParseError> {
        let mut expr = self.primary()?;
        loop {
            if self.next_if(&TokenType::LeftParen) {
                expr = self.finish_call(expr)?;
            } else if self.next_if(&TokenType::Dot) {
                let name = self.identifier("Expect property name after '.'.")?;
                expr = Expression::Get {
                    object: Box::new(expr),
                    name,
                };
            } else {
                break;
            }
        }
        Ok(expr)
    }
    fn finish_call(&mut self, callee: Expression) -> Result<Expression, ParseError> {
        let mut arguments = Vec::new();
        if !self.check(&TokenType::RightParen) {
            loop {
                if arguments.len() >= MAX_ARGUMENTS {
                    return Err(self.error("Can't have more than 255 arguments."));
                }
                arguments.push(self.expression()?);
                if !self.next_if(&TokenType::Comma) {
                    break;
                }
            }
        }
        let paren = self
            .consume(&TokenType::RightParen, "Expect ')' after arguments.")?
            .clone();
        Ok(Expression::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        })
    }
    fn primary(&mut self) -> Result<Expression, ParseError> {
        let literal = match &self.peek().tokentype {
            TokenType::False => Some(Literal::Boolean(false)),
            TokenType::True => Some(Literal::Boolean(true)),
            TokenType::Nil => Some(Literal::Nil),
            TokenType::Number(x) => Some(Literal::Number(*x)),
            TokenType::String(x) => Some(Literal::String(x.clone())),
            _ => None,
        };
        if let Some(literal) = literal {
            self.advance();
            return Ok(Expression::Literal(literal));
        }
        match self.peek().tokentype {
            TokenType::Identifier(_) => {
                self.advance();
                Ok(Expression::Variable {
                    id: ExprId::fresh(),
                    name: self.previous().clone(),
                })
            }
            TokenType::This => {
                self.advance();
                Ok(Expression::This {
                    id: ExprId::fresh(),
                    keyword: self.previous().clone(),
                })
            }
            TokenType::Super => {
                self.advance();
                let keyword = self.previous().clone();
                self.consume(&TokenType::Dot, "Expect '.' after 'super'.")?;
                let method = self.identifier("Expect superclass method name.")?;
                Ok(Expression::Super {
                    id: ExprId::fresh(),
                    keyword,
                    method,
                })
            }
            TokenType::LeftParen => {
                self.advance();
                let expr = self.expression()?;
                self.consume(&TokenType::RightParen, "Expect ')' after expression.")?;
                Ok(Expression::Grouping(Box::new(expr)))
            }
            _ => Err(self.error("Expect expression.")),
        }
    }
    fn identifier(&mut self, msg: &str) -> Result<Token, ParseError> {
        match self.peek().tokentype {
            TokenType::Identifier(_) => Ok(self.advance().clone()),
            _ => Err(self.error(msg)),
        }
    }
    fn consume(&mut self, expected: &TokenType, msg: &str) -> Result<&'a Token, ParseError> {
        if self.check(expected) {
            Ok(self.advance())
        } else {
            Err(self.error(msg))
        }
    }
    fn next_if(&mut self, expected: &TokenType) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }
    /// Compares token kinds only; the payload of literal tokens is ignored.
    fn check(&self, expected: &TokenType) -> bool {
        mem::discriminant(&self.peek().tokentype) == mem::discriminant(expected)
    }
    fn advance(&mut self) -> &'a Token {
        if !self.is_at_end() {
            self.current += 1;
        }
        self.previous()
    }
    fn is_at_end(&self) -> bool {
        matches!(self.peek().tokentype, TokenType::EOF)
    }
    fn peek(&self) -> &'a Token {
        // parse() rejects sequences that do not end with EOF.
        &self.tokens[self.current.min(self.tokens.len() - 1)]
    }
    fn previous(&self) -> &'a Token {
        &self.tokens[self.current.saturating_sub(1)]
    }
    fn error(&self, msg: &str) -> ParseError {
        let cur = self.peek();
        ParseError {
            message: msg.to_string(),
            lexeme: cur.lexeme.clone(),
            line: cur.line,
        }
    }
}

#[cfg(test)]
mod parser_tests {
    use crate::ast::{AstPrinter, Expression, Statement};
    use crate::parser;
    use crate::scanner;
    use pretty_assertions::assert_eq;

    fn parse(source: &str) -> Vec<Statement> {
        let tokens = scanner::scan_tokens(source).unwrap();
        parser::parse(&tokens).unwrap()
    }

    fn expression(source: &str) -> String {
        match &parse(source)[0] {
            Statement::Expression(e) => AstPrinter::print(e),
            _ => panic!("expected expression statement"),
        }
    }

    fn error(source: &str) -> String {
        let tokens = scanner::scan_tokens(source).unwrap();
        parser::parse(&tokens).unwrap_err().message().to_string()
    }

    #[test]
    fn precedence() {
        assert_eq!(expression("1 + 2 * 3 == 7;"), "(== (+ 1 (* 2 3)) 7)");
        assert_eq!(expression("!a or b and c;"), "(or (! a) (and b c))");
        assert_eq!(expression("-(1 - 2);"), "(- (group (- 1 2)))");
    }

    #[test]
    fn calls_and_properties() {
        assert_eq!(expression("a.b(1, 2).c = 3;"), "(set (call (get a b) 1 2) c 3)");
        assert_eq!(expression("x = y = 1;"), "(assign x (assign y 1))");
    }

    #[test]
    fn for_loop_desugars_to_while() {
        let statements = parse("for (var i = 0; i < 3; i = i + 1) print i;");
        assert_eq!(statements.len(), 1);
        match &statements[0] {
            Statement::Block(inner) => {
                assert!(matches!(inner[0], Statement::Var { .. }));
                assert!(matches!(inner[1], Statement::While { .. }));
            }
            _ => panic!("expected block"),
        }
    }

    #[test]
    fn class_with_superclass() {
        let statements = parse("class B < A { init(x) { this.x = x; } go() {} }");
        match &statements[0] {
            Statement::Class {
                name,
                superclass,
                methods,
            } => {
                assert_eq!(name.lexeme, "B");
                assert!(superclass.is_some());
                assert_eq!(methods.len(), 2);
                assert_eq!(methods[0].params.len(), 1);
            }
            _ => panic!("expected class"),
        }
    }

    #[test]
    fn require_statement() {
        match &parse("require \"lib\";")[0] {
            Statement::Require { path, .. } => assert_eq!(path, "lib"),
            _ => panic!("expected require"),
        }
        assert_eq!(error("require lib;"), "Expect path string after 'require'.");
    }

    #[test]
    fn errors() {
        assert_eq!(error("1 + 2 = 3;"), "Invalid assignment target.");
        assert_eq!(error("print 1"), "Expect ';' after value.");
        assert_eq!(error("{ var a = 1;"), "Expect '}' after block.");
        assert_eq!(error("fun (a) {}"), "Expect function name.");
    }

    fn names(count: usize) -> String {
        (0..count)
            .map(|i| format!("a{}", i))
            .collect::<Vec<_>>()
            .join(", ")
    }

    #[test]
    fn argument_limit() {
        let ok = format!("f({});", names(255));
        match &parse(&ok)[0] {
            Statement::Expression(Expression::Call { arguments, .. }) => {
                assert_eq!(arguments.len(), 255)
            }
            _ => panic!("expected call"),
        }
        assert_eq!(
            error(&format!("f({});", names(256))),
            "Can't have more than 255 arguments."
        );
    }

    #[test]
    fn parameter_limit() {
        let ok = format!("fun f({}) {{}}", names(255));
        match &parse(&ok)[0] {
            Statement::Function(decl) => assert_eq!(decl.params.len(), 255),
            _ => panic!("expected function"),
        }
        assert_eq!(
            error(&format!("fun f({}) {{}}", names(256))),
            "Can't have more than 255 parameters."
        );
    }

    #[test]
    fn token_stream_without_eof() {
        let err = parser::parse(&[]).unwrap_err();
        assert_eq!(err.message(), "Expect token stream to end with EOF.");
        assert_eq!(err.line(), 0);

        let mut tokens = scanner::scan_tokens("print 1;").unwrap();
        tokens.pop();
        let err = parser::parse(&tokens).unwrap_err();
        assert_eq!(err.message(), "Expect token stream to end with EOF.");
        assert_eq!(err.line(), 1);
    }
}
