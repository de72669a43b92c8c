use crate::token::{Token, TokenType};
use phf::phf_map;
use std::iter::Peekable;
use std::str::CharIndices;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("[line {line}] Error: {message}")]
pub struct ScanError {
    line: i32,
    message: String,
}

impl ScanError {
    pub fn line(&self) -> i32 {
        self.line
    }
    pub fn message(&self) -> &str {
        &self.message
    }
}

// Note: current becomes self.iter.peek()?.0
struct Scanner<'a> {
    source: &'a str,
    iter: Peekable<CharIndices<'a>>,
    start: usize,
    line: i32,
}

pub fn scan_tokens(source: &str) -> Result<Vec<Token>, ScanError> {
    let mut scanner = Scanner {
        source,
        iter: source.char_indices().peekable(),
        start: 0,
        line: 1,
    };
    let mut tokens: Vec<Token> = Vec::new();

    while let Some((idx, _)) = scanner.iter.peek() {
        scanner.start = *idx;
        if let Some(token) = scanner.scan_token()? {
            tokens.push(token);
        }
    }
    tokens.push(Token {
        tokentype: TokenType::EOF,
        lexeme: String::from(""),
        line: scanner.line,
    });
    Ok(tokens)
}

impl<'a> Scanner<'a> {
    fn scan_token(&mut self) -> Result<Option<Token>, ScanError> {
        match self.advance()?.1 {
            '(' => Ok(Some(self.token(TokenType::LeftParen))),
            ')' => Ok(Some(self.token(TokenType::RightParen))),
            '{' => Ok(Some(self.token(TokenType::LeftBrace))),
            '}' => Ok(Some(self.token(TokenType::RightBrace))),
            ',' => Ok(Some(self.token(TokenType::Comma))),
            '.' => Ok(Some(self.token(TokenType::Dot))),
            '-' => Ok(Some(self.token(TokenType::Minus))),
            '+' => Ok(Some(self.token(TokenType::Plus))),
            ';' => Ok(Some(self.token(TokenType::Semicolon))),
            '*' => Ok(Some(self.token(TokenType::Star))),
            '!' => Ok(Some(self.either('=', TokenType::BangEqual, TokenType::Bang))),
            '=' => Ok(Some(self.either('=', TokenType::EqualEqual, TokenType::Equal))),
            '<' => Ok(Some(self.either('=', TokenType::LessEqual, TokenType::Less))),
            '>' => Ok(Some(self.either(
                '=',
                TokenType::GreaterEqual,
                TokenType::Greater,
            ))),
            '/' => {
                if self.next_if('/') {
                    while let Some((_, c)) = self.iter.peek() {
                        if *c == '\n' {
                            break;
                        }
                        self.iter.next();
                    }
                    Ok(None)
                } else {
                    Ok(Some(self.token(TokenType::Slash)))
                }
            }
            ' ' | '\r' | '\t' => Ok(None),
            '\n' => {
                self.line += 1;
                Ok(None)
            }
            quote @ '"' | quote @ '\'' => Ok(Some(self.string(quote)?)),
            '0'..='9' => Ok(Some(self.number()?)),
            'a'..='z' | 'A'..='Z' | '_' => Ok(Some(self.identifier())),
            c => Err(self.error(format!("Unexpected character '{}'.", c))),
        }
    }
    fn error(&self, message: String) -> ScanError {
        ScanError {
            line: self.line,
            message,
        }
    }
    fn current(&mut self) -> usize {
        match self.iter.peek() {
            None => self.source.len(),
            Some((idx, _)) => *idx,
        }
    }
    fn token(&mut self, token_type: TokenType) -> Token {
        let current = self.current();
        Token {
            tokentype: token_type,
            lexeme: self.source[self.start..current].to_string(),
            line: self.line,
        }
    }
    fn either(&mut self, expected: char, matched: TokenType, otherwise: TokenType) -> Token {
        if self.next_if(expected) {
            self.token(matched)
        } else {
            self.token(otherwise)
        }
    }
    fn next_if(&mut self, expected: char) -> bool {
        match self.iter.peek() {
            Some((_, c)) if *c == expected => {
                self.iter.next();
                true
            }
            _ => false,
        }
    }
    fn advance(&mut self) -> Result<(usize, char), ScanError> {
        let line = self.line;
        self.iter.next().ok_or_else(|| ScanError {
            line,
            message: "Failed to advance".to_string(),
        })
    }
    fn string(&mut self, quote: char) -> Result<Token, ScanError> {
        let mut value = String::new();
        loop {
            let c = match self.iter.next() {
                None => return Err(self.error("Unterminated string.".to_string())),
                Some((_, c)) => c,
            };
            match c {
                c if c == quote => break,
                '\n' => {
                    self.line += 1;
                    value.push('\n');
                }
                '\\' => {
                    let escaped = match self.iter.next() {
                        None => return Err(self.error("Unterminated string.".to_string())),
                        Some((_, e)) => e,
                    };
                    value.push(match escaped {
                        'a' => '\x07',
                        'b' => '\x08',
                        'f' => '\x0c',
                        'n' => '\n',
                        'r' => '\r',
                        't' => '\t',
                        'v' => '\x0b',
                        '\\' => '\\',
                        '"' => '"',
                        '\'' => '\'',
                        other => {
                            return Err(
                                self.error(format!("Invalid escape sequence '\\{}'.", other))
                            )
                        }
                    });
                }
                _ => value.push(c),
            }
        }
        Ok(self.token(TokenType::String(value)))
    }
    fn digits(&mut self) {
        while let Some((_, c)) = self.iter.peek() {
            if !c.is_ascii_digit() {
                break;
            }
            self.iter.next();
        }
    }
    fn number(&mut self) -> Result<Token, ScanError> {
        self.digits();

        if let Some((_, '.')) = self.iter.peek() {
            let mut lookahead = self.iter.clone();
            lookahead.next();
            if let Some((_, c)) = lookahead.peek() {
                if c.is_ascii_digit() {
                    self.iter.next();
                    self.digits();
                }
            }
        }

        let current = self.current();
        let text = &self.source[self.start..current];
        let value = text
            .parse()
            .map_err(|_| self.error(format!("Invalid number '{}'.", text)))?;
        Ok(self.token(TokenType::Number(value)))
    }
    fn identifier(&mut self) -> Token {
        while let Some((_, c)) = self.iter.peek() {
            match c {
                '0'..='9' | 'a'..='z' | 'A'..='Z' | '_' => {
                    self.iter.next();
                }
                _ => {
                    break;
                }
            }
        }
        let current = self.current();
        match KEYWORDS.get(&self.source[self.start..current]) {
            None => self.token(TokenType::Identifier(
                self.source[self.start..current].to_string(),
            )),
            Some(x) => self.token(x.clone()),
        }
    }
}

static KEYWORDS: phf::Map<&'static str, TokenType> = phf_map! {
    "and" => TokenType::And,
    "class" => TokenType::Class,
    "else" => TokenType::Else,
    "false" => TokenType::False,
    "for" => TokenType::For,
    "fun" => TokenType::Fun,
    "if" => TokenType::If,
    "nil" => TokenType::Nil,
    "or" => TokenType::Or,
    "print" => TokenType::Print,
    "require" => TokenType::Require,
    "return" => TokenType::Return,
    "super" => TokenType::Super,
    "this" => TokenType::This,
    "true" => TokenType::True,
    "var" => TokenType::Var,
    "while" => TokenType::While,
};
