use crate::token::Token;
use std::fmt;
use std::fmt::Formatter;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Identity of an expression node that the resolver may assign a scope
/// distance to. Ids are unique for the life of the process, so tables
/// from separate parses (prompt lines, required files) never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(usize);

impl ExprId {
    pub fn fresh() -> ExprId {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        ExprId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Nil => write!(f, "nil"),
            Literal::Boolean(x) => write!(f, "{}", x),
            Literal::Number(x) => write!(f, "{}", x),
            Literal::String(x) => write!(f, "{}", x),
        }
    }
}

#[derive(Debug)]
pub enum Expression {
    Binary {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Grouping(Box<Expression>),
    Literal(Literal),
    Logical {
        left: Box<Expression>,
        operator: Token,
        right: Box<Expression>,
    },
    Unary {
        operator: Token,
        right: Box<Expression>,
    },
    Variable {
        id: ExprId,
        name: Token,
    },
    Assign {
        id: ExprId,
        name: Token,
        value: Box<Expression>,
    },
    Call {
        callee: Box<Expression>,
        paren: Token,
        arguments: Vec<Expression>,
    },
    Get {
        object: Box<Expression>,
        name: Token,
    },
    Set {
        object: Box<Expression>,
        name: Token,
        value: Box<Expression>,
    },
    This {
        id: ExprId,
        keyword: Token,
    },
    Super {
        id: ExprId,
        keyword: Token,
        method: Token,
    },
}

pub trait Visitor<T, Output> {
    fn visit(&mut self, n: &T) -> Output;
}

impl Expression {
    pub fn accept<T>(&self, v: &mut dyn Visitor<Expression, T>) -> T {
        v.visit(self)
    }
}

/// A function or method declaration. Shared by every function value
/// created from it, so it is never copied after parsing.
#[derive(Debug)]
pub struct FunctionDecl {
    pub name: Token,
    pub params: Vec<Token>,
    pub body: Vec<Statement>,
}

#[derive(Debug)]
pub enum Statement {
    Print(Expression),
    Expression(Expression),
    Var {
        name: Token,
        initializer: Option<Expression>,
    },
    Block(Vec<Statement>),
    If {
        condition: Expression,
        then_branch: Box<Statement>,
        else_branch: Option<Box<Statement>>,
    },
    While {
        condition: Expression,
        body: Box<Statement>,
    },
    Function(Rc<FunctionDecl>),
    Return {
        keyword: Token,
        value: Option<Expression>,
    },
    Class {
        name: Token,
        superclass: Option<Expression>,
        methods: Vec<Rc<FunctionDecl>>,
    },
    Require {
        keyword: Token,
        path: String,
    },
}

impl Statement {
    pub fn accept<T>(&self, v: &mut dyn Visitor<Statement, T>) -> T {
        v.visit(self)
    }
}

pub struct AstPrinter {}

impl AstPrinter {
    pub fn print(expr: &Expression) -> String {
        expr.accept(&mut AstPrinter {})
    }
    fn parenthesize(&mut self, name: &str, args: Vec<&Expression>) -> String {
        let mut x = String::from("(");
        x.push_str(name);
        for arg in args {
            x.push(' ');
            x.push_str(arg.accept(self).as_str());
        }
        x.push(')');
        x
    }
}

impl Visitor<Expression, String> for AstPrinter {
    fn visit(&mut self, n: &Expression) -> String {
        match n {
            Expression::Binary {
                left,
                operator,
                right,
            }
            | Expression::Logical {
                left,
                operator,
                right,
            } => self.parenthesize(&operator.lexeme, vec![left.as_ref(), right.as_ref()]),
            Expression::Grouping(x) => self.parenthesize("group", vec![x.as_ref()]),
            Expression::Literal(Literal::String(x)) => format!("{:?}", x),
            Expression::Literal(x) => x.to_string(),
            Expression::Unary { operator, right } => {
                self.parenthesize(&operator.lexeme, vec![right.as_ref()])
            }
            Expression::Variable { name, .. } => name.lexeme.clone(),
            Expression::Assign { name, value, .. } => {
                format!("(assign {} {})", name.lexeme, value.accept(self))
            }
            Expression::Call {
                callee, arguments, ..
            } => {
                let mut args = vec![callee.as_ref()];
                args.extend(arguments.iter());
                self.parenthesize("call", args)
            }
            Expression::Get { object, name } => {
                format!("(get {} {})", object.accept(self), name.lexeme)
            }
            Expression::Set {
                object,
                name,
                value,
            } => format!(
                "(set {} {} {})",
                object.accept(self),
                name.lexeme,
                value.accept(self)
            ),
            Expression::This { .. } => "this".to_string(),
            Expression::Super { method, .. } => format!("(super {})", method.lexeme),
        }
    }
}
