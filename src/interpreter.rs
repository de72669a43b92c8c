use crate::ast::{ExprId, Expression, Statement, Visitor};
use crate::callable::{Callable, LoxFunction, NativeFunction};
use crate::class::Class;
use crate::environment::Environment;
use crate::error::LoxError;
use crate::loader::{FsLoader, SourceLoader};
use crate::lox::{compile, Cancellation};
use crate::resolver::ResolutionTable;
use crate::token::{Token, TokenType};
use crate::value::Value;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::mem;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("operation \"{operator}\" at line {line}: {message}")]
    Operand {
        operator: TokenType,
        line: i32,
        message: String,
    },
    #[error("[line {line}] Undefined variable '{name}'.")]
    UndefinedVariable { name: String, line: i32 },
    #[error("[line {line}] Undefined property '{name}'.")]
    UndefinedProperty { name: String, line: i32 },
    #[error("[line {line}] Only instances have properties, tried '{name}' on {found}.")]
    NotAnInstance {
        name: String,
        found: &'static str,
        line: i32,
    },
    #[error("[line {line}] Expected {expected} arguments but got {got}.")]
    Arity {
        expected: usize,
        got: usize,
        line: i32,
    },
    #[error("[line {line}] Can only call functions and classes, not {found}.")]
    NotCallable { found: &'static str, line: i32 },
    #[error("[line {line}] Superclass must be a class.")]
    SuperclassNotClass { line: i32 },
    #[error("native function '{name}': {reason}")]
    Native { name: String, reason: String },
    #[error("[line {line}] require \"{path}\": {source}")]
    Require {
        path: String,
        line: i32,
        source: Box<LoxError>,
    },
    #[error("[line {line}] require \"{path}\": cyclic require")]
    CyclicRequire { path: String, line: i32 },
    #[error("[line {line}] Internal error: '{name}' missing at scope distance {distance}.")]
    UnresolvedLocal {
        name: String,
        distance: usize,
        line: i32,
    },
    #[error("writing output: {0}")]
    Output(#[from] io::Error),
}

impl RuntimeError {
    fn operand(operator: &Token, message: &str) -> RuntimeError {
        RuntimeError::Operand {
            operator: operator.tokentype.clone(),
            line: operator.line,
            message: message.to_string(),
        }
    }
}

/// Outcome of executing a statement. `Return` unwinds through blocks and
/// loops until the enclosing function call turns it back into a value.
#[derive(Debug)]
pub enum Flow {
    Normal,
    Return(Value),
}

/// The per-run context: global scope, resolved distances, output sink and
/// the loader used by `require`.
pub struct Interpreter {
    globals: Environment,
    environment: Environment,
    locals: ResolutionTable,
    output: Box<dyn Write>,
    loader: Box<dyn SourceLoader>,
    requiring: Vec<String>,
}

impl Visitor<Expression, Result<Value, RuntimeError>> for Interpreter {
    fn visit(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        match expr {
            Expression::Literal(x) => Ok(Value::from(x)),
            Expression::Grouping(x) => self.evaluate(x),
            Expression::Unary { operator, right } => {
                let rv = self.evaluate(right)?;
                match (&operator.tokentype, rv) {
                    (TokenType::Minus, Value::Number(r)) => Ok(Value::Number(-r)),
                    (TokenType::Minus, _) => {
                        Err(RuntimeError::operand(operator, "Operand must be a number."))
                    }
                    (TokenType::Bang, rv) => Ok(Value::Boolean(!rv.is_truthy())),
                    _ => Err(RuntimeError::operand(operator, "Unknown unary operator.")),
                }
            }
            Expression::Binary {
                left,
                operator,
                right,
            } => {
                let lv = self.evaluate(left)?;
                let rv = self.evaluate(right)?;
                binary(operator, lv, rv)
            }
            Expression::Variable { id, name } => self.look_up_variable(*id, name),
            Expression::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                match self.locals.get(id) {
                    Some(distance) => {
                        if !self
                            .environment
                            .assign_at(*distance, &name.lexeme, value.clone())
                        {
                            return Err(RuntimeError::UnresolvedLocal {
                                name: name.lexeme.clone(),
                                distance: *distance,
                                line: name.line,
                            });
                        }
                    }
                    None => {
                        if !self.globals.assign(&name.lexeme, value.clone()) {
                            return Err(RuntimeError::UndefinedVariable {
                                name: name.lexeme.clone(),
                                line: name.line,
                            });
                        }
                    }
                }
                Ok(value)
            }
            Expression::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                match operator.tokentype {
                    TokenType::Or if left.is_truthy() => Ok(left),
                    TokenType::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expression::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;
                let mut evaluated_arguments: Vec<Value> = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    evaluated_arguments.push(self.evaluate(argument)?);
                }
                match callee {
                    Value::Callable(function) => {
                        check_arity(function.arity(), &evaluated_arguments, paren)?;
                        function.call(self, evaluated_arguments)
                    }
                    Value::Class(class) => {
                        check_arity(class.arity(), &evaluated_arguments, paren)?;
                        class.instantiate(self, evaluated_arguments)
                    }
                    other => Err(RuntimeError::NotCallable {
                        found: other.type_name(),
                        line: paren.line,
                    }),
                }
            }
            Expression::Get { object, name } => match self.evaluate(object)? {
                Value::Instance(instance) => instance.get(name),
                other => Err(RuntimeError::NotAnInstance {
                    name: name.lexeme.clone(),
                    found: other.type_name(),
                    line: name.line,
                }),
            },
            Expression::Set {
                object,
                name,
                value,
            } => match self.evaluate(object)? {
                Value::Instance(instance) => {
                    let value = self.evaluate(value)?;
                    instance.set(name, value.clone());
                    Ok(value)
                }
                other => Err(RuntimeError::NotAnInstance {
                    name: name.lexeme.clone(),
                    found: other.type_name(),
                    line: name.line,
                }),
            },
            Expression::This { id, keyword } => self.look_up_variable(*id, keyword),
            Expression::Super {
                id,
                keyword,
                method,
            } => self.look_up_super(*id, keyword, method),
        }
    }
}

impl Visitor<Statement, Result<Flow, RuntimeError>> for Interpreter {
    fn visit(&mut self, stmt: &Statement) -> Result<Flow, RuntimeError> {
        match stmt {
            Statement::Print(e) => {
                let val = self.evaluate(e)?;
                writeln!(self.output, "{}", val)?;
            }
            Statement::Expression(e) => {
                self.evaluate(e)?;
            }
            Statement::Var { name, initializer } => {
                let val = match initializer {
                    Some(x) => self.evaluate(x)?,
                    None => Value::Nil,
                };
                self.environment.define(&name.lexeme, val);
            }
            Statement::Block(stmts) => {
                let environment = self.environment.new_child();
                return self.execute_block(stmts, environment);
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute(then_branch);
                } else if let Some(else_branch) = else_branch {
                    return self.execute(else_branch);
                }
            }
            Statement::While { condition, body } => {
                while self.evaluate(condition)?.is_truthy() {
                    if let Flow::Return(value) = self.execute(body)? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            Statement::Function(declaration) => {
                let function =
                    LoxFunction::new(declaration.clone(), self.environment.clone(), false);
                self.environment.define(
                    &declaration.name.lexeme,
                    Value::Callable(Callable::Function(function)),
                );
            }
            Statement::Return { value, .. } => {
                let val = match value {
                    Some(x) => self.evaluate(x)?,
                    None => Value::Nil,
                };
                return Ok(Flow::Return(val));
            }
            Statement::Class {
                name,
                superclass,
                methods,
            } => {
                let superclass = match superclass {
                    None => None,
                    Some(expr) => match self.evaluate(expr)? {
                        Value::Class(class) => Some(class),
                        _ => return Err(RuntimeError::SuperclassNotClass { line: name.line }),
                    },
                };
                self.environment.define(&name.lexeme, Value::Nil);
                let method_environment = match &superclass {
                    Some(class) => {
                        let environment = self.environment.new_child();
                        environment.define("super", Value::Class(class.clone()));
                        environment
                    }
                    None => self.environment.clone(),
                };
                let mut table = BTreeMap::new();
                for method in methods {
                    let function = LoxFunction::new(
                        method.clone(),
                        method_environment.clone(),
                        method.name.lexeme == "init",
                    );
                    table.insert(method.name.lexeme.clone(), function);
                }
                let class = Class::new(&name.lexeme, superclass, table);
                self.environment.define(&name.lexeme, Value::Class(class));
            }
            Statement::Require { keyword, path } => self.require(keyword, path)?,
        }
        Ok(Flow::Normal)
    }
}

impl Interpreter {
    /// An interpreter with an empty global scope.
    pub fn new(output: Box<dyn Write>) -> Interpreter {
        let globals = Environment::new();
        Interpreter {
            environment: globals.clone(),
            globals,
            locals: ResolutionTable::new(),
            output,
            loader: Box::new(FsLoader::default()),
            requiring: Vec::new(),
        }
    }
    pub fn set_output(&mut self, output: Box<dyn Write>) -> Box<dyn Write> {
        mem::replace(&mut self.output, output)
    }
    pub fn flush(&mut self) -> io::Result<()> {
        self.output.flush()
    }
    pub fn set_loader(&mut self, loader: Box<dyn SourceLoader>) {
        self.loader = loader;
    }
    pub fn define_native(&mut self, native: &NativeFunction) {
        self.globals.define(
            native.name(),
            Value::Callable(Callable::Native(native.clone())),
        );
    }
    pub fn globals(&self) -> &Environment {
        &self.globals
    }
    /// Merges one resolve pass into the distances used at runtime. Entries
    /// are never removed: functions from earlier runs still execute their
    /// nodes.
    pub fn resolve(&mut self, table: ResolutionTable) {
        self.locals.extend(table);
    }
    /// Runs top-level statements, checking `cancel` before each one.
    pub fn interpret(
        &mut self,
        cancel: &Cancellation,
        statements: &[Statement],
    ) -> Result<(), LoxError> {
        for stmt in statements {
            if cancel.is_cancelled() {
                warn!("run cancelled before next top-level statement");
                return Err(LoxError::Cancelled);
            }
            if let Flow::Return(_) = self.execute(stmt)? {
                // The resolver rejects top-level returns.
                warn!("return signal reached top level");
                break;
            }
        }
        Ok(())
    }
    fn evaluate(&mut self, expr: &Expression) -> Result<Value, RuntimeError> {
        expr.accept(self)
    }
    pub fn execute(&mut self, stmt: &Statement) -> Result<Flow, RuntimeError> {
        stmt.accept(self)
    }
    /// Executes `statements` inside `environment`, restoring the previous
    /// scope whatever the outcome.
    pub fn execute_block(
        &mut self,
        statements: &[Statement],
        environment: Environment,
    ) -> Result<Flow, RuntimeError> {
        let previous = mem::replace(&mut self.environment, environment);
        let result = self.execute_all(statements);
        self.environment = previous;
        result
    }
    fn execute_all(&mut self, statements: &[Statement]) -> Result<Flow, RuntimeError> {
        for stmt in statements {
            if let Flow::Return(value) = self.execute(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }
    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value, RuntimeError> {
        match self.locals.get(&id) {
            Some(distance) => self
                .environment
                .get_at(*distance, &name.lexeme)
                .ok_or_else(|| RuntimeError::UnresolvedLocal {
                    name: name.lexeme.clone(),
                    distance: *distance,
                    line: name.line,
                }),
            None => self
                .globals
                .get(&name.lexeme)
                .ok_or_else(|| RuntimeError::UndefinedVariable {
                    name: name.lexeme.clone(),
                    line: name.line,
                }),
        }
    }
    fn look_up_super(
        &self,
        id: ExprId,
        keyword: &Token,
        method: &Token,
    ) -> Result<Value, RuntimeError> {
        let missing = |name: &str, distance: usize| RuntimeError::UnresolvedLocal {
            name: name.to_string(),
            distance,
            line: keyword.line,
        };
        let distance = *self.locals.get(&id).ok_or_else(|| missing("super", 0))?;
        let superclass = match self.environment.get_at(distance, "super") {
            Some(Value::Class(class)) => class,
            _ => return Err(missing("super", distance)),
        };
        // "this" always sits in the scope just inside "super".
        let this_distance = distance
            .checked_sub(1)
            .ok_or_else(|| missing("this", distance))?;
        let instance = match self.environment.get_at(this_distance, "this") {
            Some(Value::Instance(instance)) => instance,
            _ => return Err(missing("this", this_distance)),
        };
        superclass
            .find_method(&method.lexeme)
            .map(|found| Value::Callable(Callable::Function(found.bind(&instance))))
            .ok_or_else(|| RuntimeError::UndefinedProperty {
                name: method.lexeme.clone(),
                line: method.line,
            })
    }
    /// Textual inclusion: the loaded statements run directly in the global
    /// scope, whatever scope the `require` itself sits in.
    fn require(&mut self, keyword: &Token, path: &str) -> Result<(), RuntimeError> {
        if self.requiring.iter().any(|p| p == path) {
            return Err(RuntimeError::CyclicRequire {
                path: path.to_string(),
                line: keyword.line,
            });
        }
        let wrap = |source: LoxError| RuntimeError::Require {
            path: path.to_string(),
            line: keyword.line,
            source: Box::new(source),
        };
        let source = self.loader.load(path).map_err(|e| {
            wrap(LoxError::Io {
                path: path.to_string(),
                source: e,
            })
        })?;
        let (statements, table) = compile(&source).map_err(wrap)?;
        debug!(path, statements = statements.len(), "require");
        self.resolve(table);

        self.requiring.push(path.to_string());
        let globals = self.globals.clone();
        let result = self.execute_block(&statements, globals);
        self.requiring.pop();
        result.map(|_| ())
    }
}

fn check_arity(expected: usize, arguments: &[Value], paren: &Token) -> Result<(), RuntimeError> {
    if expected == arguments.len() {
        Ok(())
    } else {
        Err(RuntimeError::Arity {
            expected,
            got: arguments.len(),
            line: paren.line,
        })
    }
}

fn binary(operator: &Token, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match operator.tokentype {
        TokenType::EqualEqual => return Ok(Value::Boolean(left == right)),
        TokenType::BangEqual => return Ok(Value::Boolean(left != right)),
        TokenType::Plus => {
            return match (left, right) {
                (Value::Number(l), Value::Number(r)) => Ok(Value::Number(l + r)),
                (Value::String(l), Value::String(r)) => Ok(Value::String(l + &r)),
                _ => Err(RuntimeError::operand(
                    operator,
                    "Operands must be two numbers or two strings.",
                )),
            }
        }
        _ => (),
    }
    let (l, r) = match (left, right) {
        (Value::Number(l), Value::Number(r)) => (l, r),
        _ => return Err(RuntimeError::operand(operator, "Operands must be numbers.")),
    };
    match operator.tokentype {
        TokenType::Minus => Ok(Value::Number(l - r)),
        TokenType::Slash => Ok(Value::Number(l / r)),
        TokenType::Star => Ok(Value::Number(l * r)),
        TokenType::Greater => Ok(Value::Boolean(l > r)),
        TokenType::GreaterEqual => Ok(Value::Boolean(l >= r)),
        TokenType::Less => Ok(Value::Boolean(l < r)),
        TokenType::LessEqual => Ok(Value::Boolean(l <= r)),
        _ => Err(RuntimeError::operand(operator, "Unknown binary operator.")),
    }
}
