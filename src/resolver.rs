use crate::ast::{AstPrinter, ExprId, Expression, FunctionDecl, Statement, Visitor};
use crate::token::Token;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::trace;

/// Scope distance for every local variable reference, keyed by node.
/// References missing from the table are globals.
pub type ResolutionTable = HashMap<ExprId, usize>;

#[derive(Debug, Error, Clone, PartialEq)]
#[error("[line {line}] Error at '{lexeme}': {message}")]
pub struct ResolverError {
    message: String,
    lexeme: String,
    line: i32,
}

impl ResolverError {
    fn new(message: &str, token: &Token) -> ResolverError {
        ResolverError {
            message: message.to_string(),
            lexeme: token.lexeme.clone(),
            line: token.line,
        }
    }
    pub fn message(&self) -> &str {
        &self.message
    }
    pub fn line(&self) -> i32 {
        self.line
    }
}

#[derive(Clone, Copy, Debug)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Clone, Copy, Debug)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    scopes: Vec<BTreeMap<String, bool>>,
    current_function: FunctionType,
    current_class: ClassType,
    locals: ResolutionTable,
}

/// Runs one static pass over `statements` as top-level code.
pub fn resolve(statements: &[Statement]) -> Result<ResolutionTable, ResolverError> {
    let mut resolver = Resolver::new();
    resolver.resolve(statements)?;
    Ok(resolver.locals)
}

impl Visitor<Expression, Result<(), ResolverError>> for Resolver {
    fn visit(&mut self, expr: &Expression) -> Result<(), ResolverError> {
        match expr {
            Expression::Binary { left, right, .. } | Expression::Logical { left, right, .. } => {
                self.resolve_expr(left)?;
                self.resolve_expr(right)
            }
            Expression::Grouping(expr) => self.resolve_expr(expr),
            Expression::Literal(_) => Ok(()),
            Expression::Unary { right, .. } => self.resolve_expr(right),
            Expression::Variable { id, name } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(&name.lexeme) == Some(&false) {
                        return Err(ResolverError::new(
                            "Cannot read local variable in its own initializer.",
                            name,
                        ));
                    }
                }
                self.resolve_local(*id, name, expr);
                Ok(())
            }
            Expression::Assign { id, name, value } => {
                self.resolve_expr(value)?;
                self.resolve_local(*id, name, expr);
                Ok(())
            }
            Expression::Call {
                callee, arguments, ..
            } => {
                self.resolve_expr(callee)?;
                for argument in arguments {
                    self.resolve_expr(argument)?
                }
                Ok(())
            }
            Expression::Get { object, .. } => self.resolve_expr(object),
            Expression::Set { object, value, .. } => {
                self.resolve_expr(value)?;
                self.resolve_expr(object)
            }
            Expression::This { id, keyword } => match self.current_class {
                ClassType::None => Err(ResolverError::new(
                    "Cannot use 'this' outside of a class.",
                    keyword,
                )),
                ClassType::Class | ClassType::Subclass => {
                    self.resolve_local(*id, keyword, expr);
                    Ok(())
                }
            },
            Expression::Super { id, keyword, .. } => match self.current_class {
                ClassType::None => Err(ResolverError::new(
                    "Cannot use 'super' outside of a class.",
                    keyword,
                )),
                ClassType::Class => Err(ResolverError::new(
                    "Cannot use 'super' in a class with no superclass.",
                    keyword,
                )),
                ClassType::Subclass => {
                    self.resolve_local(*id, keyword, expr);
                    Ok(())
                }
            },
        }
    }
}

impl Visitor<Statement, Result<(), ResolverError>> for Resolver {
    fn visit(&mut self, stmt: &Statement) -> Result<(), ResolverError> {
        match stmt {
            Statement::Print(expr) => self.resolve_expr(expr),
            Statement::Expression(expr) => self.resolve_expr(expr),
            Statement::Var { name, initializer } => {
                self.declare(name)?;
                if let Some(x) = initializer {
                    self.resolve_expr(x)?;
                }
                self.define(name);
                Ok(())
            }
            Statement::Block(stmts) => {
                self.begin_scope();
                let result = self.resolve(stmts);
                self.end_scope();
                result
            }
            Statement::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(then_branch)?;
                if let Some(some_else) = else_branch {
                    self.resolve_stmt(some_else)?
                }
                Ok(())
            }
            Statement::While { condition, body } => {
                self.resolve_expr(condition)?;
                self.resolve_stmt(body)
            }
            Statement::Function(fun) => {
                self.declare(&fun.name)?;
                self.define(&fun.name);
                self.resolve_function(fun, FunctionType::Function)
            }
            Statement::Return { keyword, value } => {
                if let FunctionType::None = self.current_function {
                    return Err(ResolverError::new(
                        "Cannot return from top-level code.",
                        keyword,
                    ));
                }
                // A value returned from an initializer is discarded at
                // runtime in favour of the instance.
                match value {
                    None => Ok(()),
                    Some(x) => self.resolve_expr(x),
                }
            }
            Statement::Class {
                name,
                superclass,
                methods,
            } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;
                self.declare(name)?;
                self.define(name);
                if let Some(superclass) = superclass {
                    self.current_class = ClassType::Subclass;
                    if let Expression::Variable {
                        name: superclass_name,
                        ..
                    } = superclass
                    {
                        if superclass_name.lexeme == name.lexeme {
                            return Err(ResolverError::new(
                                "A class cannot inherit from itself.",
                                superclass_name,
                            ));
                        }
                    }
                    self.resolve_expr(superclass)?;
                    self.begin_scope();
                    self.define_implicit("super");
                }
                self.begin_scope();
                self.define_implicit("this");
                let mut result = Ok(());
                for method in methods {
                    let function_type = if method.name.lexeme == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };
                    result = self.resolve_function(method, function_type);
                    if result.is_err() {
                        break;
                    }
                }
                self.end_scope();
                if superclass.is_some() {
                    self.end_scope();
                }
                self.current_class = enclosing_class;
                result
            }
            // Included sources are resolved on their own when they run.
            Statement::Require { .. } => Ok(()),
        }
    }
}

impl Resolver {
    pub fn new() -> Resolver {
        Resolver {
            scopes: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
            locals: ResolutionTable::new(),
        }
    }
    fn resolve_expr(&mut self, expr: &Expression) -> Result<(), ResolverError> {
        expr.accept(self)
    }
    fn resolve_stmt(&mut self, stmt: &Statement) -> Result<(), ResolverError> {
        stmt.accept(self)
    }
    pub fn resolve(&mut self, statements: &[Statement]) -> Result<(), ResolverError> {
        for stmt in statements {
            self.resolve_stmt(stmt)?;
        }
        Ok(())
    }
    pub fn into_table(self) -> ResolutionTable {
        self.locals
    }
    fn begin_scope(&mut self) {
        self.scopes.push(BTreeMap::new());
    }
    fn end_scope(&mut self) {
        self.scopes.pop();
    }
    fn declare(&mut self, name: &Token) -> Result<(), ResolverError> {
        match self.scopes.last_mut() {
            None => Ok(()),
            Some(scope) => match scope.insert(name.lexeme.clone(), false) {
                None => Ok(()),
                Some(_) => Err(ResolverError::new(
                    "Variable with this name already declared in this scope.",
                    name,
                )),
            },
        }
    }
    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }
    fn define_implicit(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }
    fn resolve_local(&mut self, id: ExprId, name: &Token, expr: &Expression) {
        for (i, cur_scope) in self.scopes.iter().enumerate().rev() {
            if cur_scope.contains_key(&name.lexeme) {
                let distance = self.scopes.len() - 1 - i;
                trace!(expr = %AstPrinter::print(expr), line = name.line, distance, "resolved local");
                self.locals.insert(id, distance);
                return;
            }
        }
    }
    fn resolve_function(
        &mut self,
        fun: &FunctionDecl,
        fn_type: FunctionType,
    ) -> Result<(), ResolverError> {
        let enclosing_fn = self.current_function;
        self.current_function = fn_type;
        self.begin_scope();
        let mut result = Ok(());
        for param in fun.params.iter() {
            result = self.declare(param);
            if result.is_err() {
                break;
            }
            self.define(param);
        }
        if result.is_ok() {
            result = self.resolve(&fun.body);
        }
        self.end_scope();
        self.current_function = enclosing_fn;
        result
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
    }
}
