use crate::ast::FunctionDecl;
use crate::environment::Environment;
use crate::instance::Instance;
use crate::interpreter::{Flow, Interpreter, RuntimeError};
use crate::value::Value;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// Largest bound `randN` accepts; above it integer draws stop being
/// exactly representable as numbers.
const MAX_RANDOM_BOUND: f64 = 9_007_199_254_740_992.0;

/// Anything a script can call with `(...)`, apart from classes.
#[derive(Clone)]
pub enum Callable {
    Function(LoxFunction),
    Native(NativeFunction),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Function(function) => function.arity(),
            Callable::Native(native) => native.arity(),
        }
    }
    /// Callers check `arity()` against `arguments` first.
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match self {
            Callable::Function(function) => function.call(interpreter, arguments),
            Callable::Native(native) => native.call(&arguments),
        }
    }
    pub fn equals(&self, other: &Callable) -> bool {
        match (self, other) {
            (Callable::Function(l), Callable::Function(r)) => l.equals(r),
            (Callable::Native(l), Callable::Native(r)) => l.equals(r),
            _ => false,
        }
    }
}

impl fmt::Display for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Function(function) => write!(f, "{}", function),
            Callable::Native(native) => write!(f, "{}", native),
        }
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Clone)]
pub struct LoxFunction {
    data: Rc<LoxFunctionImpl>,
}

struct LoxFunctionImpl {
    declaration: Rc<FunctionDecl>,
    closure: Environment,
    is_initializer: bool,
}

impl fmt::Display for LoxFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}

impl LoxFunction {
    pub fn new(
        declaration: Rc<FunctionDecl>,
        closure: Environment,
        is_initializer: bool,
    ) -> LoxFunction {
        LoxFunction {
            data: Rc::new(LoxFunctionImpl {
                declaration,
                closure,
                is_initializer,
            }),
        }
    }
    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        trace!(function = self.name(), arguments = arguments.len(), "call");
        let environment = self.data.closure.new_child();
        for (param, value) in self.data.declaration.params.iter().zip(arguments) {
            environment.define(&param.lexeme, value);
        }
        let flow = interpreter.execute_block(&self.data.declaration.body, environment)?;
        if self.data.is_initializer {
            return self.this();
        }
        match flow {
            Flow::Return(value) => Ok(value),
            Flow::Normal => Ok(Value::Nil),
        }
    }
    /// Layers a one-entry scope holding `this` over the closure. The
    /// original function is left untouched.
    pub fn bind(&self, instance: &Instance) -> LoxFunction {
        let environment = self.data.closure.new_child();
        environment.define("this", Value::Instance(instance.clone()));
        LoxFunction::new(
            Rc::clone(&self.data.declaration),
            environment,
            self.data.is_initializer,
        )
    }
    fn this(&self) -> Result<Value, RuntimeError> {
        self.data
            .closure
            .get_at(0, "this")
            .ok_or_else(|| RuntimeError::UnresolvedLocal {
                name: "this".to_string(),
                distance: 0,
                line: self.data.declaration.name.line,
            })
    }
    pub fn arity(&self) -> usize {
        self.data.declaration.params.len()
    }
    pub fn name(&self) -> &str {
        &self.data.declaration.name.lexeme
    }
    pub fn is_initializer(&self) -> bool {
        self.data.is_initializer
    }
    pub fn closure(&self) -> &Environment {
        &self.data.closure
    }
    pub fn equals(&self, other: &LoxFunction) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

type NativeFn = dyn Fn(&[Value]) -> Result<Value, String>;

/// A host capability. The closure reports failures as plain text, which
/// surfaces to scripts as `RuntimeError::Native`.
#[derive(Clone)]
pub struct NativeFunction {
    data: Rc<NativeFunctionImpl>,
}

struct NativeFunctionImpl {
    name: String,
    arity: usize,
    function: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new<F>(name: &str, arity: usize, function: F) -> NativeFunction
    where
        F: Fn(&[Value]) -> Result<Value, String> + 'static,
    {
        NativeFunction {
            data: Rc::new(NativeFunctionImpl {
                name: name.to_string(),
                arity,
                function: Box::new(function),
            }),
        }
    }
    pub fn call(&self, arguments: &[Value]) -> Result<Value, RuntimeError> {
        (self.data.function)(arguments).map_err(|reason| RuntimeError::Native {
            name: self.data.name.clone(),
            reason,
        })
    }
    pub fn arity(&self) -> usize {
        self.data.arity
    }
    pub fn name(&self) -> &str {
        &self.data.name
    }
    pub fn equals(&self, other: &NativeFunction) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Display for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn>")
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}/{}>", self.data.name, self.data.arity)
    }
}

/// The natives every interpreter starts with unless the host opts out.
pub fn default_natives() -> BTreeMap<String, NativeFunction> {
    let mut natives = BTreeMap::new();
    for native in vec![
        NativeFunction::new("clock", 0, clock),
        NativeFunction::new("sleep", 1, sleep),
        NativeFunction::new("randN", 1, rand_n),
    ] {
        natives.insert(native.name().to_string(), native);
    }
    natives
}

fn kind(value: Option<&Value>) -> &'static str {
    value.map_or("nothing", Value::type_name)
}

fn clock(_: &[Value]) -> Result<Value, String> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| Value::Number(elapsed.as_secs_f64()))
        .map_err(|_| "system clock is set before 1970-01-01".to_string())
}

fn sleep(arguments: &[Value]) -> Result<Value, String> {
    match arguments.first() {
        Some(Value::Number(ms)) => {
            let duration = Duration::try_from_secs_f64(ms.max(0.0) / 1000.0)
                .map_err(|_| format!("sleep() requires a finite duration, got {}", ms))?;
            thread::sleep(duration);
            Ok(Value::Nil)
        }
        other => Err(format!(
            "sleep() requires milliseconds as a number, not {}",
            kind(other)
        )),
    }
}

fn rand_n(arguments: &[Value]) -> Result<Value, String> {
    match arguments.first() {
        Some(Value::Number(n)) if !(*n > 0.0) => {
            Err(format!("randN()'s parameter must be positive, got {}", n))
        }
        Some(Value::Number(n)) if *n > MAX_RANDOM_BOUND => {
            Err(format!("randN()'s parameter is too large, got {}", n))
        }
        Some(Value::Number(n)) => {
            let upper = n.ceil() as u64;
            Ok(Value::Number(rand::thread_rng().gen_range(0..upper) as f64))
        }
        other => Err(format!(
            "randN() requires a number parameter, not {}",
            kind(other)
        )),
    }
}
