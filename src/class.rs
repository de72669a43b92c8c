use crate::callable::LoxFunction;
use crate::instance::Instance;
use crate::interpreter::{Interpreter, RuntimeError};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

const INITIALIZER: &str = "init";

#[derive(Clone)]
pub struct Class {
    data: Rc<ClassImpl>,
}

struct ClassImpl {
    name: String,
    superclass: Option<Class>,
    methods: BTreeMap<String, LoxFunction>,
}

impl Class {
    pub fn new(
        name: &str,
        superclass: Option<Class>,
        methods: BTreeMap<String, LoxFunction>,
    ) -> Class {
        Class {
            data: Rc::new(ClassImpl {
                name: name.to_string(),
                superclass,
                methods,
            }),
        }
    }
    /// Searches this class, then each superclass in turn. The returned
    /// method is unbound.
    pub fn find_method(&self, name: &str) -> Option<LoxFunction> {
        match self.data.methods.get(name) {
            Some(method) => Some(method.clone()),
            None => self
                .data
                .superclass
                .as_ref()
                .and_then(|superclass| superclass.find_method(name)),
        }
    }
    pub fn arity(&self) -> usize {
        self.find_method(INITIALIZER).map_or(0, |init| init.arity())
    }
    pub fn instantiate(
        &self,
        interpreter: &mut Interpreter,
        arguments: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        let instance = Instance::new(self.clone());
        if let Some(initializer) = self.find_method(INITIALIZER) {
            initializer.bind(&instance).call(interpreter, arguments)?;
        }
        Ok(Value::Instance(instance))
    }
    pub fn name(&self) -> &str {
        &self.data.name
    }
    pub fn superclass(&self) -> Option<&Class> {
        self.data.superclass.as_ref()
    }
    pub fn equals(&self, other: &Class) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data.name)
    }
}

impl fmt::Debug for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class")
            .field("name", &self.data.name)
            .field("methods", &self.data.methods.keys().collect::<Vec<_>>())
            .field("superclass", &self.data.superclass)
            .finish()
    }
}
