use crate::callable::Callable;
use crate::class::Class;
use crate::interpreter::RuntimeError;
use crate::token::Token;
use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

#[derive(Clone)]
pub struct Instance {
    data: Rc<RefCell<InstanceImpl>>,
}

struct InstanceImpl {
    class: Class,
    fields: BTreeMap<String, Value>,
}

impl Instance {
    pub fn new(class: Class) -> Instance {
        Instance {
            data: Rc::new(RefCell::new(InstanceImpl {
                class,
                fields: BTreeMap::new(),
            })),
        }
    }
    /// Own fields shadow methods. Methods come back freshly bound on every
    /// access.
    pub fn get(&self, name: &Token) -> Result<Value, RuntimeError> {
        let data = self.data.borrow();
        if let Some(value) = data.fields.get(&name.lexeme) {
            return Ok(value.clone());
        }
        data.class
            .find_method(&name.lexeme)
            .map(|method| Value::Callable(Callable::Function(method.bind(self))))
            .ok_or_else(|| RuntimeError::UndefinedProperty {
                name: name.lexeme.clone(),
                line: name.line,
            })
    }
    pub fn set(&self, name: &Token, value: Value) {
        self.data
            .borrow_mut()
            .fields
            .insert(name.lexeme.clone(), value);
    }
    pub fn class(&self) -> Class {
        self.data.borrow().class.clone()
    }
    pub fn equals(&self, other: &Instance) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} instance", self.data.borrow().class)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Instance")
            .field("class", &data.class.name())
            .field("fields", &data.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}
