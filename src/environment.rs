use crate::value::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

/// One frame of the runtime scope chain. Cloning shares the frame: every
/// closure and child scope holding a clone keeps it alive.
#[derive(Clone)]
pub struct Environment {
    data: Rc<RefCell<EnvironmentImpl>>,
}

struct EnvironmentImpl {
    values: BTreeMap<String, Value>,
    enclosing: Option<Environment>,
}

impl Environment {
    pub fn new() -> Environment {
        Environment {
            data: Rc::new(RefCell::new(EnvironmentImpl {
                values: BTreeMap::new(),
                enclosing: None,
            })),
        }
    }
    pub fn new_child(&self) -> Environment {
        Environment {
            data: Rc::new(RefCell::new(EnvironmentImpl {
                values: BTreeMap::new(),
                enclosing: Some(self.clone()),
            })),
        }
    }
    pub fn define(&self, name: &str, value: Value) {
        self.data
            .borrow_mut()
            .values
            .insert(name.to_string(), value);
    }
    /// Looks in this frame only.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.data.borrow().values.get(name).cloned()
    }
    /// Overwrites an existing binding in this frame only. Returns false if
    /// the frame has no such name.
    pub fn assign(&self, name: &str, value: Value) -> bool {
        match self.data.borrow_mut().values.get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
    pub fn ancestor(&self, distance: usize) -> Option<Environment> {
        let mut environment = self.clone();
        for _ in 0..distance {
            let enclosing = environment.data.borrow().enclosing.clone()?;
            environment = enclosing;
        }
        Some(environment)
    }
    pub fn get_at(&self, distance: usize, name: &str) -> Option<Value> {
        self.ancestor(distance)?.get(name)
    }
    pub fn assign_at(&self, distance: usize, name: &str, value: Value) -> bool {
        match self.ancestor(distance) {
            Some(environment) => environment.assign(name, value),
            None => false,
        }
    }
    pub fn is_global(&self) -> bool {
        self.data.borrow().enclosing.is_none()
    }
    pub fn same(&self, other: &Environment) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Environment::new()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.borrow();
        f.debug_struct("Environment")
            .field("names", &data.values.keys().collect::<Vec<_>>())
            .field("global", &data.enclosing.is_none())
            .finish()
    }
}
