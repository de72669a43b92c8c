//! An embeddable tree-walking interpreter for a small Lox dialect with
//! classes, closures, host natives and `require`.

pub mod ast;
pub mod callable;
pub mod class;
pub mod environment;
pub mod error;
pub mod instance;
pub mod interpreter;
pub mod loader;
pub mod lox;
pub mod output;
pub mod parser;
pub mod resolver;
pub mod scanner;
pub mod token;
pub mod value;

pub use crate::callable::{default_natives, NativeFunction};
pub use crate::error::LoxError;
pub use crate::loader::{FsLoader, MemoryLoader, SourceLoader};
pub use crate::lox::{compile, Cancellation, Lox};
pub use crate::output::CaptureOutput;
pub use crate::value::Value;
