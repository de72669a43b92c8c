use crate::interpreter::RuntimeError;
use crate::parser::ParseError;
use crate::resolver::ResolverError;
use crate::scanner::ScanError;
use std::io;
use std::str::Utf8Error;
use thiserror::Error;

/// Any failure of a run. Each phase fails fast, so a run reports exactly
/// one of these.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Resolve(#[from] ResolverError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("reading {path}: {source}")]
    Io { path: String, source: io::Error },
    #[error("source is not valid UTF-8: {0}")]
    Encoding(#[from] Utf8Error),
    #[error("run cancelled")]
    Cancelled,
}

impl LoxError {
    /// Errors caught before any statement ran.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            LoxError::Scan(_) | LoxError::Parse(_) | LoxError::Resolve(_) | LoxError::Encoding(_)
        )
    }
}
