use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Turns the path of a `require` statement into source bytes.
pub trait SourceLoader {
    fn load(&self, path: &str) -> io::Result<Vec<u8>>;
}

/// Reads required files relative to `base`. A path without an extension
/// that does not exist is retried with `.lox` appended.
#[derive(Debug, Clone, Default)]
pub struct FsLoader {
    base: PathBuf,
}

impl FsLoader {
    pub fn new<P: Into<PathBuf>>(base: P) -> FsLoader {
        FsLoader { base: base.into() }
    }
    fn candidate(&self, path: &str) -> PathBuf {
        let full = self.base.join(path);
        if full.extension().is_none() && !full.exists() {
            full.with_extension("lox")
        } else {
            full
        }
    }
}

impl SourceLoader for FsLoader {
    fn load(&self, path: &str) -> io::Result<Vec<u8>> {
        fs::read(self.candidate(path))
    }
}

/// Serves sources from memory, for hosts that do not want scripts to
/// touch the file system.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    sources: BTreeMap<String, String>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }
    pub fn with(mut self, path: &str, source: &str) -> MemoryLoader {
        self.sources.insert(path.to_string(), source.to_string());
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&self, path: &str) -> io::Result<Vec<u8>> {
        self.sources
            .get(path)
            .map(|source| source.clone().into_bytes())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no source named {}", path)))
    }
}

/// Directory to resolve a script's `require` paths against.
pub fn base_dir(script: &Path) -> PathBuf {
    script
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default()
}
