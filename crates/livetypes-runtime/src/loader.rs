//! Shared library resolution and loading
//!
//! Names resolve against configured directories first, then the working
//! directory, then the platform's library directories. A name that matches
//! no file there is handed to the system dynamic linker unchanged, so
//! sonames such as `libc.so.6` still load.

use crate::memory::Address;
use libloading::Library;
use std::ffi::c_void;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoadError {
    #[error("Library not found: {0}")]
    LibraryNotFound(String),

    #[error("Symbol '{symbol}' not found in library '{library}'")]
    SymbolNotFound { library: String, symbol: String },

    #[error("Failed to load library: {0}")]
    LoadFailed(String),
}

/// Loads libraries once and hands out shared handles
pub struct LibraryLoader {
    loaded: HashMap<PathBuf, Arc<Library>>,
    search_paths: Vec<PathBuf>,
}

impl LibraryLoader {
    pub fn new() -> Self {
        Self {
            loaded: HashMap::new(),
            search_paths: Self::system_search_paths(),
        }
    }

    /// Loader searching `paths` ahead of the defaults, in order
    pub fn with_search_paths(paths: &[PathBuf]) -> Self {
        let mut loader = Self::new();
        for path in paths.iter().rev() {
            loader.add_search_path(path.clone());
        }
        loader
    }

    fn system_search_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();

        if let Ok(cwd) = std::env::current_dir() {
            paths.push(cwd);
        }

        #[cfg(target_os = "linux")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/lib"));
            if cfg!(target_pointer_width = "64") {
                paths.push(PathBuf::from("/usr/lib64"));
                paths.push(PathBuf::from("/lib64"));
            }
        }

        #[cfg(target_os = "macos")]
        {
            paths.push(PathBuf::from("/usr/lib"));
            paths.push(PathBuf::from("/usr/local/lib"));
            paths.push(PathBuf::from("/opt/homebrew/lib"));
        }

        #[cfg(target_os = "windows")]
        {
            match std::env::var("SystemRoot") {
                Ok(root) => paths.push(PathBuf::from(root).join("System32")),
                Err(_) => paths.push(PathBuf::from("C:\\Windows\\System32")),
            }
        }

        paths
    }

    /// Candidate file names for `name` on this platform
    fn file_names(name: &str) -> Vec<String> {
        let (prefixes, extensions): (&[&str], &[&str]) = if cfg!(target_os = "windows") {
            (&["", "lib"], &["dll"])
        } else if cfg!(target_os = "macos") {
            (&["lib", ""], &["dylib", "so"])
        } else {
            (&["lib", ""], &["so"])
        };

        let mut names = vec![name.to_string()];
        for prefix in prefixes {
            for ext in extensions {
                names.push(format!("{}{}.{}", prefix, name, ext));
            }
        }
        names
    }

    /// Find the file backing `name`, if any directory holds one
    pub fn locate(&self, name: &str) -> Option<PathBuf> {
        let path = Path::new(name);
        if path.is_absolute() {
            return path.is_file().then(|| path.to_path_buf());
        }

        let candidates = Self::file_names(name);
        self.search_paths.iter().find_map(|dir| {
            candidates
                .iter()
                .map(|file| dir.join(file))
                .find(|full| full.is_file())
        })
    }

    /// Load `name`, reusing an earlier handle for the same file
    ///
    /// Loading runs the library's initializers in this process. Only load
    /// libraries you trust.
    pub fn open(&mut self, name: &str) -> Result<Arc<Library>, LoadError> {
        let key = match self.locate(name) {
            Some(path) => path,
            None if Path::new(name).is_absolute() => {
                return Err(LoadError::LibraryNotFound(name.to_string()))
            }
            None => PathBuf::from(name),
        };

        if let Some(library) = self.loaded.get(&key) {
            return Ok(library.clone());
        }

        // SAFETY: the caller accepts running the library's initializers
        let library = unsafe { Library::new(&key) }.map_err(|e| {
            if key.is_file() {
                LoadError::LoadFailed(e.to_string())
            } else {
                LoadError::LibraryNotFound(name.to_string())
            }
        })?;
        tracing::debug!(library = name, path = %key.display(), "loaded shared library");

        let library = Arc::new(library);
        self.loaded.insert(key, library.clone());
        Ok(library)
    }

    /// Address of an exported symbol
    pub fn resolve(library: &Library, library_name: &str, symbol: &str) -> Result<Address, LoadError> {
        // SAFETY: the symbol is only read as an address, never called here
        let found = unsafe { library.get::<*const c_void>(symbol.as_bytes()) };
        let address = found
            .map(|sym| Address::from_ptr(*sym))
            .map_err(|_| LoadError::SymbolNotFound {
                library: library_name.to_string(),
                symbol: symbol.to_string(),
            })?;
        tracing::debug!(library = library_name, symbol, %address, "resolved symbol");
        Ok(address)
    }

    /// Searched before everything added so far
    pub fn add_search_path(&mut self, path: PathBuf) {
        self.search_paths.insert(0, path);
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }
}

impl Default for LibraryLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LibraryLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibraryLoader")
            .field("search_paths", &self.search_paths)
            .field("loaded", &self.loaded.keys().collect::<Vec<_>>())
            .finish()
    }
}
