//! Module path resolution.
//!
//! Turns a module name as given by the caller into the canonical path of a
//! file on disk. The canonical path is the key of the registry catalog.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Environment variable holding extra module directories.
pub const MODULE_PATH_ENV: &str = "NECTAR_MODULE_PATH";

/// Why a module could not be located.
#[derive(Debug)]
pub enum LocateError {
    /// No candidate file exists.
    NotFound { searched: usize },
    /// The filesystem failed while probing; worth retrying.
    Io(io::Error),
}

/// Resolves module names to canonical file paths.
pub trait ModuleLocator: Send + Sync {
    fn locate(&self, name: &Path) -> Result<PathBuf, LocateError>;
}

/// Ordered list of directories searched for modules.
#[derive(Debug, Clone, Default)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new(dirs: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        Self {
            dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Directories from `NECTAR_MODULE_PATH`, then the per-user module directory.
    pub fn from_env() -> Self {
        let mut dirs: Vec<PathBuf> = std::env::var_os(MODULE_PATH_ENV)
            .map(|value| std::env::split_paths(&value).collect())
            .unwrap_or_default();

        if let Some(data_dir) = dirs::data_dir() {
            dirs.push(data_dir.join("nectar").join("modules"));
        }

        Self { dirs }
    }

    /// Add a directory searched after the existing ones.
    pub fn push(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.push(dir.into());
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Candidate files for `name`, in probe order.
    ///
    /// Names with a directory component are taken as they are. Bare names are
    /// tried in every search directory, first verbatim and then, when they
    /// carry no extension, with the platform library prefix and suffix.
    fn candidates(&self, name: &Path) -> Vec<PathBuf> {
        let has_dir = name.is_absolute()
            || name
                .parent()
                .is_some_and(|parent| !parent.as_os_str().is_empty());
        if has_dir {
            return vec![name.to_path_buf()];
        }

        let decorated = match (name.extension(), name.to_str()) {
            (None, Some(stem)) => Some(format!("{}{}{}", DLL_PREFIX, stem, DLL_SUFFIX)),
            _ => None,
        };

        let mut candidates = Vec::new();
        for dir in &self.dirs {
            candidates.push(dir.join(name));
            if let Some(decorated) = &decorated {
                candidates.push(dir.join(decorated));
            }
        }
        candidates
    }
}

impl ModuleLocator for SearchPath {
    fn locate(&self, name: &Path) -> Result<PathBuf, LocateError> {
        let candidates = self.candidates(name);

        for candidate in &candidates {
            match fs::metadata(candidate) {
                Ok(meta) if meta.is_file() => {
                    return fs::canonicalize(candidate).map_err(LocateError::Io);
                }
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(LocateError::Io(e)),
            }
        }

        Err(LocateError::NotFound {
            searched: self.dirs.len(),
        })
    }
}
