//! Module registry.
//!
//! Loads foreign dynamic modules at most once per canonical path and hands out
//! shared handles to them.
//!
//! ```text
//! ModuleRegistry
//!     │
//!     ├── ModuleLocator (search path + RetryPolicy)
//!     │       └── canonical path
//!     │
//!     └── catalog: canonical path → ModuleHandle (Arc<LoadedModule>)
//!             └── libloading::Library
//! ```
//!
//! The registry is an explicit value rather than a process global so that its
//! lifetime is controlled by the owner. Bindings keep their module alive through
//! the handle, so a module is never closed while one of its entry points can
//! still be called.

mod retry;
mod search;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libloading::{Library, Symbol};

use crate::error::{Error, Result};

pub use retry::{Attempt, Exhausted, RetryError, RetryPolicy};
pub use search::{LocateError, MODULE_PATH_ENV, ModuleLocator, SearchPath};

/// A loaded dynamic module.
pub struct LoadedModule {
    path: PathBuf,
    library: Library,
}

/// Shared handle to a loaded module.
///
/// Cloning is cheap; all clones refer to the same loaded library.
#[derive(Clone)]
pub struct ModuleHandle {
    inner: Arc<LoadedModule>,
}

/// Address of an exported symbol, used to compare resolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolAddress(usize);

impl SymbolAddress {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

impl ModuleHandle {
    /// Canonical path the module was loaded from.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Whether both handles refer to the same loaded library.
    pub fn same_module(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Resolve `name` to its address.
    pub fn resolve_symbol(&self, name: &str) -> Result<SymbolAddress> {
        // Safety: the symbol is only read as an opaque address, never called here.
        let func: unsafe extern "C" fn() = unsafe { self.get(name)? };
        Ok(SymbolAddress(func as usize))
    }

    /// Resolve `name` as a value of type `T`, usually a function pointer.
    ///
    /// # Safety
    /// `T` must match the actual type of the exported symbol. The returned value
    /// is only valid while this module stays loaded, i.e. while a clone of this
    /// handle is alive.
    pub(crate) unsafe fn get<T: Copy>(&self, name: &str) -> Result<T> {
        let symbol: Symbol<T> = unsafe { self.inner.library.get(name.as_bytes()) }.map_err(|_| {
            Error::SymbolNotFound {
                path: self.inner.path.clone(),
                symbol: name.to_string(),
            }
        })?;
        Ok(*symbol)
    }

    fn strong_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("path", &self.inner.path)
            .finish()
    }
}

/// Catalog of loaded modules keyed by canonical path.
pub struct ModuleRegistry {
    catalog: Mutex<HashMap<PathBuf, ModuleHandle>>,
    locator: Box<dyn ModuleLocator>,
    retry: RetryPolicy,
}

impl ModuleRegistry {
    /// Create a registry resolving names through `locator`.
    pub fn new(locator: impl ModuleLocator + 'static, retry: RetryPolicy) -> Self {
        Self {
            catalog: Mutex::new(HashMap::new()),
            locator: Box::new(locator),
            retry,
        }
    }

    /// Create a registry over a search path with the default retry policy.
    pub fn with_search_path(search: SearchPath) -> Self {
        Self::new(search, RetryPolicy::default())
    }

    /// Lock the catalog. The map stays consistent even if a holder panicked.
    fn catalog(&self) -> MutexGuard<'_, HashMap<PathBuf, ModuleHandle>> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve `name` to a canonical path, retrying transient I/O failures.
    pub fn resolve_path(&self, name: &Path) -> Result<PathBuf> {
        let outcome = self.retry.run(|_| match self.locator.locate(name) {
            Ok(path) => Attempt::Done(path),
            Err(LocateError::NotFound { searched }) => Attempt::Fatal(searched),
            Err(LocateError::Io(e)) => Attempt::Transient(e),
        });

        outcome.map_err(|err| match err {
            RetryError::Fatal(searched) => Error::ModuleNotFound {
                name: name.display().to_string(),
                searched,
            },
            RetryError::Exhausted(exhausted) => Error::IoRetryExhausted {
                name: name.display().to_string(),
                attempts: exhausted.attempts,
                source: exhausted.last_error,
            },
        })
    }

    /// Load a module, or return the already-loaded handle for the same canonical path.
    pub fn load(&self, name: impl AsRef<Path>) -> Result<ModuleHandle> {
        let path = self.resolve_path(name.as_ref())?;

        let mut catalog = self.catalog();
        if let Some(handle) = catalog.get(&path) {
            tracing::debug!("Module {} already loaded", path.display());
            return Ok(handle.clone());
        }

        // Safety: loading runs the module's initializers; modules are trusted
        // to be well-behaved native code built for this platform.
        let library = unsafe { Library::new(&path) }.map_err(|e| Error::ModuleLoad {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!("Loaded module {}", path.display());

        let handle = ModuleHandle {
            inner: Arc::new(LoadedModule {
                path: path.clone(),
                library,
            }),
        };
        catalog.insert(path, handle.clone());
        Ok(handle)
    }

    /// Resolve an exported symbol of a loaded module.
    pub fn resolve_symbol(&self, handle: &ModuleHandle, name: &str) -> Result<SymbolAddress> {
        handle.resolve_symbol(name)
    }

    /// Whether a module with this canonical path is in the catalog.
    pub fn is_loaded(&self, path: &Path) -> bool {
        self.catalog().contains_key(path)
    }

    /// Number of modules in the catalog.
    pub fn len(&self) -> usize {
        self.catalog().len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog().is_empty()
    }

    /// Unload one module by canonical path.
    ///
    /// Unknown paths are ignored.
    pub fn unload(&self, path: &Path) -> Result<()> {
        let handle = self.catalog().remove(path);
        match handle {
            Some(handle) => close_module(handle).map_err(|failure| Error::ModuleUnload {
                failures: vec![failure],
            }),
            None => Ok(()),
        }
    }

    /// Unload every module in the catalog.
    ///
    /// All modules are attempted; failures are collected into one error.
    pub fn teardown(&self) -> Result<()> {
        let drained: Vec<ModuleHandle> = self.catalog().drain().map(|(_, h)| h).collect();
        if drained.is_empty() {
            return Ok(());
        }

        tracing::info!("Unloading {} module(s)", drained.len());

        let failures: Vec<(PathBuf, String)> = drained
            .into_iter()
            .filter_map(|handle| close_module(handle).err())
            .collect();

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::ModuleUnload { failures })
        }
    }
}

/// Close a module that has just been removed from the catalog.
///
/// A module still referenced by a binding is not closed here; it stays
/// loaded until its last handle drops.
fn close_module(handle: ModuleHandle) -> std::result::Result<(), (PathBuf, String)> {
    let path = handle.path().to_path_buf();
    let others = handle.strong_count() - 1;

    match Arc::try_unwrap(handle.inner) {
        Ok(module) => module.library.close().map_err(|e| (path, e.to_string())),
        Err(_still_shared) => Err((
            path,
            format!("still referenced by {} live handle(s)", others),
        )),
    }
}

impl Drop for ModuleRegistry {
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            tracing::error!("Module registry teardown failed: {}", e);
        }
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("modules", &self.catalog().keys().collect::<Vec<_>>())
            .field("retry", &self.retry)
            .finish()
    }
}
