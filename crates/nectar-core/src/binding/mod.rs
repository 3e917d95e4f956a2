//! Foreign function bindings.
//!
//! A [`Binding`] wraps the entry points of one logical function and exposes
//! them as typed operations, translating foreign failures into [`Error`].
//! Bindings are read-only once built and are shared as `Arc<Binding>`; all
//! mutable foreign data lives in [`ExecutionState`] values.
//!
//! # Module Structure
//!
//! - `ffi` - C ABI types, status codes and symbol naming
//! - `entry` - `EntryPoints` trait and the library-backed implementation

mod entry;
mod ffi;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{Error, Result};
use crate::registry::ModuleRegistry;
use crate::types::{FunctionInfo, Sample};

pub use entry::{EntryPoints, ForeignError, LibraryEntryPoints, RawState};
pub use ffi::{
    CallStatus, EntryPoint, ExecBatchFn, ExecFn, FinalizeFn, InfoFn, InitFn, RawErrorInfo,
    RawFunctionInfo, StateCreateFn, StateDeleteFn,
};

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Typed access to the entry points of one foreign function.
pub struct Binding {
    id: u64,
    function: String,
    module_path: Option<PathBuf>,
    entry_points: Box<dyn EntryPoints>,
}

/// Foreign state owned by exactly one holder.
///
/// Not `Clone`; consumed by [`Binding::delete_state`], so it cannot be used
/// after deletion. It may move between threads but is not `Sync`.
pub struct ExecutionState {
    raw: RawState,
    binding_id: u64,
    deleted: bool,
}

// Safety: the foreign contract allows a state to be used from any thread as
// long as calls are not concurrent; `ExecutionState` is not `Sync` and every
// call requires `&mut` access.
unsafe impl Send for ExecutionState {}

impl Drop for ExecutionState {
    fn drop(&mut self) {
        if !self.deleted {
            tracing::warn!(
                "Foreign state {:p} dropped without state-delete; leaking it",
                self.raw.as_ptr()
            );
        }
    }
}

impl fmt::Debug for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionState")
            .field("raw", &self.raw.as_ptr())
            .field("binding_id", &self.binding_id)
            .finish()
    }
}

impl Binding {
    /// Load `module` through `registry` and resolve every entry point of `function`.
    pub fn build(
        registry: &ModuleRegistry,
        module: impl AsRef<Path>,
        function: &str,
    ) -> Result<Arc<Self>> {
        let handle = registry.load(module)?;
        let module_path = handle.path().to_path_buf();
        let entry_points = LibraryEntryPoints::resolve(handle, function)?;

        tracing::debug!("Bound `{}` from {}", function, module_path.display());

        Ok(Arc::new(Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            function: function.to_string(),
            module_path: Some(module_path),
            entry_points: Box::new(entry_points),
        }))
    }

    /// Bind an in-process entry-point table.
    pub fn from_entry_points(
        function: &str,
        entry_points: impl EntryPoints + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed),
            function: function.to_string(),
            module_path: None,
            entry_points: Box::new(entry_points),
        })
    }

    /// Logical function name.
    pub fn function(&self) -> &str {
        &self.function
    }

    /// Canonical path of the backing module, if any.
    pub fn module_path(&self) -> Option<&Path> {
        self.module_path.as_deref()
    }

    fn foreign_error(&self, entry: EntryPoint, err: ForeignError) -> Error {
        Error::ForeignExecution {
            function: self.function.clone(),
            entry_point: entry.symbol_name(&self.function),
            status: err.status,
            message: err.message,
        }
    }

    /// Check that `state` was created by this binding.
    fn owned(&self, state: &ExecutionState) -> Result<RawState> {
        if state.deleted || state.binding_id != self.id {
            return Err(Error::InternalExecution {
                function: self.function.clone(),
                message: format!(
                    "state {:p} does not belong to this binding",
                    state.raw.as_ptr()
                ),
                source: None,
            });
        }
        Ok(state.raw)
    }

    /// Allocate a new foreign state.
    pub fn create_state(&self) -> Result<ExecutionState> {
        let raw = self
            .entry_points
            .create_state()
            .map_err(|err| Error::StateCreation {
                function: self.function.clone(),
                message: err.message,
            })?;

        Ok(ExecutionState {
            raw,
            binding_id: self.id,
            deleted: false,
        })
    }

    /// Query dimensions and description.
    pub fn info(&self, state: &ExecutionState) -> Result<FunctionInfo> {
        let raw = self.owned(state)?;
        // Safety: `owned` checked that `raw` is live and came from these entry points.
        unsafe { self.entry_points.info(raw) }
            .map_err(|e| self.foreign_error(EntryPoint::Info, e))
    }

    pub fn input_dimension(&self, state: &ExecutionState) -> Result<usize> {
        Ok(self.info(state)?.input_dimension)
    }

    pub fn output_dimension(&self, state: &ExecutionState) -> Result<usize> {
        Ok(self.info(state)?.output_dimension)
    }

    pub fn description(&self, state: &ExecutionState) -> Result<Option<String>> {
        Ok(self.info(state)?.description)
    }

    pub fn init(&self, state: &mut ExecutionState) -> Result<()> {
        let raw = self.owned(state)?;
        // Safety: `raw` is live and owned by this binding; `&mut` excludes concurrent calls.
        unsafe { self.entry_points.init(raw) }
            .map_err(|e| self.foreign_error(EntryPoint::Init, e))
    }

    /// Evaluate one point whose length the caller has validated.
    pub fn execute(
        &self,
        state: &mut ExecutionState,
        point: &[f64],
        output_dimension: usize,
    ) -> Result<Vec<f64>> {
        let raw = self.owned(state)?;
        let mut output = vec![0.0; output_dimension];
        // Safety: `raw` is live and exclusively borrowed. `output` holds exactly
        // `output_dimension` values and the caller checked the point's length.
        unsafe { self.entry_points.exec(raw, point, &mut output) }
            .map_err(|e| self.foreign_error(EntryPoint::Exec, e))?;
        Ok(output)
    }

    /// Evaluate every point of `batch` in one foreign call.
    pub fn execute_batch(
        &self,
        state: &mut ExecutionState,
        batch: &Sample,
        output_dimension: usize,
    ) -> Result<Sample> {
        let raw = self.owned(state)?;
        let rows = batch.len();
        let mut output = vec![0.0; rows * output_dimension];
        // Safety: `raw` is live and exclusively borrowed. Both buffers are
        // exactly `rows` times their row dimension long.
        unsafe {
            self.entry_points.exec_batch(
                raw,
                batch.as_flat(),
                rows,
                batch.dimension(),
                &mut output,
                output_dimension,
            )
        }
        .map_err(|e| self.foreign_error(EntryPoint::ExecBatch, e))?;

        Sample::from_flat(output_dimension, rows, output).ok_or_else(|| Error::InternalExecution {
            function: self.function.clone(),
            message: "batch output has the wrong length".to_string(),
            source: None,
        })
    }

    pub fn finalize(&self, state: &mut ExecutionState) -> Result<()> {
        let raw = self.owned(state)?;
        // Safety: `raw` is live and owned by this binding; `&mut` excludes concurrent calls.
        unsafe { self.entry_points.finalize(raw) }
            .map_err(|e| self.foreign_error(EntryPoint::Finalize, e))
    }

    /// Release a state. The state is consumed even when it is rejected.
    pub fn delete_state(&self, mut state: ExecutionState) -> Result<()> {
        let raw = self.owned(&state)?;
        // Safety: `state` is consumed here and marked deleted, so `raw` is never used again.
        unsafe { self.entry_points.delete_state(raw) };
        state.deleted = true;
        Ok(())
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("function", &self.function)
            .field("module_path", &self.module_path)
            .finish()
    }
}
