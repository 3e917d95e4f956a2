//! Entry-point tables.
//!
//! [`EntryPoints`] is the dispatch seam between a [`Binding`](super::Binding)
//! and the foreign code. [`LibraryEntryPoints`] resolves the seven symbols of a
//! loaded module once and calls them through function pointers.

use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::{Error, Result};
use crate::registry::ModuleHandle;
use crate::types::FunctionInfo;

use super::ffi::{
    CallStatus, EntryPoint, ExecBatchFn, ExecFn, FinalizeFn, InfoFn, InitFn, RawErrorInfo,
    RawFunctionInfo, StateCreateFn, StateDeleteFn,
};

/// Opaque pointer to foreign execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawState(NonNull<c_void>);

impl RawState {
    /// Wrap a state pointer; `None` for null.
    pub fn new(ptr: *mut c_void) -> Option<Self> {
        NonNull::new(ptr).map(Self)
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0.as_ptr()
    }
}

/// Failure reported by an entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignError {
    pub status: CallStatus,
    pub message: String,
}

impl ForeignError {
    pub fn new(status: CallStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn from_call(code: i32, error: &mut RawErrorInfo) -> Option<Self> {
        let status = CallStatus::from(code);
        if status == CallStatus::Success {
            return None;
        }
        let message = error
            .take_message()
            .unwrap_or_else(|| "no diagnostic supplied".to_string());
        Some(Self { status, message })
    }
}

/// The foreign contract, one method per entry point.
///
/// Implementations must be callable from any thread, but a given state is
/// only ever used by one thread at a time.
pub trait EntryPoints: Send + Sync {
    /// Allocate a fresh state.
    fn create_state(&self) -> std::result::Result<RawState, ForeignError>;

    /// Release a state.
    ///
    /// # Safety
    /// `state` must come from `create_state` on this table and must not be used afterwards.
    unsafe fn delete_state(&self, state: RawState);

    /// # Safety
    /// `state` must be a live state created by this table.
    unsafe fn info(&self, state: RawState) -> std::result::Result<FunctionInfo, ForeignError>;

    /// # Safety
    /// `state` must be a live state created by this table.
    unsafe fn init(&self, state: RawState) -> std::result::Result<(), ForeignError>;

    /// Evaluate one point into `output`.
    ///
    /// # Safety
    /// `state` must be a live, initialized state created by this table.
    unsafe fn exec(
        &self,
        state: RawState,
        input: &[f64],
        output: &mut [f64],
    ) -> std::result::Result<(), ForeignError>;

    /// Evaluate `rows` row-major points into `output`.
    ///
    /// # Safety
    /// `state` must be a live, initialized state created by this table;
    /// `input.len() == rows * input_dimension` and
    /// `output.len() == rows * output_dimension`.
    unsafe fn exec_batch(
        &self,
        state: RawState,
        input: &[f64],
        rows: usize,
        input_dimension: usize,
        output: &mut [f64],
        output_dimension: usize,
    ) -> std::result::Result<(), ForeignError>;

    /// # Safety
    /// `state` must be a live state created by this table.
    unsafe fn finalize(&self, state: RawState) -> std::result::Result<(), ForeignError>;
}

/// Entry points resolved from a loaded module.
///
/// Holds a module handle so the function pointers stay valid for the
/// lifetime of the table.
pub struct LibraryEntryPoints {
    module: ModuleHandle,
    state_create: StateCreateFn,
    state_delete: StateDeleteFn,
    info: InfoFn,
    init: InitFn,
    exec: ExecFn,
    exec_batch: ExecBatchFn,
    finalize: FinalizeFn,
}

impl LibraryEntryPoints {
    /// Resolve every entry point of `function` in `module`.
    pub fn resolve(module: ModuleHandle, function: &str) -> Result<Self> {
        let missing = |entry: EntryPoint| Error::BindingIncomplete {
            path: module.path().to_path_buf(),
            function: function.to_string(),
            entry_point: entry.symbol_name(function),
        };

        // Safety: symbol types follow the contract in `ffi`; the table keeps
        // `module` alive so the pointers never outlive the library.
        macro_rules! resolve {
            ($entry:expr, $ty:ty) => {
                unsafe { module.get::<$ty>(&$entry.symbol_name(function)) }
                    .map_err(|_| missing($entry))?
            };
        }

        let state_create = resolve!(EntryPoint::StateCreate, StateCreateFn);
        let state_delete = resolve!(EntryPoint::StateDelete, StateDeleteFn);
        let info = resolve!(EntryPoint::Info, InfoFn);
        let init = resolve!(EntryPoint::Init, InitFn);
        let exec = resolve!(EntryPoint::Exec, ExecFn);
        let exec_batch = resolve!(EntryPoint::ExecBatch, ExecBatchFn);
        let finalize = resolve!(EntryPoint::Finalize, FinalizeFn);

        Ok(Self {
            module,
            state_create,
            state_delete,
            info,
            init,
            exec,
            exec_batch,
            finalize,
        })
    }

    pub fn module(&self) -> &ModuleHandle {
        &self.module
    }
}

impl EntryPoints for LibraryEntryPoints {
    fn create_state(&self) -> std::result::Result<RawState, ForeignError> {
        let mut error = RawErrorInfo::empty();
        // Safety: resolved from the module under the state-create signature.
        let ptr = unsafe { (self.state_create)(&mut error) };
        match RawState::new(ptr) {
            Some(state) => Ok(state),
            None => Err(ForeignError::new(
                CallStatus::ExecutionError,
                error
                    .take_message()
                    .unwrap_or_else(|| "state-create returned a null state".to_string()),
            )),
        }
    }

    unsafe fn delete_state(&self, state: RawState) {
        unsafe { (self.state_delete)(state.as_ptr()) }
    }

    unsafe fn info(&self, state: RawState) -> std::result::Result<FunctionInfo, ForeignError> {
        let mut raw = RawFunctionInfo::empty();
        let mut error = RawErrorInfo::empty();
        let code = unsafe { (self.info)(state.as_ptr(), &mut raw, &mut error) };
        if let Some(err) = ForeignError::from_call(code, &mut error) {
            return Err(err);
        }
        Ok(FunctionInfo {
            input_dimension: raw.input_dimension,
            output_dimension: raw.output_dimension,
            description: raw.take_description(),
        })
    }

    unsafe fn init(&self, state: RawState) -> std::result::Result<(), ForeignError> {
        let mut error = RawErrorInfo::empty();
        let code = unsafe { (self.init)(state.as_ptr(), &mut error) };
        ForeignError::from_call(code, &mut error).map_or(Ok(()), Err)
    }

    unsafe fn exec(
        &self,
        state: RawState,
        input: &[f64],
        output: &mut [f64],
    ) -> std::result::Result<(), ForeignError> {
        let mut error = RawErrorInfo::empty();
        let code = unsafe {
            (self.exec)(
                state.as_ptr(),
                input.as_ptr(),
                input.len(),
                output.as_mut_ptr(),
                output.len(),
                &mut error,
            )
        };
        ForeignError::from_call(code, &mut error).map_or(Ok(()), Err)
    }

    unsafe fn exec_batch(
        &self,
        state: RawState,
        input: &[f64],
        rows: usize,
        input_dimension: usize,
        output: &mut [f64],
        output_dimension: usize,
    ) -> std::result::Result<(), ForeignError> {
        let mut error = RawErrorInfo::empty();
        let code = unsafe {
            (self.exec_batch)(
                state.as_ptr(),
                input.as_ptr(),
                rows,
                input_dimension,
                output.as_mut_ptr(),
                output_dimension,
                &mut error,
            )
        };
        ForeignError::from_call(code, &mut error).map_or(Ok(()), Err)
    }

    unsafe fn finalize(&self, state: RawState) -> std::result::Result<(), ForeignError> {
        let mut error = RawErrorInfo::empty();
        let code = unsafe { (self.finalize)(state.as_ptr(), &mut error) };
        ForeignError::from_call(code, &mut error).map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_state_rejects_null() {
        assert!(RawState::new(std::ptr::null_mut()).is_none());
        let mut slot = 0u8;
        let state = RawState::new(&mut slot as *mut u8 as *mut c_void).unwrap();
        assert_eq!(state.as_ptr() as *mut u8, &mut slot as *mut u8);
    }

    #[test]
    fn test_foreign_error_from_call() {
        let mut error = RawErrorInfo::empty();
        assert!(ForeignError::from_call(0, &mut error).is_none());

        let err = ForeignError::from_call(-2, &mut error).unwrap();
        assert_eq!(err.status, CallStatus::StateCorrupted);
        assert_eq!(err.message, "no diagnostic supplied");
    }
}
