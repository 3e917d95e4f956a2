//! C ABI of foreign modules.
//!
//! This module defines the function pointer types of the seven entry points a
//! module exports per logical function, the structures passed across the
//! boundary, and the status codes the entry points return.

use std::ffi::{CStr, c_char, c_void};
use std::fmt;

/// Status code returned by entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum CallStatus {
    /// Call completed
    Success = 0,
    /// The function failed; the state is still usable
    ExecutionError = -1,
    /// The function failed and its state can no longer be trusted
    StateCorrupted = -2,
    /// A panic or exception was caught inside the module
    Panic = -4,
}

impl From<i32> for CallStatus {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Success,
            -1 => Self::ExecutionError,
            -2 => Self::StateCorrupted,
            -4 => Self::Panic,
            _ => Self::ExecutionError, // Unknown codes treated as execution errors
        }
    }
}

/// Out-of-band error channel filled by the module on failure.
///
/// `message` is either null or a `malloc`-allocated, NUL-terminated string
/// that the host releases with `free`.
#[repr(C)]
#[derive(Debug)]
pub struct RawErrorInfo {
    pub message: *mut c_char,
}

impl RawErrorInfo {
    pub fn empty() -> Self {
        Self {
            message: std::ptr::null_mut(),
        }
    }

    /// Take ownership of the message, releasing the foreign allocation.
    pub fn take_message(&mut self) -> Option<String> {
        let ptr = std::mem::replace(&mut self.message, std::ptr::null_mut());
        // Safety: the contract says the pointer is null or a malloc'ed C string.
        unsafe { ForeignString::new(ptr) }.into_string()
    }
}

impl Drop for RawErrorInfo {
    fn drop(&mut self) {
        let _ = self.take_message();
    }
}

/// Declared shape of a function, filled by the `info` entry point.
///
/// `description` follows the same ownership rule as [`RawErrorInfo::message`].
#[repr(C)]
#[derive(Debug)]
pub struct RawFunctionInfo {
    pub input_dimension: usize,
    pub output_dimension: usize,
    pub description: *mut c_char,
}

impl RawFunctionInfo {
    pub fn empty() -> Self {
        Self {
            input_dimension: 0,
            output_dimension: 0,
            description: std::ptr::null_mut(),
        }
    }

    /// Take ownership of the description, releasing the foreign allocation.
    pub fn take_description(&mut self) -> Option<String> {
        let ptr = std::mem::replace(&mut self.description, std::ptr::null_mut());
        // Safety: same contract as the error message.
        unsafe { ForeignString::new(ptr) }.into_string()
    }
}

impl Drop for RawFunctionInfo {
    fn drop(&mut self) {
        let _ = self.take_description();
    }
}

/// RAII guard for a C string allocated by the module.
/// Ensures libc::free is called even if copying the string panics.
struct ForeignString {
    ptr: *mut c_char,
}

impl ForeignString {
    unsafe fn new(ptr: *mut c_char) -> Self {
        Self { ptr }
    }

    fn into_string(self) -> Option<String> {
        if self.ptr.is_null() {
            return None;
        }
        // Safety: non-null pointers are NUL-terminated per the contract.
        let text = unsafe { CStr::from_ptr(self.ptr) };
        Some(text.to_string_lossy().into_owned())
    }
}

impl Drop for ForeignString {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::free(self.ptr as *mut c_void);
            }
        }
    }
}

// =============================================================================
// Entry Function Types
// =============================================================================
//
// Every entry point except state-create and state-delete returns an i32 status
// and reports failure details through the trailing RawErrorInfo pointer.

/// `NAME_state_create`: returns null on failure.
pub type StateCreateFn = unsafe extern "C" fn(*mut RawErrorInfo) -> *mut c_void;

/// `NAME_state_delete`
pub type StateDeleteFn = unsafe extern "C" fn(*mut c_void);

/// `NAME_info`
pub type InfoFn = unsafe extern "C" fn(*mut c_void, *mut RawFunctionInfo, *mut RawErrorInfo) -> i32;

/// `NAME_init`
pub type InitFn = unsafe extern "C" fn(*mut c_void, *mut RawErrorInfo) -> i32;

/// `NAME_exec`
pub type ExecFn = unsafe extern "C" fn(
    *mut c_void,
    *const f64, usize, // input point, input dimension
    *mut f64, usize,   // output point, output dimension
    *mut RawErrorInfo,
) -> i32;

/// `NAME_exec_batch`: input and output are row-major.
pub type ExecBatchFn = unsafe extern "C" fn(
    *mut c_void,
    *const f64, usize, usize, // input rows, row count, input dimension
    *mut f64, usize,          // output rows, output dimension
    *mut RawErrorInfo,
) -> i32;

/// `NAME_finalize`
pub type FinalizeFn = unsafe extern "C" fn(*mut c_void, *mut RawErrorInfo) -> i32;

/// The entry points of the foreign contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    StateCreate,
    StateDelete,
    Info,
    Init,
    Exec,
    ExecBatch,
    Finalize,
}

impl EntryPoint {
    /// Every required entry point, in resolution order.
    pub const ALL: [EntryPoint; 7] = [
        EntryPoint::StateCreate,
        EntryPoint::StateDelete,
        EntryPoint::Info,
        EntryPoint::Init,
        EntryPoint::Exec,
        EntryPoint::ExecBatch,
        EntryPoint::Finalize,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            EntryPoint::StateCreate => "state_create",
            EntryPoint::StateDelete => "state_delete",
            EntryPoint::Info => "info",
            EntryPoint::Init => "init",
            EntryPoint::Exec => "exec",
            EntryPoint::ExecBatch => "exec_batch",
            EntryPoint::Finalize => "finalize",
        }
    }

    /// Exported symbol name for `function`.
    pub fn symbol_name(self, function: &str) -> String {
        format!("{}_{}", function, self.suffix())
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn malloc_c_string(text: &str) -> *mut c_char {
        let bytes = text.as_bytes();
        unsafe {
            let ptr = libc::malloc(bytes.len() + 1) as *mut u8;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr, bytes.len());
            *ptr.add(bytes.len()) = 0;
            ptr as *mut c_char
        }
    }

    #[test]
    fn test_call_status_from_i32() {
        assert_eq!(CallStatus::from(0), CallStatus::Success);
        assert_eq!(CallStatus::from(-1), CallStatus::ExecutionError);
        assert_eq!(CallStatus::from(-2), CallStatus::StateCorrupted);
        assert_eq!(CallStatus::from(-4), CallStatus::Panic);
        assert_eq!(CallStatus::from(-99), CallStatus::ExecutionError);
        assert_eq!(CallStatus::from(7), CallStatus::ExecutionError);
    }

    #[test]
    fn test_symbol_names() {
        assert_eq!(EntryPoint::StateCreate.symbol_name("sum"), "sum_state_create");
        assert_eq!(EntryPoint::ExecBatch.symbol_name("sum"), "sum_exec_batch");
        assert_eq!(EntryPoint::ALL.len(), 7);
    }

    #[test]
    fn test_error_message_is_taken_once() {
        let mut info = RawErrorInfo::empty();
        assert_eq!(info.take_message(), None);

        info.message = malloc_c_string("division by zero");
        assert_eq!(info.take_message().as_deref(), Some("division by zero"));
        assert!(info.message.is_null());
        assert_eq!(info.take_message(), None);
    }

    #[test]
    fn test_description_freed_on_drop() {
        let mut info = RawFunctionInfo::empty();
        info.description = malloc_c_string("y = x0 + x1");
        drop(info);
    }
}
