// Foreign module used by the dynamic loading tests.
//
// Exports:
// - `sum`: two inputs, one output, complete entry-point set
// - `broken`: complete set, but `init` always fails
// - `partial`: only state-create, state-delete and info
// - `refused`: complete set, but state-create always returns null
// - `fixture_counters`: lifecycle counters shared by all states

use std::ffi::{c_char, c_void};
use std::sync::atomic::{AtomicU64, Ordering};

extern "C" {
    fn malloc(size: usize) -> *mut c_void;
}

#[repr(C)]
pub struct ErrorInfo {
    message: *mut c_char,
}

#[repr(C)]
pub struct FunctionInfo {
    input_dimension: usize,
    output_dimension: usize,
    description: *mut c_char,
}

static CREATED: AtomicU64 = AtomicU64::new(0);
static DELETED: AtomicU64 = AtomicU64::new(0);
static INITS: AtomicU64 = AtomicU64::new(0);
static FINALIZES: AtomicU64 = AtomicU64::new(0);
static POINTS: AtomicU64 = AtomicU64::new(0);

struct State {
    initialized: bool,
}

unsafe fn foreign_string(text: &str) -> *mut c_char {
    let ptr = malloc(text.len() + 1) as *mut u8;
    if !ptr.is_null() {
        std::ptr::copy_nonoverlapping(text.as_ptr(), ptr, text.len());
        *ptr.add(text.len()) = 0;
    }
    ptr as *mut c_char
}

unsafe fn fail(err: *mut ErrorInfo, status: i32, text: &str) -> i32 {
    if !err.is_null() {
        (*err).message = foreign_string(text);
    }
    status
}

unsafe fn create() -> *mut c_void {
    CREATED.fetch_add(1, Ordering::SeqCst);
    Box::into_raw(Box::new(State { initialized: false })) as *mut c_void
}

unsafe fn delete(state: *mut c_void) {
    DELETED.fetch_add(1, Ordering::SeqCst);
    drop(Box::from_raw(state as *mut State));
}

unsafe fn describe(info: *mut FunctionInfo, text: &str) -> i32 {
    (*info).input_dimension = 2;
    (*info).output_dimension = 1;
    (*info).description = foreign_string(text);
    0
}

unsafe fn sum_point(
    state: *mut c_void,
    input: *const f64,
    output: *mut f64,
    err: *mut ErrorInfo,
) -> i32 {
    let state = &*(state as *const State);
    if !state.initialized {
        return fail(err, -2, "exec before init");
    }
    let a = *input;
    let b = *input.add(1);
    if a.is_nan() || b.is_nan() {
        return fail(err, -1, "nan input");
    }
    *output = a + b;
    POINTS.fetch_add(1, Ordering::SeqCst);
    0
}

// sum

#[no_mangle]
pub unsafe extern "C" fn sum_state_create(_err: *mut ErrorInfo) -> *mut c_void {
    create()
}

#[no_mangle]
pub unsafe extern "C" fn sum_state_delete(state: *mut c_void) {
    delete(state)
}

#[no_mangle]
pub unsafe extern "C" fn sum_info(
    _state: *mut c_void,
    info: *mut FunctionInfo,
    _err: *mut ErrorInfo,
) -> i32 {
    describe(info, "a + b")
}

#[no_mangle]
pub unsafe extern "C" fn sum_init(state: *mut c_void, _err: *mut ErrorInfo) -> i32 {
    INITS.fetch_add(1, Ordering::SeqCst);
    (*(state as *mut State)).initialized = true;
    0
}

#[no_mangle]
pub unsafe extern "C" fn sum_exec(
    state: *mut c_void,
    input: *const f64,
    input_dimension: usize,
    output: *mut f64,
    output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    if input_dimension != 2 || output_dimension != 1 {
        return fail(err, -1, "bad dimensions");
    }
    sum_point(state, input, output, err)
}

#[no_mangle]
pub unsafe extern "C" fn sum_exec_batch(
    state: *mut c_void,
    input: *const f64,
    rows: usize,
    input_dimension: usize,
    output: *mut f64,
    output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    if input_dimension != 2 || output_dimension != 1 {
        return fail(err, -1, "bad dimensions");
    }
    for row in 0..rows {
        let status = sum_point(
            state,
            input.add(row * input_dimension),
            output.add(row * output_dimension),
            err,
        );
        if status != 0 {
            return status;
        }
    }
    0
}

#[no_mangle]
pub unsafe extern "C" fn sum_finalize(_state: *mut c_void, _err: *mut ErrorInfo) -> i32 {
    FINALIZES.fetch_add(1, Ordering::SeqCst);
    0
}

// broken

#[no_mangle]
pub unsafe extern "C" fn broken_state_create(_err: *mut ErrorInfo) -> *mut c_void {
    create()
}

#[no_mangle]
pub unsafe extern "C" fn broken_state_delete(state: *mut c_void) {
    delete(state)
}

#[no_mangle]
pub unsafe extern "C" fn broken_info(
    _state: *mut c_void,
    info: *mut FunctionInfo,
    _err: *mut ErrorInfo,
) -> i32 {
    describe(info, "always fails")
}

#[no_mangle]
pub unsafe extern "C" fn broken_init(_state: *mut c_void, err: *mut ErrorInfo) -> i32 {
    INITS.fetch_add(1, Ordering::SeqCst);
    fail(err, -1, "missing calibration table")
}

#[no_mangle]
pub unsafe extern "C" fn broken_exec(
    _state: *mut c_void,
    _input: *const f64,
    _input_dimension: usize,
    _output: *mut f64,
    _output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    fail(err, -1, "not initialized")
}

#[no_mangle]
pub unsafe extern "C" fn broken_exec_batch(
    _state: *mut c_void,
    _input: *const f64,
    _rows: usize,
    _input_dimension: usize,
    _output: *mut f64,
    _output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    fail(err, -1, "not initialized")
}

#[no_mangle]
pub unsafe extern "C" fn broken_finalize(_state: *mut c_void, _err: *mut ErrorInfo) -> i32 {
    FINALIZES.fetch_add(1, Ordering::SeqCst);
    0
}

// refused

#[no_mangle]
pub unsafe extern "C" fn refused_state_create(err: *mut ErrorInfo) -> *mut c_void {
    fail(err, -1, "license server unreachable");
    std::ptr::null_mut()
}

#[no_mangle]
pub unsafe extern "C" fn refused_state_delete(state: *mut c_void) {
    delete(state)
}

#[no_mangle]
pub unsafe extern "C" fn refused_info(
    _state: *mut c_void,
    info: *mut FunctionInfo,
    _err: *mut ErrorInfo,
) -> i32 {
    describe(info, "never created")
}

#[no_mangle]
pub unsafe extern "C" fn refused_init(_state: *mut c_void, _err: *mut ErrorInfo) -> i32 {
    0
}

#[no_mangle]
pub unsafe extern "C" fn refused_exec(
    state: *mut c_void,
    input: *const f64,
    _input_dimension: usize,
    output: *mut f64,
    _output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    sum_point(state, input, output, err)
}

#[no_mangle]
pub unsafe extern "C" fn refused_exec_batch(
    _state: *mut c_void,
    _input: *const f64,
    _rows: usize,
    _input_dimension: usize,
    _output: *mut f64,
    _output_dimension: usize,
    err: *mut ErrorInfo,
) -> i32 {
    fail(err, -1, "no state")
}

#[no_mangle]
pub unsafe extern "C" fn refused_finalize(_state: *mut c_void, _err: *mut ErrorInfo) -> i32 {
    0
}

// partial

#[no_mangle]
pub unsafe extern "C" fn partial_state_create(_err: *mut ErrorInfo) -> *mut c_void {
    create()
}

#[no_mangle]
pub unsafe extern "C" fn partial_state_delete(state: *mut c_void) {
    delete(state)
}

#[no_mangle]
pub unsafe extern "C" fn partial_info(
    _state: *mut c_void,
    info: *mut FunctionInfo,
    _err: *mut ErrorInfo,
) -> i32 {
    describe(info, "incomplete")
}

// counters: created, deleted, inits, finalizes, points

#[no_mangle]
pub unsafe extern "C" fn fixture_counters(out: *mut u64) {
    *out = CREATED.load(Ordering::SeqCst);
    *out.add(1) = DELETED.load(Ordering::SeqCst);
    *out.add(2) = INITS.load(Ordering::SeqCst);
    *out.add(3) = FINALIZES.load(Ordering::SeqCst);
    *out.add(4) = POINTS.load(Ordering::SeqCst);
}
