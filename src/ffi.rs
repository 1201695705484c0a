//! C ABI over the compiler and scanner.
//!
//! The declarations mirror `include/scan_engine.h`. Every entry point catches
//! panics, so unwinding never crosses into C. The message of the last failure
//! on the calling thread is available through [`scn_last_error`].

use crate::error::{EngineError, ErrorKind};
use crate::ir::Rules;
use std::any::Any;
use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;

/// Status code returned by every fallible C function.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScnResult {
    Success = 0,
    SyntaxError = 1,
    SemanticError = 2,
    PatternError = 3,
    ResourceError = 4,
    InvalidArgument = 5,
    Panic = 6,
}

impl From<ErrorKind> for ScnResult {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Syntax => ScnResult::SyntaxError,
            ErrorKind::Semantic => ScnResult::SemanticError,
            ErrorKind::Pattern => ScnResult::PatternError,
            ErrorKind::Resource => ScnResult::ResourceError,
            ErrorKind::InvalidArgument => ScnResult::InvalidArgument,
        }
    }
}

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(message: impl Into<Vec<u8>>) {
    let mut bytes = message.into();
    bytes.retain(|&b| b != 0);
    let message = CString::new(bytes).ok();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = message);
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

fn fail(error: &EngineError) -> ScnResult {
    set_last_error(error.to_string());
    error.kind().into()
}

fn record_panic(payload: &(dyn Any + Send)) {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    set_last_error(format!("panic: {message}"));
}

/// Run `body`, turning a panic into [`ScnResult::Panic`].
fn guarded(body: impl FnOnce() -> ScnResult) -> ScnResult {
    match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(result) => result,
        Err(payload) => {
            record_panic(&*payload);
            ScnResult::Panic
        }
    }
}

/// Run `body` for a function with no status code; a panic only leaves its
/// message in [`scn_last_error`].
fn guarded_void(body: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
        record_panic(&*payload);
    }
}

/// Compile the NUL-terminated rule source `src` into `*rules`.
///
/// On success the caller owns `*rules` and must release it with
/// [`scn_rules_destroy`]. On failure `*rules` is set to null.
///
/// # Safety
/// `src` must be null or a valid NUL-terminated string; `rules` must be null
/// or valid for writes.
#[no_mangle]
pub unsafe extern "C" fn scn_compile(src: *const c_char, rules: *mut *mut Rules) -> ScnResult {
    guarded(|| {
        clear_last_error();
        if rules.is_null() {
            set_last_error("output pointer is null");
            return ScnResult::InvalidArgument;
        }
        // SAFETY: checked for null above; the caller guarantees validity.
        unsafe { *rules = ptr::null_mut() };
        if src.is_null() {
            set_last_error("source pointer is null");
            return ScnResult::InvalidArgument;
        }
        // SAFETY: the caller guarantees a NUL-terminated string.
        let source = match unsafe { CStr::from_ptr(src) }.to_str() {
            Ok(source) => source,
            Err(e) => {
                set_last_error(format!("source is not valid UTF-8: {e}"));
                return ScnResult::InvalidArgument;
            }
        };

        match crate::compile(source) {
            Ok(compiled) => {
                // SAFETY: checked for null above.
                unsafe { *rules = Box::into_raw(Box::new(compiled)) };
                ScnResult::Success
            }
            Err(error) => fail(&error),
        }
    })
}

/// Destroy rules created by [`scn_compile`]. Null is a no-op. A panic while
/// releasing is reported through [`scn_last_error`].
///
/// # Safety
/// `rules` must be null or a pointer returned by [`scn_compile`] that has not
/// been destroyed yet, and no scan may be using it.
#[no_mangle]
pub unsafe extern "C" fn scn_rules_destroy(rules: *mut Rules) {
    if rules.is_null() {
        return;
    }
    guarded_void(|| {
        // SAFETY: the caller hands back ownership of a pointer from `scn_compile`.
        drop(unsafe { Box::from_raw(rules) });
    });
}

/// Scan `len` bytes at `data` and store the number of matching rules in
/// `*matching_rules`.
///
/// # Safety
/// `rules` must come from [`scn_compile`]; `data` must be valid for `len`
/// bytes (it may be null when `len` is 0); `matching_rules` must be null or
/// valid for writes.
#[no_mangle]
pub unsafe extern "C" fn scn_rules_scan(
    rules: *const Rules,
    data: *const u8,
    len: usize,
    matching_rules: *mut usize,
) -> ScnResult {
    guarded(|| {
        clear_last_error();
        if rules.is_null() || matching_rules.is_null() || (data.is_null() && len > 0) {
            set_last_error("null pointer argument");
            return ScnResult::InvalidArgument;
        }
        let buffer: &[u8] = if len == 0 {
            &[]
        } else {
            // SAFETY: the caller guarantees `data` is valid for `len` bytes.
            unsafe { std::slice::from_raw_parts(data, len) }
        };
        // SAFETY: non-null and produced by `scn_compile`.
        let results = unsafe { &*rules }.scan(buffer);
        // SAFETY: checked for null above.
        unsafe { *matching_rules = results.len() };
        ScnResult::Success
    })
}

/// Message of the last failure on this thread, or null if the last call
/// succeeded. The pointer stays valid until the next call on this thread.
#[no_mangle]
pub extern "C" fn scn_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(ptr::null(), |message| message.as_ptr())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        assert_eq!(ScnResult::from(ErrorKind::Syntax), ScnResult::SyntaxError);
        assert_eq!(ScnResult::from(ErrorKind::Resource), ScnResult::ResourceError);
        assert_eq!(ScnResult::Panic as i32, 6);
    }

    #[test]
    fn test_guarded_captures_panics() {
        let result = guarded(|| panic!("boom"));
        assert_eq!(result, ScnResult::Panic);
        // SAFETY: the pointer was just produced on this thread.
        let message = unsafe { CStr::from_ptr(scn_last_error()) };
        assert_eq!(message.to_str().unwrap(), "panic: boom");
    }

    #[test]
    fn test_guarded_void_records_panics() {
        clear_last_error();
        guarded_void(|| {});
        assert!(scn_last_error().is_null());

        guarded_void(|| panic!("release failed: {}", 7));
        // SAFETY: the pointer was just produced on this thread.
        let message = unsafe { CStr::from_ptr(scn_last_error()) };
        assert_eq!(message.to_str().unwrap(), "panic: release failed: 7");
    }

    #[test]
    fn test_null_arguments() {
        let mut rules: *mut Rules = ptr::null_mut();
        // SAFETY: null inputs are part of the contract.
        unsafe {
            assert_eq!(
                scn_compile(ptr::null(), &mut rules),
                ScnResult::InvalidArgument
            );
            assert!(rules.is_null());
            scn_rules_destroy(ptr::null_mut());
        }
    }
}
