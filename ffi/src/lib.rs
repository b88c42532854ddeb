//! C-ABI wrapper around `tagdispatch-core`.
//!
//! # Overview
//! Exposes the dispatcher through `extern "C"` functions so any language with
//! a C FFI can fire tagged requests, cancel them by tag, and receive results
//! on a thread of its choosing by calling `td_poll`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Request descriptors and the dispatcher config cross as JSON strings.
//! - Failures that have no `FfiOutcome` to carry them (a rejected
//!   descriptor, a bad config) are reported through `td_last_error`.
//! - The C caller owns all returned pointers and must call the matching
//!   `td_free_*` function to release them.

pub mod types;

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use tagdispatch_core::{Config, Dispatcher, RequestDescriptor, Tag};

use types::*;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_last_error(msg: impl Into<String>) {
    let msg = msg.into();
    log::debug!("ffi error: {msg}");
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(msg));
}

fn clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

/// Borrow a C string argument. `None` for null or non-UTF-8 input.
fn str_arg<'a>(s: *const c_char) -> Option<&'a str> {
    if s.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(s) }.to_str().ok()
}

fn parse_descriptor(json: *const c_char) -> Result<RequestDescriptor, (FfiErrorCode, String)> {
    let json = str_arg(json).ok_or((FfiErrorCode::NullArg, "null argument: descriptor_json".to_string()))?;
    let request: DescriptorJson =
        serde_json::from_str(json).map_err(|e| (FfiErrorCode::InvalidJson, format!("invalid descriptor: {e}")))?;
    request
        .into_descriptor()
        .map_err(|e| (FfiErrorCode::Validation, e.to_string()))
}

// ---------------------------------------------------------------------------
// Dispatcher lifecycle
// ---------------------------------------------------------------------------

/// Create a dispatcher from `config_json`, or from the defaults plus the
/// `TAGDISPATCH_*` environment when `config_json` is null.
///
/// Returns null on failure; `td_last_error` has the reason.
/// The caller must free the returned pointer with `td_dispatcher_free`.
#[unsafe(no_mangle)]
pub extern "C" fn td_dispatcher_new(config_json: *const c_char) -> *mut FfiDispatcher {
    catch_unwind(|| {
        clear_last_error();
        let config = if config_json.is_null() {
            Config::from_env()
        } else {
            match str_arg(config_json) {
                Some(json) => Config::from_json_str(json),
                None => {
                    set_last_error("config_json is not valid UTF-8");
                    return std::ptr::null_mut();
                }
            }
        };
        let built = config.and_then(|config| Dispatcher::from_config(&config));
        match built {
            Ok((inner, event_loop)) => Box::into_raw(Box::new(FfiDispatcher { inner, event_loop })),
            Err(e) => {
                set_last_error(e.to_string());
                std::ptr::null_mut()
            }
        }
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Cancel everything and free a dispatcher. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn td_dispatcher_free(dispatcher: *mut FfiDispatcher) {
    if !dispatcher.is_null() {
        let _ = catch_unwind(AssertUnwindSafe(|| {
            drop(unsafe { Box::from_raw(dispatcher) });
        }));
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Dispatch `descriptor_json` asynchronously. `callback` runs once, from a
/// later `td_poll`, unless the call is cancelled first.
///
/// Returns the call id, or 0 if the descriptor was rejected; `td_last_error`
/// has the reason. Dispatch and poll from the same thread so the callback
/// always sees the id returned here.
#[unsafe(no_mangle)]
pub extern "C" fn td_dispatch_async(
    dispatcher: *const FfiDispatcher,
    descriptor_json: *const c_char,
    callback: Option<FfiCallback>,
    user_data: *mut c_void,
) -> u64 {
    catch_unwind(AssertUnwindSafe(|| {
        clear_last_error();
        if dispatcher.is_null() {
            set_last_error("null argument: dispatcher");
            return 0;
        }
        let Some(callback) = callback else {
            set_last_error("null argument: callback");
            return 0;
        };
        let dispatcher = unsafe { &*dispatcher };
        let descriptor = match parse_descriptor(descriptor_json) {
            Ok(d) => d,
            Err((_, msg)) => {
                set_last_error(msg);
                return 0;
            }
        };

        let user_data = UserData(user_data);
        let id_slot = Arc::new(OnceLock::new());
        let id = id_slot.clone();
        let result = dispatcher.inner.dispatch_async(descriptor, move |outcome| {
            let user_data = user_data;
            let id = id.get().copied().unwrap_or(0);
            callback(id, FfiOutcome::from_outcome(outcome), user_data.0);
        });
        match result {
            Ok(handle) => {
                let _ = id_slot.set(handle.id().0);
                handle.id().0
            }
            Err(e) => {
                set_last_error(e.to_string());
                0
            }
        }
    }))
    .unwrap_or_else(|_| {
        set_last_error("panic in td_dispatch_async");
        0
    })
}

/// Execute `descriptor_json` on the calling thread.
///
/// Never returns null. The caller must free the result with
/// `td_free_outcome`.
#[unsafe(no_mangle)]
pub extern "C" fn td_dispatch_sync(
    dispatcher: *const FfiDispatcher,
    descriptor_json: *const c_char,
) -> *mut FfiOutcome {
    catch_unwind(AssertUnwindSafe(|| {
        if dispatcher.is_null() {
            return FfiOutcome::null_arg("dispatcher");
        }
        let dispatcher = unsafe { &*dispatcher };
        match parse_descriptor(descriptor_json) {
            Ok(descriptor) => FfiOutcome::from_result(dispatcher.inner.dispatch_sync(&descriptor)),
            Err((code, msg)) => FfiOutcome::error(code, &msg),
        }
    }))
    .unwrap_or_else(|_| FfiOutcome::error(FfiErrorCode::Panic, "panic in td_dispatch_sync"))
}

// ---------------------------------------------------------------------------
// Cancellation and delivery
// ---------------------------------------------------------------------------

/// Cancel every active call tagged `tag`. Returns how many were cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn td_cancel(dispatcher: *const FfiDispatcher, tag: *const c_char) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        let Some(tag) = str_arg(tag) else {
            return 0;
        };
        if dispatcher.is_null() {
            return 0;
        }
        let dispatcher = unsafe { &*dispatcher };
        dispatcher.inner.cancel(&Tag::new(tag)) as u32
    }))
    .unwrap_or(0)
}

/// Cancel every active call. Returns how many were cancelled.
#[unsafe(no_mangle)]
pub extern "C" fn td_cancel_all(dispatcher: *const FfiDispatcher) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if dispatcher.is_null() {
            return 0;
        }
        let dispatcher = unsafe { &*dispatcher };
        dispatcher.inner.cancel_all() as u32
    }))
    .unwrap_or(0)
}

/// Run every completed callback on the calling thread, without blocking.
/// Returns how many callbacks ran.
#[unsafe(no_mangle)]
pub extern "C" fn td_poll(dispatcher: *const FfiDispatcher) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if dispatcher.is_null() {
            return 0;
        }
        let dispatcher = unsafe { &*dispatcher };
        dispatcher.event_loop.run_pending() as u32
    }))
    .unwrap_or_else(|_| {
        log::error!("panic while delivering callbacks");
        0
    })
}

/// Active calls under `tag`, or across all tags when `tag` is null.
#[unsafe(no_mangle)]
pub extern "C" fn td_active_count(dispatcher: *const FfiDispatcher, tag: *const c_char) -> u32 {
    catch_unwind(AssertUnwindSafe(|| {
        if dispatcher.is_null() {
            return 0;
        }
        let dispatcher = unsafe { &*dispatcher };
        let count = match str_arg(tag) {
            Some(tag) => dispatcher.inner.active_calls(&Tag::new(tag)),
            None => dispatcher.inner.active_count(),
        };
        count as u32
    }))
    .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// Errors and free functions
// ---------------------------------------------------------------------------

/// Message of the last failure on this thread, or null if there was none.
/// The caller must free the returned string with `td_free_string`.
#[unsafe(no_mangle)]
pub extern "C" fn td_last_error() -> *mut c_char {
    catch_unwind(|| {
        LAST_ERROR.with(|slot| match slot.borrow().as_deref() {
            Some(msg) => c_string(msg),
            None => std::ptr::null_mut(),
        })
    })
    .unwrap_or(std::ptr::null_mut())
}

/// Free an `FfiOutcome` from `td_dispatch_sync` or a callback. Safe to call
/// with null.
#[unsafe(no_mangle)]
pub extern "C" fn td_free_outcome(outcome: *mut FfiOutcome) {
    if outcome.is_null() {
        return;
    }
    let _ = catch_unwind(|| {
        let outcome = unsafe { Box::from_raw(outcome) };
        if !outcome.error_message.is_null() {
            drop(unsafe { CString::from_raw(outcome.error_message) });
        }
        if !outcome.file_path.is_null() {
            drop(unsafe { CString::from_raw(outcome.file_path) });
        }
        if !outcome.payload.is_null() {
            let slice = std::ptr::slice_from_raw_parts_mut(outcome.payload, outcome.payload_len);
            drop(unsafe { Box::from_raw(slice) });
        }
    });
}

/// Free a C string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn td_free_string(s: *mut c_char) {
    if !s.is_null() {
        let _ = catch_unwind(|| {
            drop(unsafe { CString::from_raw(s) });
        });
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
