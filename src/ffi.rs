//! C-compatible FFI boundary.
//!
//! A minimal handle-based interface a game-server host (or any other
//! `cdylib` consumer) drives directly: open a pipeline against a config
//! document and a callback function pointer, dispatch `(command, args)`
//! pairs into it, close it on shutdown. Outbound events (`:EXT:READY:`,
//! `:STORAGE:OK:`, `:MISSION:OK:`, ...) are delivered back through the
//! callback rather than polled.
//!
//! The API follows the same status-code pattern as the rest of this
//! interface family: `0` indicates success, negative numbers indicate
//! errors.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_int, c_void};
use std::ptr;
use std::sync::Arc;

use crate::error::IngestError;
use crate::lifecycle::{CallbackSink, Lifecycle};
use crate::Config;

const OCAP_OK: c_int = 0;
const OCAP_ERR_INVALID_ARGUMENT: c_int = -1;
const OCAP_ERR_OPERATION_FAILED: c_int = -2;
const OCAP_ERR_CONFIG: c_int = -3;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(err: &IngestError) {
    LAST_ERROR.with(|slot| {
        *slot.borrow_mut() = CString::new(err.to_string()).ok();
    });
}

/// A host-supplied callback invoked for every outbound event. `name` and
/// `payload` are borrowed for the duration of the call only; the host must
/// copy anything it needs to keep.
pub type CallbackFn =
    extern "C" fn(name: *const c_char, payload: *const c_char, user_data: *mut c_void);

struct FfiCallbackSink {
    callback: CallbackFn,
    user_data: usize,
}

// The host's function pointer and opaque data are treated as an opaque,
// host-owned token; the host is responsible for it being safe to invoke
// from the dispatcher's consumer threads.
unsafe impl Send for FfiCallbackSink {}
unsafe impl Sync for FfiCallbackSink {}

impl CallbackSink for FfiCallbackSink {
    fn emit(&self, name: &str, payload: &str) {
        let Ok(name_c) = CString::new(name) else {
            return;
        };
        let Ok(payload_c) = CString::new(payload) else {
            return;
        };
        (self.callback)(
            name_c.as_ptr(),
            payload_c.as_ptr(),
            self.user_data as *mut c_void,
        );
    }
}

/// Opaque handle exposed to C callers.
#[repr(C)]
pub struct IngestHandle {
    lifecycle: Arc<Lifecycle>,
}

/// # Safety
/// `config_json` may be null (defaults are used) or must point to a valid,
/// null-terminated UTF-8 string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ocap_ingest_open(
    config_json: *const c_char,
    callback: CallbackFn,
    user_data: *mut c_void,
) -> *mut IngestHandle {
    let config = if config_json.is_null() {
        Config::default()
    } else {
        let Ok(raw) = (unsafe { CStr::from_ptr(config_json) }.to_str()) else {
            return ptr::null_mut();
        };
        match Config::from_json(raw) {
            Ok(cfg) => cfg,
            Err(e) => {
                set_last_error(&e);
                return ptr::null_mut();
            }
        }
    };

    let sink = Arc::new(FfiCallbackSink {
        callback,
        user_data: user_data as usize,
    });

    match Lifecycle::new(config, sink) {
        Ok(lifecycle) => Box::into_raw(Box::new(IngestHandle { lifecycle })),
        Err(e) => {
            set_last_error(&e);
            ptr::null_mut()
        }
    }
}

/// # Safety
/// `handle` must be a valid pointer obtained from [`ocap_ingest_open`], not
/// yet closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ocap_ingest_close(handle: *mut IngestHandle) {
    if handle.is_null() {
        return;
    }
    let boxed = unsafe { Box::from_raw(handle) };
    if let Err(e) = boxed.lifecycle.shutdown() {
        set_last_error(&e);
    }
}

/// Dispatches one command. `args_json` is a JSON array of strings (the
/// command's positional argument vector); an empty array is encoded as
/// `"[]"` or a null pointer.
///
/// # Safety
/// `handle` must be valid. `command` must be a null-terminated UTF-8
/// string. `args_json`, if non-null, must be a null-terminated UTF-8
/// string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ocap_ingest_dispatch(
    handle: *mut IngestHandle,
    command: *const c_char,
    args_json: *const c_char,
) -> c_int {
    if handle.is_null() || command.is_null() {
        return OCAP_ERR_INVALID_ARGUMENT;
    }

    let handle = unsafe { &*handle };
    let Ok(command_str) = (unsafe { CStr::from_ptr(command) }.to_str()) else {
        return OCAP_ERR_INVALID_ARGUMENT;
    };

    let args: Vec<String> = if args_json.is_null() {
        Vec::new()
    } else {
        let Ok(raw) = (unsafe { CStr::from_ptr(args_json) }.to_str()) else {
            return OCAP_ERR_INVALID_ARGUMENT;
        };
        match serde_json::from_str(raw) {
            Ok(v) => v,
            Err(_) => return OCAP_ERR_INVALID_ARGUMENT,
        }
    };

    match handle.lifecycle.dispatcher().dispatch(command_str, args) {
        Ok(()) => OCAP_OK,
        Err(e) => {
            let code = match e {
                IngestError::ConfigError(_) => OCAP_ERR_CONFIG,
                _ => OCAP_ERR_OPERATION_FAILED,
            };
            set_last_error(&e);
            code
        }
    }
}

/// Writes the most recent error message (on the calling thread) into
/// `*message_out`. The pointer is valid until the next FFI call on this
/// thread; the host must copy it if it needs to persist.
///
/// # Safety
/// `message_out` must be a valid pointer to receive the message pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ocap_ingest_last_error_message(
    message_out: *mut *const c_char,
) -> c_int {
    if message_out.is_null() {
        return OCAP_ERR_INVALID_ARGUMENT;
    }
    LAST_ERROR.with(|slot| {
        let ptr_value = slot
            .borrow()
            .as_ref()
            .map(|s| s.as_ptr())
            .unwrap_or(ptr::null());
        unsafe {
            *message_out = ptr_value;
        }
    });
    OCAP_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    static CALLBACK_COUNT: AtomicUsize = AtomicUsize::new(0);
    static LAST_EVENT: OnceLock<std::sync::Mutex<String>> = OnceLock::new();

    extern "C" fn recording_callback(
        name: *const c_char,
        _payload: *const c_char,
        _user_data: *mut c_void,
    ) {
        CALLBACK_COUNT.fetch_add(1, Ordering::Relaxed);
        let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        *LAST_EVENT
            .get_or_init(|| std::sync::Mutex::new(String::new()))
            .lock()
            .unwrap() = name;
    }

    #[test]
    fn open_dispatch_close_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = serde_json::json!({
            "storage": { "type": "memory", "sqlite": { "addon_dir": dir.path() } }
        });
        let config_c = CString::new(config.to_string()).unwrap();

        let handle = unsafe {
            ocap_ingest_open(config_c.as_ptr(), recording_callback, ptr::null_mut())
        };
        assert!(!handle.is_null());

        let version_cmd = CString::new(":VERSION:").unwrap();
        let status = unsafe { ocap_ingest_dispatch(handle, version_cmd.as_ptr(), ptr::null()) };
        assert_eq!(status, OCAP_OK);

        let unknown_cmd = CString::new(":NOPE:").unwrap();
        let status = unsafe { ocap_ingest_dispatch(handle, unknown_cmd.as_ptr(), ptr::null()) };
        assert_eq!(status, OCAP_ERR_OPERATION_FAILED);

        unsafe { ocap_ingest_close(handle) };
        assert!(CALLBACK_COUNT.load(Ordering::Relaxed) >= 1);
    }
}
