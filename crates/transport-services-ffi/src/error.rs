//! Status codes and the per-thread last-error message.

use std::cell::RefCell;
use std::ffi::{CString, c_char, c_int};
use std::fmt::Display;
use std::panic::{AssertUnwindSafe, catch_unwind};

use transport_services::{
    CloseError, Error, EstablishmentError, PathMonitorError, ReceiveError, SendError,
};

const TARGET: &str = "transport_services_ffi";

/// Success.
pub const TAPS_OK: c_int = 0;
/// A pointer, length or value argument was invalid.
pub const TAPS_ERR_INVALID_ARGUMENT: c_int = -1;
/// The handle is null, stale or of the wrong kind.
pub const TAPS_ERR_INVALID_HANDLE: c_int = -2;
/// The OS interface enumeration could not be initialized.
pub const TAPS_ERR_INIT: c_int = -3;
/// The monitor already has an active watch.
pub const TAPS_ERR_ALREADY_WATCHING: c_int = -4;
/// Name resolution failed.
pub const TAPS_ERR_RESOLUTION: c_int = -5;
/// Every candidate failed, or security setup failed.
pub const TAPS_ERR_ESTABLISHMENT: c_int = -6;
/// The connection is not established yet.
pub const TAPS_ERR_NOT_ESTABLISHED: c_int = -7;
/// The connection is closing or closed.
pub const TAPS_ERR_CLOSED: c_int = -8;
/// A transport I/O error occurred.
pub const TAPS_ERR_IO: c_int = -9;
/// The connection was already closed.
pub const TAPS_ERR_ALREADY_CLOSED: c_int = -10;
/// The async runtime could not be started.
pub const TAPS_ERR_RUNTIME: c_int = -11;
/// A panic was caught at the boundary.
pub const TAPS_ERR_PANIC: c_int = -99;

thread_local! {
    // Thread-local so concurrent callers never read each other's errors.
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

pub(crate) fn set_last_error(message: impl Display) {
    let message = message.to_string();
    tracing::debug!(target: TARGET, "Last error: {}", message);
    let message = CString::new(message.replace('\0', "")).unwrap_or_default();
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(message));
}

/// Record `message` and return `status`.
pub(crate) fn fail_with(status: c_int, message: impl Display) -> c_int {
    set_last_error(message);
    status
}

/// Record `error` and return its status code.
pub(crate) fn fail(error: impl Into<Error>) -> c_int {
    let error = error.into();
    let status = status_for(&error);
    fail_with(status, error)
}

pub(crate) fn status_for(error: &Error) -> c_int {
    match error {
        Error::PathMonitor(PathMonitorError::Init(_)) => TAPS_ERR_INIT,
        Error::PathMonitor(PathMonitorError::AlreadyWatching) => TAPS_ERR_ALREADY_WATCHING,
        Error::PathMonitor(PathMonitorError::Platform(_)) => TAPS_ERR_IO,
        Error::Resolution(_) => TAPS_ERR_RESOLUTION,
        Error::Establishment(EstablishmentError::InvalidParameters(_)) => {
            TAPS_ERR_INVALID_ARGUMENT
        }
        Error::Establishment(EstablishmentError::Resolution(_)) => TAPS_ERR_RESOLUTION,
        Error::Establishment(_) => TAPS_ERR_ESTABLISHMENT,
        Error::Send(SendError::NotEstablished) | Error::Receive(ReceiveError::NotEstablished) => {
            TAPS_ERR_NOT_ESTABLISHED
        }
        Error::Send(SendError::Closed) | Error::Receive(ReceiveError::Closed) => TAPS_ERR_CLOSED,
        Error::Send(SendError::Io(_)) | Error::Receive(ReceiveError::Io(_)) => TAPS_ERR_IO,
        Error::Receive(ReceiveError::EmptyBuffer) => TAPS_ERR_INVALID_ARGUMENT,
        Error::Close(CloseError::AlreadyClosed) => TAPS_ERR_ALREADY_CLOSED,
    }
}

/// Run `body`, turning a panic into `fallback` plus a last-error message.
pub(crate) fn guard<T>(fallback: T, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            let detail = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(target: TARGET, "Panic at FFI boundary: {}", detail);
            set_last_error(format!("internal panic: {detail}"));
            fallback
        }
    }
}

/// The last error message set on this thread, or null.
///
/// The pointer stays valid until the next failing call on this thread or
/// `taps_clear_last_error`.
#[unsafe(no_mangle)]
pub extern "C" fn taps_get_last_error() -> *const c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

/// Clear this thread's last error message.
#[unsafe(no_mangle)]
pub extern "C" fn taps_clear_last_error() {
    LAST_ERROR.with(|slot| *slot.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use std::ffi::CStr;

    use super::*;

    #[test]
    fn test_last_error_round_trip() {
        taps_clear_last_error();
        assert!(taps_get_last_error().is_null());

        assert_eq!(fail_with(TAPS_ERR_INVALID_ARGUMENT, "bad\0input"), TAPS_ERR_INVALID_ARGUMENT);
        let message = unsafe { CStr::from_ptr(taps_get_last_error()) };
        assert_eq!(message.to_str().unwrap(), "badinput");

        taps_clear_last_error();
        assert!(taps_get_last_error().is_null());
    }

    #[test]
    fn test_last_error_is_per_thread() {
        fail_with(TAPS_ERR_IO, "main thread");
        std::thread::spawn(|| assert!(taps_get_last_error().is_null()))
            .join()
            .unwrap();
        assert!(!taps_get_last_error().is_null());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(fail(CloseError::AlreadyClosed), TAPS_ERR_ALREADY_CLOSED);
        assert_eq!(fail(PathMonitorError::AlreadyWatching), TAPS_ERR_ALREADY_WATCHING);
        assert_eq!(fail(SendError::Closed), TAPS_ERR_CLOSED);
        assert_eq!(
            fail(EstablishmentError::AllFailed(Vec::new())),
            TAPS_ERR_ESTABLISHMENT
        );
        // What a resolver that cannot be configured reports from initiate.
        let unconfigured = transport_services::ResolutionError::new(
            "resolver configuration",
            "cannot build resolver",
        );
        assert_eq!(
            fail(EstablishmentError::Resolution(unconfigured)),
            TAPS_ERR_RESOLUTION
        );
    }

    #[test]
    fn test_guard_catches_panics() {
        let status = guard(TAPS_ERR_PANIC, || -> c_int { panic!("boom") });
        assert_eq!(status, TAPS_ERR_PANIC);
        let message = unsafe { CStr::from_ptr(taps_get_last_error()) };
        assert!(message.to_str().unwrap().contains("boom"));
    }
}
