//! Path monitor entry points.

use std::ffi::{c_int, c_void};
use std::sync::Arc;

use transport_services::PathMonitor;

use crate::error::{
    TAPS_ERR_INVALID_ARGUMENT, TAPS_ERR_PANIC, TAPS_OK, fail, fail_with, guard, set_last_error,
};
use crate::handles::{self, MonitorKey, TapsHandle};
use crate::types::{self, FreeError, OwnedChangeEvent, TapsChangeCallback, TapsInterface, UserData};

const TARGET: &str = "transport_services_ffi";

/// Register an already-built monitor and return its handle.
///
/// For Rust hosts that embed the C API and want to supply their own
/// interface source.
pub fn register_path_monitor(monitor: PathMonitor) -> TapsHandle {
    let key = handles::registry().monitors.insert(Arc::new(monitor));
    handles::to_handle(key)
}

fn monitor(handle: TapsHandle) -> Result<Arc<PathMonitor>, c_int> {
    handles::with(|r| &mut r.monitors, "path monitor", handle, |m| Arc::clone(m))
}

/// Create a monitor over the host's interfaces. Returns `0` on failure.
#[unsafe(no_mangle)]
pub extern "C" fn taps_path_monitor_create() -> TapsHandle {
    guard(0, || match PathMonitor::new() {
        Ok(monitor) => register_path_monitor(monitor),
        Err(e) => {
            fail(e);
            0
        }
    })
}

/// Destroy a monitor, stopping any active watch first.
#[unsafe(no_mangle)]
pub extern "C" fn taps_path_monitor_destroy(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        match handles::take(|r| &mut r.monitors, "path monitor", handle) {
            Ok(monitor) => {
                // Other entry points may still hold a reference.
                monitor.stop_watching();
                drop(monitor);
                TAPS_OK
            }
            Err(status) => status,
        }
    })
}

/// Enumerate interfaces into a newly allocated array.
///
/// On success `*out_array` holds `*out_count` entries, or null when there are
/// none. Release the array with `taps_path_monitor_free_interfaces`.
///
/// # Safety
///
/// `out_array` and `out_count` must be valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_path_monitor_list_interfaces(
    handle: TapsHandle,
    out_array: *mut *mut TapsInterface,
    out_count: *mut usize,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        if out_array.is_null() || out_count.is_null() {
            return fail_with(TAPS_ERR_INVALID_ARGUMENT, "output pointers must not be null");
        }
        let monitor = match monitor(handle) {
            Ok(monitor) => monitor,
            Err(status) => return status,
        };
        let interfaces = match monitor.list_interfaces() {
            Ok(interfaces) => interfaces,
            Err(e) => return fail(e),
        };

        let (array, count) = types::alloc_interfaces(&interfaces);
        // SAFETY: both pointers were checked non-null and the caller
        // guarantees they are writable.
        unsafe {
            *out_array = array;
            *out_count = count;
        }
        TAPS_OK
    })
}

/// Free an array returned by `taps_path_monitor_list_interfaces`.
///
/// Null or zero-length input is ignored. Freeing an unknown or already freed
/// array does nothing and sets the last error.
///
/// # Safety
///
/// `array` must be null or a pointer previously returned through
/// `taps_path_monitor_list_interfaces`; it is never dereferenced otherwise.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_path_monitor_free_interfaces(array: *mut TapsInterface, count: usize) {
    guard((), || {
        if array.is_null() || count == 0 {
            return;
        }
        match types::free_interfaces(array, count) {
            Ok(()) => {}
            Err(FreeError::Unknown) => {
                tracing::warn!(target: TARGET, "Ignoring free of unknown interface array {:p}", array);
                set_last_error(format!("unknown or already freed interface array {array:p}"));
            }
            Err(FreeError::CountMismatch { expected }) => {
                set_last_error(format!(
                    "interface array {array:p} holds {expected} entries, not {count}"
                ));
            }
        }
    })
}

/// Start watching for interface changes. Returns a watcher handle, or `0`.
///
/// `callback` runs on a library-owned thread, one event at a time. The event
/// and everything it points to are valid only during the call.
///
/// # Safety
///
/// `user_data` must remain valid, and usable from another thread, until the
/// watch is stopped.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_path_monitor_start_watching(
    handle: TapsHandle,
    callback: TapsChangeCallback,
    user_data: *mut c_void,
) -> TapsHandle {
    guard(0, || {
        let Some(callback) = callback else {
            fail_with(TAPS_ERR_INVALID_ARGUMENT, "callback must not be null");
            return 0;
        };
        let monitor = match monitor(handle) {
            Ok(monitor) => monitor,
            Err(_) => return 0,
        };

        let user_data = UserData::new(user_data);
        let watch = monitor.start_watching(move |event| {
            let event = OwnedChangeEvent::new(event);
            // SAFETY: the event outlives the call; validity of the callback
            // and user data is the caller's contract.
            unsafe { callback(event.as_ptr(), user_data.get()) };
        });
        match watch {
            Ok(watcher) => {
                let mut registry = handles::registry();
                let live = handles::from_handle::<MonitorKey>(handle)
                    .is_some_and(|key| registry.monitors.contains_key(key));
                if !live {
                    // Destroyed while the watch was starting.
                    drop(registry);
                    watcher.stop();
                    handles::invalid("path monitor", handle);
                    return 0;
                }
                let key = registry.watchers.insert(watcher);
                handles::to_handle(key)
            }
            Err(e) => {
                fail(e);
                0
            }
        }
    })
}

/// Stop a watch and release its handle.
///
/// Once this returns no further callbacks run. Safe to call from inside the
/// callback. The handle is released by the first call, so stopping it again
/// returns `TAPS_ERR_INVALID_HANDLE` and sets the last error.
#[unsafe(no_mangle)]
pub extern "C" fn taps_path_monitor_stop_watching(watcher: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        match handles::take(|r| &mut r.watchers, "watcher", watcher) {
            Ok(watcher) => {
                watcher.stop();
                TAPS_OK
            }
            Err(status) => status,
        }
    })
}
