//! `taps_cleanup` resets global state, so it gets its own test binary.

use std::ffi::c_void;
use std::ptr;
use std::time::Duration;

use transport_services::path_monitor::mock::MockInterfaceSource;
use transport_services::path_monitor::{InterfaceSnapshot, MonitorConfig, PathMonitor};
use transport_services_ffi::*;

unsafe extern "C" fn ignore(_event: *const TapsChangeEvent, _user_data: *mut c_void) {}

#[test]
fn test_cleanup_invalidates_handles_and_allows_reuse() {
    assert_eq!(taps_init(), TAPS_OK);

    let source = MockInterfaceSource::new(vec![InterfaceSnapshot::builder(1, "lo").build()]);
    let monitor = register_path_monitor(
        PathMonitor::with_source(source.clone())
            .with_config(MonitorConfig::new().poll_interval(Duration::from_millis(100))),
    );
    let watcher = unsafe { taps_path_monitor_start_watching(monitor, Some(ignore), ptr::null_mut()) };
    assert_ne!(watcher, 0);
    let preconnection = taps_preconnection_create();
    let endpoint = taps_remote_endpoint_create();

    taps_cleanup();

    assert_eq!(source.subscriber_count(), 0);
    assert_eq!(taps_path_monitor_stop_watching(watcher), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_preconnection_free(preconnection), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_remote_endpoint_free(endpoint), TAPS_ERR_INVALID_HANDLE);

    // A second cleanup is harmless, and the library starts over afterwards.
    taps_cleanup();
    assert_eq!(taps_init(), TAPS_OK);
    let fresh = taps_preconnection_create();
    assert_ne!(fresh, 0);
    assert_eq!(taps_preconnection_free(fresh), TAPS_OK);
}
