//! C ABI for `transport-services`.
//!
//! Objects are exposed as opaque `u64` handles; `0` is the null handle.
//! Fallible calls return a negative `TAPS_ERR_*` status (or a null handle)
//! and record a message retrievable with [`taps_get_last_error`] on the
//! same thread. No call unwinds into C.
//!
//! ```c
//! taps_init();
//! uint64_t pre = taps_preconnection_create();
//! uint64_t ep = taps_remote_endpoint_create();
//! taps_remote_endpoint_with_hostname(ep, "example.com");
//! taps_remote_endpoint_with_port(ep, 443);
//! taps_preconnection_add_remote_endpoint(pre, ep);
//! uint64_t conn = taps_connection_initiate(pre);
//! if (conn == 0) {
//!     fprintf(stderr, "%s\n", taps_get_last_error());
//! }
//! ```
//!
//! The runtime starts lazily on first use, so `taps_init` is only needed to
//! enable logging early.

mod connection;
mod error;
mod handles;
mod path_monitor;
mod preconnection;
mod runtime;
mod types;

use std::ffi::{c_char, c_int};

pub use connection::{
    taps_connection_close, taps_connection_free, taps_connection_initiate, taps_connection_receive,
    taps_connection_send, taps_connection_state,
};
pub use error::{
    TAPS_ERR_ALREADY_CLOSED, TAPS_ERR_ALREADY_WATCHING, TAPS_ERR_CLOSED, TAPS_ERR_ESTABLISHMENT,
    TAPS_ERR_INIT, TAPS_ERR_INVALID_ARGUMENT, TAPS_ERR_INVALID_HANDLE, TAPS_ERR_IO,
    TAPS_ERR_NOT_ESTABLISHED, TAPS_ERR_PANIC, TAPS_ERR_RESOLUTION, TAPS_ERR_RUNTIME, TAPS_OK,
    taps_clear_last_error, taps_get_last_error,
};
pub use handles::TapsHandle;
pub use path_monitor::{
    register_path_monitor, taps_path_monitor_create, taps_path_monitor_destroy,
    taps_path_monitor_free_interfaces, taps_path_monitor_list_interfaces,
    taps_path_monitor_start_watching, taps_path_monitor_stop_watching,
};
pub use preconnection::{
    taps_preconnection_add_remote_endpoint, taps_preconnection_create, taps_preconnection_free,
    taps_preconnection_set_security_disabled, taps_remote_endpoint_create,
    taps_remote_endpoint_free, taps_remote_endpoint_with_address,
    taps_remote_endpoint_with_hostname, taps_remote_endpoint_with_port,
    taps_remote_endpoint_with_service,
};
pub use types::{
    TapsChangeCallback, TapsChangeEvent, TapsChangeEventType, TapsConnectionState, TapsInterface,
    TapsInterfaceStatus,
};

const TARGET: &str = "transport_services_ffi";

/// Install logging and start the runtime.
///
/// Logging goes to stderr, filtered by the `TAPS_LOG` environment variable
/// (`warn` when unset). A subscriber installed earlier by the host wins.
#[unsafe(no_mangle)]
pub extern "C" fn taps_init() -> c_int {
    error::guard(TAPS_ERR_PANIC, || {
        let filter = tracing_subscriber::EnvFilter::try_from_env("TAPS_LOG")
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();

        match runtime::ensure() {
            Ok(_) => {
                tracing::info!(target: TARGET, "transport-services {} initialized", env!("CARGO_PKG_VERSION"));
                TAPS_OK
            }
            Err(e) => error::fail_with(TAPS_ERR_RUNTIME, format!("failed to start runtime: {e}")),
        }
    })
}

/// Release every handle and stop the runtime.
///
/// Handles created before this call are invalid afterwards. The library
/// can be used again; the next call starts a fresh runtime.
#[unsafe(no_mangle)]
pub extern "C" fn taps_cleanup() {
    error::guard((), || {
        let drained = handles::registry().drain();
        let (monitors, watchers, connections) = drained;
        for connection in &connections {
            connection.abort();
        }
        drop(watchers);
        for monitor in &monitors {
            monitor.stop_watching();
        }
        drop(monitors);
        drop(connections);
        runtime::shutdown();
        tracing::debug!(target: TARGET, "Cleaned up");
    })
}

/// The library version as a static NUL-terminated string.
#[unsafe(no_mangle)]
pub extern "C" fn taps_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr().cast()
}
