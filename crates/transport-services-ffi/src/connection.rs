//! Connection entry points.
//!
//! Every call blocks the calling thread on the shared runtime, so none may be
//! made from a thread that is already driving a tokio runtime.

use std::ffi::c_int;
use std::sync::Arc;

use transport_services::{Connection, ReceiveError};

use crate::error::{
    TAPS_ERR_INVALID_ARGUMENT, TAPS_ERR_PANIC, TAPS_ERR_RUNTIME, TAPS_OK, fail, fail_with, guard,
};
use crate::handles::{self, TapsHandle};
use crate::runtime;
use crate::types;

const TARGET: &str = "transport_services_ffi";

fn connection(handle: TapsHandle) -> Result<Arc<Connection>, c_int> {
    handles::with(|r| &mut r.connections, "connection", handle, |c| Arc::clone(c))
}

fn runtime_error(e: std::io::Error) -> c_int {
    fail_with(TAPS_ERR_RUNTIME, format!("failed to start runtime: {e}"))
}

/// Establish a connection from a preconnection. Returns `0` on failure.
///
/// Blocks until a candidate wins the race or establishment fails. The
/// preconnection is left untouched and may be reused.
#[unsafe(no_mangle)]
pub extern "C" fn taps_connection_initiate(preconnection: TapsHandle) -> TapsHandle {
    guard(0, || {
        let Ok(preconnection) = handles::with(
            |r| &mut r.preconnections,
            "preconnection",
            preconnection,
            |p| p.clone(),
        ) else {
            return 0;
        };
        let handle = match runtime::ensure() {
            Ok(handle) => handle,
            Err(e) => {
                runtime_error(e);
                return 0;
            }
        };
        let engine = match runtime::engine(&handle) {
            Ok(engine) => engine,
            Err(e) => {
                fail(e);
                return 0;
            }
        };

        match runtime::block_on(engine.establish(&preconnection)) {
            Ok(Ok(connection)) => {
                tracing::debug!(target: TARGET, "Initiated {}", connection.id());
                let key = handles::registry().connections.insert(Arc::new(connection));
                handles::to_handle(key)
            }
            Ok(Err(e)) => {
                fail(e);
                0
            }
            Err(e) => {
                runtime_error(e);
                0
            }
        }
    })
}

/// Send `len` bytes. Returns `TAPS_OK` once they were handed to the transport.
///
/// # Safety
///
/// `bytes` must be valid for reads of `len` bytes; it may be null only when
/// `len` is zero.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_connection_send(
    handle: TapsHandle,
    bytes: *const u8,
    len: usize,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        if bytes.is_null() && len > 0 {
            return fail_with(TAPS_ERR_INVALID_ARGUMENT, "bytes must not be null");
        }
        let connection = match connection(handle) {
            Ok(connection) => connection,
            Err(status) => return status,
        };
        let data: &[u8] = if len == 0 {
            &[]
        } else {
            // SAFETY: non-null and readable for `len` bytes per the contract.
            unsafe { std::slice::from_raw_parts(bytes, len) }
        };

        match runtime::block_on(connection.send(data)) {
            Ok(Ok(())) => TAPS_OK,
            Ok(Err(e)) => fail(e),
            Err(e) => runtime_error(e),
        }
    })
}

/// Receive up to `capacity` bytes into `buffer`.
///
/// Returns the number of bytes written, `0` once the peer closed its side,
/// or a negative status.
///
/// # Safety
///
/// `buffer` must be valid for writes of `capacity` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_connection_receive(
    handle: TapsHandle,
    buffer: *mut u8,
    capacity: usize,
) -> isize {
    guard(TAPS_ERR_PANIC as isize, || {
        if buffer.is_null() || capacity == 0 {
            return fail(ReceiveError::EmptyBuffer) as isize;
        }
        let connection = match connection(handle) {
            Ok(connection) => connection,
            Err(status) => return status as isize,
        };
        let data = match runtime::block_on(connection.receive(capacity)) {
            Ok(Ok(data)) => data,
            Ok(Err(e)) => return fail(e) as isize,
            Err(e) => return runtime_error(e) as isize,
        };

        let count = data.len().min(capacity);
        // SAFETY: `buffer` holds at least `capacity >= count` bytes and cannot
        // overlap the freshly allocated `data`.
        unsafe { std::ptr::copy_nonoverlapping(data.as_ptr(), buffer, count) };
        count as isize
    })
}

/// Close the connection gracefully.
#[unsafe(no_mangle)]
pub extern "C" fn taps_connection_close(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        let connection = match connection(handle) {
            Ok(connection) => connection,
            Err(status) => return status,
        };
        match runtime::block_on(connection.close()) {
            Ok(Ok(())) => TAPS_OK,
            Ok(Err(e)) => fail(e),
            Err(e) => runtime_error(e),
        }
    })
}

/// Current state as a `TapsConnectionState` value, or a negative status.
#[unsafe(no_mangle)]
pub extern "C" fn taps_connection_state(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || match connection(handle) {
        Ok(connection) => types::state_code(connection.state()),
        Err(status) => status,
    })
}

/// Release the connection handle, aborting the connection if still open.
#[unsafe(no_mangle)]
pub extern "C" fn taps_connection_free(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        match handles::take(|r| &mut r.connections, "connection", handle) {
            Ok(connection) => {
                // Wakes calls still blocked on this connection in other threads.
                connection.abort();
                TAPS_OK
            }
            Err(status) => status,
        }
    })
}
