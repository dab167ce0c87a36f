//! Preconnection and remote endpoint entry points.
//!
//! Remote endpoints are configured through their own handles and copied into
//! a preconnection by `taps_preconnection_add_remote_endpoint`; the endpoint
//! handle stays valid and must still be freed.

use std::ffi::{CStr, c_char, c_int};
use std::net::IpAddr;

use transport_services::{Preconnection, RemoteEndpoint, SecurityParameters};

use crate::error::{TAPS_ERR_INVALID_ARGUMENT, TAPS_ERR_PANIC, TAPS_OK, fail_with, guard};
use crate::handles::{self, TapsHandle};

/// Read a required UTF-8 string argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string.
unsafe fn read_str<'a>(ptr: *const c_char, what: &str) -> Result<&'a str, c_int> {
    if ptr.is_null() {
        return Err(fail_with(TAPS_ERR_INVALID_ARGUMENT, format!("{what} must not be null")));
    }
    // SAFETY: non-null and NUL-terminated per the caller's contract.
    let s = unsafe { CStr::from_ptr(ptr) };
    s.to_str()
        .map_err(|_| fail_with(TAPS_ERR_INVALID_ARGUMENT, format!("{what} is not valid UTF-8")))
}

fn update_endpoint(handle: TapsHandle, f: impl FnOnce(RemoteEndpoint) -> RemoteEndpoint) -> c_int {
    let updated = handles::with(|r| &mut r.endpoints, "remote endpoint", handle, |endpoint| {
        *endpoint = f(std::mem::take(endpoint));
    });
    match updated {
        Ok(()) => TAPS_OK,
        Err(status) => status,
    }
}

fn status_of(result: Result<(), c_int>) -> c_int {
    result.err().unwrap_or(TAPS_OK)
}

/// Create an empty preconnection.
#[unsafe(no_mangle)]
pub extern "C" fn taps_preconnection_create() -> TapsHandle {
    guard(0, || {
        let key = handles::registry().preconnections.insert(Preconnection::new());
        handles::to_handle(key)
    })
}

/// Free a preconnection.
#[unsafe(no_mangle)]
pub extern "C" fn taps_preconnection_free(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        status_of(handles::take(|r| &mut r.preconnections, "preconnection", handle).map(drop))
    })
}

/// Create an empty remote endpoint.
#[unsafe(no_mangle)]
pub extern "C" fn taps_remote_endpoint_create() -> TapsHandle {
    guard(0, || {
        let key = handles::registry().endpoints.insert(RemoteEndpoint::new());
        handles::to_handle(key)
    })
}

/// Free a remote endpoint.
#[unsafe(no_mangle)]
pub extern "C" fn taps_remote_endpoint_free(handle: TapsHandle) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        status_of(handles::take(|r| &mut r.endpoints, "remote endpoint", handle).map(drop))
    })
}

/// Set the endpoint's hostname.
///
/// # Safety
///
/// `hostname` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_remote_endpoint_with_hostname(
    handle: TapsHandle,
    hostname: *const c_char,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        // SAFETY: forwarded caller contract.
        let hostname = match unsafe { read_str(hostname, "hostname") } {
            Ok(hostname) if !hostname.is_empty() => hostname.to_string(),
            Ok(_) => return fail_with(TAPS_ERR_INVALID_ARGUMENT, "hostname must not be empty"),
            Err(status) => return status,
        };
        update_endpoint(handle, |endpoint| endpoint.with_hostname(hostname))
    })
}

/// Set the endpoint's port.
#[unsafe(no_mangle)]
pub extern "C" fn taps_remote_endpoint_with_port(handle: TapsHandle, port: u16) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        update_endpoint(handle, |endpoint| endpoint.with_port(port))
    })
}

/// Set the endpoint's service name, such as `"https"`.
///
/// # Safety
///
/// `service` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_remote_endpoint_with_service(
    handle: TapsHandle,
    service: *const c_char,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        // SAFETY: forwarded caller contract.
        let service = match unsafe { read_str(service, "service") } {
            Ok(service) => service.to_string(),
            Err(status) => return status,
        };
        update_endpoint(handle, |endpoint| endpoint.with_service(service))
    })
}

/// Set the endpoint's IP address from its textual form.
///
/// # Safety
///
/// `address` must be null or a NUL-terminated string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn taps_remote_endpoint_with_address(
    handle: TapsHandle,
    address: *const c_char,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        // SAFETY: forwarded caller contract.
        let text = match unsafe { read_str(address, "address") } {
            Ok(text) => text,
            Err(status) => return status,
        };
        let Ok(ip) = text.parse::<IpAddr>() else {
            return fail_with(
                TAPS_ERR_INVALID_ARGUMENT,
                format!("invalid IP address: {text}"),
            );
        };
        update_endpoint(handle, |endpoint| endpoint.with_address(ip))
    })
}

/// Copy a remote endpoint into a preconnection.
#[unsafe(no_mangle)]
pub extern "C" fn taps_preconnection_add_remote_endpoint(
    preconnection: TapsHandle,
    endpoint: TapsHandle,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        let endpoint = match handles::with(|r| &mut r.endpoints, "remote endpoint", endpoint, |e| {
            e.clone()
        }) {
            Ok(endpoint) => endpoint,
            Err(status) => return status,
        };
        status_of(handles::with(
            |r| &mut r.preconnections,
            "preconnection",
            preconnection,
            |p| p.add_remote(endpoint),
        ))
    })
}

/// Disable TLS, or restore the default security parameters.
#[unsafe(no_mangle)]
pub extern "C" fn taps_preconnection_set_security_disabled(
    preconnection: TapsHandle,
    disabled: bool,
) -> c_int {
    guard(TAPS_ERR_PANIC, || {
        let security = if disabled {
            SecurityParameters::disabled()
        } else {
            SecurityParameters::new()
        };
        status_of(handles::with(
            |r| &mut r.preconnections,
            "preconnection",
            preconnection,
            |p| p.set_security_parameters(security),
        ))
    })
}
