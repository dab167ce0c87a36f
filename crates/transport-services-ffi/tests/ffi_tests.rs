//! C ABI tests, calling the exported functions directly.

use std::ffi::{CStr, CString, c_int, c_void};
use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpListener};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;

use transport_services::path_monitor::mock::MockInterfaceSource;
use transport_services::PathMonitorError;
use transport_services::path_monitor::{
    DefaultRoute, InterfaceKind, InterfaceSnapshot, InterfaceSource, InterfaceStatus,
    MonitorConfig, NotificationGuard, PathMonitor, WakeFn,
};
use transport_services_ffi::*;

const WAIT: Duration = Duration::from_secs(3);

fn last_error() -> Option<String> {
    let message = taps_get_last_error();
    (!message.is_null())
        .then(|| unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned())
}

fn iface(index: u32, name: &str) -> InterfaceSnapshot {
    InterfaceSnapshot::builder(index, name)
        .address(Ipv4Addr::new(10, 0, index as u8, 1))
        .status(InterfaceStatus::Up)
        .kind(InterfaceKind::from_name(name))
        .build()
}

fn mock_monitor(source: &MockInterfaceSource) -> TapsHandle {
    register_path_monitor(
        PathMonitor::with_source(source.clone())
            .with_config(MonitorConfig::new().poll_interval(Duration::from_millis(100))),
    )
}

fn c(s: &str) -> CString {
    CString::new(s).unwrap()
}

#[test]
fn test_version_and_init() {
    let version = unsafe { CStr::from_ptr(taps_version()) };
    assert_eq!(version.to_str().unwrap(), env!("CARGO_PKG_VERSION"));

    assert_eq!(taps_init(), TAPS_OK);
    assert_eq!(taps_init(), TAPS_OK);
}

#[test]
fn test_stale_handles_fail_cleanly() {
    let endpoint = taps_remote_endpoint_create();
    assert_ne!(endpoint, 0);
    assert_eq!(taps_remote_endpoint_free(endpoint), TAPS_OK);

    taps_clear_last_error();
    assert_eq!(taps_remote_endpoint_free(endpoint), TAPS_ERR_INVALID_HANDLE);
    assert!(last_error().unwrap().contains("remote endpoint"));
    assert_eq!(taps_remote_endpoint_with_port(endpoint, 80), TAPS_ERR_INVALID_HANDLE);

    assert_eq!(taps_preconnection_free(0), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_path_monitor_destroy(0), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_path_monitor_stop_watching(0), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_connection_state(0), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_connection_close(u64::MAX), TAPS_ERR_INVALID_HANDLE);
    assert_eq!(taps_connection_initiate(0), 0);
}

#[test]
fn test_invalid_arguments() {
    let endpoint = taps_remote_endpoint_create();
    let bad = c("not-an-ip");
    assert_eq!(
        unsafe { taps_remote_endpoint_with_address(endpoint, bad.as_ptr()) },
        TAPS_ERR_INVALID_ARGUMENT
    );
    assert!(last_error().unwrap().contains("not-an-ip"));
    assert_eq!(
        unsafe { taps_remote_endpoint_with_hostname(endpoint, ptr::null()) },
        TAPS_ERR_INVALID_ARGUMENT
    );
    let empty = c("");
    assert_eq!(
        unsafe { taps_remote_endpoint_with_hostname(endpoint, empty.as_ptr()) },
        TAPS_ERR_INVALID_ARGUMENT
    );
    let good = c("192.0.2.1");
    assert_eq!(unsafe { taps_remote_endpoint_with_address(endpoint, good.as_ptr()) }, TAPS_OK);
    assert_eq!(taps_remote_endpoint_free(endpoint), TAPS_OK);

    assert_eq!(
        unsafe { taps_connection_receive(1, ptr::null_mut(), 16) },
        TAPS_ERR_INVALID_ARGUMENT as isize
    );
    assert_eq!(
        unsafe { taps_connection_send(1, ptr::null(), 4) },
        TAPS_ERR_INVALID_ARGUMENT
    );
    assert_eq!(
        unsafe { taps_path_monitor_start_watching(1, None, ptr::null_mut()) },
        0
    );
}

#[test]
fn test_list_and_free_interfaces() {
    let source = MockInterfaceSource::new(vec![iface(1, "lo"), iface(2, "wlan0")]);
    let monitor = mock_monitor(&source);

    let mut array: *mut TapsInterface = ptr::null_mut();
    let mut count = 0usize;
    let status = unsafe { taps_path_monitor_list_interfaces(monitor, &mut array, &mut count) };
    assert_eq!(status, TAPS_OK);
    assert_eq!(count, 2);

    let interfaces = unsafe { std::slice::from_raw_parts(array, count) };
    let wlan = &interfaces[1];
    assert_eq!(wlan.index, 2);
    assert_eq!(wlan.status, TapsInterfaceStatus::Up);
    assert_eq!(wlan.address_count, 1);
    unsafe {
        assert_eq!(CStr::from_ptr(wlan.name).to_str().unwrap(), "wlan0");
        assert_eq!(CStr::from_ptr(wlan.kind).to_str().unwrap(), "wifi");
        assert_eq!(CStr::from_ptr(*wlan.addresses).to_str().unwrap(), "10.0.2.1");
    }

    taps_clear_last_error();
    unsafe { taps_path_monitor_free_interfaces(array, count) };
    assert!(last_error().is_none());

    // A second free is ignored and reported.
    unsafe { taps_path_monitor_free_interfaces(array, count) };
    assert!(last_error().unwrap().contains("already freed"));

    taps_clear_last_error();
    unsafe { taps_path_monitor_free_interfaces(ptr::null_mut(), 0) };
    assert!(last_error().is_none());

    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
    let status = unsafe { taps_path_monitor_list_interfaces(monitor, &mut array, &mut count) };
    assert_eq!(status, TAPS_ERR_INVALID_HANDLE);
}

#[test]
fn test_list_interfaces_read_failure() {
    let source = MockInterfaceSource::new(vec![iface(1, "lo")]);
    let monitor = mock_monitor(&source);
    source.fail_next_read("permission denied");

    let mut array: *mut TapsInterface = ptr::null_mut();
    let mut count = 0usize;
    let status = unsafe { taps_path_monitor_list_interfaces(monitor, &mut array, &mut count) };
    assert_eq!(status, TAPS_ERR_IO);
    assert!(array.is_null());
    assert!(last_error().unwrap().contains("permission denied"));

    let status =
        unsafe { taps_path_monitor_list_interfaces(monitor, ptr::null_mut(), &mut count) };
    assert_eq!(status, TAPS_ERR_INVALID_ARGUMENT);
    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
}

type Events = mpsc::Sender<(TapsChangeEventType, String)>;

unsafe extern "C" fn record_event(event: *const TapsChangeEvent, user_data: *mut c_void) {
    let events = unsafe { &*(user_data as *const Events) };
    let event = unsafe { &*event };
    let name = if event.interface.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr((*event.interface).name) }
            .to_string_lossy()
            .into_owned()
    };
    let _ = events.send((event.event_type, name));
}

#[test]
fn test_watch_delivers_events() {
    let source = MockInterfaceSource::new(vec![iface(1, "lo")]);
    let monitor = mock_monitor(&source);
    let (tx, rx) = mpsc::channel();

    let watcher = unsafe {
        taps_path_monitor_start_watching(monitor, Some(record_event), &tx as *const Events as *mut c_void)
    };
    assert_ne!(watcher, 0);

    // One watch per monitor.
    let second = unsafe {
        taps_path_monitor_start_watching(monitor, Some(record_event), &tx as *const Events as *mut c_void)
    };
    assert_eq!(second, 0);
    assert!(last_error().unwrap().contains("already"));

    source.upsert(iface(3, "eth0"));
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (TapsChangeEventType::Added, "eth0".to_string())
    );
    source.remove(3);
    assert_eq!(
        rx.recv_timeout(WAIT).unwrap(),
        (TapsChangeEventType::Removed, "eth0".to_string())
    );

    assert_eq!(taps_path_monitor_stop_watching(watcher), TAPS_OK);
    assert_eq!(taps_path_monitor_stop_watching(watcher), TAPS_ERR_INVALID_HANDLE);
    assert!(last_error().unwrap().contains("invalid watcher handle"));

    source.upsert(iface(4, "eth1"));
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());
    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
}

struct StopOnFirst {
    watcher: AtomicU64,
    calls: AtomicUsize,
    done: mpsc::Sender<c_int>,
}

unsafe extern "C" fn stop_on_first(_event: *const TapsChangeEvent, user_data: *mut c_void) {
    let state = unsafe { &*(user_data as *const StopOnFirst) };
    state.calls.fetch_add(1, Ordering::SeqCst);
    let watcher = state.watcher.swap(0, Ordering::SeqCst);
    if watcher != 0 {
        let _ = state.done.send(taps_path_monitor_stop_watching(watcher));
    }
}

#[test]
fn test_stop_watching_from_callback() {
    let source = MockInterfaceSource::new(vec![iface(1, "lo")]);
    let monitor = mock_monitor(&source);
    let (done_tx, done_rx) = mpsc::channel();
    let state = StopOnFirst {
        watcher: AtomicU64::new(0),
        calls: AtomicUsize::new(0),
        done: done_tx,
    };

    let watcher = unsafe {
        taps_path_monitor_start_watching(
            monitor,
            Some(stop_on_first),
            &state as *const StopOnFirst as *mut c_void,
        )
    };
    assert_ne!(watcher, 0);
    state.watcher.store(watcher, Ordering::SeqCst);

    source.upsert(iface(2, "eth0"));
    let status = done_rx.recv_timeout(WAIT).expect("callback did not stop the watch");
    assert_eq!(status, TAPS_OK);

    source.upsert(iface(3, "eth1"));
    thread::sleep(Duration::from_millis(400));
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
}

#[test]
fn test_destroy_stops_active_watch() {
    let source = MockInterfaceSource::new(vec![iface(1, "lo")]);
    let monitor = mock_monitor(&source);
    let (tx, rx) = mpsc::channel();

    let watcher = unsafe {
        taps_path_monitor_start_watching(monitor, Some(record_event), &tx as *const Events as *mut c_void)
    };
    assert_ne!(watcher, 0);
    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
    assert_eq!(source.subscriber_count(), 0);

    source.upsert(iface(2, "eth0"));
    assert!(rx.recv_timeout(Duration::from_millis(400)).is_err());

    // The watcher handle is still released normally.
    assert_eq!(taps_path_monitor_stop_watching(watcher), TAPS_OK);
}

/// Mock source whose next listing stalls, keeping a monitor reference
/// alive inside `taps_path_monitor_list_interfaces`.
#[derive(Clone)]
struct StallingSource {
    inner: MockInterfaceSource,
    stall_next: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
}

impl InterfaceSource for StallingSource {
    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, PathMonitorError> {
        if self.stall_next.swap(false, Ordering::SeqCst) {
            self.stalled.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(800));
        }
        self.inner.interfaces()
    }

    fn default_route(&self) -> Option<DefaultRoute> {
        self.inner.default_route()
    }

    fn subscribe(&self, wake: WakeFn) -> Result<Option<NotificationGuard>, PathMonitorError> {
        self.inner.subscribe(wake)
    }
}

#[test]
fn test_destroy_stops_watch_while_listing_is_in_flight() {
    let source = StallingSource {
        inner: MockInterfaceSource::new(vec![iface(1, "lo")]),
        stall_next: Arc::new(AtomicBool::new(false)),
        stalled: Arc::new(AtomicBool::new(false)),
    };
    // Only mutations wake the watch loop, so the stall hits the listing.
    let monitor = register_path_monitor(
        PathMonitor::with_source(source.clone())
            .with_config(MonitorConfig::new().poll_interval(Duration::from_secs(10))),
    );
    let (tx, rx) = mpsc::channel();
    let watcher = unsafe {
        taps_path_monitor_start_watching(monitor, Some(record_event), &tx as *const Events as *mut c_void)
    };
    assert_ne!(watcher, 0);

    source.stall_next.store(true, Ordering::SeqCst);
    let lister = thread::spawn(move || {
        let mut array: *mut TapsInterface = ptr::null_mut();
        let mut count = 0usize;
        let status = unsafe { taps_path_monitor_list_interfaces(monitor, &mut array, &mut count) };
        unsafe { taps_path_monitor_free_interfaces(array, count) };
        status
    });
    let started = std::time::Instant::now();
    while !source.stalled.load(Ordering::SeqCst) {
        assert!(started.elapsed() < WAIT, "listing never started");
        thread::sleep(Duration::from_millis(5));
    }

    assert_eq!(taps_path_monitor_destroy(monitor), TAPS_OK);
    assert_eq!(source.inner.subscriber_count(), 0);

    source.inner.upsert(iface(7, "eth7"));
    assert!(
        rx.recv_timeout(Duration::from_millis(400)).is_err(),
        "callback ran after destroy returned"
    );

    assert_eq!(lister.join().unwrap(), TAPS_OK);
    assert_eq!(taps_path_monitor_stop_watching(watcher), TAPS_OK);
}

fn echo_server() -> u16 {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0u8; 64];
        loop {
            match stream.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if stream.write_all(&buf[..n]).is_err() {
                        break;
                    }
                }
            }
        }
    });
    port
}

fn tcp_preconnection(port: u16) -> TapsHandle {
    let preconnection = taps_preconnection_create();
    let endpoint = taps_remote_endpoint_create();
    let address = c("127.0.0.1");
    assert_eq!(unsafe { taps_remote_endpoint_with_address(endpoint, address.as_ptr()) }, TAPS_OK);
    assert_eq!(taps_remote_endpoint_with_port(endpoint, port), TAPS_OK);
    assert_eq!(taps_preconnection_add_remote_endpoint(preconnection, endpoint), TAPS_OK);
    assert_eq!(taps_remote_endpoint_free(endpoint), TAPS_OK);
    assert_eq!(taps_preconnection_set_security_disabled(preconnection, true), TAPS_OK);
    preconnection
}

#[test]
fn test_connection_round_trip() {
    let port = echo_server();
    let preconnection = tcp_preconnection(port);

    let connection = taps_connection_initiate(preconnection);
    assert_ne!(connection, 0, "{:?}", last_error());
    assert_eq!(taps_preconnection_free(preconnection), TAPS_OK);
    assert_eq!(
        taps_connection_state(connection),
        TapsConnectionState::Established as c_int
    );

    let message = b"hello";
    assert_eq!(
        unsafe { taps_connection_send(connection, message.as_ptr(), message.len()) },
        TAPS_OK
    );
    let mut buf = [0u8; 16];
    let mut received = Vec::new();
    while received.len() < message.len() {
        let n = unsafe { taps_connection_receive(connection, buf.as_mut_ptr(), buf.len()) };
        assert!(n > 0, "receive returned {n}");
        received.extend_from_slice(&buf[..n as usize]);
    }
    assert_eq!(received, message);

    assert_eq!(taps_connection_close(connection), TAPS_OK);
    assert_eq!(taps_connection_close(connection), TAPS_ERR_ALREADY_CLOSED);
    assert_eq!(taps_connection_state(connection), TapsConnectionState::Closed as c_int);
    assert_eq!(
        unsafe { taps_connection_send(connection, message.as_ptr(), message.len()) },
        TAPS_ERR_CLOSED
    );

    assert_eq!(taps_connection_free(connection), TAPS_OK);
    assert_eq!(taps_connection_state(connection), TAPS_ERR_INVALID_HANDLE);
}

#[test]
fn test_receive_reports_orderly_close() {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        drop(stream);
    });

    let preconnection = tcp_preconnection(port);
    let connection = taps_connection_initiate(preconnection);
    assert_ne!(connection, 0, "{:?}", last_error());
    server.join().unwrap();

    let mut buf = [0u8; 8];
    assert_eq!(
        unsafe { taps_connection_receive(connection, buf.as_mut_ptr(), buf.len()) },
        0
    );
    assert_eq!(taps_connection_state(connection), TapsConnectionState::Closing as c_int);
    assert_eq!(taps_connection_free(connection), TAPS_OK);
    assert_eq!(taps_preconnection_free(preconnection), TAPS_OK);
}

#[test]
fn test_initiate_failures() {
    let empty = taps_preconnection_create();
    taps_clear_last_error();
    assert_eq!(taps_connection_initiate(empty), 0);
    assert!(last_error().is_some());
    assert_eq!(taps_preconnection_free(empty), TAPS_OK);

    // Nothing listens on the port once the listener is gone.
    let port = {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        listener.local_addr().unwrap().port()
    };
    let refused = tcp_preconnection(port);
    taps_clear_last_error();
    assert_eq!(taps_connection_initiate(refused), 0);
    assert!(last_error().is_some());
    assert_eq!(taps_preconnection_free(refused), TAPS_OK);
}
