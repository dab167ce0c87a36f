//! `#[repr(C)]` types shared with C callers.

use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::sync::LazyLock;

use parking_lot::Mutex;
use transport_services::{
    ChangeEvent, ConnectionState, InterfaceKind, InterfaceSnapshot, InterfaceStatus,
};

/// Interface status.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapsInterfaceStatus {
    Up = 0,
    Down = 1,
    Unknown = 2,
}

impl From<InterfaceStatus> for TapsInterfaceStatus {
    fn from(status: InterfaceStatus) -> Self {
        match status {
            InterfaceStatus::Up => TapsInterfaceStatus::Up,
            InterfaceStatus::Down => TapsInterfaceStatus::Down,
            InterfaceStatus::Unknown => TapsInterfaceStatus::Unknown,
        }
    }
}

/// Kind of a [`TapsChangeEvent`].
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapsChangeEventType {
    Added = 0,
    Removed = 1,
    Modified = 2,
    PathChanged = 3,
}

/// Connection state as returned by `taps_connection_state`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapsConnectionState {
    Establishing = 0,
    Established = 1,
    Closing = 2,
    Closed = 3,
    Failed = 4,
}

impl From<ConnectionState> for TapsConnectionState {
    fn from(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Establishing => TapsConnectionState::Establishing,
            ConnectionState::Established => TapsConnectionState::Established,
            ConnectionState::Closing => TapsConnectionState::Closing,
            ConnectionState::Closed => TapsConnectionState::Closed,
            ConnectionState::Failed => TapsConnectionState::Failed,
        }
    }
}

/// One network interface.
///
/// All strings are NUL-terminated and owned by the library.
#[repr(C)]
#[derive(Debug)]
pub struct TapsInterface {
    pub name: *const c_char,
    pub index: u32,
    /// Textual addresses, `address_count` entries.
    pub addresses: *const *const c_char,
    pub address_count: usize,
    pub status: TapsInterfaceStatus,
    /// Static kind tag such as `"wifi"`; never freed.
    pub kind: *const c_char,
    pub is_expensive: bool,
}

/// A change event delivered to a watch callback.
///
/// Valid only for the duration of the callback. `interface` is null for
/// `PathChanged`; `old_interface` is set only for `Modified`; `description`
/// is always set.
#[repr(C)]
#[derive(Debug)]
pub struct TapsChangeEvent {
    pub event_type: TapsChangeEventType,
    pub interface: *const TapsInterface,
    pub old_interface: *const TapsInterface,
    pub description: *const c_char,
}

/// Watch callback.
pub type TapsChangeCallback =
    Option<unsafe extern "C" fn(event: *const TapsChangeEvent, user_data: *mut c_void)>;

/// Opaque caller context handed back to a callback.
pub(crate) struct UserData(*mut c_void);

// SAFETY: the library never dereferences the pointer; the caller promises
// it may be used from the watch thread.
unsafe impl Send for UserData {}

impl UserData {
    pub(crate) fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub(crate) fn get(&self) -> *mut c_void {
        self.0
    }
}

pub(crate) fn to_cstring(s: &str) -> CString {
    CString::new(s.replace('\0', "")).unwrap_or_default()
}

fn kind_tag(kind: InterfaceKind) -> &'static CStr {
    match kind {
        InterfaceKind::Wired => c"wired",
        InterfaceKind::Wifi => c"wifi",
        InterfaceKind::Cellular => c"cellular",
        InterfaceKind::Loopback => c"loopback",
        InterfaceKind::Virtual => c"virtual",
        InterfaceKind::Unknown => c"unknown",
    }
}

/// A [`TapsInterface`] together with the strings it points into.
///
/// The heap buffers behind `CString` and the boxed pointer slice do not move
/// when this struct moves, so `raw` stays valid for the struct's lifetime.
pub(crate) struct OwnedInterface {
    _name: CString,
    _addresses: Vec<CString>,
    _address_ptrs: Box<[*const c_char]>,
    raw: TapsInterface,
}

impl OwnedInterface {
    pub(crate) fn new(iface: &InterfaceSnapshot) -> Self {
        let name = to_cstring(iface.name());
        let addresses: Vec<CString> = iface
            .addresses()
            .iter()
            .map(|addr| to_cstring(&addr.to_string()))
            .collect();
        let address_ptrs: Box<[*const c_char]> = addresses.iter().map(|a| a.as_ptr()).collect();
        let raw = TapsInterface {
            name: name.as_ptr(),
            index: iface.index(),
            addresses: if address_ptrs.is_empty() {
                std::ptr::null()
            } else {
                address_ptrs.as_ptr()
            },
            address_count: address_ptrs.len(),
            status: iface.status().into(),
            kind: kind_tag(iface.kind()).as_ptr(),
            is_expensive: iface.is_expensive(),
        };
        Self {
            _name: name,
            _addresses: addresses,
            _address_ptrs: address_ptrs,
            raw,
        }
    }

    /// A shallow copy of the C view.
    fn view(&self) -> TapsInterface {
        TapsInterface {
            name: self.raw.name,
            index: self.raw.index,
            addresses: self.raw.addresses,
            address_count: self.raw.address_count,
            status: self.raw.status,
            kind: self.raw.kind,
            is_expensive: self.raw.is_expensive,
        }
    }

    pub(crate) fn as_ptr(&self) -> *const TapsInterface {
        &self.raw
    }
}

/// Storage behind a [`TapsChangeEvent`] for the duration of one callback.
pub(crate) struct OwnedChangeEvent {
    _interface: Option<Box<OwnedInterface>>,
    _old_interface: Option<Box<OwnedInterface>>,
    _description: CString,
    raw: TapsChangeEvent,
}

impl OwnedChangeEvent {
    pub(crate) fn new(event: &ChangeEvent) -> Self {
        let (event_type, interface, old_interface) = match event {
            ChangeEvent::Added(iface) => (TapsChangeEventType::Added, Some(iface), None),
            ChangeEvent::Removed(iface) => (TapsChangeEventType::Removed, Some(iface), None),
            ChangeEvent::Modified { old, new } => {
                (TapsChangeEventType::Modified, Some(new), Some(old))
            }
            ChangeEvent::PathChanged { .. } => (TapsChangeEventType::PathChanged, None, None),
        };
        let interface = interface.map(|iface| Box::new(OwnedInterface::new(iface)));
        let old_interface = old_interface.map(|iface| Box::new(OwnedInterface::new(iface)));
        let description = to_cstring(&event.to_string());
        let raw = TapsChangeEvent {
            event_type,
            interface: interface.as_ref().map_or(std::ptr::null(), |i| i.as_ptr()),
            old_interface: old_interface
                .as_ref()
                .map_or(std::ptr::null(), |i| i.as_ptr()),
            description: description.as_ptr(),
        };
        Self {
            _interface: interface,
            _old_interface: old_interface,
            _description: description,
            raw,
        }
    }

    pub(crate) fn as_ptr(&self) -> *const TapsChangeEvent {
        &self.raw
    }
}

/// An interface array handed out by `taps_path_monitor_list_interfaces`.
struct InterfaceArray {
    _owned: Vec<OwnedInterface>,
    raw: Box<[TapsInterface]>,
}

// SAFETY: the raw pointers only point into buffers owned by the same value,
// which never shares them.
unsafe impl Send for InterfaceArray {}

/// Live interface arrays keyed by base address.
static ARRAYS: LazyLock<Mutex<HashMap<usize, InterfaceArray>>> =
    LazyLock::new(Mutex::default);

/// Allocate a C array for `interfaces`; null when empty.
pub(crate) fn alloc_interfaces(interfaces: &[InterfaceSnapshot]) -> (*mut TapsInterface, usize) {
    if interfaces.is_empty() {
        return (std::ptr::null_mut(), 0);
    }
    let owned: Vec<OwnedInterface> = interfaces.iter().map(OwnedInterface::new).collect();
    let mut raw: Box<[TapsInterface]> = owned.iter().map(OwnedInterface::view).collect();
    let ptr = raw.as_mut_ptr();
    let count = raw.len();
    ARRAYS.lock().insert(
        ptr as usize,
        InterfaceArray {
            _owned: owned,
            raw,
        },
    );
    (ptr, count)
}

/// Why an array could not be freed.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FreeError {
    Unknown,
    CountMismatch { expected: usize },
}

/// Release an array previously returned by [`alloc_interfaces`].
pub(crate) fn free_interfaces(ptr: *mut TapsInterface, count: usize) -> Result<(), FreeError> {
    let mut arrays = ARRAYS.lock();
    let key = ptr as usize;
    let expected = arrays.get(&key).map(|array| array.raw.len()).ok_or(FreeError::Unknown)?;
    if expected != count {
        return Err(FreeError::CountMismatch { expected });
    }
    let array = arrays.remove(&key);
    drop(arrays);
    drop(array);
    Ok(())
}

pub(crate) fn state_code(state: ConnectionState) -> c_int {
    TapsConnectionState::from(state) as c_int
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;

    fn wlan() -> InterfaceSnapshot {
        InterfaceSnapshot::builder(3, "wlan0")
            .address(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
            .status(InterfaceStatus::Up)
            .kind(InterfaceKind::Wifi)
            .build()
    }

    #[test]
    fn test_owned_interface_strings() {
        let owned = OwnedInterface::new(&wlan());
        let raw = unsafe { &*owned.as_ptr() };
        assert_eq!(raw.index, 3);
        assert_eq!(raw.status, TapsInterfaceStatus::Up);
        assert_eq!(raw.address_count, 1);
        unsafe {
            assert_eq!(CStr::from_ptr(raw.name).to_str().unwrap(), "wlan0");
            assert_eq!(CStr::from_ptr(raw.kind).to_str().unwrap(), "wifi");
            let first = *raw.addresses;
            assert_eq!(CStr::from_ptr(first).to_str().unwrap(), "192.168.1.20");
        }
    }

    #[test]
    fn test_change_event_layout() {
        let old = wlan();
        let new = InterfaceSnapshot::builder(3, "wlan0")
            .status(InterfaceStatus::Down)
            .kind(InterfaceKind::Wifi)
            .build();
        let event = OwnedChangeEvent::new(&ChangeEvent::Modified { old, new });
        let raw = unsafe { &*event.as_ptr() };
        assert_eq!(raw.event_type, TapsChangeEventType::Modified);
        assert!(!raw.interface.is_null());
        assert!(!raw.old_interface.is_null());
        unsafe {
            assert_eq!((*raw.interface).status, TapsInterfaceStatus::Down);
            assert!((*raw.interface).addresses.is_null());
            assert_eq!((*raw.old_interface).address_count, 1);
        }

        let moved = OwnedChangeEvent::new(&ChangeEvent::PathChanged {
            description: "eth0 -> wlan0".into(),
        });
        let raw = unsafe { &*moved.as_ptr() };
        assert_eq!(raw.event_type, TapsChangeEventType::PathChanged);
        assert!(raw.interface.is_null());
        assert!(!raw.description.is_null());
    }

    #[test]
    fn test_free_interfaces_once() {
        let (ptr, count) = alloc_interfaces(&[wlan()]);
        assert_eq!(count, 1);
        assert_eq!(free_interfaces(ptr, 2), Err(FreeError::CountMismatch { expected: 1 }));
        assert_eq!(free_interfaces(ptr, count), Ok(()));
        assert_eq!(free_interfaces(ptr, count), Err(FreeError::Unknown));
    }
}
