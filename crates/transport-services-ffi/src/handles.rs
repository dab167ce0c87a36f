//! Integer handles over slotmap tables.
//!
//! Every object handed to C lives in one global [`Registry`]. A handle is the
//! FFI form of a slotmap key, so a freed or reused slot is detected by its
//! version instead of being dereferenced. Values are always removed under the
//! lock and dropped after it is released: dropping a watcher or connection
//! may block, and must not hold up unrelated entry points.

use std::ffi::c_int;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, MutexGuard};
use slotmap::{Key, KeyData, SlotMap, new_key_type};
use transport_services::{Connection, PathMonitor, Preconnection, RemoteEndpoint, Watcher};

use crate::error::{TAPS_ERR_INVALID_HANDLE, fail_with};

/// Opaque handle passed across the C boundary; `0` is null.
pub type TapsHandle = u64;

new_key_type! {
    pub(crate) struct MonitorKey;
    pub(crate) struct WatcherKey;
    pub(crate) struct PreconnectionKey;
    pub(crate) struct EndpointKey;
    pub(crate) struct ConnectionKey;
}

#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) monitors: SlotMap<MonitorKey, Arc<PathMonitor>>,
    pub(crate) watchers: SlotMap<WatcherKey, Watcher>,
    pub(crate) preconnections: SlotMap<PreconnectionKey, Preconnection>,
    pub(crate) endpoints: SlotMap<EndpointKey, RemoteEndpoint>,
    pub(crate) connections: SlotMap<ConnectionKey, Arc<Connection>>,
}

/// Everything taken out of a cleared registry, dropped by the caller.
pub(crate) type Drained = (
    Vec<Arc<PathMonitor>>,
    Vec<Watcher>,
    Vec<Arc<Connection>>,
);

impl Registry {
    /// Empty every table, returning the values that need an explicit drop.
    pub(crate) fn drain(&mut self) -> Drained {
        self.preconnections.clear();
        self.endpoints.clear();
        (
            self.monitors.drain().map(|(_, v)| v).collect(),
            self.watchers.drain().map(|(_, v)| v).collect(),
            self.connections.drain().map(|(_, v)| v).collect(),
        )
    }
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(Mutex::default);

pub(crate) fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock()
}

pub(crate) fn to_handle<K: Key>(key: K) -> TapsHandle {
    key.data().as_ffi()
}

pub(crate) fn from_handle<K: Key + From<KeyData>>(handle: TapsHandle) -> Option<K> {
    (handle != 0).then(|| KeyData::from_ffi(handle).into())
}

/// Record an invalid-handle error for `handle` of the given kind.
pub(crate) fn invalid(kind: &str, handle: TapsHandle) -> c_int {
    fail_with(
        TAPS_ERR_INVALID_HANDLE,
        format!("invalid {kind} handle {handle:#x}"),
    )
}

/// Look up `handle` in `table` and run `f` on the value.
pub(crate) fn with<K, V, R>(
    table: impl FnOnce(&mut Registry) -> &mut SlotMap<K, V>,
    kind: &str,
    handle: TapsHandle,
    f: impl FnOnce(&mut V) -> R,
) -> Result<R, c_int>
where
    K: Key + From<KeyData>,
{
    let mut registry = registry();
    let value = from_handle::<K>(handle).and_then(|key| table(&mut registry).get_mut(key));
    match value {
        Some(value) => Ok(f(value)),
        None => Err(invalid(kind, handle)),
    }
}

/// Remove `handle` from `table`, returning the value for the caller to drop.
pub(crate) fn take<K, V>(
    table: impl FnOnce(&mut Registry) -> &mut SlotMap<K, V>,
    kind: &str,
    handle: TapsHandle,
) -> Result<V, c_int>
where
    K: Key + From<KeyData>,
{
    let removed = {
        let mut registry = registry();
        from_handle::<K>(handle).and_then(|key| table(&mut registry).remove(key))
    };
    removed.ok_or_else(|| invalid(kind, handle))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_detect_reuse() {
        let mut table: SlotMap<EndpointKey, u32> = SlotMap::with_key();
        let first = table.insert(1);
        let handle = to_handle(first);
        assert_ne!(handle, 0);
        table.remove(first);
        let second = table.insert(2);

        let stale = from_handle::<EndpointKey>(handle).unwrap();
        assert!(table.get(stale).is_none());
        assert_eq!(table.get(second), Some(&2));
    }

    #[test]
    fn test_null_handle() {
        assert!(from_handle::<ConnectionKey>(0).is_none());
    }
}
