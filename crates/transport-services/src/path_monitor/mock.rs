//! A scriptable interface source for tests.

use std::sync::Arc;

use parking_lot::Mutex;

use super::interface::InterfaceSnapshot;
use super::source::{DefaultRoute, InterfaceSource, NotificationGuard, WakeFn};
use crate::error::PathMonitorError;

/// In-memory [`InterfaceSource`] whose state is set by the test.
///
/// Every mutation notifies subscribed watch loops, so tests observe
/// changes without waiting for a poll.
#[derive(Clone, Default)]
pub struct MockInterfaceSource {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    interfaces: Vec<InterfaceSnapshot>,
    default_route: Option<DefaultRoute>,
    fail_next: Option<String>,
    reads: usize,
    wakers: Vec<(u64, Arc<WakeFn>)>,
    next_waker: u64,
}

impl MockInterfaceSource {
    /// Create a source that reports `interfaces`.
    pub fn new(interfaces: Vec<InterfaceSnapshot>) -> Self {
        let source = Self::default();
        source.state.lock().interfaces = interfaces;
        source
    }

    /// Replace the full interface list.
    pub fn set_interfaces(&self, interfaces: Vec<InterfaceSnapshot>) {
        self.state.lock().interfaces = interfaces;
        self.notify();
    }

    /// Insert an interface, replacing any entry with the same index.
    pub fn upsert(&self, iface: InterfaceSnapshot) {
        {
            let mut state = self.state.lock();
            match state.interfaces.iter_mut().find(|i| i.index() == iface.index()) {
                Some(existing) => *existing = iface,
                None => state.interfaces.push(iface),
            }
        }
        self.notify();
    }

    /// Remove the interface with `index`.
    pub fn remove(&self, index: u32) {
        self.state.lock().interfaces.retain(|i| i.index() != index);
        self.notify();
    }

    /// Set the reported default route.
    pub fn set_default_route(&self, route: Option<DefaultRoute>) {
        self.state.lock().default_route = route;
        self.notify();
    }

    /// Make the next read fail with a platform error.
    pub fn fail_next_read(&self, message: impl Into<String>) {
        self.state.lock().fail_next = Some(message.into());
    }

    /// Number of successful reads so far.
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    /// Number of live notification subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().wakers.len()
    }

    fn notify(&self) {
        let wakers: Vec<Arc<WakeFn>> = self
            .state
            .lock()
            .wakers
            .iter()
            .map(|(_, wake)| Arc::clone(wake))
            .collect();
        for wake in wakers {
            (**wake)();
        }
    }
}

impl InterfaceSource for MockInterfaceSource {
    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, PathMonitorError> {
        let mut state = self.state.lock();
        if let Some(message) = state.fail_next.take() {
            return Err(PathMonitorError::Platform(message));
        }
        state.reads += 1;
        Ok(state.interfaces.clone())
    }

    fn default_route(&self) -> Option<DefaultRoute> {
        self.state.lock().default_route.clone()
    }

    fn subscribe(&self, wake: WakeFn) -> Result<Option<NotificationGuard>, PathMonitorError> {
        let id = {
            let mut state = self.state.lock();
            let id = state.next_waker;
            state.next_waker += 1;
            state.wakers.push((id, Arc::new(wake)));
            id
        };
        Ok(Some(NotificationGuard::new(Subscription {
            id,
            state: Arc::clone(&self.state),
        })))
    }
}

struct Subscription {
    id: u64,
    state: Arc<Mutex<MockState>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.state.lock().wakers.retain(|(id, _)| *id != self.id);
    }
}
