//! The path monitor and its watch loop.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use super::diff::{ChangeEvent, diff};
use super::interface::{InterfaceKind, InterfaceSnapshot};
use super::source::{InterfaceSource, NotificationGuard, PathSnapshot, SystemInterfaces};
use crate::error::PathMonitorError;

const TARGET: &str = "transport_services::path_monitor";

/// Lower bound for the poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Configuration for a [`PathMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Time between snapshots when no OS notification arrives.
    pub poll_interval: Duration,
    /// Let OS change notifications trigger an immediate snapshot.
    pub use_os_notifications: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            use_os_notifications: true,
        }
    }
}

impl MonitorConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the poll interval. Values below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Enable or disable OS change notifications.
    pub fn os_notifications(mut self, enabled: bool) -> Self {
        self.use_os_notifications = enabled;
        self
    }

    fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.max(MIN_POLL_INTERVAL)
    }
}

/// Preferences for [`PathMonitor::select_path`].
#[derive(Debug, Clone)]
pub struct PathPreferences {
    /// Interface kinds in order of preference; unlisted kinds rank last.
    pub preferred_kinds: Vec<InterfaceKind>,
    /// Rank expensive interfaces after all others.
    pub avoid_expensive: bool,
}

impl Default for PathPreferences {
    fn default() -> Self {
        Self {
            preferred_kinds: vec![InterfaceKind::Wired, InterfaceKind::Wifi],
            avoid_expensive: true,
        }
    }
}

impl PathPreferences {
    /// Create preferences with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the preferred kinds.
    pub fn prefer(mut self, kinds: impl IntoIterator<Item = InterfaceKind>) -> Self {
        self.preferred_kinds = kinds.into_iter().collect();
        self
    }

    /// Set whether expensive interfaces rank last.
    pub fn avoid_expensive(mut self, avoid: bool) -> Self {
        self.avoid_expensive = avoid;
        self
    }
}

/// Observes the host's network interfaces.
///
/// # Example
///
/// ```ignore
/// use transport_services::path_monitor::PathMonitor;
///
/// let monitor = PathMonitor::new()?;
/// for iface in monitor.list_interfaces()? {
///     println!("{} {:?}", iface.name(), iface.addresses());
/// }
///
/// let watcher = monitor.start_watching(|event| println!("{event}"))?;
/// // ...
/// watcher.stop();
/// ```
pub struct PathMonitor {
    source: Arc<dyn InterfaceSource>,
    config: MonitorConfig,
    slot: Arc<WatchSlot>,
}

impl PathMonitor {
    /// Create a monitor over the system's interfaces.
    pub fn new() -> Result<Self, PathMonitorError> {
        let source = SystemInterfaces::open()?;
        // A first read proves the enumeration mechanism works.
        source
            .interfaces()
            .map_err(|e| PathMonitorError::Init(e.to_string()))?;
        Ok(Self::with_source(source))
    }

    /// Create a monitor over a custom interface source.
    pub fn with_source(source: impl InterfaceSource) -> Self {
        Self::with_shared_source(Arc::new(source))
    }

    /// Create a monitor over a shared interface source.
    pub fn with_shared_source(source: Arc<dyn InterfaceSource>) -> Self {
        Self {
            source,
            config: MonitorConfig::default(),
            slot: Arc::new(WatchSlot::default()),
        }
    }

    /// Replace the configuration. Takes effect for the next watch.
    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// The monitor configuration.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// The interface source backing this monitor.
    pub fn source(&self) -> Arc<dyn InterfaceSource> {
        Arc::clone(&self.source)
    }

    /// Enumerate all interfaces in one consistent read.
    pub fn list_interfaces(&self) -> Result<Vec<InterfaceSnapshot>, PathMonitorError> {
        self.source.interfaces()
    }

    /// The interface currently carrying the default route.
    pub fn default_interface(&self) -> Result<Option<InterfaceSnapshot>, PathMonitorError> {
        let snapshot = self.source.snapshot()?;
        Ok(snapshot.default_route.and_then(|route| {
            snapshot
                .interfaces
                .into_iter()
                .find(|iface| iface.index() == route.index)
        }))
    }

    /// Pick the best usable interface according to `preferences`.
    ///
    /// Only interfaces that are up, not loopback and have addresses are
    /// considered. Expensive interfaces are ranked last when requested, but
    /// never excluded.
    pub fn select_path(
        &self,
        preferences: &PathPreferences,
    ) -> Result<Option<InterfaceSnapshot>, PathMonitorError> {
        let interfaces = self.source.interfaces()?;
        let kind_rank = |kind: InterfaceKind| {
            preferences
                .preferred_kinds
                .iter()
                .position(|preferred| *preferred == kind)
                .unwrap_or(preferences.preferred_kinds.len())
        };

        Ok(interfaces
            .into_iter()
            .filter(InterfaceSnapshot::is_usable)
            .min_by_key(|iface| {
                let expensive = preferences.avoid_expensive && iface.is_expensive();
                (expensive, kind_rank(iface.kind()))
            }))
    }

    /// Whether a watch is currently active.
    pub fn is_watching(&self) -> bool {
        self.slot.current.lock().is_some()
    }

    /// Stop the active watch, whichever [`Watcher`] started it.
    ///
    /// Blocks like [`Watcher::stop`]; no callback runs after this returns.
    /// Does nothing when no watch is active.
    pub fn stop_watching(&self) {
        self.slot.stop_any();
    }

    /// Start delivering [`ChangeEvent`]s to `callback`.
    ///
    /// The callback runs on a dedicated thread, one event at a time. Only one
    /// watch may be active per monitor.
    pub fn start_watching<F>(&self, callback: F) -> Result<Watcher, PathMonitorError>
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        let mut current = self.slot.current.lock();
        if current.is_some() {
            return Err(PathMonitorError::AlreadyWatching);
        }

        let baseline = self.source.snapshot()?;
        let id = self.slot.next_id.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let stopped = Arc::new(AtomicBool::new(false));

        let notifications = if self.config.use_os_notifications {
            let wake_tx = control_tx.clone();
            let wake = Box::new(move || {
                let _ = wake_tx.send(Control::Wake);
            });
            match self.source.subscribe(wake) {
                Ok(guard) => guard,
                Err(e) => {
                    tracing::warn!(target: TARGET, "OS change notifications unavailable, polling only: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let watch_loop = WatchLoop {
            source: Arc::clone(&self.source),
            poll_interval: self.config.effective_poll_interval(),
            control: control_rx,
            stopped: Arc::clone(&stopped),
            previous: baseline,
        };
        let thread = thread::Builder::new()
            .name(format!("path-monitor-{id}"))
            .spawn(move || watch_loop.run(callback))
            .map_err(|e| PathMonitorError::Platform(format!("failed to spawn watch thread: {e}")))?;

        tracing::debug!(target: TARGET, "Started watch {}", id);
        *current = Some(ActiveWatch {
            id,
            control: control_tx,
            stopped,
            thread,
            notifications,
        });

        Ok(Watcher {
            id,
            slot: Arc::clone(&self.slot),
        })
    }

    /// Start a watch whose events are delivered through an iterator.
    pub fn subscribe(&self) -> Result<(Watcher, ChangeEvents), PathMonitorError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let watcher = self.start_watching(move |event| {
            let _ = tx.send(event.clone());
        })?;
        Ok((watcher, ChangeEvents { rx }))
    }
}

impl std::fmt::Debug for PathMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathMonitor")
            .field("config", &self.config)
            .field("watching", &self.is_watching())
            .finish()
    }
}

impl Drop for PathMonitor {
    fn drop(&mut self) {
        self.slot.stop_any();
    }
}

/// Handle to an active watch. Dropping it stops the watch.
pub struct Watcher {
    id: u64,
    slot: Arc<WatchSlot>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Stop the watch.
    ///
    /// Idempotent. Blocks until an in-flight callback has returned; no
    /// callback runs after this returns. May be called from inside the
    /// callback, in which case delivery stops after the current event.
    pub fn stop(&self) {
        self.slot.stop(self.id);
    }

    /// Whether this watch is still running.
    pub fn is_active(&self) -> bool {
        self.slot
            .current
            .lock()
            .as_ref()
            .is_some_and(|watch| watch.id == self.id)
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocking iterator over change events from [`PathMonitor::subscribe`].
///
/// Ends once the watch has stopped and every buffered event was taken.
#[derive(Debug)]
pub struct ChangeEvents {
    rx: Receiver<ChangeEvent>,
}

impl ChangeEvents {
    /// Take a buffered event without blocking.
    pub fn try_next(&self) -> Option<ChangeEvent> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn next_timeout(&self, timeout: Duration) -> Option<ChangeEvent> {
        self.rx.recv_timeout(timeout).ok()
    }
}

impl Iterator for ChangeEvents {
    type Item = ChangeEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

enum Control {
    Wake,
    Stop,
}

struct ActiveWatch {
    id: u64,
    control: Sender<Control>,
    stopped: Arc<AtomicBool>,
    thread: JoinHandle<()>,
    notifications: Option<NotificationGuard>,
}

impl ActiveWatch {
    fn shut_down(self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.control.send(Control::Stop);
        drop(self.notifications);

        if self.thread.thread().id() == thread::current().id() {
            // Stopping from inside the callback; the loop exits once it returns.
            return;
        }
        if self.thread.join().is_err() {
            tracing::error!(target: TARGET, "Watch thread {} panicked", self.id);
        }
        tracing::debug!(target: TARGET, "Stopped watch {}", self.id);
    }
}

#[derive(Default)]
struct WatchSlot {
    current: Mutex<Option<ActiveWatch>>,
    next_id: AtomicU64,
}

impl WatchSlot {
    fn stop(&self, id: u64) {
        let watch = {
            let mut current = self.current.lock();
            match current.as_ref() {
                Some(watch) if watch.id == id => current.take(),
                _ => None,
            }
        };
        if let Some(watch) = watch {
            watch.shut_down();
        }
    }

    fn stop_any(&self) {
        let watch = self.current.lock().take();
        if let Some(watch) = watch {
            watch.shut_down();
        }
    }
}

struct WatchLoop {
    source: Arc<dyn InterfaceSource>,
    poll_interval: Duration,
    control: Receiver<Control>,
    stopped: Arc<AtomicBool>,
    previous: PathSnapshot,
}

impl WatchLoop {
    fn run<F>(mut self, mut callback: F)
    where
        F: FnMut(&ChangeEvent),
    {
        loop {
            match self.control.recv_timeout(self.poll_interval) {
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => return,
                Ok(Control::Wake) => {
                    // Coalesce bursts of notifications into one snapshot.
                    while let Ok(control) = self.control.try_recv() {
                        if matches!(control, Control::Stop) {
                            return;
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
            }
            if self.stopped.load(Ordering::SeqCst) {
                return;
            }

            let current = match self.source.snapshot() {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    tracing::warn!(target: TARGET, "Interface snapshot failed: {}", e);
                    continue;
                }
            };
            let events = diff(&self.previous, &current);
            self.previous = current;

            for event in &events {
                if self.stopped.load(Ordering::SeqCst) {
                    return;
                }
                tracing::trace!(target: TARGET, "Delivering {}", event);
                if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    tracing::error!(target: TARGET, "Change callback panicked on {}", event.kind_str());
                }
            }
        }
    }
}
