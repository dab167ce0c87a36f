//! Path monitoring.
//!
//! Enumerates the host's network interfaces and reports changes to them.
//!
//! # Features
//!
//! - **Snapshots**: one consistent read of every interface with its
//!   addresses, status, kind and cost
//! - **Change events**: additions, removals, modifications and default
//!   route moves, delivered to a callback or an iterator
//! - **Path selection**: pick the best interface for new traffic
//!
//! # Example
//!
//! ```ignore
//! use transport_services::path_monitor::{ChangeEvent, PathMonitor};
//!
//! let monitor = PathMonitor::new()?;
//! let (watcher, events) = monitor.subscribe()?;
//! for event in events {
//!     if let ChangeEvent::Added(iface) = event {
//!         println!("new interface {}", iface.name());
//!     }
//! }
//! # drop(watcher);
//! ```

mod diff;
mod interface;
pub mod mock;
mod monitor;
mod source;

pub use diff::{ChangeEvent, diff, diff_interfaces};
pub use interface::{InterfaceKind, InterfaceSnapshot, InterfaceSnapshotBuilder, InterfaceStatus};
pub use monitor::{
    ChangeEvents, MIN_POLL_INTERVAL, MonitorConfig, PathMonitor, PathPreferences, Watcher,
};
pub use source::{
    DefaultRoute, InterfaceSource, NotificationGuard, PathSnapshot, SystemInterfaces, WakeFn,
};
