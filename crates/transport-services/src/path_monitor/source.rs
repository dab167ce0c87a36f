//! Interface sources: where snapshots come from.

use std::any::Any;
use std::fmt;

use super::interface::{InterfaceKind, InterfaceSnapshot, InterfaceStatus};
use crate::error::PathMonitorError;

/// The interface the OS currently routes default traffic through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultRoute {
    /// Interface index.
    pub index: u32,
    /// Interface name.
    pub name: String,
}

impl DefaultRoute {
    /// Create a default route description.
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
        }
    }
}

impl fmt::Display for DefaultRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.index)
    }
}

/// A consistent view of all interfaces plus the default route.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathSnapshot {
    /// Interfaces in OS order.
    pub interfaces: Vec<InterfaceSnapshot>,
    /// Default route, if one exists.
    pub default_route: Option<DefaultRoute>,
}

/// Keeps an OS change subscription alive; dropping it unsubscribes.
pub struct NotificationGuard {
    _inner: Box<dyn Any + Send>,
}

impl NotificationGuard {
    /// Wrap any value whose drop ends the subscription.
    pub fn new(inner: impl Any + Send) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl fmt::Debug for NotificationGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationGuard").finish_non_exhaustive()
    }
}

/// Callback used by a source to nudge the watch loop.
pub type WakeFn = Box<dyn Fn() + Send + Sync + 'static>;

/// A provider of interface snapshots.
///
/// The path monitor polls `interfaces` on every tick. Sources that can
/// observe OS change notifications also implement `subscribe`, which lets
/// the watch loop react before the next poll.
pub trait InterfaceSource: Send + Sync + 'static {
    /// Enumerate all interfaces in one read.
    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, PathMonitorError>;

    /// The interface currently carrying the default route.
    fn default_route(&self) -> Option<DefaultRoute> {
        None
    }

    /// Subscribe to change notifications.
    ///
    /// Returns `Ok(None)` when the source has no notification mechanism.
    fn subscribe(&self, _wake: WakeFn) -> Result<Option<NotificationGuard>, PathMonitorError> {
        Ok(None)
    }

    /// Take a full snapshot including the default route.
    fn snapshot(&self) -> Result<PathSnapshot, PathMonitorError> {
        let interfaces = self.interfaces()?;
        Ok(PathSnapshot {
            interfaces,
            default_route: self.default_route(),
        })
    }
}

/// The host's interfaces, read with `netdev` and watched with `netwatcher`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces {
    _private: (),
}

impl SystemInterfaces {
    /// Open the system interface source.
    ///
    /// Fails with [`PathMonitorError::Init`] on platforms without an
    /// enumeration mechanism.
    pub fn open() -> Result<Self, PathMonitorError> {
        if cfg!(any(unix, windows)) {
            Ok(Self { _private: () })
        } else {
            Err(PathMonitorError::Init(
                "interface enumeration is not supported on this platform".to_string(),
            ))
        }
    }
}

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<InterfaceSnapshot>, PathMonitorError> {
        Ok(netdev::get_interfaces()
            .into_iter()
            .map(|iface| snapshot_from_netdev(&iface))
            .collect())
    }

    fn default_route(&self) -> Option<DefaultRoute> {
        netdev::get_default_interface()
            .ok()
            .map(|iface| DefaultRoute::new(iface.index, iface.name))
    }

    fn subscribe(&self, wake: WakeFn) -> Result<Option<NotificationGuard>, PathMonitorError> {
        let handle = netwatcher::watch_interfaces(move |_update| wake())
            .map_err(|e| PathMonitorError::Platform(e.to_string()))?;
        Ok(Some(NotificationGuard::new(handle)))
    }
}

fn snapshot_from_netdev(iface: &netdev::Interface) -> InterfaceSnapshot {
    let kind = classify(iface);
    let status = if iface.is_up() {
        InterfaceStatus::Up
    } else {
        InterfaceStatus::Down
    };

    InterfaceSnapshot::builder(iface.index, iface.name.clone())
        .addresses(iface.ipv4.iter().map(|net| net.addr().into()))
        .addresses(iface.ipv6.iter().map(|net| net.addr().into()))
        .status(status)
        .kind(kind)
        .build()
}

fn classify(iface: &netdev::Interface) -> InterfaceKind {
    if iface.is_loopback() {
        return InterfaceKind::Loopback;
    }
    if iface.is_tun() {
        return InterfaceKind::Virtual;
    }
    // netdev does not tell Wi-Fi from Ethernet, so the name decides.
    match InterfaceKind::from_name(&iface.name) {
        InterfaceKind::Unknown if iface.mac_addr.is_some() => InterfaceKind::Wired,
        kind => kind,
    }
}
