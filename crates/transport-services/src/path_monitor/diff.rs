//! Snapshot diffing.

use std::collections::BTreeMap;
use std::fmt;

use super::interface::InterfaceSnapshot;
use super::source::{DefaultRoute, PathSnapshot};

/// A change between two consecutive snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// An interface appeared.
    Added(InterfaceSnapshot),
    /// An interface disappeared.
    Removed(InterfaceSnapshot),
    /// An interface with the same index changed in some field.
    Modified {
        /// State before the change.
        old: InterfaceSnapshot,
        /// State after the change.
        new: InterfaceSnapshot,
    },
    /// The default route moved.
    PathChanged {
        /// Human-readable description of the move.
        description: String,
    },
}

impl ChangeEvent {
    /// Index of the affected interface, `None` for path changes.
    pub fn index(&self) -> Option<u32> {
        match self {
            ChangeEvent::Added(iface) | ChangeEvent::Removed(iface) => Some(iface.index()),
            ChangeEvent::Modified { new, .. } => Some(new.index()),
            ChangeEvent::PathChanged { .. } => None,
        }
    }

    /// Short tag naming the event kind.
    pub fn kind_str(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "added",
            ChangeEvent::Removed(_) => "removed",
            ChangeEvent::Modified { .. } => "modified",
            ChangeEvent::PathChanged { .. } => "path-changed",
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeEvent::Added(iface) => write!(f, "added {iface}"),
            ChangeEvent::Removed(iface) => write!(f, "removed {iface}"),
            ChangeEvent::Modified { new, .. } => write!(f, "modified {new}"),
            ChangeEvent::PathChanged { description } => write!(f, "path changed: {description}"),
        }
    }
}

/// Compute the events that turn `old` into `new`.
///
/// Events come out as all removals, then modifications, then additions,
/// then at most one path change. Within each group interfaces are ordered
/// by index, and no index appears twice.
pub fn diff(old: &PathSnapshot, new: &PathSnapshot) -> Vec<ChangeEvent> {
    let mut events = diff_interfaces(&old.interfaces, &new.interfaces);
    if let Some(description) = describe_route_change(&old.default_route, &new.default_route) {
        events.push(ChangeEvent::PathChanged { description });
    }
    events
}

/// Interface-only part of [`diff`].
pub fn diff_interfaces(old: &[InterfaceSnapshot], new: &[InterfaceSnapshot]) -> Vec<ChangeEvent> {
    let old_by_index: BTreeMap<u32, &InterfaceSnapshot> =
        old.iter().map(|iface| (iface.index(), iface)).collect();
    let new_by_index: BTreeMap<u32, &InterfaceSnapshot> =
        new.iter().map(|iface| (iface.index(), iface)).collect();

    let mut removed = Vec::new();
    let mut modified = Vec::new();
    let mut added = Vec::new();

    for (index, old_iface) in &old_by_index {
        match new_by_index.get(index) {
            None => removed.push(ChangeEvent::Removed((*old_iface).clone())),
            Some(new_iface) if *new_iface != *old_iface => modified.push(ChangeEvent::Modified {
                old: (*old_iface).clone(),
                new: (*new_iface).clone(),
            }),
            Some(_) => {}
        }
    }
    for (index, new_iface) in &new_by_index {
        if !old_by_index.contains_key(index) {
            added.push(ChangeEvent::Added((*new_iface).clone()));
        }
    }

    removed.extend(modified);
    removed.extend(added);
    removed
}

fn describe_route_change(old: &Option<DefaultRoute>, new: &Option<DefaultRoute>) -> Option<String> {
    match (old, new) {
        (Some(old), Some(new)) if old != new => {
            Some(format!("default route moved from {old} to {new}"))
        }
        (None, Some(new)) => Some(format!("default route available via {new}")),
        (Some(old), None) => Some(format!("default route via {old} lost")),
        _ => None,
    }
}
