//! Transport property preferences and protocol stack selection.

use std::fmt;
use std::time::Duration;

use crate::endpoint::Protocol;
use crate::error::EstablishmentError;
use crate::security::SecurityParameters;

/// Strength of a requirement on a transport property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Preference {
    /// Only stacks providing the property are acceptable.
    Require,
    /// Stacks providing the property are tried first.
    Prefer,
    /// The property does not influence selection.
    #[default]
    NoPreference,
    /// Stacks without the property are tried first.
    Avoid,
    /// Only stacks without the property are acceptable.
    Prohibit,
}

impl Preference {
    /// Whether a stack with (`true`) or without (`false`) the property is acceptable.
    pub fn accepts(self, has_property: bool) -> bool {
        match self {
            Preference::Require => has_property,
            Preference::Prohibit => !has_property,
            _ => true,
        }
    }

    /// Ranking bonus for a stack with or without the property.
    fn score(self, has_property: bool) -> i32 {
        match (self, has_property) {
            (Preference::Prefer, true) | (Preference::Avoid, false) => 1,
            _ => 0,
        }
    }
}

/// What the application needs from the transport.
#[derive(Debug, Clone)]
pub struct TransportProperties {
    /// Reliable delivery.
    pub reliability: Preference,
    /// In-order delivery.
    pub preserve_order: Preference,
    /// Multiple streams over one connection.
    pub multistreaming: Preference,
    /// Overall establishment deadline, overriding the engine's.
    pub connection_timeout: Option<Duration>,
}

impl Default for TransportProperties {
    fn default() -> Self {
        Self {
            reliability: Preference::Require,
            preserve_order: Preference::Require,
            multistreaming: Preference::Prefer,
            connection_timeout: None,
        }
    }
}

impl TransportProperties {
    /// Reliable, ordered stream defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults suited to datagram traffic.
    pub fn datagram() -> Self {
        Self {
            reliability: Preference::Avoid,
            preserve_order: Preference::Avoid,
            multistreaming: Preference::NoPreference,
            connection_timeout: None,
        }
    }

    /// Set the reliability preference.
    pub fn reliability(mut self, preference: Preference) -> Self {
        self.reliability = preference;
        self
    }

    /// Set the ordering preference.
    pub fn preserve_order(mut self, preference: Preference) -> Self {
        self.preserve_order = preference;
        self
    }

    /// Set the multistreaming preference.
    pub fn multistreaming(mut self, preference: Preference) -> Self {
        self.multistreaming = preference;
        self
    }

    /// Set the establishment deadline.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = Some(timeout);
        self
    }

    /// Candidate protocol stacks in preference order.
    ///
    /// Reliable ordered delivery is served by TCP (TLS over TCP when
    /// security is enabled). UDP is offered only when neither reliability
    /// nor ordering is required and security is disabled. None of the
    /// stacks multistream, so requiring it is unsatisfiable.
    pub fn protocol_stacks(
        &self,
        security: &SecurityParameters,
    ) -> Result<Vec<ProtocolStack>, EstablishmentError> {
        let stream = if security.is_enabled() {
            ProtocolStack::Tls
        } else {
            ProtocolStack::Tcp
        };
        let offered: &[ProtocolStack] = if security.is_enabled() {
            &[stream]
        } else {
            &[stream, ProtocolStack::Udp]
        };

        let mut stacks: Vec<ProtocolStack> = offered
            .iter()
            .copied()
            .filter(|stack| {
                self.reliability.accepts(stack.is_reliable())
                    && self.preserve_order.accepts(stack.is_ordered())
                    && self.multistreaming.accepts(stack.is_multistreaming())
            })
            .collect();

        if stacks.is_empty() {
            return Err(EstablishmentError::InvalidParameters(format!(
                "no protocol stack satisfies reliability={:?}, preserve_order={:?}, \
                 multistreaming={:?} with security {}",
                self.reliability,
                self.preserve_order,
                self.multistreaming,
                if security.is_enabled() { "enabled" } else { "disabled" },
            )));
        }

        // Stable: ties keep the offered order.
        stacks.sort_by_key(|stack| {
            -(self.reliability.score(stack.is_reliable())
                + self.preserve_order.score(stack.is_ordered())
                + self.multistreaming.score(stack.is_multistreaming()))
        });
        Ok(stacks)
    }
}

/// A concrete protocol combination a candidate is attempted over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolStack {
    /// TCP.
    Tcp,
    /// TLS over TCP.
    Tls,
    /// UDP.
    Udp,
}

impl ProtocolStack {
    /// Whether delivery is reliable.
    pub fn is_reliable(&self) -> bool {
        !matches!(self, ProtocolStack::Udp)
    }

    /// Whether delivery is ordered.
    pub fn is_ordered(&self) -> bool {
        !matches!(self, ProtocolStack::Udp)
    }

    /// Whether the stack multiplexes streams.
    pub fn is_multistreaming(&self) -> bool {
        false
    }

    /// Whether the stack provides transport security.
    pub fn is_secure(&self) -> bool {
        matches!(self, ProtocolStack::Tls)
    }

    /// The protocol this stack speaks on the wire.
    pub fn protocol(&self) -> Protocol {
        match self {
            ProtocolStack::Tcp => Protocol::Tcp,
            ProtocolStack::Tls => Protocol::Tls,
            ProtocolStack::Udp => Protocol::Udp,
        }
    }

    /// Whether an endpoint restricted to `protocol` may use this stack.
    pub fn matches(&self, protocol: Protocol) -> bool {
        self.protocol() == protocol
    }

    /// Short name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolStack::Tcp => "tcp",
            ProtocolStack::Tls => "tls/tcp",
            ProtocolStack::Udp => "udp",
        }
    }
}

impl fmt::Display for ProtocolStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_select_tls() {
        let stacks = TransportProperties::new()
            .protocol_stacks(&SecurityParameters::new())
            .unwrap();
        assert_eq!(stacks, vec![ProtocolStack::Tls]);
    }

    #[test]
    fn test_defaults_without_security_select_tcp() {
        let stacks = TransportProperties::new()
            .protocol_stacks(&SecurityParameters::disabled())
            .unwrap();
        assert_eq!(stacks, vec![ProtocolStack::Tcp]);
    }

    #[test]
    fn test_no_preference_offers_both_in_default_order() {
        let props = TransportProperties::new()
            .reliability(Preference::NoPreference)
            .preserve_order(Preference::NoPreference)
            .multistreaming(Preference::NoPreference);
        let stacks = props.protocol_stacks(&SecurityParameters::disabled()).unwrap();
        assert_eq!(stacks, vec![ProtocolStack::Tcp, ProtocolStack::Udp]);
    }

    #[test]
    fn test_avoid_reliability_ranks_udp_first() {
        let stacks = TransportProperties::datagram()
            .protocol_stacks(&SecurityParameters::disabled())
            .unwrap();
        assert_eq!(stacks, vec![ProtocolStack::Udp, ProtocolStack::Tcp]);
    }

    #[test]
    fn test_prohibit_reliability_leaves_udp() {
        let props = TransportProperties::datagram().reliability(Preference::Prohibit);
        let stacks = props.protocol_stacks(&SecurityParameters::disabled()).unwrap();
        assert_eq!(stacks, vec![ProtocolStack::Udp]);
    }

    #[test]
    fn test_prohibit_reliability_with_security_is_unsatisfiable() {
        let props = TransportProperties::datagram().reliability(Preference::Prohibit);
        let result = props.protocol_stacks(&SecurityParameters::new());
        assert!(matches!(result, Err(EstablishmentError::InvalidParameters(_))));
    }

    #[test]
    fn test_required_multistreaming_is_unsatisfiable() {
        let props = TransportProperties::new().multistreaming(Preference::Require);
        let result = props.protocol_stacks(&SecurityParameters::new());
        assert!(matches!(result, Err(EstablishmentError::InvalidParameters(_))));
    }

    #[test]
    fn test_stack_matches_protocol_hint() {
        assert!(ProtocolStack::Tls.matches(Protocol::Tls));
        assert!(!ProtocolStack::Tls.matches(Protocol::Tcp));
        assert!(ProtocolStack::Udp.matches(Protocol::Udp));
    }
}
