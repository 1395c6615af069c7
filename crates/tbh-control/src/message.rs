//! ---
//! tbh_section: "02-control-messaging"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Control-message vocabulary, transports and client."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
use std::fmt;
use std::net::SocketAddr;

use rosc::{OscMessage, OscPacket, OscType};
use serde::{Deserialize, Serialize};
use tbh_common::config::EndpointConfig;

use crate::{ControlError, Result};

/// OSC address toggling Timebase master registration.
pub const ADDR_MASTER_ACTIVATION: &str = "/Hydrogen/JACK_TIMEBASE_MASTER_ACTIVATION";
/// OSC address starting the transport checks inside the test binary.
pub const ADDR_TRANSPORT_TESTS: &str = "/h2JackTimebase/TransportTests";
/// OSC address starting the secondary JACK test driver.
pub const ADDR_START_TEST_DRIVER: &str = "/Hydrogen/StartTestJackDriver";
/// OSC address asking an engine to quit.
pub const ADDR_QUIT: &str = "/Hydrogen/QUIT";

/// Vocabulary of control messages understood by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Register (`true`) or unregister (`false`) the target as Timebase master.
    MasterActivation(bool),
    /// Run the transport checks; the test binary exits once they complete.
    RunTransportTests,
    /// Start the secondary driver used by the relocation scenario.
    StartSecondaryDriver,
    /// Shut the target down.
    Quit,
}

impl ControlMessage {
    /// OSC address pattern of the message.
    pub fn address(&self) -> &'static str {
        match self {
            ControlMessage::MasterActivation(_) => ADDR_MASTER_ACTIVATION,
            ControlMessage::RunTransportTests => ADDR_TRANSPORT_TESTS,
            ControlMessage::StartSecondaryDriver => ADDR_START_TEST_DRIVER,
            ControlMessage::Quit => ADDR_QUIT,
        }
    }

    /// OSC arguments of the message.
    ///
    /// The engines read the activation flag as a float64, so the boolean travels
    /// as `0.0`/`1.0`.
    pub fn args(&self) -> Vec<OscType> {
        match self {
            ControlMessage::MasterActivation(active) => {
                vec![OscType::Double(if *active { 1.0 } else { 0.0 })]
            }
            _ => Vec::new(),
        }
    }

    /// Build the OSC packet for this message.
    pub fn to_packet(&self) -> OscPacket {
        OscPacket::Message(OscMessage {
            addr: self.address().to_owned(),
            args: self.args(),
        })
    }

    /// Encode the message into a single UDP payload.
    pub fn encode(&self) -> Result<Vec<u8>> {
        rosc::encoder::encode(&self.to_packet()).map_err(|err| ControlError::Encode {
            address: self.address(),
            reason: format!("{:?}", err),
        })
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::MasterActivation(active) => write!(
                f,
                "{} {}",
                self.address(),
                if *active { "1" } else { "0" }
            ),
            _ => f.write_str(self.address()),
        }
    }
}

/// Logical role of a control endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndpointRole {
    /// The full engine acting as counterpart to the test binary.
    Reference,
    /// The test binary driven in every scenario.
    Primary,
    /// The second test binary, used only by the relocation scenario.
    Secondary,
}

impl EndpointRole {
    /// Stable lowercase name used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointRole::Reference => "reference",
            EndpointRole::Primary => "primary",
            EndpointRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control endpoint at a fixed, pre-known address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// Logical role.
    pub role: EndpointRole,
    /// UDP address the engine listens on.
    pub addr: SocketAddr,
}

impl Endpoint {
    /// Construct an endpoint.
    pub fn new(role: EndpointRole, addr: SocketAddr) -> Self {
        Self { role, addr }
    }

    /// Control port of the endpoint.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.addr.port())
    }
}

/// The three endpoints known to the harness.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointSet {
    /// Reference engine endpoint.
    pub reference: Endpoint,
    /// Primary test binary endpoint.
    pub primary: Endpoint,
    /// Secondary test binary endpoint.
    pub secondary: Endpoint,
}

impl EndpointSet {
    /// Resolve the endpoints from configuration.
    pub fn from_config(config: &EndpointConfig) -> Self {
        let at = |port| SocketAddr::new(config.host, port);
        Self {
            reference: Endpoint::new(EndpointRole::Reference, at(config.reference_port)),
            primary: Endpoint::new(EndpointRole::Primary, at(config.primary_port)),
            secondary: Endpoint::new(EndpointRole::Secondary, at(config.secondary_port)),
        }
    }

    /// Look up the endpoint for a role.
    pub fn get(&self, role: EndpointRole) -> Endpoint {
        match role {
            EndpointRole::Reference => self.reference,
            EndpointRole::Primary => self.primary,
            EndpointRole::Secondary => self.secondary,
        }
    }

    /// All endpoints in teardown order.
    pub fn all(&self) -> [Endpoint; 3] {
        [self.reference, self.primary, self.secondary]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(bytes: &[u8]) -> OscMessage {
        match rosc::decoder::decode_udp(bytes).expect("decodes").1 {
            OscPacket::Message(msg) => msg,
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn activation_travels_as_float64() {
        let msg = decode(&ControlMessage::MasterActivation(true).encode().unwrap());
        assert_eq!(msg.addr, ADDR_MASTER_ACTIVATION);
        assert_eq!(msg.args, vec![OscType::Double(1.0)]);

        let msg = decode(&ControlMessage::MasterActivation(false).encode().unwrap());
        assert_eq!(msg.args, vec![OscType::Double(0.0)]);
    }

    #[test]
    fn triggers_carry_no_arguments() {
        for message in [
            ControlMessage::RunTransportTests,
            ControlMessage::StartSecondaryDriver,
            ControlMessage::Quit,
        ] {
            let msg = decode(&message.encode().unwrap());
            assert_eq!(msg.addr, message.address());
            assert!(msg.args.is_empty());
        }
    }

    #[test]
    fn display_includes_activation_value() {
        assert_eq!(
            ControlMessage::MasterActivation(false).to_string(),
            "/Hydrogen/JACK_TIMEBASE_MASTER_ACTIVATION 0"
        );
        assert_eq!(ControlMessage::Quit.to_string(), "/Hydrogen/QUIT");
    }

    #[test]
    fn endpoints_resolve_from_default_config() {
        let set = EndpointSet::from_config(&EndpointConfig::default());
        assert_eq!(set.reference.port(), 9099);
        assert_eq!(set.get(EndpointRole::Primary).port(), 8099);
        assert_eq!(set.secondary.port(), 8100);
        let roles: Vec<_> = set.all().iter().map(|e| e.role).collect();
        assert_eq!(
            roles,
            vec![
                EndpointRole::Reference,
                EndpointRole::Primary,
                EndpointRole::Secondary
            ]
        );
        assert_eq!(set.primary.to_string(), "primary:8099");
    }
}
