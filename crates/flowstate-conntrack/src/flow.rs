//! Typed representation of one tracked connection.

use std::fmt;
use std::net::IpAddr;

use flowstate_common::constants::ASSURED_MARKER;
use serde::Serialize;

/// Marker stored in [`Flow::state`] when the trailing assured token is seen.
pub const ASSURED: &str = "ASSURED";

/// One tracked connection, observed in both directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flow {
    /// Direction of the initiating packet.
    pub original: Direction,
    /// Direction the kernel expects replies to take.
    pub reply: Direction,
    /// Remaining lifetime in seconds. Absent on event-stream lines.
    pub ttl: Option<u64>,
    /// Connection marker such as `ASSURED` or `UNREPLIED`.
    pub state: Option<String>,
    /// Lowercase protocol name (`tcp`, `udp`, `icmp`, ...).
    pub protocol: String,
    /// IP protocol number as printed by the source. Informational only.
    pub protocol_number: u8,
    /// Protocol sub-state such as `ESTABLISHED`. Absent for stateless
    /// protocols.
    pub protocol_state: Option<String>,
    /// Whether the reply is addressed somewhere other than the original
    /// source, i.e. the addresses were translated.
    pub nat: bool,
}

/// Layer 3 and 4 endpoints plus counters for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Direction {
    /// Addresses.
    pub layer3: Layer3,
    /// Ports. Zero for protocols without ports.
    pub layer4: Layer4,
    /// Packet and byte counters. Zero when accounting is disabled.
    pub counter: Counter,
}

/// Source and destination address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Layer3 {
    /// Source address.
    pub source: IpAddr,
    /// Destination address.
    pub destination: IpAddr,
}

/// Source and destination port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Layer4 {
    /// Source port.
    pub source_port: u16,
    /// Destination port.
    pub destination_port: u16,
}

/// Accumulated packet and byte counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counter {
    /// Packets seen.
    pub packets: u64,
    /// Bytes seen.
    pub bytes: u64,
}

impl Flow {
    /// Address the connection was initiated from; the store's index key.
    #[must_use]
    pub const fn source(&self) -> IpAddr {
        self.original.layer3.source
    }

    /// Whether traffic has been seen in both directions.
    #[must_use]
    pub fn is_assured(&self) -> bool {
        self.state.as_deref() == Some(ASSURED)
    }
}

/// Renders the flow back into the conntrack dump-line format.
impl fmt::Display for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.protocol, self.protocol_number)?;
        if let Some(ttl) = self.ttl {
            write!(f, " {ttl}")?;
        }
        if let Some(protocol_state) = &self.protocol_state {
            write!(f, " {protocol_state}")?;
        }
        write!(f, " {}", self.original)?;
        match self.state.as_deref() {
            None | Some(ASSURED) => {}
            Some(state) => write!(f, " [{state}]")?,
        }
        write!(f, " {}", self.reply)?;
        if self.is_assured() {
            write!(f, " {ASSURED_MARKER}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "src={} dst={} sport={} dport={} packets={} bytes={}",
            self.layer3.source,
            self.layer3.destination,
            self.layer4.source_port,
            self.layer4.destination_port,
            self.counter.packets,
            self.counter.bytes
        )
    }
}
