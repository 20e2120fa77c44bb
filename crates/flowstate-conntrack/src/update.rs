//! Event-stream updates: a flow tagged with its lifecycle event.

use std::fmt;

use flowstate_common::constants::UPDATE_TAG_WIDTH;
use flowstate_common::error::{FlowstateError, Result};
use serde::Serialize;

use crate::flow::Flow;
use crate::parser::parse_flow_line;

/// Lifecycle event carried by an event-stream line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UpdateKind {
    /// The flow was just created.
    New,
    /// The flow changed state.
    Update,
    /// The flow expired or was removed.
    Destroy,
}

impl UpdateKind {
    /// Decodes a tag with brackets and padding already removed.
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "NEW" => Some(Self::New),
            "UPDATE" => Some(Self::Update),
            "DESTROY" => Some(Self::Destroy),
            _ => None,
        }
    }
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::New => write!(f, "NEW"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
        }
    }
}

/// A flow read from the event stream. Constructed per line and handed
/// straight to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlowUpdate {
    /// What happened to the flow.
    pub kind: UpdateKind,
    /// The flow itself.
    pub flow: Flow,
}

impl fmt::Display for FlowUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>9} {}", format!("[{}]", self.kind), self.flow)
    }
}

/// Parses one event-stream line: a fixed-width bracketed tag followed by a
/// flow line.
///
/// # Errors
///
/// Returns [`FlowstateError::MalformedInput`] when the line is shorter than
/// the tag, the tag is unknown, or the flow part fails to parse.
pub fn parse_update_line(line: &str) -> Result<FlowUpdate> {
    let (Some(tag), Some(rest)) = (line.get(..UPDATE_TAG_WIDTH), line.get(UPDATE_TAG_WIDTH..))
    else {
        return Err(FlowstateError::malformed(
            line,
            format!("line is shorter than the {UPDATE_TAG_WIDTH}-character event tag"),
        ));
    };

    let tag = tag.trim_matches(|c| c == ' ' || c == '[' || c == ']');
    let kind = UpdateKind::from_tag(tag)
        .ok_or_else(|| FlowstateError::malformed(line, format!("unknown event tag \"{tag}\"")))?;

    Ok(FlowUpdate {
        kind,
        flow: parse_flow_line(rest)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_destroy_icmp() {
        let line = "[DESTROY] icmp     1 src=162.243.158.119 dst=85.191.222.130 type=8 code=0 id=8825 packets=5 bytes=230 src=85.191.222.130 dst=162.243.158.119 type=0 code=0 id=8825 packets=5 bytes=230";
        let update = parse_update_line(line).expect("should parse");
        assert_eq!(update.kind, UpdateKind::Destroy);
        assert_eq!(update.flow.protocol, "icmp");
        assert!(update.flow.state.is_none());
        assert!(!update.flow.nat);
    }

    #[test]
    fn parse_padded_new_tag() {
        let line = "    [NEW] tcp      6 120 SYN_SENT src=192.168.1.10 dst=93.184.216.34 sport=51234 dport=80 [UNREPLIED] src=93.184.216.34 dst=85.191.222.130 sport=80 dport=51234";
        let update = parse_update_line(line).expect("should parse");
        assert_eq!(update.kind, UpdateKind::New);
        assert_eq!(update.flow.ttl, Some(120));
        assert_eq!(update.flow.protocol_state.as_deref(), Some("SYN_SENT"));
        assert!(update.flow.nat);
    }

    #[test]
    fn parse_left_aligned_update_tag() {
        let line = "[UPDATE]  udp      17 src=10.0.0.2 dst=10.0.0.1 sport=5353 dport=5353 src=10.0.0.1 dst=10.0.0.2 sport=5353 dport=5353";
        let update = parse_update_line(line).expect("should parse");
        assert_eq!(update.kind, UpdateKind::Update);
        assert!(update.flow.ttl.is_none());
    }

    #[test]
    fn parse_update_with_sub_state_and_no_ttl() {
        let line = " [UPDATE] tcp      6 ESTABLISHED src=192.168.1.10 dst=93.184.216.34 sport=51234 dport=80 src=93.184.216.34 dst=85.191.222.130 sport=80 dport=51234 [ASSURED]";
        let update = parse_update_line(line).expect("should parse");
        assert_eq!(update.kind, UpdateKind::Update);
        assert!(update.flow.ttl.is_none());
        assert_eq!(update.flow.protocol_state.as_deref(), Some("ESTABLISHED"));
        assert!(update.flow.is_assured());
    }

    #[test]
    fn unknown_tag_is_malformed() {
        let line = "[BOGUS]   udp 17 src=10.0.0.2 dst=10.0.0.1 src=10.0.0.1 dst=10.0.0.2";
        let err = parse_update_line(line).expect_err("unknown tag");
        assert!(err.to_string().contains("BOGUS"));
    }

    #[test]
    fn short_line_is_malformed() {
        assert!(parse_update_line("[NEW]").is_err());
    }

    #[test]
    fn display_right_aligns_tag() {
        let line = "[DESTROY] udp 17 src=10.0.0.2 dst=10.0.0.1 sport=1 dport=2 packets=1 bytes=2 src=10.0.0.1 dst=10.0.0.2 sport=2 dport=1 packets=3 bytes=4";
        let update = parse_update_line(line).expect("should parse");
        let rendered = update.to_string();
        assert!(rendered.starts_with("[DESTROY] udp 17 "), "{rendered}");
        assert_eq!(parse_update_line(&rendered).expect("reparse"), update);

        let new = FlowUpdate {
            kind: UpdateKind::New,
            flow: update.flow,
        };
        assert!(new.to_string().starts_with("    [NEW] udp"));
    }
}
