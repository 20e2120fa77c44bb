//! Decoder for one conntrack flow line.
//!
//! The format has no fixed schema. A line is a run of whitespace-separated
//! tokens decoded in stages by a cursor, each stage deciding how many
//! tokens it owns:
//!
//! ```text
//! tcp 6 300 ESTABLISHED src=.. dst=.. sport=.. dport=.. packets=.. bytes=.. [UNREPLIED] src=.. .. [ASSURED] mark=0 use=1
//! │   │ │   │           └── original direction ──────────────────────┘ │           └─ reply ─┘ └─ trailing ──────┘
//! │   │ │   └ protocol sub-state (optional)                             └ connection marker (optional)
//! │   │ └ ttl (optional, absent on event-stream lines)
//! │   └ protocol number
//! └ protocol name
//! ```
//!
//! Every stage checks the cursor before reading, so truncated lines are
//! reported as malformed input instead of running off the token list.

use std::net::IpAddr;
use std::str::FromStr;

use flowstate_common::constants::ASSURED_MARKER;
use flowstate_common::error::{FlowstateError, Result};

use crate::flow::{ASSURED, Counter, Direction, Flow, Layer3, Layer4};

/// Cursor over the tokens of a single line.
struct TokenCursor<'a> {
    line: &'a str,
    tokens: Vec<&'a str>,
    pos: usize,
}

impl<'a> TokenCursor<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            line,
            tokens: line.split_whitespace().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<&'a str> {
        self.tokens.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<&'a str> {
        let tok = self.peek();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Peeks the next token, failing if the line has ended before `what`.
    fn require(&self, what: &str) -> Result<&'a str> {
        self.peek()
            .ok_or_else(|| malformed(self.line, format!("line ended before {what}")))
    }

    fn expect(&mut self, what: &str) -> Result<&'a str> {
        let tok = self.require(what)?;
        self.pos += 1;
        Ok(tok)
    }

    fn rest(&self) -> &[&'a str] {
        self.tokens.get(self.pos..).unwrap_or_default()
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.tokens.len());
    }

    const fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

fn malformed(line: &str, message: impl Into<String>) -> FlowstateError {
    FlowstateError::malformed(line, message)
}

fn is_key_value(token: &str) -> bool {
    token.contains('=')
}

fn opens_direction(token: &str) -> bool {
    token.starts_with("src=")
}

/// Parses an unsigned decimal field. Signs, blanks and overflow are errors.
fn parse_decimal<T: FromStr>(value: &str, field: &str, line: &str) -> Result<T> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(
            line,
            format!("{field} \"{value}\" is not an unsigned integer"),
        ));
    }
    value
        .parse()
        .map_err(|_| malformed(line, format!("{field} \"{value}\" is out of range")))
}

fn parse_address(value: &str, field: &str, line: &str) -> Result<IpAddr> {
    value
        .parse()
        .map_err(|_| malformed(line, format!("{field} \"{value}\" is not an IP address")))
}

/// Parses one conntrack line such as
///
/// ```text
/// tcp      6 300 ESTABLISHED src=192.168.1.191 dst=192.168.1.1 sport=35786 dport=22 packets=4378 bytes=240025 src=192.168.1.1 dst=192.168.1.191 sport=22 dport=35786 packets=4727 bytes=1455593 [ASSURED] mark=0 use=1
/// ```
///
/// # Errors
///
/// Returns [`FlowstateError::MalformedInput`] for empty or truncated lines,
/// non-numeric numeric fields, invalid addresses, and directions that do
/// not open with `src=`. No partially decoded flow is ever returned.
pub fn parse_flow_line(line: &str) -> Result<Flow> {
    let mut cursor = TokenCursor::new(line);
    if cursor.is_empty() {
        return Err(malformed(line, "line has no fields"));
    }

    let protocol = cursor.expect("protocol name")?.to_string();
    let protocol_number = parse_decimal(cursor.expect("protocol number")?, "protocol number", line)?;
    let ttl = parse_ttl(&mut cursor)?;
    let protocol_state = parse_marker(&mut cursor, "original direction")?.map(str::to_string);

    let original = parse_direction_at(&mut cursor, "original")?;
    let mut state = parse_marker(&mut cursor, "reply direction")?
        .map(|marker| marker.trim_matches(|c| c == '[' || c == ']').to_string());
    let reply = parse_direction_at(&mut cursor, "reply")?;

    // mark=, use=, zone= and friends are ignored
    if cursor.rest().contains(&ASSURED_MARKER) {
        state = Some(ASSURED.to_string());
    }

    Ok(Flow {
        nat: original.layer3.source != reply.layer3.destination,
        original,
        reply,
        ttl,
        state,
        protocol,
        protocol_number,
        protocol_state,
    })
}

/// TTL is present unless the original direction starts right away or the
/// slot holds a protocol sub-state (event lines carry no TTL but may still
/// carry `ESTABLISHED` and friends).
fn parse_ttl(cursor: &mut TokenCursor<'_>) -> Result<Option<u64>> {
    let tok = cursor.require("original direction")?;
    if opens_direction(tok) || is_state_name(tok) {
        return Ok(None);
    }
    cursor.skip(1);
    parse_decimal(tok, "ttl", cursor.line).map(Some)
}

/// Sub-states are upper-case words such as `SYN_SENT` or `TIME_WAIT`.
fn is_state_name(token: &str) -> bool {
    token.bytes().any(|b| b.is_ascii_uppercase())
        && token.bytes().all(|b| b.is_ascii_uppercase() || b == b'_')
}

/// Consumes a bare token (no `=`) if one sits before `next`.
fn parse_marker<'a>(cursor: &mut TokenCursor<'a>, next: &str) -> Result<Option<&'a str>> {
    let tok = cursor.require(next)?;
    if is_key_value(tok) {
        return Ok(None);
    }
    Ok(cursor.advance())
}

fn parse_direction_at(cursor: &mut TokenCursor<'_>, which: &str) -> Result<Direction> {
    let (direction, consumed) = parse_direction(cursor.rest(), which, cursor.line)?;
    cursor.skip(consumed);
    Ok(direction)
}

/// Decodes one direction from a token slice that must open with `src=`.
///
/// Consumes recognised keys until a second `src=` (the next direction) or
/// the first unrecognised token, neither of which is consumed. Returns the
/// direction and the number of tokens consumed.
///
/// `type`, `id` and `code` only appear on ICMP flows and are skipped.
///
/// # Errors
///
/// Returns [`FlowstateError::MalformedInput`] when the slice does not open
/// with `src=`, lacks `dst=`, or holds an unparsable value.
pub fn parse_direction(tokens: &[&str], which: &str, line: &str) -> Result<(Direction, usize)> {
    match tokens.first() {
        Some(tok) if opens_direction(tok) => {}
        Some(tok) => {
            return Err(malformed(
                line,
                format!("expected src= to open the {which} direction, got \"{tok}\""),
            ));
        }
        None => return Err(malformed(line, format!("line ended before the {which} direction"))),
    }

    let mut source = None;
    let mut destination = None;
    let mut layer4 = Layer4::default();
    let mut counter = Counter::default();
    let mut consumed = 0;

    for tok in tokens {
        let Some((key, value)) = tok.split_once('=') else {
            break;
        };
        match key {
            "src" if source.is_some() => break,
            "src" => source = Some(parse_address(value, &format!("{which} src"), line)?),
            "dst" => destination = Some(parse_address(value, &format!("{which} dst"), line)?),
            "sport" => layer4.source_port = parse_decimal(value, &format!("{which} sport"), line)?,
            "dport" => {
                layer4.destination_port = parse_decimal(value, &format!("{which} dport"), line)?;
            }
            "packets" => counter.packets = parse_decimal(value, &format!("{which} packets"), line)?,
            "bytes" => counter.bytes = parse_decimal(value, &format!("{which} bytes"), line)?,
            "type" | "id" | "code" => {}
            _ => break,
        }
        consumed += 1;
    }

    let (Some(source), Some(destination)) = (source, destination) else {
        return Err(malformed(line, format!("{which} direction has no dst")));
    };

    Ok((
        Direction {
            layer3: Layer3 {
                source,
                destination,
            },
            layer4,
            counter,
        },
        consumed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ESTABLISHED: &str = "tcp      6 300 ESTABLISHED src=192.168.1.191 dst=192.168.1.1 sport=35786 dport=22 packets=4378 bytes=240025 src=192.168.1.1 dst=192.168.1.191 sport=22 dport=35786 packets=4727 bytes=1455593 [ASSURED] mark=0 use=1";
    const CLOSE_WAIT: &str = "tcp      6 29 CLOSE_WAIT src=192.168.1.191 dst=52.222.168.153 sport=49746 dport=443 packets=50 bytes=20898 src=52.222.168.153 dst=85.191.222.130 sport=443 dport=49746 packets=48 bytes=13171 [ASSURED] mark=0 use=1";
    const UDP_ASSURED: &str = "udp      17 156 src=192.168.1.76 dst=209.206.58.5 sport=44017 dport=7351 packets=16330 bytes=2287570 src=209.206.58.5 dst=85.191.222.130 sport=7351 dport=44017 packets=16106 bytes=1205484 [ASSURED] mark=0 use=1";
    const UDP_UNREPLIED: &str = "udp      17 19 src=192.168.1.149 dst=239.255.255.250 sport=45162 dport=1900 packets=3 bytes=1340 [UNREPLIED] src=239.255.255.250 dst=192.168.1.149 sport=1900 dport=45162 packets=0 bytes=0 mark=0 use=1";
    const ICMP_EVENT: &str = "icmp     1 src=162.243.158.119 dst=85.191.222.130 type=8 code=0 id=8825 packets=5 bytes=230 src=85.191.222.130 dst=162.243.158.119 type=0 code=0 id=8825 packets=5 bytes=230";

    fn ip(s: &str) -> IpAddr {
        s.parse().expect("valid ip")
    }

    #[test]
    fn parse_established_tcp() {
        let flow = parse_flow_line(ESTABLISHED).expect("should parse");
        assert_eq!(flow.protocol, "tcp");
        assert_eq!(flow.protocol_number, 6);
        assert_eq!(flow.ttl, Some(300));
        assert_eq!(flow.protocol_state.as_deref(), Some("ESTABLISHED"));
        assert_eq!(flow.state.as_deref(), Some("ASSURED"));
        assert_eq!(flow.original.layer3.source, ip("192.168.1.191"));
        assert_eq!(flow.original.layer3.destination, ip("192.168.1.1"));
        assert_eq!(flow.original.layer4.source_port, 35786);
        assert_eq!(flow.original.layer4.destination_port, 22);
        assert_eq!(
            flow.original.counter,
            Counter {
                packets: 4378,
                bytes: 240_025
            }
        );
        assert_eq!(flow.reply.layer3.source, ip("192.168.1.1"));
        assert_eq!(flow.reply.layer4.source_port, 22);
        assert_eq!(flow.reply.counter.bytes, 1_455_593);
        assert!(!flow.nat);
    }

    #[test]
    fn parse_close_wait_detects_nat() {
        let flow = parse_flow_line(CLOSE_WAIT).expect("should parse");
        assert_eq!(flow.protocol_state.as_deref(), Some("CLOSE_WAIT"));
        assert_eq!(flow.reply.layer3.destination, ip("85.191.222.130"));
        assert!(flow.nat);
    }

    #[test]
    fn parse_udp_has_no_protocol_state() {
        let flow = parse_flow_line(UDP_ASSURED).expect("should parse");
        assert_eq!(flow.protocol, "udp");
        assert_eq!(flow.ttl, Some(156));
        assert!(flow.protocol_state.is_none());
        assert!(flow.is_assured());
        assert!(flow.nat);
    }

    #[test]
    fn parse_unreplied_marker_between_directions() {
        let flow = parse_flow_line(UDP_UNREPLIED).expect("should parse");
        assert_eq!(flow.state.as_deref(), Some("UNREPLIED"));
        assert_eq!(flow.original.counter.packets, 3);
        assert_eq!(flow.reply.layer3.source, ip("239.255.255.250"));
        assert_eq!(flow.reply.counter, Counter::default());
        assert!(!flow.nat);
    }

    #[test]
    fn parse_icmp_without_ttl_skips_icmp_fields() {
        let flow = parse_flow_line(ICMP_EVENT).expect("should parse");
        assert_eq!(flow.protocol, "icmp");
        assert!(flow.ttl.is_none());
        assert!(flow.protocol_state.is_none());
        assert!(flow.state.is_none());
        assert_eq!(flow.original.layer4, Layer4::default());
        assert_eq!(
            flow.original.counter,
            Counter {
                packets: 5,
                bytes: 230
            }
        );
        assert_eq!(flow.reply.layer3.destination, ip("162.243.158.119"));
        assert!(!flow.nat);
    }

    #[test]
    fn assured_overrides_unreplied() {
        let line = "udp 17 30 src=10.0.0.2 dst=10.0.0.1 sport=1 dport=2 packets=1 bytes=1 [UNREPLIED] src=10.0.0.1 dst=10.0.0.2 sport=2 dport=1 packets=0 bytes=0 mark=0 [ASSURED] use=1";
        let flow = parse_flow_line(line).expect("should parse");
        assert_eq!(flow.state.as_deref(), Some("ASSURED"));
    }

    #[test]
    fn parse_ipv6_flow() {
        let line = "tcp 6 431999 ESTABLISHED src=fd00::2 dst=2001:db8::1 sport=51000 dport=443 packets=10 bytes=900 src=2001:db8::1 dst=fd00::2 sport=443 dport=51000 packets=12 bytes=8000 [ASSURED] mark=0 use=1";
        let flow = parse_flow_line(line).expect("should parse");
        assert_eq!(flow.source(), ip("fd00::2"));
        assert!(!flow.nat);
    }

    #[test]
    fn parse_counters_up_to_u64_max() {
        let line = format!(
            "udp 17 10 src=10.0.0.2 dst=10.0.0.1 sport=1 dport=2 packets={max} bytes={max} src=10.0.0.1 dst=10.0.0.2 sport=2 dport=1 packets=0 bytes=0",
            max = u64::MAX
        );
        let flow = parse_flow_line(&line).expect("should parse");
        assert_eq!(flow.original.counter.packets, u64::MAX);
        assert_eq!(flow.original.counter.bytes, u64::MAX);
    }

    #[test]
    fn parse_without_accounting_leaves_counters_zero() {
        let line = "tcp 6 117 SYN_SENT src=10.0.0.2 dst=10.0.0.1 sport=40000 dport=80 [UNREPLIED] src=10.0.0.1 dst=10.0.0.2 sport=80 dport=40000 mark=0 use=1";
        let flow = parse_flow_line(line).expect("should parse");
        assert_eq!(flow.original.counter, Counter::default());
        assert_eq!(flow.state.as_deref(), Some("UNREPLIED"));
    }

    #[test]
    fn direction_stops_at_second_src() {
        let tokens: Vec<&str> = "src=1.1.1.1 dst=2.2.2.2 sport=1 dport=2 src=2.2.2.2 dst=1.1.1.1"
            .split_whitespace()
            .collect();
        let (direction, consumed) = parse_direction(&tokens, "original", "").expect("parse");
        assert_eq!(consumed, 4);
        assert_eq!(direction.layer4.destination_port, 2);
    }

    #[test]
    fn direction_stops_at_unknown_token() {
        let tokens = ["src=1.1.1.1", "dst=2.2.2.2", "[UNREPLIED]", "src=2.2.2.2"];
        let (_, consumed) = parse_direction(&tokens, "original", "").expect("parse");
        assert_eq!(consumed, 2);

        let tokens = ["src=1.1.1.1", "dst=2.2.2.2", "mark=0"];
        let (_, consumed) = parse_direction(&tokens, "reply", "").expect("parse");
        assert_eq!(consumed, 2);
    }

    #[test]
    fn direction_must_open_with_src() {
        let result = parse_direction(&["dst=2.2.2.2"], "reply", "x");
        assert!(matches!(result, Err(FlowstateError::MalformedInput { .. })));
        assert!(parse_direction(&[], "reply", "x").is_err());
    }

    #[test]
    fn direction_without_dst_is_malformed() {
        let result = parse_direction(&["src=1.1.1.1", "sport=1"], "original", "x");
        assert!(result.is_err());
    }

    #[test]
    fn empty_line_is_malformed() {
        assert!(matches!(
            parse_flow_line(""),
            Err(FlowstateError::MalformedInput { .. })
        ));
        assert!(parse_flow_line("   \n").is_err());
    }

    #[test]
    fn truncated_lines_are_malformed() {
        let truncated = [
            "tcp",
            "tcp 6",
            "tcp 6 300",
            "tcp 6 300 ESTABLISHED",
            "tcp 6 300 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2",
            "tcp 6 300 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2 [UNREPLIED]",
            "tcp 6 300 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 [UNREPLIED] mark=0",
        ];
        for line in truncated {
            let err = parse_flow_line(line).expect_err(line);
            assert!(
                matches!(err, FlowstateError::MalformedInput { .. }),
                "{line}: {err}"
            );
        }
    }

    #[test]
    fn bad_ttl_is_malformed() {
        let err = parse_flow_line("tcp 6 -1 src=1.1.1.1 dst=2.2.2.2 src=2.2.2.2 dst=1.1.1.1")
            .expect_err("negative ttl");
        assert!(err.to_string().contains("ttl"));
    }

    #[test]
    fn lowercase_word_in_ttl_slot_is_malformed() {
        let err = parse_flow_line("tcp 6 abc src=1.1.1.1 dst=2.2.2.2 src=2.2.2.2 dst=1.1.1.1")
            .expect_err("non-numeric ttl");
        assert!(err.to_string().contains("ttl \"abc\""), "{err}");
    }

    #[test]
    fn sub_state_without_ttl() {
        let flow = parse_flow_line(
            "tcp 6 ESTABLISHED src=192.168.1.10 dst=93.184.216.34 sport=51234 dport=80 src=93.184.216.34 dst=85.191.222.130 sport=80 dport=51234 [ASSURED]",
        )
        .expect("event-style tcp line");
        assert!(flow.ttl.is_none());
        assert_eq!(flow.protocol_state.as_deref(), Some("ESTABLISHED"));
        assert_eq!(flow.state.as_deref(), Some(ASSURED));
        assert!(flow.nat);
    }

    #[test]
    fn bad_protocol_number_is_malformed() {
        assert!(parse_flow_line("tcp six 300 src=1.1.1.1 dst=2.2.2.2 src=2.2.2.2 dst=1.1.1.1").is_err());
    }

    #[test]
    fn bad_port_names_the_field() {
        let line = "tcp 6 300 ESTABLISHED src=10.0.0.1 dst=10.0.0.2 sport=http dport=2 src=10.0.0.2 dst=10.0.0.1 sport=2 dport=1";
        let err = parse_flow_line(line).expect_err("non-numeric port");
        let message = err.to_string();
        assert!(message.contains("original sport"), "{message}");
        assert!(message.contains("sport=http"), "{message}");
    }

    #[test]
    fn out_of_range_port_is_malformed() {
        let line = "tcp 6 300 src=10.0.0.1 dst=10.0.0.2 sport=70000 dport=2 src=10.0.0.2 dst=10.0.0.1 sport=2 dport=1";
        let err = parse_flow_line(line).expect_err("port overflow");
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn signed_counter_is_malformed() {
        let line = "udp 17 30 src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2 packets=+5 bytes=1 src=10.0.0.2 dst=10.0.0.1 sport=2 dport=1 packets=0 bytes=0";
        assert!(parse_flow_line(line).is_err());
    }

    #[test]
    fn bad_reply_bytes_names_the_reply_direction() {
        let line = "udp 17 30 src=10.0.0.1 dst=10.0.0.2 sport=1 dport=2 packets=1 bytes=1 src=10.0.0.2 dst=10.0.0.1 sport=2 dport=1 packets=0 bytes=lots";
        let err = parse_flow_line(line).expect_err("bad bytes");
        assert!(err.to_string().contains("reply bytes"));
    }

    #[test]
    fn invalid_address_is_malformed() {
        let line = "udp 17 30 src=10.0.0.300 dst=10.0.0.2 src=10.0.0.2 dst=10.0.0.1";
        assert!(parse_flow_line(line).is_err());
    }

    #[test]
    fn display_reproduces_parsed_fields() {
        for line in [ESTABLISHED, CLOSE_WAIT, UDP_ASSURED, UDP_UNREPLIED, ICMP_EVENT] {
            let flow = parse_flow_line(line).expect("should parse");
            let rendered = flow.to_string();
            let reparsed = parse_flow_line(&rendered).expect("rendered line should parse");
            assert_eq!(flow, reparsed, "{rendered}");
        }
    }

    #[test]
    fn display_places_markers() {
        let flow = parse_flow_line(UDP_UNREPLIED).expect("should parse");
        assert_eq!(
            flow.to_string(),
            "udp 17 19 src=192.168.1.149 dst=239.255.255.250 sport=45162 dport=1900 packets=3 bytes=1340 [UNREPLIED] src=239.255.255.250 dst=192.168.1.149 sport=1900 dport=45162 packets=0 bytes=0"
        );
        let flow = parse_flow_line(ESTABLISHED).expect("should parse");
        assert!(flow.to_string().ends_with("bytes=1455593 [ASSURED]"));
    }
}
