//! Parsing of dnsmasq lease files using `nom`.
//!
//! Each line holds five whitespace-separated fields:
//!
//! ```text
//! <expiry unix seconds> <mac> <ip> <hostname> <client id>
//! ```
//!
//! An expiry of `0` marks a lease that never expires.

use std::io::BufRead;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use flowstate_common::error::{FlowstateError, Result};
use nom::{
    IResult, Parser,
    bytes::complete::take_till1,
    character::complete::{digit1, space0, space1},
    combinator::map_res,
    sequence::preceded,
};
use serde::Serialize;

/// One DHCP lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Lease {
    /// When the lease runs out. `None` for infinite leases.
    pub expiry: Option<DateTime<Utc>>,
    /// Hardware address of the client.
    pub mac: String,
    /// Address handed out.
    pub ip: IpAddr,
    /// Client-supplied hostname, `*` when none was sent.
    pub hostname: String,
    /// DHCP client identifier, `*` when none was sent.
    pub client_id: String,
}

fn field(input: &str) -> IResult<&str, &str> {
    preceded(space1, take_till1(char::is_whitespace)).parse(input)
}

fn expiry(input: &str) -> IResult<&str, i64> {
    preceded(space0, map_res(digit1, str::parse::<i64>)).parse(input)
}

fn lease_fields(input: &str) -> IResult<&str, (i64, &str, &str, &str, &str)> {
    (expiry, field, field, field, field).parse(input)
}

/// Parses a single lease line.
///
/// # Errors
///
/// Returns [`FlowstateError::MalformedInput`] for missing fields, a
/// non-numeric expiry, or an invalid address.
pub fn parse_lease_line(line: &str) -> Result<Lease> {
    let (_, (expiry, mac, ip, hostname, client_id)) = lease_fields(line)
        .map_err(|e| FlowstateError::malformed(line, format!("expected 5 lease fields: {e}")))?;

    let expiry = match expiry {
        0 => None,
        secs => Some(DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            FlowstateError::malformed(line, format!("expiry {secs} is out of range"))
        })?),
    };
    let ip = ip
        .parse()
        .map_err(|_| FlowstateError::malformed(line, format!("\"{ip}\" is not an IP address")))?;

    Ok(Lease {
        expiry,
        mac: mac.to_string(),
        ip,
        hostname: hostname.to_string(),
        client_id: client_id.to_string(),
    })
}

/// Parses a whole lease file. Blank lines are skipped.
///
/// # Errors
///
/// Returns the first line that fails to parse, or the read error.
pub fn parse_leases(input: impl BufRead) -> Result<Vec<Lease>> {
    let mut leases = Vec::new();
    for (number, line) in input.lines().enumerate() {
        let line = line.map_err(|e| FlowstateError::SourceUnavailable {
            command: "lease file".into(),
            message: format!("read failed at line {}: {e}", number + 1),
        })?;
        if line.trim().is_empty() {
            continue;
        }
        leases.push(parse_lease_line(&line).map_err(|e| match e {
            FlowstateError::MalformedInput { line, message } => FlowstateError::MalformedInput {
                line,
                message: format!("line {}: {message}", number + 1),
            },
            other => other,
        })?);
    }
    Ok(leases)
}
