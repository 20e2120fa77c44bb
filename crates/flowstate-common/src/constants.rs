//! System-wide constants and default paths.

use std::time::Duration;

/// Freshness window after which a store rebuilds its index.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

/// Default program listing the connection-tracking table.
pub const DEFAULT_CONNTRACK_PROGRAM: &str = "conntrack";

/// Arguments requesting a one-shot listing of the whole table.
pub const DEFAULT_DUMP_ARGS: &[&str] = &["-L"];

/// Arguments requesting the continuous event stream.
pub const DEFAULT_EVENT_ARGS: &[&str] = &["-E"];

/// Default dnsmasq lease file.
pub const DEFAULT_LEASES_PATH: &str = "/var/lib/misc/dnsmasq.leases";

/// Default Unix socket the daemon listens on.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/flowstate.sock";

/// Width of the bracketed tag leading every event-stream line.
pub const UPDATE_TAG_WIDTH: usize = 10;

/// Trailing token marking a flow that has seen traffic both ways.
pub const ASSURED_MARKER: &str = "[ASSURED]";

/// Application name used in CLI output.
pub const APP_NAME: &str = "flowstate";
