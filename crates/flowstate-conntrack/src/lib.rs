//! # flowstate-conntrack
//!
//! Reads the host's connection-tracking table and serves it keyed by peer
//! address.
//!
//! - **Flow**: the typed representation of one tracked connection.
//! - **Parser**: decodes one whitespace-delimited conntrack line.
//! - **Reader**: pulls successive flows or event-stream updates from a byte
//!   stream.
//! - **Source**: runs the external dump command.
//! - **Store**: the refreshing, address-indexed flow cache.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod flow;
pub mod parser;
pub mod reader;
pub mod source;
pub mod store;
pub mod update;

pub use flow::{Counter, Direction, Flow, Layer3, Layer4};
pub use parser::parse_flow_line;
pub use reader::FlowReader;
pub use source::{CommandSource, DumpSource, EventStopper, EventStream};
pub use store::{FlowFilter, FlowStore};
pub use update::{FlowUpdate, UpdateKind};
