//! # flowstate-daemon
//!
//! Joins every [`Store`](flowstate_common::store::Store) into one table
//! keyed by address, renders it as text and serves it to anyone who
//! connects to a Unix-domain socket.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod collector;
#[cfg(unix)]
pub mod listener;
pub mod render;

pub use collector::{Collector, Table};
#[cfg(unix)]
pub use listener::Listener;
pub use render::render_table;
