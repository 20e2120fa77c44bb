//! # flowstate-leases
//!
//! DHCP lease lookups backed by a dnsmasq lease file, exposed through the
//! same [`Store`](flowstate_common::store::Store) contract as the
//! connection-tracking store.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod lease;
pub mod store;

pub use lease::{Lease, parse_leases};
pub use store::LeaseStore;
