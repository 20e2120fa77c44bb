//! # flowstate-common
//!
//! Shared error taxonomy, configuration model, constants, the [`Store`]
//! contract and the time-windowed [`RefreshCache`] used by every store in
//! the flowstate workspace.
//!
//! This crate is the leaf of the dependency graph and depends on no other
//! internal crate.
//!
//! [`Store`]: store::Store
//! [`RefreshCache`]: cache::RefreshCache

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cache;
pub mod config;
pub mod constants;
pub mod error;
pub mod store;
