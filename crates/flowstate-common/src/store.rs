//! The contract every address-keyed data source implements.
//!
//! The aggregator treats the connection-tracking store and the lease store
//! polymorphically through [`Store`].

use std::collections::BTreeMap;
use std::net::IpAddr;

use crate::error::Result;

/// Field name to value, as reported by one store for one address.
pub type StoreData = BTreeMap<String, String>;

/// A source of per-address facts.
pub trait Store: Send + Sync {
    /// Short name used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Returns every address this store currently knows about, in the
    /// store's preferred order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be refreshed.
    fn addresses(&self) -> Result<Vec<IpAddr>>;

    /// Returns this store's fields for `address`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be refreshed or the address
    /// text is invalid.
    fn data(&self, address: &str) -> Result<StoreData>;
}
