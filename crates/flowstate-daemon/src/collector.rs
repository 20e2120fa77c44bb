//! Aggregation of per-address facts across stores.
//!
//! The row set is the union of every store's addresses. Each row starts
//! with `hostname` and `ip`; any other field becomes a column the first
//! time a store reports it.

use std::collections::{BTreeSet, HashSet};
use std::net::IpAddr;
use std::sync::Arc;

use flowstate_common::error::{FlowstateError, Result};
use flowstate_common::store::Store;
use serde::Serialize;

/// Columns every table starts with, in order.
pub const LEADING_COLUMNS: [&str; 2] = ["hostname", "ip"];

/// A collected table: one row per address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Table {
    /// Column names.
    pub headers: Vec<String>,
    /// Cells, each row as wide as `headers`. Missing values are empty.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Whether the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column(&mut self, field: &str) -> usize {
        if let Some(index) = self.headers.iter().position(|h| h == field) {
            return index;
        }
        self.headers.push(field.to_string());
        self.headers.len() - 1
    }
}

/// Queries a set of stores and joins their answers.
#[derive(Default)]
pub struct Collector {
    stores: Vec<Arc<dyn Store>>,
}

impl Collector {
    /// Creates a collector with no stores.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store. Its fields are placed after those of earlier stores.
    pub fn add_store(&mut self, store: Arc<dyn Store>) {
        self.stores.push(store);
    }

    /// Builder form of [`Collector::add_store`].
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.add_store(store);
        self
    }

    /// Returns the distinct addresses known to any store, in address order.
    ///
    /// Stores are queried concurrently. A store that fails is logged and
    /// left out.
    pub fn addresses(&self) -> Vec<IpAddr> {
        let mut union = BTreeSet::new();
        std::thread::scope(|scope| {
            let pending: Vec<_> = self
                .stores
                .iter()
                .map(|store| (store.name(), scope.spawn(move || store.addresses())))
                .collect();

            for (name, handle) in pending {
                match handle.join() {
                    Ok(Ok(addresses)) => union.extend(addresses),
                    Ok(Err(e)) => {
                        tracing::warn!(store = name, error = %e, "unable to list addresses");
                    }
                    Err(_) => tracing::error!(store = name, "address listing panicked"),
                }
            }
        });
        union.into_iter().collect()
    }

    /// Returns every field known about `address`, `ip` first, then each
    /// store's fields in store order.
    ///
    /// # Errors
    ///
    /// Returns the first store error, or [`FlowstateError::DuplicateField`]
    /// when two stores report the same field.
    pub fn fields(&self, address: IpAddr) -> Result<Vec<(String, String)>> {
        let ip = address.to_string();
        let mut seen = HashSet::from(["ip".to_string()]);
        let mut fields = vec![("ip".to_string(), ip.clone())];

        for store in &self.stores {
            let data = store.data(&ip).inspect_err(|e| {
                tracing::warn!(store = store.name(), address = %ip, error = %e, "unable to read store data");
            })?;
            for (field, value) in data {
                if !seen.insert(field.clone()) {
                    return Err(FlowstateError::DuplicateField { field, address: ip });
                }
                fields.push((field, value));
            }
        }
        Ok(fields)
    }

    /// Builds the full table.
    ///
    /// # Errors
    ///
    /// Fails as soon as any address fails; see [`Collector::fields`].
    pub fn collect(&self) -> Result<Table> {
        let mut table = Table {
            headers: LEADING_COLUMNS.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
        };

        for address in self.addresses() {
            let mut row = Vec::new();
            for (field, value) in self.fields(address)? {
                let column = table.column(&field);
                if row.len() <= column {
                    row.resize(column + 1, String::new());
                }
                row[column] = value;
            }
            table.rows.push(row);
        }

        let width = table.headers.len();
        for row in &mut table.rows {
            row.resize(width, String::new());
        }

        tracing::debug!(rows = table.rows.len(), columns = width, "table collected");
        Ok(table)
    }
}

impl std::fmt::Debug for Collector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.stores.iter().map(|s| s.name()).collect();
        f.debug_struct("Collector").field("stores", &names).finish()
    }
}
