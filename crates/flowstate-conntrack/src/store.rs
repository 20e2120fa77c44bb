//! Address-indexed, periodically rebuilt view of the conntrack table.
//!
//! Every public call first makes sure the index is no older than
//! [`REFRESH_INTERVAL`]. A rebuild runs the dump source, parses every line
//! and groups the flows by original source address. The whole sequence runs
//! under the cache's single lock, so concurrent callers wait for an
//! in-flight rebuild instead of seeing a partial index. A failed rebuild
//! returns its error to the caller that triggered it and leaves the
//! previous index serving everyone else.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use flowstate_common::cache::{Clock, RefreshCache, SystemClock};
use flowstate_common::constants::REFRESH_INTERVAL;
use flowstate_common::error::{FlowstateError, Result};
use flowstate_common::store::{Store, StoreData};

use crate::flow::Flow;
use crate::reader::FlowReader;
use crate::source::DumpSource;

/// Flows grouped by original source address.
pub type FlowIndex = BTreeMap<IpAddr, Vec<Flow>>;

/// Which flows a rebuild keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlowFilter {
    /// Keep every flow.
    All,
    /// Keep only flows whose addresses were translated.
    #[default]
    NatOnly,
}

impl FlowFilter {
    /// Selects [`FlowFilter::NatOnly`] when `nat_only` is set.
    #[must_use]
    pub const fn from_nat_only(nat_only: bool) -> Self {
        if nat_only { Self::NatOnly } else { Self::All }
    }

    /// Whether `flow` belongs in the index.
    #[must_use]
    pub const fn accepts(self, flow: &Flow) -> bool {
        match self {
            Self::All => true,
            Self::NatOnly => flow.nat,
        }
    }
}

/// Cached conntrack table keyed by peer address.
pub struct FlowStore {
    source: Box<dyn DumpSource>,
    filter: FlowFilter,
    cache: RefreshCache<FlowIndex>,
}

impl FlowStore {
    /// Creates a store over `source` using the system clock.
    pub fn new(source: impl DumpSource + 'static, filter: FlowFilter) -> Self {
        Self::with_clock(source, filter, Arc::new(SystemClock))
    }

    /// Creates a store with an injected clock.
    pub fn with_clock(
        source: impl DumpSource + 'static,
        filter: FlowFilter,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            source: Box::new(source),
            filter,
            cache: RefreshCache::new("conntrack", clock, REFRESH_INTERVAL),
        }
    }

    /// Returns every source address in the index, in address order.
    ///
    /// # Errors
    ///
    /// Returns the rebuild error if the index was stale and could not be
    /// rebuilt.
    pub fn addresses(&self) -> Result<Vec<IpAddr>> {
        self.read(|index| index.keys().copied().collect())
    }

    /// Returns the number of indexed flows for `address` as `nFlows`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::MalformedInput`] if `address` is not an IP
    /// address, or the rebuild error.
    pub fn data(&self, address: &str) -> Result<StoreData> {
        let address = parse_address(address)?;
        let count = self.read(|index| index.get(&address).map_or(0, Vec::len))?;
        Ok(StoreData::from([("nFlows".to_string(), count.to_string())]))
    }

    /// Returns copies of the flows whose original source is `address`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::NotFound`] when the address has no flows,
    /// [`FlowstateError::MalformedInput`] for invalid address text, or the
    /// rebuild error.
    pub fn flows_for(&self, address: &str) -> Result<Vec<Flow>> {
        let parsed = parse_address(address)?;
        self.read(|index| index.get(&parsed).cloned())?
            .ok_or_else(|| FlowstateError::NotFound {
                kind: "flows for address",
                id: address.to_string(),
            })
    }

    /// Instant of the last successful rebuild.
    pub fn last_refresh(&self) -> Option<Instant> {
        self.cache.last_refresh()
    }

    fn read<R>(&self, read: impl FnOnce(&FlowIndex) -> R) -> Result<R> {
        self.cache.read(|| self.rebuild(), read)
    }

    fn rebuild(&self) -> Result<FlowIndex> {
        let label = self.source.describe();
        let mut index = FlowIndex::new();
        let mut skipped = 0_usize;

        self.source.dump(&mut |stream| {
            let mut reader = FlowReader::new(stream, label.as_str());
            while let Some(flow) = reader.read_flow()? {
                if !self.filter.accepts(&flow) {
                    skipped += 1;
                    continue;
                }
                index.entry(flow.source()).or_default().push(flow);
            }
            Ok(())
        })?;

        tracing::info!(
            source = %label,
            addresses = index.len(),
            flows = index.values().map(Vec::len).sum::<usize>(),
            skipped,
            "conntrack index rebuilt"
        );
        Ok(index)
    }
}

impl std::fmt::Debug for FlowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowStore")
            .field("source", &self.source.describe())
            .field("filter", &self.filter)
            .field("cache", &self.cache)
            .finish()
    }
}

impl Store for FlowStore {
    fn name(&self) -> &'static str {
        "conntrack"
    }

    fn addresses(&self) -> Result<Vec<IpAddr>> {
        Self::addresses(self)
    }

    fn data(&self, address: &str) -> Result<StoreData> {
        Self::data(self, address)
    }
}

fn parse_address(address: &str) -> Result<IpAddr> {
    address
        .trim()
        .parse()
        .map_err(|_| FlowstateError::malformed(address, "not an IP address"))
}
