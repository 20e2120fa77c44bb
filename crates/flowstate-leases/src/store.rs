//! Cached view of the dnsmasq lease file.
//!
//! The file is re-read at most once per [`REFRESH_INTERVAL`]. A read or
//! parse failure keeps the previous leases serving.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use flowstate_common::cache::{Clock, RefreshCache, SystemClock};
use flowstate_common::constants::REFRESH_INTERVAL;
use flowstate_common::error::{FlowstateError, Result};
use flowstate_common::store::{Store, StoreData};

use crate::lease::{Lease, parse_leases};

/// Hostname reported for an address without a lease.
pub const UNKNOWN_HOSTNAME: &str = "n/a";

type LeaseIndex = BTreeMap<IpAddr, Lease>;

/// Lease lookups by address.
#[derive(Debug)]
pub struct LeaseStore {
    path: PathBuf,
    cache: RefreshCache<LeaseIndex>,
}

impl LeaseStore {
    /// Creates a store reading `path` with the system clock.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    /// Creates a store with an injected clock.
    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            cache: RefreshCache::new("leases", clock, REFRESH_INTERVAL),
        }
    }

    /// The lease file this store reads.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns every leased address, soonest expiry first. Infinite leases
    /// come last.
    ///
    /// # Errors
    ///
    /// Returns the reload error if the leases were stale and the file could
    /// not be read.
    pub fn addresses(&self) -> Result<Vec<IpAddr>> {
        self.cache.read(
            || self.reload(),
            |index| {
                let mut leases: Vec<&Lease> = index.values().collect();
                leases.sort_by_key(|lease| (lease.expiry.is_none(), lease.expiry, lease.ip));
                leases.into_iter().map(|lease| lease.ip).collect()
            },
        )
    }

    /// Returns the lease handed out for `ip`.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::NotFound`] when no lease matches, or the
    /// reload error.
    pub fn lease_by_ip(&self, ip: &str) -> Result<Lease> {
        let address = parse_address(ip)?;
        self.cache
            .read(|| self.reload(), |index| index.get(&address).cloned())?
            .ok_or_else(|| FlowstateError::NotFound {
                kind: "lease",
                id: ip.to_string(),
            })
    }

    /// Returns `hostname` for `ip`, `n/a` when it holds no lease.
    ///
    /// # Errors
    ///
    /// Returns [`FlowstateError::MalformedInput`] for invalid address text,
    /// or the reload error.
    pub fn data(&self, ip: &str) -> Result<StoreData> {
        let hostname = match self.lease_by_ip(ip) {
            Ok(lease) => lease.hostname,
            Err(FlowstateError::NotFound { .. }) => UNKNOWN_HOSTNAME.to_string(),
            Err(e) => return Err(e),
        };
        Ok(StoreData::from([("hostname".to_string(), hostname)]))
    }

    fn reload(&self) -> Result<LeaseIndex> {
        let file = File::open(&self.path).map_err(|e| FlowstateError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let leases = parse_leases(BufReader::new(file))?;
        let total = leases.len();
        let index: LeaseIndex = leases.into_iter().map(|lease| (lease.ip, lease)).collect();

        tracing::info!(
            path = %self.path.display(),
            leases = index.len(),
            duplicates = total - index.len(),
            "lease index rebuilt"
        );
        Ok(index)
    }
}

impl Store for LeaseStore {
    fn name(&self) -> &'static str {
        "leases"
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
