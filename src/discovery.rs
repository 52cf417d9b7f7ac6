//! Broker endpoint discovery over DNS.
//!
//! The broker is located with two chained lookups: an SRV query for the
//! configured FQDN, which must yield exactly one record, then an A query for
//! that record's target. The port comes from the SRV record.
//!
//! ```text
//! _mqtt._tcp.example.com  SRV  0 0 1883 broker-1.node.consul.
//! broker-1.node.consul.   A    10.0.0.7
//!   → ResolvedEndpoint { host: "10.0.0.7", port: 1883 }
//! ```

use async_trait::async_trait;
use hickory_resolver::{ResolveError, TokioResolver};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::{debug, info};

use crate::error::{DiscoveryError, RelayError};
use crate::metrics::{self, LookupResult};

/// One SRV answer: target host and port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    /// Target hostname as returned by the resolver (usually fully qualified).
    pub host: String,
    /// Service port.
    pub port: u16,
}

/// Network address of the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoint {
    /// Host name or IP address.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl ResolvedEndpoint {
    /// Create an endpoint, rejecting an empty host or port 0.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, RelayError> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(RelayError::Config("broker host is empty".to_string()));
        }
        if port == 0 {
            return Err(RelayError::Config("broker port must be non-zero".to_string()));
        }
        Ok(Self { host, port })
    }
}

impl fmt::Display for ResolvedEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// DNS queries needed for discovery.
///
/// An empty answer (including NXDOMAIN) is `Ok(vec![])`; `Err` is reserved
/// for resolver failures such as timeouts.
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    /// SRV records for `name`, in resolver order.
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError>;

    /// A records for `host`, in resolver order.
    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, DiscoveryError>;
}

/// Lookup backed by the system-configured DNS resolvers.
#[derive(Clone)]
pub struct SystemLookup {
    resolver: TokioResolver,
}

impl SystemLookup {
    /// Build a resolver from the host's resolv.conf.
    pub fn from_system_conf() -> Result<Self, RelayError> {
        let resolver = TokioResolver::builder_tokio()
            .map_err(|e| RelayError::Config(format!("cannot read system DNS configuration: {e}")))?
            .build();
        Ok(Self { resolver })
    }
}

fn lookup_error(record: &'static str, name: &str, err: ResolveError) -> DiscoveryError {
    DiscoveryError::LookupFailed {
        record,
        name: name.to_string(),
        reason: err.to_string(),
    }
}

#[async_trait]
impl ServiceLookup for SystemLookup {
    async fn lookup_srv(&self, name: &str) -> Result<Vec<SrvTarget>, DiscoveryError> {
        match self.resolver.srv_lookup(name).await {
            Ok(lookup) => Ok(lookup
                .iter()
                .map(|srv| SrvTarget {
                    host: srv.target().to_utf8(),
                    port: srv.port(),
                })
                .collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(lookup_error("SRV", name, e)),
        }
    }

    async fn lookup_ipv4(&self, host: &str) -> Result<Vec<Ipv4Addr>, DiscoveryError> {
        match self.resolver.ipv4_lookup(host).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(lookup_error("A", host, e)),
        }
    }
}

fn observe<T>(record: &'static str, result: &Result<Vec<T>, DiscoveryError>) {
    let outcome = match result {
        Ok(records) if records.is_empty() => LookupResult::Empty,
        Ok(_) => LookupResult::Found,
        Err(_) => LookupResult::Error,
    };
    metrics::record_lookup(record, outcome);
}

/// Resolve `name` to its single SRV target.
///
/// Zero and multiple records are the same error: the service location is
/// not unique.
pub async fn resolve_service_record(
    lookup: &dyn ServiceLookup,
    name: &str,
) -> Result<SrvTarget, DiscoveryError> {
    let result = lookup.lookup_srv(name).await;
    observe("SRV", &result);

    let mut records = result?;
    debug!(fqdn = name, records = records.len(), "SRV lookup complete");

    match records.len() {
        1 => Ok(records.remove(0)),
        count => Err(DiscoveryError::NotUnique {
            name: name.to_string(),
            count,
        }),
    }
}

/// Resolve `host` to an IPv4 address, taking the first record returned.
pub async fn resolve_address(
    lookup: &dyn ServiceLookup,
    host: &str,
) -> Result<Ipv4Addr, DiscoveryError> {
    let result = lookup.lookup_ipv4(host).await;
    observe("A", &result);

    result?
        .into_iter()
        .next()
        .ok_or_else(|| DiscoveryError::NoAddress(host.to_string()))
}

/// Locate the broker behind `fqdn`: SRV lookup, then A lookup of its target.
pub async fn resolve_endpoint(
    lookup: &dyn ServiceLookup,
    fqdn: &str,
) -> Result<ResolvedEndpoint, RelayError> {
    let target = resolve_service_record(lookup, fqdn).await?;
    let address = resolve_address(lookup, &target.host).await?;

    info!(
        fqdn,
        target = %target.host,
        address = %address,
        port = target.port,
        "Resolved broker location"
    );

    ResolvedEndpoint::new(address.to_string(), target.port)
}
