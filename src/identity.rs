//! Host identity resolution.
//!
//! Node discovery needs a value that is equal for every process on the same
//! physical node and different for processes on different nodes. That value
//! is the network address of the host, folded into a [`NetworkId`].
//!
//! IPv4 addresses are folded through their IPv4-mapped IPv6 form, so an IPv4
//! and an IPv6 host can never fold to the same identifier. The folding uses
//! network byte order, so machines of different endianness agree on the value.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr, ToSocketAddrs};

use crate::datatype::{sealed, Wire};
use crate::error::{Error, Result};

/// Numeric network identity of a host, totally ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NetworkId(u128);

impl NetworkId {
    /// Wrap a raw identifier.
    pub const fn from_raw(raw: u128) -> Self {
        NetworkId(raw)
    }

    /// The raw identifier.
    pub const fn raw(self) -> u128 {
        self.0
    }

    /// The address this identifier was folded from.
    pub fn addr(self) -> IpAddr {
        let v6 = Ipv6Addr::from(self.0);
        match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        }
    }
}

impl From<IpAddr> for NetworkId {
    fn from(addr: IpAddr) -> Self {
        let v6 = match addr {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        NetworkId(u128::from_be_bytes(v6.octets()))
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr())
    }
}

impl sealed::Sealed for NetworkId {}

impl Wire for NetworkId {
    const SIZE: usize = u128::SIZE;

    fn encode(&self, out: &mut Vec<u8>) {
        self.0.encode(out);
    }

    fn decode(bytes: &[u8]) -> Self {
        NetworkId(u128::decode(bytes))
    }
}

/// Resolves a host name to its [`NetworkId`].
///
/// Implementations must be consistent within a node and injective across
/// nodes: a collision silently merges two nodes into one group.
pub trait HostResolver {
    /// Resolve `host`, failing with [`Error::Resolution`].
    fn resolve(&self, host: &str) -> Result<NetworkId>;
}

impl<R: HostResolver + ?Sized> HostResolver for &R {
    fn resolve(&self, host: &str) -> Result<NetworkId> {
        (**self).resolve(host)
    }
}

impl<R: HostResolver + ?Sized> HostResolver for Box<R> {
    fn resolve(&self, host: &str) -> Result<NetworkId> {
        (**self).resolve(host)
    }
}

/// Resolves through the system resolver, preferring IPv4 addresses.
#[derive(Debug, Clone, Copy, Default)]
pub struct DnsResolver;

impl HostResolver for DnsResolver {
    fn resolve(&self, host: &str) -> Result<NetworkId> {
        let failure = |reason: String| Error::Resolution {
            host: host.to_string(),
            reason,
        };
        if host.is_empty() {
            return Err(failure("empty host name".into()));
        }
        let addrs: Vec<IpAddr> = (host, 0)
            .to_socket_addrs()
            .map_err(|e| failure(e.to_string()))?
            .map(|sa| sa.ip())
            .collect();
        let addr = addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| failure("no addresses returned".into()))?;
        if addr.is_loopback() {
            tracing::warn!(
                host,
                %addr,
                "host resolves to a loopback address; processes on different nodes will be merged"
            );
        }
        Ok(NetworkId::from(addr))
    }
}

/// Resolves from an explicit host name → address table.
///
/// Useful when compute-node names are not in DNS, and for simulated jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticResolver {
    table: HashMap<String, IpAddr>,
}

impl StaticResolver {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an entry.
    pub fn with(mut self, host: impl Into<String>, addr: IpAddr) -> Self {
        self.table.insert(host.into(), addr);
        self
    }

    /// Parse a `name=addr,name=addr` table.
    ///
    /// Whitespace around entries is ignored; empty entries are skipped.
    pub fn parse(spec: &str) -> Result<Self> {
        let mut table = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (host, addr) = entry.split_once('=').ok_or_else(|| {
                Error::InvalidArgument(format!("host table entry '{entry}' is not name=addr"))
            })?;
            let addr: IpAddr = addr.trim().parse().map_err(|e| {
                Error::InvalidArgument(format!("host table entry '{entry}': {e}"))
            })?;
            table.insert(host.trim().to_string(), addr);
        }
        Ok(StaticResolver { table })
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl HostResolver for StaticResolver {
    fn resolve(&self, host: &str) -> Result<NetworkId> {
        self.table
            .get(host)
            .copied()
            .map(NetworkId::from)
            .ok_or_else(|| Error::Resolution {
                host: host.to_string(),
                reason: "not in host table".into(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn ipv4_folds_through_mapped_form() {
        let id = NetworkId::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(id.raw(), 0xffff_0a00_0001);
        assert_eq!(id.to_string(), "10.0.0.1");
    }

    #[test]
    fn ordering_follows_address_order() {
        let a = NetworkId::from(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        let b = NetworkId::from(IpAddr::V4(Ipv4Addr::new(10, 0, 1, 1)));
        let c = NetworkId::from(IpAddr::V4(Ipv4Addr::new(255, 255, 255, 255)));
        assert!(a < b && b < c);
    }

    #[test]
    fn ipv6_and_ipv4_never_collide() {
        let v4 = NetworkId::from("192.168.1.1".parse::<IpAddr>().unwrap());
        let v6 = NetworkId::from("::c0a8:101".parse::<IpAddr>().unwrap());
        assert_ne!(v4, v6);
    }

    #[test]
    fn wire_encoding_is_sixteen_bytes() {
        let id = NetworkId::from_raw(0x0102);
        let mut buf = Vec::new();
        id.encode(&mut buf);
        assert_eq!(buf.len(), 16);
        assert_eq!(&buf[14..], &[1, 2]);
        assert_eq!(NetworkId::decode(&buf), id);
    }

    #[test]
    fn dns_resolves_literal_addresses() {
        let id = DnsResolver.resolve("10.1.2.3").unwrap();
        assert_eq!(id.to_string(), "10.1.2.3");
    }

    #[test]
    fn dns_rejects_empty_host() {
        assert!(matches!(
            DnsResolver.resolve(""),
            Err(Error::Resolution { .. })
        ));
    }

    #[test]
    fn dns_unknown_host_is_a_resolution_error() {
        // The .invalid TLD never resolves (RFC 6761).
        match DnsResolver.resolve("no-such-host.invalid") {
            Err(Error::Resolution { host, reason }) => {
                assert_eq!(host, "no-such-host.invalid");
                assert!(!reason.is_empty());
            }
            other => panic!("expected a resolution error, got {other:?}"),
        }
    }

    #[test]
    fn static_table_parses_and_resolves() {
        let r = StaticResolver::parse(" n0=10.0.0.1, n1 = 10.0.0.2 ,").unwrap();
        assert_eq!(r.len(), 2);
        assert_eq!(r.resolve("n1").unwrap().to_string(), "10.0.0.2");
        assert_eq!(
            r.resolve("n9"),
            Err(Error::Resolution {
                host: "n9".into(),
                reason: "not in host table".into()
            })
        );
    }

    #[test]
    fn static_table_rejects_malformed_entries() {
        assert!(matches!(
            StaticResolver::parse("n0"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            StaticResolver::parse("n0=not-an-ip"),
            Err(Error::InvalidArgument(_))
        ));
    }
}
