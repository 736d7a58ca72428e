use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::Deserialize;
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::IpRangeParseError;
use crate::util::normalize_key;

/// IpRange is a single network, written either as a bare address (`10.1.2.3`) or in CIDR
/// notation (`10.0.0.0/8`, `2001:db8::/32`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, DeserializeFromStr, SerializeDisplay)]
pub struct IpRange {
    network: IpAddr,
    prefix_len: u8,
}

impl IpRange {
    /// An IPv4-mapped IPv6 network with a prefix of at least 96 bits is stored as the equivalent
    /// IPv4 network, so `::ffff:10.0.0.0/104` becomes `10.0.0.0/8`.
    pub fn new(network: IpAddr, prefix_len: u8) -> Result<Self, IpRangeParseError> {
        if prefix_len > max_prefix_len(&network) {
            return Err(IpRangeParseError {
                input: format!("{}/{}", network, prefix_len),
                message: "prefix length is too long for the address family",
            });
        }
        if let IpAddr::V6(v6) = network {
            if let Some(v4) = v6.to_ipv4_mapped() {
                if prefix_len >= IPV4_MAPPED_PREFIX_LEN {
                    return Ok(IpRange {
                        network: IpAddr::V4(v4),
                        prefix_len: prefix_len - IPV4_MAPPED_PREFIX_LEN,
                    });
                }
            }
        }
        Ok(IpRange {
            network,
            prefix_len,
        })
    }

    pub fn network(&self) -> IpAddr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns true if `addr` lies inside this network. IPv4-mapped IPv6 addresses are compared
    /// as IPv4.
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self.network, canonical(addr)) {
            (IpAddr::V4(network), IpAddr::V4(addr)) => {
                prefix_eq(u32::from(network).into(), u32::from(addr).into(), 32, self.prefix_len)
            }
            (IpAddr::V6(network), IpAddr::V6(addr)) => {
                prefix_eq(u128::from(network), u128::from(addr), 128, self.prefix_len)
            }
            // Short IPv6 prefixes can still cover the ::ffff:0:0/96 block.
            (IpAddr::V6(network), IpAddr::V4(addr)) => prefix_eq(
                u128::from(network),
                u128::from(addr.to_ipv6_mapped()),
                128,
                self.prefix_len,
            ),
            (IpAddr::V4(_), IpAddr::V6(_)) => false,
        }
    }
}

const IPV4_MAPPED_PREFIX_LEN: u8 = 96;

fn canonical(addr: &IpAddr) -> IpAddr {
    match addr {
        IpAddr::V6(v6) => v6
            .to_ipv4_mapped()
            .map(IpAddr::V4)
            .unwrap_or(IpAddr::V6(*v6)),
        v4 => *v4,
    }
}

fn max_prefix_len(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

fn prefix_eq(network: u128, addr: u128, width: u32, prefix_len: u8) -> bool {
    let prefix_len = u32::from(prefix_len);
    if prefix_len == 0 {
        return true;
    }
    let shift = width - prefix_len;
    (network >> shift) == (addr >> shift)
}

impl FromStr for IpRange {
    type Err = IpRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |message| IpRangeParseError {
            input: s.to_string(),
            message,
        };
        let trimmed = s.trim();
        match trimmed.split_once('/') {
            Some((addr, len)) => {
                let network: IpAddr = addr.parse().map_err(|_| err("invalid address"))?;
                let prefix_len: u8 = len.parse().map_err(|_| err("invalid prefix length"))?;
                IpRange::new(network, prefix_len).map_err(|_| err("prefix length is too long"))
            }
            None => {
                let network: IpAddr = trimmed.parse().map_err(|_| err("invalid address"))?;
                IpRange::new(network, max_prefix_len(&network))
            }
        }
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// IpRangeProvider resolves a named group of networks, as referenced by an IP address filter.
///
/// Returning None means the name is unknown; the IP address filter then fails closed.
pub trait IpRangeProvider: Send + Sync {
    fn ip_ranges(&self, range_name: &str) -> Option<&[IpRange]>;
}

/// A provider that knows no range names, so every IP address filter evaluates to false.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptyIpRangeProvider;

impl IpRangeProvider for EmptyIpRangeProvider {
    fn ip_ranges(&self, _range_name: &str) -> Option<&[IpRange]> {
        None
    }
}

/// An in-memory table of named ranges, parsed once up front. Names are case-insensitive.
#[derive(Clone, Debug, Default)]
pub struct StaticIpRangeProvider {
    ranges: HashMap<String, Vec<IpRange>>,
}

impl StaticIpRangeProvider {
    pub fn new<I, S>(ranges: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<IpRange>)>,
        S: AsRef<str>,
    {
        let mut table: HashMap<String, Vec<IpRange>> = HashMap::new();
        for (name, networks) in ranges {
            table
                .entry(normalize_key(name.as_ref()))
                .or_default()
                .extend(networks);
        }
        StaticIpRangeProvider { ranges: table }
    }

    /// Parses a table of the form `{"corpnet": ["10.0.0.0/8", "192.168.1.7"]}`.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let table: RangeTable = serde_json::from_str(json)?;
        Ok(Self::new(table.0))
    }
}

#[derive(Deserialize)]
#[serde(transparent)]
struct RangeTable(HashMap<String, Vec<IpRange>>);

impl IpRangeProvider for StaticIpRangeProvider {
    fn ip_ranges(&self, range_name: &str) -> Option<&[IpRange]> {
        self.ranges
            .get(&normalize_key(range_name))
            .map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;
    use test_case::test_case;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test_case("10.0.0.0/8", "10.200.3.4", true)]
    #[test_case("10.0.0.0/8", "11.0.0.1", false)]
    #[test_case("192.168.1.7", "192.168.1.7", true)]
    #[test_case("192.168.1.7", "192.168.1.8", false)]
    #[test_case("0.0.0.0/0", "8.8.8.8", true)]
    #[test_case("2001:db8::/32", "2001:db8:1::5", true)]
    #[test_case("2001:db8::/32", "2001:db9::5", false)]
    #[test_case("10.0.0.0/8", "::ffff:10.1.1.1", true)]
    #[test_case("10.0.0.0/8", "2001:db8::1", false)]
    #[test_case("::ffff:10.0.0.0/104", "10.20.30.40", true ; "mapped network matches ipv4 client")]
    #[test_case("::ffff:10.0.0.0/104", "::ffff:10.20.30.40", true ; "mapped network matches mapped client")]
    #[test_case("::ffff:10.0.0.0/104", "11.0.0.1", false ; "mapped network rejects outside client")]
    #[test_case("::ffff:0:0/80", "10.20.30.40", true ; "short ipv6 prefix covers mapped block")]
    #[test_case("2001:db8::/32", "10.20.30.40", false ; "ipv6 network rejects ipv4 client")]
    fn range_contains(range: &str, addr: &str, expected: bool) {
        let range: IpRange = range.parse().unwrap();
        assert_eq!(range.contains(&ip(addr)), expected);
    }

    #[test_case("10.0.0.0/33")]
    #[test_case("10.0.0/8")]
    #[test_case("not-an-ip")]
    #[test_case("10.0.0.0/x")]
    fn rejects_malformed_ranges(input: &str) {
        assert_that!(input.parse::<IpRange>()).is_err();
    }

    #[test]
    fn bare_address_is_a_host_route() {
        let range: IpRange = "192.168.1.7".parse().unwrap();
        assert_eq!(range.prefix_len(), 32);
        assert_eq!(range.to_string(), "192.168.1.7/32");
    }

    #[test]
    fn mapped_network_is_stored_as_ipv4() {
        let range: IpRange = "::ffff:10.0.0.0/104".parse().unwrap();
        assert_eq!(range.to_string(), "10.0.0.0/8");

        let host: IpRange = "::ffff:192.168.1.7".parse().unwrap();
        assert_eq!(host.to_string(), "192.168.1.7/32");
    }

    #[test]
    fn empty_provider_knows_nothing() {
        assert_that!(EmptyIpRangeProvider.ip_ranges("corpnet")).is_none();
    }

    #[test]
    fn static_provider_parses_json_case_insensitively() {
        let provider = StaticIpRangeProvider::from_json_str(
            r#"{"CorpNet": ["10.0.0.0/8", "2001:db8::/32"], "lab": ["192.168.1.7"]}"#,
        )
        .unwrap();

        let corpnet = provider.ip_ranges("corpnet").unwrap();
        assert_eq!(corpnet.len(), 2);
        assert_that!(provider.ip_ranges("LAB")).is_some();
        assert_that!(provider.ip_ranges("unknown")).is_none();
    }

    #[test]
    fn static_provider_rejects_bad_entries() {
        assert_that!(StaticIpRangeProvider::from_json_str(r#"{"corpnet": ["10.0.0.0/99"]}"#))
            .is_err();
    }
}
