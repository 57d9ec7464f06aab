//! FidoNet-style node addresses.
//!
//! An address has the form `zone:net/node[.point][@domain]`. The domain names
//! the network the address belongs to; peers usually advertise one address
//! per network they are part of.

use crate::error::AddressError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Zone and net used by networks that number nodes with a single integer
const LEGACY_ZONE_NET: u16 = 20000;

/// A node address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FtnAddress {
    /// Zone number
    pub zone: u16,
    /// Net number
    pub net: u16,
    /// Node number
    pub node: u16,
    /// Point number, 0 for the node itself
    pub point: u16,
    /// Network name, lowercased
    pub domain: Option<String>,
}

impl FtnAddress {
    /// Create an address without point or domain
    #[must_use]
    pub fn new(zone: u16, net: u16, node: u16) -> Self {
        Self {
            zone,
            net,
            node,
            point: 0,
            domain: None,
        }
    }

    /// Set the point number
    #[must_use]
    pub fn with_point(mut self, point: u16) -> Self {
        self.point = point;
        self
    }

    /// Set the domain
    #[must_use]
    pub fn with_domain(mut self, domain: &str) -> Self {
        self.domain = Some(domain.to_ascii_lowercase());
        self
    }

    /// Name of the network this address belongs to
    #[must_use]
    pub fn network_name(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    /// Single-number node id for networks using zone 20000, net 20000
    #[must_use]
    pub fn legacy_node(&self) -> Option<u16> {
        (self.zone == LEGACY_ZONE_NET && self.net == LEGACY_ZONE_NET).then_some(self.node)
    }

    /// Check if both addresses name the same node.
    ///
    /// Domains only have to agree when both addresses carry one.
    #[must_use]
    pub fn same_node(&self, other: &Self) -> bool {
        self.zone == other.zone
            && self.net == other.net
            && self.node == other.node
            && self.point == other.point
            && match (&self.domain, &other.domain) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
    }

    /// Directory-safe key, `zone.net.node[.point]`
    #[must_use]
    pub fn spool_key(&self) -> String {
        if self.point == 0 {
            format!("{}.{}.{}", self.zone, self.net, self.node)
        } else {
            format!("{}.{}.{}.{}", self.zone, self.net, self.node, self.point)
        }
    }
}

fn number(input: &str, part: &str, what: &'static str) -> Result<u16, AddressError> {
    if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::new(input, what));
    }
    part.parse().map_err(|_| AddressError::new(input, what))
}

impl FromStr for FtnAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        let (body, domain) = match input.split_once('@') {
            Some((body, domain)) => {
                if domain.is_empty() || !domain.bytes().all(|b| b.is_ascii_graphic()) {
                    return Err(AddressError::new(input, "invalid domain"));
                }
                (body, Some(domain.to_ascii_lowercase()))
            }
            None => (input, None),
        };

        let (zone, rest) = body
            .split_once(':')
            .ok_or_else(|| AddressError::new(input, "missing zone"))?;
        let (net, rest) = rest
            .split_once('/')
            .ok_or_else(|| AddressError::new(input, "missing net"))?;
        let (node, point) = match rest.split_once('.') {
            Some((node, point)) => (node, Some(point)),
            None => (rest, None),
        };

        Ok(Self {
            zone: number(input, zone, "invalid zone")?,
            net: number(input, net, "invalid net")?,
            node: number(input, node, "invalid node")?,
            point: match point {
                Some(p) => number(input, p, "invalid point")?,
                None => 0,
            },
            domain,
        })
    }
}

impl fmt::Display for FtnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}/{}", self.zone, self.net, self.node)?;
        if self.point != 0 {
            write!(f, ".{}", self.point)?;
        }
        if let Some(domain) = &self.domain {
            write!(f, "@{domain}")?;
        }
        Ok(())
    }
}

impl TryFrom<String> for FtnAddress {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FtnAddress> for String {
    fn from(addr: FtnAddress) -> Self {
        addr.to_string()
    }
}

/// Parse a whitespace-separated address list, skipping entries that do not
/// parse.
#[must_use]
pub fn parse_address_list(text: &str) -> Vec<FtnAddress> {
    text.split_ascii_whitespace()
        .filter_map(|item| match item.parse::<FtnAddress>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                tracing::debug!("Skipping address list entry: {}", e);
                None
            }
        })
        .collect()
}

/// Format an address list for ADR
#[must_use]
pub fn format_address_list(addrs: &[FtnAddress]) -> String {
    addrs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

/// First address belonging to the named network
#[must_use]
pub fn address_for_network<'a>(addrs: &'a [FtnAddress], network: &str) -> Option<&'a FtnAddress> {
    addrs.iter().find(|a| {
        a.network_name()
            .is_some_and(|d| d.eq_ignore_ascii_case(network))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_address() {
        let addr: FtnAddress = "20000:20000/1234.5@WWIVnet".parse().unwrap();
        assert_eq!(addr.zone, 20000);
        assert_eq!(addr.net, 20000);
        assert_eq!(addr.node, 1234);
        assert_eq!(addr.point, 5);
        assert_eq!(addr.network_name(), Some("wwivnet"));
        assert_eq!(addr.to_string(), "20000:20000/1234.5@wwivnet");
    }

    #[test]
    fn test_parse_minimal_address() {
        let addr: FtnAddress = "2:5020/1".parse().unwrap();
        assert_eq!(addr, FtnAddress::new(2, 5020, 1));
        assert_eq!(addr.network_name(), None);
        assert_eq!(addr.to_string(), "2:5020/1");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in [
            "",
            "1:2",
            "1/2",
            "a:2/3",
            "1:2/-1",
            "1:2/3.",
            "1:2/3@",
            "1:70000/1",
            "1:2/3.4.5",
        ] {
            assert!(bad.parse::<FtnAddress>().is_err(), "{bad:?} should fail");
        }
    }

    #[test]
    fn test_address_list_skips_invalid() {
        let list = parse_address_list("20000:20000/1@wwivnet 1:2/-1@fidonet  21:1/100@fsxnet");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].legacy_node(), Some(1));
        assert_eq!(list[1].network_name(), Some("fsxnet"));
        assert_eq!(
            format_address_list(&list),
            "20000:20000/1@wwivnet 21:1/100@fsxnet"
        );
    }

    #[test]
    fn test_address_for_network() {
        let list = parse_address_list("1:2/3@fidonet 20000:20000/7@wwivnet");
        assert_eq!(
            address_for_network(&list, "wwivnet").map(ToString::to_string),
            Some("20000:20000/7@wwivnet".to_string())
        );
        assert!(address_for_network(&list, "amiganet").is_none());
    }

    #[test]
    fn test_legacy_node() {
        assert_eq!(FtnAddress::new(20000, 20000, 42).legacy_node(), Some(42));
        assert_eq!(FtnAddress::new(1, 20000, 42).legacy_node(), None);
        assert_eq!(FtnAddress::new(20000, 1, 42).legacy_node(), None);
    }

    #[test]
    fn test_same_node() {
        let a: FtnAddress = "1:2/3@fidonet".parse().unwrap();
        let b: FtnAddress = "1:2/3".parse().unwrap();
        let c: FtnAddress = "1:2/3@othernet".parse().unwrap();
        assert!(a.same_node(&b));
        assert!(!a.same_node(&c));
        assert!(!a.same_node(&FtnAddress::new(1, 2, 4)));
    }

    #[test]
    fn test_spool_key() {
        assert_eq!(FtnAddress::new(1, 2, 3).spool_key(), "1.2.3");
        assert_eq!(
            FtnAddress::new(1, 2, 3).with_point(4).with_domain("x").spool_key(),
            "1.2.3.4"
        );
    }
}
