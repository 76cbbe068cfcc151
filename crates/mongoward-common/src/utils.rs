//! Utility functions for mongoward
//!
//! Hostname derivation and address ordering used by discovery and the
//! founder election, plus local interface lookup.

use std::net::Ipv4Addr;

use if_addrs::IfAddr;

/// Prefix of every derived cluster hostname.
pub const HOSTNAME_PREFIX: &str = "mongo-";

/// Domain suffix of every derived cluster hostname.
pub const HOSTNAME_DOMAIN: &str = ".mongo-cluster";

/// Derive the stable cluster hostname for an external IPv4 address.
///
/// `10.0.0.1` becomes `mongo-10-0-0-1.mongo-cluster`. The mapping is pure
/// and injective on distinct addresses: digits never contain `-`, so the
/// dash-separated form round-trips.
///
/// # Examples
///
/// ```
/// use mongoward_common::derive_hostname;
///
/// assert_eq!(derive_hostname("10.0.0.1"), "mongo-10-0-0-1.mongo-cluster");
/// ```
pub fn derive_hostname(address: &str) -> String {
    format!(
        "{}{}{}",
        HOSTNAME_PREFIX,
        address.replace('.', "-"),
        HOSTNAME_DOMAIN
    )
}

/// Recover the IPv4 address from a derived cluster hostname.
///
/// Returns `None` when the hostname is not in the derived form or the
/// embedded address is not a valid IPv4 address.
pub fn parse_hostname(hostname: &str) -> Option<String> {
    let rest = hostname.strip_prefix(HOSTNAME_PREFIX)?;
    let rest = rest.strip_suffix(HOSTNAME_DOMAIN)?;
    let address = rest.replace('-', ".");
    address.parse::<Ipv4Addr>().ok()?;
    Some(address)
}

/// Sort a list of addresses into the cluster's agreed total order and drop
/// duplicates. Every node applies the same octet-wise string compare, so the
/// minimum is unique cluster-wide and identifies the founder.
pub fn sort_addresses(mut addresses: Vec<String>) -> Vec<String> {
    addresses.sort();
    addresses.dedup();
    addresses
}

/// Get the local IP address
///
/// Returns the first non-loopback IPv4 address found,
/// or "127.0.0.1" as fallback.
pub fn local_ip() -> String {
    if_addrs::get_if_addrs()
        .ok()
        .and_then(|addrs| {
            addrs
                .into_iter()
                .find(|iface| !iface.is_loopback() && matches!(iface.addr, IfAddr::V4(_)))
                .and_then(|iface| match iface.addr {
                    IfAddr::V4(addr) => Some(addr.ip.to_string()),
                    _ => None,
                })
        })
        .unwrap_or_else(|| "127.0.0.1".to_string())
}

/// Check whether an address belongs to one of this host's interfaces.
pub fn is_local_address(address: &str) -> bool {
    if_addrs::get_if_addrs()
        .map(|addrs| {
            addrs
                .iter()
                .any(|iface| iface.addr.ip().to_string() == address)
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_derive_hostname() {
        assert_eq!(derive_hostname("10.0.0.1"), "mongo-10-0-0-1.mongo-cluster");
        assert_eq!(
            derive_hostname("192.168.100.42"),
            "mongo-192-168-100-42.mongo-cluster"
        );
    }

    #[test]
    fn test_parse_hostname() {
        assert_eq!(
            parse_hostname("mongo-10-0-0-1.mongo-cluster"),
            Some("10.0.0.1".to_string())
        );
        assert_eq!(parse_hostname("mongo-10-0-0-1"), None);
        assert_eq!(parse_hostname("10-0-0-1.mongo-cluster"), None);
        assert_eq!(parse_hostname("mongo-10-0-0.mongo-cluster"), None);
        assert_eq!(parse_hostname("mongo-10-0-0-999.mongo-cluster"), None);
    }

    #[test]
    fn test_sort_addresses_order_and_dedup() {
        let sorted = sort_addresses(vec![
            "10.0.0.3".to_string(),
            "10.0.0.1".to_string(),
            "10.0.0.2".to_string(),
            "10.0.0.1".to_string(),
        ]);
        assert_eq!(sorted, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    }

    #[test]
    fn test_local_ip_returns_valid_ip() {
        let ip = local_ip();
        assert!(
            ip == "127.0.0.1" || ip.split('.').filter_map(|s| s.parse::<u8>().ok()).count() == 4
        );
    }

    proptest! {
        #[test]
        fn hostname_round_trips(a in 0u8.., b in 0u8.., c in 0u8.., d in 0u8..) {
            let address = format!("{}.{}.{}.{}", a, b, c, d);
            let hostname = derive_hostname(&address);
            prop_assert_eq!(parse_hostname(&hostname), Some(address));
        }
    }
}
