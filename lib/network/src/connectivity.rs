use get_if_addrs::{get_if_addrs, Interface};
use metrics::platform::{Connectivity, ConnectivityError};
use std::net::IpAddr;
use tracing::{debug, warn};

/// Ready when at least one non-loopback interface has an IPv4 address.
///
/// With `allow_loopback` set, a host whose only interface is loopback is ready too and
/// reports the loopback address. Meant for local demos.
#[derive(Debug, Default, Clone, Copy)]
pub struct InterfaceConnectivity {
    allow_loopback: bool,
}

impl InterfaceConnectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_loopback(mut self, allow_loopback: bool) -> Self {
        self.allow_loopback = allow_loopback;
        self
    }
}

impl Connectivity for InterfaceConnectivity {
    fn check(&self) -> Result<IpAddr, ConnectivityError> {
        let if_addrs = get_if_addrs().map_err(|error| {
            warn!(%error, "Failed to list network interfaces");
            ConnectivityError::NotReady(error.to_string())
        })?;

        reachable_address(&if_addrs, self.allow_loopback).ok_or_else(|| {
            ConnectivityError::NotReady("no non-loopback interface has an IPv4 address".to_string())
        })
    }
}

/// First IPv4 address of a non-loopback interface, falling back to an IPv4 loopback
/// address when `allow_loopback` is set.
fn reachable_address(if_addrs: &[Interface], allow_loopback: bool) -> Option<IpAddr> {
    let mut ipv4 = if_addrs.iter().filter(|if_addr| if_addr.ip().is_ipv4());

    if let Some(if_addr) = ipv4.clone().find(|if_addr| !if_addr.is_loopback()) {
        let ip = if_addr.ip();
        debug!(%ip, interface = %if_addr.name, "Network interface is up");
        return Some(ip);
    }

    if allow_loopback {
        if let Some(if_addr) = ipv4.next() {
            let ip = if_addr.ip();
            debug!(%ip, "Only loopback is up, using it");
            return Some(ip);
        }
    }
    None
}

#[cfg(test)]
mod connectivity_tests {
    use super::*;
    use get_if_addrs::{IfAddr, Ifv4Addr, Ifv6Addr};
    use pretty_assertions_sorted::assert_eq;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn strict_check_never_reports_loopback() {
        match InterfaceConnectivity::new().check() {
            Ok(ip) => assert!(!ip.is_loopback()),
            Err(error) => assert!(matches!(error, ConnectivityError::NotReady(_))),
        }
    }

    #[test]
    fn relaxed_check_succeeds_with_any_ipv4_interface() {
        let relaxed = InterfaceConnectivity::new().allow_loopback(true);
        let has_ipv4 = get_if_addrs()
            .map(|addrs| addrs.iter().any(|if_addr| if_addr.ip().is_ipv4()))
            .unwrap_or(false);
        if has_ipv4 {
            assert!(relaxed.check().is_ok());
        }
    }

    fn v4(name: &str, ip: [u8; 4]) -> Interface {
        Interface {
            name: name.to_string(),
            addr: IfAddr::V4(Ifv4Addr {
                ip: Ipv4Addr::from(ip),
                netmask: Ipv4Addr::new(255, 255, 255, 0),
                broadcast: None,
            }),
        }
    }

    fn v6(name: &str, ip: Ipv6Addr) -> Interface {
        Interface {
            name: name.to_string(),
            addr: IfAddr::V6(Ifv6Addr {
                ip,
                netmask: Ipv6Addr::UNSPECIFIED,
                broadcast: None,
            }),
        }
    }

    #[test]
    fn ipv6_addresses_are_skipped() {
        let link_local = Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 1);
        let if_addrs = vec![
            v6("eth0", link_local),
            v4("lo", [127, 0, 0, 1]),
            v4("eth0", [192, 168, 1, 20]),
        ];

        assert_eq!(
            reachable_address(&if_addrs, false),
            Some(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)))
        );
    }

    #[test]
    fn loopback_fallback_is_ipv4_only() {
        let if_addrs = vec![v6("lo", Ipv6Addr::LOCALHOST), v4("lo", [127, 0, 0, 1])];

        assert_eq!(reachable_address(&if_addrs, false), None);
        assert_eq!(
            reachable_address(&if_addrs, true),
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        );
        assert_eq!(reachable_address(&[v6("lo", Ipv6Addr::LOCALHOST)], true), None);
    }
}
