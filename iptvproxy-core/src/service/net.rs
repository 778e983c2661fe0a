//! Client address classification

use ipnet::{Ipv4Net, Ipv6Net};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::LazyLock;

/// Network a client connects from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpClass {
    Loopback,
    Private,
    Public,
}

impl IpClass {
    #[must_use]
    pub const fn is_lan(self) -> bool {
        matches!(self, Self::Loopback | Self::Private)
    }
}

static PRIVATE_V4: LazyLock<Vec<Ipv4Net>> = LazyLock::new(|| {
    [
        Ipv4Net::new(Ipv4Addr::new(10, 0, 0, 0), 8),
        Ipv4Net::new(Ipv4Addr::new(172, 16, 0, 0), 12),
        Ipv4Net::new(Ipv4Addr::new(192, 168, 0, 0), 16),
        Ipv4Net::new(Ipv4Addr::new(169, 254, 0, 0), 16),
        // Carrier-grade NAT
        Ipv4Net::new(Ipv4Addr::new(100, 64, 0, 0), 10),
    ]
    .into_iter()
    .flatten()
    .collect()
});

static PRIVATE_V6: LazyLock<Vec<Ipv6Net>> = LazyLock::new(|| {
    [
        // Unique local
        Ipv6Net::new(Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
        // Link local
        Ipv6Net::new(Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    ]
    .into_iter()
    .flatten()
    .collect()
});

#[must_use]
pub fn classify(ip: IpAddr) -> IpClass {
    match ip {
        IpAddr::V4(v4) => classify_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => classify_v4(v4),
            None if v6.is_loopback() => IpClass::Loopback,
            None if PRIVATE_V6.iter().any(|net| net.contains(&v6)) => IpClass::Private,
            None => IpClass::Public,
        },
    }
}

fn classify_v4(ip: Ipv4Addr) -> IpClass {
    if ip.is_loopback() {
        IpClass::Loopback
    } else if PRIVATE_V4.iter().any(|net| net.contains(&ip)) {
        IpClass::Private
    } else {
        IpClass::Public
    }
}
