//! Fixed seed nodes
//!
//! Compiled-in bootstrap addresses, used only when the node knows no other
//! peers. IPv4 seeds are stored IPv4-mapped inside the 16-byte form.

use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use crate::config::Network;

/// Default peer-to-peer port on main net
pub const MAIN_P2P_PORT: u16 = 19914;

/// One seed: a 16-byte IPv6 address and a port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSpec6 {
    pub addr: [u8; 16],
    pub port: u16,
}

const fn seed(addr: [u8; 16]) -> SeedSpec6 {
    SeedSpec6 {
        addr,
        port: MAIN_P2P_PORT,
    }
}

pub const MAIN_SEEDS: &[SeedSpec6] = &[
    seed([0x2a, 0x01, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0xcf, 0x69, 0xfe]),
    seed([0x20, 0x01, 0x19, 0xf0, 0x70, 0x01, 0x3c, 0x96, 0x54, 0x00, 0x01, 0xff, 0xfe, 0x4f, 0x25, 0xa6]),
    seed([0x26, 0x00, 0x3c, 0x01, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x03, 0x29, 0x42]),
    seed([0x2a, 0x01, 0x7e, 0x00, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x47, 0x06, 0x58]),
    seed([0x26, 0x00, 0x3c, 0x03, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x47, 0xa9, 0xec]),
    seed([0x2a, 0x01, 0x7e, 0x01, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x47, 0x06, 0x5a]),
    seed([0x24, 0x00, 0x89, 0x02, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x47, 0x06, 0xf1]),
    seed([0x24, 0x00, 0x89, 0x01, 0x00, 0x00, 0x00, 0x00, 0xf0, 0x3c, 0x91, 0xff, 0xfe, 0x47, 0x06, 0xb2]),
];

pub const TEST_SEEDS: &[SeedSpec6] = &[];

impl SeedSpec6 {
    pub fn to_socket_addr(&self) -> SocketAddr {
        let v6 = Ipv6Addr::from(self.addr);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        SocketAddr::new(ip, self.port)
    }
}

/// Seed table for a network. Regtest never bootstraps from seeds.
pub fn seed_table(network: Network) -> &'static [SeedSpec6] {
    match network {
        Network::Main => MAIN_SEEDS,
        Network::Test => TEST_SEEDS,
        Network::Regtest => &[],
    }
}

pub fn fixed_seeds(network: Network) -> Vec<SocketAddr> {
    seed_table(network)
        .iter()
        .map(SeedSpec6::to_socket_addr)
        .collect()
}

/// Seeds to dial at startup: the fixed list, but only while the address
/// book is empty.
pub fn bootstrap_seeds(network: Network, known_addresses: usize) -> Vec<SocketAddr> {
    if known_addresses > 0 {
        return Vec::new();
    }
    fixed_seeds(network)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_seed_table() {
        let seeds = fixed_seeds(Network::Main);
        assert_eq!(seeds.len(), 8);
        assert!(seeds.iter().all(|addr| addr.port() == 19914));
        assert_eq!(
            seeds[0],
            "[2a01:7e00::f03c:91ff:fecf:69fe]:19914".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(
            seeds[7],
            "[2400:8901::f03c:91ff:fe47:6b2]:19914".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_test_and_regtest_have_no_seeds() {
        assert!(fixed_seeds(Network::Test).is_empty());
        assert!(fixed_seeds(Network::Regtest).is_empty());
    }

    #[test]
    fn test_bootstrap_only_when_address_book_empty() {
        assert_eq!(bootstrap_seeds(Network::Main, 0).len(), 8);
        assert!(bootstrap_seeds(Network::Main, 3).is_empty());
    }

    #[test]
    fn test_ipv4_mapped_seed() {
        let mut addr = [0u8; 16];
        addr[10] = 0xff;
        addr[11] = 0xff;
        addr[12..].copy_from_slice(&[10, 0, 0, 7]);
        let spec = SeedSpec6 { addr, port: 1 };
        assert_eq!(spec.to_socket_addr(), "10.0.0.7:1".parse::<SocketAddr>().unwrap());
    }
}
