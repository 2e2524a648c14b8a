use std::net::{Ipv4Addr, SocketAddr};

use crate::socks5::SocksConfig;

pub const DEFAULT_PORT: u16 = 9999;

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub listen: SocketAddr,
    pub socks: SocksConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            socks: SocksConfig::default(),
        }
    }
}
