use std::{
    fmt::Display,
    net::{Ipv4Addr, SocketAddrV4},
};

use crate::error::AddrError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationAddress {
    Domain(String, u16),
    Ip(SocketAddrV4),
}

impl DestinationAddress {
    pub fn port(&self) -> u16 {
        match self {
            DestinationAddress::Domain(_, port) => *port,
            DestinationAddress::Ip(addr) => addr.port(),
        }
    }
    pub fn from_ipv4(octets: [u8; 4], port: u16) -> Self {
        DestinationAddress::Ip(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    }
    /// Builds a domain destination from the raw hostname bytes of a request.
    ///
    /// The bytes are not checked against any hostname grammar; anything that
    /// is not UTF-8 is replaced lossily and left for the resolver to reject.
    pub fn from_domain(domain: &[u8], port: u16) -> Result<Self, AddrError> {
        if domain.is_empty() {
            return Err(AddrError::EmptyDomain);
        }
        Ok(DestinationAddress::Domain(
            String::from_utf8_lossy(domain).to_string(),
            port,
        ))
    }
}

impl Display for DestinationAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DestinationAddress::Domain(domain, port) => write!(f, "{}:{}", domain, port),
            DestinationAddress::Ip(addr) => write!(f, "{}", addr),
        }
    }
}
