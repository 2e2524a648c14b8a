use std::net::SocketAddr;

use thiserror::Error;

use crate::{address::DestinationAddress, socks5::Stage};
pub(crate) mod address;
pub(crate) mod socks;

pub use address::AddrError;
pub use socks::SocksError;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Handshake failed during {stage}: {source}")]
    Handshake {
        stage: Stage,
        #[source]
        source: SocksError,
    },
    #[error("Unable to connect to {addr}: {source}")]
    Connect {
        addr: DestinationAddress,
        #[source]
        source: std::io::Error,
    },
    #[error("Unable to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("IOError: {0}")]
    IO(#[from] std::io::Error),
}

impl RelayError {
    /// The session stage this error ended, `None` for listener errors.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RelayError::Handshake { stage, .. } => Some(*stage),
            RelayError::Connect { .. } => Some(Stage::Dialing),
            RelayError::IO(_) => Some(Stage::Forwarding),
            RelayError::Bind { .. } => None,
        }
    }
}
