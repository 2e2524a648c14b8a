use thiserror::Error;

use super::address;
#[derive(Error, Debug)]
pub enum SocksError {
    #[error("Invalid Version: {0}")]
    InvalidVersion(u8),
    #[error("Command not supported: {0}")]
    CommandNotSupported(u8),
    #[error("Address type not supported: {0}")]
    AddressTypeNotSupported(u8),
    #[error("IOError: {0}")]
    IOError(#[from] std::io::Error),
    #[error("AddressError: {0}")]
    AddressError(#[from] address::AddrError),
}
