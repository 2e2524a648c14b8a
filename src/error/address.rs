use thiserror::Error;
#[derive(Error, Debug)]
pub enum AddrError {
    #[error("Empty domain name")]
    EmptyDomain,
}
