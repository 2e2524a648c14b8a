pub mod address;
mod error;
pub mod relay;
pub mod server;
pub mod socks5;

pub use address::DestinationAddress;
pub use error::{AddrError, RelayError, SocksError};
pub use relay::{Forwarded, Side};
pub use server::{Server, ServerConfig};
pub use socks5::{Socks5, SocksConfig};
use tokio::io::{AsyncRead, AsyncWrite};

pub trait AsyncSocket: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
impl<T> AsyncSocket for T where T: AsyncRead + AsyncWrite + Unpin + Send + 'static {}
