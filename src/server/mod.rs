mod config;

use std::{net::SocketAddr, time::Duration};

use log::{debug, info, warn};
use tokio::net::{TcpListener, TcpStream};

pub use config::{Config as ServerConfig, DEFAULT_PORT};

/// Pause after a failed accept, so a full fd table does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

use crate::{
    address::DestinationAddress,
    error::RelayError,
    relay::Forwarded,
    socks5::{Replay, Socks5, SocksConfig},
    AsyncSocket,
};

pub struct Server {
    listener: TcpListener,
    config: ServerConfig,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, RelayError> {
        let listener = TcpListener::bind(config.listen)
            .await
            .map_err(|source| RelayError::Bind {
                addr: config.listen,
                source,
            })?;
        Ok(Server { listener, config })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, RelayError> {
        Ok(self.listener.local_addr()?)
    }

    /// Accepts connections forever, one task per client.
    pub async fn run(self) {
        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("accept failed: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let socks = self.config.socks;
            tokio::spawn(async move {
                info!("client connected: {}", peer);
                match handle_connection(socket, peer, socks).await {
                    Ok(forwarded) => debug!(
                        "{} closed by {:?} after {} bytes",
                        peer, forwarded.closed_by, forwarded.bytes
                    ),
                    Err(e) => warn!("{}: {}", peer, e),
                }
            });
        }
    }
}

/// Negotiates, dials and forwards one client connection.
pub async fn handle_connection(
    socket: impl AsyncSocket,
    peer: SocketAddr,
    config: SocksConfig,
) -> Result<Forwarded, RelayError> {
    let interrupted = Socks5::new_server(config, socket).accept().await?;
    debug!("{} requested {}", peer, interrupted.addr());

    let destination = match dial(interrupted.addr()).await {
        Ok(destination) => destination,
        Err(e) => {
            if config.reply_on_failure {
                if let RelayError::Connect { source, .. } = &e {
                    if let Err(reply_error) = interrupted.replay_error(Replay::from(source)).await {
                        debug!("{}: {}", peer, reply_error);
                    }
                }
            }
            return Err(e);
        }
    };
    interrupted.serve(destination).await
}

pub async fn dial(addr: &DestinationAddress) -> Result<TcpStream, RelayError> {
    let connected = match addr {
        DestinationAddress::Domain(host, port) => TcpStream::connect((host.as_str(), *port)).await,
        DestinationAddress::Ip(ip) => TcpStream::connect(*ip).await,
    };
    connected.map_err(|source| RelayError::Connect {
        addr: addr.clone(),
        source,
    })
}
