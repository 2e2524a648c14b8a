use log::debug;
use tokio::{io::AsyncWriteExt, select};

use crate::{error::RelayError, AsyncSocket};

/// The side whose read half reached EOF (or failed) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Destination,
}

#[derive(Debug)]
pub struct Forwarded {
    pub closed_by: Side,
    /// Bytes copied in the direction that finished.
    pub bytes: u64,
}

/// Copies bytes both ways until one direction ends, then shuts down both
/// write halves. The sockets are released when this returns.
pub async fn forward(
    client: impl AsyncSocket,
    destination: impl AsyncSocket,
) -> Result<Forwarded, RelayError> {
    let (mut client_reader, mut client_writer) = tokio::io::split(client);
    let (mut destination_reader, mut destination_writer) = tokio::io::split(destination);

    let (closed_by, copied) = select! {
        copied = tokio::io::copy(&mut client_reader, &mut destination_writer) => {
            (Side::Client, copied)
        }
        copied = tokio::io::copy(&mut destination_reader, &mut client_writer) => {
            (Side::Destination, copied)
        }
    };

    // Either peer may already be gone.
    if let Err(e) = client_writer.shutdown().await {
        debug!("client shutdown: {}", e);
    }
    if let Err(e) = destination_writer.shutdown().await {
        debug!("destination shutdown: {}", e);
    }

    Ok(Forwarded {
        closed_by,
        bytes: copied?,
    })
}
