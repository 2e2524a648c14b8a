mod config;

use std::{
    fmt::Display,
    net::{Ipv4Addr, SocketAddrV4},
};

use log::debug;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub use config::Config as SocksConfig;

use crate::{
    address::DestinationAddress,
    error::{RelayError, SocksError},
    relay::{self, Forwarded},
    AsyncSocket,
};

pub struct Socks5;

pub struct Socks5Server<T> {
    config: SocksConfig,
    socket_stream: T,
}

impl Socks5 {
    pub fn new_server<T: AsyncSocket>(config: SocksConfig, socket_stream: T) -> Socks5Server<T> {
        Socks5Server {
            config,
            socket_stream,
        }
    }
}

/// Coarse phases of a session, used to report where it failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Greeting,
    Request,
    Dialing,
    Forwarding,
}

impl Stage {
    fn fail(self, source: SocksError) -> RelayError {
        RelayError::Handshake {
            stage: self,
            source,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Greeting => write!(f, "greeting"),
            Stage::Request => write!(f, "request"),
            Stage::Dialing => write!(f, "dialing"),
            Stage::Forwarding => write!(f, "forwarding"),
        }
    }
}

impl<T: AsyncSocket> Socks5Server<T> {
    /// Runs method negotiation and reads the CONNECT request.
    ///
    /// On error the socket is dropped, which closes the client connection.
    /// Nothing is written back unless `reply_on_failure` is set and the
    /// request was rejected for its command or address type.
    pub async fn accept(mut self) -> Result<ServerInterruptedSocks5Stream<T>, RelayError> {
        let auth_request = AuthRequest::read(&mut self.socket_stream)
            .await
            .map_err(|e| Stage::Greeting.fail(e))?;
        debug!("offered auth methods: {:?}", auth_request.methods);
        AuthResponse::new(AuthMethod::NoAuth)
            .write(&mut self.socket_stream)
            .await
            .map_err(|e| Stage::Greeting.fail(e))?;

        let request = match CommandRequest::read(&mut self.socket_stream).await {
            Ok(request) => request,
            Err(e) => {
                match e.replay() {
                    Some(replay) if self.config.reply_on_failure => {
                        if let Err(write_error) = CommandResponse::new(replay)
                            .write(&mut self.socket_stream)
                            .await
                        {
                            debug!("unable to send failure reply: {}", write_error);
                        }
                    }
                    _ => {}
                }
                return Err(Stage::Request.fail(e));
            }
        };

        Ok(ServerInterruptedSocks5Stream {
            addr: request.addr,
            socket: self.socket_stream,
        })
    }
}

/// A client that finished the handshake and waits for the proxy to dial.
pub struct ServerInterruptedSocks5Stream<T> {
    addr: DestinationAddress,
    socket: T,
}

impl<T: AsyncSocket> ServerInterruptedSocks5Stream<T> {
    pub fn addr(&self) -> &DestinationAddress {
        &self.addr
    }

    pub async fn replay_error(mut self, replay: Replay) -> Result<(), RelayError> {
        CommandResponse::new(replay)
            .write(&mut self.socket)
            .await
            .map_err(|e| Stage::Dialing.fail(e))
    }

    /// Acknowledges the request and relays bytes until either side closes.
    pub async fn serve(mut self, destination: impl AsyncSocket) -> Result<Forwarded, RelayError> {
        CommandResponse::new(Replay::Succeeded)
            .write(&mut self.socket)
            .await
            .map_err(|e| Stage::Forwarding.fail(e))?;
        relay::forward(self.socket, destination).await
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Version {
    V5 = 5,
}

impl TryFrom<u8> for Version {
    type Error = SocksError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            5 => Ok(Version::V5),
            v => Err(SocksError::InvalidVersion(v)),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy, Default)]
pub enum AuthMethod {
    #[default]
    NoAuth,
    GssApi,
    UsernamePassword,
    NoAcceptableMethod,
    Other(u8),
}

impl From<&AuthMethod> for u8 {
    fn from(v: &AuthMethod) -> Self {
        match *v {
            AuthMethod::NoAuth => 0,
            AuthMethod::GssApi => 1,
            AuthMethod::UsernamePassword => 2,
            AuthMethod::NoAcceptableMethod => 0xff,
            AuthMethod::Other(v) => v,
        }
    }
}

impl From<u8> for AuthMethod {
    fn from(v: u8) -> Self {
        match v {
            0 => AuthMethod::NoAuth,
            1 => AuthMethod::GssApi,
            2 => AuthMethod::UsernamePassword,
            0xff => AuthMethod::NoAcceptableMethod,
            v => AuthMethod::Other(v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Connect = 1,
    Bind = 2,
    UdpAssociate = 3,
}

impl TryFrom<u8> for Command {
    type Error = SocksError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Command::Connect),
            2 => Ok(Command::Bind),
            3 => Ok(Command::UdpAssociate),
            v => Err(SocksError::CommandNotSupported(v)),
        }
    }
}

#[derive(PartialEq, Debug, Clone, Copy)]
pub enum Replay {
    Succeeded,
    GeneralSocksServerFailure,
    NetworkUnreachable,
    HostUnreachable,
    ConnectionRefused,
    CommandNotSupported,
    AddressTypeNotSupported,
}

impl From<&Replay> for u8 {
    fn from(v: &Replay) -> Self {
        match *v {
            Replay::Succeeded => 0,
            Replay::GeneralSocksServerFailure => 1,
            Replay::NetworkUnreachable => 3,
            Replay::HostUnreachable => 4,
            Replay::ConnectionRefused => 5,
            Replay::CommandNotSupported => 7,
            Replay::AddressTypeNotSupported => 8,
        }
    }
}

impl From<&std::io::Error> for Replay {
    fn from(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => Replay::ConnectionRefused,
            std::io::ErrorKind::NetworkUnreachable => Replay::NetworkUnreachable,
            std::io::ErrorKind::HostUnreachable
            | std::io::ErrorKind::AddrNotAvailable
            | std::io::ErrorKind::TimedOut => Replay::HostUnreachable,
            _ => Replay::GeneralSocksServerFailure,
        }
    }
}

impl SocksError {
    /// The reply code a client may be told about, if any.
    fn replay(&self) -> Option<Replay> {
        match self {
            SocksError::CommandNotSupported(_) => Some(Replay::CommandNotSupported),
            SocksError::AddressTypeNotSupported(_) => Some(Replay::AddressTypeNotSupported),
            _ => None,
        }
    }
}

struct AuthRequest {
    methods: Vec<AuthMethod>,
}

impl AuthRequest {
    async fn read(mut reader: impl AsyncRead + Unpin) -> Result<Self, SocksError> {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header).await?;
        Version::try_from(header[0])?;
        let mut methods = vec![0u8; header[1] as usize];
        reader.read_exact(&mut methods).await?;
        Ok(AuthRequest {
            methods: methods.into_iter().map(AuthMethod::from).collect(),
        })
    }
}

struct AuthResponse {
    method: AuthMethod,
}

impl AuthResponse {
    fn new(method: AuthMethod) -> Self {
        AuthResponse { method }
    }
    async fn write(&self, mut writer: impl AsyncWrite + Unpin) -> Result<(), SocksError> {
        writer
            .write_all(&[Version::V5 as u8, (&self.method).into()])
            .await
            .map_err(|e| e.into())
    }
}

struct CommandRequest {
    addr: DestinationAddress,
}

impl CommandRequest {
    /// Reads the 4 byte header, then the address and port.
    ///
    /// Version and command are checked before any address byte is read, and
    /// an unsupported address type stops reading right after the header.
    async fn read(mut reader: impl AsyncRead + Unpin) -> Result<Self, SocksError> {
        let mut header = [0u8; 4];
        reader.read_exact(&mut header).await?;
        let [version, command, _, address_type] = header;
        Version::try_from(version)?;
        if Command::try_from(command)? != Command::Connect {
            return Err(SocksError::CommandNotSupported(command));
        }
        let addr = Address::read(address_type, &mut reader).await?;
        Ok(CommandRequest { addr: addr.addr })
    }
}

struct CommandResponse {
    replay: Replay,
    bound: SocketAddrV4,
}

impl CommandResponse {
    /// The bound address is always reported as 0.0.0.0:0.
    fn new(replay: Replay) -> Self {
        CommandResponse {
            replay,
            bound: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
        }
    }
    async fn write(&self, mut writer: impl AsyncWrite + Unpin) -> Result<(), SocksError> {
        let mut buf = vec![Version::V5 as u8, (&self.replay).into(), 0, 1];
        buf.extend_from_slice(&self.bound.ip().octets());
        buf.extend_from_slice(&self.bound.port().to_be_bytes());
        writer.write_all(&buf).await.map_err(|e| e.into())
    }
}

struct Address {
    addr: DestinationAddress,
}

impl Address {
    async fn read(address_type: u8, mut reader: impl AsyncRead + Unpin) -> Result<Self, SocksError> {
        match address_type {
            1 => {
                let mut buf = [0u8; 6];
                reader.read_exact(&mut buf).await?;
                Ok(Self {
                    addr: DestinationAddress::from_ipv4(
                        [buf[0], buf[1], buf[2], buf[3]],
                        u16::from_be_bytes([buf[4], buf[5]]),
                    ),
                })
            }
            3 => {
                let len = reader.read_u8().await? as usize;
                let mut buf = vec![0u8; len + 2];
                reader.read_exact(&mut buf).await?;
                let port = u16::from_be_bytes([buf[len], buf[len + 1]]);
                Ok(Self {
                    addr: DestinationAddress::from_domain(&buf[..len], port)?,
                })
            }
            v => Err(SocksError::AddressTypeNotSupported(v)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;
    use crate::error::AddrError;
    use tokio::io::duplex;

    const SUCCESS: [u8; 10] = [5, 0, 0, 1, 0, 0, 0, 0, 0, 0];

    #[tokio::test]
    async fn greeting_consumes_exactly_its_methods() {
        for n in 0..=255u8 {
            let mut wire = vec![5, n];
            wire.extend((0..n).map(|i| i.wrapping_mul(7)));
            wire.extend_from_slice(b"rest");
            let mut reader = wire.as_slice();
            let request = AuthRequest::read(&mut reader).await.unwrap();
            assert_eq!(request.methods.len(), n as usize);
            assert_eq!(reader, b"rest");
        }
    }

    #[tokio::test]
    async fn greeting_rejects_other_versions() {
        let mut reader: &[u8] = &[4, 1, 0];
        let err = AuthRequest::read(&mut reader).await.err().unwrap();
        assert!(matches!(err, SocksError::InvalidVersion(4)));
    }

    #[tokio::test]
    async fn short_greeting_is_an_io_error() {
        let mut reader: &[u8] = &[5, 3, 0];
        match AuthRequest::read(&mut reader).await {
            Err(SocksError::IOError(e)) => assert_eq!(e.kind(), ErrorKind::UnexpectedEof),
            _ => panic!("expected unexpected eof"),
        }
    }

    #[tokio::test]
    async fn auth_response_selects_no_auth() {
        let mut out = Vec::new();
        AuthResponse::new(AuthMethod::NoAuth)
            .write(&mut out)
            .await
            .unwrap();
        assert_eq!(out, [5, 0]);
    }

    #[tokio::test]
    async fn request_with_ipv4() {
        let mut reader: &[u8] = &[5, 1, 0, 1, 127, 0, 0, 1, 0, 80];
        let request = CommandRequest::read(&mut reader).await.unwrap();
        assert_eq!(request.addr.to_string(), "127.0.0.1:80");
        assert!(reader.is_empty());
    }

    #[tokio::test]
    async fn request_with_domain_reads_exactly_its_length() {
        let host = b"a\x00b\x07\xffc";
        let mut wire = vec![5, 1, 0, 3, host.len() as u8];
        wire.extend_from_slice(host);
        wire.extend_from_slice(&[0x1f, 0x90, 0xaa]);
        let mut reader = wire.as_slice();
        let request = CommandRequest::read(&mut reader).await.unwrap();
        assert_eq!(request.addr.port(), 8080);
        assert_eq!(reader, [0xaa]);
    }

    #[tokio::test]
    async fn request_with_empty_domain_fails() {
        let mut reader: &[u8] = &[5, 1, 0, 3, 0, 0, 80];
        let err = CommandRequest::read(&mut reader).await.err().unwrap();
        assert!(matches!(
            err,
            SocksError::AddressError(AddrError::EmptyDomain)
        ));
    }

    #[tokio::test]
    async fn unsupported_commands_stop_after_header() {
        for command in [2u8, 3, 0, 9] {
            let mut reader: &[u8] = &[5, command, 0, 1, 127, 0, 0, 1, 0, 80];
            let err = CommandRequest::read(&mut reader).await.err().unwrap();
            assert!(matches!(err, SocksError::CommandNotSupported(c) if c == command));
            assert_eq!(reader, [127, 0, 0, 1, 0, 80]);
        }
    }

    #[tokio::test]
    async fn unsupported_address_types_stop_after_header() {
        for address_type in [4u8, 0, 2, 5, 0xff] {
            let mut reader: &[u8] = &[5, 1, 0, address_type, 1, 2, 3];
            let err = CommandRequest::read(&mut reader).await.err().unwrap();
            assert!(matches!(err, SocksError::AddressTypeNotSupported(t) if t == address_type));
            assert_eq!(reader, [1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn request_rejects_other_versions() {
        let mut reader: &[u8] = &[4, 1, 0, 1];
        let err = CommandRequest::read(&mut reader).await.err().unwrap();
        assert!(matches!(err, SocksError::InvalidVersion(4)));
    }

    #[tokio::test]
    async fn responses_report_zeroed_bound_address() {
        let mut out = Vec::new();
        CommandResponse::new(Replay::Succeeded)
            .write(&mut out)
            .await
            .unwrap();
        assert_eq!(out, SUCCESS);

        let mut out = Vec::new();
        CommandResponse::new(Replay::ConnectionRefused)
            .write(&mut out)
            .await
            .unwrap();
        assert_eq!(out, [5, 5, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn failed_dials_map_to_their_reply_code() {
        let cases = [
            (ErrorKind::ConnectionRefused, Replay::ConnectionRefused, 5),
            (ErrorKind::NetworkUnreachable, Replay::NetworkUnreachable, 3),
            (ErrorKind::HostUnreachable, Replay::HostUnreachable, 4),
            (ErrorKind::TimedOut, Replay::HostUnreachable, 4),
            (ErrorKind::PermissionDenied, Replay::GeneralSocksServerFailure, 1),
        ];
        for (kind, replay, code) in cases {
            let mapped = Replay::from(&std::io::Error::from(kind));
            assert_eq!(mapped, replay);
            assert_eq!(u8::from(&mapped), code);
        }
    }

    #[tokio::test]
    async fn success_reply_failure_is_reported_as_forwarding() {
        let (mut client, server) = duplex(1024);
        let (destination, _destination_peer) = duplex(1024);
        client
            .write_all(&[5, 1, 0, 5, 1, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let interrupted = Socks5::new_server(SocksConfig::default(), server)
            .accept()
            .await
            .unwrap();
        drop(client);

        let err = interrupted.serve(destination).await.err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Forwarding));
    }

    #[tokio::test]
    async fn accept_then_serve() {
        let (mut client, server) = duplex(1024);
        let (destination, mut destination_peer) = duplex(1024);
        client
            .write_all(&[5, 2, 0, 2, 5, 1, 0, 1, 10, 0, 0, 7, 0x01, 0xbb])
            .await
            .unwrap();

        let interrupted = Socks5::new_server(SocksConfig::default(), server)
            .accept()
            .await
            .unwrap();
        assert_eq!(interrupted.addr().to_string(), "10.0.0.7:443");
        let session = tokio::spawn(interrupted.serve(destination));

        let mut reply = [0u8; 12];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[..2], [5, 0]);
        assert_eq!(reply[2..], SUCCESS);

        client.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        destination_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");

        drop(client);
        let forwarded = session.await.unwrap().unwrap();
        assert_eq!(forwarded.bytes, 5);
    }

    #[tokio::test]
    async fn rejected_request_closes_silently_by_default() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(&[5, 1, 0, 5, 2, 0, 1, 127, 0, 0, 1, 0, 80])
            .await
            .unwrap();
        let err = Socks5::new_server(SocksConfig::default(), server)
            .accept()
            .await
            .err()
            .unwrap();
        assert_eq!(err.stage(), Some(Stage::Request));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, [5, 0]);
    }

    #[tokio::test]
    async fn rejected_request_is_answered_when_configured() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(&[5, 1, 0, 5, 1, 0, 4])
            .await
            .unwrap();
        let config = SocksConfig {
            reply_on_failure: true,
        };
        let err = Socks5::new_server(config, server).accept().await.err().unwrap();
        assert!(matches!(
            err,
            RelayError::Handshake {
                source: SocksError::AddressTypeNotSupported(4),
                ..
            }
        ));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, [5, 0, 5, 8, 0, 1, 0, 0, 0, 0, 0, 0]);
    }

    #[tokio::test]
    async fn bad_greeting_gets_no_reply() {
        let (mut client, server) = duplex(1024);
        client.write_all(&[4, 1, 0]).await.unwrap();
        let config = SocksConfig {
            reply_on_failure: true,
        };
        let err = Socks5::new_server(config, server).accept().await.err().unwrap();
        assert_eq!(err.stage(), Some(Stage::Greeting));

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());
    }

    #[tokio::test]
    async fn replay_error_sends_failure_code() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(&[5, 1, 0, 5, 1, 0, 1, 127, 0, 0, 1, 0, 1])
            .await
            .unwrap();
        let interrupted = Socks5::new_server(SocksConfig::default(), server)
            .accept()
            .await
            .unwrap();
        interrupted
            .replay_error(Replay::GeneralSocksServerFailure)
            .await
            .unwrap();

        let mut received = Vec::new();
        client.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, [5, 0, 5, 1, 0, 1, 0, 0, 0, 0, 0, 0]);
    }
}
