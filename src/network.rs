//! Loopback listener and connector for the single sync peer

use crate::error::{ChainError, Result};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::ops::Range;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

pub const LOOPBACK: Ipv4Addr = Ipv4Addr::LOCALHOST;
pub const DEFAULT_PORT_RANGE: Range<u16> = 1236..1300;

/// Hands out random listener ports, never the same one twice.
#[derive(Debug, Clone)]
pub struct PortAllocator {
    range: Range<u16>,
    used: HashSet<u16>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_PORT_RANGE)
    }
}

impl PortAllocator {
    pub fn new(range: Range<u16>) -> Self {
        Self {
            range,
            used: HashSet::new(),
        }
    }

    pub fn next_port(&mut self) -> Option<u16> {
        let free: Vec<u16> = self.range.clone().filter(|p| !self.used.contains(p)).collect();
        let port = *free.choose(&mut thread_rng())?;
        self.used.insert(port);
        Some(port)
    }

    pub fn used(&self) -> &HashSet<u16> {
        &self.used
    }

    /// Bind `host` on the first free random port that the OS also accepts.
    pub async fn bind(&mut self, host: IpAddr) -> Result<(u16, TcpListener)> {
        while let Some(port) = self.next_port() {
            match TcpListener::bind(SocketAddr::new(host, port)).await {
                Ok(listener) => {
                    info!("Listening for a peer on {}:{}", host, port);
                    return Ok((port, listener));
                }
                Err(e) if e.kind() == ErrorKind::AddrInUse => {
                    warn!("Port {} already in use, trying another", port);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ChainError::NetworkError(format!(
            "no free port left in {}..{}",
            self.range.start, self.range.end
        )))
    }
}

/// Parse an operator-entered port. Surrounding whitespace is ignored.
pub fn parse_port(input: &str) -> Result<u16> {
    input
        .trim()
        .parse::<u16>()
        .map_err(|_| ChainError::NetworkError(format!("Invalid port number: {:?}", input)))
}

/// Dial the peer. Failure is recoverable; the caller may retry another port.
pub async fn connect_peer(host: IpAddr, port: u16) -> Result<TcpStream> {
    let addr = SocketAddr::new(host, port);
    match TcpStream::connect(addr).await {
        Ok(stream) => {
            info!("Connected to peer at {}", addr);
            Ok(stream)
        }
        Err(e) => Err(ChainError::ConnectFailed {
            addr: addr.to_string(),
            reason: e.to_string(),
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts after the first link is lost; zero disables reconnecting.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// How the sync loop reaches its peer.
#[derive(Debug)]
pub enum PeerLink {
    /// Wait for the peer to dial in; one connection at a time.
    Inbound(TcpListener),
    /// Dial the peer ourselves.
    Outbound(SocketAddr),
}

impl PeerLink {
    pub fn outbound(host: IpAddr, port: u16) -> Self {
        PeerLink::Outbound(SocketAddr::new(host, port))
    }

    pub async fn establish(&self) -> Result<TcpStream> {
        match self {
            PeerLink::Inbound(listener) => {
                let (stream, addr) = listener.accept().await?;
                info!("Peer connected from {}", addr);
                Ok(stream)
            }
            PeerLink::Outbound(addr) => connect_peer(addr.ip(), addr.port()).await,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            PeerLink::Inbound(listener) => match listener.local_addr() {
                Ok(addr) => format!("inbound on {}", addr),
                Err(_) => "inbound".to_string(),
            },
            PeerLink::Outbound(addr) => format!("outbound to {}", addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> IpAddr {
        IpAddr::V4(LOOPBACK)
    }

    #[test]
    fn test_ports_are_unique_and_in_range() {
        let mut ports = PortAllocator::new(1236..1240);
        let mut seen = HashSet::new();
        for _ in 0..4 {
            let port = ports.next_port().unwrap();
            assert!((1236..1240).contains(&port));
            assert!(seen.insert(port));
        }
        assert!(ports.next_port().is_none());
        assert_eq!(ports.used().len(), 4);
    }

    #[test]
    fn test_parse_port() {
        assert_eq!(parse_port("1250").unwrap(), 1250);
        assert_eq!(parse_port(" 1250\n").unwrap(), 1250);
        assert!(parse_port("-1").is_err());
        assert!(parse_port("12.5").is_err());
        assert!(parse_port("70000").is_err());
        assert!(parse_port("").is_err());
    }

    #[tokio::test]
    async fn test_bind_and_connect() {
        tokio::time::timeout(Duration::from_secs(5), async {
            let mut ports = PortAllocator::default();
            let (port, listener) = ports.bind(loopback()).await.unwrap();
            assert!(DEFAULT_PORT_RANGE.contains(&port));

            let link = PeerLink::Inbound(listener);
            let (accepted, dialed) = tokio::join!(link.establish(), connect_peer(loopback(), port));
            assert!(accepted.is_ok());
            assert!(dialed.is_ok());
        })
        .await
        .expect("test_bind_and_connect timed out");
    }

    #[tokio::test]
    async fn test_connect_failure_is_recoverable() {
        tokio::time::timeout(Duration::from_secs(5), async {
            // grab a port and close it again so nothing listens there
            let listener = TcpListener::bind((loopback(), 0)).await.unwrap();
            let port = listener.local_addr().unwrap().port();
            drop(listener);

            match connect_peer(loopback(), port).await {
                Err(ChainError::ConnectFailed { addr, .. }) => {
                    assert_eq!(addr, format!("127.0.0.1:{}", port));
                }
                other => panic!("expected ConnectFailed, got {:?}", other.map(|_| ())),
            }
        })
        .await
        .expect("test_connect_failure_is_recoverable timed out");
    }

    #[test]
    fn test_describe_outbound() {
        let link = PeerLink::outbound(loopback(), 1250);
        assert_eq!(link.describe(), "outbound to 127.0.0.1:1250");
    }
}
