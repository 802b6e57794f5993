//! TCP relay tunnel
//!
//! Listens on the local side of the forward and relays each accepted
//! connection to `address:remote_port`. Upstream failures only drop the
//! affected connection; a failing listener ends the tunnel.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use pk_core::config::Profile;
use pk_core::TunnelParams;

use crate::{TunnelError, TunnelIo};

/// Host the local listener binds when only a port is given
const DEFAULT_BIND_HOST: &str = "127.0.0.1";

/// How long to wait for the upstream connection before dropping the client
const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Relays local TCP connections to a single upstream target
#[derive(Debug, Clone)]
pub struct TcpRelay {
    bind_host: String,
    bind_port: u16,
    upstream: String,
}

impl TcpRelay {
    /// Create a relay from a local port spec and an upstream address
    ///
    /// `local` is either a port (`"3307"`) or `host:port`.
    pub fn new(local: &str, upstream_host: &str, remote_port: u16) -> Result<Self, TunnelError> {
        let (bind_host, bind_port) = parse_local_bind(local)?;
        Ok(Self {
            bind_host,
            bind_port,
            upstream: format_host_port(upstream_host, remote_port),
        })
    }

    /// Build the relay a worker needs, resolving the target through its profile
    pub fn for_params(params: &TunnelParams, profile: &Profile) -> Result<Self, TunnelError> {
        let address = profile.target_address(&params.name, &params.namespace, &params.target)?;
        Self::new(&params.local_port, address, params.remote_port)
    }

    /// Upstream `host:port`
    pub fn upstream(&self) -> &str {
        &self.upstream
    }

    fn bind_addr(&self) -> String {
        format_host_port(&self.bind_host, self.bind_port)
    }
}

#[async_trait]
impl TunnelIo for TcpRelay {
    fn describe(&self) -> String {
        format!("{} -> {}", self.bind_addr(), self.upstream)
    }

    async fn run(
        self: Box<Self>,
        ready: oneshot::Sender<SocketAddr>,
        stop: CancellationToken,
    ) -> Result<(), TunnelError> {
        let listener = TcpListener::bind((self.bind_host.as_str(), self.bind_port))
            .await
            .map_err(|source| TunnelError::Bind {
                addr: self.bind_addr(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        tracing::info!("Relay listening on {} -> {}", local_addr, self.upstream);
        if ready.send(local_addr).is_err() {
            tracing::debug!("Readiness receiver dropped before relay became ready");
        }

        let mut connections = JoinSet::new();
        let result = loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    tracing::info!("Relay on {} stopping", local_addr);
                    break Ok(());
                }
                accepted = listener.accept() => match accepted {
                    Ok((inbound, peer)) => {
                        tracing::debug!("Accepted {} on {}", peer, local_addr);
                        connections.spawn(relay_connection(
                            inbound,
                            self.upstream.clone(),
                            stop.child_token(),
                        ));
                    }
                    Err(e) if is_transient(&e) => {
                        tracing::warn!("Transient accept error on {}: {}", local_addr, e);
                    }
                    Err(e) => break Err(TunnelError::Accept(e)),
                },
                // Reap finished connections so the set does not grow unbounded
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        };

        connections.shutdown().await;
        result
    }
}

/// Copy bytes both ways between one client and the upstream
async fn relay_connection(mut inbound: TcpStream, upstream: String, stop: CancellationToken) {
    let connect = tokio::time::timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(&upstream));
    let mut outbound = match connect.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::warn!("Failed to connect to upstream {}: {}", upstream, e);
            return;
        }
        Err(_) => {
            tracing::warn!(
                "Timed out connecting to upstream {} after {:?}",
                upstream,
                UPSTREAM_CONNECT_TIMEOUT
            );
            return;
        }
    };

    tokio::select! {
        _ = stop.cancelled() => {}
        copied = tokio::io::copy_bidirectional(&mut inbound, &mut outbound) => match copied {
            Ok((to_upstream, from_upstream)) => {
                tracing::debug!(
                    "Connection closed: {} bytes to upstream, {} bytes from upstream",
                    to_upstream,
                    from_upstream
                );
            }
            Err(e) => tracing::debug!("Connection to {} closed: {}", upstream, e),
        },
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Split a local port spec into (host, port)
///
/// Accepts `"3307"`, `"0.0.0.0:3307"`, `"localhost:3307"` and `"[::1]:3307"`.
pub fn parse_local_bind(spec: &str) -> Result<(String, u16), TunnelError> {
    let spec = spec.trim();
    let invalid = || TunnelError::InvalidLocalPort(spec.to_string());

    let (host, port) = match spec.rsplit_once(':') {
        Some((host, port)) => {
            let host = host.trim_start_matches('[').trim_end_matches(']');
            let host = if host.is_empty() { DEFAULT_BIND_HOST } else { host };
            (host, port)
        }
        None => (DEFAULT_BIND_HOST, spec),
    };

    let port = port.parse::<u16>().map_err(|_| invalid())?;
    Ok((host.to_string(), port))
}

fn format_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn echo_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let (mut reader, mut writer) = socket.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                });
            }
        });
        addr
    }

    #[test]
    fn test_parse_local_bind() {
        assert_eq!(
            parse_local_bind("3307").unwrap(),
            ("127.0.0.1".to_string(), 3307)
        );
        assert_eq!(
            parse_local_bind("0.0.0.0:8080").unwrap(),
            ("0.0.0.0".to_string(), 8080)
        );
        assert_eq!(parse_local_bind(":5000").unwrap(), ("127.0.0.1".to_string(), 5000));
        assert_eq!(parse_local_bind("[::1]:5000").unwrap(), ("::1".to_string(), 5000));
        assert!(matches!(
            parse_local_bind("db"),
            Err(TunnelError::InvalidLocalPort(_))
        ));
        assert!(parse_local_bind("70000").is_err());
    }

    #[test]
    fn test_format_host_port() {
        assert_eq!(format_host_port("10.0.0.1", 5432), "10.0.0.1:5432");
        assert_eq!(format_host_port("::1", 5432), "[::1]:5432");
    }

    #[test]
    fn test_for_params_resolves_target_address() {
        let profile = pk_core_profile();
        let params = TunnelParams {
            name: "db".to_string(),
            namespace: "prod".to_string(),
            target: "db-1".to_string(),
            local_port: "5433".to_string(),
            remote_port: 5432,
            profile: "/unused".into(),
        };
        let relay = TcpRelay::for_params(&params, &profile).unwrap();
        assert_eq!(relay.upstream(), "10.0.0.13:5432");
        assert_eq!(relay.describe(), "127.0.0.1:5433 -> 10.0.0.13:5432");
    }

    fn pk_core_profile() -> Profile {
        use pk_core::config::{ServiceSpec, TargetSpec};

        let target = |name: &str, address: &str| TargetSpec {
            name: name.to_string(),
            address: address.to_string(),
        };
        Profile {
            services: vec![ServiceSpec {
                name: "db".to_string(),
                namespace: "prod".to_string(),
                ports: vec![],
                targets: vec![target("db-0", "10.0.0.12"), target("db-1", "10.0.0.13")],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_relay_forwards_and_stops() {
        let upstream = echo_server().await;
        let relay = TcpRelay::new("127.0.0.1:0", "127.0.0.1", upstream.port()).unwrap();

        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let handle = tokio::spawn(Box::new(relay).run(ready_tx, stop.clone()));

        let local = ready_rx.await.unwrap();
        let mut client = TcpStream::connect(local).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        stop.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_relay_bind_conflict_fails_before_ready() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let relay = TcpRelay::new(&port.to_string(), "127.0.0.1", 1).unwrap();

        let (ready_tx, ready_rx) = oneshot::channel();
        let result = Box::new(relay).run(ready_tx, CancellationToken::new()).await;

        assert!(matches!(result, Err(TunnelError::Bind { .. })));
        assert!(ready_rx.await.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_upstream_drops_client_only() {
        // Reserve a port and close it so nothing listens there
        let closed = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let relay = TcpRelay::new("127.0.0.1:0", "127.0.0.1", closed).unwrap();

        let (ready_tx, ready_rx) = oneshot::channel();
        let stop = CancellationToken::new();
        let handle = tokio::spawn(Box::new(relay).run(ready_tx, stop.clone()));
        let local = ready_rx.await.unwrap();

        let mut client = TcpStream::connect(local).await.unwrap();
        let mut buf = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .unwrap();
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(!handle.is_finished());

        stop.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
