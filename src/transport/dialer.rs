//! Connection establishment for the reconnecting transport
//!
//! The transport only needs something that can produce a fresh byte stream
//! to the peer. Over the VPN tunnel that is a TCP socket, either dialed or
//! accepted; tests plug in in-memory duplex streams.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// Produces connections to the peer relay
pub trait Dialer: Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Start one connection attempt
    ///
    /// The returned future owns everything it needs, so the transport can
    /// hold it across `select!` iterations without borrowing the dialer.
    fn dial(&self) -> BoxFuture<'static, io::Result<Self::Conn>>;

    /// Human readable peer description for logs
    fn peer(&self) -> &str;
}

/// Dials a fixed peer address
#[derive(Debug, Clone)]
pub struct TcpDialer {
    address: String,
    connect_timeout: Duration,
}

impl TcpDialer {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }
}

impl Dialer for TcpDialer {
    type Conn = TcpStream;

    fn dial(&self) -> BoxFuture<'static, io::Result<TcpStream>> {
        let address = self.address.clone();
        let connect_timeout = self.connect_timeout;

        async move {
            debug!("Dialing relay peer {}", address);
            let stream = tokio::time::timeout(connect_timeout, TcpStream::connect(&address))
                .await
                .map_err(|_| {
                    io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect to {} timed out after {:?}", address, connect_timeout),
                    )
                })??;
            stream.set_nodelay(true)?;
            Ok::<_, io::Error>(stream)
        }
        .boxed()
    }

    fn peer(&self) -> &str {
        &self.address
    }
}

/// Accepts the next inbound connection on a bound listener
#[derive(Debug, Clone)]
pub struct TcpAcceptor {
    listener: Arc<TcpListener>,
    local: String,
}

impl TcpAcceptor {
    /// Bind the listening socket
    pub async fn bind(address: &str) -> io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let local = listener.local_addr()?.to_string();
        info!("Listening for relay peer on {}", local);
        Ok(Self {
            listener: Arc::new(listener),
            local,
        })
    }

    /// Address the listener is bound to (resolves port 0)
    pub fn local_addr(&self) -> &str {
        &self.local
    }
}

impl Dialer for TcpAcceptor {
    type Conn = TcpStream;

    fn dial(&self) -> BoxFuture<'static, io::Result<TcpStream>> {
        let listener = Arc::clone(&self.listener);

        async move {
            let (stream, peer) = listener.accept().await?;
            info!("Accepted relay peer {}", peer);
            stream.set_nodelay(true)?;
            Ok::<_, io::Error>(stream)
        }
        .boxed()
    }

    fn peer(&self) -> &str {
        &self.local
    }
}
