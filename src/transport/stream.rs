//! Stream-backed channels: TCP sockets and in-process pipes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use super::{BoxFuture, Channel, Connector, TransportKind};
use crate::error::{Result, RobovacError};

const READ_CHUNK: usize = 8 * 1024;

/// Channel over any async byte stream
#[derive(Debug)]
pub struct StreamChannel<S> {
    stream: S,
    kind: TransportKind,
    closed: bool,
}

impl<S> StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap a connected stream
    pub fn new(stream: S, kind: TransportKind) -> Self {
        Self {
            stream,
            kind,
            closed: false,
        }
    }
}

impl<S> Channel for StreamChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn send(&mut self, bytes: Bytes) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed {
                return Err(RobovacError::Connection("Channel closed".to_string()));
            }
            self.stream.write_all(&bytes).await?;
            self.stream.flush().await?;
            Ok(())
        })
    }

    fn recv(&mut self) -> BoxFuture<'_, Option<Result<Bytes>>> {
        Box::pin(async move {
            if self.closed {
                return None;
            }
            // read_buf is cancel-safe: nothing is consumed unless it completes
            let mut buf = BytesMut::with_capacity(READ_CHUNK);
            match self.stream.read_buf(&mut buf).await {
                Ok(0) => {
                    self.closed = true;
                    None
                }
                Ok(_) => Some(Ok(buf.freeze())),
                Err(e) => Some(Err(e.into())),
            }
        })
    }

    fn close(&mut self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if !self.closed {
                self.closed = true;
                let _ = self.stream.shutdown().await;
            }
        })
    }

    fn kind(&self) -> TransportKind {
        self.kind
    }
}

/// Direct TCP connection to a device on the local network
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
    connect_timeout: Duration,
}

impl TcpConnector {
    /// Connector for `host:port`
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr))
                .await
                .map_err(|_| {
                    RobovacError::Connection(format!(
                        "Connect to {} timed out after {:?}",
                        self.addr, self.connect_timeout
                    ))
                })?
                .map_err(|e| RobovacError::Connection(format!("Connect to {}: {e}", self.addr)))?;
            stream.set_nodelay(true)?;
            Ok(Box::new(StreamChannel::new(stream, TransportKind::Local)) as Box<dyn Channel>)
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.addr)
    }
}

/// In-process "local" connector backed by `tokio::io::duplex`.
///
/// Each `open` creates a pipe and hands the far end to the paired
/// [`DuplexListener`]. Availability can be toggled to simulate an
/// unreachable device.
#[derive(Debug)]
pub struct DuplexConnector {
    incoming: mpsc::UnboundedSender<DuplexStream>,
    buffer: usize,
    available: AtomicBool,
}

/// Accepting side of a [`DuplexConnector`]
#[derive(Debug)]
pub struct DuplexListener {
    incoming: mpsc::UnboundedReceiver<DuplexStream>,
}

impl DuplexConnector {
    /// Connector/listener pair with a per-direction pipe buffer
    pub fn pair(buffer: usize) -> (Self, DuplexListener) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: tx,
                buffer,
                available: AtomicBool::new(true),
            },
            DuplexListener { incoming: rx },
        )
    }

    /// Refuse (`false`) or allow (`true`) new connections
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl Connector for DuplexConnector {
    fn open(&self) -> BoxFuture<'_, Result<Box<dyn Channel>>> {
        Box::pin(async move {
            if !self.available.load(Ordering::SeqCst) {
                return Err(RobovacError::Connection("Device unreachable".to_string()));
            }
            let (near, far) = tokio::io::duplex(self.buffer);
            self.incoming
                .send(far)
                .map_err(|_| RobovacError::Connection("Listener gone".to_string()))?;
            Ok(Box::new(StreamChannel::new(near, TransportKind::Local)) as Box<dyn Channel>)
        })
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Local
    }

    fn describe(&self) -> String {
        "duplex://in-process".to_string()
    }
}

impl DuplexListener {
    /// Wait for the next connection; `None` once the connector is dropped
    pub async fn accept(&mut self) -> Option<StreamChannel<DuplexStream>> {
        self.incoming
            .recv()
            .await
            .map(|stream| StreamChannel::new(stream, TransportKind::Local))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (connector, mut listener) = DuplexConnector::pair(1024);
        let mut client = connector.open().await.unwrap();
        let mut device = listener.accept().await.unwrap();

        client.send(Bytes::from_static(b"ping")).await.unwrap();
        let got = device.recv().await.unwrap().unwrap();
        assert_eq!(&got[..], b"ping");

        device.send(Bytes::from_static(b"pong")).await.unwrap();
        assert_eq!(&client.recv().await.unwrap().unwrap()[..], b"pong");
    }

    #[tokio::test]
    async fn test_close_is_seen_and_idempotent() {
        let (connector, mut listener) = DuplexConnector::pair(1024);
        let mut client = connector.open().await.unwrap();
        let mut device = listener.accept().await.unwrap();

        device.close().await;
        device.close().await;
        assert!(client.recv().await.is_none());
        assert!(device.recv().await.is_none());
        assert!(device.send(Bytes::from_static(b"x")).await.is_err());
    }

    #[tokio::test]
    async fn test_unavailable_connector_refuses() {
        let (connector, _listener) = DuplexConnector::pair(1024);
        connector.set_available(false);
        assert!(matches!(
            connector.open().await,
            Err(RobovacError::Connection(_))
        ));
        connector.set_available(true);
        assert!(connector.open().await.is_ok());
    }

    #[tokio::test]
    async fn test_recv_cancel_safe() {
        let (connector, mut listener) = DuplexConnector::pair(1024);
        let mut client = connector.open().await.unwrap();
        let mut device = listener.accept().await.unwrap();

        // Cancel a pending recv, then make sure the data still arrives
        let pending = tokio::time::timeout(Duration::from_millis(10), client.recv()).await;
        assert!(pending.is_err());
        device.send(Bytes::from_static(b"late")).await.unwrap();
        assert_eq!(&client.recv().await.unwrap().unwrap()[..], b"late");
    }

    #[tokio::test]
    async fn test_tcp_connect_refused() {
        // Bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(1));
        assert_eq!(connector.kind(), TransportKind::Local);
        assert!(connector.describe().starts_with("tcp://"));
        assert!(matches!(
            connector.open().await,
            Err(RobovacError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_tcp_roundtrip() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut channel = StreamChannel::new(stream, TransportKind::Local);
            let got = channel.recv().await.unwrap().unwrap();
            channel.send(got).await.unwrap();
        });

        let connector = TcpConnector::new(addr.to_string(), Duration::from_secs(1));
        let mut channel = connector.open().await.unwrap();
        channel.send(Bytes::from_static(b"echo")).await.unwrap();
        assert_eq!(&channel.recv().await.unwrap().unwrap()[..], b"echo");
        server.await.unwrap();
    }
}
