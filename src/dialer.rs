// ABOUTME: Injected outbound-connection establishment so the channel can auto-dial a peer
// ABOUTME: Production code dials real TCP; tests swap in an in-memory double

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Any byte duplex a dialed connection can hand back to the channel —
/// object-safe so [`Dialer::dial`] can return one without naming a concrete
/// stream type.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

pub type DialFuture =
    Pin<Box<dyn Future<Output = std::io::Result<Box<dyn DuplexStream>>> + Send>>;

/// Establishes the outbound connection to a `host:port`. Swapped for
/// [`QueuedDialer`] in tests so `Channel::send`'s auto-dial path doesn't
/// need a real socket.
pub trait Dialer: Send + Sync + std::fmt::Debug {
    fn dial(&self, host_port: String) -> DialFuture;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDialer;

impl Dialer for TcpDialer {
    fn dial(&self, host_port: String) -> DialFuture {
        Box::pin(async move {
            let stream = TcpStream::connect(host_port).await?;
            Ok(Box::new(stream) as Box<dyn DuplexStream>)
        })
    }
}

/// Hands out pre-built streams in LIFO order instead of opening a real
/// socket — for tests that already hold one end of a `tokio::io::duplex`
/// and want `Channel::send` to auto-dial onto it.
#[derive(Debug, Default)]
pub struct QueuedDialer {
    streams: Mutex<Vec<Box<dyn DuplexStream>>>,
}

impl QueuedDialer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, stream: impl DuplexStream + 'static) {
        self.streams.lock().unwrap().push(Box::new(stream));
    }
}

impl Dialer for QueuedDialer {
    fn dial(&self, host_port: String) -> DialFuture {
        let next = self.streams.lock().unwrap().pop();
        Box::pin(async move {
            next.ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no queued stream for {host_port}"),
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queued_dialer_hands_out_prepared_streams() {
        let dialer = QueuedDialer::new();
        let (a, _b) = tokio::io::duplex(64);
        dialer.push(a);

        assert!(dialer.dial("127.0.0.1:1".into()).await.is_ok());
        assert!(dialer.dial("127.0.0.1:1".into()).await.is_err());
    }
}
