//! Core of a bidirectional, framed, multiplexed RPC transport: frame codec,
//! chunk reader, pluggable checksums, the per-connection actor, and the
//! channel hub that ties peers and endpoint dispatch together.
//!
//! Socket I/O, TLS, service discovery, and message fragmentation/streaming
//! are deliberately out of scope — the connection actor operates over any
//! `AsyncRead + AsyncWrite` byte duplex, so real sockets, `tokio::io::duplex`
//! test doubles, or anything else that fits the trait all work unmodified.

pub mod buffer;
pub mod channel;
pub mod checksum;
pub mod clock;
pub mod config;
pub mod connection;
pub mod dialer;
pub mod error;
pub mod frame;
pub mod peer;
pub mod reader;

pub use channel::Channel;
pub use checksum::{Checksum, ChecksumRegistry};
pub use config::{ChannelOptions, ConnectionOptions};
pub use connection::{
    CallOutcome, ConnId, ConnectionHandle, ConnectionObserver, Direction, Handler, HandlerError,
    LocalIdentity, Responder,
};
pub use dialer::{Dialer, DuplexStream, TcpDialer};
pub use error::{AppErrorPayload, JsError, TChannelError};
pub use frame::{
    CallRequestBody, CallResponseBody, ErrorBody, Frame, FrameType, InitBody, ResponseCode,
};

/// Boxed catch-all for library-boundary ergonomics.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for core transport operations.
pub type Result<T> = std::result::Result<T, Error>;
