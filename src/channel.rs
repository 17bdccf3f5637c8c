// ABOUTME: The hub: peer table, endpoint registry, outbound dispatch, lifecycle
// ABOUTME: Implements ConnectionObserver so connections resolve endpoints and report lifecycle events

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::checksum::{Checksum, ChecksumRegistry};
use crate::clock::{Clock, JitterSource, RandomJitter, SystemClock};
use crate::config::ChannelOptions;
use crate::connection::{
    CallOutcome, ConnId, ConnectionHandle, ConnectionObserver, Direction, Handler, LocalIdentity,
};
use crate::dialer::{Dialer, TcpDialer};
use crate::error::TChannelError;
use crate::frame::{CallRequestBody, CodecError};
use crate::peer::PeerTable;

/// How often `dial_and_adopt` re-checks the peer table while the just-dialed
/// connection's init handshake is still in flight.
const DIAL_HANDSHAKE_POLL: std::time::Duration = std::time::Duration::from_millis(20);

struct Inner {
    local: LocalIdentity,
    options: ChannelOptions,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    checksum_registry: Arc<ChecksumRegistry>,
    dialer: Arc<dyn Dialer>,
    next_conn_id: AtomicU64,
    connections: Mutex<HashMap<ConnId, ConnectionHandle>>,
    peers: Mutex<PeerTable>,
    endpoints: Mutex<HashMap<Bytes, Handler>>,
    closed: AtomicBool,
}

impl ConnectionObserver for Inner {
    fn resolve_endpoint(&self, endpoint: &[u8]) -> Option<Handler> {
        self.endpoints.lock().unwrap().get(endpoint).cloned()
    }

    fn on_identified(&self, conn_id: ConnId, remote_name: String) {
        tracing::debug!(conn_id, remote_name = %remote_name, "connection identified");
        if let Some(handle) = self.connections.lock().unwrap().get(&conn_id).cloned() {
            self.peers.lock().unwrap().insert(remote_name, handle);
        }
    }

    fn on_reset(&self, conn_id: ConnId, remote_name: Option<String>, reason: String) {
        tracing::error!(conn_id, reason = %reason, "connection reset, evicting from peer table");
        self.connections.lock().unwrap().remove(&conn_id);
        if let Some(name) = remote_name {
            self.peers.lock().unwrap().remove(&name, conn_id);
        }
    }
}

/// The channel hub: peer table, endpoint registry, and outbound dispatch.
/// Cheaply cloneable — every clone shares the same underlying tables.
#[derive(Clone)]
pub struct Channel(Arc<Inner>);

impl Channel {
    pub fn new(local: LocalIdentity, options: ChannelOptions) -> Self {
        Self::with_collaborators(
            local,
            options,
            Arc::new(SystemClock),
            Arc::new(RandomJitter),
            Arc::new(ChecksumRegistry::new()),
            Arc::new(TcpDialer),
        )
    }

    pub fn with_collaborators(
        local: LocalIdentity,
        options: ChannelOptions,
        clock: Arc<dyn Clock>,
        jitter: Arc<dyn JitterSource>,
        checksum_registry: Arc<ChecksumRegistry>,
        dialer: Arc<dyn Dialer>,
    ) -> Self {
        Channel(Arc::new(Inner {
            local,
            options,
            clock,
            jitter,
            checksum_registry,
            dialer,
            next_conn_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
            peers: Mutex::new(PeerTable::new()),
            endpoints: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }))
    }

    /// Register an endpoint handler. Rejects redefinition.
    pub fn register_service(
        &self,
        endpoint: impl Into<Bytes>,
        handler: Handler,
    ) -> Result<(), TChannelError> {
        let endpoint = endpoint.into();
        let mut endpoints = self.0.endpoints.lock().unwrap();
        if endpoints.contains_key(&endpoint) {
            return Err(TChannelError::EndpointAlreadyDefined(
                String::from_utf8_lossy(&endpoint).into_owned(),
            ));
        }
        endpoints.insert(endpoint, handler);
        Ok(())
    }

    /// Adopt an already-established duplex stream as a connection to
    /// `remote_addr`. Socket acceptance/dialing itself is the caller's
    /// concern (e.g. the demo binaries' `TcpListener`/`TcpStream::connect`);
    /// the channel only owns what happens to the stream once it exists.
    pub fn adopt<S>(
        &self,
        stream: S,
        direction: Direction,
        remote_addr: impl Into<String>,
    ) -> ConnectionHandle
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let conn_id = self.0.next_conn_id.fetch_add(1, Ordering::SeqCst);
        let handle = crate::connection::spawn(
            stream,
            direction,
            conn_id,
            remote_addr.into(),
            self.0.local.clone(),
            self.0.clone() as Arc<dyn ConnectionObserver>,
            self.0.options.connection,
            self.0.clock.clone(),
            self.0.jitter.clone(),
            self.0.checksum_registry.clone(),
        );
        self.0
            .connections
            .lock()
            .unwrap()
            .insert(conn_id, handle.clone());
        handle
    }

    /// Head connection of `host_port`'s sequence (prefers outbound), if any.
    pub fn get_peer(&self, host_port: &str) -> Option<ConnectionHandle> {
        self.0.peers.lock().unwrap().get(host_port)
    }

    /// Dial and adopt a new outbound connection to `host_port`, then wait
    /// for its init handshake to identify the peer before handing back the
    /// handle. Used by `send` when no connection to the peer exists yet.
    async fn dial_and_adopt(&self, host_port: &str) -> Result<ConnectionHandle, TChannelError> {
        let stream = self.0.dialer.dial(host_port.to_string()).await?;
        self.adopt(stream, Direction::Out, host_port.to_string());

        let deadline = self.0.clock.now() + self.0.options.dial_timeout;
        loop {
            if let Some(handle) = self.get_peer(host_port) {
                return Ok(handle);
            }
            if self.0.clock.now() >= deadline {
                return Err(TChannelError::NoSuchPeer(host_port.to_string()));
            }
            tokio::time::sleep(DIAL_HANDSHAKE_POLL).await;
        }
    }

    /// Build a CallRequest to `host_port` and await its response. `ttl_ms`
    /// defaults to the channel's configured default; `ttl_ms == Some(0)`
    /// is rejected.
    pub async fn send(
        &self,
        host_port: &str,
        service: impl Into<Bytes>,
        arg1: Bytes,
        arg2: Bytes,
        arg3: Bytes,
        ttl_ms: Option<u32>,
    ) -> Result<CallOutcome, TChannelError> {
        let ttl_ms = ttl_ms.unwrap_or(self.0.options.default_ttl_ms);
        if ttl_ms == 0 {
            return Err(TChannelError::ZeroTtl);
        }

        let handle = match self.get_peer(host_port) {
            Some(handle) => handle,
            None => self.dial_and_adopt(host_port).await?,
        };

        let checksum_type = self.0.options.default_checksum_type;
        let checksum =
            Checksum::update(&self.0.checksum_registry, checksum_type, &arg1, &arg2, &arg3)
                .map_err(|e| TChannelError::Codec(CodecError::Checksum(e)))?;

        let body = CallRequestBody {
            ttl_ms,
            tracing: [0u8; 24],
            service: service.into(),
            headers: vec![],
            arg1,
            arg2,
            arg3,
            checksum,
        };

        handle.send(body).await
    }

    /// Mark the channel destroyed and reset every owned connection.
    pub async fn quit(&self, reason: impl Into<String>) {
        self.0.closed.store(true, Ordering::SeqCst);
        let reason = reason.into();
        let handles: Vec<ConnectionHandle> = self
            .0
            .connections
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        for handle in handles {
            handle.close(reason.clone()).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.0.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedJitter;
    use crate::dialer::QueuedDialer;
    use std::time::Duration;

    fn identity(host_port: &str) -> LocalIdentity {
        LocalIdentity {
            host_port: host_port.into(),
            process_name: format!("test[{host_port}]"),
        }
    }

    fn test_channel(host_port: &str) -> Channel {
        Channel::with_collaborators(
            identity(host_port),
            ChannelOptions::default(),
            Arc::new(SystemClock),
            Arc::new(FixedJitter(0)),
            Arc::new(ChecksumRegistry::new()),
            Arc::new(QueuedDialer::new()),
        )
    }

    #[tokio::test]
    async fn echo_call_round_trips_through_registered_endpoint() {
        let a = test_channel("127.0.0.1:4040");
        let b = test_channel("127.0.0.1:4041");

        b.register_service(
            Bytes::from_static(b"echo"),
            Arc::new(|_arg1, arg2, arg3, responder| {
                Box::pin(async move {
                    responder.respond(None, arg2, arg3).await;
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
        )
        .unwrap();

        let (a_stream, b_stream) = tokio::io::duplex(4096);
        a.adopt(a_stream, Direction::Out, "127.0.0.1:4041");
        b.adopt(b_stream, Direction::In, "127.0.0.1:4040");

        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = a
            .send(
                "127.0.0.1:4041",
                Bytes::from_static(b"svc"),
                Bytes::from_static(b"echo"),
                Bytes::from_static(b"h"),
                Bytes::from_static(b"hello"),
                Some(1000),
            )
            .await
            .unwrap();

        assert!(outcome.error.is_none());
        assert_eq!(outcome.arg2, Bytes::from_static(b"h"));
        assert_eq!(outcome.arg3, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn unknown_endpoint_yields_application_exception() {
        let a = test_channel("127.0.0.1:4042");
        let b = test_channel("127.0.0.1:4043");

        let (a_stream, b_stream) = tokio::io::duplex(4096);
        a.adopt(a_stream, Direction::Out, "127.0.0.1:4043");
        b.adopt(b_stream, Direction::In, "127.0.0.1:4042");

        tokio::time::sleep(Duration::from_millis(50)).await;

        let outcome = a
            .send(
                "127.0.0.1:4043",
                Bytes::from_static(b"svc"),
                Bytes::from_static(b"missing"),
                Bytes::new(),
                Bytes::new(),
                None,
            )
            .await
            .unwrap();

        match outcome.error {
            Some(TChannelError::ApplicationException { message, .. }) => {
                assert_eq!(message, "no such operation");
            }
            other => panic!("expected ApplicationException, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn send_rejects_zero_ttl() {
        let a = test_channel("127.0.0.1:4044");
        let err = a
            .send(
                "127.0.0.1:9999",
                Bytes::from_static(b"svc"),
                Bytes::new(),
                Bytes::new(),
                Bytes::new(),
                Some(0),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TChannelError::ZeroTtl));
    }

    #[tokio::test]
    async fn send_to_unknown_peer_fails_when_dial_has_nothing_queued() {
        let a = test_channel("127.0.0.1:4045");
        let err = a
            .send(
                "127.0.0.1:9999",
                Bytes::from_static(b"svc"),
                Bytes::new(),
                Bytes::new(),
                Bytes::new(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TChannelError::Socket(_)));
    }

    #[tokio::test]
    async fn send_auto_dials_when_no_connection_exists_yet() {
        let b = test_channel("127.0.0.1:4047");

        b.register_service(
            Bytes::from_static(b"echo"),
            Arc::new(|_arg1, arg2, arg3, responder| {
                Box::pin(async move {
                    responder.respond(None, arg2, arg3).await;
                }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            }),
        )
        .unwrap();

        // `a` never calls `adopt` itself — the dialer hands `send` the
        // outbound side of a duplex whose inbound side `b` adopts directly,
        // standing in for a real `TcpStream::connect`.
        let (a_stream, b_stream) = tokio::io::duplex(4096);
        let dialer = Arc::new(QueuedDialer::new());
        dialer.push(a_stream);
        let a = Channel::with_collaborators(
            identity("127.0.0.1:4046"),
            ChannelOptions::default(),
            Arc::new(SystemClock),
            Arc::new(FixedJitter(0)),
            Arc::new(ChecksumRegistry::new()),
            dialer,
        );
        b.adopt(b_stream, Direction::In, "127.0.0.1:4046");

        assert!(a.get_peer("127.0.0.1:4047").is_none());

        let outcome = a
            .send(
                "127.0.0.1:4047",
                Bytes::from_static(b"svc"),
                Bytes::from_static(b"echo"),
                Bytes::from_static(b"h"),
                Bytes::from_static(b"hello"),
                Some(1000),
            )
            .await
            .unwrap();

        assert!(outcome.error.is_none());
        assert_eq!(outcome.arg2, Bytes::from_static(b"h"));
        assert!(a.get_peer("127.0.0.1:4047").is_some());
    }
}
