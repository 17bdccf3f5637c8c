// ABOUTME: Per-link actor: owns the socket, handshake state, op tables, and the sweeper
// ABOUTME: External callers only ever talk to a `ConnectionHandle` over mpsc/oneshot

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::checksum::ChecksumRegistry;
use crate::clock::{Clock, JitterSource};
use crate::config::ConnectionOptions;
use crate::error::{AppErrorPayload, JsError, TChannelError};
use crate::frame::{
    CallRequestBody, CallResponseBody, CodecError, Frame, FrameBody, InitBody, ResponseCode,
};
use crate::reader::{ChunkReader, ReaderError};

pub type ConnId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// Result delivered to an outbound call's sink: `None` error means the
/// CallResponse carried `code = OK`.
#[derive(Debug)]
pub struct CallOutcome {
    pub error: Option<TChannelError>,
    pub arg2: Bytes,
    pub arg3: Bytes,
}

/// An application-level error handed to [`Responder::respond`]: either a
/// ready-made `$jsError` shape (used for errors this crate synthesizes,
/// like "no such operation") or an opaque boxed error from a handler.
pub enum HandlerError {
    Js(JsError),
    Boxed(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    fn into_js(self) -> JsError {
        match self {
            HandlerError::Js(js) => js,
            HandlerError::Boxed(err) => JsError::new("Error", err.to_string()),
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// An endpoint handler: `(arg2, arg3, remote_name, responder) -> future`.
/// Registered per endpoint name in the channel's endpoint registry.
pub type Handler = Arc<dyn Fn(Bytes, Bytes, String, Responder) -> HandlerFuture + Send + Sync>;

/// Collaborator the channel implements so a `Connection` can resolve
/// endpoints and report handshake/reset lifecycle events without depending
/// on `crate::channel` directly.
pub trait ConnectionObserver: Send + Sync {
    fn resolve_endpoint(&self, endpoint: &[u8]) -> Option<Handler>;
    fn on_identified(&self, conn_id: ConnId, remote_name: String);
    fn on_reset(&self, conn_id: ConnId, remote_name: Option<String>, reason: String);
}

/// Handed to an endpoint handler so it can send exactly one CallResponse
/// back to the peer that issued the request. Cloneable; every clone sends
/// into the same connection actor, which enforces idempotence and
/// discards responses for evicted (timed-out) operations.
#[derive(Clone)]
pub struct Responder {
    frame_id: u32,
    commands: mpsc::Sender<Command>,
}

impl Responder {
    pub async fn respond(&self, err: Option<HandlerError>, res1: Bytes, res2: Bytes) {
        let _ = self
            .commands
            .send(Command::Respond {
                frame_id: self.frame_id,
                err,
                res1,
                res2,
            })
            .await;
    }
}

struct OutboundOp {
    start: Instant,
    timeout_ms: u32,
    sink: oneshot::Sender<CallOutcome>,
}

struct InboundOpMeta {
    start: Instant,
    request_arg1: Bytes,
    checksum_type: u8,
}

enum Command {
    Send {
        body: CallRequestBody,
        sink: oneshot::Sender<CallOutcome>,
    },
    Respond {
        frame_id: u32,
        err: Option<HandlerError>,
        res1: Bytes,
        res2: Bytes,
    },
    Reset(String),
}

/// Cloneable external handle to a running connection actor.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnId,
    direction: Direction,
    remote_addr: String,
    commands: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Send a CallRequest and await its CallResponse, timeout, or reset.
    pub async fn send(&self, body: CallRequestBody) -> Result<CallOutcome, TChannelError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Send { body, sink: tx })
            .await
            .map_err(|_| TChannelError::Closing)?;
        rx.await.map_err(|_| TChannelError::Closing)
    }

    /// Ask the connection actor to tear itself down.
    pub async fn close(&self, reason: impl Into<String>) {
        let _ = self.commands.send(Command::Reset(reason.into())).await;
    }
}

/// Identity of this node as presented in outgoing Init bodies.
#[derive(Debug, Clone)]
pub struct LocalIdentity {
    pub host_port: String,
    pub process_name: String,
}

struct Actor<S> {
    conn_id: ConnId,
    direction: Direction,
    local: LocalIdentity,
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,
    chunk_reader: ChunkReader,
    remote_name: Option<String>,
    closing: bool,
    last_frame_id: u32,
    last_timeout_witness: Option<Instant>,
    out_ops: HashMap<u32, OutboundOp>,
    in_ops: HashMap<u32, InboundOpMeta>,
    observer: Arc<dyn ConnectionObserver>,
    options: ConnectionOptions,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    checksum_registry: Arc<ChecksumRegistry>,
    commands_rx: mpsc::Receiver<Command>,
    self_commands: mpsc::Sender<Command>,
}

/// Spawn a connection actor over an abstract byte duplex and return a
/// handle to it. For `Direction::Out`, an InitRequest (frame id 1) is
/// emitted before the actor enters its main loop.
#[allow(clippy::too_many_arguments)]
pub fn spawn<S>(
    stream: S,
    direction: Direction,
    conn_id: ConnId,
    remote_addr: String,
    local: LocalIdentity,
    observer: Arc<dyn ConnectionObserver>,
    options: ConnectionOptions,
    clock: Arc<dyn Clock>,
    jitter: Arc<dyn JitterSource>,
    checksum_registry: Arc<ChecksumRegistry>,
) -> ConnectionHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (tx, rx) = mpsc::channel(64);
    let (reader, writer) = tokio::io::split(stream);

    let actor = Actor {
        conn_id,
        direction,
        local,
        reader,
        writer,
        chunk_reader: ChunkReader::new(),
        remote_name: None,
        closing: false,
        last_frame_id: 0,
        last_timeout_witness: None,
        out_ops: HashMap::new(),
        in_ops: HashMap::new(),
        observer,
        options,
        clock,
        jitter,
        checksum_registry,
        commands_rx: rx,
        self_commands: tx.clone(),
    };

    tokio::spawn(actor.run());

    ConnectionHandle {
        id: conn_id,
        direction,
        remote_addr,
        commands: tx,
    }
}

impl<S> Actor<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin,
{
    async fn write_frame(&mut self, frame: Frame) -> std::io::Result<()> {
        let encoded = frame
            .encode()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.writer.write_all(&encoded).await?;
        self.writer.flush().await
    }

    fn next_frame_id(&mut self) -> u32 {
        self.last_frame_id = self.last_frame_id.wrapping_add(1);
        self.last_frame_id
    }

    fn next_sweep_duration(&self) -> Duration {
        let fuzz_ms = self.options.timeout_fuzz.as_millis() as u32;
        let jitter_ms = self.jitter.jitter_ms(fuzz_ms);
        let base_ms = self.options.timeout_check_interval.as_millis() as i64;
        Duration::from_millis((base_ms + jitter_ms).max(0) as u64)
    }

    async fn run(mut self) {
        if self.direction == Direction::Out {
            let init = Frame::new(
                1,
                0,
                FrameBody::InitRequest(InitBody::new(
                    self.local.host_port.clone(),
                    self.local.process_name.clone(),
                )),
            );
            self.last_frame_id = 1;
            if let Err(e) = self.write_frame(init).await {
                self.reset_all(format!("failed to write initial InitRequest: {e}"))
                    .await;
                return;
            }
        }

        let mut read_buf = [0u8; 4096];
        let sleep = tokio::time::sleep(self.next_sweep_duration());
        tokio::pin!(sleep);

        loop {
            if self.closing {
                break;
            }
            tokio::select! {
                result = self.reader.read(&mut read_buf) => {
                    match result {
                        Ok(0) => {
                            let reason = match self.chunk_reader.finish() {
                                Ok(()) => "socket closed by peer".to_string(),
                                Err(e) => format!("socket closed by peer: {e}"),
                            };
                            self.reset_all(reason).await;
                            break;
                        }
                        Ok(n) => {
                            self.chunk_reader.push(&read_buf[..n]);
                            if let Some(reason) = self.drain_frames().await {
                                self.reset_all(reason).await;
                                break;
                            }
                        }
                        Err(e) => {
                            self.reset_all(format!("socket read error: {e}")).await;
                            break;
                        }
                    }
                }
                cmd = self.commands_rx.recv() => {
                    match cmd {
                        Some(Command::Send { body, sink }) => self.handle_send(body, sink).await,
                        Some(Command::Respond { frame_id, err, res1, res2 }) => {
                            self.handle_respond(frame_id, err, res1, res2).await;
                        }
                        Some(Command::Reset(reason)) => {
                            self.reset_all(reason).await;
                            break;
                        }
                        None => {
                            self.reset_all("all connection handles dropped".into()).await;
                            break;
                        }
                    }
                }
                _ = &mut sleep => {
                    if let Some(reason) = self.sweep() {
                        self.reset_all(reason).await;
                        break;
                    }
                    sleep.as_mut().reset(tokio::time::Instant::now() + self.next_sweep_duration());
                }
            }
        }
    }

    async fn drain_frames(&mut self) -> Option<String> {
        loop {
            match self.chunk_reader.next_frame() {
                Ok(Some(raw)) => match Frame::decode(&raw) {
                    Ok(frame) => {
                        self.last_timeout_witness = None;
                        if let Some(err) = self.dispatch_frame(frame).await {
                            return Some(err.to_string());
                        }
                    }
                    Err(CodecError::InvalidFrameType(t)) => {
                        tracing::warn!(frame_type = t, "dropping frame of unknown type");
                    }
                    Err(e) => return Some(e.to_string()),
                },
                Ok(None) => return None,
                Err(ReaderError::ZeroLengthFrame) => {
                    tracing::warn!("zero-length frame observed on the wire");
                    return Some(ReaderError::ZeroLengthFrame.to_string());
                }
                Err(e) => return Some(e.to_string()),
            }
        }
    }

    async fn dispatch_frame(&mut self, frame: Frame) -> Option<TChannelError> {
        match frame.body {
            FrameBody::InitRequest(body) => {
                if self.remote_name.is_some() {
                    return Some(TChannelError::DuplicateInitRequest);
                }
                self.remote_name = Some(body.host_port.clone());
                self.observer.on_identified(self.conn_id, body.host_port);
                let response = Frame::new(
                    frame.id,
                    0,
                    FrameBody::InitResponse(InitBody::new(
                        self.local.host_port.clone(),
                        self.local.process_name.clone(),
                    )),
                );
                if let Err(e) = self.write_frame(response).await {
                    return Some(TChannelError::Socket(e));
                }
                None
            }
            FrameBody::InitResponse(body) => {
                if self.remote_name.is_some() {
                    return Some(TChannelError::DuplicateInitResponse);
                }
                self.remote_name = Some(body.host_port.clone());
                self.observer.on_identified(self.conn_id, body.host_port);
                None
            }
            FrameBody::CallRequest(body) => {
                if self.remote_name.is_none() {
                    return Some(TChannelError::CallRequestBeforeInit);
                }
                if let Err(e) =
                    body.checksum
                        .verify(&self.checksum_registry, &body.arg1, &body.arg2, &body.arg3)
                {
                    return Some(TChannelError::Codec(CodecError::Checksum(e)));
                }
                self.serve_call_request(frame.id, body);
                None
            }
            FrameBody::CallResponse(body) => {
                if self.remote_name.is_none() {
                    return Some(TChannelError::CallResponseBeforeInit);
                }
                if let Err(e) =
                    body.checksum
                        .verify(&self.checksum_registry, &body.arg1, &body.arg2, &body.arg3)
                {
                    return Some(TChannelError::Codec(CodecError::Checksum(e)));
                }
                let error = Self::error_from_response(body.code, &body.arg1);
                self.complete_outbound(frame.id, error, body.arg2, body.arg3);
                None
            }
            FrameBody::Error(body) => {
                if self.remote_name.is_none() {
                    return Some(TChannelError::CallResponseBeforeInit);
                }
                let error = Some(TChannelError::RemoteError {
                    code: body.code,
                    detail: body.message,
                });
                self.complete_outbound(frame.id, error, Bytes::new(), Bytes::new());
                None
            }
        }
    }

    fn error_from_response(code: u8, arg1: &Bytes) -> Option<TChannelError> {
        let Ok(rc) = ResponseCode::try_from(code) else {
            return Some(TChannelError::RemoteError {
                code,
                detail: "unrecognized response code".into(),
            });
        };
        match rc {
            ResponseCode::Ok => None,
            ResponseCode::AppException => Some(match AppErrorPayload::decode(arg1) {
                Ok(AppErrorPayload::JsError(js)) => TChannelError::ApplicationException {
                    name: js.name,
                    message: js.message,
                },
                Ok(AppErrorPayload::PlainString(s)) => TChannelError::ApplicationException {
                    name: "Error".into(),
                    message: s,
                },
                Err(_) => TChannelError::ApplicationException {
                    name: "Error".into(),
                    message: "malformed application exception payload".into(),
                },
            }),
            other => Some(TChannelError::RemoteError {
                code: other.into(),
                detail: format!("{other:?}"),
            }),
        }
    }

    fn complete_outbound(&mut self, frame_id: u32, error: Option<TChannelError>, arg2: Bytes, arg3: Bytes) {
        if let Some(op) = self.out_ops.remove(&frame_id) {
            let _ = op.sink.send(CallOutcome { error, arg2, arg3 });
        } else {
            tracing::warn!(frame_id, "response for unknown or already-completed outbound op dropped");
        }
    }

    fn serve_call_request(&mut self, frame_id: u32, body: CallRequestBody) {
        self.in_ops.insert(
            frame_id,
            InboundOpMeta {
                start: self.clock.now(),
                request_arg1: body.arg1.clone(),
                checksum_type: body.checksum.type_id,
            },
        );

        let remote_name = self.remote_name.clone().unwrap_or_default();
        let responder = Responder {
            frame_id,
            commands: self.self_commands.clone(),
        };
        let handler = self.observer.resolve_endpoint(&body.arg1);

        match handler {
            Some(handler) => {
                tokio::spawn(handler(body.arg2, body.arg3, remote_name, responder));
            }
            None => {
                let endpoint = String::from_utf8_lossy(&body.arg1).into_owned();
                tokio::spawn(async move {
                    let err = crate::error::no_such_operation(&endpoint);
                    responder
                        .respond(Some(HandlerError::Js(err)), Bytes::new(), Bytes::new())
                        .await;
                });
            }
        }
    }

    async fn handle_respond(
        &mut self,
        frame_id: u32,
        err: Option<HandlerError>,
        res1: Bytes,
        res2: Bytes,
    ) {
        let Some(meta) = self.in_ops.remove(&frame_id) else {
            tracing::warn!(frame_id, "respond() for evicted or already-responded operation discarded");
            return;
        };

        let (code, arg1): (u8, Bytes) = match err {
            None => (ResponseCode::Ok.into(), meta.request_arg1),
            Some(handler_err) => (
                ResponseCode::AppException.into(),
                Bytes::from(AppErrorPayload::JsError(handler_err.into_js()).encode()),
            ),
        };

        let checksum = crate::checksum::Checksum::update(
            &self.checksum_registry,
            meta.checksum_type,
            &arg1,
            &res1,
            &res2,
        )
        .unwrap_or_else(|_| crate::checksum::Checksum::none());

        let response = CallResponseBody {
            code,
            headers: vec![],
            arg1,
            arg2: res1,
            arg3: res2,
            checksum,
        };

        if let Err(e) = self
            .write_frame(Frame::new(frame_id, 0, FrameBody::CallResponse(response)))
            .await
        {
            tracing::error!(frame_id, error = %e, "failed to write CallResponse");
        }
    }

    async fn handle_send(&mut self, body: CallRequestBody, sink: oneshot::Sender<CallOutcome>) {
        if self.closing {
            let _ = sink.send(CallOutcome {
                error: Some(TChannelError::Closing),
                arg2: Bytes::new(),
                arg3: Bytes::new(),
            });
            return;
        }

        let frame_id = self.next_frame_id();
        let start = self.clock.now();
        let timeout_ms = body.ttl_ms;
        self.out_ops.insert(
            frame_id,
            OutboundOp {
                start,
                timeout_ms,
                sink,
            },
        );

        let frame = Frame::new(frame_id, 0, FrameBody::CallRequest(body));
        if let Err(e) = self.write_frame(frame).await {
            if let Some(op) = self.out_ops.remove(&frame_id) {
                let _ = op.sink.send(CallOutcome {
                    error: Some(TChannelError::Socket(e)),
                    arg2: Bytes::new(),
                    arg3: Bytes::new(),
                });
            }
        }
    }

    /// One sweeper tick. Returns `Some(reason)` when escalation requires
    /// destroying the socket.
    fn sweep(&mut self) -> Option<String> {
        if self.closing {
            return None;
        }
        if self.last_timeout_witness.is_some() {
            return Some(
                "sweeper escalation: a prior sweep timed out an op and none absorbed since".into(),
            );
        }

        let now = self.clock.now();
        let expired: Vec<u32> = self
            .out_ops
            .iter()
            .filter(|(_, op)| {
                now.saturating_duration_since(op.start).as_millis() as u64 > op.timeout_ms as u64
            })
            .map(|(id, _)| *id)
            .collect();

        let mut timed_out_any = false;
        for id in expired {
            if let Some(op) = self.out_ops.remove(&id) {
                let _ = op.sink.send(CallOutcome {
                    error: Some(TChannelError::Timeout {
                        id,
                        timeout_ms: op.timeout_ms,
                    }),
                    arg2: Bytes::new(),
                    arg3: Bytes::new(),
                });
                timed_out_any = true;
            }
        }
        if timed_out_any {
            self.last_timeout_witness = Some(now);
        }

        let horizon = self.options.server_timeout_default;
        self.in_ops
            .retain(|_, meta| now.saturating_duration_since(meta.start) <= horizon);

        None
    }

    async fn reset_all(&mut self, reason: String) {
        if self.closing {
            return;
        }
        self.closing = true;
        tracing::error!(conn_id = self.conn_id, reason = %reason, "connection reset");

        for (_, op) in self.out_ops.drain() {
            let _ = op.sink.send(CallOutcome {
                error: Some(TChannelError::Reset(reason.clone())),
                arg2: Bytes::new(),
                arg3: Bytes::new(),
            });
        }
        self.in_ops.clear();
        self.observer
            .on_reset(self.conn_id, self.remote_name.clone(), reason);
    }
}
