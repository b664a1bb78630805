//! Bus connection over a Unix stream socket
//!
//! Frames are newline-delimited JSON. Either end may call the other: the
//! client calls the service, the service calls back into observers exported
//! by the client. A single reader task per connection routes incoming calls
//! to the local [`ObjectTable`] and replies to the waiting callers.

use async_trait::async_trait;
use bio_protocol::{names, Frame, FrameBody, MethodCall, Value, MAX_MESSAGE_SIZE};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::bus::{
    error_from_wire, error_to_wire, CallContext, Connection, ObjectTable, PeerCredentials, Sender,
};
use crate::error::{BiometryError, Result};
use crate::runtime::{log_join_error, Tracker};

/// Upper bound for writing one frame
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of unique connection names
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Admission check applied to every incoming call
pub trait CallGate: Send + Sync {
    /// Whether a call from `sender` may be served
    fn admit(&self, sender: &Sender) -> bool;
}

/// Read one line without ever buffering more than `max_len` bytes
pub(crate) async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    out: &mut Vec<u8>,
    max_len: usize,
) -> std::io::Result<usize> {
    out.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(0);
        }

        let mut take_len = available.len();
        let mut found_newline = false;
        if let Some(pos) = available.iter().position(|b| *b == b'\n') {
            take_len = pos + 1;
            found_newline = true;
        }

        let remaining = max_len.saturating_sub(out.len());
        if take_len > remaining {
            let consume_len = remaining.min(available.len());
            reader.consume(consume_len);
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "Message too large",
            ));
        }

        out.extend_from_slice(&available[..take_len]);
        reader.consume(take_len);

        if found_newline {
            return Ok(out.len());
        }
    }
}

type Waiter = oneshot::Sender<Result<Value>>;

pub struct SocketConnection {
    /// Who sits at the other end
    peer: Sender,
    objects: Arc<ObjectTable>,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: Mutex<HashMap<u64, Waiter>>,
    connected: AtomicBool,
    gate: Option<Arc<dyn CallGate>>,
    /// Runs incoming calls
    tasks: Tracker,
}

impl SocketConnection {
    /// Connect to a listening service, exporting `objects` to it
    pub async fn connect(path: impl AsRef<Path>, objects: Arc<ObjectTable>) -> Result<Arc<Self>> {
        let path = path.as_ref();
        let stream = UnixStream::connect(path).await.map_err(|e| {
            BiometryError::protocol(format!("Failed to connect to {}: {}", path.display(), e))
        })?;
        let (connection, _reader) = Self::start(stream, objects, None)?;
        Ok(connection)
    }

    /// Take over an established stream, serving calls on the current runtime.
    /// The returned handle completes when the peer is gone and its objects
    /// have been released.
    pub fn start(
        stream: UnixStream,
        objects: Arc<ObjectTable>,
        gate: Option<Arc<dyn CallGate>>,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        Self::start_tracked(stream, objects, gate, Tracker::current()?)
    }

    /// Like [`SocketConnection::start`], with incoming calls spawned through `tasks`
    pub fn start_tracked(
        stream: UnixStream,
        objects: Arc<ObjectTable>,
        gate: Option<Arc<dyn CallGate>>,
        tasks: Tracker,
    ) -> Result<(Arc<Self>, JoinHandle<()>)> {
        let peer = stream.peer_cred().ok().map(|cred| PeerCredentials {
            uid: cred.uid(),
            gid: cred.gid(),
            pid: cred.pid().unwrap_or(0),
        });
        let name = format!(":1.{}", CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();

        let connection = Arc::new(Self {
            peer: Sender::new(name, peer),
            objects,
            writer: tokio::sync::Mutex::new(writer),
            pending: Mutex::new(HashMap::new()),
            connected: AtomicBool::new(true),
            gate,
            tasks,
        });

        let runner = connection.clone();
        let handle = tokio::spawn(async move { runner.read_loop(reader).await });
        Ok((connection, handle))
    }

    pub fn peer(&self) -> &Sender {
        &self.peer
    }

    /// Hang up. The peer sees end of stream and tears down its side.
    pub async fn close(&self) {
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!("Closing connection to {}: {}", self.peer.name, e);
        }
    }

    async fn read_loop(self: Arc<Self>, reader: OwnedReadHalf) {
        let mut reader = BufReader::new(reader);
        let mut line: Vec<u8> = Vec::with_capacity(4096);

        loop {
            match read_line_bounded(&mut reader, &mut line, MAX_MESSAGE_SIZE).await {
                Ok(0) => {
                    debug!("{} hung up", self.peer.name);
                    break;
                }
                Ok(_) => match Frame::decode(&line) {
                    Ok(frame) => self.handle_frame(frame),
                    Err(e) => {
                        warn!("Dropping malformed frame from {}: {}", self.peer.name, e);
                    }
                },
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    warn!(
                        "Message too large (>{} bytes) from {}, disconnecting",
                        MAX_MESSAGE_SIZE, self.peer.name
                    );
                    break;
                }
                Err(e) => {
                    error!("Read error from {}: {}", self.peer.name, e);
                    break;
                }
            }
        }

        self.shutdown();
        self.close().await;
    }

    fn handle_frame(self: &Arc<Self>, frame: Frame) {
        match frame.body {
            FrameBody::MethodCall(call) => self.serve(frame.serial, call),
            FrameBody::MethodReturn { reply_serial, value } => self.resolve(reply_serial, Ok(value)),
            FrameBody::Error {
                reply_serial,
                name,
                message,
            } => self.resolve(reply_serial, Err(error_from_wire(&name, &message))),
        }
    }

    fn resolve(&self, serial: u64, result: Result<Value>) {
        match self.pending.lock().remove(&serial) {
            // The caller may have timed out in the meantime
            Some(waiter) => {
                let _ = waiter.send(result);
            }
            None => trace!("Reply to unknown serial {} from {}", serial, self.peer.name),
        }
    }

    fn serve(self: &Arc<Self>, serial: u64, call: MethodCall) {
        if let Some(gate) = &self.gate {
            if !gate.admit(&self.peer) {
                warn!("Rate limit exceeded for {}", self.peer.name);
                let reply = Frame::error(serial, names::error::LIMITS_EXCEEDED, "Rate limit exceeded");
                let this = self.clone();
                tokio::spawn(async move {
                    let _ = this.send(&reply).await;
                });
                return;
            }
        }

        trace!("{} {}.{} from {}", call.path, call.interface, call.member, self.peer.name);
        let method = format!("{}.{}", call.interface, call.member);
        let ctx = CallContext {
            sender: self.peer.clone(),
            connection: self.clone(),
        };
        let objects = self.objects.clone();
        let handler = self
            .tasks
            .spawn(async move { objects.dispatch(&ctx, &call).await });

        // A handler that panics still gets an error reply
        let this = self.clone();
        self.tasks.spawn(async move {
            let reply = match handler.await {
                Ok(Ok(value)) => Frame::reply(serial, value),
                Ok(Err(e)) => {
                    debug!("{} failed: {}", method, e);
                    let (name, message) = error_to_wire(&e);
                    Frame::error(serial, name, message)
                }
                Err(e) => {
                    log_join_error(&method, e);
                    Frame::error(serial, names::error::FAILED, format!("{} aborted", method))
                }
            };
            if let Err(e) = this.send(&reply).await {
                debug!("Could not reply to {}: {}", this.peer.name, e);
            }
        });
    }

    async fn send(&self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode().map_err(|reason| {
            warn!("Refusing to send frame: {}", reason);
            BiometryError::MessageTooLarge {
                size: MAX_MESSAGE_SIZE + 1,
                max_size: MAX_MESSAGE_SIZE,
            }
        })?;

        let mut writer = self.writer.lock().await;
        match tokio::time::timeout(WRITE_TIMEOUT, writer.write_all(&bytes)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("Write error to {}: {}", self.peer.name, e);
                Err(BiometryError::Disconnected)
            }
            Err(_) => {
                error!("Write timeout to {}", self.peer.name);
                Err(BiometryError::Disconnected)
            }
        }
    }

    fn shutdown(&self) {
        if !self.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        // Dropping the waiters wakes every caller with Disconnected
        self.pending.lock().clear();
        let released = self.objects.remove_owned_by(&self.peer.name);
        info!(
            "Connection {} closed (uid={:?}), released {} objects",
            self.peer.name,
            self.peer.peer.map(|p| p.uid),
            released
        );
    }
}

#[async_trait]
impl Connection for SocketConnection {
    async fn call(&self, call: MethodCall, timeout: Option<Duration>) -> Result<Value> {
        if !self.is_connected() {
            return Err(BiometryError::Disconnected);
        }
        call.validate().map_err(BiometryError::InvalidArguments)?;

        let member = call.member.clone();
        let frame = Frame::call(call);
        let serial = frame.serial;
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(serial, tx);

        if let Err(e) = self.send(&frame).await {
            self.pending.lock().remove(&serial);
            return Err(e);
        }

        let reply = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    self.pending.lock().remove(&serial);
                    return Err(BiometryError::Timeout(member));
                }
            },
            None => rx.await,
        };
        reply.map_err(|_| BiometryError::Disconnected)?
    }

    fn objects(&self) -> &Arc<ObjectTable> {
        &self.objects
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
