//! In-process bus
//!
//! A [`LocalConnection`] pair behaves like the two ends of a socket: every
//! call and reply is encoded to a wire frame and decoded again, and handlers
//! run on their own task. Used by tests and by embedders hosting the service
//! in the same process as its client.

use async_trait::async_trait;
use bio_protocol::{Frame, FrameBody, MethodCall, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tracing::{debug, trace};

use super::bus::{error_from_wire, error_to_wire, CallContext, Connection, ObjectTable, Sender};
use crate::error::{BiometryError, Result};

pub struct LocalConnection {
    identity: Sender,
    objects: Arc<ObjectTable>,
    peer: OnceLock<Weak<LocalConnection>>,
    open: AtomicBool,
}

fn roundtrip(frame: Frame) -> Result<Frame> {
    let bytes = frame.encode().map_err(BiometryError::protocol)?;
    Frame::decode(&bytes).map_err(BiometryError::protocol)
}

impl LocalConnection {
    /// Create two connected ends. Calls made on the first appear to come from
    /// `first`, and vice versa.
    pub fn pair(first: Sender, second: Sender) -> (Arc<Self>, Arc<Self>) {
        let a = Arc::new(Self::new(first));
        let b = Arc::new(Self::new(second));
        let _ = a.peer.set(Arc::downgrade(&b));
        let _ = b.peer.set(Arc::downgrade(&a));
        (a, b)
    }

    fn new(identity: Sender) -> Self {
        Self {
            identity,
            objects: ObjectTable::new(),
            peer: OnceLock::new(),
            open: AtomicBool::new(true),
        }
    }

    pub fn identity(&self) -> &Sender {
        &self.identity
    }

    fn peer(&self) -> Option<Arc<LocalConnection>> {
        self.peer.get().and_then(Weak::upgrade)
    }

    /// Disconnect. Objects the peer exported on behalf of this end go away.
    pub fn close(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(peer) = self.peer() {
            peer.open.store(false, Ordering::SeqCst);
            let released = peer.objects.remove_owned_by(&self.identity.name);
            debug!("{} closed, released {} objects", self.identity.name, released);
        }
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn call(&self, call: MethodCall, timeout: Option<Duration>) -> Result<Value> {
        if !self.is_connected() {
            return Err(BiometryError::Disconnected);
        }
        let peer = self.peer().ok_or(BiometryError::Disconnected)?;

        let frame = roundtrip(Frame::call(call))?;
        let serial = frame.serial;
        let FrameBody::MethodCall(call) = frame.body else {
            return Err(BiometryError::protocol("call frame changed kind"));
        };
        let member = call.member.clone();
        trace!("{} -> {} {}.{}", self.identity.name, call.path, call.interface, call.member);

        let ctx = CallContext {
            sender: self.identity.clone(),
            connection: peer.clone(),
        };
        let handler = tokio::spawn(async move {
            let reply = match peer.objects.dispatch(&ctx, &call).await {
                Ok(value) => Frame::reply(serial, value),
                Err(e) => {
                    let (name, message) = error_to_wire(&e);
                    Frame::error(serial, name, message)
                }
            };
            roundtrip(reply)
        });

        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, handler)
                .await
                .map_err(|_| BiometryError::Timeout(member))?,
            None => handler.await,
        }
        .map_err(|e| BiometryError::generic(format!("call handler failed: {}", e)))??;

        match reply.body {
            FrameBody::MethodReturn { value, .. } => Ok(value),
            FrameBody::Error { name, message, .. } => Err(error_from_wire(&name, &message)),
            FrameBody::MethodCall(_) => Err(BiometryError::protocol("unexpected call in reply")),
        }
    }

    fn objects(&self) -> &Arc<ObjectTable> {
        &self.objects
    }

    fn is_connected(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.peer().is_some()
    }
}
