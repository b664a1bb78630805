//! Object table and connection abstraction
//!
//! Both ends of a connection own an [`ObjectTable`]. Incoming method calls
//! are routed to the object registered at the call's path; outgoing calls go
//! through [`Connection::call`].

use async_trait::async_trait;
use bio_protocol::{names, MethodCall, ObjectPath, Value};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{BiometryError, Result};

/// Kernel-reported credentials of a socket peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerCredentials {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

/// Originator of an incoming call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Unique connection name, e.g. `:1.42`
    pub name: String,
    pub peer: Option<PeerCredentials>,
}

impl Sender {
    pub fn new(name: impl Into<String>, peer: Option<PeerCredentials>) -> Self {
        Self {
            name: name.into(),
            peer,
        }
    }
}

/// Everything a handler knows about the call it is serving
#[derive(Clone)]
pub struct CallContext {
    pub sender: Sender,
    /// Connection leading back to the sender, for callbacks
    pub connection: ConnectionPtr,
}

/// An object exported on a connection
#[async_trait]
pub trait Object: Send + Sync {
    /// Interface implemented by this object
    fn interface(&self) -> &'static str;

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value>;

    /// Called once after the object was removed from its table
    fn release(&self) {}
}

pub type ObjectPtr = Arc<dyn Object>;

/// One end of a bus connection
#[async_trait]
pub trait Connection: Send + Sync {
    /// Call a method on the peer. `None` waits for as long as it takes.
    async fn call(&self, call: MethodCall, timeout: Option<Duration>) -> Result<Value>;

    /// Objects this end exports to the peer
    fn objects(&self) -> &Arc<ObjectTable>;

    fn is_connected(&self) -> bool;
}

pub type ConnectionPtr = Arc<dyn Connection>;

struct Entry {
    object: ObjectPtr,
    owner: Option<String>,
}

/// Path to object map of one connection end
#[derive(Default)]
pub struct ObjectTable {
    entries: Mutex<HashMap<ObjectPath, Entry>>,
}

impl ObjectTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Export `object` at `path`. Fails with `ObjectExists` if the path is taken.
    pub fn register(&self, path: ObjectPath, object: ObjectPtr) -> Result<()> {
        self.insert(path, object, None)
    }

    /// Export an object that is removed when `owner` disconnects
    pub fn register_owned(
        &self,
        path: ObjectPath,
        object: ObjectPtr,
        owner: impl Into<String>,
    ) -> Result<()> {
        self.insert(path, object, Some(owner.into()))
    }

    fn insert(&self, path: ObjectPath, object: ObjectPtr, owner: Option<String>) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&path) {
            return Err(BiometryError::ObjectExists(path.to_string()));
        }
        trace!("Registered {} at {}", object.interface(), path);
        entries.insert(path, Entry { object, owner });
        Ok(())
    }

    /// Remove the object at `path`. Returns false if nothing was registered.
    pub fn unregister(&self, path: &ObjectPath) -> bool {
        let removed = self.entries.lock().remove(path);
        match removed {
            Some(entry) => {
                trace!("Unregistered {}", path);
                entry.object.release();
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, path: &ObjectPath) -> Option<ObjectPtr> {
        self.entries.lock().get(path).map(|e| e.object.clone())
    }

    pub fn contains(&self, path: &ObjectPath) -> bool {
        self.entries.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Registered paths, sorted
    pub fn paths(&self) -> Vec<ObjectPath> {
        let mut paths: Vec<_> = self.entries.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Drop every object owned by `owner`, returning how many went away
    pub fn remove_owned_by(&self, owner: &str) -> usize {
        let removed: Vec<(ObjectPath, Entry)> = {
            let mut entries = self.entries.lock();
            let paths: Vec<ObjectPath> = entries
                .iter()
                .filter(|(_, e)| e.owner.as_deref() == Some(owner))
                .map(|(p, _)| p.clone())
                .collect();
            paths
                .into_iter()
                .filter_map(|p| entries.remove(&p).map(|e| (p, e)))
                .collect()
        };

        for (path, entry) in &removed {
            debug!("Releasing {} left behind by {}", path, owner);
            entry.object.release();
        }
        removed.len()
    }

    /// Route an incoming call to its object. The table lock is not held while
    /// the object runs.
    pub async fn dispatch(&self, ctx: &CallContext, call: &MethodCall) -> Result<Value> {
        let object = self
            .lookup(&call.path)
            .ok_or_else(|| BiometryError::NoSuchObject(call.path.to_string()))?;

        if object.interface() != call.interface {
            return Err(BiometryError::UnknownInterface {
                path: call.path.to_string(),
                interface: call.interface.clone(),
            });
        }

        object.invoke(ctx, &call.member, &call.args).await
    }
}

/// Removes one path from a table, at most once
pub struct Teardown {
    table: Weak<ObjectTable>,
    path: ObjectPath,
    done: AtomicBool,
}

impl Teardown {
    pub fn new(table: &Arc<ObjectTable>, path: ObjectPath) -> Arc<Self> {
        Arc::new(Self {
            table: Arc::downgrade(table),
            path,
            done: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Unregister the path. Only the first call has an effect.
    pub fn run(&self) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.table
            .upgrade()
            .is_some_and(|table| table.unregister(&self.path))
    }
}

/// Error name and message put on the wire for a failed call
pub fn error_to_wire(err: &BiometryError) -> (&'static str, String) {
    use names::error::*;
    match err {
        BiometryError::NoSuchObject(path) => (NO_SUCH_OBJECT, path.clone()),
        BiometryError::UnknownInterface { .. } => (UNKNOWN_INTERFACE, err.to_string()),
        BiometryError::UnknownMethod { .. } => (UNKNOWN_METHOD, err.to_string()),
        BiometryError::InvalidArguments(msg) => (INVALID_ARGS, msg.clone()),
        BiometryError::Decode { .. } => (INVALID_ARGS, err.to_string()),
        BiometryError::PermissionDenied(msg) => (ACCESS_DENIED, msg.clone()),
        BiometryError::CredentialsUnresolved(_) => (ACCESS_DENIED, err.to_string()),
        BiometryError::NotSupported(msg) => (NOT_SUPPORTED, msg.clone()),
        BiometryError::MessageTooLarge { .. } => (LIMITS_EXCEEDED, err.to_string()),
        other => (FAILED, other.to_string()),
    }
}

/// Error surfaced to the caller for an error frame
pub fn error_from_wire(name: &str, message: &str) -> BiometryError {
    use names::error::*;
    let message = message.to_string();
    match name {
        NO_SUCH_OBJECT => BiometryError::NoSuchObject(message),
        INVALID_ARGS => BiometryError::InvalidArguments(message),
        ACCESS_DENIED => BiometryError::PermissionDenied(message),
        NOT_SUPPORTED => BiometryError::NotSupported(message),
        _ => BiometryError::Remote {
            name: name.to_string(),
            message,
        },
    }
}
