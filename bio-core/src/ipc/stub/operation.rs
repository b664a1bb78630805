use async_trait::async_trait;
use bio_protocol::{names, MethodCall, ObjectPath, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::codec::Codec;
use crate::constants::objects;
use crate::error::{BiometryError, Result};
use crate::ipc::bus::{ConnectionPtr, Teardown};
use crate::ipc::observer::ObserverSkeleton;
use crate::ipc::paths::next_child_path;
use crate::operation::{Event, Observer, ObserverPtr, Operation, OperationKind};

/// Marks the stub finished once the terminal event came in
struct Tracking<K: OperationKind> {
    inner: ObserverPtr<K>,
    finished: Arc<AtomicBool>,
}

impl<K: OperationKind> Observer<K> for Tracking<K> {
    fn on_event(&self, event: Event<K>) {
        if event.is_terminal() {
            self.finished.store(true, Ordering::SeqCst);
        }
        self.inner.on_event(event);
    }
}

/// Proxy for an operation exported by the service
pub struct OperationStub<K: OperationKind> {
    connection: ConnectionPtr,
    path: ObjectPath,
    started: AtomicBool,
    finished: Arc<AtomicBool>,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K: OperationKind> OperationStub<K> {
    pub fn new(connection: ConnectionPtr, path: ObjectPath) -> Self {
        Self {
            connection,
            path,
            started: AtomicBool::new(false),
            finished: Arc::new(AtomicBool::new(false)),
            _kind: std::marker::PhantomData,
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    fn call(&self, member: &str, args: Vec<Value>) -> MethodCall {
        MethodCall::new(self.path.clone(), names::OPERATION, member, args)
    }
}

#[async_trait]
impl<K: OperationKind> Operation<K> for OperationStub<K> {
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BiometryError::AlreadyStarted);
        }

        // Export the observer before the service can emit anything
        let objects = self.connection.objects();
        let observer_path = next_child_path(&self.path, objects::OBSERVER, K::NAME)?;
        let teardown = Teardown::new(objects, observer_path.clone());
        let tracking = Arc::new(Tracking {
            inner: observer,
            finished: self.finished.clone(),
        });
        objects.register(
            observer_path.clone(),
            ObserverSkeleton::<K>::new(tracking, teardown.clone()),
        )?;

        let call = self.call(names::member::START_WITH_OBSERVER, vec![observer_path.encode()]);
        if let Err(e) = self.connection.call(call, None).await {
            debug!("{}: start of {} failed: {}", K::NAME, self.path, e);
            teardown.run();
            return Err(e);
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        if self.finished.load(Ordering::SeqCst) {
            return Ok(());
        }
        match self.connection.call(self.call(names::member::CANCEL, vec![]), None).await {
            Ok(_) => Ok(()),
            // Finished and withdrawn in the meantime
            Err(BiometryError::NoSuchObject(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
