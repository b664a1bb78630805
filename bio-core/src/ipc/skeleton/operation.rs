use async_trait::async_trait;
use bio_protocol::{names, ObjectPath, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::unknown_method;
use crate::codec::{arg, expect_arity};
use crate::error::{BiometryError, Result};
use crate::ipc::bus::{CallContext, Object, ObjectTable, Teardown};
use crate::ipc::observer::RemoteObserver;
use crate::operation::{GuardedOperation, Operation, OperationKind, OperationPtr};

/// Export of one operation, usable only by the connection that created it.
///
/// The object disappears after the terminal event has been relayed, or when
/// its owner disconnects, in which case the operation is canceled.
pub struct OperationSkeleton<K: OperationKind> {
    op: Arc<GuardedOperation<K>>,
    owner: String,
    teardown: Arc<Teardown>,
}

impl<K: OperationKind> OperationSkeleton<K> {
    pub fn new(
        op: OperationPtr<K>,
        objects: &Arc<ObjectTable>,
        path: ObjectPath,
        owner: &str,
    ) -> Arc<Self> {
        Arc::new(Self {
            op: Arc::new(GuardedOperation::new(op)),
            owner: owner.to_string(),
            teardown: Teardown::new(objects, path),
        })
    }

    fn check_owner(&self, ctx: &CallContext) -> Result<()> {
        if ctx.sender.name != self.owner {
            warn!(
                "{} tried to drive {} owned by {}",
                ctx.sender.name,
                self.teardown.path(),
                self.owner
            );
            return Err(BiometryError::permission_denied(format!(
                "{} is not owned by {}",
                self.teardown.path(),
                ctx.sender.name
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<K: OperationKind> Object for OperationSkeleton<K> {
    fn interface(&self) -> &'static str {
        names::OPERATION
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        match member {
            names::member::START_WITH_OBSERVER => {
                expect_arity(args, 1)?;
                let observer_path: ObjectPath = arg(args, 0)?;
                self.check_owner(ctx)?;

                let observer = RemoteObserver::<K>::spawn(
                    ctx.connection.clone(),
                    observer_path,
                    self.teardown.clone(),
                );
                match self.op.start_with_observer(observer).await {
                    Ok(()) => Ok(Value::Unit),
                    Err(BiometryError::AlreadyStarted) => Err(BiometryError::AlreadyStarted),
                    Err(e) => {
                        debug!("{}: start failed, withdrawing {}", K::NAME, self.teardown.path());
                        self.teardown.run();
                        Err(e)
                    }
                }
            }
            names::member::CANCEL => {
                expect_arity(args, 0)?;
                self.check_owner(ctx)?;
                self.op.cancel().await?;
                Ok(Value::Unit)
            }
            other => Err(unknown_method(names::OPERATION, other)),
        }
    }

    fn release(&self) {
        if self.op.phase().is_terminal() {
            return;
        }
        debug!("{}: owner gone, canceling {}", K::NAME, self.teardown.path());
        let op = self.op.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = op.cancel().await {
                        warn!("{}: cancel on release failed: {}", K::NAME, e);
                    }
                });
            }
            Err(_) => warn!("{}: no runtime to cancel on release", K::NAME),
        }
    }
}
