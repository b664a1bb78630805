//! Device decorator funnelling all hardware access through one dispatcher
//!
//! Device drivers are rarely reentrant. Wrapping a device in a
//! [`DispatchingDevice`] backed by a [`Strand`](crate::runtime::Strand) makes
//! every capability call and every `start_with_observer`/`cancel` run on that
//! strand, so at most one hardware call is in flight per device.

use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::data::{Application, Reason, TemplateId, User};
use crate::error::{BiometryError, Result};
use crate::operation::{
    Clearance, Enrollment, Identification, List, ObserverPtr, Operation, OperationKind,
    OperationPtr, Removal, SizeQuery, Verification,
};
use crate::runtime::DispatcherPtr;

use super::{Device, DevicePtr, Identifier, TemplateStore, Verifier};

/// Run `work` on the dispatcher and hand its result back to the caller
async fn run_on<T, F>(dispatcher: &DispatcherPtr, work: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    dispatcher.dispatch(Box::pin(async move {
        // The caller may have given up waiting; nothing to do then
        let _ = tx.send(work.await);
    }));
    rx.await
        .map_err(|_| BiometryError::generic("dispatcher dropped the call"))?
}

struct DispatchingOperation<K: OperationKind> {
    inner: OperationPtr<K>,
    dispatcher: DispatcherPtr,
}

#[async_trait]
impl<K: OperationKind> Operation<K> for DispatchingOperation<K> {
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
        let inner = self.inner.clone();
        run_on(&self.dispatcher, async move {
            inner.start_with_observer(observer).await
        })
        .await
    }

    async fn cancel(&self) -> Result<()> {
        let inner = self.inner.clone();
        run_on(&self.dispatcher, async move { inner.cancel().await }).await
    }
}

fn dispatching<K: OperationKind>(inner: OperationPtr<K>, dispatcher: &DispatcherPtr) -> OperationPtr<K> {
    Arc::new(DispatchingOperation {
        inner,
        dispatcher: dispatcher.clone(),
    })
}

struct DispatchingTemplateStore {
    inner: Arc<dyn TemplateStore>,
    dispatcher: DispatcherPtr,
}

#[async_trait]
impl TemplateStore for DispatchingTemplateStore {
    async fn size(&self, app: &Application, user: &User) -> Result<OperationPtr<SizeQuery>> {
        let (inner, app, user) = (self.inner.clone(), app.clone(), *user);
        let op = run_on(&self.dispatcher, async move { inner.size(&app, &user).await }).await?;
        Ok(dispatching(op, &self.dispatcher))
    }

    async fn list(&self, app: &Application, user: &User) -> Result<OperationPtr<List>> {
        let (inner, app, user) = (self.inner.clone(), app.clone(), *user);
        let op = run_on(&self.dispatcher, async move { inner.list(&app, &user).await }).await?;
        Ok(dispatching(op, &self.dispatcher))
    }

    async fn enroll(&self, app: &Application, user: &User) -> Result<OperationPtr<Enrollment>> {
        let (inner, app, user) = (self.inner.clone(), app.clone(), *user);
        let op = run_on(&self.dispatcher, async move { inner.enroll(&app, &user).await }).await?;
        Ok(dispatching(op, &self.dispatcher))
    }

    async fn remove(
        &self,
        app: &Application,
        user: &User,
        id: TemplateId,
    ) -> Result<OperationPtr<Removal>> {
        let (inner, app, user) = (self.inner.clone(), app.clone(), *user);
        let op =
            run_on(&self.dispatcher, async move { inner.remove(&app, &user, id).await }).await?;
        Ok(dispatching(op, &self.dispatcher))
    }

    async fn clear(&self, app: &Application, user: &User) -> Result<OperationPtr<Clearance>> {
        let (inner, app, user) = (self.inner.clone(), app.clone(), *user);
        let op = run_on(&self.dispatcher, async move { inner.clear(&app, &user).await }).await?;
        Ok(dispatching(op, &self.dispatcher))
    }
}

struct DispatchingIdentifier {
    inner: Arc<dyn Identifier>,
    dispatcher: DispatcherPtr,
}

#[async_trait]
impl Identifier for DispatchingIdentifier {
    async fn identify_user(
        &self,
        app: &Application,
        reason: &Reason,
    ) -> Result<OperationPtr<Identification>> {
        let (inner, app, reason) = (self.inner.clone(), app.clone(), reason.clone());
        let op = run_on(&self.dispatcher, async move {
            inner.identify_user(&app, &reason).await
        })
        .await?;
        Ok(dispatching(op, &self.dispatcher))
    }
}

struct DispatchingVerifier {
    inner: Arc<dyn Verifier>,
    dispatcher: DispatcherPtr,
}

#[async_trait]
impl Verifier for DispatchingVerifier {
    async fn verify_user(
        &self,
        app: &Application,
        user: &User,
        reason: &Reason,
    ) -> Result<OperationPtr<Verification>> {
        let (inner, app, user, reason) = (self.inner.clone(), app.clone(), *user, reason.clone());
        let op = run_on(&self.dispatcher, async move {
            inner.verify_user(&app, &user, &reason).await
        })
        .await?;
        Ok(dispatching(op, &self.dispatcher))
    }
}

/// Device whose every call runs on a single dispatcher
pub struct DispatchingDevice {
    inner: DevicePtr,
    dispatcher: DispatcherPtr,
}

impl DispatchingDevice {
    pub fn new(inner: DevicePtr, dispatcher: DispatcherPtr) -> Self {
        Self { inner, dispatcher }
    }
}

#[async_trait]
impl Device for DispatchingDevice {
    async fn template_store(&self) -> Result<Arc<dyn TemplateStore>> {
        let inner = self.inner.clone();
        let store = run_on(&self.dispatcher, async move { inner.template_store().await }).await?;
        Ok(Arc::new(DispatchingTemplateStore {
            inner: store,
            dispatcher: self.dispatcher.clone(),
        }))
    }

    async fn identifier(&self) -> Result<Arc<dyn Identifier>> {
        let inner = self.inner.clone();
        let identifier = run_on(&self.dispatcher, async move { inner.identifier().await }).await?;
        Ok(Arc::new(DispatchingIdentifier {
            inner: identifier,
            dispatcher: self.dispatcher.clone(),
        }))
    }

    async fn verifier(&self) -> Result<Arc<dyn Verifier>> {
        let inner = self.inner.clone();
        let verifier = run_on(&self.dispatcher, async move { inner.verifier().await }).await?;
        Ok(Arc::new(DispatchingVerifier {
            inner: verifier,
            dispatcher: self.dispatcher.clone(),
        }))
    }
}
