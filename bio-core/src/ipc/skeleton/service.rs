use async_trait::async_trait;
use bio_protocol::{names, ObjectPath, Value};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use super::capabilities::{IdentifierSkeleton, TemplateStoreSkeleton, VerifierSkeleton};
use super::{unknown_method, SkeletonContext};
use crate::codec::{expect_arity, Codec};
use crate::constants::objects;
use crate::device::DevicePtr;
use crate::error::{BiometryError, Result};
use crate::ipc::bus::{CallContext, Object, ObjectPtr};
use crate::service::Service;

/// Export `object` at `path` once; later calls hand out the same path
async fn export_once<F, Fut>(
    cell: &OnceCell<ObjectPath>,
    context: &SkeletonContext,
    path: Result<ObjectPath>,
    make: F,
) -> Result<Value>
where
    F: FnOnce(ObjectPath) -> Fut,
    Fut: std::future::Future<Output = Result<ObjectPtr>>,
{
    let path = cell
        .get_or_try_init(|| async move {
            let path = path?;
            let object = make(path.clone()).await?;
            context.objects.register(path.clone(), object)?;
            Ok::<_, BiometryError>(path)
        })
        .await?;
    Ok(path.encode())
}

pub struct ServiceSkeleton {
    context: Arc<SkeletonContext>,
    service: Arc<dyn Service>,
    device: OnceCell<ObjectPath>,
}

impl ServiceSkeleton {
    pub fn new(context: Arc<SkeletonContext>, service: Arc<dyn Service>) -> Arc<Self> {
        Arc::new(Self {
            context,
            service,
            device: OnceCell::new(),
        })
    }
}

#[async_trait]
impl Object for ServiceSkeleton {
    fn interface(&self) -> &'static str {
        names::SERVICE
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        if member != names::member::DEFAULT_DEVICE {
            return Err(unknown_method(names::SERVICE, member));
        }
        expect_arity(args, 0)?;
        self.context.resolver.require(&ctx.sender).await?;

        let path = ObjectPath::root()
            .child(objects::DEFAULT_DEVICE)
            .map_err(BiometryError::protocol);
        export_once(&self.device, &self.context, path, |path| async move {
            let device = self.service.default_device().await?;
            info!("Exporting default device at {}", path);
            Ok(DeviceSkeleton::new(self.context.clone(), device, path) as ObjectPtr)
        })
        .await
    }
}

pub struct DeviceSkeleton {
    context: Arc<SkeletonContext>,
    device: DevicePtr,
    path: ObjectPath,
    template_store: OnceCell<ObjectPath>,
    identifier: OnceCell<ObjectPath>,
    verifier: OnceCell<ObjectPath>,
}

impl DeviceSkeleton {
    pub fn new(context: Arc<SkeletonContext>, device: DevicePtr, path: ObjectPath) -> Arc<Self> {
        Arc::new(Self {
            context,
            device,
            path,
            template_store: OnceCell::new(),
            identifier: OnceCell::new(),
            verifier: OnceCell::new(),
        })
    }

    fn child(&self, segment: &str) -> Result<ObjectPath> {
        self.path.child(segment).map_err(BiometryError::protocol)
    }
}

#[async_trait]
impl Object for DeviceSkeleton {
    fn interface(&self) -> &'static str {
        names::DEVICE
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        expect_arity(args, 0)?;
        let context = &self.context;

        match member {
            names::member::TEMPLATE_STORE => {
                context.resolver.require(&ctx.sender).await?;
                let path = self.child(objects::TEMPLATE_STORE);
                export_once(&self.template_store, context, path, |path| async move {
                    let store = self.device.template_store().await?;
                    Ok(TemplateStoreSkeleton::new(context.clone(), store, path) as ObjectPtr)
                })
                .await
            }
            names::member::IDENTIFIER => {
                context.resolver.require(&ctx.sender).await?;
                let path = self.child(objects::IDENTIFIER);
                export_once(&self.identifier, context, path, |path| async move {
                    let identifier = self.device.identifier().await?;
                    Ok(IdentifierSkeleton::new(context.clone(), identifier, path) as ObjectPtr)
                })
                .await
            }
            names::member::VERIFIER => {
                context.resolver.require(&ctx.sender).await?;
                let path = self.child(objects::VERIFIER);
                export_once(&self.verifier, context, path, |path| async move {
                    let verifier = self.device.verifier().await?;
                    Ok(VerifierSkeleton::new(context.clone(), verifier, path) as ObjectPtr)
                })
                .await
            }
            other => Err(unknown_method(names::DEVICE, other)),
        }
    }
}
