use async_trait::async_trait;
use bio_protocol::{names, ObjectPath};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::call_for_path;
use super::capabilities::{IdentifierStub, TemplateStoreStub, VerifierStub};
use crate::device::{Device, DevicePtr, Identifier, TemplateStore, Verifier};
use crate::error::Result;
use crate::ipc::bus::ConnectionPtr;
use crate::service::Service;

/// Remote service at the root path of a connection
pub struct ServiceStub {
    connection: ConnectionPtr,
    device: OnceCell<DevicePtr>,
}

impl ServiceStub {
    pub fn new(connection: ConnectionPtr) -> Self {
        Self {
            connection,
            device: OnceCell::new(),
        }
    }
}

#[async_trait]
impl Service for ServiceStub {
    async fn default_device(&self) -> Result<DevicePtr> {
        self.device
            .get_or_try_init(|| async {
                let path = call_for_path(
                    &self.connection,
                    &ObjectPath::root(),
                    names::SERVICE,
                    names::member::DEFAULT_DEVICE,
                    vec![],
                )
                .await?;
                Ok(Arc::new(DeviceStub::new(self.connection.clone(), path)) as DevicePtr)
            })
            .await
            .cloned()
    }
}

pub struct DeviceStub {
    connection: ConnectionPtr,
    path: ObjectPath,
    template_store: OnceCell<Arc<dyn TemplateStore>>,
    identifier: OnceCell<Arc<dyn Identifier>>,
    verifier: OnceCell<Arc<dyn Verifier>>,
}

impl DeviceStub {
    pub fn new(connection: ConnectionPtr, path: ObjectPath) -> Self {
        Self {
            connection,
            path,
            template_store: OnceCell::new(),
            identifier: OnceCell::new(),
            verifier: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &ObjectPath {
        &self.path
    }

    async fn capability_path(&self, member: &str) -> Result<ObjectPath> {
        call_for_path(&self.connection, &self.path, names::DEVICE, member, vec![]).await
    }
}

#[async_trait]
impl Device for DeviceStub {
    async fn template_store(&self) -> Result<Arc<dyn TemplateStore>> {
        self.template_store
            .get_or_try_init(|| async {
                let path = self.capability_path(names::member::TEMPLATE_STORE).await?;
                Ok(Arc::new(TemplateStoreStub::new(self.connection.clone(), path)) as Arc<dyn TemplateStore>)
            })
            .await
            .cloned()
    }

    async fn identifier(&self) -> Result<Arc<dyn Identifier>> {
        self.identifier
            .get_or_try_init(|| async {
                let path = self.capability_path(names::member::IDENTIFIER).await?;
                Ok(Arc::new(IdentifierStub::new(self.connection.clone(), path)) as Arc<dyn Identifier>)
            })
            .await
            .cloned()
    }

    async fn verifier(&self) -> Result<Arc<dyn Verifier>> {
        self.verifier
            .get_or_try_init(|| async {
                let path = self.capability_path(names::member::VERIFIER).await?;
                Ok(Arc::new(VerifierStub::new(self.connection.clone(), path)) as Arc<dyn Verifier>)
            })
            .await
            .cloned()
    }
}
