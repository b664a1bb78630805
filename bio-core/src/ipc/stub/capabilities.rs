use async_trait::async_trait;
use bio_protocol::{names, ObjectPath, Value};
use std::sync::Arc;

use super::call_for_path;
use super::operation::OperationStub;
use crate::codec::Codec;
use crate::data::{Application, Reason, TemplateId, User};
use crate::device::{Identifier, TemplateStore, Verifier};
use crate::error::Result;
use crate::ipc::bus::ConnectionPtr;
use crate::operation::{
    Clearance, Enrollment, Identification, List, OperationKind, OperationPtr, Removal, SizeQuery,
    Verification,
};

/// Shared plumbing: call a factory and wrap the returned path
struct Factory {
    connection: ConnectionPtr,
    path: ObjectPath,
    interface: &'static str,
}

impl Factory {
    async fn operation<K: OperationKind>(&self, member: &str, args: Vec<Value>) -> Result<OperationPtr<K>> {
        let path = call_for_path(&self.connection, &self.path, self.interface, member, args).await?;
        Ok(Arc::new(OperationStub::<K>::new(self.connection.clone(), path)))
    }
}

pub struct TemplateStoreStub {
    factory: Factory,
}

impl TemplateStoreStub {
    pub fn new(connection: ConnectionPtr, path: ObjectPath) -> Self {
        Self {
            factory: Factory {
                connection,
                path,
                interface: names::TEMPLATE_STORE,
            },
        }
    }
}

#[async_trait]
impl TemplateStore for TemplateStoreStub {
    async fn size(&self, app: &Application, user: &User) -> Result<OperationPtr<SizeQuery>> {
        self.factory
            .operation(names::member::SIZE, vec![app.encode(), user.encode()])
            .await
    }

    async fn list(&self, app: &Application, user: &User) -> Result<OperationPtr<List>> {
        self.factory
            .operation(names::member::LIST, vec![app.encode(), user.encode()])
            .await
    }

    async fn enroll(&self, app: &Application, user: &User) -> Result<OperationPtr<Enrollment>> {
        self.factory
            .operation(names::member::ENROLL, vec![app.encode(), user.encode()])
            .await
    }

    async fn remove(
        &self,
        app: &Application,
        user: &User,
        id: TemplateId,
    ) -> Result<OperationPtr<Removal>> {
        self.factory
            .operation(
                names::member::REMOVE,
                vec![app.encode(), user.encode(), id.encode()],
            )
            .await
    }

    async fn clear(&self, app: &Application, user: &User) -> Result<OperationPtr<Clearance>> {
        self.factory
            .operation(names::member::CLEAR, vec![app.encode(), user.encode()])
            .await
    }
}

pub struct IdentifierStub {
    factory: Factory,
}

impl IdentifierStub {
    pub fn new(connection: ConnectionPtr, path: ObjectPath) -> Self {
        Self {
            factory: Factory {
                connection,
                path,
                interface: names::IDENTIFIER,
            },
        }
    }
}

#[async_trait]
impl Identifier for IdentifierStub {
    async fn identify_user(
        &self,
        app: &Application,
        reason: &Reason,
    ) -> Result<OperationPtr<Identification>> {
        self.factory
            .operation(names::member::IDENTIFY_USER, vec![app.encode(), reason.encode()])
            .await
    }
}

pub struct VerifierStub {
    factory: Factory,
}

impl VerifierStub {
    pub fn new(connection: ConnectionPtr, path: ObjectPath) -> Self {
        Self {
            factory: Factory {
                connection,
                path,
                interface: names::VERIFIER,
            },
        }
    }
}

#[async_trait]
impl Verifier for VerifierStub {
    async fn verify_user(
        &self,
        app: &Application,
        user: &User,
        reason: &Reason,
    ) -> Result<OperationPtr<Verification>> {
        self.factory
            .operation(
                names::member::VERIFY_USER,
                vec![app.encode(), user.encode(), reason.encode()],
            )
            .await
    }
}
