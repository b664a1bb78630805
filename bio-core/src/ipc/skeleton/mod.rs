//! Server side exports of the object model
//!
//! Each skeleton decodes the arguments of a call, resolves the caller's
//! credentials, runs the local implementation and exports whatever object
//! the call produced at a fresh path. The reply is that path.

mod capabilities;
mod operation;
mod service;

use bio_protocol::{ObjectPath, Value};
use std::sync::Arc;
use tracing::{debug, warn};

use super::bus::{CallContext, ObjectTable};
use super::paths::next_child_path;
use crate::codec::Codec;
use crate::constants::objects;
use crate::credentials::{Credentials, CredentialsResolver};
use crate::data::{Application, User};
use crate::error::{BiometryError, Result};
use crate::operation::{OperationKind, OperationPtr};
use crate::service::Service;

pub use capabilities::{IdentifierSkeleton, TemplateStoreSkeleton, VerifierSkeleton};
pub use operation::OperationSkeleton;
pub use service::{DeviceSkeleton, ServiceSkeleton};

/// State shared by every skeleton of one connection end
pub struct SkeletonContext {
    pub objects: Arc<ObjectTable>,
    pub resolver: Arc<CredentialsResolver>,
}

impl SkeletonContext {
    pub fn new(objects: Arc<ObjectTable>, resolver: Arc<CredentialsResolver>) -> Arc<Self> {
        Arc::new(Self { objects, resolver })
    }

    /// Resolve the caller and check it may act as `claimed_user`.
    ///
    /// The application always comes from the resolved credentials. A user
    /// other than the caller's own is only accepted from root.
    pub(crate) async fn authorize(
        &self,
        call: &CallContext,
        claimed_app: &Application,
        claimed_user: Option<User>,
    ) -> Result<(Application, User)> {
        let Credentials { application, user } = self.resolver.require(&call.sender).await?;

        if claimed_app != &application {
            debug!(
                "{} claimed application {}, using {}",
                call.sender.name, claimed_app, application
            );
        }

        let effective = match claimed_user {
            Some(claimed) if claimed != user && !user.is_root() => {
                warn!(
                    "{} (uid {}) tried to act for uid {}",
                    call.sender.name,
                    user.id(),
                    claimed.id()
                );
                return Err(BiometryError::permission_denied(format!(
                    "uid {} may not act for uid {}",
                    user.id(),
                    claimed.id()
                )));
            }
            Some(claimed) => claimed,
            None => user,
        };

        Ok((application, effective))
    }

    /// Export a freshly created operation below `parent`, owned by the caller
    pub(crate) fn export_operation<K: OperationKind>(
        &self,
        call: &CallContext,
        parent: &ObjectPath,
        op: OperationPtr<K>,
    ) -> Result<Value> {
        let path = next_child_path(parent, objects::OPERATION, K::NAME)?;
        let skeleton = OperationSkeleton::new(op, &self.objects, path.clone(), &call.sender.name);
        self.objects
            .register_owned(path.clone(), skeleton, call.sender.name.clone())?;
        debug!("Exported {} operation at {} for {}", K::NAME, path, call.sender.name);
        Ok(path.encode())
    }
}

/// Export `service` at the root path of `objects`
pub fn serve_service(
    objects: Arc<ObjectTable>,
    resolver: Arc<CredentialsResolver>,
    service: Arc<dyn Service>,
) -> Result<()> {
    let context = SkeletonContext::new(objects.clone(), resolver);
    objects.register(ObjectPath::root(), ServiceSkeleton::new(context, service))
}

fn unknown_method(interface: &str, member: &str) -> BiometryError {
    BiometryError::UnknownMethod {
        interface: interface.to_string(),
        member: member.to_string(),
    }
}
