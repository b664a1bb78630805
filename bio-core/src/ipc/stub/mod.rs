//! Client side proxies of the object model
//!
//! Every stub implements the same trait as the local object it stands for,
//! so client code is oblivious to whether a device is local or remote.
//! Factory calls are bounded by the default call timeout and their results
//! are cached for the life of the stub.

mod capabilities;
mod operation;
mod service;

use bio_protocol::{MethodCall, ObjectPath, Value, DEFAULT_CALL_TIMEOUT};

use super::bus::ConnectionPtr;
use crate::codec::Codec;
use crate::error::Result;

pub use capabilities::{IdentifierStub, TemplateStoreStub, VerifierStub};
pub use operation::OperationStub;
pub use service::{DeviceStub, ServiceStub};

/// Call a factory method and decode the object path it returns
async fn call_for_path(
    connection: &ConnectionPtr,
    path: &ObjectPath,
    interface: &str,
    member: &str,
    args: Vec<Value>,
) -> Result<ObjectPath> {
    let call = MethodCall::new(path.clone(), interface, member, args);
    let reply = connection.call(call, Some(DEFAULT_CALL_TIMEOUT)).await?;
    ObjectPath::decode(&reply)
}
