//! Devices and their capabilities
//!
//! A [`Device`] bundles three capabilities: a [`TemplateStore`], an
//! [`Identifier`] and a [`Verifier`]. Every capability method only *creates*
//! an operation; nothing touches the hardware until the operation is started.
//! Devices are built exclusively through a [`Descriptor`] looked up in the
//! [`DeviceRegistry`].

mod android;
mod dispatching;
mod dummy;
mod plugin;
mod registry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::constants::plugin::{HOST_MAJOR, HOST_MINOR};
use crate::data::{Application, Configuration, Reason, TemplateId, User};
use crate::error::Result;
use crate::operation::{
    Clearance, Enrollment, Identification, List, OperationPtr, Removal, SizeQuery, Verification,
};

pub use android::AndroidDescriptor;
pub use dispatching::DispatchingDevice;
pub use dummy::{DummyDescriptor, DummyDevice};
pub use plugin::{
    DriverCommand, HardwareError, PluginDescriptor, PluginDevice, PluginLoader, PluginManifest,
};
pub use registry::{DeviceRegistrar, DeviceRegistry};

/// Management of enrolled templates, scoped per (application, user)
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn size(&self, app: &Application, user: &User) -> Result<OperationPtr<SizeQuery>>;
    async fn list(&self, app: &Application, user: &User) -> Result<OperationPtr<List>>;
    async fn enroll(&self, app: &Application, user: &User) -> Result<OperationPtr<Enrollment>>;
    async fn remove(
        &self,
        app: &Application,
        user: &User,
        id: TemplateId,
    ) -> Result<OperationPtr<Removal>>;
    async fn clear(&self, app: &Application, user: &User) -> Result<OperationPtr<Clearance>>;
}

/// One-to-many matching: which user does a capture belong to
#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify_user(
        &self,
        app: &Application,
        reason: &Reason,
    ) -> Result<OperationPtr<Identification>>;
}

/// One-to-one matching: does a capture belong to `user`
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify_user(
        &self,
        app: &Application,
        user: &User,
        reason: &Reason,
    ) -> Result<OperationPtr<Verification>>;
}

/// A biometric device
#[async_trait]
pub trait Device: Send + Sync {
    async fn template_store(&self) -> Result<Arc<dyn TemplateStore>>;
    async fn identifier(&self) -> Result<Arc<dyn Identifier>>;
    async fn verifier(&self) -> Result<Arc<dyn Verifier>>;
}

pub type DevicePtr = Arc<dyn Device>;

/// Plugin interface version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Interface version offered by this host
    pub const fn host() -> Self {
        Self::new(HOST_MAJOR, HOST_MINOR)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Metadata about a kind of device plus the factory creating instances
pub trait Descriptor: Send + Sync {
    fn name(&self) -> &str;
    fn author(&self) -> &str;
    fn description(&self) -> &str;

    fn version(&self) -> Version {
        Version::host()
    }

    /// Create a device from an opaque configuration tree
    fn create(&self, config: &Configuration) -> Result<DevicePtr>;
}

pub type DescriptorPtr = Arc<dyn Descriptor>;
