//! biometryd core library
//!
//! Mediates access to biometric hardware for confined client applications.
//! Enrollment, identification and verification are exposed as asynchronous,
//! observable, cancellable operations, locally through the [`Device`] traits
//! and remotely through the same traits implemented by bus stubs.
//!
//! # Module Structure
//!
//! - `data/` - Domain values and configuration
//! - `operation/` - The operation/observer protocol and its enforcement
//! - `device/` - Devices, the registry, plugins and the dispatching decorator
//! - `ipc/` - Object table, connections, skeletons and stubs
//!
//! # Example
//!
//! ```no_run
//! use bio_core::{Application, LocalConnection, Sender, Service, ServiceStub, User};
//!
//! # async fn run() -> bio_core::Result<()> {
//! let (_server, client) = LocalConnection::pair(Sender::new(":1.0", None), Sender::new(":1.1", None));
//! let service = ServiceStub::new(client);
//! let device = service.default_device().await?;
//! let enroll = device
//!     .template_store()
//!     .await?
//!     .enroll(&Application::system(), &User::current())
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Grouped modules
pub mod data;
pub mod device;
pub mod ipc;
pub mod operation;

// Standalone modules
pub mod codec;
pub mod constants;
pub mod credentials;
pub mod error;
pub mod runtime;
pub mod service;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use codec::Codec;
pub use credentials::{Credentials, CredentialsResolver, IdentityBroker, PeerIdentityBroker};
pub use data::{
    Application, Configuration, DaemonConfig, DefaultDeviceConfig, Dictionary, Percent, Point,
    Progress, Reason, Rectangle, TemplateId, User, Variant, Void,
};
pub use device::{
    Descriptor, DescriptorPtr, Device, DevicePtr, DeviceRegistrar, DeviceRegistry,
    DispatchingDevice, Identifier, PluginLoader, TemplateStore, Verifier, Version,
};
pub use error::{BiometryError, Result};
pub use ipc::{
    serve_service, CallGate, Connection, ConnectionPtr, LocalConnection, ObjectTable, Sender,
    ServiceStub, SocketConnection,
};
pub use operation::{
    Clearance, Enrollment, Event, GuardedOperation, Identification, List, Observer, ObserverPtr,
    Operation, OperationKind, OperationPtr, Removal, SizeQuery, Verification,
};
pub use runtime::{Dispatcher, DispatcherPtr, Runtime, Strand, Tracker};
pub use service::{DefaultService, Service};
