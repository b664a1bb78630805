//! biometry
//!
//! Umbrella crate over the biometryd workspace: the shared error type, the
//! wire protocol, the core object model and the daemon's socket server.

pub use bio_core as core;
pub use bio_daemon as daemon;
pub use bio_error as error;
pub use bio_protocol as protocol;

pub use bio_core::{
    Application, BiometryError, Device, Event, Observer, Operation, Result, Service, User,
};
