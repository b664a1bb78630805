//! Data types and configuration
//!
//! Contains the domain value types exchanged with devices and clients, and
//! the configuration tree handed to device descriptors.

mod config;
mod progress;
mod types;
mod variant;

pub use config::{Configuration, DaemonConfig, DefaultDeviceConfig};
pub use progress::{Percent, Progress};
pub use types::{Application, Point, Reason, Rectangle, TemplateId, User, Void};
pub use variant::{discriminant, Dictionary, Variant};
