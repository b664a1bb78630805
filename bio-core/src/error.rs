//! Error types, shared with the rest of the workspace

pub use bio_error::{BiometryError, Result};
