//! Unified error handling for biometryd
//!
//! A single error type shared by the protocol layer, the core library and the
//! daemon. Domain failures of a running operation are *not* represented here:
//! those travel as strings through the observer. This type covers everything
//! that goes wrong before or around an operation.

use std::io;
use std::path::PathBuf;

/// Result type alias using BiometryError
pub type Result<T> = std::result::Result<T, BiometryError>;

/// Unified error type for all biometryd components
#[derive(thiserror::Error, Debug)]
pub enum BiometryError {
    // ============================================================================
    // I/O and File System Errors
    // ============================================================================
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: io::Error,
    },

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    /// Startup configuration could not be used. Carries the underlying cause so
    /// the CLI can print both the user-facing message and the reason.
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        #[source]
        cause: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidConfig {
        field: String,
        reason: String,
    },

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    // ============================================================================
    // Device and Plugin Errors
    // ============================================================================
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Failed to load plugin {path}: {reason}")]
    PluginLoad {
        path: PathBuf,
        reason: String,
    },

    #[error("Plugin {path} targets host major version {plugin}, running host is {host}")]
    MajorVersionMismatch {
        path: PathBuf,
        host: u32,
        plugin: u32,
    },

    // ============================================================================
    // Validation Errors
    // ============================================================================
    #[error("Percent out of range: {value} (must be 0.0-1.0)")]
    PercentOutOfRange {
        value: f64,
    },

    #[error("Failed to decode {what}: {reason}")]
    Decode {
        what: &'static str,
        reason: String,
    },

    // ============================================================================
    // IPC Errors
    // ============================================================================
    #[error("No such object: {0}")]
    NoSuchObject(String),

    #[error("Object already registered: {0}")]
    ObjectExists(String),

    #[error("Unknown interface {interface} on {path}")]
    UnknownInterface {
        path: String,
        interface: String,
    },

    #[error("Unknown method {interface}.{member}")]
    UnknownMethod {
        interface: String,
        member: String,
    },

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("IPC protocol error: {0}")]
    IpcProtocol(String),

    #[error("Remote error {name}: {message}")]
    Remote {
        name: String,
        message: String,
    },

    #[error("Message too large: {size} bytes (max {max_size} bytes)")]
    MessageTooLarge {
        size: usize,
        max_size: usize,
    },

    #[error("Connection closed")]
    Disconnected,

    // ============================================================================
    // Authorization Errors
    // ============================================================================
    #[error("Could not resolve credentials of {0}")]
    CredentialsUnresolved(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // ============================================================================
    // Operation Errors
    // ============================================================================
    #[error("Operation already started")]
    AlreadyStarted,

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Generic(String),

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl BiometryError {
    /// Create a generic error from a string
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a configuration error without an underlying cause
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
            cause: None,
        }
    }

    /// Create a configuration error wrapping the error that caused it
    pub fn configuration_caused_by(
        msg: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Configuration {
            message: msg.into(),
            cause: Some(Box::new(cause)),
        }
    }

    /// Create a decode error for the named wire type
    pub fn decode(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Decode {
            what,
            reason: reason.into(),
        }
    }

    /// Create an IPC protocol error from a string
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::IpcProtocol(msg.into())
    }

    /// Create a permission denied error from a string
    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }

    /// Whether the error originated in the transport rather than in the remote handler.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::IpcProtocol(_)
                | Self::Disconnected
                | Self::Timeout(_)
                | Self::MessageTooLarge { .. }
                | Self::Io(_)
        )
    }
}

// Allow converting from String to BiometryError
impl From<String> for BiometryError {
    fn from(s: String) -> Self {
        Self::Generic(s)
    }
}

// Allow converting from &str to BiometryError
impl From<&str> for BiometryError {
    fn from(s: &str) -> Self {
        Self::Generic(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_configuration_error_keeps_cause() {
        let cause = io::Error::new(io::ErrorKind::NotFound, "no such file");
        let err = BiometryError::configuration_caused_by("Could not read /etc/biometryd.json", cause);

        assert_eq!(err.to_string(), "Configuration error: Could not read /etc/biometryd.json");
        let source = err.source().expect("cause should be chained");
        assert_eq!(source.to_string(), "no such file");
    }

    #[test]
    fn test_configuration_error_without_cause() {
        let err = BiometryError::configuration("Missing default device id");
        assert!(err.source().is_none());
    }

    #[test]
    fn test_transport_classification() {
        assert!(BiometryError::Disconnected.is_transport());
        assert!(BiometryError::Timeout("DefaultDevice".into()).is_transport());
        assert!(!BiometryError::NoSuchObject("/x".into()).is_transport());
        assert!(!BiometryError::permission_denied("nope").is_transport());
    }

    #[test]
    fn test_from_string() {
        let err: BiometryError = "boom".into();
        assert_eq!(err.to_string(), "boom");
    }
}
