//! Constants and configuration values for biometryd
//!
//! Centralizes paths, environment variable names, object layout and limits.
//! Add new magic values here rather than inline.

use std::time::Duration;

/// Application id given to unconfined callers under the testing override
pub const UNCONFINED: &str = "unconfined";

/// Filesystem locations
pub mod paths {
    /// Directory searched for plugin manifests
    pub const DEFAULT_PLUGIN_DIR: &str = "/usr/lib/biometryd/plugins";

    /// Daemon configuration file
    pub const DEFAULT_CONFIG_FILE: &str = "/etc/biometryd/config.json";

    /// Listening socket of the daemon
    pub const DEFAULT_SOCKET: &str = "/run/biometryd.sock";

    /// Root of the proc filesystem, used for confinement labels
    pub const PROC_ROOT: &str = "/proc";
}

/// Environment variables understood by the daemon and the library
pub mod env {
    /// Log filter (trace, debug, info, warn, error or an EnvFilter directive)
    pub const LOG: &str = "BIOMETRYD_LOG";

    /// Colon separated list of plugin directories
    pub const PLUGIN_PATH: &str = "BIOMETRYD_PLUGIN_PATH";

    /// Any non-empty value other than "0" enables the testing override
    pub const TESTING: &str = "BIOMETRYD_TESTING";

    /// Socket clients connect to
    pub const SOCKET: &str = "BIOMETRYD_SOCKET";
}

/// Ids of the devices registered by default
pub mod devices {
    pub const DUMMY: &str = "Dummy";
    pub const PLUGIN: &str = "Plugin";
    pub const ANDROID: &str = "android";
}

/// Object layout on the bus
pub mod objects {
    pub const DEFAULT_DEVICE: &str = "default_device";
    pub const TEMPLATE_STORE: &str = "template_store";
    pub const IDENTIFIER: &str = "identifier";
    pub const VERIFIER: &str = "verifier";
    /// Category segment under which operations are exported
    pub const OPERATION: &str = "operation";
    /// Category segment under which client observers are exported
    pub const OBSERVER: &str = "observer";
}

/// Plugin host ABI
pub mod plugin {
    /// Major version of the plugin interface offered by this host
    pub const HOST_MAJOR: u32 = 1;
    /// Minor version of the plugin interface offered by this host
    pub const HOST_MINOR: u32 = 0;
    /// Upper bound for a manifest file
    pub const MAX_MANIFEST_SIZE: u64 = 64 * 1024;
    /// File extension of plugin manifests
    pub const MANIFEST_EXTENSION: &str = "json";
}

/// Configuration file handling
pub mod config {
    /// Upper bound for the daemon configuration file
    pub const MAX_CONFIG_SIZE: u64 = 1024 * 1024;
    /// Key naming the dummy device's storage file
    pub const STORAGE_KEY: &str = "storage";
    /// Key naming a plugin manifest for the generic plugin descriptor
    pub const PLUGIN_MANIFEST_KEY: &str = "manifest";
}

/// Worker pool sizing
pub mod runtime {
    use super::Duration;

    /// Workers used when none are configured
    pub const DEFAULT_WORKERS: usize = 4;
    /// Upper bound for the configured worker count
    pub const MAX_WORKERS: usize = 64;
    /// Grace period for untracked tasks after tracked work has drained
    pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
    /// Thread name prefix of pool workers
    pub const WORKER_THREAD_NAME: &str = "biometryd-worker";
}

/// Dummy device behaviour
pub mod dummy {
    /// Progress steps reported while enrolling
    pub const ENROLL_PROGRESS: [f64; 2] = [0.5, 1.0];
    /// Failure reported when identification finds no enrolled user
    pub const NO_MATCH: &str = "no enrolled user matched";
}
