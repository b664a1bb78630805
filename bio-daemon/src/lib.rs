//! biometryd daemon library
//!
//! The socket server and the startup helpers of the `biometryd` binary.

pub mod server;

use bio_core::constants::{env, paths};
use std::path::PathBuf;

pub use server::{run_server, RateLimiter, ServerConfig};

/// Plugin directories to scan. Explicit directories win, then the colon
/// separated `BIOMETRYD_PLUGIN_PATH`, then the default directory.
pub fn plugin_dirs(explicit: &[PathBuf]) -> Vec<PathBuf> {
    if !explicit.is_empty() {
        return explicit.to_vec();
    }
    if let Ok(value) = std::env::var(env::PLUGIN_PATH) {
        let dirs: Vec<PathBuf> = value
            .split(':')
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        if !dirs.is_empty() {
            return dirs;
        }
    }
    vec![PathBuf::from(paths::DEFAULT_PLUGIN_DIR)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_plugin_dirs_precedence() {
        std::env::remove_var(env::PLUGIN_PATH);
        assert_eq!(plugin_dirs(&[]), vec![PathBuf::from(paths::DEFAULT_PLUGIN_DIR)]);

        std::env::set_var(env::PLUGIN_PATH, "/opt/a::/opt/b");
        assert_eq!(
            plugin_dirs(&[]),
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert_eq!(
            plugin_dirs(&[PathBuf::from("/srv/plugins")]),
            vec![PathBuf::from("/srv/plugins")]
        );
        std::env::remove_var(env::PLUGIN_PATH);
    }
}
