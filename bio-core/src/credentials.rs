//! Resolution of caller identity
//!
//! Every privileged call is attributed to a (application, user) pair derived
//! from the connecting process, not from what the client sends. The uid and
//! the confinement label are queried concurrently; both must be known or the
//! request is denied.

use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::constants::{env, paths};
use crate::data::{Application, User};
use crate::error::{BiometryError, Result};
use crate::ipc::Sender;

/// Fully resolved identity of a caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub application: Application,
    pub user: User,
}

/// Source of identity facts about a bus peer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IdentityBroker: Send + Sync {
    /// Unix uid of the peer, `None` if it cannot be determined
    async fn unix_user_of(&self, sender: &Sender) -> Result<Option<u32>>;

    /// Confinement label of the peer, `None` if it runs without one
    async fn security_label_of(&self, sender: &Sender) -> Result<Option<String>>;
}

/// Whether the testing override is switched on in the environment
pub fn testing_override_from_env() -> bool {
    std::env::var(env::TESTING)
        .map(|v| !v.is_empty() && v != "0")
        .unwrap_or(false)
}

/// Strip the enforcement mode suffix from a raw label, e.g.
/// `com.example.app_app_1.0 (enforce)` becomes `com.example.app_app_1.0`
pub fn parse_confinement_label(raw: &str) -> Option<String> {
    let label = raw.trim_end_matches(['\0', '\n']).trim();
    let label = match label.rfind(" (") {
        Some(pos) if label.ends_with(')') => &label[..pos],
        _ => label,
    };
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// Turns bus senders into [`Credentials`]
pub struct CredentialsResolver {
    broker: Arc<dyn IdentityBroker>,
    allow_unconfined: bool,
}

impl CredentialsResolver {
    pub fn new(broker: Arc<dyn IdentityBroker>) -> Self {
        Self {
            broker,
            allow_unconfined: false,
        }
    }

    /// Map a missing label to `Application("unconfined")` instead of denying
    pub fn allow_unconfined(mut self, allow: bool) -> Self {
        self.allow_unconfined = allow;
        self
    }

    /// Resolve both facts; any failure or absence denies.
    pub async fn resolve(&self, sender: &Sender) -> Option<Credentials> {
        let (uid, label) = tokio::join!(
            self.broker.unix_user_of(sender),
            self.broker.security_label_of(sender)
        );

        let user = match uid {
            Ok(Some(uid)) => User::new(uid),
            Ok(None) => {
                warn!("No uid for {}, denying", sender.name);
                return None;
            }
            Err(e) => {
                warn!("Querying uid of {} failed: {}", sender.name, e);
                return None;
            }
        };

        let application = match label {
            Ok(Some(label)) => Application::new(label),
            Ok(None) if self.allow_unconfined => {
                debug!("{} has no label, treating as unconfined", sender.name);
                Application::unconfined()
            }
            Ok(None) => {
                warn!("No confinement label for {}, denying", sender.name);
                return None;
            }
            Err(e) => {
                warn!("Querying label of {} failed: {}", sender.name, e);
                return None;
            }
        };

        Some(Credentials { application, user })
    }

    pub async fn require(&self, sender: &Sender) -> Result<Credentials> {
        self.resolve(sender)
            .await
            .ok_or_else(|| BiometryError::CredentialsUnresolved(sender.name.clone()))
    }
}

/// Broker reading socket peer credentials and the proc filesystem
pub struct PeerIdentityBroker {
    proc_root: PathBuf,
}

impl Default for PeerIdentityBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerIdentityBroker {
    pub fn new() -> Self {
        Self::with_proc_root(paths::PROC_ROOT)
    }

    pub fn with_proc_root(root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: root.into(),
        }
    }

    async fn read_label(&self, pid: i32) -> Result<Option<String>> {
        let attr = self.proc_root.join(pid.to_string()).join("attr");
        for candidate in [attr.join("apparmor").join("current"), attr.join("current")] {
            match tokio::fs::read_to_string(&candidate).await {
                Ok(raw) => return Ok(parse_confinement_label(&raw)),
                // No LSM, or this attr file is not provided by the active one
                Err(e) if matches!(e.kind(), io::ErrorKind::NotFound | io::ErrorKind::InvalidInput) => {
                    continue
                }
                Err(e) => {
                    return Err(BiometryError::FileRead {
                        path: candidate,
                        source: e,
                    })
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl IdentityBroker for PeerIdentityBroker {
    async fn unix_user_of(&self, sender: &Sender) -> Result<Option<u32>> {
        Ok(sender.peer.map(|peer| peer.uid))
    }

    async fn security_label_of(&self, sender: &Sender) -> Result<Option<String>> {
        match sender.peer {
            Some(peer) if peer.pid > 0 => self.read_label(peer.pid).await,
            _ => Ok(None),
        }
    }
}
