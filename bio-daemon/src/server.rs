//! Unix Socket Server (Hardened)
//!
//! Accepts bus connections on a Unix domain socket and hands each one to a
//! [`SocketConnection`] serving the daemon's shared object table.
//!
//! # Security Features
//! - **Socket permissions**: Fixed mode with symlink attack prevention
//! - **Peer credentials**: Kernel-provided UID/GID/PID logged per connection
//! - **Connection limits**: Maximum concurrent connections enforced
//! - **Rate limiting**: Per-UID call rate limiting
//! - **Message limits**: Maximum frame size enforced by the connection

use bio_core::ipc::Sender;
use bio_core::{BiometryError, CallGate, ObjectTable, Result, SocketConnection, Tracker};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

// ============================================================================
// Security Constants
// ============================================================================

/// Maximum concurrent client connections
pub const MAX_CONNECTIONS: usize = 64;

/// Rate limit: default maximum calls per window and UID
pub const DEFAULT_RATE_LIMIT_REQUESTS: u32 = 1500;

/// Minimum rate limit (cannot go below this)
pub const MIN_RATE_LIMIT: u32 = 100;

/// Maximum rate limit (cannot exceed this)
pub const MAX_RATE_LIMIT: u32 = 9999;

/// Rate limit window duration
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Socket permissions (0666 = world read/write)
/// Callers are authorized per call from their peer credentials and label
pub const SOCKET_MODE: u32 = 0o666;

// ============================================================================
// Rate Limiting
// ============================================================================

struct ClientState {
    request_count: u32,
    window_start: Instant,
}

/// Per-UID fixed window rate limiter applied to every incoming call
pub struct RateLimiter {
    clients: Mutex<HashMap<u32, ClientState>>,
    max_requests: u32,
}

impl RateLimiter {
    /// Limit clamped to [`MIN_RATE_LIMIT`, `MAX_RATE_LIMIT`]
    pub fn new(max_requests: u32) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            max_requests: max_requests.clamp(MIN_RATE_LIMIT, MAX_RATE_LIMIT),
        }
    }

    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }

    /// Check if a client is rate limited. Returns true if allowed, false if limited.
    pub fn check_and_increment(&self, uid: u32) -> bool {
        let now = Instant::now();
        let mut clients = self.clients.lock();

        let state = clients.entry(uid).or_insert(ClientState {
            request_count: 0,
            window_start: now,
        });

        // Reset window if expired
        if now.duration_since(state.window_start) > RATE_LIMIT_WINDOW {
            state.request_count = 0;
            state.window_start = now;
        }

        if state.request_count >= self.max_requests {
            return false;
        }

        state.request_count += 1;
        true
    }

    /// Cleanup old entries to prevent memory growth
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.clients
            .lock()
            .retain(|_, state| now.duration_since(state.window_start) < RATE_LIMIT_WINDOW * 2);
    }

    fn tracked(&self) -> usize {
        self.clients.lock().len()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_LIMIT_REQUESTS)
    }
}

impl CallGate for RateLimiter {
    fn admit(&self, sender: &Sender) -> bool {
        let Some(peer) = sender.peer else {
            return true;
        };
        if self.check_and_increment(peer.uid) {
            return true;
        }
        warn!("Rate limit exceeded for uid={}, pid={}", peer.uid, peer.pid);
        false
    }
}

// ============================================================================
// Server
// ============================================================================

/// Socket server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub socket_path: PathBuf,
    pub max_connections: usize,
    pub rate_limit: u32,
    /// Where calls run; a fresh tracker on the serving runtime when unset
    pub tasks: Option<Tracker>,
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            max_connections: MAX_CONNECTIONS,
            rate_limit: DEFAULT_RATE_LIMIT_REQUESTS,
            tasks: None,
        }
    }

    /// Run calls through `tasks`, so stopping its runtime waits for them
    pub fn with_tasks(mut self, tasks: Tracker) -> Self {
        self.tasks = Some(tasks);
        self
    }
}

/// Bind the listening socket, replacing a stale socket but never following
/// or removing a symlink
pub fn bind_socket(path: &Path) -> Result<UnixListener> {
    if let Ok(metadata) = path.symlink_metadata() {
        if metadata.file_type().is_symlink() {
            return Err(BiometryError::PermissionDenied(format!(
                "Socket path {} is a symlink - refusing for security",
                path.display()
            )));
        }
        std::fs::remove_file(path)?;
        debug!("Removed existing socket file {}", path.display());
    }

    let listener = UnixListener::bind(path)?;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(SOCKET_MODE))?;
    Ok(listener)
}

/// Decrements the connection count when a connection ends
struct ConnectionSlot(Arc<AtomicUsize>);

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Serve `objects` on the socket until `shutdown` completes, then remove the
/// socket file.
pub async fn run_server<F>(config: &ServerConfig, objects: Arc<ObjectTable>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let path = config.socket_path.as_path();
    let listener = bind_socket(path)?;

    let tasks = match &config.tasks {
        Some(tasks) => tasks.clone(),
        None => Tracker::current()?,
    };
    let limiter = Arc::new(RateLimiter::new(config.rate_limit));
    info!("Listening on {} (mode {:o})", path.display(), SOCKET_MODE);
    info!(
        "Security: max_conn={}, max_msg={}, rate_limit={}/{:?}",
        config.max_connections,
        bio_protocol::MAX_MESSAGE_SIZE,
        limiter.max_requests(),
        RATE_LIMIT_WINDOW
    );

    // Periodic cleanup task for rate limiter
    let limiter_cleanup = limiter.clone();
    let cleanup = tokio::spawn(async move {
        loop {
            tokio::time::sleep(RATE_LIMIT_WINDOW).await;
            limiter_cleanup.cleanup();
        }
    });

    let active = Arc::new(AtomicUsize::new(0));
    let mut accepted: u64 = 0;
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let stream = match result {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        error!("Accept error: {}", e);
                        continue;
                    }
                };

                let current = active.load(Ordering::SeqCst);
                if current >= config.max_connections {
                    warn!("Connection limit reached ({}), rejecting new connection", current);
                    drop(stream);
                    continue;
                }

                let gate: Arc<dyn CallGate> = limiter.clone();
                let started =
                    SocketConnection::start_tracked(stream, objects.clone(), Some(gate), tasks.clone());
                let (connection, handle) = match started {
                    Ok(started) => started,
                    Err(e) => {
                        error!("Failed to set up connection: {}", e);
                        continue;
                    }
                };
                accepted += 1;
                active.fetch_add(1, Ordering::SeqCst);
                let slot = ConnectionSlot(active.clone());

                let peer = connection.peer().clone();
                match peer.peer {
                    Some(cred) => info!(
                        "Connection {} from uid={}, gid={}, pid={}",
                        peer.name, cred.uid, cred.gid, cred.pid
                    ),
                    None => warn!("Connection {} without peer credentials", peer.name),
                }

                tokio::spawn(async move {
                    let _slot = slot;
                    let started = Instant::now();
                    if let Err(e) = handle.await {
                        error!("Connection {} task failed: {}", peer.name, e);
                    }
                    debug!("Connection {} closed after {:?}", peer.name, started.elapsed());
                });
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    cleanup.abort();
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove socket {}: {}", path.display(), e);
    }
    info!(
        "Server stopped ({} connections accepted, {} still open)",
        accepted,
        active.load(Ordering::SeqCst)
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bio_core::ipc::PeerCredentials;
    use bio_core::testing::{RecordingObserver, StaticIdentityBroker};
    use bio_core::{
        serve_service, Application, CredentialsResolver, DefaultDeviceConfig, DefaultService,
        DeviceRegistrar, DeviceRegistry, Enrollment, Event, Service, ServiceStub, Strand, User,
    };
    use tempfile::TempDir;
    use tokio::sync::oneshot;

    const WAIT: Duration = Duration::from_secs(5);

    fn sender(uid: u32) -> Sender {
        Sender::new(
            ":1.7",
            Some(PeerCredentials {
                uid,
                gid: uid,
                pid: 42,
            }),
        )
    }

    #[test]
    fn test_rate_limit_is_clamped() {
        assert_eq!(RateLimiter::new(1).max_requests(), MIN_RATE_LIMIT);
        assert_eq!(RateLimiter::new(u32::MAX).max_requests(), MAX_RATE_LIMIT);
        assert_eq!(RateLimiter::default().max_requests(), DEFAULT_RATE_LIMIT_REQUESTS);
    }

    #[test]
    fn test_rate_limit_per_uid() {
        let limiter = RateLimiter::new(MIN_RATE_LIMIT);
        for _ in 0..MIN_RATE_LIMIT {
            assert!(limiter.admit(&sender(1000)));
        }
        assert!(!limiter.admit(&sender(1000)));

        // Other users have their own window
        assert!(limiter.admit(&sender(1001)));
        assert_eq!(limiter.tracked(), 2);

        // Without credentials there is nothing to key on
        assert!(limiter.admit(&Sender::new(":1.8", None)));
    }

    #[test]
    fn test_cleanup_keeps_recent_windows() {
        let limiter = RateLimiter::default();
        limiter.check_and_increment(1000);
        limiter.cleanup();
        assert_eq!(limiter.tracked(), 1);
    }

    #[tokio::test]
    async fn test_bind_refuses_symlink() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        std::fs::write(&target, b"keep").unwrap();
        let link = dir.path().join("biometryd.sock");
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let err = bind_socket(&link).unwrap_err();
        assert!(matches!(err, BiometryError::PermissionDenied(_)));
        assert!(target.exists());
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("biometryd.sock");
        drop(bind_socket(&path).unwrap());
        assert!(path.exists());

        let _listener = bind_socket(&path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, SOCKET_MODE);
    }

    #[tokio::test]
    async fn test_enrollment_over_socket() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path().join("biometryd.sock"));

        let registry = Arc::new(DeviceRegistry::new());
        let _registrar = DeviceRegistrar::new(registry.clone(), &[]);
        let service = DefaultService::new(
            registry,
            DefaultDeviceConfig::default(),
            Strand::current().unwrap(),
        );
        let user = User::current();
        let broker = StaticIdentityBroker::new(user.id(), "com.example.app");
        let objects = ObjectTable::new();
        serve_service(
            objects.clone(),
            Arc::new(CredentialsResolver::new(Arc::new(broker))),
            Arc::new(service),
        )
        .unwrap();

        let (stop, stopped) = oneshot::channel::<()>();
        let server_config = config.clone();
        let server = tokio::spawn(async move {
            run_server(&server_config, objects, async {
                let _ = stopped.await;
            })
            .await
        });
        for _ in 0..100 {
            if config.socket_path.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let client = SocketConnection::connect(&config.socket_path, ObjectTable::new())
            .await
            .unwrap();
        let device = ServiceStub::new(client.clone()).default_device().await.unwrap();
        let enroll = device
            .template_store()
            .await
            .unwrap()
            .enroll(&Application::new("com.example.app"), &user)
            .await
            .unwrap();
        let observer = RecordingObserver::<Enrollment>::new();
        enroll.start_with_observer(observer.clone()).await.unwrap();
        assert!(matches!(observer.wait_for_terminal(WAIT).await.unwrap(), Event::Succeeded(_)));
        assert_eq!(observer.names(), vec!["started", "progress", "progress", "succeeded"]);

        client.close().await;
        stop.send(()).unwrap();
        server.await.unwrap().unwrap();
        assert!(!config.socket_path.exists());
    }
}
