//! Out-of-process device plugins
//!
//! A plugin is a JSON manifest describing the device and naming a driver
//! executable. The manifest's host interface version is checked before
//! anything from the plugin runs. A verified plugin device spawns its driver
//! once per started operation:
//!
//! ```text
//! <program> <args...> <operation>      e.g. "fpdriver --usb enroll"
//! stdin:  one JSON request line, then EOF
//! stdout: JSON event lines
//!         {"event":"started"}
//!         {"event":"progress","value":<wire value>}
//!         {"event":"failed","code":2}  or  {"event":"failed","value":<wire value>}
//!         {"event":"succeeded","value":<wire value>}
//! ```
//!
//! Cancelling kills the driver. A driver exiting without a terminal event
//! fails the operation.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use bio_protocol::Value;

use crate::codec::Codec;
use crate::constants::{config::PLUGIN_MANIFEST_KEY, plugin as limits};
use crate::data::{Application, Configuration, Reason, TemplateId, User};
use crate::error::{BiometryError, Result};
use crate::operation::{
    Clearance, Enrollment, Event, Identification, List, ObserverPtr, Operation, OperationKind,
    OperationPtr, Removal, SizeQuery, Verification,
};

use super::{Descriptor, Device, DevicePtr, Identifier, TemplateStore, Verifier, Version};

/// Time a driver gets to exit on its own after reporting a result
const DRIVER_EXIT_GRACE: Duration = Duration::from_secs(2);

// ============================================================================
// Manifest and loading
// ============================================================================

/// Driver executable and its fixed arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriverCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub host_version: Version,
    pub driver: DriverCommand,
}

/// Reads and verifies plugin manifests
#[derive(Debug, Clone)]
pub struct PluginLoader {
    host: Version,
}

impl Default for PluginLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginLoader {
    pub fn new() -> Self {
        Self::with_host_version(Version::host())
    }

    pub fn with_host_version(host: Version) -> Self {
        Self { host }
    }

    pub fn read_manifest(&self, path: &Path) -> Result<PluginManifest> {
        let load_error = |reason: String| BiometryError::PluginLoad {
            path: path.to_path_buf(),
            reason,
        };

        let metadata = fs::metadata(path).map_err(|e| load_error(e.to_string()))?;
        if metadata.len() > limits::MAX_MANIFEST_SIZE {
            return Err(load_error(format!(
                "manifest exceeds {} bytes",
                limits::MAX_MANIFEST_SIZE
            )));
        }

        let contents = fs::read_to_string(path).map_err(|e| load_error(e.to_string()))?;
        let manifest: PluginManifest =
            serde_json::from_str(&contents).map_err(|e| load_error(e.to_string()))?;

        if manifest.id.trim().is_empty() {
            return Err(load_error("manifest id is empty".into()));
        }
        Ok(manifest)
    }

    /// Check the manifest targets this host's major interface version
    pub fn verify(&self, path: &Path, manifest: &PluginManifest) -> Result<()> {
        if manifest.host_version.major != self.host.major {
            return Err(BiometryError::MajorVersionMismatch {
                path: path.to_path_buf(),
                host: self.host.major,
                plugin: manifest.host_version.major,
            });
        }
        if manifest.host_version.minor > self.host.minor {
            debug!(
                "Plugin {} targets newer minor version {} (host {})",
                manifest.id, manifest.host_version, self.host
            );
        }
        Ok(())
    }

    /// Read and verify a manifest. Nothing from the plugin runs here.
    pub fn load(&self, path: &Path) -> Result<PluginDescriptor> {
        let manifest = self.read_manifest(path)?;
        self.verify(path, &manifest)?;
        Ok(PluginDescriptor {
            manifest,
            path: path.to_path_buf(),
        })
    }

    /// Load every manifest in `dir`, in file name order
    pub fn discover(&self, dir: &Path) -> (Vec<PluginDescriptor>, Vec<BiometryError>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Plugin directory {:?} not readable: {}", dir, e);
                return (Vec::new(), Vec::new());
            }
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|e| e.to_str()) == Some(limits::MANIFEST_EXTENSION)
            })
            .collect();
        paths.sort();

        let mut plugins = Vec::new();
        let mut failures = Vec::new();
        for path in paths {
            match self.load(&path) {
                Ok(plugin) => plugins.push(plugin),
                Err(e) => failures.push(e),
            }
        }
        (plugins, failures)
    }
}

/// A verified plugin
#[derive(Debug, Clone)]
pub struct PluginDescriptor {
    manifest: PluginManifest,
    path: PathBuf,
}

impl PluginDescriptor {
    pub fn manifest(&self) -> &PluginManifest {
        &self.manifest
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Driver with a relative program resolved against the manifest directory
    fn resolved_driver(&self) -> DriverCommand {
        let mut driver = self.manifest.driver.clone();
        if driver.program.is_relative() {
            if let Some(dir) = self.path.parent() {
                driver.program = dir.join(&driver.program);
            }
        }
        driver
    }
}

impl Descriptor for PluginDescriptor {
    fn name(&self) -> &str {
        &self.manifest.name
    }

    fn author(&self) -> &str {
        &self.manifest.author
    }

    fn description(&self) -> &str {
        &self.manifest.description
    }

    fn version(&self) -> Version {
        self.manifest.host_version
    }

    fn create(&self, config: &Configuration) -> Result<DevicePtr> {
        info!(
            "Creating plugin device {} ({})",
            self.manifest.id,
            self.manifest.driver.program.display()
        );
        Ok(Arc::new(PluginDevice::new(
            self.manifest.id.clone(),
            self.resolved_driver(),
            config.clone(),
        )))
    }
}

/// The builtin "Plugin" device: loads the manifest named by the
/// configuration's `manifest` key at creation time
pub(crate) struct GenericPluginDescriptor {
    loader: PluginLoader,
}

impl GenericPluginDescriptor {
    pub(crate) fn new(loader: PluginLoader) -> Self {
        Self { loader }
    }
}

impl Descriptor for GenericPluginDescriptor {
    fn name(&self) -> &str {
        "Plugin"
    }

    fn author(&self) -> &str {
        "biometryd"
    }

    fn description(&self) -> &str {
        "Device provided by a plugin manifest named in the configuration"
    }

    fn create(&self, config: &Configuration) -> Result<DevicePtr> {
        let path = config
            .get_path(PLUGIN_MANIFEST_KEY)
            .ok_or_else(|| BiometryError::MissingConfig(PLUGIN_MANIFEST_KEY.into()))?;
        self.loader.load(&path)?.create(config)
    }
}

// ============================================================================
// Driver protocol
// ============================================================================

/// Failure classes a driver can report by code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    Unavailable,
    Busy,
    Timeout,
    NoMatch,
    StorageFull,
    Vendor(i32),
}

impl HardwareError {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Unavailable,
            2 => Self::Busy,
            3 => Self::Timeout,
            4 => Self::NoMatch,
            5 => Self::StorageFull,
            other => Self::Vendor(other),
        }
    }
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable => f.write_str("sensor unavailable"),
            Self::Busy => f.write_str("sensor busy"),
            Self::Timeout => f.write_str("sensor timed out"),
            Self::NoMatch => f.write_str("no match"),
            Self::StorageFull => f.write_str("template storage full"),
            Self::Vendor(code) => write!(f, "vendor error {}", code),
        }
    }
}

#[derive(Debug, Serialize)]
struct DriverRequest {
    operation: &'static str,
    application: Application,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<User>,
    #[serde(skip_serializing_if = "Option::is_none")]
    template: Option<TemplateId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<Reason>,
    config: Configuration,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DriverEvent {
    Started,
    Progress {
        value: Value,
    },
    Canceled {
        #[serde(default)]
        value: Option<Value>,
    },
    Failed {
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        code: Option<i32>,
    },
    Succeeded {
        value: Value,
    },
}

fn parse_event<K: OperationKind>(line: &str) -> Result<Event<K>> {
    let event: DriverEvent = serde_json::from_str(line)?;
    Ok(match event {
        DriverEvent::Started => Event::Started,
        DriverEvent::Progress { value } => Event::Progress(K::Progress::decode(&value)?),
        DriverEvent::Canceled { value } => Event::Canceled(
            value
                .map(|v| K::Reason::decode(&v))
                .transpose()?
                .unwrap_or_default(),
        ),
        DriverEvent::Failed { value: Some(v), .. } => Event::Failed(K::Error::decode(&v)?),
        DriverEvent::Failed { value: None, code } => Event::Failed(K::Error::from(
            HardwareError::from_code(code.unwrap_or(-1)).to_string(),
        )),
        DriverEvent::Succeeded { value } => Event::Succeeded(K::Result::decode(&value)?),
    })
}

struct DriverLaunch {
    plugin: String,
    command: DriverCommand,
    config: Configuration,
}

struct PluginOperation<K: OperationKind> {
    launch: Arc<DriverLaunch>,
    request: DriverRequest,
    started: AtomicBool,
    kill: Mutex<Option<oneshot::Sender<()>>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: OperationKind> PluginOperation<K> {
    fn spawn_driver(&self) -> std::io::Result<Child> {
        Command::new(&self.launch.command.program)
            .args(&self.launch.command.args)
            .arg(K::NAME)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
    }
}

#[async_trait]
impl<K: OperationKind> Operation<K> for PluginOperation<K> {
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(BiometryError::AlreadyStarted);
        }

        let mut request = serde_json::to_vec(&self.request)?;
        request.push(b'\n');

        let child = match self.spawn_driver() {
            Ok(child) => child,
            Err(e) => {
                warn!("Plugin {}: driver failed to start: {}", self.launch.plugin, e);
                observer.on_event(Event::Started);
                observer.on_event(Event::Failed(K::Error::from(format!(
                    "driver could not be started: {}",
                    e
                ))));
                return Ok(());
            }
        };

        let (kill_tx, kill_rx) = oneshot::channel();
        *self.kill.lock() = Some(kill_tx);
        tokio::spawn(drive::<K>(
            child,
            request,
            kill_rx,
            observer,
            self.launch.plugin.clone(),
        ));
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        if let Some(kill) = self.kill.lock().take() {
            // The driver task may already be gone; that is fine
            let _ = kill.send(());
        }
        Ok(())
    }
}

async fn drive<K: OperationKind>(
    mut child: Child,
    request: Vec<u8>,
    mut kill: oneshot::Receiver<()>,
    observer: ObserverPtr<K>,
    plugin: String,
) {
    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(&request).await {
            debug!("Plugin {}: driver did not take the request: {}", plugin, e);
        }
    }

    let Some(stdout) = child.stdout.take() else {
        observer.on_event(Event::Failed(K::Error::from("driver has no output".to_string())));
        return;
    };
    let mut lines = BufReader::new(stdout).lines();
    let mut finished = false;

    loop {
        tokio::select! {
            _ = &mut kill => {
                debug!("Plugin {}: killing driver for {}", plugin, K::NAME);
                if let Err(e) = child.start_kill() {
                    warn!("Plugin {}: failed to kill driver: {}", plugin, e);
                }
                observer.on_event(Event::Canceled(K::Reason::default()));
                finished = true;
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => match parse_event::<K>(&line) {
                    Ok(event) => {
                        let terminal = event.is_terminal();
                        observer.on_event(event);
                        if terminal {
                            finished = true;
                            break;
                        }
                    }
                    Err(e) => warn!("Plugin {}: ignoring malformed driver output: {}", plugin, e),
                },
                Ok(None) => break,
                Err(e) => {
                    warn!("Plugin {}: reading driver output failed: {}", plugin, e);
                    break;
                }
            }
        }
    }

    match tokio::time::timeout(DRIVER_EXIT_GRACE, child.wait()).await {
        Ok(Ok(status)) if !finished => {
            observer.on_event(Event::Failed(K::Error::from(format!(
                "driver exited without a result ({})",
                status
            ))));
        }
        Ok(Ok(_)) => {}
        Ok(Err(e)) => {
            warn!("Plugin {}: waiting for driver failed: {}", plugin, e);
            if !finished {
                observer.on_event(Event::Failed(K::Error::from(e.to_string())));
            }
        }
        Err(_) => {
            warn!("Plugin {}: driver did not exit, killing it", plugin);
            let _ = child.kill().await;
            if !finished {
                observer.on_event(Event::Failed(K::Error::from(
                    "driver stopped responding".to_string(),
                )));
            }
        }
    }
}

// ============================================================================
// Device
// ============================================================================

struct PluginCapabilities {
    launch: Arc<DriverLaunch>,
}

impl PluginCapabilities {
    fn operation<K: OperationKind>(
        &self,
        app: &Application,
        user: Option<User>,
        template: Option<TemplateId>,
        reason: Option<Reason>,
    ) -> OperationPtr<K> {
        Arc::new(PluginOperation::<K> {
            launch: self.launch.clone(),
            request: DriverRequest {
                operation: K::NAME,
                application: app.clone(),
                user,
                template,
                reason,
                config: self.launch.config.clone(),
            },
            started: AtomicBool::new(false),
            kill: Mutex::new(None),
            _kind: PhantomData,
        })
    }
}

#[async_trait]
impl TemplateStore for PluginCapabilities {
    async fn size(&self, app: &Application, user: &User) -> Result<OperationPtr<SizeQuery>> {
        Ok(self.operation(app, Some(*user), None, None))
    }

    async fn list(&self, app: &Application, user: &User) -> Result<OperationPtr<List>> {
        Ok(self.operation(app, Some(*user), None, None))
    }

    async fn enroll(&self, app: &Application, user: &User) -> Result<OperationPtr<Enrollment>> {
        Ok(self.operation(app, Some(*user), None, None))
    }

    async fn remove(
        &self,
        app: &Application,
        user: &User,
        id: TemplateId,
    ) -> Result<OperationPtr<Removal>> {
        Ok(self.operation(app, Some(*user), Some(id), None))
    }

    async fn clear(&self, app: &Application, user: &User) -> Result<OperationPtr<Clearance>> {
        Ok(self.operation(app, Some(*user), None, None))
    }
}

#[async_trait]
impl Identifier for PluginCapabilities {
    async fn identify_user(
        &self,
        app: &Application,
        reason: &Reason,
    ) -> Result<OperationPtr<Identification>> {
        Ok(self.operation(app, None, None, Some(reason.clone())))
    }
}

#[async_trait]
impl Verifier for PluginCapabilities {
    async fn verify_user(
        &self,
        app: &Application,
        user: &User,
        reason: &Reason,
    ) -> Result<OperationPtr<Verification>> {
        Ok(self.operation(app, Some(*user), None, Some(reason.clone())))
    }
}

/// Device backed by a plugin driver process
pub struct PluginDevice {
    capabilities: Arc<PluginCapabilities>,
}

impl PluginDevice {
    pub fn new(plugin: String, command: DriverCommand, config: Configuration) -> Self {
        Self {
            capabilities: Arc::new(PluginCapabilities {
                launch: Arc::new(DriverLaunch {
                    plugin,
                    command,
                    config,
                }),
            }),
        }
    }
}

#[async_trait]
impl Device for PluginDevice {
    async fn template_store(&self) -> Result<Arc<dyn TemplateStore>> {
        Ok(self.capabilities.clone())
    }

    async fn identifier(&self) -> Result<Arc<dyn Identifier>> {
        Ok(self.capabilities.clone())
    }

    async fn verifier(&self) -> Result<Arc<dyn Verifier>> {
        Ok(self.capabilities.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceRegistrar, DeviceRegistry};
    use crate::testing::RecordingObserver;
    use tempfile::TempDir;

    const WAIT: Duration = Duration::from_secs(10);

    fn write_manifest(dir: &Path, file: &str, id: &str, major: u32, script: &Path) -> PathBuf {
        let manifest = serde_json::json!({
            "id": id,
            "name": format!("{} reader", id),
            "author": "tests",
            "description": "scripted driver",
            "hostVersion": {"major": major, "minor": 0},
            "driver": {"program": "/bin/sh", "args": [script]},
        });
        let path = dir.join(file);
        fs::write(&path, serde_json::to_vec_pretty(&manifest).unwrap()).unwrap();
        path
    }

    fn write_script(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("driver.sh");
        fs::write(&path, format!("cat > /dev/null\n{}\n", body)).unwrap();
        path
    }

    #[test]
    fn test_major_version_mismatch_never_runs_plugin() {
        let dir = TempDir::new().unwrap();
        let marker = dir.path().join("ran");
        let script = write_script(dir.path(), &format!("touch {}", marker.display()));
        let manifest = write_manifest(dir.path(), "future.json", "future", 99, &script);

        let err = PluginLoader::new().load(&manifest).unwrap_err();
        match err {
            BiometryError::MajorVersionMismatch { host, plugin, .. } => {
                assert_eq!(host, limits::HOST_MAJOR);
                assert_eq!(plugin, 99);
            }
            other => panic!("unexpected {:?}", other),
        }

        let registry = Arc::new(DeviceRegistry::new());
        let _registrar = DeviceRegistrar::new(registry.clone(), &[dir.path().to_path_buf()]);
        assert!(!registry.contains("future"));

        let generic = registry.get("Plugin").unwrap();
        let config = Configuration::new().with("manifest", manifest.to_string_lossy().to_string());
        assert!(matches!(
            generic.create(&config),
            Err(BiometryError::MajorVersionMismatch { .. })
        ));

        assert!(!marker.exists());
    }

    #[test]
    fn test_discover_registers_verified_plugins() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "true");
        write_manifest(dir.path(), "a.json", "reader_a", limits::HOST_MAJOR, &script);
        write_manifest(dir.path(), "b.json", "reader_b", limits::HOST_MAJOR + 1, &script);
        fs::write(dir.path().join("notes.txt"), "not a manifest").unwrap();
        fs::write(dir.path().join("broken.json"), "{").unwrap();

        let (plugins, failures) = PluginLoader::new().discover(dir.path());
        assert_eq!(plugins.len(), 1);
        assert_eq!(plugins[0].manifest().id, "reader_a");
        assert_eq!(failures.len(), 2);
    }

    #[test]
    fn test_generic_plugin_requires_manifest_key() {
        let generic = GenericPluginDescriptor::new(PluginLoader::new());
        assert!(matches!(
            generic.create(&Configuration::new()),
            Err(BiometryError::MissingConfig(_))
        ));
    }

    #[tokio::test]
    async fn test_driver_events_reach_observer() {
        let dir = TempDir::new().unwrap();
        let script = write_script(
            dir.path(),
            r#"echo '{"event":"started"}'
echo 'garbage'
echo '{"event":"progress","value":{"t":"struct","v":[{"t":"double","v":0.5},{"t":"dict","v":{}}]}}'
echo '{"event":"succeeded","value":{"t":"uint64","v":7}}'"#,
        );
        let manifest = write_manifest(dir.path(), "ok.json", "ok", limits::HOST_MAJOR, &script);
        let device = PluginLoader::new()
            .load(&manifest)
            .unwrap()
            .create(&Configuration::new())
            .unwrap();

        let store = device.template_store().await.unwrap();
        let op = store
            .enroll(&Application::new("app"), &User::new(1000))
            .await
            .unwrap();
        let recorder = RecordingObserver::<Enrollment>::new();
        op.start_with_observer(recorder.clone()).await.unwrap();

        let terminal = recorder.wait_for_terminal(WAIT).await.unwrap();
        assert!(matches!(terminal, Event::Succeeded(id) if id == TemplateId::new(7)));
        assert_eq!(recorder.names(), vec!["started", "progress", "succeeded"]);
    }

    #[tokio::test]
    async fn test_failure_code_is_translated() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), r#"echo '{"event":"failed","code":2}'"#);
        let manifest = write_manifest(dir.path(), "busy.json", "busy", limits::HOST_MAJOR, &script);
        let device = PluginLoader::new()
            .load(&manifest)
            .unwrap()
            .create(&Configuration::new())
            .unwrap();

        let store = device.template_store().await.unwrap();
        let op = store
            .size(&Application::new("app"), &User::new(1000))
            .await
            .unwrap();
        let recorder = RecordingObserver::<SizeQuery>::new();
        op.start_with_observer(recorder.clone()).await.unwrap();

        let terminal = recorder.wait_for_terminal(WAIT).await.unwrap();
        assert!(matches!(terminal, Event::Failed(ref msg) if msg == "sensor busy"));
    }

    #[tokio::test]
    async fn test_silent_exit_fails_operation() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "exit 3");
        let manifest = write_manifest(dir.path(), "quiet.json", "quiet", limits::HOST_MAJOR, &script);
        let device = PluginLoader::new()
            .load(&manifest)
            .unwrap()
            .create(&Configuration::new())
            .unwrap();

        let store = device.template_store().await.unwrap();
        let op = store
            .clear(&Application::new("app"), &User::new(1000))
            .await
            .unwrap();
        let recorder = RecordingObserver::<Clearance>::new();
        op.start_with_observer(recorder.clone()).await.unwrap();

        let terminal = recorder.wait_for_terminal(WAIT).await.unwrap();
        assert!(matches!(terminal, Event::Failed(_)));
    }

    #[tokio::test]
    async fn test_cancel_kills_driver() {
        let dir = TempDir::new().unwrap();
        let script = write_script(dir.path(), "echo '{\"event\":\"started\"}'\nexec sleep 30");
        let manifest = write_manifest(dir.path(), "slow.json", "slow", limits::HOST_MAJOR, &script);
        let device = PluginLoader::new()
            .load(&manifest)
            .unwrap()
            .create(&Configuration::new())
            .unwrap();

        let identifier = device.identifier().await.unwrap();
        let op = identifier
            .identify_user(&Application::new("app"), &Reason::new("unlock"))
            .await
            .unwrap();
        let recorder = RecordingObserver::<Identification>::new();
        op.start_with_observer(recorder.clone()).await.unwrap();
        op.cancel().await.unwrap();

        let terminal = recorder.wait_for_terminal(WAIT).await.unwrap();
        assert!(matches!(terminal, Event::Canceled(_)));
    }

    #[test]
    fn test_hardware_error_codes() {
        assert_eq!(HardwareError::from_code(4), HardwareError::NoMatch);
        assert_eq!(HardwareError::from_code(42).to_string(), "vendor error 42");
    }
}
