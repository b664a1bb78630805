//! In-memory device for development and tests
//!
//! Templates are kept per (application, user) and optionally persisted to a
//! JSON file named by the `storage` configuration key. Operations complete
//! synchronously inside `start_with_observer`.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::{config::STORAGE_KEY, dummy};
use crate::data::{Application, Configuration, Percent, Progress, Reason, TemplateId, User, Void};
use crate::error::{BiometryError, Result};
use crate::operation::{
    Clearance, Enrollment, Event, Identification, List, ObserverPtr, Operation, OperationKind,
    OperationPtr, Removal, SizeQuery, Verification,
};

use super::{Descriptor, Device, DevicePtr, Identifier, TemplateStore, Verifier};

const STORAGE_VERSION: u32 = 1;

// ============================================================================
// Storage
// ============================================================================

type Scope = (Application, User);

#[derive(Debug, Default)]
struct Templates {
    next_id: u64,
    scopes: BTreeMap<Scope, BTreeSet<TemplateId>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredScope {
    application: Application,
    user: User,
    templates: Vec<TemplateId>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredTemplates {
    version: u32,
    next_id: u64,
    scopes: Vec<StoredScope>,
}

impl From<&Templates> for StoredTemplates {
    fn from(templates: &Templates) -> Self {
        Self {
            version: STORAGE_VERSION,
            next_id: templates.next_id,
            scopes: templates
                .scopes
                .iter()
                .filter(|(_, ids)| !ids.is_empty())
                .map(|((application, user), ids)| StoredScope {
                    application: application.clone(),
                    user: *user,
                    templates: ids.iter().copied().collect(),
                })
                .collect(),
        }
    }
}

impl From<StoredTemplates> for Templates {
    fn from(stored: StoredTemplates) -> Self {
        let mut scopes: BTreeMap<Scope, BTreeSet<TemplateId>> = BTreeMap::new();
        let mut highest = 0;
        for scope in stored.scopes {
            for id in &scope.templates {
                highest = highest.max(id.value());
            }
            scopes
                .entry((scope.application, scope.user))
                .or_default()
                .extend(scope.templates);
        }
        Self {
            // Never reuse an id even if the counter in the file is stale
            next_id: stored.next_id.max(highest),
            scopes,
        }
    }
}

struct TemplateStorage {
    templates: Mutex<Templates>,
    path: Option<PathBuf>,
}

impl TemplateStorage {
    fn open(path: Option<PathBuf>) -> Result<Self> {
        let templates = match &path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|e| BiometryError::FileRead {
                    path: path.clone(),
                    source: e,
                })?;
                let stored: StoredTemplates = serde_json::from_str(&contents)?;
                let templates = Templates::from(stored);
                info!(
                    "Loaded {} template scopes from {:?}",
                    templates.scopes.len(),
                    path
                );
                templates
            }
            _ => Templates::default(),
        };

        Ok(Self {
            templates: Mutex::new(templates),
            path,
        })
    }

    /// Atomic write: temp file then rename
    fn persist(path: &Path, stored: &StoredTemplates) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(stored)?;
        let temp_path = path.with_extension("json.tmp");

        let mut file = fs::File::create(&temp_path).map_err(|e| BiometryError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;
        file.write_all(json.as_bytes())
            .map_err(|e| BiometryError::FileWrite {
                path: temp_path.clone(),
                source: e,
            })?;
        file.sync_all().map_err(|e| BiometryError::FileWrite {
            path: temp_path.clone(),
            source: e,
        })?;

        fs::rename(&temp_path, path).map_err(|e| BiometryError::FileWrite {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("Persisted templates to {:?}", path);
        Ok(())
    }

    /// Apply a mutation and persist the result. Nothing changes in memory if
    /// the file cannot be written.
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Templates) -> std::result::Result<T, String>,
    ) -> std::result::Result<T, String> {
        let mut templates = self.templates.lock();
        let backup_next = templates.next_id;
        let backup_scopes = self.path.as_ref().map(|_| templates.scopes.clone());

        let value = f(&mut *templates)?;

        if let Some(path) = &self.path {
            if let Err(e) = Self::persist(path, &StoredTemplates::from(&*templates)) {
                warn!("Failed to persist templates: {}", e);
                templates.next_id = backup_next;
                if let Some(scopes) = backup_scopes {
                    templates.scopes = scopes;
                }
                return Err(format!("failed to persist templates: {}", e));
            }
        }
        Ok(value)
    }

    fn ids(&self, scope: &Scope) -> Vec<TemplateId> {
        self.templates
            .lock()
            .scopes
            .get(scope)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn enroll(&self, scope: Scope) -> std::result::Result<TemplateId, String> {
        self.mutate(|templates| {
            templates.next_id += 1;
            let id = TemplateId::new(templates.next_id);
            templates.scopes.entry(scope).or_default().insert(id);
            Ok(id)
        })
    }

    fn remove(&self, scope: &Scope, id: TemplateId) -> std::result::Result<TemplateId, String> {
        self.mutate(|templates| {
            let removed = templates
                .scopes
                .get_mut(scope)
                .map_or(false, |ids| ids.remove(&id));
            if removed {
                Ok(id)
            } else {
                Err(format!("no template {} for user {}", id, scope.1))
            }
        })
    }

    fn clear(&self, scope: &Scope) -> std::result::Result<Void, String> {
        self.mutate(|templates| {
            templates.scopes.remove(scope);
            Ok(Void)
        })
    }

    /// First user, in uid order, holding templates for `app`
    fn identify(&self, app: &Application) -> Option<User> {
        self.templates
            .lock()
            .scopes
            .iter()
            .find(|((a, _), ids)| a == app && !ids.is_empty())
            .map(|((_, user), _)| *user)
    }
}

// ============================================================================
// Operations
// ============================================================================

type Action<K> = Box<
    dyn FnOnce() -> std::result::Result<<K as OperationKind>::Result, <K as OperationKind>::Error>
        + Send,
>;

/// Deferred action run to completion on start
struct DummyOperation<K: OperationKind> {
    progress: Vec<K::Progress>,
    action: Mutex<Option<Action<K>>>,
}

impl<K: OperationKind> DummyOperation<K> {
    fn new(
        progress: Vec<K::Progress>,
        action: impl FnOnce() -> std::result::Result<K::Result, K::Error> + Send + 'static,
    ) -> OperationPtr<K> {
        Arc::new(Self {
            progress,
            action: Mutex::new(Some(Box::new(action))),
        })
    }
}

#[async_trait]
impl<K: OperationKind> Operation<K> for DummyOperation<K> {
    async fn start_with_observer(&self, observer: ObserverPtr<K>) -> Result<()> {
        let action = self
            .action
            .lock()
            .take()
            .ok_or(BiometryError::AlreadyStarted)?;

        observer.on_event(Event::Started);
        for progress in &self.progress {
            observer.on_event(Event::Progress(progress.clone()));
        }
        match action() {
            Ok(result) => observer.on_event(Event::Succeeded(result)),
            Err(error) => observer.on_event(Event::Failed(error)),
        }
        Ok(())
    }

    async fn cancel(&self) -> Result<()> {
        // Runs to completion inside start; there is never anything to cancel
        Ok(())
    }
}

fn enroll_progress() -> Vec<Progress> {
    dummy::ENROLL_PROGRESS
        .iter()
        .filter_map(|v| Percent::from_raw_value(*v).ok())
        .map(Progress::new)
        .collect()
}

// ============================================================================
// Device
// ============================================================================

struct DummyCapabilities {
    storage: Arc<TemplateStorage>,
}

#[async_trait]
impl TemplateStore for DummyCapabilities {
    async fn size(&self, app: &Application, user: &User) -> Result<OperationPtr<SizeQuery>> {
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<SizeQuery>::new(Vec::new(), move || {
            Ok(storage.ids(&scope).len() as u32)
        }))
    }

    async fn list(&self, app: &Application, user: &User) -> Result<OperationPtr<List>> {
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<List>::new(Vec::new(), move || {
            Ok(storage.ids(&scope))
        }))
    }

    async fn enroll(&self, app: &Application, user: &User) -> Result<OperationPtr<Enrollment>> {
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<Enrollment>::new(enroll_progress(), move || {
            storage.enroll(scope)
        }))
    }

    async fn remove(
        &self,
        app: &Application,
        user: &User,
        id: TemplateId,
    ) -> Result<OperationPtr<Removal>> {
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<Removal>::new(Vec::new(), move || {
            storage.remove(&scope, id)
        }))
    }

    async fn clear(&self, app: &Application, user: &User) -> Result<OperationPtr<Clearance>> {
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<Clearance>::new(Vec::new(), move || {
            storage.clear(&scope)
        }))
    }
}

#[async_trait]
impl Identifier for DummyCapabilities {
    async fn identify_user(
        &self,
        app: &Application,
        reason: &Reason,
    ) -> Result<OperationPtr<Identification>> {
        debug!("Identification requested by {}: {}", app, reason);
        let storage = self.storage.clone();
        let app = app.clone();
        Ok(DummyOperation::<Identification>::new(enroll_progress(), move || {
            storage
                .identify(&app)
                .ok_or_else(|| dummy::NO_MATCH.to_string())
        }))
    }
}

#[async_trait]
impl Verifier for DummyCapabilities {
    async fn verify_user(
        &self,
        app: &Application,
        user: &User,
        reason: &Reason,
    ) -> Result<OperationPtr<Verification>> {
        debug!("Verification of {} requested by {}: {}", user, app, reason);
        let storage = self.storage.clone();
        let scope = (app.clone(), *user);
        Ok(DummyOperation::<Verification>::new(enroll_progress(), move || {
            Ok(!storage.ids(&scope).is_empty())
        }))
    }
}

/// Device answering from an in-memory template store
pub struct DummyDevice {
    capabilities: Arc<DummyCapabilities>,
}

impl DummyDevice {
    /// Create, loading previously persisted templates from `storage` if given
    pub fn new(storage: Option<PathBuf>) -> Result<Self> {
        Ok(Self {
            capabilities: Arc::new(DummyCapabilities {
                storage: Arc::new(TemplateStorage::open(storage)?),
            }),
        })
    }
}

#[async_trait]
impl Device for DummyDevice {
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

#[derive(Debug, Default)]
pub struct DummyDescriptor;

impl Descriptor for DummyDescriptor {
    fn name(&self) -> &str {
        "Dummy"
    }

    fn author(&self) -> &str {
        "biometryd"
    }

    fn description(&self) -> &str {
        "In-memory device for development and testing"
    }

    fn create(&self, config: &Configuration) -> Result<DevicePtr> {
        let device = DummyDevice::new(config.get_path(STORAGE_KEY)).map_err(|e| {
            BiometryError::configuration_caused_by("Dummy device storage is unusable", e)
        })?;
        Ok(Arc::new(device))
    }
}
