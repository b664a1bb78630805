//! Lookup of device descriptors by id

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::constants::devices;

use super::{AndroidDescriptor, DescriptorPtr, DummyDescriptor, PluginLoader};
use super::plugin::GenericPluginDescriptor;

/// Mapping from device id to descriptor.
///
/// An explicit value rather than a process global: whoever builds the
/// service owns the registry and decides what goes in.
#[derive(Default)]
pub struct DeviceRegistry {
    entries: RwLock<HashMap<String, DescriptorPtr>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, returning the one it replaced
    pub fn register(&self, id: impl Into<String>, descriptor: DescriptorPtr) -> Option<DescriptorPtr> {
        let id = id.into();
        debug!("Registering device {}", id);
        self.entries.write().insert(id, descriptor)
    }

    pub fn unregister(&self, id: &str) -> Option<DescriptorPtr> {
        self.entries.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<DescriptorPtr> {
        self.entries.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.read().contains_key(id)
    }

    /// Registered ids in sorted order
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

/// Scoped population of a registry: builtins and discovered plugins are
/// registered on construction and everything is removed again on drop.
pub struct DeviceRegistrar {
    registry: Arc<DeviceRegistry>,
}

impl DeviceRegistrar {
    /// Register the builtin devices plus every verified plugin found in
    /// `plugin_dirs`. Plugins failing verification are logged and skipped.
    pub fn new(registry: Arc<DeviceRegistry>, plugin_dirs: &[PathBuf]) -> Self {
        Self::with_loader(registry, plugin_dirs, &PluginLoader::new())
    }

    pub fn with_loader(
        registry: Arc<DeviceRegistry>,
        plugin_dirs: &[PathBuf],
        loader: &PluginLoader,
    ) -> Self {
        registry.register(devices::DUMMY, Arc::new(DummyDescriptor));
        registry.register(
            devices::PLUGIN,
            Arc::new(GenericPluginDescriptor::new(loader.clone())),
        );
        registry.register(devices::ANDROID, Arc::new(AndroidDescriptor));

        for dir in plugin_dirs {
            let (plugins, failures) = loader.discover(dir);
            for failure in failures {
                warn!("Skipping plugin: {}", failure);
            }
            for plugin in plugins {
                let id = plugin.manifest().id.clone();
                if registry.contains(&id) {
                    warn!("Plugin id {} is already registered, skipping {:?}", id, plugin.path());
                    continue;
                }
                info!("Registered plugin device {} from {:?}", id, plugin.path());
                registry.register(id, Arc::new(plugin));
            }
        }

        info!("Device registry ready: {:?}", registry.ids());
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }
}

impl Drop for DeviceRegistrar {
    fn drop(&mut self) {
        debug!("Clearing device registry");
        self.registry.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Configuration;
    use crate::device::{Descriptor, DevicePtr};
    use crate::error::Result;
    use tempfile::TempDir;

    struct Named(&'static str);

    impl Descriptor for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn author(&self) -> &str {
            "tests"
        }
        fn description(&self) -> &str {
            "test descriptor"
        }
        fn create(&self, _config: &Configuration) -> Result<DevicePtr> {
            Err(crate::error::BiometryError::NotSupported(self.0.into()))
        }
    }

    #[test]
    fn test_register_lookup_unregister() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());

        assert!(registry.register("a", Arc::new(Named("first"))).is_none());
        let replaced = registry.register("a", Arc::new(Named("second")));
        assert_eq!(replaced.map(|d| d.name().to_string()), Some("first".into()));
        assert_eq!(registry.get("a").map(|d| d.name().to_string()), Some("second".into()));

        assert!(registry.unregister("a").is_some());
        assert!(registry.get("a").is_none());
        assert!(registry.unregister("a").is_none());
    }

    #[test]
    fn test_registrar_lifecycle() {
        let registry = Arc::new(DeviceRegistry::new());
        {
            let _registrar = DeviceRegistrar::new(registry.clone(), &[]);
            assert_eq!(registry.ids(), vec!["Dummy", "Plugin", "android"]);
        }
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registrar_tolerates_missing_plugin_dir() {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(DeviceRegistry::new());
        let _registrar = DeviceRegistrar::new(registry.clone(), &[dir.path().join("absent")]);
        assert_eq!(registry.len(), 3);
    }
}
