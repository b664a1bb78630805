//! Entry point of the object model

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

use crate::data::DefaultDeviceConfig;
use crate::device::{DeviceRegistry, DevicePtr, DispatchingDevice};
use crate::error::{BiometryError, Result};
use crate::runtime::DispatcherPtr;

/// Hands out the device clients talk to
#[async_trait]
pub trait Service: Send + Sync {
    async fn default_device(&self) -> Result<DevicePtr>;
}

/// Service creating its default device on first use from the registry.
///
/// The device is created once, wrapped so all of its hardware access runs on
/// `dispatcher`, and reused for the life of the service. A failed creation is
/// not cached; the next call tries again.
pub struct DefaultService {
    registry: Arc<DeviceRegistry>,
    config: DefaultDeviceConfig,
    dispatcher: DispatcherPtr,
    device: OnceCell<DevicePtr>,
}

impl DefaultService {
    pub fn new(
        registry: Arc<DeviceRegistry>,
        config: DefaultDeviceConfig,
        dispatcher: DispatcherPtr,
    ) -> Self {
        Self {
            registry,
            config,
            dispatcher,
            device: OnceCell::new(),
        }
    }

    fn create(&self) -> Result<DevicePtr> {
        let id = &self.config.id;
        let descriptor = self
            .registry
            .get(id)
            .ok_or_else(|| BiometryError::UnknownDevice(id.clone()))?;

        let device = descriptor.create(&self.config.config).map_err(|e| {
            BiometryError::configuration_caused_by(format!("Could not create device {}", id), e)
        })?;
        info!("Created default device {} ({})", id, descriptor.description());
        Ok(Arc::new(DispatchingDevice::new(device, self.dispatcher.clone())))
    }
}

#[async_trait]
impl Service for DefaultService {
    async fn default_device(&self) -> Result<DevicePtr> {
        self.device
            .get_or_try_init(|| async { self.create() })
            .await
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::devices;
    use crate::data::{Application, Configuration, User};
    use crate::device::{Descriptor, DummyDescriptor};
    use crate::operation::{Event, SizeQuery};
    use crate::runtime::Strand;
    use crate::testing::RecordingObserver;
    use std::error::Error as _;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(AtomicUsize);

    impl Descriptor for Counting {
        fn name(&self) -> &str {
            "Counting"
        }

        fn author(&self) -> &str {
            "tests"
        }

        fn description(&self) -> &str {
            "Dummy device counting its creations"
        }

        fn create(&self, config: &Configuration) -> Result<DevicePtr> {
            self.0.fetch_add(1, Ordering::SeqCst);
            DummyDescriptor.create(config)
        }
    }

    fn service(registry: Arc<DeviceRegistry>, id: &str) -> DefaultService {
        let config = DefaultDeviceConfig {
            id: id.to_string(),
            config: Configuration::new(),
        };
        DefaultService::new(registry, config, Strand::current().unwrap())
    }

    #[tokio::test]
    async fn test_default_device_is_created_once() {
        let registry = Arc::new(DeviceRegistry::new());
        let descriptor = Arc::new(Counting(AtomicUsize::new(0)));
        registry.register("Counting", descriptor.clone());
        let service = service(registry, "Counting");

        let (a, b) = tokio::join!(service.default_device(), service.default_device());
        assert!(Arc::ptr_eq(&a.unwrap(), &b.unwrap()));
        assert_eq!(descriptor.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let service = service(Arc::new(DeviceRegistry::new()), "Nope");
        let err = service.default_device().await.err().unwrap();
        assert!(matches!(err, BiometryError::UnknownDevice(id) if id == "Nope"));
    }

    #[tokio::test]
    async fn test_creation_failure_is_a_configuration_error() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.register(devices::ANDROID, Arc::new(crate::device::AndroidDescriptor));
        let service = service(registry, devices::ANDROID);

        let err = service.default_device().await.err().unwrap();
        assert!(matches!(err, BiometryError::Configuration { .. }));
        assert!(err.source().is_some());
    }

    #[tokio::test]
    async fn test_device_operations_work_through_dispatcher() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.register(devices::DUMMY, Arc::new(DummyDescriptor));
        let service = service(registry, devices::DUMMY);

        let device = service.default_device().await.unwrap();
        let size = device
            .template_store()
            .await
            .unwrap()
            .size(&Application::system(), &User::new(1000))
            .await
            .unwrap();
        let recorder = RecordingObserver::<SizeQuery>::new();
        size.start_with_observer(recorder.clone()).await.unwrap();
        let terminal = recorder
            .wait_for_terminal(std::time::Duration::from_secs(5))
            .await
            .unwrap();
        assert!(matches!(terminal, Event::Succeeded(0)));
    }
}
