//! Placeholder for the Android HAL bridge

use crate::data::Configuration;
use crate::error::{BiometryError, Result};

use super::{Descriptor, DevicePtr};

/// Registered so configurations naming it fail with a clear error rather
/// than `UnknownDevice` on hosts without the HAL bridge
#[derive(Debug, Default)]
pub struct AndroidDescriptor;

impl Descriptor for AndroidDescriptor {
    fn name(&self) -> &str {
        "android"
    }

    fn author(&self) -> &str {
        "biometryd"
    }

    fn description(&self) -> &str {
        "Fingerprint reader behind the Android HAL"
    }

    fn create(&self, _config: &Configuration) -> Result<DevicePtr> {
        Err(BiometryError::NotSupported(
            "the Android HAL bridge is not available on this host".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_not_supported() {
        let result = AndroidDescriptor.create(&Configuration::new());
        assert!(matches!(result, Err(BiometryError::NotSupported(_))));
    }
}
