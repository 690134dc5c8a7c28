//! Type-keyed registry of device counterparts.
//!
//! A backend registers a creator under a host operator's type tag; generic
//! code holding any `&dyn LinearOperator` can then obtain its device
//! counterpart without knowing the concrete type.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use log::debug;

use crate::error::{OperatorError, OperatorResult};
use crate::linalg::LinearOperator;

/// Builds the device counterpart of a host operator.
pub type DeviceCreator =
    Arc<dyn Fn(&dyn LinearOperator) -> OperatorResult<Arc<dyn LinearOperator>> + Send + Sync>;

struct DeviceRegistry {
    creators: RwLock<HashMap<String, DeviceCreator>>,
}

impl DeviceRegistry {
    fn new() -> Self {
        Self {
            creators: RwLock::new(HashMap::new()),
        }
    }

    fn register(&self, type_tag: &str, creator: DeviceCreator) {
        self.creators
            .write()
            .expect("device registry poisoned")
            .insert(type_tag.to_string(), creator);
    }

    fn get(&self, type_tag: &str) -> Option<DeviceCreator> {
        self.creators
            .read()
            .expect("device registry poisoned")
            .get(type_tag)
            .cloned()
    }

    fn list(&self) -> Vec<String> {
        let mut tags: Vec<String> = self
            .creators
            .read()
            .expect("device registry poisoned")
            .keys()
            .cloned()
            .collect();
        tags.sort();
        tags
    }
}

static GLOBAL_REGISTRY: OnceLock<DeviceRegistry> = OnceLock::new();

fn registry() -> &'static DeviceRegistry {
    GLOBAL_REGISTRY.get_or_init(DeviceRegistry::new)
}

/// Registers `creator` for operators reporting `type_tag`, replacing any
/// previous creator for that tag.
pub fn register_device_creator<F>(type_tag: &str, creator: F)
where
    F: Fn(&dyn LinearOperator) -> OperatorResult<Arc<dyn LinearOperator>> + Send + Sync + 'static,
{
    debug!("registering device creator for '{type_tag}'");
    registry().register(type_tag, Arc::new(creator));
}

pub fn has_device_creator(type_tag: &str) -> bool {
    registry().get(type_tag).is_some()
}

pub fn list_device_creators() -> Vec<String> {
    registry().list()
}

/// Creates the device counterpart of `op`. The creator runs without the
/// registry lock held.
pub fn create_device_operator(op: &dyn LinearOperator) -> OperatorResult<Arc<dyn LinearOperator>> {
    let type_tag = op.type_tag();
    let creator = registry()
        .get(type_tag)
        .ok_or_else(|| OperatorError::NoDeviceCounterpart {
            type_tag: type_tag.to_string(),
        })?;
    creator(op)
}
