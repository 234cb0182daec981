use parking_lot::Mutex;
use polaris_error::{ErrorCodes, PolarisError};
use std::{
    any::{type_name, Any, TypeId},
    collections::HashMap,
    sync::Arc,
};
use thiserror::Error;

/// Marker for dependency handles that can be placed in a [`Registry`].
///
/// Handles are cloned on every lookup, so implementors should be cheap,
/// shared references (an `Arc` around the real collaborator).
pub trait Injectable: Any + Send + Sync + Clone {}

/// Service locator holding the dependency handles (storage, discovery server,
/// read cache) that maintenance components bind at construction time.
#[derive(Default, Clone)]
pub struct Registry {
    storage: Arc<Mutex<HashMap<TypeId, Box<dyn Any + Send + Sync>>>>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Dependency [{0}] was not registered")]
    TypeNotFound(String),
}

impl PolarisError for RegistryError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::FailedPrecondition
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Injectable>(&self, value: T) {
        self.storage
            .lock()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T: Injectable>(&self) -> Result<T, RegistryError> {
        let storage = self.storage.lock();
        storage
            .get(&TypeId::of::<T>())
            .and_then(|boxed| boxed.downcast_ref::<T>())
            .cloned()
            .ok_or_else(|| RegistryError::TypeNotFound(type_name::<T>().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Default)]
    struct CounterHandle {
        inner: Arc<AtomicUsize>,
    }

    impl Injectable for CounterHandle {}

    #[derive(Clone)]
    struct Unregistered;

    impl Injectable for Unregistered {}

    #[test]
    fn test_registry_hands_out_shared_handles() {
        let registry = Registry::new();
        registry.register(CounterHandle::default());

        let first = registry.get::<CounterHandle>().unwrap();
        first.inner.fetch_add(1, Ordering::SeqCst);

        let second = registry.get::<CounterHandle>().unwrap();
        assert_eq!(second.inner.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_dependency_is_an_error() {
        let registry = Registry::new();
        let err = registry.get::<Unregistered>().err().unwrap();
        assert_eq!(err.code(), ErrorCodes::FailedPrecondition);
        assert!(err.to_string().contains("Unregistered"));
    }
}
