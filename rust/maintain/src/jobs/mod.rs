pub mod clean_config_release_history;
pub mod clean_deleted_resources;
pub mod clean_deleted_rows;
pub mod delete_empty_service;
pub mod delete_unhealthy_instance;
pub mod resource;

use crate::registry::JobRegistry;
use chrono::{DateTime, Utc};
use clean_config_release_history::{CleanConfigReleaseHistoryJob, CLEAN_CONFIG_RELEASE_HISTORY};
use clean_deleted_resources::{CleanDeletedResourcesJob, CLEAN_DELETED_RESOURCES};
use clean_deleted_rows::{CleanDeletedRowsJob, CLEAN_DELETED_CLIENTS, CLEAN_DELETED_INSTANCES};
use delete_empty_service::{DeleteEmptyServiceJob, DELETE_EMPTY_SERVICE};
use delete_unhealthy_instance::{DeleteUnhealthyInstanceJob, DELETE_UNHEALTHY_INSTANCE};
use polaris_config::registry::{Registry, RegistryError};
use polaris_types::{CacheHandle, CacheManager, DiscoveryHandle, DiscoveryServer, Store, StoreHandle};
use std::sync::Arc;
use std::time::Duration;

/// Tick interval of the jobs that do not configure their own.
pub(crate) const DEFAULT_JOB_INTERVAL: Duration = Duration::from_secs(60);

/// Collaborators the built-in jobs are bound to.
#[derive(Clone, Debug)]
pub struct JobDeps {
    pub store: Arc<dyn Store>,
    pub discovery: Arc<dyn DiscoveryServer>,
    pub cache: Arc<dyn CacheManager>,
}

impl JobDeps {
    pub fn from_registry(registry: &Registry) -> Result<Self, RegistryError> {
        let StoreHandle(store) = registry.get::<StoreHandle>()?;
        let DiscoveryHandle(discovery) = registry.get::<DiscoveryHandle>()?;
        let CacheHandle(cache) = registry.get::<CacheHandle>()?;
        Ok(Self {
            store,
            discovery,
            cache,
        })
    }
}

pub fn register_builtin_jobs(registry: &mut JobRegistry, deps: &JobDeps) {
    let store = deps.store.clone();
    registry.register(CLEAN_DELETED_INSTANCES, move || {
        Box::new(CleanDeletedRowsJob::instances(store.clone()))
    });

    let store = deps.store.clone();
    registry.register(CLEAN_DELETED_CLIENTS, move || {
        Box::new(CleanDeletedRowsJob::clients(store.clone()))
    });

    let store = deps.store.clone();
    registry.register(CLEAN_DELETED_RESOURCES, move || {
        Box::new(CleanDeletedResourcesJob::new(store.clone()))
    });

    let store = deps.store.clone();
    registry.register(CLEAN_CONFIG_RELEASE_HISTORY, move || {
        Box::new(CleanConfigReleaseHistoryJob::new(store.clone()))
    });

    let (store, discovery) = (deps.store.clone(), deps.discovery.clone());
    registry.register(DELETE_UNHEALTHY_INSTANCE, move || {
        Box::new(DeleteUnhealthyInstanceJob::new(store.clone(), discovery.clone()))
    });

    let (cache, discovery) = (deps.cache.clone(), deps.discovery.clone());
    registry.register(DELETE_EMPTY_SERVICE, move || {
        Box::new(DeleteEmptyServiceJob::new(cache.clone(), discovery.clone()))
    });
}

/// `now - age`, saturating at the earliest representable instant.
pub(crate) fn cutoff_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use polaris_types::in_memory::InMemoryControlPlane;

    #[test]
    fn test_builtin_catalog() {
        let plane = Arc::new(InMemoryControlPlane::new());
        let deps = JobDeps {
            store: plane.clone(),
            discovery: plane.clone(),
            cache: plane,
        };
        let mut registry = JobRegistry::new();
        register_builtin_jobs(&mut registry, &deps);
        assert_eq!(
            registry.names(),
            vec![
                "clean_config_release_history",
                "clean_deleted_clients",
                "clean_deleted_instances",
                "clean_deleted_resources",
                "delete_empty_service",
                "delete_unhealthy_instance",
            ]
        );
        assert!(registry.contains("delete_empty_autocreated_service"));
    }

    #[test]
    fn test_cutoff_before_saturates() {
        let now = Utc::now();
        assert_eq!(
            cutoff_before(now, Duration::from_secs(60)),
            now - chrono::Duration::seconds(60)
        );
        assert_eq!(
            cutoff_before(now, Duration::from_secs(u64::MAX)),
            DateTime::<Utc>::MIN_UTC
        );
    }
}
