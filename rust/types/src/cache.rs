use crate::model::{Instance, InstanceCount, Service};
use std::fmt::Debug;

/// Read-only view of the discovery cache.
pub trait CacheManager: Send + Sync + Debug {
    /// Calls `f` for every cached service until it returns `false`.
    fn iterate_services(&self, f: &mut dyn FnMut(&Service) -> bool);

    fn instances_count_by_service_id(&self, service_id: &str) -> InstanceCount;

    fn get_service_by_name(&self, name: &str, namespace: &str) -> Option<Service>;

    fn instances_by_service_id(&self, service_id: &str) -> Vec<Instance>;
}
