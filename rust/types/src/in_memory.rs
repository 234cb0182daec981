// In-memory stand-in for the storage layer, the discovery server and the
// read cache. All three views share one state so that a delete issued through
// the discovery API is visible to the next cache read, the way the real
// control plane behaves once its cache catches up.

use crate::{
    BatchWriteResponse, CacheManager, DiscoveryServer, Instance, InstanceCount, RequestContext,
    ResponseCode, RuleKind, Service, Store, StoreError, User, WriteResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SoftDeleteTable {
    Clients,
    Instances,
    Services,
    Rules(RuleKind),
    ConfigFiles,
    ConfigReleaseHistory,
}

#[derive(Debug, Default)]
struct State {
    soft_deleted: HashMap<SoftDeleteTable, Vec<DateTime<Utc>>>,
    clean_calls: HashMap<SoftDeleteTable, Vec<u32>>,
    failing_tables: HashSet<SoftDeleteTable>,
    leader: bool,
    fail_election: bool,
    elections: Vec<String>,
    is_leader_calls: usize,
    users: Vec<User>,
    services: HashMap<String, Service>,
    instances: HashMap<String, Instance>,
    deleted_services: Vec<String>,
    deleted_instances: Vec<String>,
    delete_instance_calls: usize,
    delete_service_calls: usize,
    fail_deletes: bool,
    // Still visible to reads, already removed as far as writes are concerned.
    vanished: HashSet<String>,
    write_contexts: Vec<RequestContext>,
}

/// Cloning shares the underlying state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryControlPlane {
    state: Arc<Mutex<State>>,
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_leader(&self, leader: bool) {
        self.state.lock().leader = leader;
    }

    pub fn set_fail_election(&self, fail: bool) {
        self.state.lock().fail_election = fail;
    }

    pub fn elections(&self) -> Vec<String> {
        self.state.lock().elections.clone()
    }

    pub fn is_leader_calls(&self) -> usize {
        self.state.lock().is_leader_calls
    }

    pub fn add_user(&self, user: User) {
        self.state.lock().users.push(user);
    }

    pub fn add_soft_deleted(&self, table: SoftDeleteTable, count: usize, at: DateTime<Utc>) {
        self.state
            .lock()
            .soft_deleted
            .entry(table)
            .or_default()
            .extend(std::iter::repeat(at).take(count));
    }

    pub fn remaining_soft_deleted(&self, table: SoftDeleteTable) -> usize {
        self.state
            .lock()
            .soft_deleted
            .get(&table)
            .map(|rows| rows.len())
            .unwrap_or(0)
    }

    /// Rows removed by each clean call issued against `table`, in call order.
    pub fn clean_calls(&self, table: SoftDeleteTable) -> Vec<u32> {
        self.state
            .lock()
            .clean_calls
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn fail_cleans(&self, table: SoftDeleteTable, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_tables.insert(table);
        } else {
            state.failing_tables.remove(&table);
        }
    }

    pub fn add_service(&self, service: Service) {
        self.state
            .lock()
            .services
            .insert(service.id.clone(), service);
    }

    pub fn add_instance(&self, instance: Instance) {
        self.state
            .lock()
            .instances
            .insert(instance.id.clone(), instance);
    }

    pub fn remove_instance(&self, id: &str) {
        self.state.lock().instances.remove(id);
    }

    pub fn set_instance_health(&self, id: &str, healthy: bool) {
        if let Some(ins) = self.state.lock().instances.get_mut(id) {
            ins.healthy = healthy;
        }
    }

    pub fn has_service(&self, id: &str) -> bool {
        self.state.lock().services.contains_key(id)
    }

    pub fn has_instance(&self, id: &str) -> bool {
        self.state.lock().instances.contains_key(id)
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().fail_deletes = fail;
    }

    /// Simulates another node deleting `id` first: reads keep returning the
    /// service or instance until a delete for it reports it as not found.
    pub fn vanish(&self, id: &str) {
        self.state.lock().vanished.insert(id.to_string());
    }

    pub fn deleted_services(&self) -> Vec<String> {
        self.state.lock().deleted_services.clone()
    }

    pub fn deleted_instances(&self) -> Vec<String> {
        self.state.lock().deleted_instances.clone()
    }

    pub fn delete_instance_calls(&self) -> usize {
        self.state.lock().delete_instance_calls
    }

    pub fn delete_service_calls(&self) -> usize {
        self.state.lock().delete_service_calls
    }

    pub fn write_contexts(&self) -> Vec<RequestContext> {
        self.state.lock().write_contexts.clone()
    }

    fn batch_clean(
        &self,
        table: SoftDeleteTable,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        let mut state = self.state.lock();
        if state.failing_tables.contains(&table) {
            state.clean_calls.entry(table).or_default().push(0);
            return Err(StoreError::Unavailable(format!("{:?} is unavailable", table)));
        }
        let rows = state.soft_deleted.entry(table).or_default();
        let mut removed = 0u32;
        rows.retain(|at| {
            if removed < batch_size && *at < cutoff {
                removed += 1;
                false
            } else {
                true
            }
        });
        state.clean_calls.entry(table).or_default().push(removed);
        Ok(removed)
    }
}

fn service_owns(service: &Service, instance: &Instance) -> bool {
    instance.service == service.name && instance.namespace == service.namespace
}

#[async_trait]
impl Store for InMemoryControlPlane {
    async fn batch_clean_deleted_clients(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::Clients, cutoff, batch_size)
    }

    async fn batch_clean_deleted_instances(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::Instances, cutoff, batch_size)
    }

    async fn batch_clean_deleted_services(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::Services, cutoff, batch_size)
    }

    async fn batch_clean_deleted_rules(
        &self,
        kind: RuleKind,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::Rules(kind), cutoff, batch_size)
    }

    async fn batch_clean_deleted_config_files(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::ConfigFiles, cutoff, batch_size)
    }

    async fn clean_config_file_release_history(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        self.batch_clean(SoftDeleteTable::ConfigReleaseHistory, cutoff, batch_size)
    }

    async fn get_unhealthy_instances(
        &self,
        timeout: Duration,
        limit: u32,
    ) -> Result<Vec<String>, StoreError> {
        let timeout = chrono::Duration::from_std(timeout)
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let cutoff = Utc::now() - timeout;
        let state = self.state.lock();
        let mut ids: Vec<String> = state
            .instances
            .values()
            .filter(|ins| !ins.healthy && ins.mtime < cutoff)
            .map(|ins| ins.id.clone())
            .collect();
        ids.sort();
        ids.truncate(limit as usize);
        Ok(ids)
    }

    async fn start_leader_election(&self, key: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.fail_election {
            return Err(StoreError::Unavailable("election backend down".to_string()));
        }
        state.elections.push(key.to_string());
        Ok(())
    }

    async fn is_leader(&self, key: &str) -> bool {
        let mut state = self.state.lock();
        state.is_leader_calls += 1;
        state.leader && state.elections.iter().any(|k| k == key)
    }

    async fn get_user_by_name(&self, name: &str, owner: &str) -> Result<Option<User>, StoreError> {
        Ok(self
            .state
            .lock()
            .users
            .iter()
            .find(|u| u.name == name && (owner.is_empty() || u.owner == owner))
            .cloned())
    }
}

#[async_trait]
impl DiscoveryServer for InMemoryControlPlane {
    async fn delete_instances(
        &self,
        ctx: &RequestContext,
        instances: Vec<Instance>,
    ) -> BatchWriteResponse {
        let mut state = self.state.lock();
        state.delete_instance_calls += 1;
        state.write_contexts.push(ctx.clone());
        if state.fail_deletes {
            return BatchWriteResponse::failed(ResponseCode::StoreLayerException, "store down");
        }
        let state = &mut *state;
        let responses = instances
            .into_iter()
            .map(|ins| match state.instances.remove(&ins.id) {
                Some(_) if state.vanished.remove(&ins.id) => {
                    WriteResponse::new(ResponseCode::NotFoundInstance, ins.id)
                }
                Some(_) => {
                    state.deleted_instances.push(ins.id.clone());
                    WriteResponse::new(ResponseCode::ExecuteSuccess, ins.id)
                }
                None => WriteResponse::new(ResponseCode::NotFoundInstance, ins.id),
            })
            .collect();
        BatchWriteResponse::from_items(responses)
    }

    async fn delete_services(
        &self,
        ctx: &RequestContext,
        services: Vec<Service>,
    ) -> BatchWriteResponse {
        let mut state = self.state.lock();
        state.delete_service_calls += 1;
        state.write_contexts.push(ctx.clone());
        if state.fail_deletes {
            return BatchWriteResponse::failed(ResponseCode::StoreLayerException, "store down");
        }
        let state = &mut *state;
        let mut responses = Vec::with_capacity(services.len());
        for svc in services {
            if state.vanished.remove(&svc.id) {
                state.services.remove(&svc.id);
                responses.push(WriteResponse::new(ResponseCode::NotFoundService, svc.id));
                continue;
            }
            let has_instances = state
                .services
                .get(&svc.id)
                .map(|existing| state.instances.values().any(|i| service_owns(existing, i)));
            let code = match has_instances {
                None => ResponseCode::NotFoundService,
                Some(true) => ResponseCode::ServiceExistedInstances,
                Some(false) => {
                    state.services.remove(&svc.id);
                    state.deleted_services.push(svc.id.clone());
                    ResponseCode::ExecuteSuccess
                }
            };
            responses.push(WriteResponse::new(code, svc.id));
        }
        BatchWriteResponse::from_items(responses)
    }
}

impl CacheManager for InMemoryControlPlane {
    fn iterate_services(&self, f: &mut dyn FnMut(&Service) -> bool) {
        let mut services: Vec<Service> = self.state.lock().services.values().cloned().collect();
        services.sort_by(|a, b| a.id.cmp(&b.id));
        for svc in &services {
            if !f(svc) {
                break;
            }
        }
    }

    fn instances_count_by_service_id(&self, service_id: &str) -> InstanceCount {
        let state = self.state.lock();
        let Some(service) = state.services.get(service_id) else {
            return InstanceCount::default();
        };
        state
            .instances
            .values()
            .filter(|ins| service_owns(service, ins))
            .fold(InstanceCount::default(), |mut count, ins| {
                count.total += 1;
                if ins.healthy {
                    count.healthy += 1;
                }
                count
            })
    }

    fn get_service_by_name(&self, name: &str, namespace: &str) -> Option<Service> {
        self.state
            .lock()
            .services
            .values()
            .find(|s| s.name == name && s.namespace == namespace)
            .cloned()
    }

    fn instances_by_service_id(&self, service_id: &str) -> Vec<Instance> {
        let state = self.state.lock();
        let Some(service) = state.services.get(service_id) else {
            return vec![];
        };
        let mut instances: Vec<Instance> = state
            .instances
            .values()
            .filter(|ins| service_owns(service, ins))
            .cloned()
            .collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        instances
    }
}

/// A healthy, non-isolated instance of `service` listening on `host:port`.
pub fn serving_instance(id: &str, service: &Service, host: &str, port: u32) -> Instance {
    Instance {
        id: id.to_string(),
        service: service.name.clone(),
        namespace: service.namespace.clone(),
        host: host.to_string(),
        port,
        weight: 100,
        healthy: true,
        isolate: false,
        mtime: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext {
            operator: "test".to_string(),
            token: "t".to_string(),
        }
    }

    #[tokio::test]
    async fn test_batch_clean_respects_cutoff_and_batch() {
        let plane = InMemoryControlPlane::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        plane.add_soft_deleted(SoftDeleteTable::Clients, 5, old);
        plane.add_soft_deleted(SoftDeleteTable::Clients, 2, Utc::now());

        let cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(plane.batch_clean_deleted_clients(cutoff, 3).await.unwrap(), 3);
        assert_eq!(plane.batch_clean_deleted_clients(cutoff, 3).await.unwrap(), 2);
        assert_eq!(plane.batch_clean_deleted_clients(cutoff, 3).await.unwrap(), 0);
        assert_eq!(plane.remaining_soft_deleted(SoftDeleteTable::Clients), 2);
        assert_eq!(plane.clean_calls(SoftDeleteTable::Clients), vec![3, 2, 0]);
    }

    #[tokio::test]
    async fn test_delete_service_refuses_when_instances_exist() {
        let plane = InMemoryControlPlane::new();
        let svc = Service::new("s1", "orders", "default", Utc::now());
        plane.add_service(svc.clone());
        plane.add_instance(serving_instance("i1", &svc, "10.0.0.1", 8080));

        let resp = plane.delete_services(&ctx(), vec![svc.clone()]).await;
        assert_eq!(resp.code, ResponseCode::ServiceExistedInstances);

        plane.remove_instance("i1");
        let resp = plane.delete_services(&ctx(), vec![svc.clone()]).await;
        assert!(resp.all_deleted());
        let resp = plane.delete_services(&ctx(), vec![svc]).await;
        assert_eq!(resp.code, ResponseCode::NotFoundService);
        assert!(resp.all_deleted());
    }

    #[tokio::test]
    async fn test_vanished_targets_report_not_found() {
        let plane = InMemoryControlPlane::new();
        let svc = Service::new("s1", "orders", "default", Utc::now());
        plane.add_service(svc.clone());
        plane.add_instance(serving_instance("i1", &svc, "10.0.0.1", 8080));
        plane.vanish("i1");
        assert!(plane.has_instance("i1"));

        let resp = plane
            .delete_instances(&ctx(), vec![Instance::with_id("i1")])
            .await;
        assert_eq!(resp.code, ResponseCode::NotFoundInstance);
        assert!(!plane.has_instance("i1"));
        assert!(plane.deleted_instances().is_empty());

        plane.vanish("s1");
        let resp = plane.delete_services(&ctx(), vec![svc]).await;
        assert_eq!(resp.code, ResponseCode::NotFoundService);
        assert!(!plane.has_service("s1"));
        assert!(plane.deleted_services().is_empty());
    }

    #[tokio::test]
    async fn test_leadership_requires_election() {
        let plane = InMemoryControlPlane::new();
        plane.set_leader(true);
        assert!(!plane.is_leader("maintain-job").await);
        plane.start_leader_election("maintain-job").await.unwrap();
        assert!(plane.is_leader("maintain-job").await);
    }
}
