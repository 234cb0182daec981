use super::DEFAULT_JOB_INTERVAL;
use crate::context::JobContext;
use crate::job::{decode_option, JobConfigError, JobOption, MaintainJob};
use async_trait::async_trait;
use polaris_config::helpers::{clamp_floor, deserialize_humantime_duration};
use polaris_types::{DiscoveryServer, Instance, ResponseCode, Store};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DELETE_UNHEALTHY_INSTANCE: &str = "delete_unhealthy_instance";

const MIN_INSTANCE_DELETE_TIMEOUT: Duration = Duration::from_secs(2 * 60);
/// Instances fetched and deleted per discovery call.
const DELETE_BATCH_SIZE: u32 = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DeleteUnhealthyInstanceConfig {
    #[serde(deserialize_with = "deserialize_humantime_duration")]
    pub instance_delete_timeout: Duration,
}

impl Default for DeleteUnhealthyInstanceConfig {
    fn default() -> Self {
        Self {
            instance_delete_timeout: Duration::from_secs(60 * 60),
        }
    }
}

/// Deletes instances that stayed unhealthy for longer than the timeout.
#[derive(Debug)]
pub struct DeleteUnhealthyInstanceJob {
    store: Arc<dyn Store>,
    discovery: Arc<dyn DiscoveryServer>,
    config: DeleteUnhealthyInstanceConfig,
}

impl DeleteUnhealthyInstanceJob {
    pub fn new(store: Arc<dyn Store>, discovery: Arc<dyn DiscoveryServer>) -> Self {
        Self {
            store,
            discovery,
            config: DeleteUnhealthyInstanceConfig::default(),
        }
    }

    pub fn config(&self) -> &DeleteUnhealthyInstanceConfig {
        &self.config
    }
}

#[async_trait]
impl MaintainJob for DeleteUnhealthyInstanceJob {
    fn init(&mut self, option: &JobOption) -> Result<(), JobConfigError> {
        let mut config: DeleteUnhealthyInstanceConfig =
            decode_option(DELETE_UNHEALTHY_INSTANCE, option)?;
        config.instance_delete_timeout =
            clamp_floor(config.instance_delete_timeout, MIN_INSTANCE_DELETE_TIMEOUT);
        self.config = config;
        Ok(())
    }

    async fn execute(&mut self, ctx: &JobContext) {
        let mut deleted = 0u64;
        let mut pages = 0u32;
        loop {
            if pages > 0 && ctx.should_stop().await {
                break;
            }
            pages += 1;

            let ids = match self
                .store
                .get_unhealthy_instances(self.config.instance_delete_timeout, DELETE_BATCH_SIZE)
                .await
            {
                Ok(ids) => ids,
                Err(err) => {
                    tracing::error!(error = %err, "[Maintain][Job] get unhealthy instances failed");
                    break;
                }
            };
            if ids.is_empty() {
                break;
            }
            let fetched = ids.len();

            let instances: Vec<Instance> = ids.into_iter().map(Instance::with_id).collect();
            let resp = self
                .discovery
                .delete_instances(ctx.request_ctx(), instances)
                .await;
            if !resp.all_deleted() {
                // Remaining pages are left for the next tick.
                tracing::error!(
                    code = ?resp.code,
                    info = %resp.info,
                    "[Maintain][Job] delete unhealthy instances failed"
                );
                break;
            }

            let removed = resp
                .responses
                .iter()
                .filter(|r| r.code == ResponseCode::ExecuteSuccess)
                .count();
            deleted += removed as u64;
            ctx.metrics().record_instances_deleted(removed as u64);
            // A full page of instances that were already gone would be fetched
            // again unchanged.
            if fetched < DELETE_BATCH_SIZE as usize || removed == 0 {
                break;
            }
        }

        if deleted > 0 {
            tracing::info!(count = deleted, "[Maintain][Job] deleted unhealthy instances");
        }
    }

    fn clear(&mut self) {}

    fn interval(&self) -> Duration {
        DEFAULT_JOB_INTERVAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_utils::leader_context;
    use chrono::Utc;
    use polaris_types::in_memory::{serving_instance, InMemoryControlPlane};
    use polaris_types::Service;
    use tracing_test::traced_test;

    fn unhealthy(plane: &InMemoryControlPlane, svc: &Service, id: &str, minutes_ago: i64) {
        let mut ins = serving_instance(id, svc, "10.0.0.1", 8080);
        ins.healthy = false;
        ins.mtime = Utc::now() - chrono::Duration::minutes(minutes_ago);
        plane.add_instance(ins);
    }

    fn job(plane: &InMemoryControlPlane) -> DeleteUnhealthyInstanceJob {
        let plane = Arc::new(plane.clone());
        DeleteUnhealthyInstanceJob::new(plane.clone(), plane)
    }

    #[test]
    fn test_timeout_defaults_and_floor() {
        let mut job = job(&InMemoryControlPlane::new());
        job.init(&JobOption::new()).unwrap();
        assert_eq!(
            job.config().instance_delete_timeout,
            Duration::from_secs(3600)
        );

        let option: JobOption =
            serde_json::from_str(r#"{"instance_delete_timeout": "1m"}"#).unwrap();
        job.init(&option).unwrap();
        assert_eq!(job.config().instance_delete_timeout, MIN_INSTANCE_DELETE_TIMEOUT);

        let option: JobOption =
            serde_json::from_str(r#"{"instance_delete_timeout": 60}"#).unwrap();
        assert!(job.init(&option).is_err());
    }

    #[tokio::test]
    async fn test_deletes_only_long_unhealthy_instances() {
        let plane = InMemoryControlPlane::new();
        let ctx = leader_context(&plane, DELETE_UNHEALTHY_INSTANCE).await;
        let svc = Service::new("s1", "orders", "default", Utc::now());
        plane.add_service(svc.clone());
        unhealthy(&plane, &svc, "old", 90);
        unhealthy(&plane, &svc, "recent", 5);
        plane.add_instance(serving_instance("healthy", &svc, "10.0.0.2", 8080));

        let mut job = job(&plane);
        job.init(&JobOption::new()).unwrap();
        job.execute(&ctx).await;

        assert_eq!(plane.deleted_instances(), vec!["old".to_string()]);
        assert!(plane.has_instance("recent"));
        assert!(plane.has_instance("healthy"));
        assert_eq!(plane.write_contexts()[0], *ctx.request_ctx());
    }

    #[tokio::test]
    async fn test_pages_through_large_backlog() {
        let plane = InMemoryControlPlane::new();
        let ctx = leader_context(&plane, DELETE_UNHEALTHY_INSTANCE).await;
        let svc = Service::new("s1", "orders", "default", Utc::now());
        for i in 0..230 {
            unhealthy(&plane, &svc, &format!("ins-{:03}", i), 120);
        }

        let mut job = job(&plane);
        job.init(&JobOption::new()).unwrap();
        job.execute(&ctx).await;

        assert_eq!(plane.deleted_instances().len(), 230);
        assert_eq!(plane.delete_instance_calls(), 3);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_already_deleted_instances_do_not_abort_the_pass() {
        let plane = InMemoryControlPlane::new();
        let ctx = leader_context(&plane, DELETE_UNHEALTHY_INSTANCE).await;
        let svc = Service::new("s1", "orders", "default", Utc::now());
        for i in 0..150 {
            unhealthy(&plane, &svc, &format!("ins-{:03}", i), 120);
        }
        for i in 0..10 {
            plane.vanish(&format!("ins-{:03}", i));
        }

        let mut job = job(&plane);
        job.init(&JobOption::new()).unwrap();
        job.execute(&ctx).await;

        assert_eq!(plane.delete_instance_calls(), 2);
        assert_eq!(plane.deleted_instances().len(), 140);
        assert!(!plane.has_instance("ins-000"));
        assert!(!plane.has_instance("ins-149"));
        assert!(!logs_contain("delete unhealthy instances failed"));
        assert!(logs_contain("deleted unhealthy instances"));
    }

    #[tokio::test]
    async fn test_failed_batch_aborts_the_pass() {
        let plane = InMemoryControlPlane::new();
        let ctx = leader_context(&plane, DELETE_UNHEALTHY_INSTANCE).await;
        let svc = Service::new("s1", "orders", "default", Utc::now());
        for i in 0..150 {
            unhealthy(&plane, &svc, &format!("ins-{:03}", i), 120);
        }
        plane.set_fail_deletes(true);

        let mut job = job(&plane);
        job.init(&JobOption::new()).unwrap();
        job.execute(&ctx).await;

        assert_eq!(plane.delete_instance_calls(), 1);
        assert!(plane.deleted_instances().is_empty());
    }
}
