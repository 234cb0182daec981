use crate::config::MaintainConfig;
use crate::context::{AdminIdentity, AdminIdentityError, JobContext, MAINTAIN_ELECTION_KEY};
use crate::job::{JobConfig, JobConfigError, MaintainJob};
use crate::jobs::{register_builtin_jobs, JobDeps};
use crate::metrics::MaintainMetrics;
use crate::registry::JobRegistry;
use async_trait::async_trait;
use polaris_config::registry::{Registry, RegistryError};
use polaris_config::Configurable;
use polaris_error::{ErrorCodes, PolarisError};
use polaris_types::{RequestContext, Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{span, Instrument};

#[derive(Debug, Error)]
pub enum MaintainError {
    #[error("Failed to start leader election [{key}]: {source}")]
    LeaderElection { key: String, source: StoreError },
    #[error("Job [{0}] is configured more than once")]
    DuplicateJob(String),
    #[error("Failed to init job [{job}]: {source}")]
    JobInit { job: String, source: JobConfigError },
    #[error(transparent)]
    AdminIdentity(#[from] AdminIdentityError),
    #[error("Maintain jobs already started")]
    AlreadyStarted,
    #[error(transparent)]
    Dependency(#[from] RegistryError),
}

impl PolarisError for MaintainError {
    fn code(&self) -> ErrorCodes {
        match self {
            MaintainError::LeaderElection { source, .. } => source.code(),
            MaintainError::DuplicateJob(_) => ErrorCodes::InvalidArgument,
            MaintainError::JobInit { source, .. } => source.code(),
            MaintainError::AdminIdentity(e) => e.code(),
            MaintainError::AlreadyStarted => ErrorCodes::AlreadyExists,
            MaintainError::Dependency(e) => e.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickRole {
    Leader,
    Follower,
}

/// One tick of one job: `execute` on the leader, `clear` everywhere else.
/// Leadership is polled right before the decision and never assumed to hold
/// for longer than that.
pub(crate) async fn safe_exec(job: &mut dyn MaintainJob, store: &dyn Store, ctx: &JobContext) -> TickRole {
    let leader = store.is_leader(MAINTAIN_ELECTION_KEY).await;
    ctx.metrics().record_job_run(ctx.job_name(), leader);
    if !leader {
        job.clear();
        return TickRole::Follower;
    }

    tracing::info!(job = %ctx.job_name(), "[Maintain][Job] start job");
    job.execute(ctx).await;
    tracing::info!(job = %ctx.job_name(), "[Maintain][Job] end job");
    TickRole::Leader
}

#[derive(Debug)]
struct RunnerState {
    running: bool,
    cancellation_token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    started: Vec<String>,
}

/// Owns the job catalog and drives every enabled job on its own ticker, gated
/// on the cluster-wide `maintain-job` election.
#[derive(Debug)]
pub struct MaintainJobRunner {
    registry: JobRegistry,
    store: Arc<dyn Store>,
    metrics: MaintainMetrics,
    parent_token: CancellationToken,
    state: Mutex<RunnerState>,
}

impl MaintainJobRunner {
    pub fn new(registry: JobRegistry, store: Arc<dyn Store>) -> Self {
        Self::with_cancellation_token(registry, store, CancellationToken::new())
    }

    /// Ticker loops are children of `parent`, so cancelling the process-wide
    /// token stops them as well.
    pub fn with_cancellation_token(
        registry: JobRegistry,
        store: Arc<dyn Store>,
        parent: CancellationToken,
    ) -> Self {
        let state = RunnerState {
            running: false,
            cancellation_token: parent.child_token(),
            handles: Vec::new(),
            started: Vec::new(),
        };
        Self {
            registry,
            store,
            metrics: MaintainMetrics::new(),
            parent_token: parent,
            state: Mutex::new(state),
        }
    }

    /// Joins the election, then resolves and initializes every enabled job
    /// before spawning any ticker. Any failure leaves nothing running.
    pub async fn start(&self, configs: &[JobConfig]) -> Result<(), MaintainError> {
        let mut state = self.state.lock().await;
        if state.running {
            return Err(MaintainError::AlreadyStarted);
        }

        self.store
            .start_leader_election(MAINTAIN_ELECTION_KEY)
            .await
            .map_err(|source| MaintainError::LeaderElection {
                key: MAINTAIN_ELECTION_KEY.to_string(),
                source,
            })?;
        let request_ctx = AdminIdentity::resolve(self.store.as_ref()).await?;

        let mut prepared: Vec<(String, Box<dyn MaintainJob>)> = Vec::new();
        for entry in configs {
            if !entry.enable {
                tracing::warn!(job = %entry.name, "[Maintain][Job] job disabled, skipped");
                continue;
            }
            let Some((name, mut job)) = self.registry.create(&entry.name) else {
                tracing::warn!(job = %entry.name, "[Maintain][Job] unknown job, skipped");
                continue;
            };
            if prepared.iter().any(|(started, _)| *started == name) {
                return Err(MaintainError::DuplicateJob(name));
            }
            job.init(&entry.option)
                .map_err(|source| MaintainError::JobInit {
                    job: name.clone(),
                    source,
                })?;
            prepared.push((name, job));
        }

        for (name, job) in prepared {
            tracing::info!(job = %name, interval = ?job.interval(), "[Maintain][Job] start ticker");
            let handle = self.spawn_ticker(
                name.clone(),
                job,
                request_ctx.clone(),
                state.cancellation_token.clone(),
            );
            state.handles.push(handle);
            state.started.push(name);
        }
        state.running = true;
        Ok(())
    }

    fn spawn_ticker(
        &self,
        name: String,
        mut job: Box<dyn MaintainJob>,
        request_ctx: RequestContext,
        cancellation_token: CancellationToken,
    ) -> JoinHandle<()> {
        let store = self.store.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            let interval = job.interval();
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let ctx = JobContext::new(
                            name.clone(),
                            request_ctx.clone(),
                            cancellation_token.clone(),
                            store.clone(),
                            metrics.clone(),
                        );
                        let tick_span = span!(parent: None, tracing::Level::INFO, "Maintain job tick", job = %name);
                        safe_exec(job.as_mut(), store.as_ref(), &ctx)
                            .instrument(tick_span)
                            .await;
                    }
                }
            }
            tracing::info!(job = %name, "[Maintain][Job] ticker stopped");
        })
    }

    /// Cancels every ticker and waits for in-flight ticks to finish. The
    /// runner can be started again afterwards.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        state.cancellation_token.cancel();
        for handle in state.handles.drain(..) {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "[Maintain][Job] ticker exited abnormally");
            }
        }
        state.started.clear();
        state.running = false;
        state.cancellation_token = self.parent_token.child_token();
    }

    pub async fn started_jobs(&self) -> Vec<String> {
        self.state.lock().await.started.clone()
    }
}

#[async_trait]
impl Configurable<MaintainConfig, MaintainError> for MaintainJobRunner {
    async fn try_from_config(
        _config: &MaintainConfig,
        registry: &Registry,
    ) -> Result<Self, MaintainError> {
        let deps = JobDeps::from_registry(registry)?;
        let mut jobs = JobRegistry::new();
        register_builtin_jobs(&mut jobs, &deps);
        Ok(Self::new(jobs, deps.store))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_utils::admin_ctx;
    use crate::job::{JobOption, MaintainJob};
    use polaris_types::in_memory::InMemoryControlPlane;
    use polaris_types::User;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct Calls {
        init: Arc<AtomicUsize>,
        execute: Arc<AtomicUsize>,
        clear: Arc<AtomicUsize>,
    }

    struct RecordingJob {
        calls: Calls,
        fail_init: bool,
    }

    #[async_trait]
    impl MaintainJob for RecordingJob {
        fn init(&mut self, _option: &JobOption) -> Result<(), JobConfigError> {
            self.calls.init.fetch_add(1, Ordering::SeqCst);
            if self.fail_init {
                return Err(JobConfigError::Invalid {
                    job: "broken".to_string(),
                    reason: "bad option".to_string(),
                });
            }
            Ok(())
        }

        async fn execute(&mut self, _ctx: &JobContext) {
            self.calls.execute.fetch_add(1, Ordering::SeqCst);
        }

        fn clear(&mut self) {
            self.calls.clear.fetch_add(1, Ordering::SeqCst);
        }

        fn interval(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    fn plane_with_admin() -> InMemoryControlPlane {
        let plane = InMemoryControlPlane::new();
        plane.add_user(User {
            id: "1".to_string(),
            name: crate::context::DEFAULT_MAIN_USER.to_string(),
            owner: String::new(),
            token: "admin-token".to_string(),
        });
        plane
    }

    fn runner(plane: &InMemoryControlPlane, calls: &Calls) -> MaintainJobRunner {
        let mut registry = JobRegistry::new();
        let ok = calls.clone();
        registry.register("recording", move || {
            Box::new(RecordingJob {
                calls: ok.clone(),
                fail_init: false,
            })
        });
        let broken = calls.clone();
        registry.register("broken", move || {
            Box::new(RecordingJob {
                calls: broken.clone(),
                fail_init: true,
            })
        });
        registry.register("delete_empty_service", move || {
            Box::new(RecordingJob {
                calls: Calls::default(),
                fail_init: false,
            })
        });
        MaintainJobRunner::new(registry, Arc::new(plane.clone()))
    }

    fn ctx(plane: &InMemoryControlPlane) -> JobContext {
        JobContext::new(
            "recording",
            admin_ctx(),
            CancellationToken::new(),
            Arc::new(plane.clone()),
            MaintainMetrics::new(),
        )
    }

    #[tokio::test]
    async fn test_safe_exec_follower_only_clears() {
        let plane = plane_with_admin();
        plane.start_leader_election(MAINTAIN_ELECTION_KEY).await.unwrap();
        let calls = Calls::default();
        let mut job = RecordingJob {
            calls: calls.clone(),
            fail_init: false,
        };

        for _ in 0..3 {
            let role = safe_exec(&mut job, &plane, &ctx(&plane)).await;
            assert_eq!(role, TickRole::Follower);
        }
        assert_eq!(calls.execute.load(Ordering::SeqCst), 0);
        assert_eq!(calls.clear.load(Ordering::SeqCst), 3);

        plane.set_leader(true);
        assert_eq!(
            safe_exec(&mut job, &plane, &ctx(&plane)).await,
            TickRole::Leader
        );
        assert_eq!(calls.execute.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tickers_respect_leadership() {
        let plane = plane_with_admin();
        let calls = Calls::default();
        let runner = runner(&plane, &calls);

        runner
            .start(&[JobConfig::enabled("recording")])
            .await
            .unwrap();
        assert_eq!(plane.elections(), vec![MAINTAIN_ELECTION_KEY.to_string()]);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(calls.execute.load(Ordering::SeqCst), 0);
        assert_eq!(calls.clear.load(Ordering::SeqCst), 3);

        plane.set_leader(true);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(calls.execute.load(Ordering::SeqCst), 2);

        runner.stop().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(calls.execute.load(Ordering::SeqCst), 2);
        assert!(runner.started_jobs().await.is_empty());
    }

    #[tokio::test]
    #[traced_test]
    async fn test_start_skips_disabled_and_unknown_and_resolves_alias() {
        let plane = plane_with_admin();
        let calls = Calls::default();
        let runner = runner(&plane, &calls);

        let mut disabled = JobConfig::enabled("broken");
        disabled.enable = false;
        runner
            .start(&[
                JobConfig::enabled("recording"),
                disabled,
                JobConfig::enabled("no_such_job"),
                JobConfig::enabled("delete_empty_autocreated_service"),
            ])
            .await
            .unwrap();

        assert_eq!(
            runner.started_jobs().await,
            vec!["recording".to_string(), "delete_empty_service".to_string()]
        );
        assert!(logs_contain("unknown job, skipped"));
        logs_assert(|lines: &[&str]| {
            match lines
                .iter()
                .any(|line| line.contains("WARN") && line.contains("job disabled, skipped"))
            {
                true => Ok(()),
                false => Err("disabled job was not warned about".to_string()),
            }
        });
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_duplicate_job_fails_start() {
        let plane = plane_with_admin();
        let calls = Calls::default();
        let runner = runner(&plane, &calls);

        let err = runner
            .start(&[
                JobConfig::enabled("delete_empty_service"),
                JobConfig::enabled("delete_empty_autocreated_service"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, MaintainError::DuplicateJob(ref name) if name == "delete_empty_service"));
        assert!(runner.started_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn test_init_failure_starts_nothing() {
        let plane = plane_with_admin();
        let calls = Calls::default();
        let runner = runner(&plane, &calls);

        let err = runner
            .start(&[JobConfig::enabled("recording"), JobConfig::enabled("broken")])
            .await
            .unwrap_err();
        assert!(matches!(err, MaintainError::JobInit { ref job, .. } if job == "broken"));
        assert_eq!(err.code(), ErrorCodes::InvalidArgument);
        assert!(runner.started_jobs().await.is_empty());

        // A failed start does not count as started.
        runner
            .start(&[JobConfig::enabled("recording")])
            .await
            .unwrap();
        assert_eq!(runner.started_jobs().await, vec!["recording".to_string()]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_election_failure_is_fatal() {
        let plane = plane_with_admin();
        plane.set_fail_election(true);
        let runner = runner(&plane, &Calls::default());

        let err = runner
            .start(&[JobConfig::enabled("recording")])
            .await
            .unwrap_err();
        assert!(matches!(err, MaintainError::LeaderElection { .. }));
    }

    #[tokio::test]
    async fn test_missing_admin_is_fatal() {
        let plane = InMemoryControlPlane::new();
        let runner = runner(&plane, &Calls::default());
        let err = runner
            .start(&[JobConfig::enabled("recording")])
            .await
            .unwrap_err();
        assert!(matches!(err, MaintainError::AdminIdentity(_)));
    }

    #[tokio::test]
    async fn test_start_twice_and_restart() {
        let plane = plane_with_admin();
        let runner = runner(&plane, &Calls::default());
        let jobs = [JobConfig::enabled("recording")];

        runner.start(&jobs).await.unwrap();
        assert!(matches!(
            runner.start(&jobs).await,
            Err(MaintainError::AlreadyStarted)
        ));

        runner.stop().await;
        runner.stop().await;
        runner.start(&jobs).await.unwrap();
        assert_eq!(runner.started_jobs().await, vec!["recording".to_string()]);
        runner.stop().await;
    }

    #[tokio::test]
    async fn test_try_from_config_needs_every_dependency() {
        let registry = Registry::new();
        let plane = plane_with_admin();
        registry.register(polaris_types::StoreHandle(Arc::new(plane.clone())));
        let err = MaintainJobRunner::try_from_config(&MaintainConfig::default(), &registry)
            .await
            .unwrap_err();
        assert!(matches!(err, MaintainError::Dependency(_)));

        registry.register(polaris_types::DiscoveryHandle(Arc::new(plane.clone())));
        registry.register(polaris_types::CacheHandle(Arc::new(plane)));
        let runner = MaintainJobRunner::try_from_config(&MaintainConfig::default(), &registry)
            .await
            .unwrap();
        assert!(runner.registry.contains("clean_deleted_resources"));
    }
}
