// Consistent-hash sharded reaper for empty services.
//
// Every maintenance node registers itself as an instance of one well-known
// service. The healthy hosts of that service form a hash ring; each node only
// looks after the services the ring assigns to its own host, so no election
// is needed. A service is deleted once it has been found empty and expired on
// `check_count_before_clean` consecutive ticks of its owner.

use super::config::ServiceReaperConfig;
use crate::context::{AdminIdentity, AdminIdentityError};
use crate::jobs::cutoff_before;
use crate::metrics::MaintainMetrics;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polaris_config::assignment::consistent_hash::Continuum;
use polaris_config::registry::{Registry, RegistryError};
use polaris_config::Configurable;
use polaris_error::{ErrorCodes, PolarisError};
use polaris_memberlist::config::SelfServiceMemberlistConfig;
use polaris_memberlist::{MemberlistProvider, SelfServiceMemberlistProvider};
use polaris_types::{
    CacheHandle, CacheManager, DiscoveryHandle, DiscoveryServer, RequestContext, ResponseCode,
    Service, StoreHandle,
};
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{span, Instrument};

const DELETE_BATCH_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ServiceReaperError {
    #[error("Discovery cache is not ready, service reaper not started")]
    CacheNotReady,
    #[error("Service reaper is open but local_host is not configured")]
    MissingLocalHost,
    #[error(transparent)]
    AdminIdentity(#[from] AdminIdentityError),
    #[error(transparent)]
    Dependency(#[from] RegistryError),
    #[error("Failed to build memberlist provider: {0}")]
    Memberlist(Box<dyn PolarisError>),
}

impl PolarisError for ServiceReaperError {
    fn code(&self) -> ErrorCodes {
        match self {
            ServiceReaperError::CacheNotReady => ErrorCodes::Unavailable,
            ServiceReaperError::MissingLocalHost => ErrorCodes::InvalidArgument,
            ServiceReaperError::AdminIdentity(e) => e.code(),
            ServiceReaperError::Dependency(e) => e.code(),
            ServiceReaperError::Memberlist(e) => e.code(),
        }
    }
}

/// A service owned by this node and how many consecutive ticks it has been
/// found empty and expired.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceCheckUnit {
    pub service: Service,
    pub check_count: u32,
}

pub struct ServiceReaper {
    config: ServiceReaperConfig,
    memberlist_provider: Box<dyn MemberlistProvider>,
    cache: Arc<dyn CacheManager>,
    discovery: Arc<dyn DiscoveryServer>,
    request_ctx: RequestContext,
    metrics: MaintainMetrics,
    continuum: Option<Continuum>,
    checked_services: HashMap<String, ServiceCheckUnit>,
}

impl Debug for ServiceReaper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceReaper")
            .field("local_host", &self.config.local_host)
            .field("checked_services", &self.checked_services.len())
            .finish()
    }
}

impl ServiceReaper {
    pub fn new(
        config: ServiceReaperConfig,
        memberlist_provider: Box<dyn MemberlistProvider>,
        cache: Arc<dyn CacheManager>,
        discovery: Arc<dyn DiscoveryServer>,
        request_ctx: RequestContext,
    ) -> Self {
        Self {
            config,
            memberlist_provider,
            cache,
            discovery,
            request_ctx,
            metrics: MaintainMetrics::new(),
            continuum: None,
            checked_services: HashMap::new(),
        }
    }

    pub fn continuum(&self) -> Option<&Continuum> {
        self.continuum.as_ref()
    }

    pub fn checked_services(&self) -> &HashMap<String, ServiceCheckUnit> {
        &self.checked_services
    }

    /// Rebuilds the ring when membership changed. Returns false when
    /// membership is unknown; the previous ring is kept and the tick should
    /// do nothing.
    pub fn reload_self_continuum(&mut self) -> bool {
        let Some(members) = self.memberlist_provider.memberlist() else {
            tracing::warn!("[Maintain][Reaper] no healthy self instance, skip this round");
            return false;
        };
        if let Some(continuum) = &self.continuum {
            if continuum.buckets() == &members {
                return true;
            }
        }

        let hosts: Vec<&str> = members.iter().map(|b| b.host.as_str()).collect();
        match Continuum::with_config(members.clone(), &self.config.ring) {
            Ok(continuum) => {
                tracing::info!(members = ?hosts, "[Maintain][Reaper] hash ring rebuilt");
                self.continuum = Some(continuum);
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "[Maintain][Reaper] failed to build hash ring");
                false
            }
        }
    }

    /// Recomputes the services this node owns. Counters carry over for
    /// services it already owned; everything else starts at zero.
    pub fn reload_managed_services(&mut self) {
        let Some(continuum) = &self.continuum else {
            return;
        };
        let config = &self.config;
        let previous = std::mem::take(&mut self.checked_services);
        let mut owned = HashMap::new();

        self.cache.iterate_services(&mut |svc| {
            if svc.is_alias() || config.is_ignored(&svc.namespace, &svc.name) {
                return true;
            }
            match continuum.owner_of(&svc.id) {
                Ok(owner) if owner == config.local_host => {
                    let check_count = previous
                        .get(&svc.id)
                        .map(|unit| unit.check_count)
                        .unwrap_or(0);
                    owned.insert(
                        svc.id.clone(),
                        ServiceCheckUnit {
                            service: svc.clone(),
                            check_count,
                        },
                    );
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(service_id = %svc.id, error = %err, "[Maintain][Reaper] hash service failed");
                }
            }
            true
        });

        tracing::debug!(count = owned.len(), "[Maintain][Reaper] managed services reloaded");
        self.checked_services = owned;
    }

    /// Advances the counters of every owned service and deletes the ones that
    /// reached the threshold.
    pub async fn check(&mut self, now: DateTime<Utc>) {
        let threshold = self.config.threshold();
        let expired_before = cutoff_before(now, self.config.expire_time);

        let mut to_delete = Vec::new();
        for unit in self.checked_services.values_mut() {
            let count = self.cache.instances_count_by_service_id(&unit.service.id);
            if count.total == 0 && unit.service.mtime < expired_before {
                unit.check_count += 1;
                if unit.check_count >= threshold {
                    unit.check_count = 0;
                    to_delete.push(unit.service.clone());
                }
            } else {
                unit.check_count = 0;
            }
        }
        if to_delete.is_empty() {
            return;
        }
        to_delete.sort_by(|a, b| a.id.cmp(&b.id));

        let mut deleted = 0u64;
        for chunk in to_delete.chunks(DELETE_BATCH_SIZE) {
            let resp = self
                .discovery
                .delete_services(&self.request_ctx, chunk.to_vec())
                .await;
            if resp.responses.is_empty() && !resp.code.is_deleted() {
                tracing::error!(code = ?resp.code, info = %resp.info, "[Maintain][Reaper] delete services failed");
                continue;
            }
            for item in &resp.responses {
                match item.code {
                    ResponseCode::ExecuteSuccess => {
                        deleted += 1;
                        tracing::info!(service_id = %item.id, "[Maintain][Reaper] deleted empty service");
                    }
                    code if code.is_deleted() => {}
                    code => {
                        tracing::warn!(service_id = %item.id, code = ?code, info = %item.info, "[Maintain][Reaper] delete service failed");
                    }
                }
            }
        }
        self.metrics.record_services_deleted("reaper", deleted);
    }

    pub async fn tick(&mut self) {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&mut self, now: DateTime<Utc>) {
        if !self.reload_self_continuum() {
            return;
        }
        self.reload_managed_services();
        self.check(now).await;
    }

    pub async fn run(mut self, cancellation_token: CancellationToken) {
        tracing::info!(
            local_host = %self.config.local_host,
            interval = ?self.config.interval(),
            "[Maintain][Reaper] service reaper started"
        );
        loop {
            tokio::select! {
                _ = cancellation_token.cancelled() => break,
                _ = tokio::time::sleep(self.config.interval()) => {
                    let tick_span = span!(parent: None, tracing::Level::INFO, "Service reaper tick");
                    self.tick().instrument(tick_span).await;
                }
            }
        }
        tracing::info!("[Maintain][Reaper] service reaper stopped");
    }
}

#[async_trait]
impl Configurable<ServiceReaperConfig, ServiceReaperError> for ServiceReaper {
    async fn try_from_config(
        config: &ServiceReaperConfig,
        registry: &Registry,
    ) -> Result<Self, ServiceReaperError> {
        if config.local_host.trim().is_empty() {
            return Err(ServiceReaperError::MissingLocalHost);
        }
        let StoreHandle(store) = registry.get::<StoreHandle>()?;
        let DiscoveryHandle(discovery) = registry.get::<DiscoveryHandle>()?;
        let CacheHandle(cache) = registry.get::<CacheHandle>()?;
        let request_ctx = AdminIdentity::resolve(store.as_ref()).await?;

        let memberlist_config = SelfServiceMemberlistConfig {
            namespace: config.namespace.clone(),
            service: config.service.clone(),
        };
        let provider = SelfServiceMemberlistProvider::try_from_config(&memberlist_config, registry)
            .await
            .map_err(ServiceReaperError::Memberlist)?;

        Ok(Self::new(
            config.clone(),
            Box::new(provider),
            cache,
            discovery,
            request_ctx,
        ))
    }
}

/// Handle of a running reaper.
#[derive(Debug)]
pub struct ServiceReaperHandle {
    join_handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
}

impl ServiceReaperHandle {
    pub async fn stop(self) {
        self.cancellation_token.cancel();
        if let Err(err) = self.join_handle.await {
            tracing::error!(error = %err, "[Maintain][Reaper] reaper exited abnormally");
        }
    }
}

/// Starts the reaper on its own ticker. Returns `None` when the reaper is
/// not enabled.
pub async fn start_service_reaper(
    config: &ServiceReaperConfig,
    cache_ready: bool,
    registry: &Registry,
    cancellation_token: CancellationToken,
) -> Result<Option<ServiceReaperHandle>, ServiceReaperError> {
    if !config.open {
        tracing::info!("[Maintain][Reaper] service reaper is not open");
        return Ok(None);
    }
    if !cache_ready {
        return Err(ServiceReaperError::CacheNotReady);
    }
    let reaper = ServiceReaper::try_from_config(config, registry).await?;
    let token = cancellation_token.child_token();
    let join_handle = tokio::spawn(reaper.run(token.clone()));
    Ok(Some(ServiceReaperHandle {
        join_handle,
        cancellation_token: token,
    }))
}
