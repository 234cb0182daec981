use crate::config::SelfServiceMemberlistConfig;
use async_trait::async_trait;
use polaris_config::assignment::consistent_hash::Bucket;
use polaris_config::registry::Registry;
use polaris_config::Configurable;
use polaris_error::PolarisError;
use polaris_types::{CacheHandle, CacheManager};
use std::collections::BTreeSet;
use std::fmt::Debug;
use std::sync::Arc;

/* =========== Basic Types ============== */
pub type Memberlist = BTreeSet<Bucket>;

pub trait MemberlistProvider: Send + Sync + Debug {
    /// The current members, or `None` when membership cannot be determined.
    /// An empty list is never returned; callers must not mistake "nobody is
    /// alive" for "I own everything".
    fn memberlist(&self) -> Option<Memberlist>;
}

/* =========== Self Service Provider ============== */

/// Members are the healthy, non-isolated instances of the service that the
/// maintenance nodes register for themselves, so membership rides on the same
/// registry that the reaper prunes.
pub struct SelfServiceMemberlistProvider {
    namespace: String,
    service: String,
    cache: Arc<dyn CacheManager>,
}

impl Debug for SelfServiceMemberlistProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelfServiceMemberlistProvider")
            .field("namespace", &self.namespace)
            .field("service", &self.service)
            .finish()
    }
}

impl SelfServiceMemberlistProvider {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        cache: Arc<dyn CacheManager>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            service: service.into(),
            cache,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn service(&self) -> &str {
        &self.service
    }
}

#[async_trait]
impl Configurable<SelfServiceMemberlistConfig> for SelfServiceMemberlistProvider {
    async fn try_from_config(
        config: &SelfServiceMemberlistConfig,
        registry: &Registry,
    ) -> Result<Self, Box<dyn PolarisError>> {
        let CacheHandle(cache) = registry.get::<CacheHandle>().map_err(|e| e.boxed())?;
        Ok(Self::new(
            config.namespace.clone(),
            config.service.clone(),
            cache,
        ))
    }
}

impl MemberlistProvider for SelfServiceMemberlistProvider {
    fn memberlist(&self) -> Option<Memberlist> {
        let Some(service) = self.cache.get_service_by_name(&self.service, &self.namespace) else {
            tracing::warn!(
                namespace = %self.namespace,
                service = %self.service,
                "Self service not found in cache"
            );
            return None;
        };

        let members: Memberlist = self
            .cache
            .instances_by_service_id(&service.id)
            .into_iter()
            .filter(|ins| ins.is_serving())
            .map(|ins| Bucket::new(ins.host, 1))
            .collect();
        if members.is_empty() {
            tracing::warn!(
                namespace = %self.namespace,
                service = %self.service,
                "Self service has no healthy instance"
            );
            return None;
        }
        Some(members)
    }
}
