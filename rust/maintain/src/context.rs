use crate::metrics::MaintainMetrics;
use polaris_error::{ErrorCodes, PolarisError};
use polaris_types::{RequestContext, Store, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Operator recorded on every write issued by maintenance.
pub const MAINTAIN_OPERATOR: &str = "maintain-job";
/// Leader election key shared by every maintenance node.
pub const MAINTAIN_ELECTION_KEY: &str = "maintain-job";
/// Environment variable naming the administrative user.
pub const MAIN_USER_ENV: &str = "POLARIS_MAIN_USER";
pub const DEFAULT_MAIN_USER: &str = "polaris";

#[derive(Debug, Error)]
pub enum AdminIdentityError {
    #[error("Main user [{0}] not found")]
    UserNotFound(String),
    #[error("Failed to load main user [{user}]: {source}")]
    Store { user: String, source: StoreError },
}

impl PolarisError for AdminIdentityError {
    fn code(&self) -> ErrorCodes {
        match self {
            AdminIdentityError::UserNotFound(_) => ErrorCodes::FailedPrecondition,
            AdminIdentityError::Store { source, .. } => source.code(),
        }
    }
}

/// The administrative identity that tags every maintenance write.
pub struct AdminIdentity;

impl AdminIdentity {
    /// The administrative user name, from `POLARIS_MAIN_USER` when set.
    pub fn user_name() -> String {
        std::env::var(MAIN_USER_ENV)
            .ok()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_MAIN_USER.to_string())
    }

    /// Builds the request context used for maintenance writes. Resolved once
    /// at startup; a missing user is a startup error.
    pub async fn resolve(store: &dyn Store) -> Result<RequestContext, AdminIdentityError> {
        Self::resolve_user(store, &Self::user_name()).await
    }

    pub async fn resolve_user(
        store: &dyn Store,
        user: &str,
    ) -> Result<RequestContext, AdminIdentityError> {
        match store.get_user_by_name(user, "").await {
            Ok(Some(found)) => Ok(RequestContext {
                operator: MAINTAIN_OPERATOR.to_string(),
                token: found.token,
            }),
            Ok(None) => Err(AdminIdentityError::UserNotFound(user.to_string())),
            Err(source) => Err(AdminIdentityError::Store {
                user: user.to_string(),
                source,
            }),
        }
    }
}

/// Everything a job needs for one tick.
#[derive(Clone, Debug)]
pub struct JobContext {
    job_name: String,
    request_ctx: RequestContext,
    cancellation_token: CancellationToken,
    store: Arc<dyn Store>,
    metrics: MaintainMetrics,
}

impl JobContext {
    pub fn new(
        job_name: impl Into<String>,
        request_ctx: RequestContext,
        cancellation_token: CancellationToken,
        store: Arc<dyn Store>,
        metrics: MaintainMetrics,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            request_ctx,
            cancellation_token,
            store,
            metrics,
        }
    }

    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    pub fn request_ctx(&self) -> &RequestContext {
        &self.request_ctx
    }

    pub fn metrics(&self) -> &MaintainMetrics {
        &self.metrics
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Checked between storage calls of a multi-call pass. A pass stops early
    /// once the process is shutting down or this node lost leadership.
    pub async fn should_stop(&self) -> bool {
        if self.is_cancelled() {
            tracing::info!(job = %self.job_name, "[Maintain][Job] cancelled, stop current pass");
            return true;
        }
        if !self.store.is_leader(MAINTAIN_ELECTION_KEY).await {
            tracing::warn!(job = %self.job_name, "[Maintain][Job] lost leadership, stop current pass");
            return true;
        }
        false
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use polaris_types::in_memory::InMemoryControlPlane;
    use polaris_types::User;

    fn admin(name: &str) -> User {
        User {
            id: "u-1".to_string(),
            name: name.to_string(),
            owner: String::new(),
            token: "admin-token".to_string(),
        }
    }

    #[tokio::test]
    async fn test_resolve_admin_context() {
        let plane = InMemoryControlPlane::new();
        plane.add_user(admin("polaris"));
        let ctx = AdminIdentity::resolve_user(&plane, "polaris").await.unwrap();
        assert_eq!(ctx.operator, MAINTAIN_OPERATOR);
        assert_eq!(ctx.token, "admin-token");
    }

    #[tokio::test]
    async fn test_missing_admin_user_is_an_error() {
        let plane = InMemoryControlPlane::new();
        plane.add_user(admin("someone-else"));
        let err = AdminIdentity::resolve_user(&plane, "polaris").await.unwrap_err();
        assert!(matches!(err, AdminIdentityError::UserNotFound(ref u) if u == "polaris"));
        assert_eq!(err.code(), ErrorCodes::FailedPrecondition);
    }

    #[tokio::test]
    async fn test_should_stop_on_cancel_or_lost_leadership() {
        let plane = InMemoryControlPlane::new();
        let ctx = leader_context(&plane, "job").await;
        assert!(!ctx.should_stop().await);

        plane.set_leader(false);
        assert!(ctx.should_stop().await);

        plane.set_leader(true);
        ctx.cancellation_token.cancel();
        assert!(ctx.should_stop().await);
    }
}
