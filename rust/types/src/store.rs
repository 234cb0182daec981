use crate::model::{RuleKind, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use polaris_error::{ErrorCodes, PolarisError};
use std::fmt::Debug;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Internal store error: {0}")]
    Internal(String),
}

impl PolarisError for StoreError {
    fn code(&self) -> ErrorCodes {
        match self {
            StoreError::NotFound(_) => ErrorCodes::NotFound,
            StoreError::Unavailable(_) => ErrorCodes::Unavailable,
            StoreError::Internal(_) => ErrorCodes::Internal,
        }
    }
}

/// The slice of the storage layer used by background maintenance.
///
/// Every `batch_clean_*` call hard-deletes at most `batch_size` soft-deleted
/// rows last modified before `cutoff` and returns the number removed. Calls
/// must be safe to re-issue after a failure.
#[async_trait]
pub trait Store: Send + Sync + Debug {
    async fn batch_clean_deleted_clients(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    async fn batch_clean_deleted_instances(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    async fn batch_clean_deleted_services(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    async fn batch_clean_deleted_rules(
        &self,
        kind: RuleKind,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    async fn batch_clean_deleted_config_files(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    async fn clean_config_file_release_history(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError>;

    /// Ids of unhealthy instances whose last modification is older than `timeout`.
    async fn get_unhealthy_instances(
        &self,
        timeout: Duration,
        limit: u32,
    ) -> Result<Vec<String>, StoreError>;

    async fn start_leader_election(&self, key: &str) -> Result<(), StoreError>;

    /// Point-in-time leadership; the answer may be stale by the time it is used.
    async fn is_leader(&self, key: &str) -> bool;

    async fn get_user_by_name(&self, name: &str, owner: &str) -> Result<Option<User>, StoreError>;
}
