use chrono::{DateTime, Utc};
use polaris_types::{RuleKind, Store, StoreError};
use serde::Deserialize;
use std::fmt;

/// A table whose soft-deleted rows maintenance hard-deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum ResourceKind {
    Service,
    Instance,
    Client,
    ConfigFile,
    Rule(RuleKind),
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Service,
        ResourceKind::Instance,
        ResourceKind::Client,
        ResourceKind::ConfigFile,
        ResourceKind::Rule(RuleKind::Router),
        ResourceKind::Rule(RuleKind::RateLimit),
        ResourceKind::Rule(RuleKind::CircuitBreaker),
        ResourceKind::Rule(RuleKind::FaultDetect),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "service",
            ResourceKind::Instance => "instance",
            ResourceKind::Client => "client",
            ResourceKind::ConfigFile => "config_file",
            ResourceKind::Rule(kind) => kind.as_str(),
        }
    }

    /// One bounded hard-delete of rows soft-deleted before `cutoff`.
    pub async fn clean(
        self,
        store: &dyn Store,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u32, StoreError> {
        match self {
            ResourceKind::Service => store.batch_clean_deleted_services(cutoff, batch_size).await,
            ResourceKind::Instance => store.batch_clean_deleted_instances(cutoff, batch_size).await,
            ResourceKind::Client => store.batch_clean_deleted_clients(cutoff, batch_size).await,
            ResourceKind::ConfigFile => {
                store
                    .batch_clean_deleted_config_files(cutoff, batch_size)
                    .await
            }
            ResourceKind::Rule(kind) => {
                store
                    .batch_clean_deleted_rules(kind, cutoff, batch_size)
                    .await
            }
        }
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| format!("unknown resource kind [{}]", value))
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
