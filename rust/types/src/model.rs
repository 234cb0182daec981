use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A registered service as seen by the read cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub namespace: String,
    /// Set on alias services; holds the id of the service being aliased.
    pub reference: Option<String>,
    pub metadata: HashMap<String, String>,
    /// Last modification time.
    pub mtime: DateTime<Utc>,
}

impl Service {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
        mtime: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            namespace: namespace.into(),
            reference: None,
            metadata: HashMap::new(),
            mtime,
        }
    }

    pub fn is_alias(&self) -> bool {
        self.reference.as_deref().is_some_and(|r| !r.is_empty())
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}({})", self.namespace, self.name, self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub service: String,
    pub namespace: String,
    pub host: String,
    pub port: u32,
    pub weight: u32,
    pub healthy: bool,
    pub isolate: bool,
    pub mtime: DateTime<Utc>,
}

impl Instance {
    /// A delete request only needs the id.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            service: String::new(),
            namespace: String::new(),
            host: String::new(),
            port: 0,
            weight: 0,
            healthy: false,
            isolate: false,
            mtime: DateTime::<Utc>::default(),
        }
    }

    /// Healthy and not isolated, i.e. eligible to receive traffic.
    pub fn is_serving(&self) -> bool {
        self.healthy && !self.isolate
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstanceCount {
    pub total: u32,
    pub healthy: u32,
}

/// Governance rule tables that keep soft-deleted rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Router,
    RateLimit,
    CircuitBreaker,
    FaultDetect,
}

impl RuleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleKind::Router => "router_rule",
            RuleKind::RateLimit => "ratelimit_rule",
            RuleKind::CircuitBreaker => "circuitbreaker_rule",
            RuleKind::FaultDetect => "faultdetect_rule",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alias_detection() {
        let mut svc = Service::new("s1", "orders", "default", Utc::now());
        assert!(!svc.is_alias());
        svc.reference = Some(String::new());
        assert!(!svc.is_alias());
        svc.reference = Some("s0".to_string());
        assert!(svc.is_alias());
    }

    #[test]
    fn test_instance_serving() {
        let mut ins = Instance::with_id("i1");
        assert!(!ins.is_serving());
        ins.healthy = true;
        assert!(ins.is_serving());
        ins.isolate = true;
        assert!(!ins.is_serving());
    }
}
