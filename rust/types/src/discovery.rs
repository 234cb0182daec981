use crate::model::{Instance, Service};
use async_trait::async_trait;
use std::fmt::Debug;

/// Identity attached to writes issued on behalf of the control plane itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub operator: String,
    pub token: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    ExecuteSuccess,
    NotFoundResource,
    NotFoundService,
    NotFoundInstance,
    /// The service still has instances; registration won a race with the reaper.
    ServiceExistedInstances,
    InvalidParameter,
    NotAllowedAccess,
    StoreLayerException,
    ExecuteException,
}

impl ResponseCode {
    pub fn is_success(&self) -> bool {
        matches!(self, ResponseCode::ExecuteSuccess)
    }

    /// Success, or the target is already gone. Deletes treat both as done.
    pub fn is_deleted(&self) -> bool {
        matches!(
            self,
            ResponseCode::ExecuteSuccess
                | ResponseCode::NotFoundResource
                | ResponseCode::NotFoundService
                | ResponseCode::NotFoundInstance
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteResponse {
    pub code: ResponseCode,
    pub id: String,
    pub info: String,
}

impl WriteResponse {
    pub fn new(code: ResponseCode, id: impl Into<String>) -> Self {
        Self {
            code,
            id: id.into(),
            info: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchWriteResponse {
    pub code: ResponseCode,
    pub info: String,
    pub responses: Vec<WriteResponse>,
}

impl BatchWriteResponse {
    /// Builds a batch response whose top-level code is the first failing item
    /// code, or `ExecuteSuccess` when every item succeeded.
    pub fn from_items(responses: Vec<WriteResponse>) -> Self {
        let code = responses
            .iter()
            .map(|r| r.code)
            .find(|c| !c.is_success())
            .unwrap_or(ResponseCode::ExecuteSuccess);
        Self {
            code,
            info: String::new(),
            responses,
        }
    }

    pub fn failed(code: ResponseCode, info: impl Into<String>) -> Self {
        Self {
            code,
            info: info.into(),
            responses: vec![],
        }
    }

    /// Every item was deleted or was already gone.
    pub fn all_deleted(&self) -> bool {
        self.code.is_deleted() && self.responses.iter().all(|r| r.code.is_deleted())
    }

    /// Items that were neither deleted nor already gone.
    pub fn failures(&self) -> impl Iterator<Item = &WriteResponse> {
        self.responses.iter().filter(|r| !r.code.is_deleted())
    }
}

/// The discovery server's administrative write API.
#[async_trait]
pub trait DiscoveryServer: Send + Sync + Debug {
    async fn delete_instances(
        &self,
        ctx: &RequestContext,
        instances: Vec<Instance>,
    ) -> BatchWriteResponse;

    async fn delete_services(
        &self,
        ctx: &RequestContext,
        services: Vec<Service>,
    ) -> BatchWriteResponse;
}
