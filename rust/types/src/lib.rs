mod cache;
mod discovery;
mod model;
mod store;

#[cfg(any(test, feature = "testing"))]
pub mod in_memory;

pub use cache::*;
pub use discovery::*;
pub use model::*;
pub use store::*;

use polaris_config::registry::Injectable;
use std::sync::Arc;

/// Registry handle for the storage layer.
#[derive(Clone, Debug)]
pub struct StoreHandle(pub Arc<dyn Store>);

impl Injectable for StoreHandle {}

/// Registry handle for the discovery server's write API.
#[derive(Clone, Debug)]
pub struct DiscoveryHandle(pub Arc<dyn DiscoveryServer>);

impl Injectable for DiscoveryHandle {}

/// Registry handle for the read-through cache.
#[derive(Clone, Debug)]
pub struct CacheHandle(pub Arc<dyn CacheManager>);

impl Injectable for CacheHandle {}
