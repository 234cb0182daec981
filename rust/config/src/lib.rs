pub mod assignment;
pub mod helpers;
pub mod registry;

use async_trait::async_trait;
use polaris_error::PolarisError;
use registry::Registry;

/// A component that can be built from its configuration plus the shared
/// dependency handles held in a [`Registry`].
#[async_trait]
pub trait Configurable<T, E = Box<dyn PolarisError>> {
    async fn try_from_config(config: &T, registry: &Registry) -> Result<Self, E>
    where
        Self: Sized;
}
