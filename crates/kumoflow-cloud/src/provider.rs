//! Resource lifecycle trait

use crate::descriptor::ResourceDescriptor;
use crate::error::Result;
use async_trait::async_trait;

/// Lifecycle surface every resource handler implements.
///
/// The call sequence mirrors a declarative control loop: check for an
/// existing object before creating it, converge after every mutation, and
/// report absence as `None` rather than an error so callers can drop the
/// resource from recorded state.
#[async_trait]
pub trait ResourceLifecycle: Send + Sync {
    /// Declared configuration for this resource kind.
    type Spec: Send + Sync;

    /// Normalized remote representation written back after operations.
    type Observed: Send + Sync;

    /// Stable kind label, e.g. "gallery-image".
    fn kind(&self) -> &'static str;

    /// Create the resource and block until it is ready.
    ///
    /// Fails with `CloudError::ResourceAlreadyExists` when the remote object
    /// already exists: an existing object must be imported into recorded
    /// state, never silently adopted.
    async fn create(&self, spec: &Self::Spec) -> Result<Self::Observed>;

    /// Read the current remote representation. `Ok(None)` when gone.
    async fn read(&self, descriptor: &ResourceDescriptor) -> Result<Option<Self::Observed>>;

    /// Apply changed configuration and block until it settles.
    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &Self::Spec,
    ) -> Result<Self::Observed>;

    /// Delete the resource and block until absence is proven.
    async fn delete(&self, descriptor: &ResourceDescriptor) -> Result<()>;
}
