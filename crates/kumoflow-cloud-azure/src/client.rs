//! Per-service client factory
//!
//! Built once from [`ClientOptions`] and passed by reference through every
//! operation. Client sharing happens by threading this value, never through
//! process-wide state.

use crate::api::{ArmClient, ClientOptions};
use crate::error::Result;
use crate::resources::{GalleryImageClient, MeshGatewayClient};

/// All per-service clients, sharing one underlying HTTP client.
pub struct Clients {
    pub gallery_images: GalleryImageClient,
    pub mesh_gateways: MeshGatewayClient,
}

impl Clients {
    pub fn new(options: &ClientOptions) -> Self {
        let arm = ArmClient::new(options);
        Self {
            gallery_images: GalleryImageClient::new(arm.clone()),
            mesh_gateways: MeshGatewayClient::new(arm),
        }
    }

    /// Build clients from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(&ClientOptions::from_env()?))
    }
}
