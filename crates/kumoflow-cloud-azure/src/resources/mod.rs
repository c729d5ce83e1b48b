//! Resource handlers
//!
//! One module per resource kind: declared form, wire form, the
//! expand/flatten translation between them, and the lifecycle operations
//! with their convergence policies.

pub mod gallery_image;
pub mod mesh_gateway;

pub use gallery_image::{
    GalleryImageClient, GalleryImageProvisioningState, GalleryImageSpec, HyperVGeneration,
    ImageIdentifier, ObservedGalleryImage, OsType,
};
pub use mesh_gateway::{
    DestinationNetwork, MeshGatewayClient, MeshGatewaySpec, MeshGatewayStatus, ObservedMeshGateway,
    SourceNetwork,
};
