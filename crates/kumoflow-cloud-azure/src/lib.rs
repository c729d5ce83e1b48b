//! Azure Resource Manager provider for KumoFlow
//!
//! This crate implements the `ResourceLifecycle` trait for resources managed
//! through the Azure Resource Manager endpoint, translating between declared
//! configuration and the wire-level representation and converging every
//! mutation with the kumoflow-cloud poller.
//!
//! # Supported resources
//!
//! - Shared image gallery images (create, read, update, delete)
//! - Service mesh gateways (create, read, update, delete)
//!
//! # Requirements
//!
//! - A management token with access to the target subscription, e.g. from
//!   `az account get-access-token`
//! - `KUMOFLOW_AZURE_SUBSCRIPTION_ID` and `KUMOFLOW_AZURE_TOKEN` env vars
//!   (or an explicitly constructed [`ClientOptions`])
//!
//! # Example
//!
//! ```ignore
//! use kumoflow_cloud::ResourceLifecycle;
//! use kumoflow_cloud_azure::Clients;
//!
//! let clients = Clients::from_env()?;
//!
//! // Create an image and block until it is ready
//! let observed = clients.gallery_images.create(&spec).await?;
//!
//! // Delete it and block until absence is proven
//! clients.gallery_images.delete(&observed.descriptor).await?;
//! ```

pub mod api;
pub mod client;
pub mod error;
pub mod location;
pub mod resources;

pub use api::{ArmClient, ClientOptions};
pub use client::Clients;
pub use error::{AzureError, Result};
pub use resources::{
    DestinationNetwork, GalleryImageClient, GalleryImageProvisioningState, GalleryImageSpec,
    HyperVGeneration, ImageIdentifier, MeshGatewayClient, MeshGatewaySpec, MeshGatewayStatus,
    ObservedGalleryImage, ObservedMeshGateway, OsType, SourceNetwork,
};
