//! Shared image gallery image resource
//!
//! Declared form, wire form, and the translation between them, plus the
//! create/read/update/delete lifecycle against the gallery images service.
//! Deletion is the interesting path: the read path only eventually observes
//! the delete, and a parent gallery waiting on nested cleanup can surface a
//! retryable dependency violation, so absence is proven by a long run of
//! consecutive not-found reads with a reissue-on-conflict recovery policy.

use crate::api::ArmClient;
use crate::error::{AzureError, Result};
use crate::location;
use async_trait::async_trait;
use kumoflow_cloud::{
    CloudError, Convergence, MissingBehavior, Observation, ResourceDescriptor, ResourceLifecycle,
    StatusProbe, Transience,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

const API_VERSION: &str = "2019-07-01";
const KIND: &str = "gallery-image";

/// Declared configuration for a gallery image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GalleryImageSpec {
    pub name: String,
    pub gallery_name: String,
    pub resource_group: String,
    pub location: String,
    pub os_type: OsType,
    #[serde(default)]
    pub hyper_v_generation: HyperVGeneration,
    pub identifier: ImageIdentifier,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub eula: Option<String>,
    #[serde(default)]
    pub privacy_statement_uri: Option<String>,
    #[serde(default)]
    pub release_note_uri: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Publisher/offer/sku triple identifying the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageIdentifier {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OsType {
    Linux,
    Windows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HyperVGeneration {
    #[default]
    V1,
    V2,
}

/// Normalized remote representation written back after operations.
#[derive(Debug, Clone)]
pub struct ObservedGalleryImage {
    pub descriptor: ResourceDescriptor,
    pub location: String,
    pub os_type: OsType,
    pub hyper_v_generation: HyperVGeneration,
    pub identifier: ImageIdentifier,
    pub description: Option<String>,
    pub eula: Option<String>,
    pub privacy_statement_uri: Option<String>,
    pub release_note_uri: Option<String>,
    pub provisioning_state: Option<GalleryImageProvisioningState>,
    pub tags: HashMap<String, String>,
}

/// Provisioning states reported for gallery images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryImageProvisioningState {
    Creating,
    Updating,
    Succeeded,
    Failed,
    Deleting,
    Migrating,
}

impl GalleryImageProvisioningState {
    /// Map a wire value onto the closed set. Unmapped values fail loudly
    /// instead of being mistaken for an in-flight state.
    pub fn from_wire(value: &str) -> kumoflow_cloud::Result<Self> {
        match value {
            "Creating" => Ok(Self::Creating),
            "Updating" => Ok(Self::Updating),
            "Succeeded" => Ok(Self::Succeeded),
            "Failed" => Ok(Self::Failed),
            "Deleting" => Ok(Self::Deleting),
            "Migrating" => Ok(Self::Migrating),
            other => Err(CloudError::UnrecognizedStatus {
                kind: KIND,
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Updating => "Updating",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Deleting => "Deleting",
            Self::Migrating => "Migrating",
        }
    }
}

impl fmt::Display for GalleryImageProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Wire representation (ARM envelope with a camelCase properties object).

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GalleryImageResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
    properties: GalleryImageProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GalleryImageProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    eula: Option<String>,
    identifier: ImageIdentifier,
    #[serde(skip_serializing_if = "Option::is_none")]
    privacy_statement_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    release_note_uri: Option<String>,
    os_type: OsType,
    #[serde(skip_serializing_if = "Option::is_none")]
    os_state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hyper_v_generation: Option<HyperVGeneration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    provisioning_state: Option<String>,
}

fn expand_gallery_image(spec: &GalleryImageSpec) -> GalleryImageResource {
    GalleryImageResource {
        id: None,
        name: None,
        location: location::normalize(&spec.location),
        tags: if spec.tags.is_empty() {
            None
        } else {
            Some(spec.tags.clone())
        },
        properties: GalleryImageProperties {
            description: spec.description.clone(),
            eula: spec.eula.clone(),
            identifier: spec.identifier.clone(),
            privacy_statement_uri: spec.privacy_statement_uri.clone(),
            release_note_uri: spec.release_note_uri.clone(),
            os_type: spec.os_type,
            // Images in a gallery are always generalized
            os_state: Some("Generalized".to_string()),
            hyper_v_generation: Some(spec.hyper_v_generation),
            provisioning_state: None,
        },
    }
}

fn flatten_gallery_image(
    descriptor: ResourceDescriptor,
    wire: GalleryImageResource,
) -> kumoflow_cloud::Result<ObservedGalleryImage> {
    let provisioning_state = wire
        .properties
        .provisioning_state
        .as_deref()
        .map(GalleryImageProvisioningState::from_wire)
        .transpose()?;

    Ok(ObservedGalleryImage {
        descriptor,
        location: location::normalize(&wire.location),
        os_type: wire.properties.os_type,
        hyper_v_generation: wire.properties.hyper_v_generation.unwrap_or_default(),
        identifier: wire.properties.identifier,
        description: wire.properties.description,
        eula: wire.properties.eula,
        privacy_statement_uri: wire.properties.privacy_statement_uri,
        release_note_uri: wire.properties.release_note_uri,
        provisioning_state,
        tags: wire.tags.unwrap_or_default(),
    })
}

/// Typed client for the gallery images service.
#[derive(Clone)]
pub struct GalleryImageClient {
    arm: ArmClient,
}

impl GalleryImageClient {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    /// Descriptor for an image inside a gallery.
    pub fn descriptor(
        &self,
        resource_group: &str,
        gallery_name: &str,
        name: &str,
    ) -> ResourceDescriptor {
        ResourceDescriptor::new(self.arm.subscription_id(), resource_group, "Microsoft.Compute")
            .with_segment("galleries", gallery_name)
            .with_segment("images", name)
    }

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Option<GalleryImageResource>> {
        self.arm.get_json(&descriptor.id(), API_VERSION).await
    }

    async fn converge_ready(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        use GalleryImageProvisioningState as State;

        let mut probe = GalleryImageProbe {
            client: self.clone(),
            descriptor: descriptor.clone(),
        };
        Convergence::new(vec![State::Creating, State::Updating], vec![State::Succeeded])
            .with_missing(MissingBehavior::Pending)
            .wait(descriptor, &mut probe)
            .await?;
        Ok(())
    }

    async fn create_or_update(
        &self,
        spec: &GalleryImageSpec,
        new_resource: bool,
    ) -> Result<ObservedGalleryImage> {
        let descriptor = self.descriptor(&spec.resource_group, &spec.gallery_name, &spec.name);

        if new_resource && self.fetch(&descriptor).await?.is_some() {
            return Err(AzureError::AlreadyExists(descriptor.to_string()));
        }

        tracing::info!("Creating/updating gallery image {}", descriptor);
        self.arm
            .put_json(&descriptor.id(), API_VERSION, &expand_gallery_image(spec))
            .await?;
        self.converge_ready(&descriptor).await?;

        let wire = self.fetch(&descriptor).await?.ok_or_else(|| {
            AzureError::UnexpectedResponse(format!("{descriptor} vanished after create"))
        })?;
        Ok(flatten_gallery_image(descriptor, wire)?)
    }

    /// Delete the image and block until absence is proven.
    pub async fn delete_image(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        use GalleryImageProvisioningState as State;

        tracing::info!("Deleting gallery image {}", descriptor);
        self.arm.delete(&descriptor.id(), API_VERSION).await?;

        // The delete is only eventually visible to the read path. A single
        // not-found read can be stale, so require a run of consecutive
        // not-found reads before declaring the image gone.
        let mut probe = GalleryImageDeleteProbe {
            client: self.clone(),
            descriptor: descriptor.clone(),
        };
        Convergence::new(
            vec![
                State::Creating,
                State::Updating,
                State::Succeeded,
                State::Failed,
                State::Deleting,
                State::Migrating,
            ],
            Vec::new(),
        )
        .with_missing(MissingBehavior::Converged)
        .with_interval(Duration::from_secs(10))
        .with_continuous_target(10)
        .wait(descriptor, &mut probe)
        .await?;
        Ok(())
    }
}

async fn observe_provisioning(
    client: &GalleryImageClient,
    descriptor: &ResourceDescriptor,
) -> std::result::Result<Observation<GalleryImageProvisioningState>, CloudError> {
    match client.fetch(descriptor).await {
        Ok(Some(wire)) => match wire.properties.provisioning_state.as_deref() {
            Some(raw) => Ok(Observation::Status(GalleryImageProvisioningState::from_wire(raw)?)),
            None => Err(CloudError::ApiError(format!(
                "{descriptor}: response carries no provisioningState"
            ))),
        },
        Ok(None) => Ok(Observation::Missing),
        Err(AzureError::Api {
            status: 409,
            message,
            ..
        }) => Err(CloudError::DependencyViolation(message)),
        Err(error) => Err(error.into_cloud()),
    }
}

/// Probe reporting the image provisioning state.
struct GalleryImageProbe {
    client: GalleryImageClient,
    descriptor: ResourceDescriptor,
}

#[async_trait]
impl StatusProbe for GalleryImageProbe {
    type Status = GalleryImageProvisioningState;

    async fn observe(
        &mut self,
    ) -> std::result::Result<Observation<Self::Status>, CloudError> {
        observe_provisioning(&self.client, &self.descriptor).await
    }
}

/// Delete-convergence probe.
///
/// A dependency violation here means a parent resource is still finishing
/// its own cleanup; the named recovery policy is to reissue the delete call
/// itself, not merely to poll again.
struct GalleryImageDeleteProbe {
    client: GalleryImageClient,
    descriptor: ResourceDescriptor,
}

#[async_trait]
impl StatusProbe for GalleryImageDeleteProbe {
    type Status = GalleryImageProvisioningState;

    async fn observe(
        &mut self,
    ) -> std::result::Result<Observation<Self::Status>, CloudError> {
        observe_provisioning(&self.client, &self.descriptor).await
    }

    fn classify(&self, error: &CloudError) -> Transience {
        match error {
            CloudError::DependencyViolation(_) => Transience::Transient,
            _ => Transience::Fatal,
        }
    }

    async fn recover(&mut self) -> std::result::Result<(), CloudError> {
        tracing::warn!("Reissuing delete for {}", self.descriptor);
        match self
            .client
            .arm
            .delete(&self.descriptor.id(), API_VERSION)
            .await
        {
            Ok(_) => Ok(()),
            Err(AzureError::Api { status: 409, .. }) => {
                // Still conflicting; the next poll cycle retries
                Ok(())
            }
            Err(error) => Err(error.into_cloud()),
        }
    }
}

#[async_trait]
impl ResourceLifecycle for GalleryImageClient {
    type Spec = GalleryImageSpec;
    type Observed = ObservedGalleryImage;

    fn kind(&self) -> &'static str {
        KIND
    }

    async fn create(&self, spec: &Self::Spec) -> kumoflow_cloud::Result<Self::Observed> {
        self.create_or_update(spec, true)
            .await
            .map_err(AzureError::into_cloud)
    }

    async fn read(
        &self,
        descriptor: &ResourceDescriptor,
    ) -> kumoflow_cloud::Result<Option<Self::Observed>> {
        match self.fetch(descriptor).await.map_err(AzureError::into_cloud)? {
            Some(wire) => Ok(Some(flatten_gallery_image(descriptor.clone(), wire)?)),
            None => {
                tracing::debug!("Gallery image {} was not found", descriptor);
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &Self::Spec,
    ) -> kumoflow_cloud::Result<Self::Observed> {
        let expected = self.descriptor(&spec.resource_group, &spec.gallery_name, &spec.name);
        if expected != *descriptor {
            return Err(CloudError::InvalidConfig(format!(
                "descriptor {descriptor} does not match spec target {expected}"
            )));
        }
        self.create_or_update(spec, false)
            .await
            .map_err(AzureError::into_cloud)
    }

    async fn delete(&self, descriptor: &ResourceDescriptor) -> kumoflow_cloud::Result<()> {
        self.delete_image(descriptor)
            .await
            .map_err(AzureError::into_cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ClientOptions;

    fn spec() -> GalleryImageSpec {
        GalleryImageSpec {
            name: "image1".to_string(),
            gallery_name: "gallery1".to_string(),
            resource_group: "group1".to_string(),
            location: "West Europe".to_string(),
            os_type: OsType::Linux,
            hyper_v_generation: HyperVGeneration::V2,
            identifier: ImageIdentifier {
                publisher: "acme".to_string(),
                offer: "base".to_string(),
                sku: "lts".to_string(),
            },
            description: Some("base image".to_string()),
            eula: None,
            privacy_statement_uri: None,
            release_note_uri: None,
            tags: HashMap::new(),
        }
    }

    fn client() -> GalleryImageClient {
        GalleryImageClient::new(ArmClient::new(&ClientOptions::new("sub-1", "token")))
    }

    #[test]
    fn test_expand_normalizes_location_and_pins_os_state() {
        let wire = expand_gallery_image(&spec());
        assert_eq!(wire.location, "westeurope");
        assert_eq!(wire.properties.os_state.as_deref(), Some("Generalized"));
        assert_eq!(wire.properties.identifier.publisher, "acme");
        assert!(wire.tags.is_none());
    }

    #[test]
    fn test_wire_serialization_uses_camel_case() {
        let json = serde_json::to_value(expand_gallery_image(&spec())).unwrap();
        let properties = &json["properties"];
        assert_eq!(properties["osType"], "Linux");
        assert_eq!(properties["hyperVGeneration"], "V2");
        assert_eq!(properties["osState"], "Generalized");
        assert!(properties.get("provisioningState").is_none());
    }

    #[test]
    fn test_flatten_from_service_response() {
        let body = r#"{
            "id": "/subscriptions/sub-1/resourceGroups/group1/providers/Microsoft.Compute/galleries/gallery1/images/image1",
            "name": "image1",
            "location": "westeurope",
            "tags": {"env": "prod"},
            "properties": {
                "description": "base image",
                "identifier": {"publisher": "acme", "offer": "base", "sku": "lts"},
                "osType": "Linux",
                "osState": "Generalized",
                "hyperVGeneration": "V2",
                "provisioningState": "Succeeded"
            }
        }"#;

        let wire: GalleryImageResource = serde_json::from_str(body).unwrap();
        let descriptor = client().descriptor("group1", "gallery1", "image1");
        let observed = flatten_gallery_image(descriptor.clone(), wire).unwrap();

        assert_eq!(observed.descriptor, descriptor);
        assert_eq!(observed.os_type, OsType::Linux);
        assert_eq!(observed.hyper_v_generation, HyperVGeneration::V2);
        assert_eq!(
            observed.provisioning_state,
            Some(GalleryImageProvisioningState::Succeeded)
        );
        assert_eq!(observed.tags.get("env").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_unrecognized_provisioning_state_fails_loudly() {
        let result = GalleryImageProvisioningState::from_wire("Banana");
        match result {
            Err(CloudError::UnrecognizedStatus { kind, value }) => {
                assert_eq!(kind, "gallery-image");
                assert_eq!(value, "Banana");
            }
            other => panic!("expected unrecognized status, got {other:?}"),
        }
    }

    #[test]
    fn test_descriptor_path() {
        let descriptor = client().descriptor("group1", "gallery1", "image1");
        assert_eq!(
            descriptor.id(),
            "/subscriptions/sub-1/resourceGroups/group1/providers/Microsoft.Compute\
             /galleries/gallery1/images/image1"
        );
    }

    #[test]
    fn test_delete_probe_classifies_dependency_violation_as_transient() {
        let probe = GalleryImageDeleteProbe {
            client: client(),
            descriptor: client().descriptor("group1", "gallery1", "image1"),
        };
        assert_eq!(
            probe.classify(&CloudError::DependencyViolation("conflict".to_string())),
            Transience::Transient
        );
        assert_eq!(
            probe.classify(&CloudError::ApiError("boom".to_string())),
            Transience::Fatal
        );
    }
}
