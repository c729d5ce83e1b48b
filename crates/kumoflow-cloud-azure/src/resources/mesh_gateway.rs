//! Service mesh gateway resource
//!
//! A gateway routes traffic from a source network (addressed by name) into a
//! destination network (addressed by resource id). The two directions carry
//! distinct declared types so each expansion can only read its own fields.

use crate::api::ArmClient;
use crate::error::{AzureError, Result};
use crate::location;
use async_trait::async_trait;
use kumoflow_cloud::{
    CloudError, Convergence, MissingBehavior, Observation, ResourceDescriptor, ResourceLifecycle,
    StatusProbe,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

const API_VERSION: &str = "2018-09-01-preview";
const KIND: &str = "mesh-gateway";

/// Declared configuration for a mesh gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshGatewaySpec {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source_network: SourceNetwork,
    pub destination_network: DestinationNetwork,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Network traffic enters from, addressed by name ("Open" or "Other").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceNetwork {
    pub name: String,
    #[serde(default)]
    pub endpoint_references: Vec<String>,
}

/// Network traffic is routed into, addressed by resource id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationNetwork {
    pub id: String,
    #[serde(default)]
    pub endpoint_references: Vec<String>,
}

/// Normalized remote representation written back after operations.
#[derive(Debug, Clone)]
pub struct ObservedMeshGateway {
    pub descriptor: ResourceDescriptor,
    pub location: String,
    pub description: Option<String>,
    pub source_network: Option<SourceNetwork>,
    pub destination_network: Option<DestinationNetwork>,
    pub status: Option<MeshGatewayStatus>,
    pub tags: HashMap<String, String>,
}

/// Statuses reported for mesh gateways.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeshGatewayStatus {
    Creating,
    Created,
    Updating,
    Deleting,
    Deleted,
    Failed,
}

impl MeshGatewayStatus {
    /// Map a wire value onto the closed set. Unmapped values fail loudly
    /// instead of being mistaken for an in-flight state.
    pub fn from_wire(value: &str) -> kumoflow_cloud::Result<Self> {
        match value {
            "Creating" => Ok(Self::Creating),
            "Created" => Ok(Self::Created),
            "Updating" => Ok(Self::Updating),
            "Deleting" => Ok(Self::Deleting),
            "Deleted" => Ok(Self::Deleted),
            "Failed" => Ok(Self::Failed),
            other => Err(CloudError::UnrecognizedStatus {
                kind: KIND,
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Creating => "Creating",
            Self::Created => "Created",
            Self::Updating => "Updating",
            Self::Deleting => "Deleting",
            Self::Deleted => "Deleted",
            Self::Failed => "Failed",
        }
    }
}

impl fmt::Display for MeshGatewayStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// Wire representation.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GatewayResource {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<HashMap<String, String>>,
    properties: GatewayProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GatewayProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_network: Option<NetworkRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_network: Option<NetworkRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

/// Reference to a network, by name or by resource id depending on the
/// direction it is used in.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    endpoint_refs: Option<Vec<EndpointRef>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EndpointRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

fn expand_endpoint_refs(references: &[String]) -> Option<Vec<EndpointRef>> {
    if references.is_empty() {
        return None;
    }
    Some(
        references
            .iter()
            .map(|name| EndpointRef {
                name: Some(name.clone()),
            })
            .collect(),
    )
}

fn flatten_endpoint_refs(references: Option<Vec<EndpointRef>>) -> Vec<String> {
    references
        .unwrap_or_default()
        .into_iter()
        .filter_map(|reference| reference.name)
        .collect()
}

fn expand_source_network(source: &SourceNetwork) -> NetworkRef {
    NetworkRef {
        name: Some(source.name.clone()),
        endpoint_refs: expand_endpoint_refs(&source.endpoint_references),
    }
}

fn expand_destination_network(destination: &DestinationNetwork) -> NetworkRef {
    NetworkRef {
        name: Some(destination.id.clone()),
        endpoint_refs: expand_endpoint_refs(&destination.endpoint_references),
    }
}

fn flatten_source_network(wire: Option<NetworkRef>) -> Option<SourceNetwork> {
    let wire = wire?;
    Some(SourceNetwork {
        name: wire.name.unwrap_or_default(),
        endpoint_references: flatten_endpoint_refs(wire.endpoint_refs),
    })
}

fn flatten_destination_network(wire: Option<NetworkRef>) -> Option<DestinationNetwork> {
    let wire = wire?;
    Some(DestinationNetwork {
        id: wire.name.unwrap_or_default(),
        endpoint_references: flatten_endpoint_refs(wire.endpoint_refs),
    })
}

fn expand_gateway(spec: &MeshGatewaySpec) -> GatewayResource {
    GatewayResource {
        id: None,
        name: None,
        location: location::normalize(&spec.location),
        tags: if spec.tags.is_empty() {
            None
        } else {
            Some(spec.tags.clone())
        },
        properties: GatewayProperties {
            description: spec.description.clone(),
            source_network: Some(expand_source_network(&spec.source_network)),
            destination_network: Some(expand_destination_network(&spec.destination_network)),
            status: None,
        },
    }
}

fn flatten_gateway(
    descriptor: ResourceDescriptor,
    wire: GatewayResource,
) -> kumoflow_cloud::Result<ObservedMeshGateway> {
    let status = wire
        .properties
        .status
        .as_deref()
        .map(MeshGatewayStatus::from_wire)
        .transpose()?;

    Ok(ObservedMeshGateway {
        descriptor,
        location: location::normalize(&wire.location),
        description: wire.properties.description,
        source_network: flatten_source_network(wire.properties.source_network),
        destination_network: flatten_destination_network(wire.properties.destination_network),
        status,
        tags: wire.tags.unwrap_or_default(),
    })
}

/// Typed client for the mesh gateway service.
#[derive(Clone)]
pub struct MeshGatewayClient {
    arm: ArmClient,
}

impl MeshGatewayClient {
    pub fn new(arm: ArmClient) -> Self {
        Self { arm }
    }

    pub fn descriptor(&self, resource_group: &str, name: &str) -> ResourceDescriptor {
        ResourceDescriptor::new(
            self.arm.subscription_id(),
            resource_group,
            "Microsoft.ServiceFabricMesh",
        )
        .with_segment("gateways", name)
    }

    async fn fetch(&self, descriptor: &ResourceDescriptor) -> Result<Option<GatewayResource>> {
        self.arm.get_json(&descriptor.id(), API_VERSION).await
    }

    async fn converge_created(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        use MeshGatewayStatus as Status;

        let mut probe = GatewayStatusProbe {
            client: self.clone(),
            descriptor: descriptor.clone(),
        };
        Convergence::new(vec![Status::Creating, Status::Updating], vec![Status::Created])
            .with_missing(MissingBehavior::Pending)
            .with_interval(Duration::from_secs(10))
            .wait(descriptor, &mut probe)
            .await?;
        Ok(())
    }

    async fn create_or_update(
        &self,
        spec: &MeshGatewaySpec,
        new_resource: bool,
    ) -> Result<ObservedMeshGateway> {
        let descriptor = self.descriptor(&spec.resource_group, &spec.name);

        if new_resource && self.fetch(&descriptor).await?.is_some() {
            return Err(AzureError::AlreadyExists(descriptor.to_string()));
        }

        tracing::info!("Creating/updating mesh gateway {}", descriptor);
        self.arm
            .put_json(&descriptor.id(), API_VERSION, &expand_gateway(spec))
            .await?;
        self.converge_created(&descriptor).await?;

        let wire = self.fetch(&descriptor).await?.ok_or_else(|| {
            AzureError::UnexpectedResponse(format!("{descriptor} vanished after create"))
        })?;
        Ok(flatten_gateway(descriptor, wire)?)
    }

    /// Delete the gateway and block until absence is proven. A 404 on the
    /// delete call itself means the gateway is already gone.
    pub async fn delete_gateway(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        use MeshGatewayStatus as Status;

        tracing::info!("Deleting mesh gateway {}", descriptor);
        self.arm.delete(&descriptor.id(), API_VERSION).await?;

        let mut probe = GatewayStatusProbe {
            client: self.clone(),
            descriptor: descriptor.clone(),
        };
        Convergence::new(
            vec![
                Status::Creating,
                Status::Created,
                Status::Updating,
                Status::Deleting,
                Status::Failed,
            ],
            vec![Status::Deleted],
        )
        .with_missing(MissingBehavior::Converged)
        .with_interval(Duration::from_secs(10))
        .wait(descriptor, &mut probe)
        .await?;
        Ok(())
    }
}

/// Probe reporting the gateway status.
struct GatewayStatusProbe {
    client: MeshGatewayClient,
    descriptor: ResourceDescriptor,
}

#[async_trait]
impl StatusProbe for GatewayStatusProbe {
    type Status = MeshGatewayStatus;

    async fn observe(&mut self) -> std::result::Result<Observation<Self::Status>, CloudError> {
        match self.client.fetch(&self.descriptor).await {
            Ok(Some(wire)) => match wire.properties.status.as_deref() {
                Some(raw) => Ok(Observation::Status(MeshGatewayStatus::from_wire(raw)?)),
                None => Err(CloudError::ApiError(format!(
                    "{}: response carries no status",
                    self.descriptor
                ))),
            },
            Ok(None) => Ok(Observation::Missing),
            Err(error) => Err(error.into_cloud()),
        }
    }
}

#[async_trait]
impl ResourceLifecycle for MeshGatewayClient {
    type Spec = MeshGatewaySpec;
    type Observed = ObservedMeshGateway;

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
            Some(wire) => Ok(Some(flatten_gateway(descriptor.clone(), wire)?)),
            None => {
                tracing::debug!("Mesh gateway {} was not found", descriptor);
                Ok(None)
            }
        }
    }

    async fn update(
        &self,
        descriptor: &ResourceDescriptor,
        spec: &Self::Spec,
    ) -> kumoflow_cloud::Result<Self::Observed> {
        let expected = self.descriptor(&spec.resource_group, &spec.name);
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
        self.delete_gateway(descriptor)
            .await
            .map_err(AzureError::into_cloud)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ClientOptions;

    fn spec() -> MeshGatewaySpec {
        MeshGatewaySpec {
            name: "gateway1".to_string(),
            resource_group: "group1".to_string(),
            location: "East US".to_string(),
            description: Some("ingress".to_string()),
            source_network: SourceNetwork {
                name: "Open".to_string(),
                endpoint_references: vec!["frontend".to_string()],
            },
            destination_network: DestinationNetwork {
                id: "/subscriptions/sub-1/resourceGroups/group1/providers\
                     /Microsoft.ServiceFabricMesh/networks/backend"
                    .to_string(),
                endpoint_references: vec!["api".to_string()],
            },
            tags: HashMap::new(),
        }
    }

    fn client() -> MeshGatewayClient {
        MeshGatewayClient::new(ArmClient::new(&ClientOptions::new("sub-1", "token")))
    }

    #[test]
    fn test_expand_keeps_directions_separate() {
        // The source is keyed by name and the destination by resource id;
        // each expansion must read only its own field.
        let wire = expand_gateway(&spec());
        let source = wire.properties.source_network.unwrap();
        let destination = wire.properties.destination_network.unwrap();

        assert_eq!(source.name.as_deref(), Some("Open"));
        assert!(destination.name.as_deref().unwrap().ends_with("/networks/backend"));
        assert_ne!(source.name, destination.name);
    }

    #[test]
    fn test_flatten_round_trips_both_networks() {
        let declared = spec();
        let wire = expand_gateway(&declared);

        let source = flatten_source_network(wire.properties.source_network).unwrap();
        let destination =
            flatten_destination_network(wire.properties.destination_network).unwrap();

        assert_eq!(source, declared.source_network);
        assert_eq!(destination, declared.destination_network);
    }

    #[test]
    fn test_wire_serialization_uses_camel_case() {
        let json = serde_json::to_value(expand_gateway(&spec())).unwrap();
        let properties = &json["properties"];
        assert!(properties.get("sourceNetwork").is_some());
        assert!(properties.get("destinationNetwork").is_some());
        assert_eq!(
            properties["sourceNetwork"]["endpointRefs"][0]["name"],
            "frontend"
        );
    }

    #[test]
    fn test_status_from_wire() {
        assert_eq!(
            MeshGatewayStatus::from_wire("Created").unwrap(),
            MeshGatewayStatus::Created
        );
        assert!(matches!(
            MeshGatewayStatus::from_wire("Provisioned"),
            Err(CloudError::UnrecognizedStatus { kind: "mesh-gateway", .. })
        ));
    }

    #[test]
    fn test_descriptor_path() {
        let descriptor = client().descriptor("group1", "gateway1");
        assert_eq!(
            descriptor.id(),
            "/subscriptions/sub-1/resourceGroups/group1/providers\
             /Microsoft.ServiceFabricMesh/gateways/gateway1"
        );
    }
}
