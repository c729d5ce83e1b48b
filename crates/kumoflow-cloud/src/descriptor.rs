//! Resource descriptors
//!
//! A [`ResourceDescriptor`] is the composite key addressing a single
//! remotely-managed object: subscription scope, resource group, provider
//! namespace, and an ordered chain of collection/name segments ending in
//! the leaf name. Descriptors are immutable once built and are the identity
//! used by every read, update, and delete call.

use crate::error::{CloudError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One collection/name pair inside a resource path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PathSegment {
    pub collection: String,
    pub name: String,
}

/// Identity of a remotely-managed resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    subscription_id: String,
    resource_group: String,
    provider: String,
    segments: Vec<PathSegment>,
}

impl ResourceDescriptor {
    pub fn new(
        subscription_id: impl Into<String>,
        resource_group: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            resource_group: resource_group.into(),
            provider: provider.into(),
            segments: Vec::new(),
        }
    }

    /// Append a collection/name pair to the path.
    pub fn with_segment(mut self, collection: impl Into<String>, name: impl Into<String>) -> Self {
        self.segments.push(PathSegment {
            collection: collection.into(),
            name: name.into(),
        });
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Leaf name (the last path segment), or an empty string for a
    /// descriptor with no segments.
    pub fn name(&self) -> &str {
        self.segments
            .last()
            .map(|segment| segment.name.as_str())
            .unwrap_or_default()
    }

    /// Look up the name stored under a collection segment.
    pub fn segment(&self, collection: &str) -> Option<&str> {
        self.segments
            .iter()
            .find(|segment| segment.collection == collection)
            .map(|segment| segment.name.as_str())
    }

    /// Like [`segment`](Self::segment), but a missing collection is an error.
    pub fn expect_segment(&self, collection: &str) -> Result<&str> {
        self.segment(collection).ok_or_else(|| {
            CloudError::InvalidResourceId(format!("{self} has no `{collection}` segment"))
        })
    }

    /// Canonical resource path.
    pub fn id(&self) -> String {
        let mut id = format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}",
            self.subscription_id, self.resource_group, self.provider
        );
        for segment in &self.segments {
            id.push('/');
            id.push_str(&segment.collection);
            id.push('/');
            id.push_str(&segment.name);
        }
        id
    }

    /// Parse a canonical resource path back into a descriptor.
    pub fn parse(input: &str) -> Result<Self> {
        let stripped = input.strip_prefix('/').ok_or_else(|| {
            CloudError::InvalidResourceId(format!("{input:?} does not start with '/'"))
        })?;

        let parts: Vec<&str> = stripped.split('/').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(CloudError::InvalidResourceId(format!(
                "{input:?} contains an empty segment"
            )));
        }
        if parts.len() < 8 {
            return Err(CloudError::InvalidResourceId(format!(
                "{input:?} is too short, expected \
                 /subscriptions/{{id}}/resourceGroups/{{name}}/providers/{{namespace}}/{{collection}}/{{name}}"
            )));
        }
        for (index, expected) in [(0, "subscriptions"), (2, "resourceGroups"), (4, "providers")] {
            if !parts[index].eq_ignore_ascii_case(expected) {
                return Err(CloudError::InvalidResourceId(format!(
                    "{input:?} is missing the `{expected}` element"
                )));
            }
        }

        let trailing = &parts[6..];
        if trailing.len() % 2 != 0 {
            return Err(CloudError::InvalidResourceId(format!(
                "{:?} has a collection {:?} with no name",
                input,
                trailing[trailing.len() - 1]
            )));
        }

        let mut descriptor = Self::new(parts[1], parts[3], parts[5]);
        for pair in trailing.chunks(2) {
            descriptor = descriptor.with_segment(pair[0], pair[1]);
        }
        Ok(descriptor)
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_descriptor() -> ResourceDescriptor {
        ResourceDescriptor::new("00000000-0000-0000-0000-000000000001", "group1", "Microsoft.Compute")
            .with_segment("galleries", "gallery1")
            .with_segment("images", "image1")
    }

    #[test]
    fn test_id_round_trip() {
        let descriptor = image_descriptor();
        let id = descriptor.id();
        assert_eq!(
            id,
            "/subscriptions/00000000-0000-0000-0000-000000000001/resourceGroups/group1\
             /providers/Microsoft.Compute/galleries/gallery1/images/image1"
        );
        assert_eq!(ResourceDescriptor::parse(&id).unwrap(), descriptor);
    }

    #[test]
    fn test_segment_lookup() {
        let descriptor = image_descriptor();
        assert_eq!(descriptor.segment("galleries"), Some("gallery1"));
        assert_eq!(descriptor.name(), "image1");
        assert!(descriptor.expect_segment("disks").is_err());
    }

    #[test]
    fn test_parse_rejects_empty_segment() {
        let result = ResourceDescriptor::parse(
            "/subscriptions/sub//providers/Microsoft.Compute/galleries/g/images/i",
        );
        assert!(matches!(result, Err(CloudError::InvalidResourceId(_))));
    }

    #[test]
    fn test_parse_rejects_dangling_collection() {
        let result = ResourceDescriptor::parse(
            "/subscriptions/sub/resourceGroups/rg/providers/Microsoft.Compute/galleries/g/images",
        );
        assert!(matches!(result, Err(CloudError::InvalidResourceId(_))));
    }

    #[test]
    fn test_parse_rejects_wrong_head() {
        let result = ResourceDescriptor::parse(
            "/subscription/sub/resourceGroups/rg/providers/Microsoft.Compute/galleries/g/images/i",
        );
        assert!(matches!(result, Err(CloudError::InvalidResourceId(_))));
    }
}
