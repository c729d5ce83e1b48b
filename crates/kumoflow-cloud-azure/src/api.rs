//! Management API plumbing
//!
//! Thin JSON-over-HTTP client for the Azure Resource Manager endpoint.
//! Bearer token authentication only; token acquisition and request signing
//! are out of scope (callers supply a valid token, e.g. from
//! `az account get-access-token`).

use crate::error::{AzureError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://management.azure.com";

/// Connection settings for the management endpoint.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub endpoint: String,
    pub subscription_id: String,
    pub token: String,
}

impl ClientOptions {
    pub fn new(subscription_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            subscription_id: subscription_id.into(),
            token: token.into(),
        }
    }

    /// Create options from environment variables.
    ///
    /// Reads `KUMOFLOW_AZURE_SUBSCRIPTION_ID` and `KUMOFLOW_AZURE_TOKEN`;
    /// `KUMOFLOW_AZURE_ENDPOINT` overrides the public endpoint.
    pub fn from_env() -> Result<Self> {
        let subscription_id = std::env::var("KUMOFLOW_AZURE_SUBSCRIPTION_ID").map_err(|_| {
            AzureError::MissingEnvVar("KUMOFLOW_AZURE_SUBSCRIPTION_ID".to_string())
        })?;
        let token = std::env::var("KUMOFLOW_AZURE_TOKEN")
            .map_err(|_| AzureError::MissingEnvVar("KUMOFLOW_AZURE_TOKEN".to_string()))?;
        let endpoint = std::env::var("KUMOFLOW_AZURE_ENDPOINT")
            .unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        Ok(Self {
            endpoint,
            subscription_id,
            token,
        })
    }
}

/// Shared HTTP client for management API calls.
#[derive(Clone)]
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    token: String,
}

impl ArmClient {
    pub fn new(options: &ClientOptions) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: options.endpoint.trim_end_matches('/').to_string(),
            subscription_id: options.subscription_id.clone(),
            token: options.token.clone(),
        }
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn url(&self, path: &str, api_version: &str) -> String {
        format!("{}{}?api-version={}", self.endpoint, path, api_version)
    }

    /// GET a resource representation.
    ///
    /// Returns `Ok(None)` when the service reports 404: not-found is a
    /// distinct outcome, never folded into the generic error path.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
    ) -> Result<Option<T>> {
        let url = self.url(path, api_version);
        tracing::debug!("GET {}", path);

        let response = self.http.get(&url).bearer_auth(&self.token).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status, response).await);
        }

        Ok(Some(response.json().await?))
    }

    /// PUT a resource representation. The response body is discarded:
    /// callers re-read the resource once it has converged.
    pub async fn put_json<B: Serialize>(
        &self,
        path: &str,
        api_version: &str,
        body: &B,
    ) -> Result<()> {
        let url = self.url(path, api_version);
        tracing::debug!("PUT {}", path);

        let response = self
            .http
            .put(&url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status, response).await);
        }
        Ok(())
    }

    /// DELETE a resource. Returns `false` when the service reported 404
    /// (already gone), `true` otherwise.
    pub async fn delete(&self, path: &str, api_version: &str) -> Result<bool> {
        let url = self.url(path, api_version);
        tracing::debug!("DELETE {}", path);

        let response = self
            .http
            .delete(&url)
            .bearer_auth(&self.token)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Self::api_error(status, response).await);
        }
        Ok(true)
    }

    async fn api_error(status: reqwest::StatusCode, response: reqwest::Response) -> AzureError {
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => AzureError::Api {
                status: status.as_u16(),
                code: envelope.error.code,
                message: envelope.error.message,
            },
            Err(_) => AzureError::Api {
                status: status.as_u16(),
                code: "Unknown".to_string(),
                message: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            },
        }
    }
}

/// Error envelope returned by the management endpoint.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_parsing() {
        let body = r#"{
            "error": {
                "code": "Conflict",
                "message": "Can not delete resource before nested resources are deleted."
            }
        }"#;

        let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.error.code, "Conflict");
        assert!(envelope.error.message.contains("nested resources"));
    }

    #[test]
    fn test_url_includes_api_version() {
        let client = ArmClient::new(&ClientOptions::new("sub-1", "token"));
        let url = client.url("/subscriptions/sub-1/resourceGroups/rg", "2019-07-01");
        assert_eq!(
            url,
            "https://management.azure.com/subscriptions/sub-1/resourceGroups/rg?api-version=2019-07-01"
        );
    }
}
