//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;

use crate::client::{CommandError, SharedDeviceClient};
use crate::http::HttpDeviceClient;

/// Builds a device client for an installation's bearer token.
pub trait ClientFactory: Send + Sync + 'static {
    /// Client authorised with `token`.
    fn client_for(&self, token: &str) -> Result<SharedDeviceClient, CommandError>;
}

/// Produces [`HttpDeviceClient`]s sharing one connection pool.
#[derive(Debug, Clone)]
pub struct HttpClientFactory {
    http: Client,
    base_url: String,
}

impl HttpClientFactory {
    /// Factory for `base_url` with a per-request `timeout`.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, CommandError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CommandError::new(format!("failed to build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

impl ClientFactory for HttpClientFactory {
    fn client_for(&self, token: &str) -> Result<SharedDeviceClient, CommandError> {
        let client = HttpDeviceClient::with_client(self.http.clone(), &self.base_url, token)?;
        Ok(Arc::new(client))
    }
}

/// Hands out the same client regardless of token.
#[derive(Clone)]
pub struct StaticClientFactory {
    client: SharedDeviceClient,
}

impl StaticClientFactory {
    /// Always return `client`.
    pub fn new(client: SharedDeviceClient) -> Self {
        Self { client }
    }
}

impl ClientFactory for StaticClientFactory {
    fn client_for(&self, _token: &str) -> Result<SharedDeviceClient, CommandError> {
        Ok(self.client.clone())
    }
}
