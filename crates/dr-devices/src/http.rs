//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Device command client and device document models."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::client::{CommandError, DeviceCommandClient};
use crate::model::{CommandBatch, DeviceCommand, DeviceSnapshot, DeviceStatus, DEFAULT_COMPONENT};

/// [`DeviceCommandClient`] backed by the REST device API.
///
/// One instance carries one bearer token; the underlying connection pool can
/// be shared between instances through [`HttpDeviceClient::with_client`].
#[derive(Clone)]
pub struct HttpDeviceClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl HttpDeviceClient {
    /// Build a client with its own connection pool and request timeout.
    pub fn new(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CommandError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CommandError::new(format!("failed to build http client: {err}")))?;
        Self::with_client(http, base_url, token)
    }

    /// Build a client on top of an existing connection pool.
    pub fn with_client(
        http: Client,
        base_url: &str,
        token: impl Into<String>,
    ) -> Result<Self, CommandError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| CommandError::new(format!("invalid device api url '{base_url}': {err}")))?;
        if base_url.cannot_be_a_base() {
            return Err(CommandError::new(format!(
                "device api url '{base_url}' cannot carry a path"
            )));
        }
        Ok(Self {
            http,
            base_url,
            token: token.into(),
        })
    }

    fn device_url(&self, device_id: &str, suffix: Option<&str>) -> Result<Url, CommandError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| CommandError::new("device api url cannot carry a path"))?;
            segments.pop_if_empty().push("devices").push(device_id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, CommandError> {
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let response = ensure_success(response)?;
        response.json::<T>().await.map_err(CommandError::from)
    }
}

fn ensure_success(response: Response) -> Result<Response, CommandError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CommandError::new(format!(
            "request failed with status code {}",
            status.as_u16()
        )))
    }
}

impl fmt::Debug for HttpDeviceClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpDeviceClient")
            .field("base_url", &self.base_url.as_str())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DeviceCommandClient for HttpDeviceClient {
    async fn execute(
        &self,
        device_id: &str,
        component: &str,
        capability: &str,
        command: &str,
        arguments: &[Value],
    ) -> Result<(), CommandError> {
        let component = if component.is_empty() {
            DEFAULT_COMPONENT
        } else {
            component
        };
        let body = CommandBatch::single(DeviceCommand {
            component: component.to_owned(),
            capability: capability.to_owned(),
            command: command.to_owned(),
            arguments: arguments.to_vec(),
        });
        let url = self.device_url(device_id, Some("commands"))?;
        debug!(device = %device_id, %capability, %command, "sending device command");
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await?;
        ensure_success(response)?;
        Ok(())
    }

    async fn get(&self, device_id: &str) -> Result<DeviceSnapshot, CommandError> {
        let url = self.device_url(device_id, None)?;
        self.get_json(url).await
    }

    async fn status(&self, device_id: &str) -> Result<DeviceStatus, CommandError> {
        let url = self.device_url(device_id, Some("status"))?;
        self.get_json(url).await
    }
}
