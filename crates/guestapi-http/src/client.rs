//! Request/response client backed by a `hyper` HTTP/1.1 connection over the
//! guest socket.
//!
//! Every call dials the socket, runs exactly one exchange and drops the
//! connection. No retries are attempted.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::{header, Method, Request, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;

use guestapi_core::config::ClientConfig;
use guestapi_core::error::GuestError;
use guestapi_core::instance::{Devices, InstanceInfo};
use guestapi_core::paths::{
    self, API_ROOT, CONFIG_PATH, DEVICES_PATH, METADATA_PATH, SOCKET_AUTHORITY,
};
use guestapi_core::transport::{Connector, UnixConnector};

/// Client for the one-shot endpoints of the guest API.
#[derive(Debug, Clone)]
pub struct GuestClient<C = UnixConnector> {
    connector: C,
    request_timeout: Option<Duration>,
}

impl GuestClient<UnixConnector> {
    /// Client for the default socket, `/dev/incus/sock`.
    pub fn new() -> Self {
        Self::from_config(&ClientConfig::default())
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            connector: UnixConnector::new(&config.socket_path),
            request_timeout: config.request_timeout,
        }
    }
}

impl Default for GuestClient<UnixConnector> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connector> GuestClient<C> {
    /// Client over a custom transport.
    pub fn with_connector(connector: C) -> Self {
        Self {
            connector,
            request_timeout: None,
        }
    }

    /// Bound every round trip by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Information about the API and instance state.
    pub async fn info(&self) -> Result<InstanceInfo, GuestError> {
        self.get_json(API_ROOT).await
    }

    /// Every config key available to the instance.
    pub async fn list_config(&self) -> Result<Vec<String>, GuestError> {
        self.get_json(CONFIG_PATH).await
    }

    /// Devices attached to the instance.
    pub async fn devices(&self) -> Result<Devices, GuestError> {
        self.get_json(DEVICES_PATH).await
    }

    /// Value of a config key, or an empty string if the host does not have it.
    ///
    /// Instances can only read `user.*` and `cloud-init.*` keys, so a bare key
    /// is looked up as `user.<key>`.
    pub async fn config(&self, key: &str) -> Result<String, GuestError> {
        let target = paths::config_key_path(key)?;
        let (status, body) = self.exchange(Method::GET, &target).await?;
        match status {
            StatusCode::OK => body_to_string(body),
            StatusCode::NOT_FOUND => {
                tracing::debug!(key, "config key not set");
                Ok(String::new())
            }
            other => Err(GuestError::UnexpectedStatus {
                status: other.as_u16(),
            }),
        }
    }

    /// Whether a config key exists. Bare keys are qualified as in [`GuestClient::config`].
    pub async fn has_config(&self, key: &str) -> Result<bool, GuestError> {
        let target = paths::config_key_path(key)?;
        let (status, _) = self.exchange(Method::HEAD, &target).await?;
        match status {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            other => Err(GuestError::UnexpectedStatus {
                status: other.as_u16(),
            }),
        }
    }

    /// Value of a config key that must be present and non-blank.
    pub async fn require_config(&self, key: &str) -> Result<String, GuestError> {
        let value = self.config(key).await?;
        if value.is_empty() {
            return Err(GuestError::MissingConfig {
                key: paths::qualify_config_key(key).into_owned(),
            });
        }
        Ok(value)
    }

    /// The instance's cloud-init meta-data document.
    pub async fn metadata(&self) -> Result<String, GuestError> {
        let body = self.get_ok(METADATA_PATH).await?;
        body_to_string(body)
    }

    async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T, GuestError> {
        let body = self.get_ok(target).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn get_ok(&self, target: &str) -> Result<Bytes, GuestError> {
        let (status, body) = self.exchange(Method::GET, target).await?;
        if status != StatusCode::OK {
            return Err(GuestError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }
        Ok(body)
    }

    async fn exchange(&self, method: Method, target: &str) -> Result<(StatusCode, Bytes), GuestError> {
        match self.request_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.exchange_once(method, target))
                .await
                .map_err(|_| {
                    tracing::debug!(ms = timeout.as_millis() as u64, target, "guest API call timed out");
                    GuestError::Timeout {
                        ms: timeout.as_millis() as u64,
                    }
                })?,
            None => self.exchange_once(method, target).await,
        }
    }

    async fn exchange_once(
        &self,
        method: Method,
        target: &str,
    ) -> Result<(StatusCode, Bytes), GuestError> {
        let io = self.connector.connect().await?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(io))
            .await
            .map_err(|e| GuestError::Http(e.to_string()))?;

        tokio::spawn(async move {
            if let Err(err) = conn.await {
                tracing::debug!(error = %err, "guest socket connection ended with error");
            }
        });

        let req = Request::builder()
            .method(method.clone())
            .uri(target)
            .header(header::HOST, SOCKET_AUTHORITY)
            .body(Empty::<Bytes>::new())
            .map_err(|e| GuestError::Http(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| GuestError::Http(e.to_string()))?;
        let status = resp.status();

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| GuestError::Read(e.to_string()))?
            .to_bytes();

        tracing::debug!(
            method = %method,
            target,
            status = status.as_u16(),
            bytes = body.len(),
            endpoint = %self.connector.endpoint(),
            "guest API call"
        );
        Ok((status, body))
    }
}

fn body_to_string(body: Bytes) -> Result<String, GuestError> {
    String::from_utf8(body.to_vec()).map_err(|e| GuestError::Read(e.to_string()))
}
