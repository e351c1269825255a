//! Pusher Channels REST publisher.
//!
//! Events are triggered with `POST /apps/{app_id}/events` on
//! `api-{cluster}.pusher.com`. Each request is authenticated by query
//! parameters: `auth_key`, `auth_timestamp`, `auth_version=1.0`, the hex MD5
//! of the body, and `auth_signature`, the hex HMAC-SHA256 of
//!
//! ```text
//! POST\n/apps/{app_id}/events\n<sorted query string>
//! ```
//!
//! keyed with the application secret.

use std::fmt;
use std::time::Duration;

use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use reqwest::header::CONTENT_TYPE;
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;

use crate::error::PublishError;
use crate::sink::{Publication, PublishSink};

type HmacSha256 = Hmac<Sha256>;

/// Per-request timeout for publish calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Protocol version sent as `auth_version`.
const AUTH_VERSION: &str = "1.0";

/// Pusher application credentials.
#[derive(Clone)]
pub struct PusherCredentials {
    /// Application id.
    pub app_id: String,
    /// Application key.
    pub key: String,
    /// Application secret.
    pub secret: String,
    /// Cluster name, e.g. `eu` or `mt1`.
    pub cluster: String,
    /// Use HTTPS.
    pub secure: bool,
}

impl fmt::Debug for PusherCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PusherCredentials")
            .field("app_id", &self.app_id)
            .field("key", &self.key)
            .field("secret", &"[REDACTED]")
            .field("cluster", &self.cluster)
            .field("secure", &self.secure)
            .finish()
    }
}

impl PusherCredentials {
    /// REST API host for the configured cluster.
    pub fn host(&self) -> String {
        format!("api-{}.pusher.com", self.cluster)
    }

    /// Base URL including scheme.
    pub fn base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}", self.host())
    }

    /// Path for the trigger-event endpoint.
    pub fn events_path(&self) -> String {
        format!("/apps/{}/events", self.app_id)
    }
}

#[derive(Serialize)]
struct TriggerBody<'a> {
    name: &'a str,
    channels: [&'a str; 1],
    data: &'a str,
}

/// Serialize the trigger-event body for one publication.
///
/// # Errors
///
/// Returns [`PublishError::Serialization`] if encoding fails.
pub fn event_body(publication: &Publication) -> Result<String, PublishError> {
    Ok(serde_json::to_string(&TriggerBody {
        name: &publication.event,
        channels: [&publication.channel],
        data: &publication.payload,
    })?)
}

/// Lowercase hex MD5 of the request body.
pub fn body_md5(body: &str) -> String {
    hex::encode(Md5::digest(body.as_bytes()))
}

/// Authentication query parameters, sorted by key, without the signature.
pub fn auth_query(key: &str, timestamp: i64, body_md5: &str) -> String {
    format!(
        "auth_key={key}&auth_timestamp={timestamp}&auth_version={AUTH_VERSION}&body_md5={body_md5}"
    )
}

/// The string the signature covers.
pub fn string_to_sign(method: &str, path: &str, query: &str) -> String {
    format!("{method}\n{path}\n{query}")
}

/// Hex HMAC-SHA256 of `message` keyed with `secret`.
///
/// # Errors
///
/// Returns [`PublishError::Signing`] if the MAC cannot be keyed.
pub fn sign(secret: &str, message: &str) -> Result<String, PublishError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PublishError::Signing(e.to_string()))?;
    mac.update(message.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Publishes tally updates to Pusher Channels.
#[derive(Debug)]
pub struct PusherSink {
    client: reqwest::Client,
    credentials: PusherCredentials,
    base_url: String,
}

impl PusherSink {
    /// Create a sink for the given application.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if the HTTP client cannot be built.
    pub fn new(credentials: PusherCredentials) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| PublishError::Transport(format!("failed to build HTTP client: {e}")))?;
        let base_url = credentials.base_url();

        Ok(Self {
            client,
            credentials,
            base_url,
        })
    }

    /// Send requests to a different base URL (scheme and host).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Full signed URL for a body sent at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Signing`] if signing fails.
    pub fn signed_url(&self, body: &str, timestamp: i64) -> Result<String, PublishError> {
        let path = self.credentials.events_path();
        let query = auth_query(&self.credentials.key, timestamp, &body_md5(body));
        let signature = sign(
            &self.credentials.secret,
            &string_to_sign("POST", &path, &query),
        )?;
        Ok(format!(
            "{}{path}?{query}&auth_signature={signature}",
            self.base_url
        ))
    }
}

impl PublishSink for PusherSink {
    fn name(&self) -> &str {
        "pusher"
    }

    async fn publish(&self, publication: &Publication) -> Result<(), PublishError> {
        let body = event_body(publication)?;
        let url = self.signed_url(&body, chrono::Utc::now().timestamp())?;

        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| PublishError::Transport(format!("request to Pusher failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read error body".to_owned());
            return Err(PublishError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        debug!(
            channel = %publication.channel,
            event = %publication.event,
            sequence = publication.sequence,
            "published to Pusher"
        );
        Ok(())
    }
}
