//! REST boundary with the broker.
//!
//! Bearer-token authenticated JSON endpoints wrapped in the
//! conventional `{status, data, error_code}` envelope. The sync layer
//! uses these for room hydration after a join (persisted annotation
//! and chat backlogs) and for the transform write-through in
//! [`crate::persist`]; the realtime protocol never carries backlog.

#[cfg(test)]
#[path = "api_test.rs"]
mod tests;

use std::sync::Arc;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::CredentialSource;
use crate::error::SyncError;
use crate::types::{Annotation, ChatMessage, ModelTransform};

/// Success/error envelope used by every broker REST endpoint.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub status: String,
    pub data: Option<T>,
    pub error_code: Option<String>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, mapping an error envelope to [`SyncError::Api`].
    ///
    /// # Errors
    ///
    /// [`SyncError::Api`] when `status` is not `"ok"` or the payload is
    /// missing.
    pub fn into_data(self, path: &str) -> Result<T, SyncError> {
        if self.status != "ok" {
            return Err(SyncError::Api {
                path: path.to_owned(),
                code: self.error_code.unwrap_or_else(|| "unknown".to_owned()),
            });
        }
        self.data.ok_or_else(|| SyncError::Api {
            path: path.to_owned(),
            code: "missing-data".to_owned(),
        })
    }
}

/// REST client. Cheap to clone; the underlying pool is shared.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialSource>,
}

impl ApiClient {
    /// # Errors
    ///
    /// Returns [`SyncError::Http`] when the HTTP client cannot be
    /// built.
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialSource>) -> Result<Self, SyncError> {
        Ok(Self {
            http: reqwest::Client::builder().build()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            credentials,
        })
    }

    /// Unauthenticated health probe.
    ///
    /// # Errors
    ///
    /// [`SyncError::Api`] on a non-success status, [`SyncError::Http`]
    /// on transport failure.
    pub async fn health(&self) -> Result<(), SyncError> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.http.get(url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::Api {
                path: "/healthz".to_owned(),
                code: format!("http-{}", response.status().as_u16()),
            })
        }
    }

    /// Persisted annotations for a room, for hydration after join.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn list_annotations(&self, room_id: &str) -> Result<Vec<Annotation>, SyncError> {
        let path = format!("/api/rooms/{room_id}/annotations");
        self.request(reqwest::Method::GET, &path, None).await
    }

    /// Persisted chat backlog for a room, oldest first.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn list_messages(&self, room_id: &str) -> Result<Vec<ChatMessage>, SyncError> {
        let path = format!("/api/rooms/{room_id}/messages");
        self.request(reqwest::Method::GET, &path, None).await
    }

    /// Write-through of a settled model transform.
    ///
    /// # Errors
    ///
    /// See [`ApiClient::request`].
    pub async fn update_transform(
        &self,
        model_id: &str,
        transform: &ModelTransform,
    ) -> Result<(), SyncError> {
        let path = format!("/api/models/{model_id}/transform");
        let body = serde_json::to_value(transform).unwrap_or(Value::Null);
        let _: Value = self
            .request(reqwest::Method::PATCH, &path, Some(body))
            .await?;
        Ok(())
    }

    /// Authenticated JSON request with envelope decoding.
    ///
    /// # Errors
    ///
    /// [`SyncError::MissingCredential`] when no token is available,
    /// [`SyncError::Http`] on transport failure, [`SyncError::Api`] on
    /// an error envelope.
    async fn request<T: DeserializeOwned>(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, SyncError> {
        let token = self
            .credentials
            .token()
            .ok_or(SyncError::MissingCredential)?;

        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(json) = body {
            request = request.json(&json);
        }

        let envelope = request.send().await?.json::<Envelope<T>>().await?;
        envelope.into_data(path)
    }
}
