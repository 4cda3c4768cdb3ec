//! HTTP client for the remote sandbox server.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{RemoteError, RemoteExecutor, RemoteRequest, RemoteResponse, MAX_ERROR_BODY};
use crate::config::RemoteConfig;

/// [`RemoteExecutor`] over reqwest.
///
/// Only the connect timeout lives on the client. The per-request bound is
/// applied by the caller so a timed-out request can be told apart from a
/// transport failure.
#[derive(Debug, Clone)]
pub struct HttpRemoteExecutor {
    client: Client,
    base_url: String,
}

impl HttpRemoteExecutor {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    pub fn with_client(client: Client, base_url: &str) -> Self {
        HttpRemoteExecutor {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

fn truncate_body(mut body: String) -> String {
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[async_trait]
impl RemoteExecutor for HttpRemoteExecutor {
    async fn execute(&self, request: RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        debug!(
            target = %request.target,
            session_id = request.session_id.as_deref().unwrap_or(""),
            with_setup = request.carries_setup(),
            "remote execute"
        );

        let response = self
            .client
            .post(self.url("/sandbox/execute"))
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        // Error statuses may still carry a well-formed result (e.g. the
        // expiry sentinel); prefer it over the bare status.
        match serde_json::from_str::<RemoteResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) if status.is_success() => Err(RemoteError::Decode(e.to_string())),
            Err(_) => Err(RemoteError::Status {
                status: status.as_u16(),
                body: truncate_body(body),
            }),
        }
    }

    async fn release(&self, session_id: &str) -> Result<(), RemoteError> {
        let response = self
            .client
            .delete(self.url(&format!("/sandbox/sessions/{session_id}")))
            .send()
            .await?;
        let status = response.status();

        // Already gone on the server side is as good as released
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            status: status.as_u16(),
            body: truncate_body(body),
        })
    }
}
