use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::Config;
use crate::error::ClientError;
use crate::model::{PolicyTarget, SourceKey};

use super::api_types::{
    Ack, ApiErrorBody, DeleteSnapshotsRequest, MountEntry, MountRequest, MountsResponse,
    PolicyEntry, PolicyQuery, RepoStatusResponse, SourceQuery, SourcesResponse, StatusResponse,
    TaskEntry, TasksResponse,
};
use super::DaemonApi;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(8);

/// HTTP client for the daemon's REST API. Pure I/O; holds no entity state.
#[derive(Clone)]
pub struct DaemonClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl DaemonClient {
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        let base_url = config.daemon_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ClientError::Config(
                "daemon URL must not be empty".to_string(),
            ));
        }

        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            base_url,
            token: config.api_token.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The event-stream endpoint, with the scheme swapped for WebSocket.
    pub fn websocket_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{ws_base}/api/v1/events")
    }

    async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        self.send_request(Method::GET, path, &(), None::<&()>).await
    }

    async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        self.send_request(Method::GET, path, query, None::<&()>)
            .await
    }

    async fn post_json<T, B>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.send_request(Method::POST, path, &(), Some(body)).await
    }

    async fn send_request<T, Q, B>(
        &self,
        method: Method,
        path: &str,
        query: &Q,
        body: Option<&B>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
        B: Serialize + ?Sized,
    {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let mut request = self.http.request(method, url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(ClientError::Http)?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let parsed: Option<ApiErrorBody> = serde_json::from_str(&text).ok();
            let code = parsed.as_ref().and_then(|b| b.code.clone());
            let message = parsed
                .map(|b| b.error)
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| format!("{path} returned {status}"));
            return Err(ClientError::Api {
                status: status.as_u16(),
                code,
                message,
            });
        }

        let bytes = response.bytes().await.map_err(ClientError::Http)?;
        serde_json::from_slice(&bytes).map_err(ClientError::Decode)
    }
}

fn source_query(key: &SourceKey) -> SourceQuery<'_> {
    SourceQuery {
        user_name: &key.user_name,
        host: &key.host,
        path: &key.path,
    }
}

fn policy_query(target: &PolicyTarget) -> PolicyQuery<'_> {
    PolicyQuery {
        user_name: target.user_name.as_deref(),
        host: target.host.as_deref(),
        path: target.path.as_deref(),
    }
}

#[async_trait]
impl DaemonApi for DaemonClient {
    async fn server_status(&self) -> Result<StatusResponse, ClientError> {
        self.get_json("/api/v1/status").await
    }

    async fn repository_status(&self) -> Result<RepoStatusResponse, ClientError> {
        self.get_json("/api/v1/repo/status").await
    }

    async fn list_sources(&self) -> Result<SourcesResponse, ClientError> {
        self.get_json("/api/v1/sources").await
    }

    async fn upload_source(&self, key: &SourceKey) -> Result<Ack, ClientError> {
        self.send_request(
            Method::POST,
            "/api/v1/sources/upload",
            &source_query(key),
            None::<&()>,
        )
        .await
    }

    async fn list_tasks(&self) -> Result<TasksResponse, ClientError> {
        self.get_json("/api/v1/tasks").await
    }

    async fn get_task(&self, id: &str) -> Result<TaskEntry, ClientError> {
        self.get_json(&format!("/api/v1/tasks/{id}")).await
    }

    async fn cancel_task(&self, id: &str) -> Result<TaskEntry, ClientError> {
        self.post_json(&format!("/api/v1/tasks/{id}/cancel"), &())
            .await
    }

    async fn list_mounts(&self) -> Result<MountsResponse, ClientError> {
        self.get_json("/api/v1/mounts").await
    }

    async fn create_mount(&self, root: &str) -> Result<MountEntry, ClientError> {
        self.post_json("/api/v1/mounts", &MountRequest { root }).await
    }

    async fn delete_mount(&self, root: &str) -> Result<Ack, ClientError> {
        self.send_request(
            Method::DELETE,
            &format!("/api/v1/mounts/{root}"),
            &(),
            None::<&()>,
        )
        .await
    }

    async fn get_policy(&self, target: &PolicyTarget) -> Result<PolicyEntry, ClientError> {
        self.get_json_with_query("/api/v1/policy", &policy_query(target))
            .await
    }

    async fn put_policy(&self, policy: &PolicyEntry) -> Result<Ack, ClientError> {
        self.send_request(Method::PUT, "/api/v1/policy", &(), Some(policy))
            .await
    }

    async fn delete_policy(&self, target: &PolicyTarget) -> Result<Ack, ClientError> {
        self.send_request(
            Method::DELETE,
            "/api/v1/policy",
            &policy_query(target),
            None::<&()>,
        )
        .await
    }

    async fn delete_snapshots(
        &self,
        request: &DeleteSnapshotsRequest,
    ) -> Result<Ack, ClientError> {
        self.post_json("/api/v1/snapshots/delete", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(url: &str) -> DaemonClient {
        let config = Config {
            daemon_url: url.to_string(),
            ..Config::default()
        };
        DaemonClient::new(&config).expect("client")
    }

    #[test]
    fn base_url_is_normalized() {
        let client = client_for("http://127.0.0.1:51515/");
        assert_eq!(client.base_url(), "http://127.0.0.1:51515");
    }

    #[test]
    fn websocket_url_swaps_scheme() {
        let client = client_for("http://127.0.0.1:51515");
        assert_eq!(
            client.websocket_url(),
            "ws://127.0.0.1:51515/api/v1/events"
        );

        let client = client_for("https://127.0.0.1:51515");
        assert_eq!(
            client.websocket_url(),
            "wss://127.0.0.1:51515/api/v1/events"
        );
    }

    #[test]
    fn empty_daemon_url_is_rejected() {
        let config = Config {
            daemon_url: "  ".to_string(),
            ..Config::default()
        };
        assert!(DaemonClient::new(&config).is_err());
    }
}
