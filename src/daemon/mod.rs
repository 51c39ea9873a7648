pub mod api_types;
mod client;
mod events;

pub use client::DaemonClient;
pub use events::{connect_events, run_event_loop, EventStream};

use async_trait::async_trait;

use crate::error::ClientError;
use crate::model::{PolicyTarget, SourceKey};

use api_types::{
    Ack, DeleteSnapshotsRequest, MountEntry, MountsResponse, PolicyEntry, RepoStatusResponse,
    SourcesResponse, StatusResponse, TaskEntry, TasksResponse,
};

/// The daemon's request/response surface.
///
/// The synchronization engine only ever talks to this trait, so tests can
/// drive it against an in-memory fake instead of a live daemon.
#[async_trait]
pub trait DaemonApi: Send + Sync {
    async fn server_status(&self) -> Result<StatusResponse, ClientError>;
    async fn repository_status(&self) -> Result<RepoStatusResponse, ClientError>;

    async fn list_sources(&self) -> Result<SourcesResponse, ClientError>;
    async fn upload_source(&self, key: &SourceKey) -> Result<Ack, ClientError>;

    async fn list_tasks(&self) -> Result<TasksResponse, ClientError>;
    async fn get_task(&self, id: &str) -> Result<TaskEntry, ClientError>;
    async fn cancel_task(&self, id: &str) -> Result<TaskEntry, ClientError>;

    async fn list_mounts(&self) -> Result<MountsResponse, ClientError>;
    async fn create_mount(&self, root: &str) -> Result<MountEntry, ClientError>;
    async fn delete_mount(&self, root: &str) -> Result<Ack, ClientError>;

    async fn get_policy(&self, target: &PolicyTarget) -> Result<PolicyEntry, ClientError>;
    async fn put_policy(&self, policy: &PolicyEntry) -> Result<Ack, ClientError>;
    async fn delete_policy(&self, target: &PolicyTarget) -> Result<Ack, ClientError>;

    async fn delete_snapshots(&self, request: &DeleteSnapshotsRequest)
        -> Result<Ack, ClientError>;
}
