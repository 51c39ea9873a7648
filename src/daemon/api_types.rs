use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{PolicyTarget, RetentionPolicy, SchedulingPolicy, SourceKey};

#[derive(Debug, Deserialize)]
pub struct StatusResponse {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default, rename = "uptimeSeconds")]
    pub uptime_seconds: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RepoStatusResponse {
    #[serde(default)]
    pub connected: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub storage: Option<String>,
    #[serde(default)]
    pub encryption: Option<String>,
    #[serde(default)]
    pub hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceKeyWire {
    #[serde(rename = "userName")]
    pub user_name: String,
    pub host: String,
    pub path: String,
}

impl From<&SourceKey> for SourceKeyWire {
    fn from(key: &SourceKey) -> Self {
        Self {
            user_name: key.user_name.clone(),
            host: key.host.clone(),
            path: key.path.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SourcesResponse {
    #[serde(default)]
    pub sources: Vec<SourceEntry>,
}

#[derive(Debug, Deserialize)]
pub struct SourceEntry {
    pub source: SourceKeyWire,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "lastSnapshot")]
    pub last_snapshot: Option<SnapshotSummaryWire>,
    #[serde(default)]
    pub upload: Option<UploadProgressWire>,
}

#[derive(Debug, Deserialize)]
pub struct SnapshotSummaryWire {
    #[serde(default, rename = "id")]
    pub snapshot_id: Option<String>,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "endTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "totalBytes")]
    pub total_bytes: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct UploadProgressWire {
    #[serde(default, rename = "hashedBytes")]
    pub hashed_bytes: u64,
    #[serde(default, rename = "uploadedBytes")]
    pub uploaded_bytes: u64,
    #[serde(default, rename = "estimatedBytes")]
    pub estimated_bytes: Option<u64>,
    #[serde(default, rename = "hashedFiles")]
    pub hashed_files: u64,
    #[serde(default)]
    pub directory: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct TasksResponse {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

#[derive(Debug, Deserialize)]
pub struct TaskEntry {
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<TaskProgressWire>,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "endTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TaskProgressWire {
    #[serde(default)]
    pub percent: Option<f64>,
    #[serde(default)]
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct MountsResponse {
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
}

#[derive(Debug, Deserialize)]
pub struct MountEntry {
    pub root: String,
    pub path: String,
}

#[derive(Serialize)]
pub struct MountRequest<'a> {
    pub root: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyEntry {
    #[serde(default)]
    pub target: PolicyTarget,
    #[serde(default)]
    pub retention: Option<RetentionPolicy>,
    #[serde(default)]
    pub scheduling: Option<SchedulingPolicy>,
    #[serde(default)]
    pub compression: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteSnapshotsRequest {
    pub source: SourceKeyWire,
    #[serde(rename = "snapshotIds")]
    pub snapshot_ids: Vec<String>,
}

/// Query parameters addressing one snapshot source.
#[derive(Serialize)]
pub struct SourceQuery<'a> {
    #[serde(rename = "userName")]
    pub user_name: &'a str,
    pub host: &'a str,
    pub path: &'a str,
}

/// Query parameters addressing a policy target; absent fields select the
/// global default.
#[derive(Serialize)]
pub struct PolicyQuery<'a> {
    #[serde(rename = "userName", skip_serializing_if = "Option::is_none")]
    pub user_name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<&'a str>,
}

/// Body of a non-2xx response.
#[derive(Debug, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub error: String,
}

/// Positive acknowledgement with no payload.
#[derive(Debug, Deserialize, Default)]
pub struct Ack {}

/// One frame from the daemon's event stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum DaemonEvent {
    #[serde(rename = "task-progress")]
    TaskProgress(TaskProgressEvent),
    #[serde(rename = "snapshot-progress")]
    SnapshotProgress(SnapshotProgressEvent),
    #[serde(rename = "error")]
    Error(NotificationEvent),
    #[serde(rename = "notification")]
    Notification(NotificationEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskProgressEvent {
    pub id: String,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub progress: Option<TaskProgressWire>,
    #[serde(default, rename = "startTime")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "endTime")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, rename = "errorMessage")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotProgressEvent {
    pub source: SourceKeyWire,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub upload: Option<UploadProgressWire>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotificationEvent {
    #[serde(default)]
    pub severity: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_frames_decode_by_tag() {
        let frame = r#"{"type":"task-progress","id":"t1","status":"RUNNING"}"#;
        let event: DaemonEvent = serde_json::from_str(frame).expect("decode");
        assert!(matches!(event, DaemonEvent::TaskProgress(ev) if ev.id == "t1"));

        let frame = r#"{"type":"snapshot-progress","source":{"userName":"u","host":"h","path":"/p"},"status":"UPLOADING"}"#;
        let event: DaemonEvent = serde_json::from_str(frame).expect("decode");
        assert!(matches!(event, DaemonEvent::SnapshotProgress(_)));

        let frame = r#"{"type":"notification","message":"maintenance finished"}"#;
        let event: DaemonEvent = serde_json::from_str(frame).expect("decode");
        assert!(matches!(event, DaemonEvent::Notification(_)));
    }

    #[test]
    fn unrecognized_event_types_map_to_unknown() {
        let frame = r#"{"type":"metrics","payload":{}}"#;
        let event: DaemonEvent = serde_json::from_str(frame).expect("decode");
        assert!(matches!(event, DaemonEvent::Unknown));
    }
}
