use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::daemon::api_types::{
    MountEntry, PolicyEntry, RepoStatusResponse, SourceEntry, SourceKeyWire, StatusResponse,
    TaskEntry, TaskProgressWire, UploadProgressWire,
};

/// Reachability and identity of the daemon process itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ServerStatus {
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
}

impl ServerStatus {
    pub(crate) fn from_wire(response: StatusResponse, url: Option<&str>) -> Self {
        Self {
            running: true,
            url: url.map(str::to_string),
            port: url.and_then(port_of),
            version: response.version,
            uptime_seconds: response.uptime_seconds,
        }
    }
}

fn port_of(url: &str) -> Option<u16> {
    let after_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let authority = after_scheme.split(['/', '?']).next().unwrap_or(after_scheme);
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Connection state of the repository behind the daemon.
///
/// Storage metadata only exists on the connected variant, so a disconnected
/// repository can never carry stale fields from a previous connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RepositoryStatus {
    Disconnected,
    Connected(RepositoryInfo),
}

impl Default for RepositoryStatus {
    fn default() -> Self {
        RepositoryStatus::Disconnected
    }
}

impl RepositoryStatus {
    pub fn connected(&self) -> bool {
        matches!(self, RepositoryStatus::Connected(_))
    }

    pub(crate) fn from_wire(response: RepoStatusResponse) -> Self {
        if !response.connected {
            return RepositoryStatus::Disconnected;
        }
        RepositoryStatus::Connected(RepositoryInfo {
            description: response.description,
            storage: response.storage,
            encryption: response.encryption,
            hash: response.hash,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepositoryInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// Composite identity of a snapshot source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceKey {
    pub user_name: String,
    pub host: String,
    pub path: String,
}

impl fmt::Display for SourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user_name, self.host, self.path)
    }
}

impl From<SourceKeyWire> for SourceKey {
    fn from(wire: SourceKeyWire) -> Self {
        Self {
            user_name: wire.user_name,
            host: wire.host,
            path: wire.path,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Idle,
    Pending,
    Uploading,
    Paused,
    Failed,
}

impl SourceStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "PENDING" => SourceStatus::Pending,
            "UPLOADING" => SourceStatus::Uploading,
            "PAUSED" => SourceStatus::Paused,
            "FAILED" => SourceStatus::Failed,
            _ => SourceStatus::Idle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSource {
    pub key: SourceKey,
    pub status: SourceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<SnapshotSummary>,
    /// Live counters; only populated while an upload runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadProgress>,
}

impl SnapshotSource {
    pub(crate) fn from_wire(entry: SourceEntry) -> Self {
        let status = SourceStatus::parse(&entry.status);
        let upload = if status == SourceStatus::Uploading {
            entry.upload.map(UploadProgress::from)
        } else {
            None
        };
        Self {
            key: SourceKey::from(entry.source),
            status,
            last_snapshot: entry.last_snapshot.map(|wire| SnapshotSummary {
                snapshot_id: wire.snapshot_id,
                start_time: wire.start_time,
                end_time: wire.end_time,
                total_bytes: wire.total_bytes,
                error: wire.error,
            }),
            upload,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SnapshotSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UploadProgress {
    pub hashed_bytes: u64,
    pub uploaded_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_bytes: Option<u64>,
    pub hashed_files: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<String>,
}

impl From<UploadProgressWire> for UploadProgress {
    fn from(wire: UploadProgressWire) -> Self {
        Self {
            hashed_bytes: wire.hashed_bytes,
            uploaded_bytes: wire.uploaded_bytes,
            estimated_bytes: wire.estimated_bytes,
            hashed_files: wire.hashed_files,
            directory: wire.directory,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Canceling,
    Canceled,
    Success,
    Failed,
}

impl TaskStatus {
    pub(crate) fn parse(raw: &str) -> Self {
        match raw {
            "CANCELING" => TaskStatus::Canceling,
            "CANCELED" => TaskStatus::Canceled,
            "SUCCESS" => TaskStatus::Success,
            "FAILED" => TaskStatus::Failed,
            _ => TaskStatus::Running,
        }
    }

    /// Terminal statuses admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Canceled | TaskStatus::Success | TaskStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// Set exactly once, at the terminal transition. The authoritative
    /// completion signal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Task {
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }

    pub(crate) fn from_wire(entry: TaskEntry) -> Self {
        Self {
            id: entry.id,
            kind: entry.kind,
            status: TaskStatus::parse(&entry.status),
            progress: entry.progress.map(TaskProgress::from),
            start_time: entry.start_time,
            end_time: entry.end_time,
            error_message: entry.error_message,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TaskProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
}

impl From<TaskProgressWire> for TaskProgress {
    fn from(wire: TaskProgressWire) -> Self {
        Self {
            percent: wire.percent,
            counters: wire.counters,
        }
    }
}

/// A snapshot exposed as a local filesystem path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mount {
    pub root: String,
    pub mount_path: String,
}

impl Mount {
    pub(crate) fn from_wire(entry: MountEntry) -> Self {
        Self {
            root: entry.root,
            mount_path: entry.path,
        }
    }
}

/// Policy target; the fully-empty triple addresses the global default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyTarget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl PolicyTarget {
    pub fn global() -> Self {
        Self::default()
    }

    pub fn is_global(&self) -> bool {
        self.user_name.is_none() && self.host.is_none() && self.path.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Policy {
    pub target: PolicyTarget,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention: Option<RetentionPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<SchedulingPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<String>,
}

impl Policy {
    pub(crate) fn from_wire(entry: PolicyEntry) -> Self {
        Self {
            target: entry.target,
            retention: entry.retention,
            scheduling: entry.scheduling,
            compression: entry.compression,
        }
    }

    pub(crate) fn into_wire(self) -> PolicyEntry {
        PolicyEntry {
            target: self.target,
            retention: self.retention,
            scheduling: self.scheduling,
            compression: self.compression,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_latest: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub times: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_extracted_from_url() {
        assert_eq!(port_of("http://127.0.0.1:51515"), Some(51515));
        assert_eq!(port_of("http://127.0.0.1:51515/api"), Some(51515));
        assert_eq!(port_of("http://localhost"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Running.is_terminal());
        assert!(!TaskStatus::Canceling.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Success.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
    }

    #[test]
    fn global_policy_target() {
        assert!(PolicyTarget::global().is_global());
        let scoped = PolicyTarget {
            host: Some("laptop".to_string()),
            ..PolicyTarget::default()
        };
        assert!(!scoped.is_global());
    }
}
