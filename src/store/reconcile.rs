use chrono::Utc;
use tracing::debug;

use crate::daemon::api_types::{SnapshotProgressEvent, TaskProgressEvent};
use crate::model::{
    SnapshotSource, SourceKey, SourceStatus, Task, TaskStatus, UploadProgress,
};

/// Merge a pushed task event into the polled task collection.
///
/// Terminal statuses are frozen: an event that would move a finished task
/// anywhere else is dropped, which protects against out-of-order delivery.
/// Returns whether the collection changed.
pub(crate) fn merge_task_progress(tasks: &mut Vec<Task>, event: TaskProgressEvent) -> bool {
    let incoming = TaskStatus::parse(&event.status);
    match tasks.iter_mut().find(|task| task.id == event.id) {
        Some(existing) => {
            if existing.status.is_terminal() {
                if incoming != existing.status {
                    debug!(
                        task = %event.id,
                        current = ?existing.status,
                        incoming = ?incoming,
                        "Dropping out-of-order event for finished task"
                    );
                }
                return false;
            }
            existing.status = incoming;
            if let Some(progress) = event.progress {
                existing.progress = Some(progress.into());
            }
            if let Some(message) = event.error_message {
                existing.error_message = Some(message);
            }
            if incoming.is_terminal() && existing.end_time.is_none() {
                existing.end_time = event.end_time.or_else(|| Some(Utc::now()));
            }
            true
        }
        None => {
            tasks.push(task_from_event(event, incoming));
            true
        }
    }
}

fn task_from_event(event: TaskProgressEvent, status: TaskStatus) -> Task {
    let end_time = if status.is_terminal() {
        event.end_time.or_else(|| Some(Utc::now()))
    } else {
        None
    };
    Task {
        id: event.id,
        kind: event.kind,
        status,
        progress: event.progress.map(Into::into),
        start_time: event.start_time,
        end_time,
        error_message: event.error_message,
    }
}

/// Merge a pushed upload event into the polled source collection.
///
/// Only the upload sub-object (and status, when present) is replaced; the
/// rest of the source entity is left untouched. Counters are cleared as
/// soon as the source is no longer uploading.
pub(crate) fn merge_snapshot_progress(
    sources: &mut Vec<SnapshotSource>,
    event: SnapshotProgressEvent,
) -> bool {
    let key = SourceKey::from(event.source);
    let status = event.status.as_deref().map(SourceStatus::parse);
    match sources.iter_mut().find(|source| source.key == key) {
        Some(existing) => {
            if let Some(status) = status {
                existing.status = status;
            }
            existing.upload = if existing.status == SourceStatus::Uploading {
                event.upload.map(UploadProgress::from)
            } else {
                None
            };
            true
        }
        None => {
            let status = status.unwrap_or(SourceStatus::Idle);
            let upload = if status == SourceStatus::Uploading {
                event.upload.map(UploadProgress::from)
            } else {
                None
            };
            sources.push(SnapshotSource {
                key,
                status,
                last_snapshot: None,
                upload,
            });
            true
        }
    }
}

/// Replace-or-insert a directly fetched task. The daemon's own answer is
/// authoritative, unlike a pushed event.
pub(crate) fn upsert_task(tasks: &mut Vec<Task>, task: Task) -> bool {
    match tasks.iter_mut().find(|existing| existing.id == task.id) {
        Some(existing) => {
            if *existing == task {
                return false;
            }
            *existing = task;
            true
        }
        None => {
            tasks.push(task);
            true
        }
    }
}
