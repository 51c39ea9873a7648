mod reconcile;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::config::{Config, PollingIntervals};
use crate::daemon::api_types::{
    DaemonEvent, DeleteSnapshotsRequest, NotificationEvent, SourceKeyWire,
};
use crate::daemon::DaemonApi;
use crate::error::NormalizedError;
use crate::model::{
    Mount, Policy, PolicyTarget, RepositoryStatus, ServerStatus, SnapshotSource, SourceKey,
    SourceStatus, Task,
};
use crate::polling::{AdaptivePoller, AdaptivePollerBuilder, Poller, PollerBuilder};

const NOTICE_CHANNEL_CAPACITY: usize = 64;

/// Read-model slice for one entity family.
#[derive(Debug, Clone)]
pub struct FamilyState<T> {
    pub value: T,
    /// True until the family's first fetch settles.
    pub loading: bool,
    pub error: Option<NormalizedError>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

impl<T: Default> Default for FamilyState<T> {
    fn default() -> Self {
        Self {
            value: T::default(),
            loading: true,
            error: None,
            refreshed_at: None,
        }
    }
}

/// Daemon-originated notification, forwarded verbatim to subscribers.
#[derive(Debug, Clone)]
pub struct Notice {
    pub severity: NoticeSeverity,
    pub message: String,
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeSeverity {
    Info,
    Error,
}

impl Notice {
    fn from_event(event: NotificationEvent, fallback: NoticeSeverity) -> Self {
        let severity = match event.severity.as_deref() {
            Some(raw) if raw.eq_ignore_ascii_case("error") => NoticeSeverity::Error,
            Some(_) => NoticeSeverity::Info,
            None => fallback,
        };
        Self {
            severity,
            message: event.message,
            details: event.details,
        }
    }
}

/// The single authoritative in-memory representation of daemon state.
///
/// One polling controller per entity family keeps the read-model current;
/// the event reconciler merges WebSocket pushes into the same entities.
/// Entities are only ever written here: consumers hold watch receivers and
/// immutable snapshots.
pub struct SyncedStore {
    inner: Arc<StoreInner>,
}

impl Clone for SyncedStore {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct StoreInner {
    api: Arc<dyn DaemonApi>,
    intervals: PollingIntervals,
    server: watch::Sender<FamilyState<ServerStatus>>,
    repository: watch::Sender<FamilyState<RepositoryStatus>>,
    sources: watch::Sender<FamilyState<Vec<SnapshotSource>>>,
    tasks: watch::Sender<FamilyState<Vec<Task>>>,
    mounts: watch::Sender<FamilyState<Vec<Mount>>>,
    ws_connected: watch::Sender<bool>,
    notices: broadcast::Sender<Notice>,
    pollers: StorePollers,
}

struct StorePollers {
    server: Poller<ServerStatus>,
    repository: Poller<RepositoryStatus>,
    sources: AdaptivePoller<Vec<SnapshotSource>>,
    tasks: AdaptivePoller<Vec<Task>>,
    mounts: Poller<Vec<Mount>>,
}

impl SyncedStore {
    pub fn new(api: Arc<dyn DaemonApi>, config: &Config) -> Self {
        let (server, _) = watch::channel(FamilyState::default());
        let (repository, _) = watch::channel(FamilyState::default());
        let (sources, _) = watch::channel(FamilyState::default());
        let (tasks, _) = watch::channel(FamilyState::default());
        let (mounts, _) = watch::channel(FamilyState::default());
        let (ws_connected, _) = watch::channel(false);
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);

        let pollers = build_pollers(
            &api,
            config,
            &server,
            &repository,
            &sources,
            &tasks,
            &mounts,
        );

        Self {
            inner: Arc::new(StoreInner {
                api,
                intervals: config.polling.clone(),
                server,
                repository,
                sources,
                tasks,
                mounts,
                ws_connected,
                notices,
                pollers,
            }),
        }
    }

    /// Start every family's polling controller. They run for the store's
    /// lifetime; the event stream only modulates their cadence.
    pub fn start(&self) {
        self.inner.pollers.server.start();
        self.inner.pollers.repository.start();
        self.inner.pollers.sources.start();
        self.inner.pollers.tasks.start();
        self.inner.pollers.mounts.start();
        info!("Synchronized store started");
    }

    pub fn stop(&self) {
        self.inner.pollers.server.stop();
        self.inner.pollers.repository.stop();
        self.inner.pollers.sources.stop();
        self.inner.pollers.tasks.stop();
        self.inner.pollers.mounts.stop();
    }

    // Read side: snapshots and subscriptions per family.

    pub fn server_status(&self) -> FamilyState<ServerStatus> {
        self.inner.server.borrow().clone()
    }

    pub fn watch_server_status(&self) -> watch::Receiver<FamilyState<ServerStatus>> {
        self.inner.server.subscribe()
    }

    pub fn repository_status(&self) -> FamilyState<RepositoryStatus> {
        self.inner.repository.borrow().clone()
    }

    pub fn watch_repository_status(&self) -> watch::Receiver<FamilyState<RepositoryStatus>> {
        self.inner.repository.subscribe()
    }

    pub fn sources(&self) -> FamilyState<Vec<SnapshotSource>> {
        self.inner.sources.borrow().clone()
    }

    pub fn watch_sources(&self) -> watch::Receiver<FamilyState<Vec<SnapshotSource>>> {
        self.inner.sources.subscribe()
    }

    pub fn tasks(&self) -> FamilyState<Vec<Task>> {
        self.inner.tasks.borrow().clone()
    }

    pub fn watch_tasks(&self) -> watch::Receiver<FamilyState<Vec<Task>>> {
        self.inner.tasks.subscribe()
    }

    pub fn mounts(&self) -> FamilyState<Vec<Mount>> {
        self.inner.mounts.borrow().clone()
    }

    pub fn watch_mounts(&self) -> watch::Receiver<FamilyState<Vec<Mount>>> {
        self.inner.mounts.subscribe()
    }

    pub fn is_websocket_connected(&self) -> bool {
        *self.inner.ws_connected.borrow()
    }

    pub fn watch_websocket_connected(&self) -> watch::Receiver<bool> {
        self.inner.ws_connected.subscribe()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    // Refresh side. Each call resolves once the family's (deduplicated)
    // in-flight fetch completes and never returns an error: failures are
    // captured in the returned state's `error` field.

    pub async fn refresh_server_status(&self) -> FamilyState<ServerStatus> {
        self.inner.pollers.server.fetch_now().await;
        self.server_status()
    }

    pub async fn refresh_repository_status(&self) -> FamilyState<RepositoryStatus> {
        self.inner.pollers.repository.fetch_now().await;
        self.repository_status()
    }

    pub async fn refresh_sources(&self) -> FamilyState<Vec<SnapshotSource>> {
        self.inner.pollers.sources.fetch_now().await;
        self.sources()
    }

    pub async fn refresh_tasks(&self) -> FamilyState<Vec<Task>> {
        self.inner.pollers.tasks.fetch_now().await;
        self.tasks()
    }

    pub async fn refresh_mounts(&self) -> FamilyState<Vec<Mount>> {
        self.inner.pollers.mounts.fetch_now().await;
        self.mounts()
    }

    // Mutations. These do surface failure: the caller initiated the action
    // and needs the outcome. Each converges the read-model right after by
    // going through the same deduplicated refresh path polling uses.

    pub async fn create_snapshot(&self, key: &SourceKey) -> Result<(), NormalizedError> {
        self.inner
            .api
            .upload_source(key)
            .await
            .map_err(NormalizedError::from)?;
        self.refresh_sources().await;
        Ok(())
    }

    pub async fn cancel_task(&self, id: &str) -> Result<(), NormalizedError> {
        self.inner
            .api
            .cancel_task(id)
            .await
            .map_err(NormalizedError::from)?;
        self.refresh_tasks().await;
        Ok(())
    }

    pub async fn mount_snapshot(&self, root: &str) -> Result<Mount, NormalizedError> {
        let entry = self
            .inner
            .api
            .create_mount(root)
            .await
            .map_err(NormalizedError::from)?;
        let mount = Mount::from_wire(entry);
        self.refresh_mounts().await;
        Ok(mount)
    }

    pub async fn unmount_snapshot(&self, root: &str) -> Result<(), NormalizedError> {
        self.inner
            .api
            .delete_mount(root)
            .await
            .map_err(NormalizedError::from)?;
        self.refresh_mounts().await;
        Ok(())
    }

    pub async fn delete_snapshots(
        &self,
        key: &SourceKey,
        snapshot_ids: Vec<String>,
    ) -> Result<(), NormalizedError> {
        let request = DeleteSnapshotsRequest {
            source: SourceKeyWire::from(key),
            snapshot_ids,
        };
        self.inner
            .api
            .delete_snapshots(&request)
            .await
            .map_err(NormalizedError::from)?;
        self.refresh_sources().await;
        Ok(())
    }

    // Policies are edited interactively and resolved server-side, so they
    // are fetched on demand instead of continuously polled.

    /// `Ok(None)` when no policy has ever been saved for the target — an
    /// expected state, not a failure.
    pub async fn policy(&self, target: &PolicyTarget) -> Result<Option<Policy>, NormalizedError> {
        match self.inner.api.get_policy(target).await {
            Ok(entry) => Ok(Some(Policy::from_wire(entry))),
            Err(err) => {
                let normalized = NormalizedError::from(err);
                if normalized.is_not_found() {
                    Ok(None)
                } else {
                    Err(normalized)
                }
            }
        }
    }

    pub async fn set_policy(&self, policy: Policy) -> Result<(), NormalizedError> {
        self.inner
            .api
            .put_policy(&policy.into_wire())
            .await
            .map_err(NormalizedError::from)?;
        Ok(())
    }

    pub async fn delete_policy(&self, target: &PolicyTarget) -> Result<(), NormalizedError> {
        self.inner
            .api
            .delete_policy(target)
            .await
            .map_err(NormalizedError::from)?;
        Ok(())
    }

    /// Follow one task at a close cadence until it finishes. The returned
    /// controller stops itself on the first fetch where `end_time` is set;
    /// updates flow into the shared task collection.
    pub fn track_task(&self, id: impl Into<String>) -> Poller<Task> {
        let id = id.into();
        let api = Arc::clone(&self.inner.api);
        let fetch_id = id.clone();
        let fetch = move || {
            let api = Arc::clone(&api);
            let id = fetch_id.clone();
            async move {
                api.get_task(&id)
                    .await
                    .map(Task::from_wire)
                    .map_err(NormalizedError::from)
            }
            .boxed()
        };
        let tasks = self.inner.tasks.clone();
        let poller = PollerBuilder::new(self.inner.intervals.task_tracking(), fetch)
            .on_data(move |task: Task| {
                tasks.send_if_modified(|state| reconcile::upsert_task(&mut state.value, task));
            })
            .stop_when(Task::is_finished)
            .build();
        poller.start();
        poller
    }

    // Event reconciliation.

    /// Merge one pushed event into the read-model. Entities accept pushes
    /// and polls interchangeably; whichever wrote last wins, except that a
    /// finished task never regresses.
    pub fn apply_event(&self, event: DaemonEvent) {
        match event {
            DaemonEvent::TaskProgress(ev) => {
                self.inner
                    .tasks
                    .send_if_modified(|state| reconcile::merge_task_progress(&mut state.value, ev));
            }
            DaemonEvent::SnapshotProgress(ev) => {
                self.inner.sources.send_if_modified(|state| {
                    reconcile::merge_snapshot_progress(&mut state.value, ev)
                });
            }
            DaemonEvent::Error(ev) => {
                let _ = self
                    .inner
                    .notices
                    .send(Notice::from_event(ev, NoticeSeverity::Error));
            }
            DaemonEvent::Notification(ev) => {
                let _ = self
                    .inner
                    .notices
                    .send(Notice::from_event(ev, NoticeSeverity::Info));
            }
            DaemonEvent::Unknown => {
                debug!("Ignoring unrecognized event frame");
            }
        }
    }

    /// Called around the event stream's lifecycle. While the stream is up
    /// the task and source families relax to a safety-net cadence; when it
    /// drops they return to their baseline intervals.
    pub fn set_websocket_connected(&self, connected: bool) {
        let previous = self.inner.ws_connected.send_replace(connected);
        if previous == connected {
            return;
        }
        let intervals = &self.inner.intervals;
        if connected {
            info!("Event stream up, relaxing task and source polling");
            let relaxed = intervals.websocket_relaxed();
            self.inner.pollers.tasks.set_intervals(relaxed, relaxed);
            self.inner.pollers.sources.set_intervals(relaxed, relaxed);
        } else {
            info!("Event stream down, restoring baseline polling cadence");
            self.inner
                .pollers
                .tasks
                .set_intervals(intervals.tasks_active(), intervals.tasks_idle());
            self.inner
                .pollers
                .sources
                .set_intervals(intervals.sources_active(), intervals.sources_idle());
        }
    }
}

fn build_pollers(
    api: &Arc<dyn DaemonApi>,
    config: &Config,
    server: &watch::Sender<FamilyState<ServerStatus>>,
    repository: &watch::Sender<FamilyState<RepositoryStatus>>,
    sources: &watch::Sender<FamilyState<Vec<SnapshotSource>>>,
    tasks: &watch::Sender<FamilyState<Vec<Task>>>,
    mounts: &watch::Sender<FamilyState<Vec<Mount>>>,
) -> StorePollers {
    let intervals = &config.polling;

    let server_poller = {
        let fetch_api = Arc::clone(api);
        let daemon_url = config.daemon_url.clone();
        let data_tx = server.clone();
        let error_tx = server.clone();
        let repo_tx = repository.clone();
        PollerBuilder::new(intervals.server(), move || {
            let api = Arc::clone(&fetch_api);
            let url = daemon_url.clone();
            async move {
                api.server_status()
                    .await
                    .map(|response| ServerStatus::from_wire(response, Some(&url)))
                    .map_err(NormalizedError::from)
            }
            .boxed()
        })
        .on_data(move |status| publish(&data_tx, status))
        .on_error(move |err| {
            // Daemon unreachable: back to "not running", and repository
            // state must not outlive the process it belonged to.
            publish_failure(&error_tx, ServerStatus::default(), err);
            repo_tx.send_if_modified(|state| {
                if state.value.connected() {
                    state.value = RepositoryStatus::Disconnected;
                    true
                } else {
                    false
                }
            });
        })
        .build()
    };

    let repository_poller = {
        let fetch_api = Arc::clone(api);
        let data_tx = repository.clone();
        let error_tx = repository.clone();
        PollerBuilder::new(intervals.repository(), move || {
            let api = Arc::clone(&fetch_api);
            async move {
                api.repository_status()
                    .await
                    .map(RepositoryStatus::from_wire)
                    .map_err(NormalizedError::from)
            }
            .boxed()
        })
        .on_data(move |status| publish(&data_tx, status))
        .on_error(move |err| publish_failure(&error_tx, RepositoryStatus::Disconnected, err))
        .build()
    };

    let sources_poller = {
        let fetch_api = Arc::clone(api);
        let data_tx = sources.clone();
        let error_tx = sources.clone();
        AdaptivePollerBuilder::new(
            intervals.sources_active(),
            intervals.sources_idle(),
            move || {
                let api = Arc::clone(&fetch_api);
                async move {
                    api.list_sources()
                        .await
                        .map(|response| {
                            let mut list: Vec<_> = response
                                .sources
                                .into_iter()
                                .map(SnapshotSource::from_wire)
                                .collect();
                            list.sort_by(|a, b| a.key.cmp(&b.key));
                            list
                        })
                        .map_err(NormalizedError::from)
                }
                .boxed()
            },
            |list: &Vec<SnapshotSource>| {
                list.iter().any(|source| {
                    matches!(
                        source.status,
                        SourceStatus::Uploading | SourceStatus::Pending
                    )
                })
            },
        )
        .on_data(move |list| publish(&data_tx, list))
        .on_error(move |err| record_error(&error_tx, err))
        .build()
    };

    let tasks_poller = {
        let fetch_api = Arc::clone(api);
        let data_tx = tasks.clone();
        let error_tx = tasks.clone();
        AdaptivePollerBuilder::new(
            intervals.tasks_active(),
            intervals.tasks_idle(),
            move || {
                let api = Arc::clone(&fetch_api);
                async move {
                    api.list_tasks()
                        .await
                        .map(|response| {
                            response.tasks.into_iter().map(Task::from_wire).collect()
                        })
                        .map_err(NormalizedError::from)
                }
                .boxed()
            },
            |list: &Vec<Task>| list.iter().any(|task| !task.status.is_terminal()),
        )
        .on_data(move |list| publish(&data_tx, list))
        .on_error(move |err| record_error(&error_tx, err))
        .build()
    };

    let mounts_poller = {
        let fetch_api = Arc::clone(api);
        let data_tx = mounts.clone();
        let error_tx = mounts.clone();
        PollerBuilder::new(intervals.mounts(), move || {
            let api = Arc::clone(&fetch_api);
            async move {
                api.list_mounts()
                    .await
                    .map(|response| response.mounts.into_iter().map(Mount::from_wire).collect())
                    .map_err(NormalizedError::from)
            }
            .boxed()
        })
        .on_data(move |list: Vec<Mount>| publish(&data_tx, list))
        .on_error(move |err| record_error(&error_tx, err))
        .build()
    };

    StorePollers {
        server: server_poller,
        repository: repository_poller,
        sources: sources_poller,
        tasks: tasks_poller,
        mounts: mounts_poller,
    }
}

fn publish<T>(sender: &watch::Sender<FamilyState<T>>, value: T) {
    sender.send_modify(|state| {
        state.value = value;
        state.loading = false;
        state.error = None;
        state.refreshed_at = Some(Utc::now());
    });
}

/// Record a failure and reset the family value; used where stale data must
/// not outlive a failed fetch.
fn publish_failure<T>(sender: &watch::Sender<FamilyState<T>>, value: T, error: NormalizedError) {
    sender.send_modify(|state| {
        state.value = value;
        state.loading = false;
        state.error = Some(error);
        state.refreshed_at = Some(Utc::now());
    });
}

/// Record a failure silently, keeping the last good value.
fn record_error<T>(sender: &watch::Sender<FamilyState<T>>, error: NormalizedError) {
    sender.send_modify(|state| {
        state.loading = false;
        state.error = Some(error);
    });
}
