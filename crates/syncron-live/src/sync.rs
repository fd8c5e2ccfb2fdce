use crate::api::SyncronApi;
use crate::error::{ApiError, SyncError};
use crate::resource::LiveResource;
use futures_util::future::BoxFuture;
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use syncron_core::{TopicFilter, DEFAULT_CHUNK_BYTES};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_RUNS_PAGE: u32 = 50;
const COMMAND_QUEUE_CAPACITY: usize = 64;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    /// Upper bound for any single log fetch.
    pub chunk_bytes: u64,
    pub runs_page: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            runs_page: DEFAULT_RUNS_PAGE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    Idle,
    Snapshotting,
    Live,
    Closed,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SyncState::Idle => "idle",
            SyncState::Snapshotting => "loading",
            SyncState::Live => "live",
            SyncState::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// What consumers see of a synchronizer. Only the driver task writes it.
#[derive(Debug, Clone)]
pub struct SyncView<M> {
    pub state: SyncState,
    pub model: M,
    /// Why the synchronizer closed on its own, if it did.
    pub error: Option<String>,
    /// Latest failed follow-up fetch; cleared by the next success.
    pub inline_error: Option<String>,
    pub pending: usize,
}

impl<M: Default> Default for SyncView<M> {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            model: M::default(),
            error: None,
            inline_error: None,
            pending: 0,
        }
    }
}

#[derive(Debug)]
enum Control<C> {
    Resource(C),
    Retry,
}

/// Handle to one live resource. Dropping it tears the resource down.
pub struct Synchronizer<R: LiveResource> {
    label: String,
    commands: mpsc::Sender<Control<R::Command>>,
    view: watch::Receiver<SyncView<R::Model>>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl<R: LiveResource> Synchronizer<R> {
    /// Starts snapshotting `resource` right away on the current runtime.
    pub fn activate(resource: R, api: Arc<dyn SyncronApi>, config: SyncConfig) -> Self {
        let label = resource.label();
        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (view_tx, view_rx) = watch::channel(SyncView::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(drive(
            resource,
            api,
            config,
            view_tx,
            command_rx,
            shutdown_rx,
        ));
        Self {
            label,
            commands: command_tx,
            view: view_rx,
            shutdown: shutdown_tx,
            task: Some(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> SyncState {
        self.view.borrow().state
    }

    pub fn view(&self) -> watch::Receiver<SyncView<R::Model>> {
        self.view.clone()
    }

    /// Runs `read` against the latest published view.
    pub fn read<T>(&self, read: impl FnOnce(&SyncView<R::Model>) -> T) -> T {
        read(&self.view.borrow())
    }

    pub async fn command(&self, command: R::Command) -> Result<(), SyncError> {
        self.commands
            .send(Control::Resource(command))
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// Re-issues the most recent failed follow-up fetch.
    pub async fn retry(&self) -> Result<(), SyncError> {
        self.commands
            .send(Control::Retry)
            .await
            .map_err(|_| SyncError::Closed)
    }

    /// Waits until the published state satisfies `ready`.
    pub async fn wait_for(
        &self,
        mut ready: impl FnMut(&SyncView<R::Model>) -> bool,
    ) -> Result<(), SyncError> {
        let mut view = self.view.clone();
        view.wait_for(|current| ready(current))
            .await
            .map(|_| ())
            .map_err(|_| SyncError::Closed)
    }

    /// Closes the subscription, cancels in-flight fetches and waits briefly
    /// for the driver task to finish.
    pub async fn deactivate(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(CLOSE_GRACE, task).await.is_err() {
                warn!(event = "sync_close_timeout", resource = %self.label);
            }
        }
    }
}

impl<R: LiveResource> Drop for Synchronizer<R> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

type InFlight<R> = FuturesUnordered<
    BoxFuture<
        'static,
        (
            <R as LiveResource>::Request,
            Result<<R as LiveResource>::Reply, ApiError>,
        ),
    >,
>;

async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

fn close<M>(view: &watch::Sender<SyncView<M>>, error: Option<String>) {
    view.send_modify(|current| {
        current.state = SyncState::Closed;
        current.pending = 0;
        if error.is_some() {
            current.error = error;
        }
    });
}

fn issue<R: LiveResource>(
    resource: &R,
    api: &Arc<dyn SyncronApi>,
    config: &SyncConfig,
    in_flight: &mut InFlight<R>,
    view: &watch::Sender<SyncView<R::Model>>,
    requests: Vec<R::Request>,
) {
    for request in requests {
        debug!(event = "sync_fetch", resource = %resource.label(), request = ?request);
        let fetch = resource.fetch(api.clone(), &request, config);
        in_flight.push(async move { (request, fetch.await) }.boxed());
        view.send_modify(|current| current.pending += 1);
    }
}

async fn drive<R: LiveResource>(
    resource: R,
    api: Arc<dyn SyncronApi>,
    config: SyncConfig,
    view: watch::Sender<SyncView<R::Model>>,
    mut commands: mpsc::Receiver<Control<R::Command>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let label = resource.label();
    let topics = resource.topics();
    let filters: Vec<TopicFilter> = match topics
        .iter()
        .map(|topic| TopicFilter::new(topic))
        .collect::<Result<_, _>>()
    {
        Ok(filters) => filters,
        Err(err) => {
            warn!(event = "sync_bad_topic", resource = %label, error = %err);
            close(&view, Some(err.to_string()));
            return;
        }
    };

    view.send_modify(|current| current.state = SyncState::Snapshotting);
    let subscription = tokio::select! {
        result = api.subscribe(&topics) => result,
        _ = shutdown_requested(&mut shutdown) => {
            debug!(event = "sync_cancelled", resource = %label, phase = "subscribe");
            close(&view, None);
            return;
        }
    };
    let mut events = match subscription {
        Ok(events) => events,
        Err(err) => {
            warn!(event = "sync_subscribe_error", resource = %label, error = %err);
            close(&view, Some(err.to_string()));
            return;
        }
    };

    // Events published while the snapshot loads are held back and replayed
    // on top of it. The stream is drained before the snapshot is taken.
    let mut buffered = Vec::new();
    let mut snapshot = resource.snapshot(api.clone(), &config);
    let model = loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => {
                debug!(event = "sync_cancelled", resource = %label, phase = "snapshot");
                drop(events);
                close(&view, None);
                return;
            }
            event = events.next() => match event {
                Some(Ok(event)) => buffered.push(event),
                Some(Err(err)) => {
                    warn!(event = "sync_stream_error", resource = %label, phase = "snapshot", error = %err);
                    drop(events);
                    close(&view, Some(err.to_string()));
                    return;
                }
                None => {
                    warn!(event = "sync_stream_closed", resource = %label, phase = "snapshot");
                    close(&view, Some("event stream closed".to_string()));
                    return;
                }
            },
            result = &mut snapshot => match result {
                Ok(model) => break model,
                Err(err) => {
                    warn!(event = "sync_snapshot_error", resource = %label, error = %err);
                    drop(events);
                    close(&view, Some(err.to_string()));
                    return;
                }
            },
        }
    };

    let replayed = buffered.len();
    let mut followups = Vec::new();
    view.send_modify(|current| {
        current.model = model;
        for event in buffered {
            if filters.iter().any(|filter| filter.matches(&event.topic)) {
                followups.extend(resource.replay(&mut current.model, event, &config));
            }
        }
        current.state = SyncState::Live;
        current.error = None;
    });
    info!(event = "sync_live", resource = %label, topics = ?topics, replayed);

    let mut in_flight: InFlight<R> = FuturesUnordered::new();
    issue(&resource, &api, &config, &mut in_flight, &view, followups);
    let mut failed: Option<R::Request> = None;
    let mut error = None;

    loop {
        tokio::select! {
            _ = shutdown_requested(&mut shutdown) => break,
            event = events.next() => match event {
                Some(Ok(event)) => {
                    if !filters.iter().any(|filter| filter.matches(&event.topic)) {
                        debug!(event = "sync_foreign_topic", resource = %label, topic = %event.topic);
                        continue;
                    }
                    let mut followups = Vec::new();
                    view.send_modify(|current| {
                        followups = resource.apply(&mut current.model, event, &config);
                    });
                    issue(&resource, &api, &config, &mut in_flight, &view, followups);
                }
                Some(Err(err)) => {
                    warn!(event = "sync_stream_error", resource = %label, error = %err);
                    error = Some(err.to_string());
                    break;
                }
                None => {
                    warn!(event = "sync_stream_closed", resource = %label);
                    error = Some("event stream closed".to_string());
                    break;
                }
            },
            control = commands.recv() => match control {
                Some(Control::Resource(command)) => {
                    let mut outcome = Ok(Vec::new());
                    view.send_modify(|current| {
                        outcome = resource.command(&mut current.model, command, &config);
                    });
                    match outcome {
                        Ok(requests) => issue(&resource, &api, &config, &mut in_flight, &view, requests),
                        Err(err) => {
                            debug!(event = "sync_command_rejected", resource = %label, error = %err);
                            view.send_modify(|current| current.inline_error = Some(err.to_string()));
                        }
                    }
                }
                Some(Control::Retry) => {
                    if let Some(request) = failed.take() {
                        issue(&resource, &api, &config, &mut in_flight, &view, vec![request]);
                    }
                }
                None => break,
            },
            Some((request, reply)) = in_flight.next(), if !in_flight.is_empty() => {
                match reply {
                    Ok(reply) => {
                        let mut outcome = Ok(Vec::new());
                        view.send_modify(|current| {
                            current.pending = current.pending.saturating_sub(1);
                            outcome = resource.complete(&mut current.model, request, reply, &config);
                            if outcome.is_ok() {
                                current.inline_error = None;
                            }
                        });
                        match outcome {
                            Ok(requests) => issue(&resource, &api, &config, &mut in_flight, &view, requests),
                            Err(err) => {
                                warn!(event = "sync_apply_error", resource = %label, error = %err);
                                view.send_modify(|current| current.inline_error = Some(err.to_string()));
                            }
                        }
                    }
                    Err(err) => {
                        warn!(event = "sync_fetch_error", resource = %label, request = ?request, error = %err);
                        view.send_modify(|current| {
                            current.pending = current.pending.saturating_sub(1);
                            resource.fail(&mut current.model, &request);
                            current.inline_error = Some(err.to_string());
                        });
                        failed = Some(request);
                    }
                }
            }
        }
    }

    if !in_flight.is_empty() {
        debug!(event = "sync_fetches_cancelled", resource = %label, count = in_flight.len());
    }
    drop(in_flight);
    drop(events);
    close(&view, error);
    info!(event = "sync_closed", resource = %label);
}
