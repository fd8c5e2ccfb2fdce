use crate::api::{LogBytes, LogRange, RunsQuery, SyncronApi};
use crate::error::{ApiError, SyncError};
use crate::sync::SyncConfig;
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;
use syncron_core::topic::{self, TopicPath};
use syncron_core::{
    Edge, Event, EventPayload, ExpandOutcome, ExpandRequest, Gap, Job, JobKey, LoadPlan,
    LogWindow, Run,
};
use tracing::{debug, warn};

/// One kind of live resource: how to snapshot it, which topics keep it
/// current, and how events, consumer commands and follow-up fetches change
/// its model. The synchronizer drives every resource the same way.
pub trait LiveResource: Send + Sync + 'static {
    type Model: Default + Send + Sync + 'static;
    type Command: fmt::Debug + Send + 'static;
    type Request: Clone + fmt::Debug + Send + 'static;
    type Reply: Send + 'static;

    fn label(&self) -> String;

    fn topics(&self) -> Vec<String>;

    fn snapshot(
        &self,
        api: Arc<dyn SyncronApi>,
        config: &SyncConfig,
    ) -> BoxFuture<'static, Result<Self::Model, ApiError>>;

    fn apply(&self, model: &mut Self::Model, event: Event, config: &SyncConfig)
        -> Vec<Self::Request>;

    /// Applies an event that arrived while the snapshot was loading. It may
    /// describe data the snapshot already holds.
    fn replay(
        &self,
        model: &mut Self::Model,
        event: Event,
        config: &SyncConfig,
    ) -> Vec<Self::Request> {
        self.apply(model, event, config)
    }

    fn command(
        &self,
        model: &mut Self::Model,
        command: Self::Command,
        config: &SyncConfig,
    ) -> Result<Vec<Self::Request>, SyncError>;

    fn fetch(
        &self,
        api: Arc<dyn SyncronApi>,
        request: &Self::Request,
        config: &SyncConfig,
    ) -> BoxFuture<'static, Result<Self::Reply, ApiError>>;

    fn complete(
        &self,
        model: &mut Self::Model,
        request: Self::Request,
        reply: Self::Reply,
        config: &SyncConfig,
    ) -> Result<Vec<Self::Request>, SyncError>;

    /// Called when a follow-up fetch fails, before the error is published.
    fn fail(&self, _model: &mut Self::Model, _request: &Self::Request) {}
}

fn drop_unknown(label: &str, kind: &str, topic: &str) {
    warn!(
        event = "update_unknown_target",
        resource = %label,
        kind,
        topic
    );
}

fn job_key_of(path: &TopicPath) -> JobKey {
    JobKey::new(&path.user, &path.job_id)
}

// ---------------------------------------------------------------------------
// Jobs collection

#[derive(Debug, Clone, Default)]
pub struct JobsModel {
    pub jobs: BTreeMap<JobKey, Job>,
    pub deleted: BTreeSet<JobKey>,
}

impl JobsModel {
    pub fn list(&self) -> Vec<&Job> {
        self.jobs.values().collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JobsResource;

impl LiveResource for JobsResource {
    type Model = JobsModel;
    type Command = Infallible;
    type Request = Infallible;
    type Reply = Infallible;

    fn label(&self) -> String {
        "jobs".to_string()
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topic::jobs_topic(),
            topic::job_topic("+", "+"),
            topic::runs_topic("+", "+"),
            topic::run_topic("+", "+", "+"),
        ]
    }

    fn snapshot(
        &self,
        api: Arc<dyn SyncronApi>,
        _config: &SyncConfig,
    ) -> BoxFuture<'static, Result<JobsModel, ApiError>> {
        async move {
            let jobs = api.jobs().await?;
            Ok(JobsModel {
                jobs: jobs.into_iter().map(|job| (job.key(), job)).collect(),
                deleted: BTreeSet::new(),
            })
        }
        .boxed()
    }

    fn apply(&self, model: &mut JobsModel, event: Event, _config: &SyncConfig) -> Vec<Infallible> {
        let path = event.path();
        let kind = event.kind();
        match event.payload {
            EventPayload::JobCreate(job) => {
                let key = job.key();
                model.deleted.remove(&key);
                match model.jobs.get_mut(&key) {
                    Some(existing) => existing.merge_from(job),
                    None => {
                        model.jobs.insert(key, job);
                    }
                }
            }
            EventPayload::JobUpdate(job) => {
                let key = job.key();
                if model.deleted.contains(&key) {
                    debug!(event = "update_deleted_job", job = %key);
                } else if let Some(existing) = model.jobs.get_mut(&key) {
                    existing.merge_from(job);
                } else {
                    drop_unknown(&self.label(), kind, &event.topic);
                }
            }
            EventPayload::JobDelete {} => {
                if let Some(path) = path {
                    let key = job_key_of(&path);
                    model.jobs.remove(&key);
                    model.deleted.insert(key);
                }
            }
            EventPayload::RunCreate(run) | EventPayload::RunUpdate(run) => {
                match path.and_then(|path| model.jobs.get_mut(&job_key_of(&path))) {
                    Some(job) => job.observe_run(run),
                    None => drop_unknown(&self.label(), kind, &event.topic),
                }
            }
            EventPayload::RunUpdateLogLen { log_len } => {
                if let Some(run) = latest_run_for(model, path.as_ref()) {
                    if !run.is_terminal() {
                        run.log_len = run.log_len.max(log_len);
                    }
                }
            }
            EventPayload::RunUpdateProgress { progress } => {
                if let Some(run) = latest_run_for(model, path.as_ref()) {
                    if !run.is_terminal() {
                        run.progress = progress;
                    }
                }
            }
            EventPayload::RunDelete { .. } => {
                let job = path.as_ref().and_then(|path| {
                    let run_id = path.run_id.as_deref()?;
                    let job = model.jobs.get_mut(&job_key_of(path))?;
                    Some((job, run_id))
                });
                if let Some((job, run_id)) = job {
                    if job.latest_run.as_ref().is_some_and(|run| run.id == run_id) {
                        job.latest_run = None;
                    }
                }
            }
            EventPayload::RunLogAppend { .. } => {}
        }
        Vec::new()
    }

    fn command(
        &self,
        _model: &mut JobsModel,
        command: Infallible,
        _config: &SyncConfig,
    ) -> Result<Vec<Infallible>, SyncError> {
        match command {}
    }

    fn fetch(
        &self,
        _api: Arc<dyn SyncronApi>,
        request: &Infallible,
        _config: &SyncConfig,
    ) -> BoxFuture<'static, Result<Infallible, ApiError>> {
        match *request {}
    }

    fn complete(
        &self,
        _model: &mut JobsModel,
        request: Infallible,
        _reply: Infallible,
        _config: &SyncConfig,
    ) -> Result<Vec<Infallible>, SyncError> {
        match request {}
    }
}

fn latest_run_for<'a>(model: &'a mut JobsModel, path: Option<&TopicPath>) -> Option<&'a mut Run> {
    let path = path?;
    let run_id = path.run_id.as_deref()?;
    model
        .jobs
        .get_mut(&job_key_of(path))?
        .latest_run
        .as_mut()
        .filter(|run| run.id == run_id)
}

// ---------------------------------------------------------------------------
// One job's runs

#[derive(Debug, Clone, Default)]
pub struct RunsModel {
    /// Newest first.
    pub runs: Vec<Run>,
    pub deleted: HashSet<String>,
    /// No older runs remain on the server.
    pub exhausted: bool,
    pub loading_more: bool,
}

impl RunsModel {
    pub fn get(&self, run_id: &str) -> Option<&Run> {
        self.runs.iter().find(|run| run.id == run_id)
    }

    fn get_mut(&mut self, run_id: &str) -> Option<&mut Run> {
        self.runs.iter_mut().find(|run| run.id == run_id)
    }

    fn upsert(&mut self, run: Run) {
        if self.deleted.contains(&run.id) {
            debug!(event = "create_deleted_run", run_id = %run.id);
            return;
        }
        match self.get_mut(&run.id) {
            Some(existing) => existing.merge_from(run),
            None => self.runs.push(run),
        }
        self.sort();
    }

    fn sort(&mut self) {
        self.runs.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then_with(|| b.unique_id.cmp(&a.unique_id))
        });
    }

    fn oldest_cursor(&self) -> Option<i64> {
        self.runs.iter().filter_map(|run| run.unique_id).min()
    }

    pub fn running_ids(&self) -> Vec<String> {
        self.runs
            .iter()
            .filter(|run| !run.is_terminal())
            .map(|run| run.id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunsCommand {
    /// Fetch up to `n` runs older than the oldest one held.
    LoadMore(u32),
    /// Re-read the given runs; an empty list means every run still going.
    Refresh(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunsRequest {
    Page { before: i64, num: u32 },
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunsResource {
    pub job: JobKey,
    pub runs_url: String,
}

impl RunsResource {
    pub fn new(job: &Job) -> Self {
        Self {
            job: job.key(),
            runs_url: job.runs_url(),
        }
    }
}

impl LiveResource for RunsResource {
    type Model = RunsModel;
    type Command = RunsCommand;
    type Request = RunsRequest;
    type Reply = Vec<Run>;

    fn label(&self) -> String {
        format!("runs {}", self.job)
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topic::runs_topic(&self.job.user, &self.job.id),
            topic::run_topic(&self.job.user, &self.job.id, "+"),
        ]
    }

    fn snapshot(
        &self,
        api: Arc<dyn SyncronApi>,
        config: &SyncConfig,
    ) -> BoxFuture<'static, Result<RunsModel, ApiError>> {
        let runs_url = self.runs_url.clone();
        let page = config.runs_page;
        async move {
            let runs = api.runs(&runs_url, &RunsQuery::latest(page)).await?;
            let mut model = RunsModel {
                exhausted: runs.len() < page as usize,
                ..RunsModel::default()
            };
            model.runs = runs;
            model.sort();
            Ok(model)
        }
        .boxed()
    }

    fn apply(&self, model: &mut RunsModel, event: Event, _config: &SyncConfig) -> Vec<RunsRequest> {
        let run_id = event.path().and_then(|path| path.run_id);
        let kind = event.kind();
        match event.payload {
            EventPayload::RunCreate(run) => model.upsert(run),
            EventPayload::RunUpdate(update) => {
                if model.deleted.contains(&update.id) {
                    debug!(event = "update_deleted_run", run_id = %update.id);
                } else if model.get(&update.id).is_some() {
                    model.upsert(update);
                } else {
                    drop_unknown(&self.label(), kind, &event.topic);
                }
            }
            EventPayload::RunUpdateLogLen { log_len } => {
                match run_id.as_deref().and_then(|id| model.get_mut(id)) {
                    Some(run) if !run.is_terminal() => run.log_len = run.log_len.max(log_len),
                    Some(_) => {}
                    None => drop_unknown(&self.label(), kind, &event.topic),
                }
            }
            EventPayload::RunUpdateProgress { progress } => {
                match run_id.as_deref().and_then(|id| model.get_mut(id)) {
                    Some(run) if !run.is_terminal() => run.progress = progress,
                    Some(_) => {}
                    None => drop_unknown(&self.label(), kind, &event.topic),
                }
            }
            EventPayload::RunDelete { reason } => {
                if let Some(run_id) = run_id {
                    debug!(event = "run_deleted", run_id = %run_id, reason = ?reason);
                    model.runs.retain(|run| run.id != run_id);
                    model.deleted.insert(run_id);
                }
            }
            EventPayload::RunLogAppend { .. }
            | EventPayload::JobCreate(_)
            | EventPayload::JobUpdate(_)
            | EventPayload::JobDelete {} => {}
        }
        Vec::new()
    }

    fn command(
        &self,
        model: &mut RunsModel,
        command: RunsCommand,
        config: &SyncConfig,
    ) -> Result<Vec<RunsRequest>, SyncError> {
        match command {
            RunsCommand::LoadMore(num) => {
                if model.loading_more || model.exhausted {
                    return Ok(Vec::new());
                }
                let Some(before) = model.oldest_cursor() else {
                    model.exhausted = true;
                    return Ok(Vec::new());
                };
                model.loading_more = true;
                let num = if num == 0 { config.runs_page } else { num };
                Ok(vec![RunsRequest::Page { before, num }])
            }
            RunsCommand::Refresh(ids) => {
                let ids = if ids.is_empty() {
                    model.running_ids()
                } else {
                    ids
                };
                if ids.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![RunsRequest::Ids(ids)])
                }
            }
        }
    }

    fn fetch(
        &self,
        api: Arc<dyn SyncronApi>,
        request: &RunsRequest,
        _config: &SyncConfig,
    ) -> BoxFuture<'static, Result<Vec<Run>, ApiError>> {
        let runs_url = self.runs_url.clone();
        let query = match request {
            RunsRequest::Page { before, num } => RunsQuery::older_than(*before, *num),
            RunsRequest::Ids(ids) => RunsQuery::ids(ids.clone()),
        };
        async move { api.runs(&runs_url, &query).await }.boxed()
    }

    fn complete(
        &self,
        model: &mut RunsModel,
        request: RunsRequest,
        reply: Vec<Run>,
        _config: &SyncConfig,
    ) -> Result<Vec<RunsRequest>, SyncError> {
        match request {
            RunsRequest::Page { num, .. } => {
                model.loading_more = false;
                model.exhausted = reply.len() < num as usize;
                for run in reply {
                    model.upsert(run);
                }
            }
            RunsRequest::Ids(_) => {
                for run in reply {
                    if model.get(&run.id).is_some() {
                        model.upsert(run);
                    }
                }
            }
        }
        Ok(Vec::new())
    }

    fn fail(&self, model: &mut RunsModel, request: &RunsRequest) {
        if matches!(request, RunsRequest::Page { .. }) {
            model.loading_more = false;
        }
    }
}

// ---------------------------------------------------------------------------
// A single run and its log

#[derive(Debug, Clone, Default)]
pub struct RunModel {
    pub run: Option<Run>,
    /// Set once the run is deleted; carries the server's reason.
    pub deleted: Option<String>,
    /// A fetch of missed tail bytes is in flight.
    pub catching_up: bool,
    /// Appends without `seek` cannot be placed until a tail read confirms
    /// where the server's log ends.
    pub resyncing: bool,
    /// An append without `seek` arrived while a tail read was in flight.
    pub missed_append: bool,
}

impl RunModel {
    pub fn log(&self) -> Option<&LogWindow> {
        self.run.as_ref().map(|run| &run.log)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunCommand {
    Expand { gap: Gap, edge: Edge, size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunRequest {
    Expand { log_url: String, request: ExpandRequest },
    CatchUp { log_url: String, from: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResource {
    pub job: JobKey,
    pub run_id: String,
    pub run_url: String,
}

impl RunResource {
    pub fn new(job: JobKey, run_id: impl Into<String>, run_url: Option<String>) -> Self {
        let run_id = run_id.into();
        let run_url = run_url.unwrap_or_else(|| format!("/job/{}/{}/run/{run_id}", job.user, job.id));
        Self {
            job,
            run_id,
            run_url,
        }
    }

    fn log_url(&self, run: &Run) -> String {
        run.log_url
            .clone()
            .unwrap_or_else(|| format!("{}/log", self.run_url))
    }

    /// Reads the tail from `seek_offset()` while the window is behind
    /// `log_len`, or while a running log still has to be resynced.
    fn catch_up(&self, model: &mut RunModel) -> Vec<RunRequest> {
        if model.catching_up || model.is_deleted() {
            return Vec::new();
        }
        let Some(run) = model.run.as_ref() else {
            return Vec::new();
        };
        if !run.log.is_loaded() {
            return Vec::new();
        }
        let from = run.log.seek_offset();
        let resync = model.resyncing && !run.is_terminal();
        if from >= run.log_len && !resync {
            model.resyncing = false;
            return Vec::new();
        }
        model.catching_up = true;
        model.missed_append = false;
        vec![RunRequest::CatchUp {
            log_url: self.log_url(run),
            from,
        }]
    }

    fn append(&self, model: &mut RunModel, chunk: &[u8], seek: Option<u64>) -> Vec<RunRequest> {
        let catching_up = model.catching_up;
        let Some(run) = model.run.as_mut() else {
            return Vec::new();
        };
        let len = chunk.len() as u64;
        if !run.log.is_loaded() {
            if !run.is_terminal() {
                run.log_len += len;
            }
            return Vec::new();
        }
        let offset = run.log.seek_offset();
        let start = match seek {
            Some(seek) => seek,
            None if catching_up || model.resyncing => {
                // The tail read in flight, or the next one, picks these bytes up.
                debug!(event = "log_append_unplaced", offset, len);
                model.missed_append = true;
                return self.catch_up(model);
            }
            None => offset,
        };
        if start > offset {
            debug!(event = "log_append_gap", expected = offset, seek = start);
            run.log_len = run.log_len.max(start + len);
            return self.catch_up(model);
        }
        let skip = offset - start;
        if skip >= len {
            debug!(event = "log_append_duplicate", offset, seek = start, len);
            return Vec::new();
        }
        let mut fresh = &chunk[skip as usize..];
        if run.is_terminal() {
            let room = run.log_len.saturating_sub(offset) as usize;
            fresh = &fresh[..fresh.len().min(room)];
        }
        run.log.append(fresh);
        run.log_len = run.log_len.max(run.log.log_len());
        Vec::new()
    }
}

impl LiveResource for RunResource {
    type Model = RunModel;
    type Command = RunCommand;
    type Request = RunRequest;
    type Reply = LogBytes;

    fn label(&self) -> String {
        format!("run {}/{}", self.job, self.run_id)
    }

    fn topics(&self) -> Vec<String> {
        vec![
            topic::run_topic(&self.job.user, &self.job.id, &self.run_id),
            topic::run_log_topic(&self.job.user, &self.job.id, &self.run_id),
        ]
    }

    fn snapshot(
        &self,
        api: Arc<dyn SyncronApi>,
        config: &SyncConfig,
    ) -> BoxFuture<'static, Result<RunModel, ApiError>> {
        let resource = self.clone();
        let chunk = config.chunk_bytes;
        async move {
            let mut run = api.run(&resource.run_url, None).await?;
            let log_url = resource.log_url(&run);
            run.log = load_log(api.as_ref(), &run, &log_url, chunk).await?;
            run.log_len = run.log_len.max(run.log.log_len());
            run.inline_log = None;
            Ok(RunModel {
                run: Some(run),
                ..RunModel::default()
            })
        }
        .boxed()
    }

    /// Appends without `seek` that arrived during the snapshot may already be
    /// inside it. Their bytes are dropped and the tail is read back instead.
    fn replay(&self, model: &mut RunModel, event: Event, config: &SyncConfig) -> Vec<RunRequest> {
        if let EventPayload::RunLogAppend { chunk, seek: None } = &event.payload {
            if !model.is_deleted() && model.log().is_some_and(LogWindow::is_loaded) {
                debug!(event = "log_append_replayed", run_id = %self.run_id, len = chunk.len());
                model.resyncing = true;
                return self.catch_up(model);
            }
        }
        self.apply(model, event, config)
    }

    fn apply(&self, model: &mut RunModel, event: Event, _config: &SyncConfig) -> Vec<RunRequest> {
        let kind = event.kind();
        if model.is_deleted() {
            debug!(event = "event_for_deleted_run", kind, run_id = %self.run_id);
            return Vec::new();
        }
        match event.payload {
            EventPayload::RunCreate(update) | EventPayload::RunUpdate(update) => {
                if update.id != self.run_id {
                    return Vec::new();
                }
                let Some(run) = model.run.as_mut() else {
                    drop_unknown(&self.label(), kind, &event.topic);
                    return Vec::new();
                };
                run.merge_from(update);
                if run.is_terminal() {
                    return self.catch_up(model);
                }
                Vec::new()
            }
            EventPayload::RunUpdateLogLen { log_len } => {
                if let Some(run) = model.run.as_mut().filter(|run| !run.is_terminal()) {
                    run.log_len = run.log_len.max(log_len);
                }
                Vec::new()
            }
            EventPayload::RunUpdateProgress { progress } => {
                if let Some(run) = model.run.as_mut().filter(|run| !run.is_terminal()) {
                    run.progress = progress;
                }
                Vec::new()
            }
            EventPayload::RunLogAppend { chunk, seek } => self.append(model, chunk.as_bytes(), seek),
            EventPayload::RunDelete { reason } => {
                model.deleted = Some(reason.unwrap_or_else(|| "deleted".to_string()));
                model.catching_up = false;
                Vec::new()
            }
            EventPayload::JobCreate(_) | EventPayload::JobUpdate(_) | EventPayload::JobDelete {} => {
                Vec::new()
            }
        }
    }

    fn command(
        &self,
        model: &mut RunModel,
        command: RunCommand,
        config: &SyncConfig,
    ) -> Result<Vec<RunRequest>, SyncError> {
        if let Some(reason) = model.deleted.as_ref() {
            return Err(SyncError::Deleted(format!("{} ({reason})", self.label())));
        }
        let Some(run) = model.run.as_ref() else {
            return Err(SyncError::NotLive);
        };
        match command {
            RunCommand::Expand { gap, edge, size } => {
                let request = run.log.plan_expand(gap, edge, size, config.chunk_bytes)?;
                Ok(vec![RunRequest::Expand {
                    log_url: self.log_url(run),
                    request,
                }])
            }
        }
    }

    fn fetch(
        &self,
        api: Arc<dyn SyncronApi>,
        request: &RunRequest,
        config: &SyncConfig,
    ) -> BoxFuture<'static, Result<LogBytes, ApiError>> {
        let (log_url, range) = match request {
            RunRequest::Expand { log_url, request: expand } => {
                (log_url.clone(), LogRange::from(expand.range))
            }
            RunRequest::CatchUp { log_url, from } => {
                (log_url.clone(), LogRange::from_offset(*from, config.chunk_bytes))
            }
        };
        async move { api.log(&log_url, range).await }.boxed()
    }

    fn complete(
        &self,
        model: &mut RunModel,
        request: RunRequest,
        reply: LogBytes,
        _config: &SyncConfig,
    ) -> Result<Vec<RunRequest>, SyncError> {
        if model.is_deleted() {
            model.catching_up = false;
            return Ok(Vec::new());
        }
        match request {
            RunRequest::Expand { request: expand, .. } => {
                let Some(run) = model.run.as_mut() else {
                    return Ok(Vec::new());
                };
                match run.log.apply_expand(&expand, reply.bytes)? {
                    ExpandOutcome::Applied { gap_closed } => {
                        debug!(
                            event = "log_expanded",
                            from = expand.range.start,
                            to = expand.range.end,
                            gap_closed
                        );
                    }
                    ExpandOutcome::StaleDiscarded => {
                        debug!(
                            event = "expand_stale_discarded",
                            from = expand.gap.from,
                            to = expand.gap.to
                        );
                    }
                }
                Ok(Vec::new())
            }
            RunRequest::CatchUp { from, .. } => {
                model.catching_up = false;
                let Some(run) = model.run.as_ref() else {
                    return Ok(Vec::new());
                };
                if run.log.seek_offset() != from {
                    debug!(event = "catch_up_stale_discarded", from, offset = run.log.seek_offset());
                    return Ok(self.catch_up(model));
                }
                if !reply.bytes.is_empty() {
                    self.append(model, &reply.bytes, Some(from));
                }
                let Some(run) = model.run.as_mut() else {
                    return Ok(Vec::new());
                };
                if !run.is_terminal() {
                    if let Some(total) = reply.total {
                        run.log_len = run.log_len.max(total);
                    }
                }
                let terminal = run.is_terminal();
                if std::mem::take(&mut model.missed_append) && !terminal {
                    model.resyncing = true;
                } else if reply.total.map_or(true, |total| from + reply.bytes.len() as u64 >= total) {
                    model.resyncing = false;
                }
                Ok(self.catch_up(model))
            }
        }
    }

    fn fail(&self, model: &mut RunModel, request: &RunRequest) {
        if matches!(request, RunRequest::CatchUp { .. }) {
            model.catching_up = false;
        }
    }
}

async fn load_log(
    api: &dyn SyncronApi,
    run: &Run,
    log_url: &str,
    chunk: u64,
) -> Result<LogWindow, ApiError> {
    if let Some(inline) = run.inline_log.as_deref() {
        return Ok(LogWindow::from_inline(inline.as_bytes().to_vec()));
    }
    let plan = LoadPlan::for_len(run.log_len, chunk);
    let mut bodies = Vec::new();
    for range in plan.ranges() {
        bodies.push(api.log(log_url, range.into()).await?.bytes);
    }
    LogWindow::assemble(&plan, bodies).map_err(|err| ApiError::Decode {
        url: log_url.to_string(),
        message: err.to_string(),
    })
}
