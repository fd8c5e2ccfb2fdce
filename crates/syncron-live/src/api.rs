use crate::error::ApiError;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use syncron_core::settings::{GlobalSettings, JobSettings, PruneResult, Retention};
use syncron_core::{ByteRange, Event, Job, Run, SuccessHistory};
use tracing::debug;

pub type EventStream = BoxStream<'static, Result<Event, ApiError>>;

/// Filters for a runs collection fetch. `ids` takes precedence over paging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunsQuery {
    pub num: Option<u32>,
    pub before: Option<i64>,
    pub ids: Vec<String>,
}

impl RunsQuery {
    pub fn latest(num: u32) -> Self {
        Self {
            num: Some(num),
            ..Self::default()
        }
    }

    pub fn older_than(before: i64, num: u32) -> Self {
        Self {
            num: Some(num),
            before: Some(before),
            ..Self::default()
        }
    }

    pub fn ids(ids: Vec<String>) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        if !self.ids.is_empty() {
            return self.ids.iter().map(|id| ("id", id.clone())).collect();
        }
        let mut pairs = Vec::new();
        if let Some(num) = self.num {
            pairs.push(("num", num.to_string()));
        }
        if let Some(before) = self.before {
            pairs.push(("before", before.to_string()));
        }
        pairs
    }
}

/// `seek`/`limit` for a log fetch. A negative limit asks for the last N bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogRange {
    pub seek: Option<u64>,
    pub limit: Option<i64>,
}

impl LogRange {
    pub fn tail(bytes: u64) -> Self {
        Self {
            seek: None,
            limit: Some(-(bytes.min(i64::MAX as u64) as i64)),
        }
    }

    pub fn from_offset(seek: u64, limit: u64) -> Self {
        Self {
            seek: Some(seek),
            limit: Some(limit.min(i64::MAX as u64) as i64),
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(seek) = self.seek {
            pairs.push(("seek", seek.to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

impl From<ByteRange> for LogRange {
    fn from(range: ByteRange) -> Self {
        LogRange::from_offset(range.start, range.len())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogBytes {
    pub bytes: Vec<u8>,
    /// Full log length at the time of the read, from `x-log-length`.
    pub total: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PruneMode {
    Apply,
    /// Report what would be pruned, optionally under different retention.
    DryRun(Option<Retention>),
}

/// Reads and subscriptions the live views are built from.
#[async_trait]
pub trait SyncronApi: Send + Sync {
    async fn jobs(&self) -> Result<Vec<Job>, ApiError>;

    async fn runs(&self, runs_url: &str, query: &RunsQuery) -> Result<Vec<Run>, ApiError>;

    async fn run(&self, run_url: &str, seek: Option<u64>) -> Result<Run, ApiError>;

    async fn log(&self, log_url: &str, range: LogRange) -> Result<LogBytes, ApiError>;

    async fn subscribe(&self, topics: &[String]) -> Result<EventStream, ApiError>;
}

/// Settings, pruning and history endpoints.
#[async_trait]
pub trait AdminApi: Send + Sync {
    async fn job_settings(&self, settings_url: &str) -> Result<JobSettings, ApiError>;

    async fn put_job_settings(
        &self,
        settings_url: &str,
        settings: &JobSettings,
    ) -> Result<(), ApiError>;

    async fn global_settings(&self) -> Result<GlobalSettings, ApiError>;

    async fn put_global_settings(&self, settings: &GlobalSettings) -> Result<(), ApiError>;

    async fn prune(&self, prune_url: &str, mode: PruneMode) -> Result<PruneResult, ApiError>;

    async fn success_history(
        &self,
        success_url: &str,
        before: Option<i64>,
        after: Option<i64>,
    ) -> Result<SuccessHistory, ApiError>;
}

/// Totals what a new global retention policy would prune across every job
/// that inherits the global policy.
pub async fn preview_default_retention<A>(
    api: &A,
    jobs: &[Job],
    retention: Retention,
) -> Result<PruneResult, ApiError>
where
    A: AdminApi + ?Sized,
{
    let mut total = PruneResult::default();
    for job in jobs {
        let settings = api.job_settings(&job.settings_url()).await?;
        if !settings.uses_default_retention() {
            debug!(event = "prune_preview_skip", job = %job.key());
            continue;
        }
        let result = api
            .prune(&job.prune_url(), PruneMode::DryRun(Some(retention)))
            .await?;
        total.absorb(result);
    }
    Ok(total)
}
