pub mod ansi;
pub mod events;
pub mod log_window;
pub mod settings;
pub mod status;
pub mod topic;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

pub use events::{Event, EventDecodeError, EventPayload};
pub use log_window::{
    apply_limit, ByteRange, Edge, ExpandOutcome, ExpandRequest, Gap, LoadPlan, LogPart,
    LogWindow, LogWindowError, DEFAULT_CHUNK_BYTES,
};
pub use status::{classify, describe, human_bytes, ExitStatus, Outcome};
pub use topic::{TopicError, TopicFilter};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobKey {
    pub user: String,
    pub id: String,
}

impl JobKey {
    pub fn new(user: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user, self.id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Fraction complete, `0.0..=1.0`.
    pub percent: f32,
    pub eta_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub user: String,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_run: Option<Run>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success_url: Option<String>,
}

impl Job {
    pub fn key(&self) -> JobKey {
        JobKey::new(&self.user, &self.id)
    }

    pub fn runs_url(&self) -> String {
        self.runs_url
            .clone()
            .unwrap_or_else(|| format!("/job/{}/{}/run", self.user, self.id))
    }

    pub fn settings_url(&self) -> String {
        self.settings_url
            .clone()
            .unwrap_or_else(|| format!("/job/{}/{}/settings", self.user, self.id))
    }

    pub fn prune_url(&self) -> String {
        self.prune_url
            .clone()
            .unwrap_or_else(|| format!("/job/{}/{}/prune", self.user, self.id))
    }

    pub fn success_url(&self) -> String {
        self.success_url
            .clone()
            .unwrap_or_else(|| format!("/job/{}/{}/success", self.user, self.id))
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.latest_run.as_ref().map(Run::outcome)
    }

    /// Merges an update for the same job. Fields the update leaves out keep
    /// their current values.
    pub fn merge_from(&mut self, update: Job) {
        let Job {
            user: _,
            id: _,
            name,
            latest_run,
            url,
            runs_url,
            settings_url,
            prune_url,
            success_url,
        } = update;
        self.name = name;
        if let Some(run) = latest_run {
            self.observe_run(run);
        }
        merge_opt(&mut self.url, url);
        merge_opt(&mut self.runs_url, runs_url);
        merge_opt(&mut self.settings_url, settings_url);
        merge_opt(&mut self.prune_url, prune_url);
        merge_opt(&mut self.success_url, success_url);
    }

    /// Folds a run of this job into `latest_run` when it is the same run or a newer one.
    pub fn observe_run(&mut self, run: Run) {
        match self.latest_run.as_mut() {
            Some(current) if current.id == run.id => current.merge_from(run),
            Some(current) if current.is_newer_than(&run) => {}
            _ => self.latest_run = Some(run),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    /// Server-wide row id; increases with every new run and pages run lists.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub date: DateTime<Utc>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub status: Option<ExitStatus>,
    #[serde(default)]
    pub progress: Option<Progress>,
    #[serde(default, deserialize_with = "deserialize_log_len")]
    pub log_len: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_url: Option<String>,
    #[serde(default)]
    pub cmd: String,
    #[serde(default, deserialize_with = "deserialize_env")]
    pub env: Vec<(String, String)>,
    /// Whole log body, sent inline by the server when it is small.
    #[serde(rename = "log", default, skip_serializing_if = "Option::is_none")]
    pub inline_log: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seek: Option<u64>,
    #[serde(skip)]
    pub log: LogWindow,
}

impl Run {
    pub fn outcome(&self) -> Outcome {
        classify(self.status.as_ref(), self.log_len)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some()
    }

    pub fn describe_status(&self) -> String {
        describe(self.status.as_ref())
    }

    pub fn is_newer_than(&self, other: &Run) -> bool {
        match (self.unique_id, other.unique_id) {
            (Some(mine), Some(theirs)) => mine > theirs,
            _ => self.date > other.date,
        }
    }

    /// Merges an update for the same run. Merging the same update twice
    /// leaves the record as merging it once.
    pub fn merge_from(&mut self, update: Run) {
        let Run {
            id: _,
            unique_id,
            date,
            duration_ms,
            status,
            progress,
            log_len,
            url,
            log_url,
            cmd,
            env,
            inline_log: _,
            seek: _,
            log: _,
        } = update;
        merge_opt(&mut self.unique_id, unique_id);
        self.date = date;
        self.duration_ms = self.duration_ms.max(duration_ms);
        if status.is_some() {
            self.status = status;
            self.progress = None;
        } else if self.status.is_none() {
            self.progress = progress;
        }
        self.log_len = self.log_len.max(log_len);
        merge_opt(&mut self.url, url);
        merge_opt(&mut self.log_url, log_url);
        if !cmd.is_empty() {
            self.cmd = cmd;
        }
        if !env.is_empty() {
            self.env = env;
        }
    }
}

/// `(unix_ms, succeeded)` pairs; `None` while the run is still going.
pub type SuccessHistory = Vec<(i64, Option<bool>)>;

fn merge_opt<T>(slot: &mut Option<T>, update: Option<T>) {
    if update.is_some() {
        *slot = update;
    }
}

fn deserialize_log_len<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_env<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    let pairs = Option::<Vec<(Value, Value)>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(pairs
        .into_iter()
        .map(|(key, value)| (lossy_string(key), lossy_string(value)))
        .collect())
}

/// Environment strings that were not UTF-8 on the server arrive as a byte
/// array, possibly wrapped in a platform tag like `{"Unix": [...]}`.
fn lossy_string(value: Value) -> String {
    match value {
        Value::String(text) => text,
        Value::Array(items) => {
            let bytes: Vec<u8> = items
                .iter()
                .filter_map(|item| item.as_u64().and_then(|byte| u8::try_from(byte).ok()))
                .collect();
            String::from_utf8_lossy(&bytes).into_owned()
        }
        Value::Object(map) if map.len() == 1 => map
            .into_iter()
            .next()
            .map(|(_, inner)| lossy_string(inner))
            .unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
