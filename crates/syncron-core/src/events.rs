use crate::topic::{self, TopicPath};
use crate::{Job, Progress, Run};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventDecodeError {
    #[error("invalid event json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("event is not a json object")]
    NotAnObject,
    #[error("event has no topic")]
    MissingTopic,
    #[error("event on {topic} has no payload")]
    MissingPayload { topic: String },
    #[error("event on {topic} has {count} payload keys")]
    AmbiguousPayload { topic: String, count: usize },
    #[error("invalid {kind} payload on {topic}: {source}")]
    Payload {
        topic: String,
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Every change the server can push. The wire form puts the kind in the key:
/// `{"topic": "...", "run_update": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventPayload {
    JobCreate(Job),
    JobUpdate(Job),
    JobDelete {},
    RunCreate(Run),
    RunUpdate(Run),
    RunUpdateLogLen {
        log_len: u64,
    },
    RunUpdateProgress {
        #[serde(default)]
        progress: Option<Progress>,
    },
    RunLogAppend {
        chunk: String,
        /// Log offset of the chunk's first byte, when the server reports it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        seek: Option<u64>,
    },
    RunDelete {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
}

impl EventPayload {
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::JobCreate(_) => "job_create",
            EventPayload::JobUpdate(_) => "job_update",
            EventPayload::JobDelete {} => "job_delete",
            EventPayload::RunCreate(_) => "run_create",
            EventPayload::RunUpdate(_) => "run_update",
            EventPayload::RunUpdateLogLen { .. } => "run_update_log_len",
            EventPayload::RunUpdateProgress { .. } => "run_update_progress",
            EventPayload::RunLogAppend { .. } => "run_log_append",
            EventPayload::RunDelete { .. } => "run_delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub topic: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    pub fn new(topic: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }

    pub fn decode(json: &str) -> Result<Self, EventDecodeError> {
        Self::from_value(serde_json::from_str(json)?)
    }

    pub fn from_value(value: Value) -> Result<Self, EventDecodeError> {
        let Value::Object(mut object) = value else {
            return Err(EventDecodeError::NotAnObject);
        };
        let topic = match object.remove("topic") {
            Some(Value::String(topic)) => topic,
            _ => return Err(EventDecodeError::MissingTopic),
        };
        let count = object.len();
        let mut entries = object.into_iter();
        let (kind, body) = match (entries.next(), count) {
            (Some(entry), 1) => entry,
            (None, _) => return Err(EventDecodeError::MissingPayload { topic }),
            (Some(_), count) => return Err(EventDecodeError::AmbiguousPayload { topic, count }),
        };
        let body = if body.is_null() {
            Value::Object(Map::new())
        } else {
            body
        };
        let mut tagged = Map::new();
        tagged.insert(kind.clone(), body);
        let payload = serde_json::from_value(Value::Object(tagged)).map_err(|source| {
            EventDecodeError::Payload {
                topic: topic.clone(),
                kind,
                source,
            }
        })?;
        Ok(Self { topic, payload })
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    pub fn path(&self) -> Option<TopicPath> {
        topic::identity_prefix(&self.topic)
    }
}
