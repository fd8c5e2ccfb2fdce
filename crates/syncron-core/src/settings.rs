use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Explicit retention limits. Absent fields mean "no limit".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimits {
    /// Days.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_runs: Option<u64>,
    /// Bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<u64>,
}

/// Either the literal `"default"` (inherit the global policy) or limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    Default,
    Limits(RetentionLimits),
}

impl Serialize for Retention {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Retention::Default => serializer.serialize_str("default"),
            Retention::Limits(limits) => limits.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Retention {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Value::deserialize(deserializer)? {
            Value::String(tag) if tag == "default" => Ok(Retention::Default),
            Value::String(tag) => Err(serde::de::Error::custom(format!(
                "unknown retention policy '{tag}'"
            ))),
            other => serde_json::from_value(other)
                .map(Retention::Limits)
                .map_err(serde::de::Error::custom),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention: Option<Retention>,
}

impl JobSettings {
    /// True when the job follows the global retention policy.
    pub fn uses_default_retention(&self) -> bool {
        matches!(self.retention, None | Some(Retention::Default))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalSettings {
    pub retention: Retention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pruned {
    pub run_id: String,
    pub size: u64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneTally {
    pub runs: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub kept: PruneTally,
    pub pruned: PruneTally,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneResult {
    pub pruned: Vec<Pruned>,
    pub stats: PruneStats,
}

impl PruneResult {
    /// Folds another job's result into a running total.
    pub fn absorb(&mut self, other: PruneResult) {
        self.pruned.extend(other.pruned);
        self.stats.kept.runs += other.stats.kept.runs;
        self.stats.kept.size += other.stats.kept.size;
        self.stats.pruned.runs += other.stats.pruned.runs;
        self.stats.pruned.size += other.stats.pruned.size;
    }
}
