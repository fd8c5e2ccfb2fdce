use serde::de::Deserializer;
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How a finished run ended. A run that is still going has no status at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signal(i32),
    CoreDump(i32),
    ServerTimeout,
    ClientTimeout,
    /// Anything the server sent that does not match a known tag.
    Unknown(Value),
}

impl ExitStatus {
    fn from_value(value: Value) -> Self {
        match &value {
            Value::String(tag) => match tag.as_str() {
                "ServerTimeout" => return ExitStatus::ServerTimeout,
                "ClientTimeout" => return ExitStatus::ClientTimeout,
                _ => {}
            },
            Value::Object(map) if map.len() == 1 => {
                if let Some((tag, code)) = map.iter().next() {
                    let code = code.as_i64().and_then(|code| i32::try_from(code).ok());
                    match (tag.as_str(), code) {
                        ("Exited", Some(code)) => return ExitStatus::Exited(code),
                        ("Signal", Some(code)) => return ExitStatus::Signal(code),
                        ("CoreDump", Some(code)) => return ExitStatus::CoreDump(code),
                        _ => {}
                    }
                }
            }
            _ => {}
        }
        ExitStatus::Unknown(value)
    }
}

impl Serialize for ExitStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (tag, code) = match self {
            ExitStatus::Exited(code) => ("Exited", *code),
            ExitStatus::Signal(code) => ("Signal", *code),
            ExitStatus::CoreDump(code) => ("CoreDump", *code),
            ExitStatus::ServerTimeout => return serializer.serialize_str("ServerTimeout"),
            ExitStatus::ClientTimeout => return serializer.serialize_str("ClientTimeout"),
            ExitStatus::Unknown(raw) => return raw.serialize(serializer),
        };
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(tag, &code)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ExitStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Value::deserialize(deserializer).map(ExitStatus::from_value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Outcome {
    Running,
    Success,
    Failure,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Running => "Running",
            Outcome::Success => "Success",
            Outcome::Failure => "Failure",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derives the outcome of a run. A job that exits non-zero without
/// printing anything still counts as a success.
pub fn classify(status: Option<&ExitStatus>, log_len: u64) -> Outcome {
    match status {
        None => Outcome::Running,
        Some(ExitStatus::Exited(0)) => Outcome::Success,
        Some(_) if log_len == 0 => Outcome::Success,
        Some(_) => Outcome::Failure,
    }
}

pub fn describe(status: Option<&ExitStatus>) -> String {
    match status {
        None => "...".to_string(),
        Some(ExitStatus::Exited(code)) => format!("Exited with status {code}"),
        Some(ExitStatus::Signal(signal)) => format!("Killed with signal {signal}"),
        Some(ExitStatus::CoreDump(signal)) => format!("Dumped Core with signal {signal}"),
        Some(ExitStatus::ServerTimeout) => "Timed out (server)".to_string(),
        Some(ExitStatus::ClientTimeout) => "Timed out (client)".to_string(),
        Some(ExitStatus::Unknown(raw)) => format!("Unknown status {raw}"),
    }
}

const BYTE_UNITS: [&str; 7] = ["B", "KB", "MB", "GB", "TB", "PB", "EB"];

/// Formats a byte count with at most four numeric characters, e.g. `1.17MB`.
pub fn human_bytes(bytes: u64) -> String {
    if bytes == 0 {
        return "0B".to_string();
    }
    let mut exp = 0usize;
    let mut scaled = bytes as f64;
    while scaled >= 1024.0 && exp < BYTE_UNITS.len() - 1 {
        scaled /= 1024.0;
        exp += 1;
    }
    let digits = format!("{scaled}");
    let mut short: String = digits.chars().take(4).collect();
    if short.ends_with('.') {
        short.pop();
    }
    format!("{short}{}", BYTE_UNITS[exp])
}
