use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TopicError {
    #[error("invalid topic filter {filter:?}: '{wildcard}' has to be a whole level")]
    WildcardNotWholeLevel { filter: String, wildcard: char },
    #[error("invalid topic filter {filter:?}: '#' has to be the last level")]
    MultiLevelNotLast { filter: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Level {
    Exact(String),
    Single,
    Multi,
}

/// Slash-separated topic filter. `+` matches exactly one level and `#`
/// matches whatever remains, including nothing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicFilter {
    raw: String,
    levels: Vec<Level>,
}

impl TopicFilter {
    pub fn new(filter: &str) -> Result<Self, TopicError> {
        let parts: Vec<&str> = filter.split('/').collect();
        let last = parts.len() - 1;
        let mut levels = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            let level = match part {
                "+" => Level::Single,
                "#" if index == last => Level::Multi,
                "#" => {
                    return Err(TopicError::MultiLevelNotLast {
                        filter: filter.to_string(),
                    })
                }
                other => {
                    if let Some(wildcard) = other.chars().find(|ch| *ch == '+' || *ch == '#') {
                        return Err(TopicError::WildcardNotWholeLevel {
                            filter: filter.to_string(),
                            wildcard,
                        });
                    }
                    Level::Exact(other.to_string())
                }
            };
            levels.push(level);
        }
        Ok(Self {
            raw: filter.to_string(),
            levels,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, topic: &str) -> bool {
        let mut topic_levels = topic.split('/');
        for level in &self.levels {
            match level {
                Level::Multi => return true,
                Level::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                Level::Exact(expected) => match topic_levels.next() {
                    Some(actual) if actual == expected => {}
                    _ => return false,
                },
            }
        }
        topic_levels.next().is_none()
    }
}

impl fmt::Display for TopicFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

pub fn jobs_topic() -> String {
    "job".to_string()
}

pub fn job_topic(user: &str, job_id: &str) -> String {
    format!("job/{user}/{job_id}")
}

pub fn runs_topic(user: &str, job_id: &str) -> String {
    format!("job/{user}/{job_id}/run")
}

pub fn run_topic(user: &str, job_id: &str, run_id: &str) -> String {
    format!("job/{user}/{job_id}/run/{run_id}")
}

pub fn run_log_topic(user: &str, job_id: &str, run_id: &str) -> String {
    format!("job/{user}/{job_id}/run/{run_id}/log")
}

/// Resource identity carried in the first levels of a topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPath {
    pub user: String,
    pub job_id: String,
    pub run_id: Option<String>,
}

/// Extracts `(user, job, run?)` from `job/{user}/{job}[/run[/{run}[/...]]]`.
pub fn identity_prefix(topic: &str) -> Option<TopicPath> {
    let mut levels = topic.split('/');
    if levels.next()? != "job" {
        return None;
    }
    let user = levels.next()?.to_string();
    let job_id = levels.next()?.to_string();
    let run_id = match levels.next() {
        Some("run") => levels.next().map(str::to_string),
        _ => None,
    };
    Some(TopicPath {
        user,
        job_id,
        run_id,
    })
}
