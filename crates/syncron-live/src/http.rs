use crate::api::{AdminApi, EventStream, LogBytes, LogRange, PruneMode, RunsQuery, SyncronApi};
use crate::error::ApiError;
use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use syncron_core::settings::{GlobalSettings, JobSettings, PruneResult};
use syncron_core::{Event, Job, Run, SuccessHistory};
use tracing::{debug, warn};
use url::Url;

const LOG_LENGTH_HEADER: &str = "x-log-length";
const EVENTS_PATH: &str = "/events";
const GLOBAL_SETTINGS_PATH: &str = "/settings";
const JOBS_PATH: &str = "/jobs";

/// The job-execution service over HTTP, with events as server-sent events.
#[derive(Debug, Clone)]
pub struct HttpApi {
    base: Url,
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpApi {
    pub fn new(base: Url, timeout: Option<Duration>) -> Result<Self, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(concat!("syncron-dash/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            base,
            client,
            timeout,
        })
    }

    fn resolve(&self, target: &str) -> Result<Url, ApiError> {
        self.base.join(target).map_err(|source| ApiError::InvalidUrl {
            url: target.to_string(),
            source,
        })
    }

    /// Every request except the event stream is bounded by the configured timeout.
    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match self.timeout {
            Some(timeout) => builder.timeout(timeout),
            None => builder,
        }
    }

    async fn get_json<T>(&self, target: &str, query: &[(&str, String)]) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
    {
        let url = self.resolve(target)?;
        debug!(event = "http_get", url = %url);
        let response = self
            .request(Method::GET, url.clone())
            .query(query)
            .send()
            .await?;
        decode_json(url, checked(response).await?).await
    }

    async fn send_json<B>(&self, method: Method, target: &str, body: &B) -> Result<Response, ApiError>
    where
        B: Serialize + ?Sized,
    {
        let url = self.resolve(target)?;
        debug!(event = "http_send", method = %method, url = %url);
        let response = self.request(method, url).json(body).send().await?;
        checked(response).await
    }
}

async fn checked(response: Response) -> Result<Response, ApiError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(ApiError::from_response(response).await)
    }
}

fn encode_query<T>(url: &str, value: &T) -> Result<String, ApiError>
where
    T: Serialize + ?Sized,
{
    serde_json::to_string(value).map_err(|source| ApiError::Encode {
        url: url.to_string(),
        source,
    })
}

async fn decode_json<T>(url: Url, response: Response) -> Result<T, ApiError>
where
    T: DeserializeOwned,
{
    let body = response.bytes().await?;
    serde_json::from_slice(&body).map_err(|err| ApiError::Decode {
        url: url.to_string(),
        message: err.to_string(),
    })
}

#[async_trait]
impl SyncronApi for HttpApi {
    async fn jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.get_json(JOBS_PATH, &[]).await
    }

    async fn runs(&self, runs_url: &str, query: &RunsQuery) -> Result<Vec<Run>, ApiError> {
        self.get_json(runs_url, &query.to_pairs()).await
    }

    async fn run(&self, run_url: &str, seek: Option<u64>) -> Result<Run, ApiError> {
        let query: Vec<(&str, String)> = seek
            .map(|seek| vec![("seek", seek.to_string())])
            .unwrap_or_default();
        self.get_json(run_url, &query).await
    }

    async fn log(&self, log_url: &str, range: LogRange) -> Result<LogBytes, ApiError> {
        let url = self.resolve(log_url)?;
        let response = self
            .request(Method::GET, url)
            .header(header::ACCEPT, "text/plain")
            .query(&range.to_pairs())
            .send()
            .await?;
        let response = checked(response).await?;
        let total = response
            .headers()
            .get(LOG_LENGTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok());
        let bytes = response.bytes().await?.to_vec();
        Ok(LogBytes { bytes, total })
    }

    async fn subscribe(&self, topics: &[String]) -> Result<EventStream, ApiError> {
        let url = self.resolve(EVENTS_PATH)?;
        let query: Vec<(&str, &str)> = topics.iter().map(|topic| ("topic", topic.as_str())).collect();
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, "text/event-stream")
            .query(&query)
            .send()
            .await?;
        let response = checked(response).await?;
        let stream = response
            .bytes_stream()
            .eventsource()
            .filter_map(|message| async move {
                match message {
                    Ok(message) if message.data.trim().is_empty() => None,
                    Ok(message) => match Event::decode(&message.data) {
                        Ok(event) => Some(Ok(event)),
                        Err(err) => {
                            warn!(event = "sse_decode_error", sse_event = %message.event, error = %err);
                            None
                        }
                    },
                    Err(err) => Some(Err(ApiError::Stream(err.to_string()))),
                }
            });
        Ok(stream.boxed())
    }
}

#[async_trait]
impl AdminApi for HttpApi {
    async fn job_settings(&self, settings_url: &str) -> Result<JobSettings, ApiError> {
        self.get_json(settings_url, &[]).await
    }

    async fn put_job_settings(
        &self,
        settings_url: &str,
        settings: &JobSettings,
    ) -> Result<(), ApiError> {
        self.send_json(Method::PUT, settings_url, settings).await?;
        Ok(())
    }

    async fn global_settings(&self) -> Result<GlobalSettings, ApiError> {
        self.get_json(GLOBAL_SETTINGS_PATH, &[]).await
    }

    async fn put_global_settings(&self, settings: &GlobalSettings) -> Result<(), ApiError> {
        self.send_json(Method::PUT, GLOBAL_SETTINGS_PATH, settings)
            .await?;
        Ok(())
    }

    async fn prune(&self, prune_url: &str, mode: PruneMode) -> Result<PruneResult, ApiError> {
        match mode {
            PruneMode::DryRun(retention) => {
                let mut query = Vec::new();
                if let Some(retention) = retention {
                    query.push(("settings", encode_query(prune_url, &retention)?));
                }
                self.get_json(prune_url, &query).await
            }
            PruneMode::Apply => {
                let url = self.resolve(prune_url)?;
                let response = self.request(Method::POST, url.clone()).send().await?;
                decode_json(url, checked(response).await?).await
            }
        }
    }

    async fn success_history(
        &self,
        success_url: &str,
        before: Option<i64>,
        after: Option<i64>,
    ) -> Result<SuccessHistory, ApiError> {
        let mut query = Vec::new();
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        if let Some(after) = after {
            query.push(("after", after.to_string()));
        }
        self.get_json(success_url, &query).await
    }
}
