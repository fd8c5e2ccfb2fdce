use syncron_core::LogWindowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP error with status {status}: {message}")]
    Http { status: u16, message: String },

    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("cannot encode request for {url}: {source}")]
    Encode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("event stream failed: {0}")]
    Stream(String),
}

impl ApiError {
    pub async fn from_response(response: reqwest::Response) -> ApiError {
        let status = response.status().as_u16();
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "failed to read response text".to_string());
        ApiError::Http { status, message }
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Log(#[from] LogWindowError),

    #[error("{0} has been deleted")]
    Deleted(String),

    #[error("resource is not live")]
    NotLive,

    #[error("synchronizer is closed")]
    Closed,
}
