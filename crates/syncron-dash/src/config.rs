use anyhow::{bail, Context, Result};
use clap::Parser;
use std::io;
use std::time::Duration;
use syncron_core::{JobKey, DEFAULT_CHUNK_BYTES};
use syncron_live::sync::DEFAULT_RUNS_PAGE;
use syncron_live::SyncConfig;
use tracing_subscriber::EnvFilter;
use url::Url;

const DEFAULT_SERVER: &str = "http://127.0.0.1:8000/";

#[derive(Debug, Parser)]
#[command(name = "syncron-dash", about = "Live terminal dashboard for a syncron server")]
pub struct Args {
    /// Server base URL [env: SYNCRON_SERVER]
    #[arg(long)]
    pub server: Option<String>,
    /// Upper bound for a single log read, in bytes [env: SYNCRON_CHUNK_BYTES]
    #[arg(long)]
    pub chunk_bytes: Option<u64>,
    /// Runs fetched per page [env: SYNCRON_RUNS_PAGE]
    #[arg(long)]
    pub runs_page: Option<u32>,
    /// Per-request timeout [env: SYNCRON_TIMEOUT_SECS]
    #[arg(long)]
    pub timeout_secs: Option<u64>,
    /// Open this job's runs at start, as `user/id`
    #[arg(long)]
    pub job: Option<String>,
    /// Open this run's log at start; needs --job
    #[arg(long, requires = "job")]
    pub run: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub server: Url,
    pub timeout: Option<Duration>,
    pub sync: SyncConfig,
    pub job: Option<JobKey>,
    pub run: Option<String>,
}

pub fn load_config(args: Args) -> Result<Config> {
    let server = resolve_server(args.server)?;
    let chunk_bytes = resolve_chunk_bytes(args.chunk_bytes)?;
    let runs_page = resolve_runs_page(args.runs_page)?;
    let timeout = resolve_timeout(args.timeout_secs)?;
    let job = args.job.as_deref().map(parse_job_key).transpose()?;
    Ok(Config {
        server,
        timeout,
        sync: SyncConfig {
            chunk_bytes,
            runs_page,
        },
        job,
        run: args.run,
    })
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_number<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_value(name)
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("{name}={value} is not a number"))
        })
        .transpose()
}

fn resolve_server(flag: Option<String>) -> Result<Url> {
    let raw = flag
        .or_else(|| env_value("SYNCRON_SERVER"))
        .unwrap_or_else(|| DEFAULT_SERVER.to_string());
    let mut server = Url::parse(&raw).with_context(|| format!("invalid server url {raw:?}"))?;
    if !server.path().ends_with('/') {
        let path = format!("{}/", server.path());
        server.set_path(&path);
    }
    Ok(server)
}

fn resolve_chunk_bytes(flag: Option<u64>) -> Result<u64> {
    let chunk = match flag {
        Some(chunk) => chunk,
        None => env_number("SYNCRON_CHUNK_BYTES")?.unwrap_or(DEFAULT_CHUNK_BYTES),
    };
    if chunk == 0 {
        bail!("chunk size must be positive");
    }
    Ok(chunk)
}

fn resolve_runs_page(flag: Option<u32>) -> Result<u32> {
    let page = match flag {
        Some(page) => page,
        None => env_number("SYNCRON_RUNS_PAGE")?.unwrap_or(DEFAULT_RUNS_PAGE),
    };
    if page == 0 {
        bail!("runs page size must be positive");
    }
    Ok(page)
}

fn resolve_timeout(flag: Option<u64>) -> Result<Option<Duration>> {
    let secs = match flag {
        Some(secs) => Some(secs),
        None => env_number("SYNCRON_TIMEOUT_SECS")?,
    };
    Ok(secs.filter(|secs| *secs > 0).map(Duration::from_secs))
}

fn parse_job_key(raw: &str) -> Result<JobKey> {
    match raw.split_once('/') {
        Some((user, id)) if !user.is_empty() && !id.is_empty() && !id.contains('/') => {
            Ok(JobKey::new(user, id))
        }
        _ => bail!("--job expects user/id, got {raw:?}"),
    }
}

/// Logs go nowhere unless `SYNCRON_LOG_STDOUT` is set: the terminal belongs
/// to the dashboard.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_enabled = std::env::var("SYNCRON_LOG_STDOUT")
        .ok()
        .and_then(|value| parse_bool_flag(&value))
        .unwrap_or(false);
    if stdout_enabled {
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::sink)
            .try_init();
    }
}
