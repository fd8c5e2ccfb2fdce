use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use syncron_core::settings::{
    JobSettings, PruneResult, PruneStats, PruneTally, Pruned, Retention, RetentionLimits,
};
use syncron_core::{
    apply_limit, Edge, Event, EventPayload, Job, LogPart, LogWindow, Progress, Run,
    SuccessHistory, TopicFilter,
};
use syncron_live::api::preview_default_retention;
use syncron_live::{
    AdminApi, ApiError, EventStream, JobsResource, LogBytes, LogRange, PruneMode, ResourceSpec,
    RunCommand, RunModel, RunResource, RunsCommand, RunsQuery, RunsResource, SessionManager,
    SyncConfig, SyncState, SyncView, SyncronApi, Synchronizer, Visibility,
};
use tokio::sync::{mpsc, Semaphore};

const WAIT: Duration = Duration::from_secs(5);

type Subscriber = (Vec<TopicFilter>, mpsc::UnboundedSender<Result<Event, ApiError>>);

/// Routes published events to every open subscription whose filters match.
#[derive(Default)]
struct Broker {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl Broker {
    fn subscribe(&self, topics: &[String]) -> EventStream {
        let filters = topics
            .iter()
            .map(|topic| TopicFilter::new(topic).expect("valid topic filter"))
            .collect();
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push((filters, tx));
        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|item| (item, rx)) }).boxed()
    }

    fn publish(&self, event: Event) {
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|(_, tx)| !tx.is_closed());
        for (filters, tx) in subscribers.iter() {
            if filters.iter().any(|filter| filter.matches(&event.topic)) {
                let _ = tx.send(Ok(event.clone()));
            }
        }
    }

    fn fail_all(&self, message: &str) {
        for (_, tx) in self.subscribers.lock().unwrap().iter() {
            let _ = tx.send(Err(ApiError::Stream(message.to_string())));
        }
    }

    fn open(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .count()
    }
}

/// In-memory stand-in for the job service.
#[derive(Default)]
struct FakeService {
    broker: Broker,
    jobs: Mutex<Vec<Job>>,
    runs: Mutex<HashMap<String, Vec<Run>>>,
    run: Mutex<HashMap<String, Run>>,
    logs: Mutex<HashMap<String, Vec<u8>>>,
    settings: Mutex<HashMap<String, JobSettings>>,
    prune_results: Mutex<HashMap<String, PruneResult>>,
    fail_jobs: AtomicBool,
    jobs_calls: AtomicUsize,
    log_calls: AtomicUsize,
    logs_served: AtomicUsize,
    log_gate: Mutex<Option<Arc<Semaphore>>>,
    /// Output run r1 writes while a subscription is being opened.
    write_on_subscribe: Mutex<Option<String>>,
}

impl FakeService {
    fn gate_logs(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.log_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Run r1 prints `chunk`: the log grows, then the append is published
    /// without a `seek`.
    fn write_log(&self, chunk: &str) {
        self.logs
            .lock()
            .unwrap()
            .entry(LOG_URL.to_string())
            .or_default()
            .extend_from_slice(chunk.as_bytes());
        if let Some(record) = self.run.lock().unwrap().get_mut(RUN_URL) {
            record.log_len += chunk.len() as u64;
        }
        self.broker.publish(Event::new(
            LOG_TOPIC,
            EventPayload::RunLogAppend {
                chunk: chunk.to_string(),
                seek: None,
            },
        ));
    }
}

#[async_trait]
impl SyncronApi for FakeService {
    async fn jobs(&self) -> Result<Vec<Job>, ApiError> {
        self.jobs_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_jobs.load(Ordering::SeqCst) {
            return Err(ApiError::Http {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn runs(&self, runs_url: &str, query: &RunsQuery) -> Result<Vec<Run>, ApiError> {
        let mut runs = self
            .runs
            .lock()
            .unwrap()
            .get(runs_url)
            .cloned()
            .unwrap_or_default();
        if !query.ids.is_empty() {
            runs.retain(|run| query.ids.contains(&run.id));
            return Ok(runs);
        }
        runs.sort_by(|a, b| b.unique_id.cmp(&a.unique_id));
        runs.retain(|run| {
            let id = run.unique_id.unwrap_or_default();
            query.before.map_or(true, |before| id < before)
        });
        if let Some(num) = query.num {
            runs.truncate(num as usize);
        }
        Ok(runs)
    }

    async fn run(&self, run_url: &str, _seek: Option<u64>) -> Result<Run, ApiError> {
        self.run
            .lock()
            .unwrap()
            .get(run_url)
            .cloned()
            .ok_or_else(|| ApiError::Http {
                status: 404,
                message: format!("no run at {run_url}"),
            })
    }

    async fn log(&self, log_url: &str, range: LogRange) -> Result<LogBytes, ApiError> {
        self.log_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.log_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate.acquire().await.map_err(|_| ApiError::Http {
                status: 503,
                message: "log gate closed".into(),
            })?;
            permit.forget();
        }
        let log = self
            .logs
            .lock()
            .unwrap()
            .get(log_url)
            .cloned()
            .unwrap_or_default();
        let (start, len) = apply_limit(log.len() as u64, range.seek, range.limit);
        let start = start as usize;
        let end = start + len as usize;
        self.logs_served.fetch_add(1, Ordering::SeqCst);
        Ok(LogBytes {
            bytes: log[start..end].to_vec(),
            total: Some(log.len() as u64),
        })
    }

    async fn subscribe(&self, topics: &[String]) -> Result<EventStream, ApiError> {
        let events = self.broker.subscribe(topics);
        let pending = self.write_on_subscribe.lock().unwrap().take();
        if let Some(chunk) = pending {
            self.write_log(&chunk);
        }
        Ok(events)
    }
}

#[async_trait]
impl AdminApi for FakeService {
    async fn job_settings(&self, settings_url: &str) -> Result<JobSettings, ApiError> {
        Ok(self
            .settings
            .lock()
            .unwrap()
            .get(settings_url)
            .copied()
            .unwrap_or_default())
    }

    async fn put_job_settings(
        &self,
        settings_url: &str,
        settings: &JobSettings,
    ) -> Result<(), ApiError> {
        self.settings
            .lock()
            .unwrap()
            .insert(settings_url.to_string(), *settings);
        Ok(())
    }

    async fn global_settings(&self) -> Result<syncron_core::settings::GlobalSettings, ApiError> {
        Ok(syncron_core::settings::GlobalSettings {
            retention: Retention::Limits(RetentionLimits::default()),
        })
    }

    async fn put_global_settings(
        &self,
        _settings: &syncron_core::settings::GlobalSettings,
    ) -> Result<(), ApiError> {
        Ok(())
    }

    async fn prune(&self, prune_url: &str, mode: PruneMode) -> Result<PruneResult, ApiError> {
        assert!(matches!(mode, PruneMode::DryRun(Some(_))));
        Ok(self
            .prune_results
            .lock()
            .unwrap()
            .get(prune_url)
            .cloned()
            .unwrap_or_default())
    }

    async fn success_history(
        &self,
        _success_url: &str,
        _before: Option<i64>,
        _after: Option<i64>,
    ) -> Result<SuccessHistory, ApiError> {
        Ok(Vec::new())
    }
}

fn job(user: &str, id: &str, name: &str) -> Job {
    serde_json::from_value(json!({ "user": user, "id": id, "name": name })).unwrap()
}

fn run(id: &str, unique_id: i64) -> Run {
    serde_json::from_value(json!({
        "id": id,
        "unique_id": unique_id,
        "date": 1_700_000_000_000_i64 + unique_id * 1_000,
        "status": null,
        "log_len": 0,
    }))
    .unwrap()
}

fn finished(id: &str, unique_id: i64, code: i32) -> Run {
    let mut run = run(id, unique_id);
    run.status = serde_json::from_value(json!({ "Exited": code })).unwrap();
    run
}

fn log_text(log: &LogWindow) -> Vec<u8> {
    log.parts()
        .iter()
        .filter_map(|part| match part {
            LogPart::Text(bytes) => Some(bytes.clone()),
            LogPart::Gap(_) => None,
        })
        .flatten()
        .collect()
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

fn service() -> Arc<FakeService> {
    Arc::new(FakeService::default())
}

fn api(service: &Arc<FakeService>) -> Arc<dyn SyncronApi> {
    service.clone()
}

const RUN_URL: &str = "/job/ops/nightly/run/r1";
const LOG_URL: &str = "/job/ops/nightly/run/r1/log";
const RUN_TOPIC: &str = "job/ops/nightly/run/r1";
const LOG_TOPIC: &str = "job/ops/nightly/run/r1/log";

fn run_resource() -> RunResource {
    RunResource::new(
        job("ops", "nightly", "Nightly").key(),
        "r1",
        Some(RUN_URL.to_string()),
    )
}

/// Serves run r1 with a `len`-byte log that is only reachable through `log_url`.
fn seed_large_log(service: &FakeService, len: usize) -> Vec<u8> {
    let log: Vec<u8> = (0..len).map(|index| b'a' + (index % 26) as u8).collect();
    let mut record = run("r1", 1);
    record.log_len = len as u64;
    record.log_url = Some(LOG_URL.to_string());
    service.run.lock().unwrap().insert(RUN_URL.to_string(), record);
    service
        .logs
        .lock()
        .unwrap()
        .insert(LOG_URL.to_string(), log.clone());
    log
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn jobs_snapshot_then_live_updates() {
    let service = service();
    service.jobs.lock().unwrap().push(job("ops", "nightly", "Nightly"));

    let sync = Synchronizer::activate(JobsResource, api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    assert_eq!(sync.read(|view| view.model.jobs.len()), 1);

    // Redelivery of a job already in the snapshot must not duplicate it.
    service.broker.publish(Event::new(
        "job",
        EventPayload::JobCreate(job("ops", "nightly", "Nightly")),
    ));
    service.broker.publish(Event::new(
        "job",
        EventPayload::JobCreate(job("ops", "backup", "Backup")),
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly/run/r2",
        EventPayload::RunCreate(run("r2", 2)),
    ));
    within(sync.wait_for(|view| {
        view.model
            .jobs
            .values()
            .any(|job| job.latest_run.as_ref().is_some_and(|run| run.id == "r2"))
    }))
    .await
    .unwrap();

    let names: Vec<String> = sync.read(|view| {
        view.model
            .list()
            .into_iter()
            .map(|job| job.name.clone())
            .collect()
    });
    assert_eq!(names, vec!["Backup", "Nightly"]);

    service.broker.publish(Event::new(
        "job/ops/nightly/run/r2",
        EventPayload::RunUpdate(finished("r2", 2, 0)),
    ));
    within(sync.wait_for(|view| {
        view.model
            .jobs
            .values()
            .any(|job| job.latest_run.as_ref().is_some_and(Run::is_terminal))
    }))
    .await
    .unwrap();
    sync.deactivate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_for_unknown_job_is_dropped() {
    let service = service();
    service.jobs.lock().unwrap().push(job("ops", "nightly", "Nightly"));
    let sync = Synchronizer::activate(JobsResource, api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();

    service.broker.publish(Event::new(
        "job/ops/ghost",
        EventPayload::JobUpdate(job("ops", "ghost", "Ghost")),
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly",
        EventPayload::JobUpdate(job("ops", "nightly", "Nightly v2")),
    ));
    within(sync.wait_for(|view| {
        view.model
            .jobs
            .values()
            .any(|job| job.name == "Nightly v2")
    }))
    .await
    .unwrap();
    assert_eq!(sync.read(|view| view.model.jobs.len()), 1);
    assert_eq!(sync.state(), SyncState::Live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_job_ignores_updates_until_recreated() {
    let service = service();
    service.jobs.lock().unwrap().push(job("ops", "nightly", "Nightly"));
    let sync = Synchronizer::activate(JobsResource, api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();

    service
        .broker
        .publish(Event::new("job/ops/nightly", EventPayload::JobDelete {}));
    service.broker.publish(Event::new(
        "job/ops/nightly",
        EventPayload::JobUpdate(job("ops", "nightly", "Nightly v2")),
    ));
    service.broker.publish(Event::new(
        "job",
        EventPayload::JobCreate(job("ops", "backup", "Backup")),
    ));
    within(sync.wait_for(|view| view.model.jobs.len() == 1 && view.model.deleted.len() == 1))
        .await
        .unwrap();
    let names: Vec<String> = sync.read(|view| {
        view.model
            .list()
            .into_iter()
            .map(|job| job.name.clone())
            .collect()
    });
    assert_eq!(names, vec!["Backup"]);

    service.broker.publish(Event::new(
        "job",
        EventPayload::JobCreate(job("ops", "nightly", "Nightly v3")),
    ));
    within(sync.wait_for(|view| view.model.jobs.len() == 2))
        .await
        .unwrap();
    assert!(sync.read(|view| view.model.deleted.is_empty()));
    service.broker.publish(Event::new(
        "job/ops/nightly",
        EventPayload::JobUpdate(job("ops", "nightly", "Nightly v4")),
    ));
    within(sync.wait_for(|view| view.model.jobs.values().any(|job| job.name == "Nightly v4")))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_runs_stay_deleted() {
    let service = service();
    let nightly = job("ops", "nightly", "Nightly");
    service
        .runs
        .lock()
        .unwrap()
        .insert(nightly.runs_url(), vec![run("r1", 1), run("r2", 2)]);

    let sync = Synchronizer::activate(RunsResource::new(&nightly), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    let ids: Vec<String> = sync.read(|view| view.model.runs.iter().map(|run| run.id.clone()).collect());
    assert_eq!(ids, vec!["r2", "r1"]);

    service.broker.publish(Event::new(
        "job/ops/nightly/run/r1",
        EventPayload::RunDelete { reason: None },
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly/run",
        EventPayload::RunCreate(run("r1", 1)),
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly/run",
        EventPayload::RunCreate(run("r3", 3)),
    ));
    within(sync.wait_for(|view| view.model.get("r3").is_some()))
        .await
        .unwrap();
    let ids: Vec<String> = sync.read(|view| view.model.runs.iter().map(|run| run.id.clone()).collect());
    assert_eq!(ids, vec!["r3", "r2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn runs_page_backwards_and_refresh() {
    let service = service();
    let nightly = job("ops", "nightly", "Nightly");
    service
        .runs
        .lock()
        .unwrap()
        .insert(nightly.runs_url(), vec![run("r1", 1), run("r2", 2), run("r3", 3)]);
    let config = SyncConfig {
        runs_page: 2,
        ..SyncConfig::default()
    };

    let sync = Synchronizer::activate(RunsResource::new(&nightly), api(&service), config);
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    assert_eq!(sync.read(|view| view.model.runs.len()), 2);
    assert!(!sync.read(|view| view.model.exhausted));

    sync.command(RunsCommand::LoadMore(2)).await.unwrap();
    within(sync.wait_for(|view| view.model.exhausted && !view.model.loading_more))
        .await
        .unwrap();
    let ids: Vec<String> = sync.read(|view| view.model.runs.iter().map(|run| run.id.clone()).collect());
    assert_eq!(ids, vec!["r3", "r2", "r1"]);

    service
        .runs
        .lock()
        .unwrap()
        .insert(nightly.runs_url(), vec![finished("r2", 2, 1)]);
    sync.command(RunsCommand::Refresh(Vec::new())).await.unwrap();
    within(sync.wait_for(|view| view.model.get("r2").is_some_and(Run::is_terminal)))
        .await
        .unwrap();
    assert_eq!(sync.read(|view| view.model.runs.len()), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn appends_skip_duplicates_and_catch_up_missed_bytes() {
    let service = service();
    let full = b"0123456789ABCDEFGHIJKL".to_vec();
    let mut record = run("r1", 1);
    record.log_len = 10;
    record.inline_log = Some("0123456789".to_string());
    service.run.lock().unwrap().insert(RUN_URL.to_string(), record);
    service
        .logs
        .lock()
        .unwrap()
        .insert(format!("{RUN_URL}/log"), full.clone());

    let sync = Synchronizer::activate(run_resource(), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();

    let log_topic = "job/ops/nightly/run/r1/log";
    let append = |chunk: &str, seek: u64| {
        Event::new(
            log_topic,
            EventPayload::RunLogAppend {
                chunk: chunk.to_string(),
                seek: Some(seek),
            },
        )
    };
    // Overlaps the snapshot by two bytes, then repeats itself.
    service.broker.publish(append("89AB", 8));
    service.broker.publish(append("AB", 10));
    within(sync.wait_for(|view| view.model.log().is_some_and(|log| log.log_len() == 12)))
        .await
        .unwrap();
    assert_eq!(
        sync.read(|view| view.model.log().map(log_text)),
        Some(b"0123456789AB".to_vec())
    );

    // Bytes 12..20 never arrived live; the driver reads them back.
    service.broker.publish(append("KL", 20));
    within(sync.wait_for(|view| {
        !view.model.catching_up && view.model.log().is_some_and(|log| log.log_len() == 22)
    }))
    .await
    .unwrap();
    let (text, log_len) = sync.read(|view| {
        let run = view.model.run.as_ref().unwrap();
        (log_text(&run.log), run.log_len)
    });
    assert_eq!(text, full);
    assert_eq!(log_len, 22);
}

/// Serves a running run r1 whose whole log fits in the run record.
fn seed_running_run(service: &FakeService, text: &str) {
    let mut record = run("r1", 1);
    record.log_len = text.len() as u64;
    record.inline_log = Some(text.to_string());
    service.run.lock().unwrap().insert(RUN_URL.to_string(), record);
    service
        .logs
        .lock()
        .unwrap()
        .insert(LOG_URL.to_string(), text.as_bytes().to_vec());
}

fn run_log(view: &SyncView<RunModel>) -> (Vec<u8>, u64) {
    let run = view.model.run.as_ref().unwrap();
    (log_text(&run.log), run.log_len)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_written_while_subscribing_is_neither_lost_nor_doubled() {
    let service = service();
    let mut record = run("r1", 1);
    record.log_len = 3;
    record.log_url = Some(LOG_URL.to_string());
    service.run.lock().unwrap().insert(RUN_URL.to_string(), record);
    service
        .logs
        .lock()
        .unwrap()
        .insert(LOG_URL.to_string(), b"abc".to_vec());
    *service.write_on_subscribe.lock().unwrap() = Some("def".to_string());

    let sync = Synchronizer::activate(run_resource(), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| {
        view.state == SyncState::Live
            && view.pending == 0
            && !view.model.catching_up
            && !view.model.resyncing
    }))
    .await
    .unwrap();
    assert_eq!(sync.read(run_log), (b"abcdef".to_vec(), 6));

    service.write_log("ghi");
    let mut finished_run = finished("r1", 1, 0);
    finished_run.log_len = 9;
    service
        .broker
        .publish(Event::new(RUN_TOPIC, EventPayload::RunUpdate(finished_run)));
    within(sync.wait_for(|view| {
        view.pending == 0
            && !view.model.catching_up
            && view.model.run.as_ref().is_some_and(Run::is_terminal)
            && view.model.log().is_some_and(|log| log.log_len() == 9)
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(sync.read(run_log), (b"abcdefghi".to_vec(), 9));
    assert!(sync.read(|view| view.model.log().is_some_and(|log| log.check().is_ok())));
    sync.deactivate().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn appends_without_seek_grow_log_len_by_their_length() {
    let service = service();
    seed_running_run(&service, "abc");
    let sync = Synchronizer::activate(run_resource(), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();

    for chunk in ["de", "fgh", "", "i"] {
        service.broker.publish(Event::new(
            LOG_TOPIC,
            EventPayload::RunLogAppend {
                chunk: chunk.to_string(),
                seek: None,
            },
        ));
    }
    within(sync.wait_for(|view| view.model.run.as_ref().is_some_and(|run| run.log_len == 9)))
        .await
        .unwrap();
    assert_eq!(sync.read(run_log), (b"abcdefghi".to_vec(), 9));
    assert_eq!(
        sync.read(|view| view.model.log().map(LogWindow::log_len)),
        Some(9)
    );
    assert_eq!(service.log_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_run_tracks_progress_and_reported_length() {
    let service = service();
    seed_running_run(&service, "abc");
    service
        .logs
        .lock()
        .unwrap()
        .insert(LOG_URL.to_string(), b"abcde".to_vec());
    let sync = Synchronizer::activate(run_resource(), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();

    let progress = Progress {
        percent: 0.5,
        eta_seconds: 30,
    };
    service.broker.publish(Event::new(
        RUN_TOPIC,
        EventPayload::RunUpdateProgress {
            progress: Some(progress),
        },
    ));
    service.broker.publish(Event::new(
        RUN_TOPIC,
        EventPayload::RunUpdateLogLen { log_len: 5 },
    ));
    // Older lengths never shrink the count.
    service.broker.publish(Event::new(
        RUN_TOPIC,
        EventPayload::RunUpdateLogLen { log_len: 4 },
    ));
    within(sync.wait_for(|view| {
        view.model
            .run
            .as_ref()
            .is_some_and(|run| run.log_len == 5 && run.progress == Some(progress))
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sync.read(run_log), (b"abc".to_vec(), 5));

    // Finishing clears progress and reads the two bytes the window lacks.
    service.broker.publish(Event::new(
        RUN_TOPIC,
        EventPayload::RunUpdate(finished("r1", 1, 0)),
    ));
    within(sync.wait_for(|view| {
        !view.model.catching_up
            && view.model.log().is_some_and(|log| log.log_len() == 5)
    }))
    .await
    .unwrap();
    let run = sync.read(|view| view.model.run.clone()).unwrap();
    assert!(run.is_terminal());
    assert_eq!(run.progress, None);
    assert_eq!(log_text(&run.log), b"abcde".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_run_log_does_not_grow() {
    let service = service();
    let mut record = finished("r1", 1, 0);
    record.log_len = 4;
    record.inline_log = Some("done".to_string());
    service.run.lock().unwrap().insert(RUN_URL.to_string(), record);

    let sync = Synchronizer::activate(run_resource(), api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    service.broker.publish(Event::new(
        "job/ops/nightly/run/r1",
        EventPayload::RunUpdateLogLen { log_len: 99 },
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly/run/r1/log",
        EventPayload::RunLogAppend {
            chunk: "late".into(),
            seek: None,
        },
    ));
    service.broker.publish(Event::new(
        "job/ops/nightly/run/r1",
        EventPayload::RunUpdate(finished("r1", 1, 0)),
    ));
    within(sync.wait_for(|view| view.pending == 0 && view.model.run.is_some()))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (log_len, text) = sync.read(|view| {
        let run = view.model.run.as_ref().unwrap();
        (run.log_len, log_text(&run.log))
    });
    assert_eq!(log_len, 4);
    assert_eq!(text, b"done".to_vec());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn large_log_loads_head_and_tail_then_expands_to_whole() {
    let service = service();
    let full = seed_large_log(&service, 40);
    let config = SyncConfig {
        chunk_bytes: 4,
        ..SyncConfig::default()
    };

    let sync = Synchronizer::activate(run_resource(), api(&service), config);
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    let gap = sync
        .read(|view| view.model.log().and_then(LogWindow::gap))
        .unwrap();
    assert_eq!((gap.from, gap.to), (4, 36));

    let mut edge = Edge::Start;
    while let Some(gap) = sync.read(|view| view.model.log().and_then(LogWindow::gap)) {
        sync.command(RunCommand::Expand { gap, edge, size: 4 })
            .await
            .unwrap();
        within(sync.wait_for(|view| {
            view.pending == 0 && view.model.log().and_then(LogWindow::gap) != Some(gap)
        }))
        .await
        .unwrap();
        edge = match edge {
            Edge::Start => Edge::End,
            Edge::End => Edge::Start,
        };
    }
    assert_eq!(sync.read(|view| view.model.log().map(log_text)), Some(full));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_expands_of_one_gap_apply_once() {
    let service = service();
    seed_large_log(&service, 40);
    let config = SyncConfig {
        chunk_bytes: 4,
        ..SyncConfig::default()
    };
    let sync = Synchronizer::activate(run_resource(), api(&service), config);
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    let gap = sync
        .read(|view| view.model.log().and_then(LogWindow::gap))
        .unwrap();

    sync.command(RunCommand::Expand {
        gap,
        edge: Edge::Start,
        size: 4,
    })
    .await
    .unwrap();
    sync.command(RunCommand::Expand {
        gap,
        edge: Edge::End,
        size: 4,
    })
    .await
    .unwrap();
    within(sync.wait_for(|view| {
        view.pending == 0 && view.model.log().and_then(LogWindow::gap) != Some(gap)
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let loaded = sync.read(|view| view.model.log().map(LogWindow::loaded_bytes));
    assert_eq!(loaded, Some(12));
    let shrunk = sync
        .read(|view| view.model.log().and_then(LogWindow::gap))
        .unwrap();
    assert_eq!(shrunk.len(), 28);
    assert!(sync.read(|view| view.model.log().is_some_and(|log| log.check().is_ok())));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expand_rejects_unknown_gap_inline() {
    let service = service();
    seed_large_log(&service, 40);
    let config = SyncConfig {
        chunk_bytes: 4,
        ..SyncConfig::default()
    };
    let sync = Synchronizer::activate(run_resource(), api(&service), config);
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    let gap = sync
        .read(|view| view.model.log().and_then(LogWindow::gap))
        .unwrap();

    sync.command(RunCommand::Expand {
        gap,
        edge: Edge::Start,
        size: 64,
    })
    .await
    .unwrap();
    within(sync.wait_for(|view| view.inline_error.is_some()))
        .await
        .unwrap();
    assert_eq!(sync.state(), SyncState::Live);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deactivation_discards_late_responses() {
    let service = service();
    seed_large_log(&service, 40);
    let config = SyncConfig {
        chunk_bytes: 4,
        ..SyncConfig::default()
    };
    let sync = Synchronizer::activate(run_resource(), api(&service), config);
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    let gap = sync
        .read(|view| view.model.log().and_then(LogWindow::gap))
        .unwrap();
    let served = service.logs_served.load(Ordering::SeqCst);
    let calls = service.log_calls.load(Ordering::SeqCst);

    let gate = service.gate_logs();
    let view = sync.view();
    sync.command(RunCommand::Expand {
        gap,
        edge: Edge::Start,
        size: 4,
    })
    .await
    .unwrap();
    within(async {
        while service.log_calls.load(Ordering::SeqCst) == calls {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    within(sync.deactivate()).await;
    gate.add_permits(8);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(service.logs_served.load(Ordering::SeqCst), served);
    assert_eq!(service.broker.open(), 0);
    let view = view.borrow();
    assert_eq!(view.state, SyncState::Closed);
    assert_eq!(view.model.log().and_then(LogWindow::gap), Some(gap));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn snapshot_failure_closes_with_error() {
    let service = service();
    service.fail_jobs.store(true, Ordering::SeqCst);
    let sync = Synchronizer::activate(JobsResource, api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Closed))
        .await
        .unwrap();
    let error = sync.read(|view| view.error.clone()).unwrap();
    assert!(error.contains("503"), "{error}");
    assert_eq!(service.broker.open(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stream_failure_closes_live_instance() {
    let service = service();
    let sync = Synchronizer::activate(JobsResource, api(&service), SyncConfig::default());
    within(sync.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    service.broker.fail_all("connection reset");
    within(sync.wait_for(|view| view.state == SyncState::Closed))
        .await
        .unwrap();
    assert!(sync
        .read(|view| view.error.clone())
        .is_some_and(|error| error.contains("connection reset")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_tears_down_and_foreground_resnapshots() {
    let service = service();
    service.jobs.lock().unwrap().push(job("ops", "nightly", "Nightly"));
    let mut sessions = SessionManager::new(api(&service), SyncConfig::default());

    sessions.activate(ResourceSpec::Jobs(JobsResource)).await;
    let jobs = sessions.current().and_then(|active| active.jobs()).unwrap();
    within(jobs.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    assert_eq!(service.broker.open(), 1);

    // Asking again for the live resource keeps the instance.
    sessions.activate(ResourceSpec::Jobs(JobsResource)).await;
    assert_eq!(sessions.activations(), 1);

    sessions.set_visibility(Visibility::Background).await;
    assert!(sessions.current().is_none());
    assert_eq!(service.broker.open(), 0);

    service.jobs.lock().unwrap().push(job("ops", "backup", "Backup"));
    sessions.set_visibility(Visibility::Foreground).await;
    assert_eq!(sessions.activations(), 2);
    let jobs = sessions.current().and_then(|active| active.jobs()).unwrap();
    within(jobs.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    assert_eq!(jobs.read(|view| view.model.jobs.len()), 2);
    assert_eq!(service.jobs_calls.load(Ordering::SeqCst), 2);

    let nightly = job("ops", "nightly", "Nightly");
    sessions
        .activate(ResourceSpec::Runs(RunsResource::new(&nightly)))
        .await;
    let runs = sessions.current().and_then(|active| active.runs()).unwrap();
    within(runs.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
    assert_eq!(service.broker.open(), 1);

    sessions.deactivate().await;
    assert!(sessions.current().is_none());
    assert!(sessions.resource().is_none());
    assert_eq!(service.broker.open(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn activation_while_backgrounded_waits_for_foreground() {
    let service = service();
    let mut sessions = SessionManager::new(api(&service), SyncConfig::default());
    sessions.set_visibility(Visibility::Background).await;
    sessions.activate(ResourceSpec::Jobs(JobsResource)).await;
    assert!(sessions.current().is_none());
    assert_eq!(sessions.activations(), 0);

    sessions.set_visibility(Visibility::Foreground).await;
    let jobs = sessions.current().and_then(|active| active.jobs()).unwrap();
    within(jobs.wait_for(|view| view.state == SyncState::Live))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn default_retention_preview_sums_inheriting_jobs() {
    let service = service();
    let nightly = job("ops", "nightly", "Nightly");
    let backup = job("ops", "backup", "Backup");
    service.settings.lock().unwrap().insert(
        backup.settings_url(),
        JobSettings {
            retention: Some(Retention::Limits(RetentionLimits {
                max_runs: Some(3),
                ..RetentionLimits::default()
            })),
        },
    );
    let result = |run_id: &str, size: u64| PruneResult {
        pruned: vec![Pruned {
            run_id: run_id.to_string(),
            size,
            reason: "max_runs".to_string(),
        }],
        stats: PruneStats {
            kept: PruneTally { runs: 2, size: 10 },
            pruned: PruneTally { runs: 1, size },
        },
    };
    service
        .prune_results
        .lock()
        .unwrap()
        .insert(nightly.prune_url(), result("n1", 100));
    service
        .prune_results
        .lock()
        .unwrap()
        .insert(backup.prune_url(), result("b1", 7));

    let retention = Retention::Limits(RetentionLimits {
        max_runs: Some(2),
        ..RetentionLimits::default()
    });
    let total = within(preview_default_retention(
        service.as_ref(),
        &[nightly, backup],
        retention,
    ))
    .await
    .unwrap();
    assert_eq!(total.pruned.len(), 1);
    assert_eq!(total.pruned[0].run_id, "n1");
    assert_eq!(total.stats.pruned, PruneTally { runs: 1, size: 100 });
}
