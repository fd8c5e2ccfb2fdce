use crate::config::Config;
use crossterm::event::{Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crate::ui::LogLineCache;
use std::cell::{Cell, RefCell};
use std::sync::Arc;
use syncron_core::{Edge, Job, JobKey};
use syncron_live::{
    ActiveSession, AppState, RunCommand, RunsCommand, SessionManager, StackHistory, SyncConfig,
    SyncError, SyncState, SyncronApi, View, Visibility,
};
use tracing::{debug, warn};

const SCROLL_PAGE: usize = 20;

/// What the last frame showed of the log: first visible line and the
/// largest first line that still fills the screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogViewport {
    pub top: usize,
    pub bottom: usize,
}

pub struct App {
    pub state: AppState,
    history: StackHistory,
    pub sessions: SessionManager,
    sync: SyncConfig,
    pub selected: usize,
    pub log_follow: bool,
    pub log_top: usize,
    pub log_viewport: Cell<LogViewport>,
    pub log_lines: RefCell<LogLineCache>,
    pub status_note: Option<String>,
    quit: bool,
}

/// Stands in for a job known only by key; its URLs fall back to the
/// conventional paths.
fn job_by_key(key: &JobKey) -> Job {
    Job {
        user: key.user.clone(),
        id: key.id.clone(),
        name: String::new(),
        latest_run: None,
        url: None,
        runs_url: None,
        settings_url: None,
        prune_url: None,
        success_url: None,
    }
}

impl App {
    pub fn new(api: Arc<dyn SyncronApi>, config: &Config) -> Self {
        let view = match (&config.job, &config.run) {
            (Some(key), Some(run_id)) => View::Log {
                job: job_by_key(key),
                run_id: run_id.clone(),
                run_url: None,
            },
            (Some(key), None) => View::Runs {
                job: job_by_key(key),
            },
            _ => View::Jobs,
        };
        Self {
            state: AppState::new(view),
            history: StackHistory::default(),
            sessions: SessionManager::new(api, config.sync),
            sync: config.sync,
            selected: 0,
            log_follow: true,
            log_top: usize::MAX,
            log_viewport: Cell::new(LogViewport::default()),
            log_lines: RefCell::new(LogLineCache::default()),
            status_note: None,
            quit: false,
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn session(&self) -> Option<&ActiveSession> {
        self.sessions.current()
    }

    /// Points the session manager at whatever the current view needs.
    pub async fn sync_session(&mut self) {
        self.sessions.activate(self.state.view.resource()).await;
    }

    pub async fn shutdown(&mut self) {
        self.sessions.deactivate().await;
    }

    pub async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Key(key) if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) => {
                self.handle_key(key).await;
            }
            Event::FocusGained => self.sessions.set_visibility(Visibility::Foreground).await,
            Event::FocusLost => self.sessions.set_visibility(Visibility::Background).await,
            _ => {}
        }
    }

    async fn handle_key(&mut self, key: KeyEvent) {
        if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
            self.quit = true;
            return;
        }
        match key.code {
            KeyCode::Char('q') => self.quit = true,
            KeyCode::Up | KeyCode::Char('k') => self.move_by(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_by(1),
            KeyCode::PageUp => self.move_by(-(SCROLL_PAGE as isize)),
            KeyCode::PageDown => self.move_by(SCROLL_PAGE as isize),
            KeyCode::Home => {
                self.selected = 0;
                self.log_follow = false;
                self.log_top = 0;
            }
            KeyCode::End => {
                self.log_follow = true;
                self.log_top = usize::MAX;
            }
            KeyCode::Enter => self.drill_in(false).await,
            KeyCode::Char('l') => self.drill_in(true).await,
            KeyCode::Backspace | KeyCode::Esc => {
                let next = self.state.pop(&mut self.history);
                self.navigate(next).await;
            }
            KeyCode::Char('m') => {
                let page = self.sync.runs_page;
                self.runs_command(RunsCommand::LoadMore(page)).await;
            }
            KeyCode::Char('f') => self.runs_command(RunsCommand::Refresh(Vec::new())).await,
            KeyCode::Char('e') => self.expand(Edge::Start).await,
            KeyCode::Char('E') => self.expand(Edge::End).await,
            KeyCode::Char('r') => self.retry().await,
            _ => {}
        }
    }

    fn move_by(&mut self, delta: isize) {
        if matches!(self.state.view, View::Log { .. }) {
            let viewport = self.log_viewport.get();
            let top = viewport.top.saturating_add_signed(delta);
            self.log_top = top.min(viewport.bottom);
            self.log_follow = top >= viewport.bottom;
            return;
        }
        self.selected = self.selected.saturating_add_signed(delta);
        let len = self.list_len();
        if len > 0 {
            self.selected = self.selected.min(len - 1);
        }
    }

    fn list_len(&self) -> usize {
        match self.session() {
            Some(ActiveSession::Jobs(sync)) => sync.read(|view| view.model.jobs.len()),
            Some(ActiveSession::Runs(sync)) => sync.read(|view| view.model.runs.len()),
            _ => 0,
        }
    }

    async fn drill_in(&mut self, latest_log: bool) {
        let next = match &self.state.view {
            View::Jobs => {
                let Some(job) = self.session().and_then(ActiveSession::jobs).and_then(|sync| {
                    sync.read(|view| view.model.list().get(self.selected).map(|job| (*job).clone()))
                }) else {
                    return;
                };
                if latest_log {
                    self.state.open_latest_log(&mut self.history, &job)
                } else {
                    self.state.open_job(&mut self.history, &job)
                }
            }
            View::Runs { job } => {
                let Some((run_id, run_url)) =
                    self.session().and_then(ActiveSession::runs).and_then(|sync| {
                        sync.read(|view| {
                            view.model
                                .runs
                                .get(self.selected)
                                .map(|run| (run.id.clone(), run.url.clone()))
                        })
                    })
                else {
                    return;
                };
                let job = job.clone();
                self.state
                    .open_run(&mut self.history, &job, &run_id, run_url.as_deref())
            }
            View::Log { .. } => return,
        };
        self.navigate(next).await;
    }

    async fn navigate(&mut self, next: AppState) {
        if next == self.state {
            return;
        }
        let resource = next.view.resource().label();
        debug!(event = "navigate", resource = %resource);
        self.state = next;
        self.selected = 0;
        self.log_follow = true;
        self.log_top = usize::MAX;
        self.status_note = None;
        self.sync_session().await;
    }

    async fn runs_command(&mut self, command: RunsCommand) {
        let Some(sync) = self.session().and_then(ActiveSession::runs) else {
            return;
        };
        let result = sync.command(command).await;
        self.note_result(result);
    }

    async fn expand(&mut self, edge: Edge) {
        let Some(sync) = self.session().and_then(ActiveSession::run) else {
            return;
        };
        let Some(gap) = sync.read(|view| view.model.log().and_then(|log| log.gap())) else {
            self.status_note = Some("log is fully loaded".to_string());
            return;
        };
        let size = self.sync.chunk_bytes;
        let result = sync.command(RunCommand::Expand { gap, edge, size }).await;
        self.note_result(result);
    }

    async fn retry(&mut self) {
        let Some(session) = self.session() else {
            return;
        };
        if session.state() == SyncState::Closed {
            self.status_note = None;
            self.sessions.restart().await;
            return;
        }
        let result = session.retry().await;
        self.note_result(result);
    }

    fn note_result(&mut self, result: Result<(), SyncError>) {
        if let Err(err) = result {
            warn!(event = "command_failed", error = %err);
            self.status_note = Some(err.to_string());
        }
    }
}
