use crate::api::SyncronApi;
use crate::controller::ResourceSpec;
use crate::error::SyncError;
use crate::resource::{JobsResource, RunResource, RunsResource};
use crate::sync::{SyncConfig, SyncState, Synchronizer};
use std::sync::Arc;
use tracing::{debug, info};

/// Whether the consuming view can currently be seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    Foreground,
    Background,
}

/// The synchronizer behind the current view.
pub enum ActiveSession {
    Jobs(Synchronizer<JobsResource>),
    Runs(Synchronizer<RunsResource>),
    Run(Synchronizer<RunResource>),
}

impl ActiveSession {
    fn start(spec: &ResourceSpec, api: Arc<dyn SyncronApi>, config: SyncConfig) -> Self {
        match spec {
            ResourceSpec::Jobs(resource) => {
                ActiveSession::Jobs(Synchronizer::activate(*resource, api, config))
            }
            ResourceSpec::Runs(resource) => {
                ActiveSession::Runs(Synchronizer::activate(resource.clone(), api, config))
            }
            ResourceSpec::Run(resource) => {
                ActiveSession::Run(Synchronizer::activate(resource.clone(), api, config))
            }
        }
    }

    pub fn label(&self) -> &str {
        match self {
            ActiveSession::Jobs(sync) => sync.label(),
            ActiveSession::Runs(sync) => sync.label(),
            ActiveSession::Run(sync) => sync.label(),
        }
    }

    pub fn state(&self) -> SyncState {
        match self {
            ActiveSession::Jobs(sync) => sync.state(),
            ActiveSession::Runs(sync) => sync.state(),
            ActiveSession::Run(sync) => sync.state(),
        }
    }

    pub fn error(&self) -> Option<String> {
        match self {
            ActiveSession::Jobs(sync) => sync.read(|view| view.error.clone()),
            ActiveSession::Runs(sync) => sync.read(|view| view.error.clone()),
            ActiveSession::Run(sync) => sync.read(|view| view.error.clone()),
        }
    }

    pub fn inline_error(&self) -> Option<String> {
        match self {
            ActiveSession::Jobs(sync) => sync.read(|view| view.inline_error.clone()),
            ActiveSession::Runs(sync) => sync.read(|view| view.inline_error.clone()),
            ActiveSession::Run(sync) => sync.read(|view| view.inline_error.clone()),
        }
    }

    pub async fn retry(&self) -> Result<(), SyncError> {
        match self {
            ActiveSession::Jobs(sync) => sync.retry().await,
            ActiveSession::Runs(sync) => sync.retry().await,
            ActiveSession::Run(sync) => sync.retry().await,
        }
    }

    pub fn jobs(&self) -> Option<&Synchronizer<JobsResource>> {
        match self {
            ActiveSession::Jobs(sync) => Some(sync),
            _ => None,
        }
    }

    pub fn runs(&self) -> Option<&Synchronizer<RunsResource>> {
        match self {
            ActiveSession::Runs(sync) => Some(sync),
            _ => None,
        }
    }

    pub fn run(&self) -> Option<&Synchronizer<RunResource>> {
        match self {
            ActiveSession::Run(sync) => Some(sync),
            _ => None,
        }
    }

    async fn deactivate(self) {
        match self {
            ActiveSession::Jobs(sync) => sync.deactivate().await,
            ActiveSession::Runs(sync) => sync.deactivate().await,
            ActiveSession::Run(sync) => sync.deactivate().await,
        }
    }
}

/// Keeps at most one synchronizer alive, and only while the view is in the
/// foreground. Coming back to the foreground always starts a fresh instance
/// with a new snapshot.
pub struct SessionManager {
    api: Arc<dyn SyncronApi>,
    config: SyncConfig,
    visibility: Visibility,
    wanted: Option<ResourceSpec>,
    active: Option<ActiveSession>,
    activations: u64,
}

impl SessionManager {
    pub fn new(api: Arc<dyn SyncronApi>, config: SyncConfig) -> Self {
        Self {
            api,
            config,
            visibility: Visibility::Foreground,
            wanted: None,
            active: None,
            activations: 0,
        }
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// The resource the view asked for, live or not.
    pub fn resource(&self) -> Option<&ResourceSpec> {
        self.wanted.as_ref()
    }

    pub fn current(&self) -> Option<&ActiveSession> {
        self.active.as_ref()
    }

    /// How many synchronizers this manager has started so far.
    pub fn activations(&self) -> u64 {
        self.activations
    }

    /// Switches to `spec`. The previous instance is torn down first. Asking
    /// again for the resource that is already live keeps that instance.
    pub async fn activate(&mut self, spec: ResourceSpec) {
        let unchanged = self.wanted.as_ref() == Some(&spec)
            && self
                .active
                .as_ref()
                .is_some_and(|active| active.state() != SyncState::Closed);
        if unchanged {
            return;
        }
        self.teardown().await;
        self.wanted = Some(spec);
        if self.visibility == Visibility::Foreground {
            self.start();
        }
    }

    /// Tears down the live instance and forgets the resource.
    pub async fn deactivate(&mut self) {
        self.teardown().await;
        self.wanted = None;
    }

    /// Restarts the wanted resource from scratch, e.g. after it closed.
    pub async fn restart(&mut self) {
        self.teardown().await;
        if self.visibility == Visibility::Foreground {
            self.start();
        }
    }

    pub async fn set_visibility(&mut self, visibility: Visibility) {
        if visibility == self.visibility {
            return;
        }
        self.visibility = visibility;
        info!(event = "session_visibility", visibility = ?visibility);
        match visibility {
            Visibility::Background => self.teardown().await,
            Visibility::Foreground => self.start(),
        }
    }

    fn start(&mut self) {
        let Some(spec) = self.wanted.as_ref() else {
            return;
        };
        self.activations += 1;
        debug!(event = "session_start", resource = %spec.label(), activation = self.activations);
        self.active = Some(ActiveSession::start(spec, self.api.clone(), self.config));
    }

    async fn teardown(&mut self) {
        if let Some(active) = self.active.take() {
            debug!(event = "session_teardown", resource = %active.label());
            active.deactivate().await;
        }
    }
}
