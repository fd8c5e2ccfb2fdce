use crate::resource::{JobsResource, RunResource, RunsResource};
use syncron_core::{Job, Outcome};

/// The screen the dashboard is showing.
#[derive(Debug, Clone, PartialEq)]
pub enum View {
    Jobs,
    Runs {
        job: Job,
    },
    Log {
        job: Job,
        run_id: String,
        run_url: Option<String>,
    },
}

impl View {
    pub fn job(&self) -> Option<&Job> {
        match self {
            View::Jobs => None,
            View::Runs { job } | View::Log { job, .. } => Some(job),
        }
    }

    pub fn resource(&self) -> ResourceSpec {
        match self {
            View::Jobs => ResourceSpec::Jobs(JobsResource),
            View::Runs { job } => ResourceSpec::Runs(RunsResource::new(job)),
            View::Log {
                job,
                run_id,
                run_url,
            } => ResourceSpec::Run(RunResource::new(job.key(), run_id.clone(), run_url.clone())),
        }
    }

    pub fn crumbs(&self) -> Vec<Crumb> {
        let mut crumbs = vec![Crumb {
            label: "jobs".to_string(),
            target: Some(View::Jobs),
        }];
        match self {
            View::Jobs => {}
            View::Runs { job } => crumbs.push(Crumb::job(job)),
            View::Log { job, run_id, .. } => {
                crumbs.push(Crumb::job(job));
                crumbs.push(Crumb {
                    label: format!("run {run_id}"),
                    target: None,
                });
            }
        }
        if let Some(last) = crumbs.last_mut() {
            last.target = None;
        }
        crumbs
    }
}

/// One breadcrumb. `target` is where following it leads; the current
/// view's own crumb has none.
#[derive(Debug, Clone, PartialEq)]
pub struct Crumb {
    pub label: String,
    pub target: Option<View>,
}

impl Crumb {
    fn job(job: &Job) -> Self {
        let label = if job.name.is_empty() {
            job.key().to_string()
        } else {
            format!("{} ({})", job.name, job.key())
        };
        Crumb {
            label,
            target: Some(View::Runs { job: job.clone() }),
        }
    }
}

/// Which live resource a view needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceSpec {
    Jobs(JobsResource),
    Runs(RunsResource),
    Run(RunResource),
}

impl ResourceSpec {
    pub fn label(&self) -> String {
        match self {
            ResourceSpec::Jobs(_) => "jobs".to_string(),
            ResourceSpec::Runs(resource) => format!("runs {}", resource.job),
            ResourceSpec::Run(resource) => format!("run {}/{}", resource.job, resource.run_id),
        }
    }
}

/// Where back-navigation comes from. The dashboard keeps an in-memory
/// stack; other front ends can plug in their own.
pub trait NavHistory {
    fn push(&mut self, view: View);
    fn pop(&mut self) -> Option<View>;
    fn clear(&mut self);
}

#[derive(Debug, Clone, Default)]
pub struct StackHistory {
    stack: Vec<View>,
}

impl NavHistory for StackHistory {
    fn push(&mut self, view: View) {
        if self.stack.last() != Some(&view) {
            self.stack.push(view);
        }
    }

    fn pop(&mut self) -> Option<View> {
        self.stack.pop()
    }

    fn clear(&mut self) {
        self.stack.clear();
    }
}

/// The dashboard's current view. Transitions return the next state and
/// record the view being left in `history`.
#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub view: View,
}

impl Default for AppState {
    fn default() -> Self {
        Self { view: View::Jobs }
    }
}

impl AppState {
    pub fn new(view: View) -> Self {
        Self { view }
    }

    fn go(&self, history: &mut dyn NavHistory, view: View) -> AppState {
        if view != self.view {
            history.push(self.view.clone());
        }
        AppState { view }
    }

    pub fn open_job(&self, history: &mut dyn NavHistory, job: &Job) -> AppState {
        self.go(history, View::Runs { job: job.clone() })
    }

    pub fn open_run(
        &self,
        history: &mut dyn NavHistory,
        job: &Job,
        run_id: &str,
        run_url: Option<&str>,
    ) -> AppState {
        self.go(
            history,
            View::Log {
                job: job.clone(),
                run_id: run_id.to_string(),
                run_url: run_url.map(str::to_string),
            },
        )
    }

    /// Opens the log of the job's latest run, or its runs if it never ran.
    pub fn open_latest_log(&self, history: &mut dyn NavHistory, job: &Job) -> AppState {
        match job.latest_run.as_ref() {
            Some(run) => self.open_run(history, job, &run.id, run.url.as_deref()),
            None => self.open_job(history, job),
        }
    }

    pub fn back_to_jobs(&self, history: &mut dyn NavHistory) -> AppState {
        self.go(history, View::Jobs)
    }

    pub fn back_to_job(&self, history: &mut dyn NavHistory) -> AppState {
        match self.view.job() {
            Some(job) => self.go(history, View::Runs { job: job.clone() }),
            None => self.clone(),
        }
    }

    /// Steps back through history. The jobs view is the floor.
    pub fn pop(&self, history: &mut dyn NavHistory) -> AppState {
        match history.pop() {
            Some(view) => AppState { view },
            None => match &self.view {
                View::Jobs => self.clone(),
                View::Runs { .. } => AppState { view: View::Jobs },
                View::Log { job, .. } => AppState {
                    view: View::Runs { job: job.clone() },
                },
            },
        }
    }
}

/// A log view follows new output only while the run is going and the
/// reader is already at the bottom.
pub fn should_autoscroll(outcome: Outcome, at_bottom: bool) -> bool {
    outcome == Outcome::Running && at_bottom
}
