pub mod api;
pub mod controller;
pub mod error;
pub mod http;
pub mod resource;
pub mod session;
pub mod sync;

pub use api::{AdminApi, EventStream, LogBytes, LogRange, PruneMode, RunsQuery, SyncronApi};
pub use controller::{AppState, Crumb, NavHistory, ResourceSpec, StackHistory, View};
pub use error::{ApiError, SyncError};
pub use http::HttpApi;
pub use resource::{
    JobsModel, JobsResource, LiveResource, RunCommand, RunModel, RunResource, RunsCommand,
    RunsModel, RunsResource,
};
pub use session::{ActiveSession, SessionManager, Visibility};
pub use sync::{SyncConfig, SyncState, SyncView, Synchronizer};
