pub mod aggregator;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod oracle;
pub mod resolver;
pub mod service;
pub mod tasks;
pub mod turn;
pub mod workflow;

pub use config::ServiceConfig;
pub use error::{FetchError, RunError, RunResult};
pub use service::{AppState, build_router, create_app};
pub use workflow::{build_workflow, create_flow_runner, create_run_session};
