//! Trace export service
//!
//! Receives GitHub `workflow_run` webhooks and turns each completed run into
//! a retroactive trace. Also hosts a property cache kept fresh by a
//! background refresh schedule.

pub mod config;
pub mod handler;
pub mod replay;
pub mod service;
pub mod telemetry;

pub use config::{ConfigError, ServiceConfig};
pub use handler::{create_router, AppState};
pub use service::build_state;
pub use telemetry::{init_tracing, SpanSink};
