//! Session service and HTTP/SSE transport.
//!
//! [`sessions::SessionManager`] owns per-session runtime state on top of the
//! store, [`service::AgentService`] validates requests and launches turns,
//! and [`routes`] exposes both over axum. Configuration for the whole
//! deployment loads through [`config::AppConfig`].

pub mod config;
pub mod error;
pub mod routes;
pub mod service;
pub mod sessions;

pub use config::{AppConfig, ConfigError};
pub use error::ServiceError;
pub use routes::{build_router, start, AppState, ServerHandle};
pub use service::{AgentService, SessionDetail, SessionModel, DEFAULT_SESSION_NAME};
pub use sessions::{start_reaper, SessionManager, SessionSummary, TurnGuard};
