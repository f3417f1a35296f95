//! fdash-client library interface
//!
//! - [`session`]: authenticated HTTP client with transparent token refresh
//! - [`api`]: typed document service operations ([`api::JobApi`])
//! - [`orchestrator`]: upload → start → poll → fetch results state machine

pub mod api;
pub mod error;
pub mod orchestrator;
pub mod session;

pub use crate::error::{ClientError, ClientResult};
pub use crate::orchestrator::{Orchestrator, OrchestratorSettings, ResultBundle, WorkItem};
pub use crate::session::{Session, SessionClient};

/// Build identification (set by build.rs)
pub const GIT_HASH: &str = env!("GIT_HASH");
pub const BUILD_TIMESTAMP: &str = env!("BUILD_TIMESTAMP");
pub const BUILD_PROFILE: &str = env!("BUILD_PROFILE");

/// One-line version string for `--version` output and startup logs
pub fn version_string() -> String {
    format!(
        "{} ({} {}, {})",
        env!("CARGO_PKG_VERSION"),
        GIT_HASH,
        BUILD_PROFILE,
        BUILD_TIMESTAMP
    )
}
