//! Remote service contract types
//!
//! Request/response bodies exchanged with the document processing service.
//! The wire format is owned by the remote service; these types mirror it and
//! add the closed lifecycle enumeration the client relies on for terminal
//! state detection.

pub mod auth;
pub mod types;

pub use auth::{LoginRequest, LoginResponse, RefreshRequest, RefreshResponse, UserProfile};
pub use types::{
    ComplianceCheck, ComplianceResult, ComplianceStatus, ErrorBody, ExportFormat,
    FinancialMetrics, LifecycleStatus, StatusResponse, UploadResponse,
};

/// Header carrying the active tenant identifier on every data call
pub const TENANT_HEADER: &str = "X-Tenant-ID";
