//! Protocol logic shared by the commitcast server.
//!
//! This crate contains only pure functions and types: OAuth URL builders,
//! PKCE material, webhook signature verification, the template engine, the
//! deterministic file-summary fallback, and sea-query SQL builders. No HTTP
//! calls and no database handles — those live in the server.

pub mod db;
pub mod oauth;
pub mod pkce;
pub mod signature;
pub mod summary;
pub mod template;

use serde::{Deserialize, Serialize};

/// Liveness response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Generic `{"ok": true}` response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

/// Webhook ingress response summary.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookSummary {
    pub processed: usize,
    pub total: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
}

/// Queue statistics exposed by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct QueueStatsResponse {
    pub pending: i64,
    pub processing: i64,
    pub retrying: i64,
    pub failed: i64,
    pub rpm_remaining: i64,
    pub avg_processing_ms: i64,
}

/// Per-tenant quota snapshot exposed by the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaResponse {
    pub tenant_id: String,
    pub limit: i64,
    pub used: i64,
    pub remaining: i64,
}
