//! Inspection and management endpoints.
//!
//! Everything here is gated by the `X-Admin-Key` header when an admin key is
//! configured. Without one (development mode) the endpoints are open.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use commitcast_api::db::tokens::TokenProvider;
use commitcast_api::{OkResponse, QueueStatsResponse, QuotaResponse};
use commitcast_core::{RepoEnrollment, TaskKind};
use serde::Deserialize;

use crate::error::ApiErr;
use crate::AppState;

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiErr> {
    let Some(expected) = &state.config.admin_api_key else {
        return Ok(());
    };
    let provided = headers
        .get("X-Admin-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or("");
    if provided != expected.trim() {
        return Err(ApiErr::unauthorized("invalid admin key"));
    }
    Ok(())
}

fn parse_provider(raw: &str) -> Result<TokenProvider, ApiErr> {
    TokenProvider::parse(raw)
        .ok_or_else(|| ApiErr::bad_request(format!("unknown provider '{raw}'")))
}

/// GET /admin/queue — queue statistics.
pub async fn queue_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<QueueStatsResponse>, ApiErr> {
    require_admin(&state, &headers)?;

    let runtime = state.queue.stats();
    // Failures are terminal rows in the store, not scheduler state.
    let failed = state
        .db
        .queue_counts()
        .map_err(ApiErr::from_db("queue counts"))?
        .into_iter()
        .find(|(status, _)| status == "failed")
        .map(|(_, n)| n)
        .unwrap_or(0);

    Ok(Json(QueueStatsResponse {
        pending: runtime.pending,
        processing: runtime.processing,
        retrying: runtime.retrying,
        failed,
        rpm_remaining: runtime.rpm_remaining,
        avg_processing_ms: runtime.avg_processing_ms,
    }))
}

/// GET /admin/tenants/{id}/quota — hourly AI-call budget for a tenant.
pub async fn tenant_quota(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<QuotaResponse>, ApiErr> {
    require_admin(&state, &headers)?;

    let user = state
        .db
        .get_user(&tenant_id)
        .map_err(ApiErr::from_db("user lookup"))?
        .ok_or_else(|| ApiErr::not_found("unknown tenant"))?;

    let limit = state
        .config
        .quota_for(user.tier.as_str(), user.quota_override);
    let now = chrono::Utc::now();
    let mut used = 0i64;
    for kind in [TaskKind::DiffAnalysis, TaskKind::ChangelogRender] {
        used += state
            .db
            .usage_in_hour(&tenant_id, kind.as_str(), now)
            .map_err(ApiErr::from_db("usage lookup"))?;
    }

    Ok(Json(QuotaResponse {
        tenant_id,
        limit,
        used,
        remaining: (limit - used).max(0),
    }))
}

/// GET /admin/tenants/{id}/repos — enrollment state for a tenant's repos.
pub async fn tenant_repos(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<RepoEnrollment>>, ApiErr> {
    require_admin(&state, &headers)?;
    let repos = state
        .db
        .repos_for_user(&tenant_id)
        .map_err(ApiErr::from_db("enrollment list"))?;
    Ok(Json(repos))
}

#[derive(Debug, Deserialize)]
pub struct EnrollRequest {
    pub tenant_id: String,
    pub repo_full_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub webhook_secret: Option<String>,
}

/// POST /admin/repos — enroll or update a repo (enable/disable, per-repo secret).
pub async fn upsert_repo(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<OkResponse>, ApiErr> {
    require_admin(&state, &headers)?;

    if state
        .db
        .get_user(&req.tenant_id)
        .map_err(ApiErr::from_db("user lookup"))?
        .is_none()
    {
        return Err(ApiErr::not_found("unknown tenant"));
    }

    // Toggling an existing enrollment must not clobber its secret.
    let toggled = state
        .db
        .set_repo_enabled(&req.tenant_id, &req.repo_full_name, req.enabled)
        .map_err(ApiErr::from_db("repo toggle"))?;
    if !toggled {
        state
            .db
            .upsert_repo(&req.tenant_id, &req.repo_full_name, req.enabled)
            .map_err(ApiErr::from_db("repo upsert"))?;
    }
    if let Some(secret) = &req.webhook_secret {
        state
            .db
            .set_repo_secret(&req.tenant_id, &req.repo_full_name, Some(secret))
            .map_err(ApiErr::from_db("repo secret"))?;
    }

    tracing::info!(
        tenant_id = %req.tenant_id,
        repo = %req.repo_full_name,
        enabled = req.enabled,
        "repo enrollment updated"
    );
    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
pub struct OgPostRequest {
    pub repo_full_name: String,
    pub post_id: String,
}

/// PUT /admin/og-post — set the announcement post future posts will quote.
pub async fn set_og_post(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<OgPostRequest>,
) -> Result<Json<OkResponse>, ApiErr> {
    require_admin(&state, &headers)?;
    state
        .db
        .set_og_post(&req.repo_full_name, &req.post_id)
        .map_err(ApiErr::from_db("og post"))?;
    Ok(Json(OkResponse { ok: true }))
}

/// DELETE /admin/credentials/{provider}/{subject} — drop a stored credential,
/// forcing the user through the OAuth flow again.
pub async fn delete_credential(
    State(state): State<AppState>,
    Path((provider, subject)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<Json<OkResponse>, ApiErr> {
    require_admin(&state, &headers)?;
    let provider = parse_provider(&provider)?;
    if !state.vault.delete(provider, &subject) {
        return Err(ApiErr::not_found("no such credential"));
    }
    tracing::info!(provider = provider.as_str(), %subject, "credential deleted");
    Ok(Json(OkResponse { ok: true }))
}
