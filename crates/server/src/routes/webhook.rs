//! Push-event ingress.
//!
//! The handler verifies the HMAC signature over the raw body before any
//! parsing beyond the minimal envelope, then filters and enqueues one
//! pipeline per surviving commit. Rejections that the code host should not
//! retry (unknown repo, non-push event) respond 200.

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use commitcast_api::{signature, summary, WebhookSummary};
use commitcast_core::{push, CommitData, PushEvent, TaskKind};
use commitcast_queue::QueueError;

use crate::error::ApiErr;
use crate::pipeline::{self, StagePayload};
use crate::AppState;

/// Extract the JSON payload text from the raw body: either the body itself
/// or the `payload=` parameter of a form-encoded body.
fn payload_json(headers: &HeaderMap, body: &[u8]) -> Result<String, ApiErr> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = std::str::from_utf8(body)
            .map_err(|_| ApiErr::bad_request("body is not valid UTF-8"))?;
        for pair in text.split('&') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            if key == "payload" {
                let plussed = value.replace('+', " ");
                return urlencoding::decode(&plussed)
                    .map(|c| c.into_owned())
                    .map_err(|_| ApiErr::bad_request("payload parameter is not valid UTF-8"));
            }
        }
        return Err(ApiErr::bad_request("missing payload parameter"));
    }

    String::from_utf8(body.to_vec()).map_err(|_| ApiErr::bad_request("body is not valid UTF-8"))
}

fn ignored(reason: &str) -> Json<WebhookSummary> {
    tracing::debug!("webhook ignored: {reason}");
    Json(WebhookSummary {
        processed: 0,
        total: 0,
        tenant_id: None,
    })
}

/// POST /webhook/codehost — push event ingress.
pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookSummary>, ApiErr> {
    let json = payload_json(&headers, &body)?;

    // Minimal envelope first: the repo name selects the signing secret.
    let envelope: serde_json::Value = serde_json::from_str(&json)
        .map_err(|e| ApiErr::bad_request(format!("malformed payload: {e}")))?;
    let repo_full_name = envelope
        .pointer("/repository/full_name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiErr::bad_request("missing repository.full_name"))?
        .to_string();

    // Store errors past this point never bubble into the response status:
    // anything except a bad signature or a malformed body answers 200 so
    // the code host does not build up a retry storm.
    let repo_secret = state
        .db
        .repo_by_name(&repo_full_name)
        .unwrap_or_else(|e| {
            tracing::error!("repo lookup: {e}");
            None
        })
        .and_then(|e| e.webhook_secret);
    let secret = repo_secret.or_else(|| state.config.webhook_secret.clone());

    match secret {
        Some(secret) => {
            let header = headers
                .get("X-Signature-256")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if !signature::verify_signature(secret.as_bytes(), &body, header) {
                tracing::warn!(repo = %repo_full_name, "webhook signature mismatch");
                return Err(ApiErr::unauthorized("signature mismatch"));
            }
        }
        None => {
            tracing::warn!(repo = %repo_full_name, "no webhook secret configured; accepting unsigned");
        }
    }

    let event_kind = headers
        .get("X-Event-Kind")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if event_kind != "push" {
        return Ok(ignored(&format!("event kind '{event_kind}'")));
    }

    let enabled = state
        .db
        .repo_is_enabled(&repo_full_name)
        .unwrap_or_else(|e| {
            tracing::error!("enrollment lookup: {e}");
            false
        });
    if !enabled && !state.config.repo_allowed(&repo_full_name) {
        return Ok(ignored(&format!("repo {repo_full_name} not allowed")));
    }

    let event: PushEvent = serde_json::from_str(&json)
        .map_err(|e| ApiErr::bad_request(format!("malformed push event: {e}")))?;

    let Some((tenant, _enrollment)) = state
        .db
        .user_by_repo(&repo_full_name)
        .unwrap_or_else(|e| {
            tracing::error!("tenant lookup: {e}");
            None
        })
    else {
        return Ok(ignored(&format!("repo {repo_full_name} has no enrolled tenant")));
    };

    let bearer = state
        .vault
        .get(
            commitcast_api::db::tokens::TokenProvider::Codehost,
            &tenant.codehost_user_id,
        )
        .map(|m| m.access_token);
    let context = state
        .context
        .ensure_fresh(&state.db, &repo_full_name, bearer.as_deref())
        .await;
    let project_context = crate::context::render(&context);

    let quota = state
        .config
        .quota_for(tenant.tier.as_str(), tenant.quota_override);

    // Merge commits drop out before counting: the summary reports only
    // commits that were candidates for the pipeline.
    let candidates: Vec<_> = event
        .commits
        .iter()
        .filter(|commit| {
            if push::is_merge_commit(&commit.message) {
                tracing::debug!(sha = %commit.id, "skipping merge commit");
                false
            } else {
                true
            }
        })
        .collect();
    let total = candidates.len();
    let mut processed = 0usize;
    for commit in candidates {
        let data = CommitData::from_push(&event, commit);
        let mut payload = StagePayload::new(data, event.repository.clone(), project_context.clone());

        // Asset-only and bulk-churn commits skip straight to the render
        // stage with the deterministic file summary.
        let kind = if commit.skips_diff_analysis() {
            payload.diff_analysis = Some(summary::file_based_summary(&payload.commit));
            TaskKind::ChangelogRender
        } else {
            TaskKind::DiffAnalysis
        };

        let item = match pipeline::make_item(kind, &tenant.id, &payload) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(sha = %commit.id, "payload encode: {e}");
                continue;
            }
        };
        match state.queue.enqueue(item, Some(quota)) {
            Ok(_rx) => processed += 1,
            Err(QueueError::Duplicate(id)) => {
                tracing::debug!(%id, "commit already queued");
            }
            Err(QueueError::QuotaExceeded(tenant_id)) => {
                tracing::warn!(%tenant_id, "hourly quota exhausted; dropping rest of push");
                break;
            }
            Err(e) => {
                tracing::error!(sha = %commit.id, "enqueue failed: {e}");
            }
        }
    }

    tracing::info!(
        repo = %repo_full_name,
        tenant = %tenant.id,
        processed,
        total,
        "webhook accepted"
    );
    Ok(Json(WebhookSummary {
        processed,
        total,
        tenant_id: Some(tenant.id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(content_type: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_str(content_type).unwrap());
        headers
    }

    #[test]
    fn json_body_passes_through() {
        let headers = headers_with("application/json");
        let body = br#"{"repository":{"full_name":"a/b"}}"#;
        assert_eq!(
            payload_json(&headers, body).unwrap(),
            r#"{"repository":{"full_name":"a/b"}}"#
        );
    }

    #[test]
    fn form_body_extracts_payload_param() {
        let headers = headers_with("application/x-www-form-urlencoded");
        let body = b"payload=%7B%22ref%22%3A%22refs%2Fheads%2Fmain%22%7D&other=1";
        assert_eq!(
            payload_json(&headers, body).unwrap(),
            r#"{"ref":"refs/heads/main"}"#
        );
    }

    #[test]
    fn form_body_decodes_plus_as_space() {
        let headers = headers_with("application/x-www-form-urlencoded");
        let body = b"payload=%7B%22msg%22%3A%22two+words%22%7D";
        assert_eq!(payload_json(&headers, body).unwrap(), r#"{"msg":"two words"}"#);
    }

    #[test]
    fn form_body_without_payload_is_rejected() {
        let headers = headers_with("application/x-www-form-urlencoded");
        assert!(payload_json(&headers, b"other=1").is_err());
    }

    use crate::ai::AiClient;
    use crate::config::AppConfig;
    use crate::context::ContextBuilder;
    use crate::diff::DiffFetcher;
    use crate::pipeline::Pipeline;
    use crate::poster::Poster;
    use crate::storage::init_db;
    use crate::vault::Vault;
    use commitcast_queue::{QueueConfig, WorkQueue};

    const SECRET: &str = "hook-secret";

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        let db = init_db(dir.path()).expect("init db");
        let vault = Vault::new(Some(db.clone()), dir.path());
        let http = reqwest::Client::new();
        // Unreachable API bases: these tests stop before any outbound call
        // matters, and context fetches fail fast into the empty context.
        let base = "http://localhost:1".to_string();
        let config = AppConfig {
            webhook_secret: Some(SECRET.into()),
            allowed_repos: vec![],
            codehost_oauth: None,
            socialnet_oauth: None,
            callback_base: "http://localhost:3000".into(),
            data_dir: dir.path().to_path_buf(),
            ai_api_key: None,
            ai_model: "m".into(),
            ai_base_url: base.clone(),
            codehost_api_base: base.clone(),
            socialnet_api_base: base.clone(),
            queue: QueueConfig::default(),
            user_quota_limit: 100,
            tier_quotas: Default::default(),
            admin_api_key: None,
            port: 0,
        };
        let pipeline = Pipeline {
            db: db.clone(),
            vault: vault.clone(),
            ai: AiClient::new(http.clone(), base.clone(), None, "m".into()),
            diff: DiffFetcher::new(http.clone(), base.clone()),
            poster: Poster::new(http.clone(), base.clone()),
            config: config.clone(),
            http: http.clone(),
        };
        let queue = WorkQueue::new(db.clone(), pipeline, config.queue.clone()).expect("queue");
        AppState {
            context: ContextBuilder::new(http.clone(), base),
            db,
            config,
            queue,
            vault,
            http,
        }
    }

    fn push_body() -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/main",
            "repository": {"name": "widget", "full_name": "acme/widget"},
            "pusher": {"name": "alice"},
            "commits": [
                {
                    "id": "aaaa111",
                    "message": "feat: add parser",
                    "author": {"name": "alice"},
                    "modified": ["src/parser.rs"]
                },
                {
                    "id": "bbbb222",
                    "message": "Merge pull request #7 from acme/dev",
                    "author": {"name": "alice"}
                }
            ]
        }))
        .unwrap()
    }

    fn signed_headers(body: &[u8], kind: &str) -> HeaderMap {
        let mut headers = headers_with("application/json");
        headers.insert("X-Event-Kind", HeaderValue::from_str(kind).unwrap());
        let sig = signature::compute_signature(SECRET.as_bytes(), body);
        headers.insert("X-Signature-256", HeaderValue::from_str(&sig).unwrap());
        headers
    }

    fn enroll(state: &AppState) {
        state
            .db
            .upsert_user("codehost:1", "1", "alice", None, None)
            .unwrap();
        state
            .db
            .upsert_repo("codehost:1", "acme/widget", true)
            .unwrap();
    }

    #[tokio::test]
    async fn bad_signature_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let body = push_body();

        let mut headers = headers_with("application/json");
        headers.insert("X-Event-Kind", HeaderValue::from_static("push"));
        headers.insert("X-Signature-256", HeaderValue::from_static("sha256=00"));

        let result = super::receive(State(state), headers, Bytes::from(body)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn non_push_events_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let body = push_body();
        let headers = signed_headers(&body, "ping");

        let Json(summary) = super::receive(State(state), headers, Bytes::from(body))
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert!(summary.tenant_id.is_none());
    }

    #[tokio::test]
    async fn unenrolled_repo_answers_200_without_work() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let body = push_body();
        let headers = signed_headers(&body, "push");

        let Json(summary) = super::receive(State(state.clone()), headers, Bytes::from(body))
            .await
            .unwrap();
        assert_eq!(summary.processed, 0);
        assert_eq!(state.queue.stats().pending, 0);
    }

    #[tokio::test]
    async fn enrolled_push_enqueues_non_merge_commits() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        enroll(&state);
        let body = push_body();
        let headers = signed_headers(&body, "push");

        let Json(summary) = super::receive(State(state.clone()), headers, Bytes::from(body))
            .await
            .unwrap();
        assert_eq!(summary.total, 1); // the merge commit is not a candidate
        assert_eq!(summary.processed, 1);
        assert_eq!(summary.tenant_id.as_deref(), Some("codehost:1"));
        assert_eq!(state.queue.stats().pending, 1);
    }

    #[tokio::test]
    async fn merge_only_push_reports_zero_total() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        enroll(&state);
        let body = serde_json::to_vec(&serde_json::json!({
            "ref": "refs/heads/main",
            "repository": {"name": "widget", "full_name": "acme/widget"},
            "pusher": {"name": "alice"},
            "commits": [
                {
                    "id": "cccc333",
                    "message": "Merge pull request #8 from acme/dev",
                    "author": {"name": "alice"}
                },
                {
                    "id": "dddd444",
                    "message": "Merge branch 'main' into dev",
                    "author": {"name": "alice"}
                }
            ]
        }))
        .unwrap();
        let headers = signed_headers(&body, "push");

        let Json(summary) = super::receive(State(state.clone()), headers, Bytes::from(body))
            .await
            .unwrap();
        assert_eq!(summary.total, 0);
        assert_eq!(summary.processed, 0);
        assert_eq!(state.queue.stats().pending, 0);
    }

    #[tokio::test]
    async fn redelivered_push_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        enroll(&state);
        let body = push_body();

        let Json(first) = super::receive(
            State(state.clone()),
            signed_headers(&body, "push"),
            Bytes::from(body.clone()),
        )
        .await
        .unwrap();
        assert_eq!(first.processed, 1);

        let Json(second) = super::receive(
            State(state.clone()),
            signed_headers(&body, "push"),
            Bytes::from(body),
        )
        .await
        .unwrap();
        assert_eq!(second.processed, 0);
        assert_eq!(state.queue.stats().pending, 1);
    }
}
