//! The per-commit pipeline, executed as chained queue tasks:
//! diff analysis → changelog render → post dispatch.

use commitcast_api::db::tokens::TokenProvider;
use commitcast_api::{summary, template};
use commitcast_core::{CommitData, PipelineError, QueueItem, RepoInfo, TaskKind};
use commitcast_queue::{FollowUp, TaskOutcome, TaskRunner};
use serde::{Deserialize, Serialize};

use crate::ai::{self, AiClient};
use crate::config::AppConfig;
use crate::diff::DiffFetcher;
use crate::poster::Poster;
use crate::storage::Db;
use crate::vault::{Vault, VaultError};

/// Payload carried by every pipeline stage. Later stages add fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagePayload {
    pub commit: CommitData,
    pub repo: RepoInfo,
    #[serde(default)]
    pub project_context: String,
    /// Stage A output, present from the render stage on.
    #[serde(default)]
    pub diff_analysis: Option<String>,
    /// Rendered post text, present on the dispatch stage.
    #[serde(default)]
    pub text: Option<String>,
}

impl StagePayload {
    pub fn new(commit: CommitData, repo: RepoInfo, project_context: String) -> Self {
        Self {
            commit,
            repo,
            project_context,
            diff_analysis: None,
            text: None,
        }
    }
}

fn stage_suffix(kind: TaskKind) -> &'static str {
    match kind {
        TaskKind::DiffAnalysis => "analyze",
        TaskKind::ChangelogRender => "render",
        TaskKind::PostDispatch => "post",
    }
}

/// Build a queue item for one stage, keyed by commit sha.
pub fn make_item(
    kind: TaskKind,
    tenant_id: &str,
    payload: &StagePayload,
) -> Result<QueueItem, PipelineError> {
    let id = format!("{}:{}", payload.commit.sha, stage_suffix(kind));
    Ok(QueueItem::new(
        id,
        kind,
        tenant_id.to_string(),
        serde_json::to_value(payload)?,
    ))
}

fn store_err(e: anyhow::Error) -> PipelineError {
    PipelineError::Internal(format!("store: {e}"))
}

#[derive(Clone)]
pub struct Pipeline {
    pub db: Db,
    pub vault: Vault,
    pub ai: AiClient,
    pub diff: DiffFetcher,
    pub poster: Poster,
    pub config: AppConfig,
    pub http: reqwest::Client,
}

impl Pipeline {
    /// Hourly AI-call quota for a tenant (override, tier, global default).
    pub fn quota_for_tenant(&self, tenant_id: &str) -> i64 {
        match self.db.get_user(tenant_id) {
            Ok(Some(user)) => self
                .config
                .quota_for(user.tier.as_str(), user.quota_override),
            _ => self.config.user_quota_limit,
        }
    }

    /// Bearer token for code-host API calls on behalf of a tenant.
    fn codehost_bearer(&self, tenant_id: &str) -> Option<String> {
        let subject = tenant_id
            .strip_prefix(commitcast_core::tenant::TENANT_ID_PREFIX)
            .unwrap_or(tenant_id);
        self.vault
            .get(TokenProvider::Codehost, subject)
            .map(|m| m.access_token)
    }

    async fn run_diff_analysis(
        &self,
        tenant_id: &str,
        mut payload: StagePayload,
    ) -> Result<TaskOutcome, PipelineError> {
        let commit = payload.commit.clone();
        let bearer = self.codehost_bearer(tenant_id);

        // Diff or AI failures degrade to the deterministic file summary;
        // the pipeline never stalls on Stage A.
        let analysis = match self
            .diff
            .fetch(&payload.repo.full_name, &commit.sha, bearer.as_deref())
            .await
        {
            Ok(diff) if !diff.is_empty() && self.ai.enabled() => {
                match self
                    .ai
                    .analyze_diff(&diff, &commit.message, &payload.repo.name)
                    .await
                {
                    Ok(bullets) => bullets,
                    Err(e) => {
                        tracing::warn!(sha = %commit.sha, "diff analysis fell back: {e}");
                        summary::file_based_summary(&commit)
                    }
                }
            }
            Ok(_) => summary::file_based_summary(&commit),
            Err(e) => {
                tracing::warn!(sha = %commit.sha, "diff fetch fell back: {e}");
                summary::file_based_summary(&commit)
            }
        };

        payload.diff_analysis = Some(analysis);
        let next = make_item(TaskKind::ChangelogRender, tenant_id, &payload)?;
        Ok(TaskOutcome::then(
            "analyzed",
            FollowUp {
                item: next,
                quota: Some(self.quota_for_tenant(tenant_id)),
            },
        ))
    }

    async fn run_changelog_render(
        &self,
        tenant_id: &str,
        mut payload: StagePayload,
    ) -> Result<TaskOutcome, PipelineError> {
        let commit = payload.commit.clone();
        let analysis = payload
            .diff_analysis
            .clone()
            .unwrap_or_else(|| summary::file_based_summary(&commit));

        let stored = self.db.active_template(tenant_id).map_err(store_err)?;
        let vars = template::variables(&commit, &payload.repo, &payload.project_context, &analysis);
        let (plan, warnings) = template::process(stored.as_deref(), &vars);
        for warning in warnings {
            tracing::warn!(tenant_id, "template: {warning}");
        }

        let ai_text = if plan.needs_ai && self.ai.enabled() {
            // AI errors here are real task failures; the queue retries them.
            Some(self.ai.render_post(&plan.prompt).await?)
        } else {
            None
        };

        let mut text = template::finalize(&plan, ai_text.as_deref());
        if plan.is_default {
            text = ai::postprocess_default(&text, commit.subject());
        }
        if text.trim().is_empty() {
            text = commit.subject().to_string();
        }

        payload.text = Some(text);
        let next = make_item(TaskKind::PostDispatch, tenant_id, &payload)?;
        Ok(TaskOutcome::then(
            "rendered",
            FollowUp {
                item: next,
                quota: None,
            },
        ))
    }

    async fn run_post_dispatch(
        &self,
        tenant_id: &str,
        payload: StagePayload,
    ) -> Result<TaskOutcome, PipelineError> {
        let commit = &payload.commit;
        let repo = &payload.repo.full_name;

        // At-most-once: the ledger is consulted before any provider call.
        if let Some(existing) = self.db.get_posted(&commit.sha).map_err(store_err)? {
            tracing::info!(sha = %commit.sha, post_id = %existing, "already posted, skipping");
            return Ok(TaskOutcome::done(existing));
        }

        let text = payload
            .text
            .as_deref()
            .ok_or_else(|| PipelineError::Validation("post stage without text".into()))?;

        let mut material = self
            .vault
            .get(TokenProvider::Socialnet, tenant_id)
            .ok_or_else(|| PipelineError::ReauthRequired(tenant_id.to_string()))?;

        if !material.is_valid(chrono::Utc::now()) {
            let Some(config) = &self.config.socialnet_oauth else {
                return Err(PipelineError::ReauthRequired(tenant_id.to_string()));
            };
            material = self
                .vault
                .refresh_socialnet(tenant_id, config, &self.http)
                .await
                .map_err(|e| match e {
                    VaultError::Transport(msg) => PipelineError::Transient(msg),
                    other => PipelineError::ReauthRequired(other.to_string()),
                })?;
        }

        let quote = self.db.get_og_post(repo).map_err(store_err)?;
        let reply = self.db.latest_post_for_repo(repo).map_err(store_err)?;

        let post_id = self
            .poster
            .post(
                &material.access_token,
                text,
                quote.as_deref(),
                reply.as_deref(),
            )
            .await?;

        // The post already happened; a ledger write failure must not fail
        // the item and trigger a duplicate retry.
        if let Err(e) = self.db.record_posted(&commit.sha, repo, &post_id) {
            tracing::error!(sha = %commit.sha, "ledger write after post: {e}");
        }
        tracing::info!(sha = %commit.sha, post_id = %post_id, "posted");
        Ok(TaskOutcome::done(post_id))
    }
}

impl TaskRunner for Pipeline {
    async fn run(&self, item: QueueItem) -> Result<TaskOutcome, PipelineError> {
        let payload: StagePayload = serde_json::from_value(item.payload.clone())
            .map_err(|e| PipelineError::Validation(format!("malformed payload: {e}")))?;

        match item.kind {
            TaskKind::DiffAnalysis => self.run_diff_analysis(&item.tenant_id, payload).await,
            TaskKind::ChangelogRender => self.run_changelog_render(&item.tenant_id, payload).await,
            TaskKind::PostDispatch => self.run_post_dispatch(&item.tenant_id, payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{init_db, TokenMaterial};

    fn test_pipeline() -> (tempfile::TempDir, Pipeline) {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = init_db(dir.path()).expect("init db");
        let vault = Vault::new(Some(db.clone()), dir.path());
        let http = reqwest::Client::new();
        let config = AppConfig {
            webhook_secret: None,
            allowed_repos: vec![],
            codehost_oauth: None,
            socialnet_oauth: None,
            callback_base: "http://localhost:3000".into(),
            data_dir: dir.path().to_path_buf(),
            ai_api_key: None,
            ai_model: "m".into(),
            ai_base_url: "http://localhost:1".into(),
            codehost_api_base: "http://localhost:1".into(),
            socialnet_api_base: "http://localhost:1".into(),
            queue: commitcast_queue::QueueConfig::default(),
            user_quota_limit: 100,
            tier_quotas: std::collections::HashMap::from([("pro".to_string(), 500)]),
            admin_api_key: None,
            port: 0,
        };
        let pipeline = Pipeline {
            db,
            vault,
            ai: AiClient::new(http.clone(), "http://localhost:1".into(), None, "m".into()),
            diff: DiffFetcher::new(http.clone(), "http://localhost:1".into()),
            poster: Poster::new(http.clone(), "http://localhost:1".into()),
            config,
            http,
        };
        (dir, pipeline)
    }

    fn payload(sha: &str) -> StagePayload {
        StagePayload::new(
            CommitData {
                sha: sha.into(),
                message: "fix: null check".into(),
                author: "dev".into(),
                branch: "main".into(),
                url: None,
                added: vec![],
                modified: vec!["src/lib.rs".into()],
                removed: vec![],
            },
            RepoInfo {
                name: "widget".into(),
                full_name: "acme/widget".into(),
                ..RepoInfo::default()
            },
            String::new(),
        )
    }

    #[test]
    fn item_ids_keyed_by_sha_and_stage() {
        let p = payload("abc1234");
        let item = make_item(TaskKind::DiffAnalysis, "codehost:1", &p).unwrap();
        assert_eq!(item.id, "abc1234:analyze");
        assert_eq!(item.kind, TaskKind::DiffAnalysis);
        assert_eq!(item.tenant_id, "codehost:1");

        let round: StagePayload = serde_json::from_value(item.payload).unwrap();
        assert_eq!(round.commit.sha, "abc1234");
    }

    #[tokio::test]
    async fn post_dispatch_short_circuits_on_ledger_hit() {
        let (_dir, pipeline) = test_pipeline();
        pipeline
            .db
            .record_posted("abc1234", "acme/widget", "post-1")
            .unwrap();

        let mut p = payload("abc1234");
        p.text = Some("never sent".into());
        let item = make_item(TaskKind::PostDispatch, "codehost:1", &p).unwrap();

        // No credential and an unreachable poster, yet this succeeds.
        let outcome = pipeline.run(item).await.unwrap();
        assert_eq!(outcome.result, "post-1");
        assert!(outcome.follow_up.is_none());
    }

    #[tokio::test]
    async fn post_dispatch_without_credential_requires_reauth() {
        let (_dir, pipeline) = test_pipeline();
        let mut p = payload("def5678");
        p.text = Some("text".into());
        let item = make_item(TaskKind::PostDispatch, "codehost:1", &p).unwrap();

        let err = pipeline.run(item).await.unwrap_err();
        assert!(matches!(err, PipelineError::ReauthRequired(_)));
        assert!(err.is_terminal());
    }

    #[tokio::test]
    async fn expired_token_without_refresh_requires_reauth() {
        let (_dir, pipeline) = test_pipeline();
        pipeline.vault.put(
            TokenProvider::Socialnet,
            "codehost:1",
            &TokenMaterial {
                access_token: "stale".into(),
                refresh_token: None,
                expires_at: Some(chrono::Utc::now() - chrono::Duration::seconds(10)),
                scopes: None,
            },
        );

        let mut p = payload("0123abc");
        p.text = Some("text".into());
        let item = make_item(TaskKind::PostDispatch, "codehost:1", &p).unwrap();

        let err = pipeline.run(item).await.unwrap_err();
        assert!(matches!(err, PipelineError::ReauthRequired(_)));
    }

    #[tokio::test]
    async fn render_without_ai_uses_file_summary_fallback() {
        let (_dir, pipeline) = test_pipeline();
        let mut p = payload("abc1234");
        p.diff_analysis = Some("- tightened the null path".into());

        let item = make_item(TaskKind::ChangelogRender, "codehost:1", &p).unwrap();
        let outcome = pipeline.run(item).await.unwrap();

        // AI disabled on the default template: text falls back to the subject.
        let follow = outcome.follow_up.expect("post follow-up");
        assert_eq!(follow.item.kind, TaskKind::PostDispatch);
        let next: StagePayload = serde_json::from_value(follow.item.payload).unwrap();
        assert_eq!(next.text.as_deref(), Some("fix: null check"));
    }

    #[tokio::test]
    async fn render_with_static_template_skips_ai() {
        let (_dir, pipeline) = test_pipeline();
        pipeline
            .db
            .upsert_user("codehost:1", "1", "alice", None, None)
            .unwrap();
        pipeline
            .db
            .set_active_template(
                "codehost:1",
                "static",
                r#"{"template":"pushed {{COMMIT_SHA}} to {{BRANCH}}","prompt":""}"#,
            )
            .unwrap();

        let item = make_item(TaskKind::ChangelogRender, "codehost:1", &payload("abc1234def")).unwrap();
        let outcome = pipeline.run(item).await.unwrap();
        let next: StagePayload =
            serde_json::from_value(outcome.follow_up.unwrap().item.payload).unwrap();
        assert_eq!(next.text.as_deref(), Some("pushed abc1234 to main"));
    }

    #[test]
    fn quota_resolution_prefers_override_then_tier() {
        let (_dir, pipeline) = test_pipeline();
        pipeline
            .db
            .upsert_user("codehost:1", "1", "alice", None, None)
            .unwrap();
        assert_eq!(pipeline.quota_for_tenant("codehost:1"), 100);

        pipeline.db.set_user_tier("codehost:1", "pro", None).unwrap();
        assert_eq!(pipeline.quota_for_tenant("codehost:1"), 500);

        pipeline.db.set_user_tier("codehost:1", "pro", Some(7)).unwrap();
        assert_eq!(pipeline.quota_for_tenant("codehost:1"), 7);

        // Unknown tenants fall back to the global default.
        assert_eq!(pipeline.quota_for_tenant("codehost:999"), 100);
    }
}
