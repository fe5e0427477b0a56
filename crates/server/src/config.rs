//! Server configuration, read once from environment variables at startup.

use std::collections::HashMap;
use std::path::PathBuf;

use commitcast_api::oauth::{self, CodehostOAuthConfig};
use commitcast_api::pkce::{self, SocialOAuthConfig};
use commitcast_queue::QueueConfig;

/// Everything the handlers and the pipeline need, cheap to clone.
#[derive(Clone)]
pub struct AppConfig {
    /// Global HMAC secret; per-repo secrets take precedence.
    pub webhook_secret: Option<String>,
    /// Optional allow-list of `owner/name` repos processed without enrollment.
    pub allowed_repos: Vec<String>,
    pub codehost_oauth: Option<CodehostOAuthConfig>,
    pub socialnet_oauth: Option<SocialOAuthConfig>,
    /// Public base URL OAuth callbacks are built from.
    pub callback_base: String,
    pub data_dir: PathBuf,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub ai_base_url: String,
    pub codehost_api_base: String,
    pub socialnet_api_base: String,
    pub queue: QueueConfig,
    /// Per-tenant hourly AI-call cap when no tier or override applies.
    pub user_quota_limit: i64,
    /// Per-tier quota overrides, e.g. `free=100,pro=500,enterprise=2000`.
    pub tier_quotas: HashMap<String, i64>,
    pub admin_api_key: Option<String>,
    pub port: u16,
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env_opt(key) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("invalid {key} value {raw:?}, using default");
            default
        }),
        None => default,
    }
}

/// Parse `tier=quota` pairs; malformed entries are skipped with a warning.
fn parse_tier_quotas(raw: &str) -> HashMap<String, i64> {
    let mut quotas = HashMap::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        match entry.split_once('=').map(|(t, q)| (t.trim(), q.trim().parse::<i64>())) {
            Some((tier, Ok(quota))) => {
                quotas.insert(tier.to_string(), quota);
            }
            _ => tracing::warn!("skipping malformed TIER_QUOTAS entry {entry:?}"),
        }
    }
    quotas
}

impl AppConfig {
    pub fn from_env() -> Self {
        let webhook_secret = env_opt("COMMITCAST_WEBHOOK_SECRET");
        if webhook_secret.is_none() {
            tracing::warn!(
                "COMMITCAST_WEBHOOK_SECRET not set — webhooks without per-repo secrets are unverified"
            );
        }

        let allowed_repos: Vec<String> = env_opt("COMMITCAST_ALLOWED_REPOS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let codehost_oauth = match (env_opt("CODEHOST_CLIENT_ID"), env_opt("CODEHOST_CLIENT_SECRET"))
        {
            (Some(id), Some(secret)) => {
                tracing::info!("code-host OAuth enabled");
                Some(oauth::codehost_preset(id, secret))
            }
            _ => None,
        };

        // Social-net client secret is optional: absent means a public
        // PKCE-only client.
        let socialnet_oauth = env_opt("SOCIALNET_CLIENT_ID").map(|id| {
            tracing::info!("social-net OAuth enabled");
            pkce::socialnet_preset(id, env_opt("SOCIALNET_CLIENT_SECRET"))
        });

        let ai_api_key = env_opt("AI_API_KEY");
        if ai_api_key.is_none() {
            tracing::warn!("AI_API_KEY not set — posts fall back to deterministic summaries");
        }

        let queue = QueueConfig {
            max_requests_per_minute: env_parsed("QUEUE_MAX_RPM", 15),
            max_retries: env_parsed("QUEUE_MAX_RETRIES", 3),
            base_retry_delay_ms: env_parsed("QUEUE_BASE_RETRY_DELAY_MS", 2_000),
            max_retry_delay_ms: env_parsed("QUEUE_MAX_RETRY_DELAY_MS", 60_000),
            processing_interval_ms: env_parsed("QUEUE_PROCESSING_INTERVAL_MS", 1_000),
            ..QueueConfig::default()
        };

        Self {
            webhook_secret,
            allowed_repos,
            codehost_oauth,
            socialnet_oauth,
            callback_base: env_opt("COMMITCAST_CALLBACK_URL")
                .unwrap_or_else(|| "http://localhost:3000".into()),
            data_dir: env_opt("COMMITCAST_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            ai_api_key,
            ai_model: env_opt("AI_MODEL").unwrap_or_else(|| "gpt-4o-mini".into()),
            ai_base_url: env_opt("AI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".into()),
            codehost_api_base: env_opt("CODEHOST_API_BASE")
                .unwrap_or_else(|| "https://api.github.com".into()),
            socialnet_api_base: env_opt("SOCIALNET_API_BASE")
                .unwrap_or_else(|| "https://api.x.com".into()),
            queue,
            user_quota_limit: env_parsed("USER_QUOTA_LIMIT", 100),
            tier_quotas: env_opt("TIER_QUOTAS")
                .map(|raw| parse_tier_quotas(&raw))
                .unwrap_or_default(),
            admin_api_key: env_opt("COMMITCAST_ADMIN_KEY"),
            port: env_parsed("PORT", 3000),
        }
    }

    /// Repo is on the global allow-list.
    pub fn repo_allowed(&self, repo_full_name: &str) -> bool {
        self.allowed_repos.iter().any(|r| r == repo_full_name)
    }

    /// Hourly AI-call quota for a tenant: explicit override, then tier
    /// quota, then the global default.
    pub fn quota_for(&self, tier: &str, quota_override: Option<i64>) -> i64 {
        quota_override
            .or_else(|| self.tier_quotas.get(tier).copied())
            .unwrap_or(self.user_quota_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_quotas_parse_and_skip_malformed() {
        let quotas = parse_tier_quotas("free=100, pro=500, bogus, enterprise=oops");
        assert_eq!(quotas.get("free"), Some(&100));
        assert_eq!(quotas.get("pro"), Some(&500));
        assert_eq!(quotas.len(), 2);
    }

    #[test]
    fn quota_resolution_order() {
        let config = AppConfig {
            webhook_secret: None,
            allowed_repos: vec![],
            codehost_oauth: None,
            socialnet_oauth: None,
            callback_base: "http://localhost:3000".into(),
            data_dir: PathBuf::from("data"),
            ai_api_key: None,
            ai_model: "m".into(),
            ai_base_url: "http://ai".into(),
            codehost_api_base: "http://ch".into(),
            socialnet_api_base: "http://sn".into(),
            queue: QueueConfig::default(),
            user_quota_limit: 100,
            tier_quotas: HashMap::from([("pro".to_string(), 500)]),
            admin_api_key: None,
            port: 3000,
        };
        assert_eq!(config.quota_for("pro", Some(7)), 7);
        assert_eq!(config.quota_for("pro", None), 500);
        assert_eq!(config.quota_for("free", None), 100);
    }
}
