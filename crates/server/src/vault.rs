//! Credential vault: opaque OAuth token storage keyed by (provider, subject).
//!
//! Primary storage is the SQLite store; a file-backed JSON store under the
//! data directory stands in when the primary store is uninitialized (or a
//! write fails mid-flight). Refresh is provider-specific: social-net tokens
//! refresh through the PKCE token endpoint; code-host tokens from the
//! classical grant are treated as non-expiring.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;
use commitcast_api::db::tokens::TokenProvider;
use commitcast_api::oauth::parse_token_response;
use commitcast_api::pkce::{self, SocialOAuthConfig, DEFAULT_EXPIRES_IN_SECS};
use thiserror::Error;

use crate::storage::{Db, TokenMaterial};

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("no credential for {provider}:{subject}", provider = .0.as_str(), subject = .1)]
    NoCredential(TokenProvider, String),

    #[error("no refresh token available")]
    RefreshUnavailable,

    #[error("refresh rejected: {0}")]
    RefreshRejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[derive(Clone)]
pub struct Vault {
    db: Option<Db>,
    fallback_path: PathBuf,
}

fn file_key(provider: TokenProvider, subject: &str) -> String {
    format!("{}:{}", provider.as_str(), subject)
}

impl Vault {
    pub fn new(db: Option<Db>, data_dir: &std::path::Path) -> Self {
        Self {
            db,
            fallback_path: data_dir.join("tokens.json"),
        }
    }

    fn read_fallback(&self) -> HashMap<String, TokenMaterial> {
        std::fs::read(&self.fallback_path)
            .ok()
            .and_then(|raw| serde_json::from_slice(&raw).ok())
            .unwrap_or_default()
    }

    fn write_fallback(&self, store: &HashMap<String, TokenMaterial>) {
        if let Some(dir) = self.fallback_path.parent() {
            std::fs::create_dir_all(dir).ok();
        }
        match serde_json::to_vec_pretty(store) {
            Ok(raw) => {
                if let Err(e) = std::fs::write(&self.fallback_path, raw) {
                    tracing::error!("writing token fallback store: {e}");
                }
            }
            Err(e) => tracing::error!("serializing token fallback store: {e}"),
        }
    }

    /// Overwrite the credential for (provider, subject).
    pub fn put(&self, provider: TokenProvider, subject: &str, material: &TokenMaterial) {
        if let Some(db) = &self.db {
            match db.put_token(provider, subject, material) {
                Ok(()) => return,
                Err(e) => tracing::warn!("token store write failed, using file fallback: {e}"),
            }
        }
        let mut store = self.read_fallback();
        store.insert(file_key(provider, subject), material.clone());
        self.write_fallback(&store);
    }

    pub fn get(&self, provider: TokenProvider, subject: &str) -> Option<TokenMaterial> {
        if let Some(db) = &self.db {
            match db.get_token(provider, subject) {
                Ok(found @ Some(_)) => return found,
                Ok(None) => return None,
                Err(e) => tracing::warn!("token store read failed, using file fallback: {e}"),
            }
        }
        self.read_fallback().remove(&file_key(provider, subject))
    }

    /// Present and (no expiry or expiry in the future).
    pub fn is_valid(&self, provider: TokenProvider, subject: &str) -> bool {
        self.get(provider, subject)
            .map(|m| m.is_valid(Utc::now()))
            .unwrap_or(false)
    }

    /// Delete forces re-authorization on the next use.
    pub fn delete(&self, provider: TokenProvider, subject: &str) -> bool {
        if let Some(db) = &self.db {
            match db.delete_token(provider, subject) {
                Ok(deleted) => return deleted,
                Err(e) => tracing::warn!("token store delete failed, using file fallback: {e}"),
            }
        }
        let mut store = self.read_fallback();
        let removed = store.remove(&file_key(provider, subject)).is_some();
        if removed {
            self.write_fallback(&store);
        }
        removed
    }

    /// Refresh an expired social-net access token and re-store it.
    ///
    /// Keeps the previous refresh token when the provider does not rotate it.
    pub async fn refresh_socialnet(
        &self,
        subject: &str,
        config: &SocialOAuthConfig,
        client: &reqwest::Client,
    ) -> Result<TokenMaterial, VaultError> {
        let current = self
            .get(TokenProvider::Socialnet, subject)
            .ok_or_else(|| VaultError::NoCredential(TokenProvider::Socialnet, subject.into()))?;
        let refresh_token = current
            .refresh_token
            .clone()
            .ok_or(VaultError::RefreshUnavailable)?;

        let form = pkce::build_refresh_request_form(config, &refresh_token);
        let mut request = client.post(&config.token_url).form(&form);
        if let Some(header) = pkce::basic_auth_header(config) {
            request = request.header("Authorization", header);
        }

        let response = request
            .send()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| VaultError::Transport(e.to_string()))?;

        if status.is_server_error() {
            return Err(VaultError::Transport(format!("token endpoint {status}")));
        }
        if !status.is_success() {
            return Err(VaultError::RefreshRejected(format!(
                "{status}: {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let grant = parse_token_response(&body).map_err(VaultError::RefreshRejected)?;
        let expires_in = grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let material = TokenMaterial {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token.or(Some(refresh_token)),
            expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in)),
            scopes: grant.scope.or(current.scopes),
        };
        self.put(TokenProvider::Socialnet, subject, &material);
        tracing::info!(subject, "refreshed social-net credential");
        Ok(material)
    }
}
