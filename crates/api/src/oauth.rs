//! Classical OAuth2 authorization-code support for the code host.
//!
//! Config-driven: endpoints come from configuration so self-hosted instances
//! work unchanged. This module contains only types, URL builders, and JSON
//! parsing. No HTTP calls or DB access — those live in the server.

use serde::{Deserialize, Serialize};

/// Code-host OAuth2 provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodehostOAuthConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,

    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub scopes: String,
}

/// Default code-host preset (GitHub-shaped endpoints). Only needs client
/// credentials; `repo.write` scope is what lets the app install webhooks.
pub fn codehost_preset(client_id: String, client_secret: String) -> CodehostOAuthConfig {
    CodehostOAuthConfig {
        authorize_url: "https://github.com/login/oauth/authorize".into(),
        token_url: "https://github.com/login/oauth/access_token".into(),
        userinfo_url: "https://api.github.com/user".into(),
        client_id,
        client_secret,
        scopes: "read:user,repo".into(),
    }
}

/// Build the authorize URL the user's browser is redirected to.
pub fn build_authorize_url(config: &CodehostOAuthConfig, redirect_uri: &str, state: &str) -> String {
    format!(
        "{}?client_id={}&redirect_uri={}&state={}&scope={}&response_type=code",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(state),
        urlencoding::encode(&config.scopes),
    )
}

/// Build the token exchange request as urlencoded form pairs.
///
/// OAuth2 token endpoints are required to accept urlencoded form input.
pub fn build_token_request_form(
    config: &CodehostOAuthConfig,
    code: &str,
    redirect_uri: &str,
) -> Vec<(String, String)> {
    vec![
        ("client_id".into(), config.client_id.clone()),
        ("client_secret".into(), config.client_secret.clone()),
        ("code".into(), code.to_string()),
        ("grant_type".into(), "authorization_code".into()),
        ("redirect_uri".into(), redirect_uri.to_string()),
    ]
}

/// Token material returned by a token or refresh endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Parse a token response body into a [`TokenGrant`].
///
/// Supports both JSON (`{"access_token":"..."}`) and query-string style
/// (`access_token=...&scope=...`) payloads; some hosts return the latter.
pub fn parse_token_response(raw: &str) -> Result<TokenGrant, String> {
    let body = raw.trim();
    if body.is_empty() {
        return Err("token exchange failed: empty response body".into());
    }

    if let Ok(json) = serde_json::from_str::<serde_json::Value>(body) {
        if json
            .get("access_token")
            .and_then(|v| v.as_str())
            .map(str::trim)
            .is_some_and(|s| !s.is_empty())
        {
            return serde_json::from_value::<TokenGrant>(json)
                .map_err(|e| format!("token response parse failed: {e}"));
        }

        let err = json.get("error").and_then(|v| v.as_str());
        let err_desc = json
            .get("error_description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty());

        let detail = match (err, err_desc) {
            (Some(e), Some(d)) => format!("{e}: {d}"),
            (Some(e), None) => e.to_string(),
            (None, Some(d)) => d.to_string(),
            (None, None) => "no access_token field in JSON response".to_string(),
        };
        return Err(format!("token exchange failed: {detail}"));
    }

    // Query-string form
    let mut access_token = None;
    let mut refresh_token = None;
    let mut scope = None;
    let mut error = None;
    for pair in body.split('&') {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let value = urlencoding::decode(v).map(|c| c.into_owned()).unwrap_or_default();
        match k {
            "access_token" if !value.trim().is_empty() => access_token = Some(value),
            "refresh_token" if !value.trim().is_empty() => refresh_token = Some(value),
            "scope" if !value.trim().is_empty() => scope = Some(value),
            "error" | "error_description" if !value.trim().is_empty() => error = Some(value),
            _ => {}
        }
    }

    match access_token {
        Some(token) => Ok(TokenGrant {
            access_token: token,
            refresh_token,
            expires_in: None,
            scope,
        }),
        None => Err(format!(
            "token exchange failed: {}",
            error.unwrap_or_else(|| "no access_token field in response".into())
        )),
    }
}
