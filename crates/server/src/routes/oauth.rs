//! OAuth flows for both providers.
//!
//! Code host: classical authorization code. Social net: authorization code
//! with PKCE (S256). Callbacks render small HTML pages since the browser
//! lands on them directly.

use std::collections::HashMap;

use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use commitcast_api::db::tokens::TokenProvider;
use commitcast_api::{oauth, pkce};
use commitcast_core::tenant;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiErr;
use crate::storage::TokenMaterial;
use crate::AppState;

const STATE_TTL_MINUTES: i64 = 10;

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>{title}</title></head>\
         <body style=\"font-family:sans-serif;max-width:40rem;margin:4rem auto\">\
         <h1>{title}</h1><p>{body}</p></body></html>"
    ))
}

fn error_page(detail: &str) -> Html<String> {
    page("Authorization failed", detail)
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    fn provider_error(&self) -> Option<String> {
        self.error.as_ref().map(|e| {
            match &self.error_description {
                Some(desc) => format!("{e}: {desc}"),
                None => e.clone(),
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Code host (classical authorization code)
// ---------------------------------------------------------------------------

/// GET /auth/codehost — redirect to the code host's authorize page.
pub async fn codehost_start(State(state): State<AppState>) -> Result<Redirect, ApiErr> {
    let Some(config) = &state.config.codehost_oauth else {
        return Err(ApiErr::not_found("code-host OAuth is not configured"));
    };

    let oauth_state = Uuid::new_v4().to_string();
    state
        .db
        .insert_oauth_state(&oauth_state, "codehost", None, None, STATE_TTL_MINUTES)
        .map_err(ApiErr::from_db("oauth state insert"))?;

    let redirect_uri = format!("{}/auth/codehost/callback", state.config.callback_base);
    let url = oauth::build_authorize_url(config, &redirect_uri, &oauth_state);
    Ok(Redirect::temporary(&url))
}

#[derive(Debug, Deserialize)]
struct CodehostProfile {
    id: serde_json::Value,
    login: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// GET /auth/codehost/callback — finish the code-host flow.
pub async fn codehost_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    if let Some(detail) = params.provider_error() {
        return error_page(&detail);
    }
    let (Some(code), Some(oauth_state)) = (&params.code, &params.state) else {
        return error_page("missing code or state parameter");
    };
    let Some(config) = state.config.codehost_oauth.clone() else {
        return error_page("code-host OAuth is not configured");
    };

    match state.db.take_oauth_state(oauth_state, "codehost") {
        Ok(Some(_)) => {}
        Ok(None) => return error_page("unknown or expired state; restart the flow"),
        Err(e) => {
            tracing::error!("oauth state lookup: {e}");
            return error_page("internal error validating state");
        }
    }

    let redirect_uri = format!("{}/auth/codehost/callback", state.config.callback_base);
    let form = oauth::build_token_request_form(&config, code, &redirect_uri);
    let raw = match state
        .http
        .post(&config.token_url)
        .header("Accept", "application/json")
        .form(&form)
        .send()
        .await
    {
        Ok(response) => response.text().await.unwrap_or_default(),
        Err(e) => return error_page(&format!("token exchange transport error: {e}")),
    };
    let grant = match oauth::parse_token_response(&raw) {
        Ok(grant) => grant,
        Err(e) => return error_page(&e),
    };

    let profile: CodehostProfile = match state
        .http
        .get(&config.userinfo_url)
        .bearer_auth(&grant.access_token)
        .header("Accept", "application/vnd.github+json")
        .header("User-Agent", "commitcast")
        .send()
        .await
    {
        Ok(response) => match response.json().await {
            Ok(profile) => profile,
            Err(e) => return error_page(&format!("profile parse error: {e}")),
        },
        Err(e) => return error_page(&format!("profile fetch error: {e}")),
    };

    // Numeric or string id, normalized to text.
    let external_id = match &profile.id {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let tenant_id = tenant::tenant_id_for(&external_id);

    if let Err(e) = state.db.upsert_user(
        &tenant_id,
        &external_id,
        &profile.login,
        profile.name.as_deref(),
        profile.email.as_deref(),
    ) {
        tracing::error!("user upsert: {e}");
        return error_page("internal error saving account");
    }

    state.vault.put(
        TokenProvider::Codehost,
        &external_id,
        &TokenMaterial {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: grant
                .expires_in
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(secs)),
            scopes: grant.scope,
        },
    );

    tracing::info!(%tenant_id, login = %profile.login, "code-host account connected");
    page(
        "Connected",
        &format!(
            "Signed in as <b>@{}</b>. Next, authorize posting: \
             <a href=\"/auth/socialnet?tenant_id={}\">connect the social account</a>.",
            profile.login,
            urlencoding::encode(&tenant_id),
        ),
    )
}

// ---------------------------------------------------------------------------
// Social net (authorization code + PKCE)
// ---------------------------------------------------------------------------

/// GET /auth/socialnet?tenant_id=… — redirect to the social net's authorize
/// page with an S256 challenge.
pub async fn socialnet_start(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Redirect, ApiErr> {
    let Some(config) = &state.config.socialnet_oauth else {
        return Err(ApiErr::not_found("social-net OAuth is not configured"));
    };
    let tenant_id = params
        .get("tenant_id")
        .map(String::as_str)
        .ok_or_else(|| ApiErr::bad_request("missing tenant_id parameter"))?;
    if state
        .db
        .get_user(tenant_id)
        .map_err(ApiErr::from_db("user lookup"))?
        .is_none()
    {
        return Err(ApiErr::not_found("unknown tenant; connect the code host first"));
    }

    let verifier = pkce::generate_verifier(64).map_err(ApiErr::internal)?;
    let challenge = pkce::challenge_s256(&verifier);
    let oauth_state = Uuid::new_v4().to_string();

    state
        .db
        .insert_oauth_state(
            &oauth_state,
            "socialnet",
            Some(tenant_id),
            Some(&verifier),
            STATE_TTL_MINUTES,
        )
        .map_err(ApiErr::from_db("oauth state insert"))?;

    let redirect_uri = format!("{}/auth/socialnet/callback", state.config.callback_base);
    let url = pkce::build_authorize_url(config, &redirect_uri, &oauth_state, &challenge);
    Ok(Redirect::temporary(&url))
}

/// GET /auth/socialnet/callback — finish the PKCE flow.
pub async fn socialnet_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Html<String> {
    if let Some(detail) = params.provider_error() {
        return error_page(&detail);
    }
    let (Some(code), Some(oauth_state)) = (&params.code, &params.state) else {
        return error_page("missing code or state parameter");
    };
    let Some(config) = state.config.socialnet_oauth.clone() else {
        return error_page("social-net OAuth is not configured");
    };

    let (subject, verifier) = match state.db.take_oauth_state(oauth_state, "socialnet") {
        Ok(Some((Some(subject), Some(verifier)))) => (subject, verifier),
        Ok(_) => return error_page("unknown or expired state; restart the flow"),
        Err(e) => {
            tracing::error!("oauth state lookup: {e}");
            return error_page("internal error validating state");
        }
    };

    let redirect_uri = format!("{}/auth/socialnet/callback", state.config.callback_base);
    let form = pkce::build_token_request_form(&config, code, &verifier, &redirect_uri);
    let mut request = state
        .http
        .post(&config.token_url)
        .header("Accept", "application/json")
        .form(&form);
    // Confidential clients also authenticate with HTTP Basic.
    if let Some(header) = pkce::basic_auth_header(&config) {
        request = request.header("Authorization", header);
    }
    let raw = match request.send().await {
        Ok(response) => response.text().await.unwrap_or_default(),
        Err(e) => return error_page(&format!("token exchange transport error: {e}")),
    };
    let grant = match oauth::parse_token_response(&raw) {
        Ok(grant) => grant,
        Err(e) => return error_page(&e),
    };

    let expires_in = grant.expires_in.unwrap_or(pkce::DEFAULT_EXPIRES_IN_SECS);
    state.vault.put(
        TokenProvider::Socialnet,
        &subject,
        &TokenMaterial {
            access_token: grant.access_token,
            refresh_token: grant.refresh_token,
            expires_at: Some(chrono::Utc::now() + chrono::Duration::seconds(expires_in)),
            scopes: grant.scope,
        },
    );

    tracing::info!(tenant_id = %subject, "social-net account connected");
    page(
        "Posting enabled",
        "The social account is connected. Pushes to enrolled repositories \
         will be posted automatically.",
    )
}
