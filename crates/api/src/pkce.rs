//! OAuth2 + PKCE (RFC 7636) support for the social-net provider.
//!
//! Verifier generation, S256 challenge derivation, and the request builders
//! for the authorize / token / refresh legs. Pure functions only.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

/// Unreserved characters permitted in a code verifier (RFC 7636 §4.1).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

pub const VERIFIER_MIN_LEN: usize = 43;
pub const VERIFIER_MAX_LEN: usize = 128;

/// Social-net OAuth2 provider configuration.
///
/// `client_secret` is optional: when present the token exchange authenticates
/// as a confidential client via HTTP Basic, otherwise the flow is PKCE-only.
#[derive(Debug, Clone)]
pub struct SocialOAuthConfig {
    pub authorize_url: String,
    pub token_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: String,
}

/// Default social-net preset. Scopes include `offline.access` so the grant
/// carries a refresh token.
pub fn socialnet_preset(client_id: String, client_secret: Option<String>) -> SocialOAuthConfig {
    SocialOAuthConfig {
        authorize_url: "https://x.com/i/oauth2/authorize".into(),
        token_url: "https://api.x.com/2/oauth2/token".into(),
        client_id,
        client_secret,
        scopes: "tweet.read tweet.write users.read offline.access".into(),
    }
}

/// Generate a random code verifier of the given length over the unreserved set.
///
/// Lengths outside [43, 128] are clamped into range.
pub fn generate_verifier(len: usize) -> Result<String, String> {
    let len = len.clamp(VERIFIER_MIN_LEN, VERIFIER_MAX_LEN);
    let mut bytes = vec![0u8; len];
    getrandom::getrandom(&mut bytes).map_err(|e| format!("RNG failure: {e}"))?;
    Ok(bytes
        .into_iter()
        .map(|b| VERIFIER_CHARSET[(b as usize) % VERIFIER_CHARSET.len()] as char)
        .collect())
}

/// `code_challenge = base64url(SHA256(code_verifier))`, padding stripped.
pub fn challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

/// Build the PKCE authorize URL.
pub fn build_authorize_url(
    config: &SocialOAuthConfig,
    redirect_uri: &str,
    state: &str,
    challenge: &str,
) -> String {
    format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
        config.authorize_url,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&config.scopes),
        urlencoding::encode(state),
        urlencoding::encode(challenge),
    )
}

/// Token exchange form for the callback leg.
pub fn build_token_request_form(
    config: &SocialOAuthConfig,
    code: &str,
    verifier: &str,
    redirect_uri: &str,
) -> Vec<(String, String)> {
    vec![
        ("grant_type".into(), "authorization_code".into()),
        ("code".into(), code.to_string()),
        ("client_id".into(), config.client_id.clone()),
        ("redirect_uri".into(), redirect_uri.to_string()),
        ("code_verifier".into(), verifier.to_string()),
    ]
}

/// Refresh form for an expired access token.
pub fn build_refresh_request_form(
    config: &SocialOAuthConfig,
    refresh_token: &str,
) -> Vec<(String, String)> {
    vec![
        ("grant_type".into(), "refresh_token".into()),
        ("refresh_token".into(), refresh_token.to_string()),
        ("client_id".into(), config.client_id.clone()),
    ]
}

/// `Authorization: Basic ...` value for confidential clients, if configured.
pub fn basic_auth_header(config: &SocialOAuthConfig) -> Option<String> {
    use base64::engine::general_purpose::STANDARD;
    config.client_secret.as_ref().map(|secret| {
        let raw = format!("{}:{}", config.client_id, secret);
        format!("Basic {}", STANDARD.encode(raw.as_bytes()))
    })
}

/// Default token lifetime when the provider omits `expires_in`.
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc7636_test_vector() {
        // Appendix B of RFC 7636.
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            challenge_s256(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn verifier_length_and_charset() {
        for requested in [10, 43, 64, 128, 500] {
            let v = generate_verifier(requested).expect("verifier");
            assert!(v.len() >= VERIFIER_MIN_LEN && v.len() <= VERIFIER_MAX_LEN);
            assert!(v.bytes().all(|b| VERIFIER_CHARSET.contains(&b)));
        }
    }

    #[test]
    fn verifiers_are_unique() {
        let a = generate_verifier(64).expect("verifier");
        let b = generate_verifier(64).expect("verifier");
        assert_ne!(a, b);
    }

    #[test]
    fn authorize_url_carries_challenge() {
        let config = socialnet_preset("cid".into(), None);
        let url = build_authorize_url(&config, "https://app/cb", "st", "chal");
        assert!(url.contains("code_challenge=chal"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("offline.access"));
    }

    #[test]
    fn basic_auth_only_for_confidential_clients() {
        let public = socialnet_preset("cid".into(), None);
        assert!(basic_auth_header(&public).is_none());

        let confidential = socialnet_preset("cid".into(), Some("sec".into()));
        let header = basic_auth_header(&confidential).expect("header");
        assert!(header.starts_with("Basic "));
    }
}
