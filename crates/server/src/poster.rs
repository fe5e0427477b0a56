//! Outbound poster: delivers rendered text to the social net, with optional
//! quote-post and reply-thread linkage.

use commitcast_core::PipelineError;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PostError {
    /// Write scope missing; the user must re-grant with posting permission.
    #[error("app lacks write permission — re-authorize with posting scope")]
    PermissionsInsufficient,

    #[error("access token rejected")]
    AuthFailed,

    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The provider refused the text or linkage.
    #[error("post rejected: {0}")]
    Invalid(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<PostError> for PipelineError {
    fn from(e: PostError) -> Self {
        match e {
            PostError::PermissionsInsufficient => {
                PipelineError::PermissionsInsufficient(e.to_string())
            }
            // A rejected token at post time means the credential is dead.
            PostError::AuthFailed => PipelineError::ReauthRequired(e.to_string()),
            PostError::RateLimited(msg) => PipelineError::RateLimited(msg),
            PostError::Invalid(msg) => PipelineError::Validation(msg),
            PostError::Transport(msg) => PipelineError::Transient(msg),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    data: PostData,
}

#[derive(Debug, Deserialize)]
struct PostData {
    id: String,
}

#[derive(Clone)]
pub struct Poster {
    client: reqwest::Client,
    api_base: String,
}

impl Poster {
    pub fn new(client: reqwest::Client, api_base: String) -> Self {
        Self { client, api_base }
    }

    /// Publish `text`; returns the external post id.
    pub async fn post(
        &self,
        access_token: &str,
        text: &str,
        quote_post_id: Option<&str>,
        reply_to_post_id: Option<&str>,
    ) -> Result<String, PostError> {
        let mut body = json!({ "text": text });
        if let Some(quote) = quote_post_id {
            body["quote_tweet_id"] = json!(quote);
        }
        if let Some(reply) = reply_to_post_id {
            body["reply"] = json!({ "in_reply_to_tweet_id": reply });
        }

        let response = self
            .client
            .post(format!("{}/2/tweets", self.api_base))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PostError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            let parsed: PostResponse = response
                .json()
                .await
                .map_err(|e| PostError::Transport(format!("post response parse: {e}")))?;
            return Ok(parsed.data.id);
        }

        let detail = response
            .text()
            .await
            .unwrap_or_default()
            .chars()
            .take(300)
            .collect::<String>();

        Err(match status.as_u16() {
            401 => PostError::AuthFailed,
            403 => PostError::PermissionsInsufficient,
            429 => PostError::RateLimited(format!("{status}: {detail}")),
            400 | 422 => PostError::Invalid(format!("{status}: {detail}")),
            _ => PostError::Transport(format!("{status}: {detail}")),
        })
    }
}
