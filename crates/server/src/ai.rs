//! AI transformer client: diff analysis (Stage A) and changelog rendering
//! (Stage B), plus the post-processing applied to default-template output.

use commitcast_core::PipelineError;
use serde::Deserialize;
use serde_json::json;

/// Hard bound enforced on default-template posts.
pub const POST_MAX_CHARS: usize = 280;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Clone)]
pub struct AiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl AiClient {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        model: String,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            model,
        }
    }

    pub fn enabled(&self) -> bool {
        self.api_key.is_some()
    }

    async fn chat(&self, prompt: &str, max_tokens: u32) -> Result<String, PipelineError> {
        let Some(api_key) = &self.api_key else {
            return Err(PipelineError::Internal("AI stage disabled".into()));
        };

        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("ai call: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(PipelineError::RateLimited(format!("ai call: {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::Transient(format!("ai call: {status}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("ai response parse: {e}")))?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            return Err(PipelineError::Transient("ai returned empty completion".into()));
        }
        Ok(text)
    }

    /// Stage A: summarize a truncated diff into 2-4 bullet lines.
    pub async fn analyze_diff(
        &self,
        diff: &str,
        commit_message: &str,
        repo_name: &str,
    ) -> Result<String, PipelineError> {
        let prompt = format!(
            "Summarize this commit to the repository {repo_name} in 2-4 short \
             bullet lines (each starting with \"- \"). Describe only changes \
             visible in the diff. No preamble.\n\nCommit message: \
             {commit_message}\n\nDiff:\n{diff}"
        );
        self.chat(&prompt, 300).await
    }

    /// Stage B: render the post body from the prepared prompt.
    pub async fn render_post(&self, prompt: &str) -> Result<String, PipelineError> {
        self.chat(prompt, 200).await
    }
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F000..=0x1FAFF   // pictographs, emoticons, transport, flags
            | 0x2600..=0x27BF  // misc symbols, dingbats
            | 0x2B00..=0x2BFF
            | 0xFE00..=0xFE0F  // variation selectors
            | 0x200D           // zero-width joiner
    )
}

pub fn strip_emoji(text: &str) -> String {
    text.chars().filter(|c| !is_emoji(*c)).collect()
}

pub fn strip_hashtags(text: &str) -> String {
    text.split_whitespace()
        .filter(|word| !(word.starts_with('#') && word.len() > 1))
        .collect::<Vec<_>>()
        .join(" ")
}

fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

/// Constraints for default-template output only: no emoji, no hashtags,
/// at most 280 characters, commit subject when nothing is left.
pub fn postprocess_default(text: &str, commit_subject: &str) -> String {
    let cleaned = strip_hashtags(&strip_emoji(text));
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return cap_chars(commit_subject, POST_MAX_CHARS);
    }
    cap_chars(cleaned, POST_MAX_CHARS)
}
