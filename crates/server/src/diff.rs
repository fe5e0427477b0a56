//! Commit diff fetcher (code-host API).
//!
//! Bearer auth when a code-host credential exists for the tenant, anonymous
//! otherwise. The patch text is truncated hard: at most 10 files, at most
//! 4000 characters total.

use commitcast_core::PipelineError;
use serde::Deserialize;

pub const MAX_DIFF_FILES: usize = 10;
pub const MAX_DIFF_CHARS: usize = 4000;

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    files: Vec<CommitFile>,
}

#[derive(Debug, Deserialize)]
struct CommitFile {
    filename: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    patch: Option<String>,
}

#[derive(Clone)]
pub struct DiffFetcher {
    client: reqwest::Client,
    api_base: String,
}

impl DiffFetcher {
    pub fn new(client: reqwest::Client, api_base: String) -> Self {
        Self { client, api_base }
    }

    /// Fetch the per-file patch hunks for one commit, truncated.
    pub async fn fetch(
        &self,
        repo_full_name: &str,
        sha: &str,
        bearer: Option<&str>,
    ) -> Result<String, PipelineError> {
        let url = format!("{}/repos/{repo_full_name}/commits/{sha}", self.api_base);
        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "commitcast");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::Transient(format!("diff fetch: {e}")))?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(PipelineError::NotFound(format!("{repo_full_name}@{sha}")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(PipelineError::RateLimited(format!("diff fetch: {status}")));
        }
        if !status.is_success() {
            return Err(PipelineError::Transient(format!("diff fetch: {status}")));
        }

        let commit: CommitResponse = response
            .json()
            .await
            .map_err(|e| PipelineError::Transient(format!("diff parse: {e}")))?;

        Ok(truncate_patches(&commit.files))
    }
}

fn truncate_patches(files: &[CommitFile]) -> String {
    let mut out = String::new();
    for file in files.iter().take(MAX_DIFF_FILES) {
        if out.len() >= MAX_DIFF_CHARS {
            break;
        }
        let status = file.status.as_deref().unwrap_or("modified");
        out.push_str(&format!("--- {} ({status})\n", file.filename));
        if let Some(patch) = &file.patch {
            let remaining = MAX_DIFF_CHARS.saturating_sub(out.len());
            if patch.len() > remaining {
                let cut: String = patch.chars().take(remaining).collect();
                out.push_str(&cut);
                out.push_str("\n[truncated]\n");
                break;
            }
            out.push_str(patch);
            out.push('\n');
        }
    }
    out
}
