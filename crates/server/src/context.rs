//! Repository context builder.
//!
//! Produces the cached structural summary substituted as
//! `{{PROJECT_CONTEXT}}`: languages, inferred frameworks, key directories,
//! and a README excerpt. Cached in the store with a 24-hour TTL.

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::Deserialize;

use crate::storage::{Db, RepoContextRow};

pub const CONTEXT_TTL_HOURS: i64 = 24;

const README_EXCERPT_CHARS: usize = 300;

/// Marker files at the repo root and the framework they indicate.
const FRAMEWORK_MARKERS: [(&str, &str); 9] = [
    ("Cargo.toml", "rust"),
    ("package.json", "node"),
    ("next.config.js", "next.js"),
    ("go.mod", "go"),
    ("pyproject.toml", "python"),
    ("requirements.txt", "python"),
    ("Gemfile", "rails"),
    ("pom.xml", "maven"),
    ("Dockerfile", "docker"),
];

#[derive(Debug, Deserialize)]
struct ContentEntry {
    name: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct ReadmeResponse {
    #[serde(default)]
    content: String,
}

#[derive(Clone)]
pub struct ContextBuilder {
    client: reqwest::Client,
    api_base: String,
}

fn is_fresh(ctx: &RepoContextRow) -> bool {
    ctx.updated_at
        .map(|at| Utc::now() - at < chrono::Duration::hours(CONTEXT_TTL_HOURS))
        .unwrap_or(false)
}

fn frameworks_from_entries(entries: &[ContentEntry]) -> Vec<String> {
    let mut found = Vec::new();
    for (marker, framework) in FRAMEWORK_MARKERS {
        if entries.iter().any(|e| e.kind == "file" && e.name == marker)
            && !found.iter().any(|f| f == framework)
        {
            found.push(framework.to_string());
        }
    }
    found
}

fn directories_from_entries(entries: &[ContentEntry]) -> Vec<String> {
    entries
        .iter()
        .filter(|e| e.kind == "dir" && !e.name.starts_with('.'))
        .take(8)
        .map(|e| e.name.clone())
        .collect()
}

/// First non-heading paragraph of the README, capped.
fn summarize_readme(raw: &str) -> String {
    let paragraph = raw
        .split("\n\n")
        .map(str::trim)
        .find(|p| !p.is_empty() && !p.starts_with('#') && !p.starts_with("!["))
        .unwrap_or("");
    let flat = paragraph.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > README_EXCERPT_CHARS {
        flat.chars().take(README_EXCERPT_CHARS).collect()
    } else {
        flat
    }
}

/// Render a context row into the `{{PROJECT_CONTEXT}}` variable value.
pub fn render(ctx: &RepoContextRow) -> String {
    let mut parts = Vec::new();
    if !ctx.languages.is_empty() {
        parts.push(format!("Languages: {}", ctx.languages.join(", ")));
    }
    if !ctx.frameworks.is_empty() {
        parts.push(format!("Stack: {}", ctx.frameworks.join(", ")));
    }
    if !ctx.key_directories.is_empty() {
        parts.push(format!("Layout: {}", ctx.key_directories.join(", ")));
    }
    if !ctx.readme_summary.is_empty() {
        parts.push(format!("About: {}", ctx.readme_summary));
    }
    parts.join(". ")
}

impl ContextBuilder {
    pub fn new(client: reqwest::Client, api_base: String) -> Self {
        Self { client, api_base }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        bearer: Option<&str>,
    ) -> Option<T> {
        let mut request = self
            .client
            .get(format!("{}{path}", self.api_base))
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "commitcast");
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.json().await.ok()
    }

    async fn build(&self, repo_full_name: &str, bearer: Option<&str>) -> RepoContextRow {
        let languages: Vec<String> = self
            .get_json::<serde_json::Map<String, serde_json::Value>>(
                &format!("/repos/{repo_full_name}/languages"),
                bearer,
            )
            .await
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();

        let entries: Vec<ContentEntry> = self
            .get_json(&format!("/repos/{repo_full_name}/contents"), bearer)
            .await
            .unwrap_or_default();

        let readme_summary = match self
            .get_json::<ReadmeResponse>(&format!("/repos/{repo_full_name}/readme"), bearer)
            .await
        {
            Some(readme) => {
                // Content arrives base64 with embedded newlines.
                let compact: String = readme.content.split_whitespace().collect();
                STANDARD
                    .decode(compact)
                    .ok()
                    .and_then(|raw| String::from_utf8(raw).ok())
                    .map(|text| summarize_readme(&text))
                    .unwrap_or_default()
            }
            None => String::new(),
        };

        RepoContextRow {
            repo_full_name: repo_full_name.to_string(),
            frameworks: frameworks_from_entries(&entries),
            key_directories: directories_from_entries(&entries),
            languages,
            readme_summary,
            updated_at: Some(Utc::now()),
        }
    }

    /// Cached context when fresh, otherwise rebuild and re-cache.
    ///
    /// Build failures are non-fatal: the stale cache (or an empty context)
    /// is returned so the pipeline keeps moving.
    pub async fn ensure_fresh(
        &self,
        db: &Db,
        repo_full_name: &str,
        bearer: Option<&str>,
    ) -> RepoContextRow {
        let cached = db.get_context(repo_full_name).unwrap_or_else(|e| {
            tracing::warn!("context cache read: {e}");
            None
        });
        if let Some(ctx) = &cached {
            if is_fresh(ctx) {
                return ctx.clone();
            }
        }

        let built = self.build(repo_full_name, bearer).await;
        let empty = built.languages.is_empty()
            && built.frameworks.is_empty()
            && built.readme_summary.is_empty();
        if empty {
            // Probably unreachable or rate limited; keep whatever we had.
            if let Some(stale) = cached {
                return stale;
            }
        } else if let Err(e) = db.put_context(&built) {
            tracing::warn!("context cache write: {e}");
        }
        built
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: &str) -> ContentEntry {
        ContentEntry {
            name: name.into(),
            kind: kind.into(),
        }
    }

    #[test]
    fn frameworks_detected_from_markers() {
        let entries = vec![
            entry("Cargo.toml", "file"),
            entry("Dockerfile", "file"),
            entry("src", "dir"),
            entry("package.json", "dir"), // a directory is not a marker
        ];
        assert_eq!(frameworks_from_entries(&entries), ["rust", "docker"]);
    }

    #[test]
    fn hidden_directories_excluded() {
        let entries = vec![
            entry(".github", "dir"),
            entry("src", "dir"),
            entry("tests", "dir"),
            entry("README.md", "file"),
        ];
        assert_eq!(directories_from_entries(&entries), ["src", "tests"]);
    }

    #[test]
    fn readme_summary_skips_headings() {
        let raw = "# widget\n\n![badge](x)\n\nA small tool that does one thing.\n\n## Install";
        assert_eq!(summarize_readme(raw), "A small tool that does one thing.");
    }

    #[test]
    fn render_joins_present_parts() {
        let ctx = RepoContextRow {
            repo_full_name: "acme/widget".into(),
            languages: vec!["Rust".into()],
            frameworks: vec![],
            key_directories: vec!["src".into()],
            readme_summary: "A widget.".into(),
            updated_at: None,
        };
        assert_eq!(render(&ctx), "Languages: Rust. Layout: src. About: A widget.");
        assert_eq!(render(&RepoContextRow::default()), "");
    }

    #[tokio::test]
    async fn unreachable_host_builds_empty_context() {
        let builder = ContextBuilder::new(reqwest::Client::new(), "http://localhost:1".into());
        let ctx = builder.build("acme/widget", None).await;
        assert!(ctx.languages.is_empty());
        assert!(ctx.frameworks.is_empty());
        assert!(ctx.key_directories.is_empty());
        assert!(ctx.readme_summary.is_empty());
        assert!(ctx.updated_at.is_some());
    }

    #[test]
    fn staleness_threshold() {
        let mut ctx = RepoContextRow {
            updated_at: Some(Utc::now()),
            ..RepoContextRow::default()
        };
        assert!(is_fresh(&ctx));
        ctx.updated_at = Some(Utc::now() - chrono::Duration::hours(CONTEXT_TTL_HOURS + 1));
        assert!(!is_fresh(&ctx));
        ctx.updated_at = None;
        assert!(!is_fresh(&ctx));
    }
}
