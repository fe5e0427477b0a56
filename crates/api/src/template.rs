//! Post template engine.
//!
//! A tenant template is a JSON envelope `{"template": ..., "prompt": ...}`:
//! the template is literal post text with `{{VAR}}` placeholders and may
//! contain the special `{{AI_TEXT}}` token; the prompt instructs the AI stage
//! on how to fill that token. Older rows stored a bare prompt string — those
//! are read as `{template: "", prompt: <string>}` and behave like the default
//! path with a custom prompt.

use commitcast_core::{CommitData, RepoInfo};
use serde::{Deserialize, Serialize};

/// The sentinel filled in by the AI stage at finalize time.
pub const AI_TEXT_TOKEN: &str = "{{AI_TEXT}}";

/// Complete variable catalogue, excluding the `AI_TEXT` sentinel.
pub const VARIABLES: [&str; 14] = [
    "COMMIT_MESSAGE",
    "COMMIT_TYPE",
    "COMMIT_SHA",
    "REPOSITORY",
    "REPOSITORY_FULL",
    "REPOSITORY_URL",
    "FILES_CHANGED",
    "ADDED_FILES",
    "MODIFIED_FILES",
    "REMOVED_FILES",
    "AUTHOR",
    "BRANCH",
    "PROJECT_CONTEXT",
    "DIFF_ANALYSIS",
];

/// Prompt used when a tenant has no active template (or an empty one).
pub const DEFAULT_PROMPT: &str = "\
Write a single short changelog-style post (at most 280 characters) announcing \
this commit to the repository {{REPOSITORY}}. Base it only on the commit \
message and this change summary:\n\n{{DIFF_ANALYSIS}}\n\nCommit message: \
{{COMMIT_MESSAGE}}\n\nPlain text only. No emojis, no hashtags, no preamble.";

/// Stored envelope form of a tenant template.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TemplateEnvelope {
    #[serde(default)]
    pub template: String,
    #[serde(default)]
    pub prompt: String,
}

impl TemplateEnvelope {
    /// Parse a stored row. Bare strings are legacy prompt-only rows.
    pub fn parse(stored: &str) -> Self {
        match serde_json::from_str::<serde_json::Value>(stored) {
            Ok(serde_json::Value::Object(_)) => {
                serde_json::from_str(stored).unwrap_or_default()
            }
            Ok(serde_json::Value::String(prompt)) => Self {
                template: String::new(),
                prompt,
            },
            _ => Self {
                template: String::new(),
                prompt: stored.to_string(),
            },
        }
    }
}

/// Output of [`process`]: what to render and whether the AI stage is needed.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderPlan {
    pub needs_ai: bool,
    /// Template with all variables except `AI_TEXT` applied. Absent on the
    /// default path, where the AI output is the whole post.
    pub template: Option<String>,
    /// Prompt with variables applied; what the AI stage receives.
    pub prompt: String,
    pub is_default: bool,
}

/// Build the substitution map for one commit.
pub fn variables(
    commit: &CommitData,
    repo: &RepoInfo,
    project_context: &str,
    diff_analysis: &str,
) -> Vec<(&'static str, String)> {
    vec![
        ("COMMIT_MESSAGE", commit.message.clone()),
        ("COMMIT_TYPE", commit.kind().as_str().to_string()),
        ("COMMIT_SHA", commit.short_sha().to_string()),
        ("REPOSITORY", repo.name.clone()),
        ("REPOSITORY_FULL", repo.full_name.clone()),
        (
            "REPOSITORY_URL",
            repo.html_url.clone().unwrap_or_default(),
        ),
        ("FILES_CHANGED", commit.total_files_changed().to_string()),
        ("ADDED_FILES", commit.added.join(", ")),
        ("MODIFIED_FILES", commit.modified.join(", ")),
        ("REMOVED_FILES", commit.removed.join(", ")),
        ("AUTHOR", commit.author.clone()),
        ("BRANCH", commit.branch.clone()),
        ("PROJECT_CONTEXT", project_context.to_string()),
        ("DIFF_ANALYSIS", diff_analysis.to_string()),
    ]
}

/// Substitute `{{VAR}}` placeholders. The `AI_TEXT` sentinel is left intact.
pub fn apply_variables(text: &str, vars: &[(&'static str, String)]) -> String {
    let mut out = text.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{{{name}}}}}"), value);
    }
    out
}

/// Turn the tenant's stored template (if any) into a render plan.
///
/// Returns the plan plus any validation warnings worth logging.
pub fn process(
    stored: Option<&str>,
    vars: &[(&'static str, String)],
) -> (RenderPlan, Vec<String>) {
    let Some(stored) = stored else {
        return (default_plan(vars), Vec::new());
    };

    let envelope = TemplateEnvelope::parse(stored);
    if envelope.template.trim().is_empty() {
        // Legacy prompt-only row: default path with a custom prompt.
        let prompt = if envelope.prompt.trim().is_empty() {
            DEFAULT_PROMPT.to_string()
        } else {
            envelope.prompt
        };
        let plan = RenderPlan {
            needs_ai: true,
            template: None,
            prompt: apply_variables(&prompt, vars),
            is_default: true,
        };
        return (plan, Vec::new());
    }

    let needs_ai = envelope.template.contains(AI_TEXT_TOKEN);
    let mut warnings = Vec::new();
    let mut prompt = envelope.prompt;

    if !needs_ai && !prompt.trim().is_empty() {
        warnings.push("template has a prompt but no {{AI_TEXT}} token; prompt ignored".into());
    }
    if needs_ai && prompt.trim().is_empty() {
        warnings.push("template uses {{AI_TEXT}} but prompt is empty; using default prompt".into());
        prompt = DEFAULT_PROMPT.to_string();
    }

    let plan = RenderPlan {
        needs_ai,
        template: Some(apply_variables(&envelope.template, vars)),
        prompt: apply_variables(&prompt, vars),
        is_default: false,
    };
    (plan, warnings)
}

fn default_plan(vars: &[(&'static str, String)]) -> RenderPlan {
    RenderPlan {
        needs_ai: true,
        template: None,
        prompt: apply_variables(DEFAULT_PROMPT, vars),
        is_default: true,
    }
}

/// Produce the final post text from a plan and the AI output, if any.
pub fn finalize(plan: &RenderPlan, ai_text: Option<&str>) -> String {
    if plan.is_default {
        return ai_text.unwrap_or_default().to_string();
    }
    let template = plan.template.as_deref().unwrap_or_default();
    if plan.needs_ai {
        return template.replace(AI_TEXT_TOKEN, ai_text.unwrap_or_default());
    }
    template.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vars() -> Vec<(&'static str, String)> {
        let commit = CommitData {
            sha: "abc1234def".into(),
            message: "fix: null check".into(),
            author: "dev".into(),
            branch: "main".into(),
            url: None,
            added: vec!["src/new.rs".into()],
            modified: vec!["src/lib.rs".into()],
            removed: vec![],
        };
        let repo = RepoInfo {
            name: "widget".into(),
            full_name: "acme/widget".into(),
            html_url: Some("https://host/acme/widget".into()),
            ..RepoInfo::default()
        };
        variables(&commit, &repo, "Rust CLI tool", "- fixed a null check")
    }

    #[test]
    fn no_template_uses_default_prompt() {
        let (plan, warnings) = process(None, &sample_vars());
        assert!(plan.is_default);
        assert!(plan.needs_ai);
        assert!(plan.template.is_none());
        assert!(plan.prompt.contains("fix: null check"));
        assert!(plan.prompt.contains("- fixed a null check"));
        assert!(warnings.is_empty());
    }

    #[test]
    fn envelope_with_ai_token() {
        let stored = r#"{"template":"{{REPOSITORY}} {{COMMIT_SHA}}: {{AI_TEXT}}","prompt":"Summarize {{COMMIT_MESSAGE}}"}"#;
        let (plan, warnings) = process(Some(stored), &sample_vars());
        assert!(plan.needs_ai);
        assert!(!plan.is_default);
        assert_eq!(plan.template.as_deref(), Some("widget abc1234: {{AI_TEXT}}"));
        assert_eq!(plan.prompt, "Summarize fix: null check");
        assert!(warnings.is_empty());

        let text = finalize(&plan, Some("tightened the null path"));
        assert_eq!(text, "widget abc1234: tightened the null path");
    }

    #[test]
    fn static_template_warns_on_unused_prompt() {
        let stored = r#"{"template":"pushed {{COMMIT_SHA}} to {{BRANCH}}","prompt":"never used"}"#;
        let (plan, warnings) = process(Some(stored), &sample_vars());
        assert!(!plan.needs_ai);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("prompt ignored"));
        assert_eq!(finalize(&plan, None), "pushed abc1234 to main");
    }

    #[test]
    fn ai_token_with_empty_prompt_falls_back() {
        let stored = r#"{"template":"{{AI_TEXT}}","prompt":""}"#;
        let (plan, warnings) = process(Some(stored), &sample_vars());
        assert!(plan.needs_ai);
        assert_eq!(warnings.len(), 1);
        assert!(plan.prompt.contains("changelog-style post"));
    }

    #[test]
    fn legacy_bare_string_is_prompt_only() {
        let (plan, _) = process(Some("describe this commit briefly"), &sample_vars());
        assert!(plan.is_default);
        assert!(plan.needs_ai);
        assert_eq!(plan.prompt, "describe this commit briefly");
        assert_eq!(finalize(&plan, Some("done")), "done");
    }

    #[test]
    fn process_then_finalize_is_deterministic() {
        let stored = r#"{"template":"{{REPOSITORY_FULL}}: {{AI_TEXT}}","prompt":"p"}"#;
        let vars = sample_vars();
        let (plan_a, _) = process(Some(stored), &vars);
        let (plan_b, _) = process(Some(stored), &vars);
        assert_eq!(plan_a, plan_b);
        assert_eq!(finalize(&plan_a, Some("x")), finalize(&plan_b, Some("x")));
    }

    #[test]
    fn finalize_default_returns_ai_text_verbatim() {
        let (plan, _) = process(None, &sample_vars());
        assert_eq!(finalize(&plan, Some("exact output")), "exact output");
        assert_eq!(finalize(&plan, None), "");
    }
}
