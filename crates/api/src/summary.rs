//! Deterministic file-based change summary.
//!
//! Substituted for the AI diff analysis when the diff is unavailable, the AI
//! rejects, or the commit is skipped (asset-only / bulk churn).

use commitcast_core::CommitData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileCategory {
    Components,
    Pages,
    Styles,
    Api,
    Config,
    Images,
    Tests,
    Other,
}

impl FileCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Components => "components",
            Self::Pages => "pages",
            Self::Styles => "styles",
            Self::Api => "api",
            Self::Config => "config",
            Self::Images => "images",
            Self::Tests => "tests",
            Self::Other => "files",
        }
    }
}

/// Infer the category of a changed path from its directory and extension.
pub fn categorize(path: &str) -> FileCategory {
    let lower = path.to_lowercase();
    let ext = lower.rsplit('.').next().unwrap_or("");

    if lower.contains("test") || lower.contains("spec") || lower.contains("__tests__") {
        return FileCategory::Tests;
    }
    if matches!(ext, "png" | "jpg" | "jpeg" | "gif" | "svg" | "ico" | "webp") {
        return FileCategory::Images;
    }
    if matches!(ext, "css" | "scss" | "sass" | "less") || lower.contains("/styles/") {
        return FileCategory::Styles;
    }
    if lower.contains("component") || lower.contains("/ui/") || lower.contains("widget") {
        return FileCategory::Components;
    }
    if lower.contains("/pages/") || lower.contains("/views/") || lower.contains("/routes/") {
        return FileCategory::Pages;
    }
    if lower.contains("/api/") || lower.contains("handler") || lower.contains("endpoint") {
        return FileCategory::Api;
    }
    if matches!(ext, "json" | "yaml" | "yml" | "toml" | "ini" | "env")
        || lower.contains("config")
        || lower.starts_with('.')
    {
        return FileCategory::Config;
    }
    FileCategory::Other
}

fn count_by_category<'a>(paths: impl Iterator<Item = &'a str>) -> Vec<(FileCategory, usize)> {
    // Stable category order for deterministic output.
    const ORDER: [FileCategory; 8] = [
        FileCategory::Components,
        FileCategory::Pages,
        FileCategory::Styles,
        FileCategory::Api,
        FileCategory::Config,
        FileCategory::Images,
        FileCategory::Tests,
        FileCategory::Other,
    ];
    let mut counts = [0usize; 8];
    for path in paths {
        let cat = categorize(path);
        let idx = ORDER.iter().position(|c| *c == cat).unwrap_or(7);
        counts[idx] += 1;
    }
    ORDER
        .into_iter()
        .zip(counts)
        .filter(|(_, n)| *n > 0)
        .collect()
}

fn describe(verb: &str, paths: &[String]) -> Option<String> {
    if paths.is_empty() {
        return None;
    }
    let parts: Vec<String> = count_by_category(paths.iter().map(String::as_str))
        .into_iter()
        .map(|(cat, n)| format!("{n} {}", cat.label()))
        .collect();
    Some(format!("- {verb} {}", parts.join(", ")))
}

/// Bullet-form summary of a commit derived purely from its file lists.
pub fn file_based_summary(commit: &CommitData) -> String {
    let lines: Vec<String> = [
        describe("added", &commit.added),
        describe("modified", &commit.modified),
        describe("removed", &commit.removed),
    ]
    .into_iter()
    .flatten()
    .collect();

    if lines.is_empty() {
        format!("- {}", commit.subject())
    } else {
        lines.join("\n")
    }
}
