//! Push-event payload types as delivered by the code-host webhook.

use serde::{Deserialize, Serialize};

/// Repository metadata carried in a push event.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RepoInfo {
    pub name: String,
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub html_url: Option<String>,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PushAuthor {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// A single commit within a push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushCommit {
    pub id: String,
    pub message: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: PushAuthor,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Pusher {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Sender {
    #[serde(default)]
    pub login: String,
}

/// The push webhook body, reduced to the fields the pipeline consults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository: RepoInfo,
    #[serde(default)]
    pub pusher: Pusher,
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub commits: Vec<PushCommit>,
    #[serde(default)]
    pub sender: Sender,
}

impl PushEvent {
    /// Branch name extracted from the `refs/heads/...` ref, if any.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

const MERGE_PREFIXES: [&str; 2] = ["Merge branch", "Merge pull request"];

/// True when the commit message identifies a merge commit.
///
/// Catches the standard `Merge branch ...` / `Merge pull request ...`
/// subjects plus the `Merge[d] <x> into <y>` phrasing some hosts generate.
pub fn is_merge_commit(message: &str) -> bool {
    let subject = message.lines().next().unwrap_or("").trim();
    if MERGE_PREFIXES.iter().any(|p| subject.starts_with(p)) {
        return true;
    }
    (subject.starts_with("Merge ") || subject.starts_with("Merged "))
        && subject.contains(" into ")
}

const ASSET_EXTENSIONS: [&str; 14] = [
    "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "woff", "woff2", "ttf", "eot", "mp4",
    "mp3", "pdf",
];

fn is_asset_path(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| ASSET_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Ceiling above which a commit is considered bulk churn and skips diff analysis.
pub const DIFF_ANALYSIS_MAX_FILES: usize = 50;

impl PushCommit {
    pub fn total_files_changed(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// All changed paths, in added/modified/removed order.
    pub fn changed_paths(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .chain(self.removed.iter())
            .map(String::as_str)
    }

    /// Diff analysis is skipped for asset-only commits and bulk churn.
    pub fn skips_diff_analysis(&self) -> bool {
        let total = self.total_files_changed();
        if total > DIFF_ANALYSIS_MAX_FILES {
            return true;
        }
        total > 0 && self.changed_paths().all(is_asset_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commit_with_files(added: &[&str], modified: &[&str]) -> PushCommit {
        PushCommit {
            id: "abc1234".into(),
            message: "test".into(),
            timestamp: None,
            url: None,
            author: PushAuthor::default(),
            added: added.iter().map(|s| s.to_string()).collect(),
            modified: modified.iter().map(|s| s.to_string()).collect(),
            removed: vec![],
        }
    }

    #[test]
    fn merge_commits_detected() {
        assert!(is_merge_commit("Merge branch 'main' into dev"));
        assert!(is_merge_commit("Merge pull request #5 from x/y"));
        assert!(is_merge_commit("Merge remote-tracking branch 'origin/dev' into main"));
        assert!(is_merge_commit("Merged feature into main"));
        assert!(!is_merge_commit("fix: merge sorted runs correctly"));
        assert!(!is_merge_commit("feat: add merge button"));
    }

    #[test]
    fn branch_from_ref() {
        let event = PushEvent {
            repository: RepoInfo::default(),
            pusher: Pusher::default(),
            git_ref: "refs/heads/feature/login".into(),
            commits: vec![],
            sender: Sender::default(),
        };
        assert_eq!(event.branch(), "feature/login");
    }

    #[test]
    fn asset_only_commit_skips_analysis() {
        let c = commit_with_files(&["logo.PNG", "hero.webp"], &["favicon.ico"]);
        assert!(c.skips_diff_analysis());
    }

    #[test]
    fn mixed_commit_does_not_skip() {
        let c = commit_with_files(&["logo.png"], &["src/main.rs"]);
        assert!(!c.skips_diff_analysis());
    }

    #[test]
    fn video_container_is_not_an_asset_extension() {
        // Only the fixed extension set skips analysis; webm is not in it.
        let c = commit_with_files(&["clips/intro.webm"], &[]);
        assert!(!c.skips_diff_analysis());
    }

    #[test]
    fn bulk_churn_skips_analysis() {
        let paths: Vec<String> = (0..51).map(|i| format!("src/file_{i}.rs")).collect();
        let c = PushCommit {
            added: paths,
            ..commit_with_files(&[], &[])
        };
        assert!(c.skips_diff_analysis());
    }

    #[test]
    fn empty_commit_does_not_skip() {
        let c = commit_with_files(&[], &[]);
        assert!(!c.skips_diff_analysis());
    }
}
