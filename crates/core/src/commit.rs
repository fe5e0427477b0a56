//! Commit data as it travels through queue payloads, plus conventional-commit
//! kind inference used by templates and the file-summary fallback.

use serde::{Deserialize, Serialize};

use crate::push::{PushCommit, PushEvent};

/// Everything the pipeline needs to know about one commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: String,
    pub message: String,
    pub author: String,
    pub branch: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl CommitData {
    pub fn from_push(event: &PushEvent, commit: &PushCommit) -> Self {
        Self {
            sha: commit.id.clone(),
            message: commit.message.clone(),
            author: commit.author.name.clone(),
            branch: event.branch().to_string(),
            url: commit.url.clone(),
            added: commit.added.clone(),
            modified: commit.modified.clone(),
            removed: commit.removed.clone(),
        }
    }

    /// First line of the commit message.
    pub fn subject(&self) -> &str {
        self.message.lines().next().unwrap_or("").trim()
    }

    pub fn short_sha(&self) -> &str {
        &self.sha[..self.sha.len().min(7)]
    }

    pub fn kind(&self) -> CommitKind {
        CommitKind::infer(&self.message)
    }

    pub fn total_files_changed(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }
}

/// Conventional-commit category inferred from the message subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitKind {
    Feature,
    Fix,
    Docs,
    Style,
    Refactor,
    Test,
    Chore,
    Other,
}

impl CommitKind {
    pub fn infer(message: &str) -> Self {
        let subject = message.lines().next().unwrap_or("").trim().to_lowercase();
        let prefix = subject
            .split_once([':', '(', '!'])
            .map(|(p, _)| p)
            .unwrap_or(&subject);

        match prefix.trim() {
            "feat" | "feature" => Self::Feature,
            "fix" | "bugfix" | "hotfix" => Self::Fix,
            "docs" | "doc" => Self::Docs,
            "style" => Self::Style,
            "refactor" => Self::Refactor,
            "test" | "tests" => Self::Test,
            "chore" | "build" | "ci" | "deps" => Self::Chore,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Feature => "feature",
            Self::Fix => "fix",
            Self::Docs => "docs",
            Self::Style => "style",
            Self::Refactor => "refactor",
            Self::Test => "test",
            Self::Chore => "chore",
            Self::Other => "update",
        }
    }
}
