//! Durable queue item model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of work a queue item represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    DiffAnalysis,
    ChangelogRender,
    PostDispatch,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DiffAnalysis => "diff_analysis",
            Self::ChangelogRender => "changelog_render",
            Self::PostDispatch => "post_dispatch",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "diff_analysis" => Some(Self::DiffAnalysis),
            "changelog_render" => Some(Self::ChangelogRender),
            "post_dispatch" => Some(Self::PostDispatch),
            _ => None,
        }
    }
}

/// Lifecycle state of a queue item.
///
/// `pending → processing → completed | failed`, or
/// `pending → processing → retrying → pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Retrying,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "retrying" => Some(Self::Retrying),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Dispatch priorities. Lower value dispatches first.
pub mod priority {
    pub const HIGH: i64 = 1;
    pub const NORMAL: i64 = 5;
    pub const LOW: i64 = 9;
}

/// A durable record of pending work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub kind: TaskKind,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub priority: i64,
    pub status: TaskStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl QueueItem {
    pub fn new(id: String, kind: TaskKind, tenant_id: String, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            tenant_id,
            payload,
            priority: priority::NORMAL,
            status: TaskStatus::Pending,
            retry_count: 0,
            created_at: now,
            updated_at: now,
            last_error: None,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }
}
