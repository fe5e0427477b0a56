//! Posted-commit ledger and OG post query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::{OgPosts, PostedCommits};
use super::Built;

/// Record a posted commit. INSERT OR IGNORE keeps the first row on
/// concurrent redelivery; the ledger is append-only.
pub fn record_posted(commit_sha: &str, repo_full_name: &str, post_id: &str) -> Built {
    let sql = concat!(
        "INSERT OR IGNORE INTO \"posted_commits\" ",
        "(\"commit_sha\", \"repo_full_name\", \"post_id\") VALUES (?, ?, ?)",
    )
    .to_string();
    let values = sea_query::Values(vec![
        commit_sha.into(),
        repo_full_name.into(),
        post_id.into(),
    ]);
    (sql, values)
}

pub fn get_posted(commit_sha: &str) -> Built {
    Query::select()
        .columns([
            PostedCommits::CommitSha,
            PostedCommits::RepoFullName,
            PostedCommits::PostId,
            PostedCommits::CreatedAt,
        ])
        .from(PostedCommits::Table)
        .and_where(Expr::col(PostedCommits::CommitSha).eq(commit_sha))
        .build(SqliteQueryBuilder)
}

/// Most recent post for a repo, used for reply-thread linkage.
pub fn latest_for_repo(repo_full_name: &str) -> Built {
    Query::select()
        .columns([PostedCommits::PostId])
        .from(PostedCommits::Table)
        .and_where(Expr::col(PostedCommits::RepoFullName).eq(repo_full_name))
        .order_by(PostedCommits::CreatedAt, sea_query::Order::Desc)
        .limit(1)
        .build(SqliteQueryBuilder)
}

/// Set the OG post for a repo. Idempotent overwrite.
pub fn set_og_post(repo_full_name: &str, post_id: &str) -> Built {
    let sql = concat!(
        "INSERT INTO \"og_posts\" (\"repo_full_name\", \"post_id\", \"updated_at\") ",
        "VALUES (?, ?, datetime('now')) ",
        "ON CONFLICT (\"repo_full_name\") DO UPDATE SET ",
        "\"post_id\" = excluded.\"post_id\", ",
        "\"updated_at\" = excluded.\"updated_at\"",
    )
    .to_string();
    let values = sea_query::Values(vec![repo_full_name.into(), post_id.into()]);
    (sql, values)
}

pub fn get_og_post(repo_full_name: &str) -> Built {
    Query::select()
        .columns([OgPosts::PostId])
        .from(OgPosts::Table)
        .and_where(Expr::col(OgPosts::RepoFullName).eq(repo_full_name))
        .build(SqliteQueryBuilder)
}
