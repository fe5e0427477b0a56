//! Repository enrollment query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::UserRepos;
use super::Built;

pub fn upsert(user_id: &str, repo_full_name: &str, enabled: bool) -> Built {
    let sql = concat!(
        "INSERT INTO \"user_repos\" (\"user_id\", \"repo_full_name\", \"enabled\") ",
        "VALUES (?, ?, ?) ",
        "ON CONFLICT (\"user_id\", \"repo_full_name\") DO UPDATE SET ",
        "\"enabled\" = excluded.\"enabled\"",
    )
    .to_string();
    let values = sea_query::Values(vec![
        user_id.into(),
        repo_full_name.into(),
        (enabled as i64).into(),
    ]);
    (sql, values)
}

pub fn set_enabled(user_id: &str, repo_full_name: &str, enabled: bool) -> Built {
    Query::update()
        .table(UserRepos::Table)
        .values([(UserRepos::Enabled, (enabled as i64).into())])
        .and_where(Expr::col(UserRepos::UserId).eq(user_id))
        .and_where(Expr::col(UserRepos::RepoFullName).eq(repo_full_name))
        .build(SqliteQueryBuilder)
}

pub fn set_secret(user_id: &str, repo_full_name: &str, secret: Option<&str>) -> Built {
    Query::update()
        .table(UserRepos::Table)
        .values([(
            UserRepos::WebhookSecret,
            secret.map(|s| s.to_string()).into(),
        )])
        .and_where(Expr::col(UserRepos::UserId).eq(user_id))
        .and_where(Expr::col(UserRepos::RepoFullName).eq(repo_full_name))
        .build(SqliteQueryBuilder)
}

/// Enrollment row for a repo regardless of owner. One owner per repo is the
/// operational norm; the earliest enrollment wins on conflict.
pub fn get_by_repo(repo_full_name: &str) -> Built {
    Query::select()
        .columns([
            UserRepos::UserId,
            UserRepos::RepoFullName,
            UserRepos::Enabled,
            UserRepos::WebhookSecret,
            UserRepos::CreatedAt,
        ])
        .from(UserRepos::Table)
        .and_where(Expr::col(UserRepos::RepoFullName).eq(repo_full_name))
        .order_by(UserRepos::CreatedAt, sea_query::Order::Asc)
        .limit(1)
        .build(SqliteQueryBuilder)
}

pub fn list_for_user(user_id: &str) -> Built {
    Query::select()
        .columns([
            UserRepos::UserId,
            UserRepos::RepoFullName,
            UserRepos::Enabled,
            UserRepos::WebhookSecret,
            UserRepos::CreatedAt,
        ])
        .from(UserRepos::Table)
        .and_where(Expr::col(UserRepos::UserId).eq(user_id))
        .order_by(UserRepos::RepoFullName, sea_query::Order::Asc)
        .build(SqliteQueryBuilder)
}
