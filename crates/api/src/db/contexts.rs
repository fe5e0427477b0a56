//! Cached repository context query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::RepoContexts;
use super::Built;

pub fn upsert(
    repo_full_name: &str,
    languages: &str,
    frameworks: &str,
    key_directories: &str,
    readme_summary: &str,
) -> Built {
    let sql = concat!(
        "INSERT INTO \"repo_contexts\" ",
        "(\"repo_full_name\", \"languages\", \"frameworks\", \"key_directories\", ",
        "\"readme_summary\", \"updated_at\") ",
        "VALUES (?, ?, ?, ?, ?, datetime('now')) ",
        "ON CONFLICT (\"repo_full_name\") DO UPDATE SET ",
        "\"languages\" = excluded.\"languages\", ",
        "\"frameworks\" = excluded.\"frameworks\", ",
        "\"key_directories\" = excluded.\"key_directories\", ",
        "\"readme_summary\" = excluded.\"readme_summary\", ",
        "\"updated_at\" = excluded.\"updated_at\"",
    )
    .to_string();
    let values = sea_query::Values(vec![
        repo_full_name.into(),
        languages.into(),
        frameworks.into(),
        key_directories.into(),
        readme_summary.into(),
    ]);
    (sql, values)
}

pub fn get(repo_full_name: &str) -> Built {
    Query::select()
        .columns([
            RepoContexts::RepoFullName,
            RepoContexts::Languages,
            RepoContexts::Frameworks,
            RepoContexts::KeyDirectories,
            RepoContexts::ReadmeSummary,
            RepoContexts::UpdatedAt,
        ])
        .from(RepoContexts::Table)
        .and_where(Expr::col(RepoContexts::RepoFullName).eq(repo_full_name))
        .build(SqliteQueryBuilder)
}
