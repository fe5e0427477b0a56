//! Prompt template query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::PromptTemplates;
use super::Built;

/// Body of the tenant's single active template, if any.
pub fn active_for_user(user_id: &str) -> Built {
    Query::select()
        .column(PromptTemplates::Body)
        .from(PromptTemplates::Table)
        .and_where(Expr::col(PromptTemplates::UserId).eq(user_id))
        .and_where(Expr::col(PromptTemplates::Active).eq(1))
        .limit(1)
        .build(SqliteQueryBuilder)
}

/// UPSERT a named template and mark it active.
pub fn upsert(user_id: &str, name: &str, body: &str, active: bool) -> Built {
    let sql = concat!(
        "INSERT INTO \"prompt_templates\" (\"user_id\", \"name\", \"body\", \"active\") ",
        "VALUES (?, ?, ?, ?) ",
        "ON CONFLICT (\"user_id\", \"name\") DO UPDATE SET ",
        "\"body\" = excluded.\"body\", ",
        "\"active\" = excluded.\"active\"",
    )
    .to_string();
    let values = sea_query::Values(vec![
        user_id.into(),
        name.into(),
        body.into(),
        (active as i64).into(),
    ]);
    (sql, values)
}

/// Clear the active flag on every template of a tenant. Run before marking a
/// new one active so at most one stays active.
pub fn deactivate_all(user_id: &str) -> Built {
    Query::update()
        .table(PromptTemplates::Table)
        .values([(PromptTemplates::Active, 0.into())])
        .and_where(Expr::col(PromptTemplates::UserId).eq(user_id))
        .build(SqliteQueryBuilder)
}
