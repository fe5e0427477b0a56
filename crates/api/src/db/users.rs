//! Tenant (user) query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::Users;
use super::Built;

/// UPSERT a tenant on first (or repeated) code-host OAuth callback.
///
/// Tier and quota are administrative fields and are preserved on conflict.
pub fn upsert(
    id: &str,
    codehost_user_id: &str,
    login: &str,
    display_name: Option<&str>,
    email: Option<&str>,
) -> Built {
    let sql = concat!(
        "INSERT INTO \"users\" ",
        "(\"id\", \"codehost_user_id\", \"login\", \"display_name\", \"email\") ",
        "VALUES (?, ?, ?, ?, ?) ",
        "ON CONFLICT (\"codehost_user_id\") DO UPDATE SET ",
        "\"login\" = excluded.\"login\", ",
        "\"display_name\" = excluded.\"display_name\", ",
        "\"email\" = excluded.\"email\"",
    )
    .to_string();
    let values = sea_query::Values(vec![
        id.into(),
        codehost_user_id.into(),
        login.into(),
        display_name.map(|s| s.to_string()).into(),
        email.map(|s| s.to_string()).into(),
    ]);
    (sql, values)
}

pub fn get_by_id(id: &str) -> Built {
    Query::select()
        .columns([
            Users::Id,
            Users::CodehostUserId,
            Users::Login,
            Users::DisplayName,
            Users::Email,
            Users::Tier,
            Users::QuotaOverride,
        ])
        .from(Users::Table)
        .and_where(Expr::col(Users::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Administrative tier/quota update.
pub fn set_tier(id: &str, tier: &str, quota_override: Option<i64>) -> Built {
    Query::update()
        .table(Users::Table)
        .values([
            (Users::Tier, tier.into()),
            (Users::QuotaOverride, quota_override.into()),
        ])
        .and_where(Expr::col(Users::Id).eq(id))
        .build(SqliteQueryBuilder)
}
