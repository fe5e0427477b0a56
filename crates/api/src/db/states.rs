//! OAuth state / PKCE verifier query builders.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::OauthStates;
use super::Built;

pub fn insert(
    state: &str,
    provider: &str,
    subject: Option<&str>,
    code_verifier: Option<&str>,
    expires_at: &str,
) -> Built {
    Query::insert()
        .into_table(OauthStates::Table)
        .columns([
            OauthStates::State,
            OauthStates::Provider,
            OauthStates::Subject,
            OauthStates::CodeVerifier,
            OauthStates::ExpiresAt,
        ])
        .values_panic([
            state.into(),
            provider.into(),
            subject.map(|s| s.to_string()).into(),
            code_verifier.map(|s| s.to_string()).into(),
            expires_at.into(),
        ])
        .build(SqliteQueryBuilder)
}

pub fn get(state: &str) -> Built {
    Query::select()
        .columns([
            OauthStates::State,
            OauthStates::Provider,
            OauthStates::Subject,
            OauthStates::CodeVerifier,
            OauthStates::ExpiresAt,
        ])
        .from(OauthStates::Table)
        .and_where(Expr::col(OauthStates::State).eq(state))
        .build(SqliteQueryBuilder)
}

pub fn delete(state: &str) -> Built {
    Query::delete()
        .from_table(OauthStates::Table)
        .and_where(Expr::col(OauthStates::State).eq(state))
        .build(SqliteQueryBuilder)
}

/// Sweep abandoned flows. Run opportunistically on each insert.
pub fn delete_expired(now: &str) -> Built {
    Query::delete()
        .from_table(OauthStates::Table)
        .and_where(Expr::col(OauthStates::ExpiresAt).lt(now))
        .build(SqliteQueryBuilder)
}
