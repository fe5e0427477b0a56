//! OAuth credential query builders, one table per provider.

use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::{CodehostTokens, OauthTokens};
use super::Built;

/// Which credential table a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenProvider {
    /// Code-host credentials, keyed by external code-host user id.
    Codehost,
    /// Social-net credentials, keyed by the tenant id.
    Socialnet,
}

impl TokenProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Codehost => "codehost",
            Self::Socialnet => "socialnet",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "codehost" => Some(Self::Codehost),
            "socialnet" => Some(Self::Socialnet),
            _ => None,
        }
    }

    fn table_name(&self) -> &'static str {
        match self {
            Self::Codehost => "codehost_tokens",
            Self::Socialnet => "oauth_tokens",
        }
    }
}

/// UPSERT token material. At most one row per (provider, subject).
pub fn upsert(
    provider: TokenProvider,
    subject: &str,
    access_token: &str,
    refresh_token: Option<&str>,
    expires_at: Option<&str>,
    scopes: Option<&str>,
) -> Built {
    let sql = format!(
        "INSERT INTO \"{table}\" \
         (\"subject\", \"access_token\", \"refresh_token\", \"expires_at\", \"scopes\", \"updated_at\") \
         VALUES (?, ?, ?, ?, ?, datetime('now')) \
         ON CONFLICT (\"subject\") DO UPDATE SET \
         \"access_token\" = excluded.\"access_token\", \
         \"refresh_token\" = excluded.\"refresh_token\", \
         \"expires_at\" = excluded.\"expires_at\", \
         \"scopes\" = excluded.\"scopes\", \
         \"updated_at\" = excluded.\"updated_at\"",
        table = provider.table_name(),
    );
    let values = sea_query::Values(vec![
        subject.into(),
        access_token.into(),
        refresh_token.map(|s| s.to_string()).into(),
        expires_at.map(|s| s.to_string()).into(),
        scopes.map(|s| s.to_string()).into(),
    ]);
    (sql, values)
}

pub fn get(provider: TokenProvider, subject: &str) -> Built {
    match provider {
        TokenProvider::Codehost => Query::select()
            .columns([
                CodehostTokens::Subject,
                CodehostTokens::AccessToken,
                CodehostTokens::RefreshToken,
                CodehostTokens::ExpiresAt,
                CodehostTokens::Scopes,
            ])
            .from(CodehostTokens::Table)
            .and_where(Expr::col(CodehostTokens::Subject).eq(subject))
            .build(SqliteQueryBuilder),
        TokenProvider::Socialnet => Query::select()
            .columns([
                OauthTokens::Subject,
                OauthTokens::AccessToken,
                OauthTokens::RefreshToken,
                OauthTokens::ExpiresAt,
                OauthTokens::Scopes,
            ])
            .from(OauthTokens::Table)
            .and_where(Expr::col(OauthTokens::Subject).eq(subject))
            .build(SqliteQueryBuilder),
    }
}

pub fn delete(provider: TokenProvider, subject: &str) -> Built {
    match provider {
        TokenProvider::Codehost => Query::delete()
            .from_table(CodehostTokens::Table)
            .and_where(Expr::col(CodehostTokens::Subject).eq(subject))
            .build(SqliteQueryBuilder),
        TokenProvider::Socialnet => Query::delete()
            .from_table(OauthTokens::Table)
            .and_where(Expr::col(OauthTokens::Subject).eq(subject))
            .build(SqliteQueryBuilder),
    }
}
