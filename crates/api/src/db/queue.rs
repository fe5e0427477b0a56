//! Persistent queue item query builders.

use sea_query::{Alias, Asterisk, Expr, Func, Order, Query, SqliteQueryBuilder};

use super::tables::QueueItems;
use super::Built;

const ITEM_COLUMNS: [QueueItems; 10] = [
    QueueItems::Id,
    QueueItems::Kind,
    QueueItems::UserId,
    QueueItems::Payload,
    QueueItems::Priority,
    QueueItems::Status,
    QueueItems::RetryCount,
    QueueItems::CreatedAt,
    QueueItems::UpdatedAt,
    QueueItems::LastError,
];

/// UPSERT the full item row. Every queue state transition goes through this.
#[allow(clippy::too_many_arguments)]
pub fn upsert(
    id: &str,
    kind: &str,
    user_id: &str,
    payload: &str,
    priority: i64,
    status: &str,
    retry_count: i64,
    created_at: &str,
    last_error: Option<&str>,
) -> Built {
    let sql = concat!(
        "INSERT INTO \"queue_items\" ",
        "(\"id\", \"kind\", \"user_id\", \"payload\", \"priority\", \"status\", ",
        "\"retry_count\", \"created_at\", \"updated_at\", \"last_error\") ",
        "VALUES (?, ?, ?, ?, ?, ?, ?, ?, datetime('now'), ?) ",
        "ON CONFLICT (\"id\") DO UPDATE SET ",
        "\"status\" = excluded.\"status\", ",
        "\"retry_count\" = excluded.\"retry_count\", ",
        "\"payload\" = excluded.\"payload\", ",
        "\"updated_at\" = excluded.\"updated_at\", ",
        "\"last_error\" = excluded.\"last_error\"",
    )
    .to_string();
    let values = sea_query::Values(vec![
        id.into(),
        kind.into(),
        user_id.into(),
        payload.into(),
        priority.into(),
        status.into(),
        retry_count.into(),
        created_at.into(),
        last_error.map(|s| s.to_string()).into(),
    ]);
    (sql, values)
}

pub fn delete(id: &str) -> Built {
    Query::delete()
        .from_table(QueueItems::Table)
        .and_where(Expr::col(QueueItems::Id).eq(id))
        .build(SqliteQueryBuilder)
}

/// Runnable items (`pending` or `retrying`) ordered for dispatch:
/// priority first, then age.
pub fn load_runnable() -> Built {
    Query::select()
        .columns(ITEM_COLUMNS)
        .from(QueueItems::Table)
        .and_where(Expr::col(QueueItems::Status).is_in(["pending", "retrying"]))
        .order_by(QueueItems::Priority, Order::Asc)
        .order_by(QueueItems::CreatedAt, Order::Asc)
        .build(SqliteQueryBuilder)
}

/// Startup recovery: anything stuck in `processing` becomes `pending` again.
pub fn reset_processing() -> Built {
    Query::update()
        .table(QueueItems::Table)
        .values([(QueueItems::Status, "pending".into())])
        .and_where(Expr::col(QueueItems::Status).eq("processing"))
        .build(SqliteQueryBuilder)
}

/// Delete terminal items older than the given cutoff (RFC 3339 / SQLite
/// datetime string).
pub fn prune_terminal(cutoff: &str) -> Built {
    Query::delete()
        .from_table(QueueItems::Table)
        .and_where(Expr::col(QueueItems::Status).is_in(["completed", "failed"]))
        .and_where(Expr::col(QueueItems::UpdatedAt).lt(cutoff))
        .build(SqliteQueryBuilder)
}

/// `(status, count)` pairs for the admin stats endpoint.
pub fn counts_by_status() -> Built {
    Query::select()
        .column(QueueItems::Status)
        .expr_as(Func::count(Expr::col(Asterisk)), Alias::new("count"))
        .from(QueueItems::Table)
        .group_by_col(QueueItems::Status)
        .build(SqliteQueryBuilder)
}
