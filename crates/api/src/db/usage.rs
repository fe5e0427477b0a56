//! Hourly API usage counters.
//!
//! Buckets are `YYYY-MM-DD HH` UTC strings; old buckets are simply never
//! consulted again, so no explicit reset is needed.

use chrono::{DateTime, Utc};
use sea_query::{Expr, Query, SqliteQueryBuilder};

use super::tables::ApiUsage;
use super::Built;

/// Bucket key for the hour containing `at`.
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H").to_string()
}

/// Increment the counter for (user, endpoint, bucket).
pub fn increment(user_id: &str, endpoint: &str, bucket: &str) -> Built {
    let sql = concat!(
        "INSERT INTO \"api_usage\" (\"user_id\", \"endpoint\", \"hour_bucket\", \"count\") ",
        "VALUES (?, ?, ?, 1) ",
        "ON CONFLICT (\"user_id\", \"endpoint\", \"hour_bucket\") DO UPDATE SET ",
        "\"count\" = \"count\" + 1",
    )
    .to_string();
    let values = sea_query::Values(vec![user_id.into(), endpoint.into(), bucket.into()]);
    (sql, values)
}

pub fn count(user_id: &str, endpoint: &str, bucket: &str) -> Built {
    Query::select()
        .column(ApiUsage::Count)
        .from(ApiUsage::Table)
        .and_where(Expr::col(ApiUsage::UserId).eq(user_id))
        .and_where(Expr::col(ApiUsage::Endpoint).eq(endpoint))
        .and_where(Expr::col(ApiUsage::HourBucket).eq(bucket))
        .build(SqliteQueryBuilder)
}
