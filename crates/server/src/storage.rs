//! SQLite-backed persistent store.
//!
//! One connection behind a mutex; WAL for concurrent readers; migrations
//! tracked through a `_migrations` ledger table. Query text comes from the
//! sea-query builders in `commitcast_api::db`; this module binds values and
//! maps rows.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use commitcast_api::db as dbq;
use commitcast_api::db::tokens::TokenProvider;
use commitcast_core::{QueueItem, RepoEnrollment, TaskKind, TaskStatus, Tenant, Tier};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Shared database state.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
    data_dir: PathBuf,
}

/// Storage timestamp format, matching SQLite's `datetime('now')`.
pub const SQL_DATETIME: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_dt(at: DateTime<Utc>) -> String {
    at.format(SQL_DATETIME).to_string()
}

pub fn parse_dt(raw: &str) -> DateTime<Utc> {
    NaiveDateTime::parse_from_str(raw, SQL_DATETIME)
        .map(|naive| naive.and_utc())
        .or_else(|_| DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(|_| Utc::now())
}

fn to_sql_value(value: &sea_query::Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    use sea_query::Value;
    match value {
        Value::Bool(Some(v)) => Sql::Integer(*v as i64),
        Value::TinyInt(Some(v)) => Sql::Integer(*v as i64),
        Value::SmallInt(Some(v)) => Sql::Integer(*v as i64),
        Value::Int(Some(v)) => Sql::Integer(*v as i64),
        Value::BigInt(Some(v)) => Sql::Integer(*v),
        Value::TinyUnsigned(Some(v)) => Sql::Integer(*v as i64),
        Value::SmallUnsigned(Some(v)) => Sql::Integer(*v as i64),
        Value::Unsigned(Some(v)) => Sql::Integer(*v as i64),
        Value::BigUnsigned(Some(v)) => Sql::Integer(*v as i64),
        Value::Float(Some(v)) => Sql::Real(*v as f64),
        Value::Double(Some(v)) => Sql::Real(*v),
        Value::String(Some(v)) => Sql::Text(v.as_ref().clone()),
        Value::Char(Some(v)) => Sql::Text(v.to_string()),
        Value::Bytes(Some(v)) => Sql::Blob(v.as_ref().clone()),
        _ => Sql::Null,
    }
}

/// Execute a built statement, returning the affected row count.
pub fn sq_execute(conn: &Connection, built: dbq::Built) -> rusqlite::Result<usize> {
    let (sql, values) = built;
    let params: Vec<rusqlite::types::Value> = values.iter().map(to_sql_value).collect();
    conn.execute(&sql, rusqlite::params_from_iter(params))
}

/// Run a built query expected to yield at most one row.
pub fn sq_query_row<T>(
    conn: &Connection,
    built: dbq::Built,
    f: impl FnOnce(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let (sql, values) = built;
    let params: Vec<rusqlite::types::Value> = values.iter().map(to_sql_value).collect();
    conn.query_row(&sql, rusqlite::params_from_iter(params), f)
}

/// Run a built query and map every row.
pub fn sq_query_map<T>(
    conn: &Connection,
    built: dbq::Built,
    mut f: impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
) -> rusqlite::Result<Vec<T>> {
    let (sql, values) = built;
    let params: Vec<rusqlite::types::Value> = values.iter().map(to_sql_value).collect();
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(rusqlite::params_from_iter(params), |row| f(row))?;
    rows.collect()
}

/// Initialize the database: open connection, enable WAL, run migrations.
pub fn init_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("commitcast.db");
    let conn = Connection::open(&db_path).context("opening SQLite database")?;

    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    run_migrations(&conn)?;

    Ok(Db {
        conn: Arc::new(Mutex::new(conn)),
        data_dir: data_dir.to_path_buf(),
    })
}

fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let migrations = vec![("0001_init", include_str!("../../../migrations/0001_init.sql"))];

    for (name, sql) in migrations {
        let already_applied: bool = conn
            .query_row(
                "SELECT COUNT(*) > 0 FROM _migrations WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .unwrap_or(false);

        if !already_applied {
            conn.execute_batch(sql)
                .with_context(|| format!("running migration {name}"))?;
            conn.execute("INSERT INTO _migrations (name) VALUES (?1)", [name])?;
            tracing::info!("Applied migration: {name}");
        }
    }

    Ok(())
}

/// Token material as stored per (provider, subject).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TokenMaterial {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Option<String>,
}

impl TokenMaterial {
    /// Valid iff no expiry is recorded or the expiry lies in the future.
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// Cached structural summary of a repository.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct RepoContextRow {
    pub repo_full_name: String,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub key_directories: Vec<String>,
    pub readme_summary: String,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn split_csv(raw: Option<String>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl Db {
    pub fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    // ── Tenants ────────────────────────────────────────────────────────

    pub fn upsert_user(
        &self,
        id: &str,
        codehost_user_id: &str,
        login: &str,
        display_name: Option<&str>,
        email: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        sq_execute(
            &conn,
            dbq::users::upsert(id, codehost_user_id, login, display_name, email),
        )
        .context("upserting user")?;
        Ok(())
    }

    pub fn get_user(&self, id: &str) -> Result<Option<Tenant>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::users::get_by_id(id), |row| {
            Ok(Tenant {
                id: row.get(0)?,
                codehost_user_id: row.get(1)?,
                login: row.get(2)?,
                display_name: row.get(3)?,
                email: row.get(4)?,
                tier: Tier::parse(&row.get::<_, String>(5)?),
                quota_override: row.get(6)?,
            })
        }) {
            Ok(user) => Ok(Some(user)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading user"),
        }
    }

    pub fn set_user_tier(&self, id: &str, tier: &str, quota_override: Option<i64>) -> Result<bool> {
        let conn = self.conn();
        let changed = sq_execute(&conn, dbq::users::set_tier(id, tier, quota_override))
            .context("updating tier")?;
        Ok(changed > 0)
    }

    // ── Repo enrollments ───────────────────────────────────────────────

    pub fn upsert_repo(&self, user_id: &str, repo_full_name: &str, enabled: bool) -> Result<()> {
        let conn = self.conn();
        sq_execute(&conn, dbq::repos::upsert(user_id, repo_full_name, enabled))
            .context("upserting repo enrollment")?;
        Ok(())
    }

    pub fn set_repo_enabled(
        &self,
        user_id: &str,
        repo_full_name: &str,
        enabled: bool,
    ) -> Result<bool> {
        let conn = self.conn();
        let changed = sq_execute(
            &conn,
            dbq::repos::set_enabled(user_id, repo_full_name, enabled),
        )
        .context("updating repo enabled flag")?;
        Ok(changed > 0)
    }

    pub fn set_repo_secret(
        &self,
        user_id: &str,
        repo_full_name: &str,
        secret: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn();
        sq_execute(
            &conn,
            dbq::repos::set_secret(user_id, repo_full_name, secret),
        )
        .context("updating repo secret")?;
        Ok(())
    }

    fn enrollment_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RepoEnrollment> {
        Ok(RepoEnrollment {
            tenant_id: row.get(0)?,
            repo_full_name: row.get(1)?,
            enabled: row.get::<_, i64>(2)? != 0,
            webhook_secret: row.get(3)?,
            created_at: parse_dt(&row.get::<_, String>(4)?),
        })
    }

    /// Enrollment row for a repo regardless of owner (earliest wins).
    pub fn repo_by_name(&self, repo_full_name: &str) -> Result<Option<RepoEnrollment>> {
        let conn = self.conn();
        match sq_query_row(
            &conn,
            dbq::repos::get_by_repo(repo_full_name),
            Self::enrollment_from_row,
        ) {
            Ok(row) => Ok(Some(row)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading repo enrollment"),
        }
    }

    pub fn repos_for_user(&self, user_id: &str) -> Result<Vec<RepoEnrollment>> {
        let conn = self.conn();
        sq_query_map(
            &conn,
            dbq::repos::list_for_user(user_id),
            Self::enrollment_from_row,
        )
        .context("listing repo enrollments")
    }

    /// Compound: the tenant owning a repo, if enrolled.
    pub fn user_by_repo(&self, repo_full_name: &str) -> Result<Option<(Tenant, RepoEnrollment)>> {
        let Some(enrollment) = self.repo_by_name(repo_full_name)? else {
            return Ok(None);
        };
        let Some(user) = self.get_user(&enrollment.tenant_id)? else {
            return Ok(None);
        };
        Ok(Some((user, enrollment)))
    }

    pub fn repo_is_enabled(&self, repo_full_name: &str) -> Result<bool> {
        Ok(self
            .repo_by_name(repo_full_name)?
            .map(|e| e.enabled)
            .unwrap_or(false))
    }

    // ── Credentials ────────────────────────────────────────────────────

    pub fn put_token(
        &self,
        provider: TokenProvider,
        subject: &str,
        material: &TokenMaterial,
    ) -> Result<()> {
        let expires = material.expires_at.map(fmt_dt);
        let conn = self.conn();
        sq_execute(
            &conn,
            dbq::tokens::upsert(
                provider,
                subject,
                &material.access_token,
                material.refresh_token.as_deref(),
                expires.as_deref(),
                material.scopes.as_deref(),
            ),
        )
        .context("upserting token")?;
        Ok(())
    }

    pub fn get_token(&self, provider: TokenProvider, subject: &str) -> Result<Option<TokenMaterial>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::tokens::get(provider, subject), |row| {
            Ok(TokenMaterial {
                access_token: row.get(1)?,
                refresh_token: row.get(2)?,
                expires_at: row.get::<_, Option<String>>(3)?.map(|s| parse_dt(&s)),
                scopes: row.get(4)?,
            })
        }) {
            Ok(material) => Ok(Some(material)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading token"),
        }
    }

    pub fn delete_token(&self, provider: TokenProvider, subject: &str) -> Result<bool> {
        let conn = self.conn();
        let changed =
            sq_execute(&conn, dbq::tokens::delete(provider, subject)).context("deleting token")?;
        Ok(changed > 0)
    }

    // ── Repo contexts ──────────────────────────────────────────────────

    pub fn put_context(&self, ctx: &RepoContextRow) -> Result<()> {
        let conn = self.conn();
        sq_execute(
            &conn,
            dbq::contexts::upsert(
                &ctx.repo_full_name,
                &ctx.languages.join(","),
                &ctx.frameworks.join(","),
                &ctx.key_directories.join(","),
                &ctx.readme_summary,
            ),
        )
        .context("upserting repo context")?;
        Ok(())
    }

    pub fn get_context(&self, repo_full_name: &str) -> Result<Option<RepoContextRow>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::contexts::get(repo_full_name), |row| {
            Ok(RepoContextRow {
                repo_full_name: row.get(0)?,
                languages: split_csv(row.get(1)?),
                frameworks: split_csv(row.get(2)?),
                key_directories: split_csv(row.get(3)?),
                readme_summary: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                updated_at: Some(parse_dt(&row.get::<_, String>(5)?)),
            })
        }) {
            Ok(ctx) => Ok(Some(ctx)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading repo context"),
        }
    }

    // ── Posted-commit ledger ───────────────────────────────────────────

    /// Record a post. Returns false when the sha was already in the ledger.
    pub fn record_posted(
        &self,
        commit_sha: &str,
        repo_full_name: &str,
        post_id: &str,
    ) -> Result<bool> {
        let conn = self.conn();
        let inserted = sq_execute(
            &conn,
            dbq::ledger::record_posted(commit_sha, repo_full_name, post_id),
        )
        .context("recording posted commit")?;
        Ok(inserted > 0)
    }

    /// The external post id for a commit, if it was already posted.
    pub fn get_posted(&self, commit_sha: &str) -> Result<Option<String>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::ledger::get_posted(commit_sha), |row| {
            row.get::<_, String>(2)
        }) {
            Ok(post_id) => Ok(Some(post_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("consulting posted-commit ledger"),
        }
    }

    /// Most recent post for a repo, for reply-thread linkage.
    pub fn latest_post_for_repo(&self, repo_full_name: &str) -> Result<Option<String>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::ledger::latest_for_repo(repo_full_name), |row| {
            row.get::<_, String>(0)
        }) {
            Ok(post_id) => Ok(Some(post_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading latest repo post"),
        }
    }

    pub fn set_og_post(&self, repo_full_name: &str, post_id: &str) -> Result<()> {
        let conn = self.conn();
        sq_execute(&conn, dbq::ledger::set_og_post(repo_full_name, post_id))
            .context("setting OG post")?;
        Ok(())
    }

    pub fn get_og_post(&self, repo_full_name: &str) -> Result<Option<String>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::ledger::get_og_post(repo_full_name), |row| {
            row.get::<_, String>(0)
        }) {
            Ok(post_id) => Ok(Some(post_id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading OG post"),
        }
    }

    // ── Templates ──────────────────────────────────────────────────────

    /// Body of the tenant's active template, if any.
    pub fn active_template(&self, user_id: &str) -> Result<Option<String>> {
        let conn = self.conn();
        match sq_query_row(&conn, dbq::templates::active_for_user(user_id), |row| {
            row.get::<_, String>(0)
        }) {
            Ok(body) => Ok(Some(body)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e).context("loading active template"),
        }
    }

    /// Store a template and make it the single active one.
    pub fn set_active_template(&self, user_id: &str, name: &str, body: &str) -> Result<()> {
        let conn = self.conn();
        sq_execute(&conn, dbq::templates::deactivate_all(user_id))
            .context("deactivating templates")?;
        sq_execute(&conn, dbq::templates::upsert(user_id, name, body, true))
            .context("upserting template")?;
        Ok(())
    }

    // ── OAuth states ───────────────────────────────────────────────────

    /// Insert a pending OAuth state row; sweeps expired rows first.
    pub fn insert_oauth_state(
        &self,
        state: &str,
        provider: &str,
        subject: Option<&str>,
        code_verifier: Option<&str>,
        ttl_minutes: i64,
    ) -> Result<()> {
        let now = Utc::now();
        let expires_at = fmt_dt(now + chrono::Duration::minutes(ttl_minutes));
        let conn = self.conn();
        sq_execute(&conn, dbq::states::delete_expired(&fmt_dt(now))).ok();
        sq_execute(
            &conn,
            dbq::states::insert(state, provider, subject, code_verifier, &expires_at),
        )
        .context("inserting oauth state")?;
        Ok(())
    }

    /// Consume an OAuth state row: returns `(subject, code_verifier)` and
    /// deletes the row. Expired or unknown states return None.
    pub fn take_oauth_state(
        &self,
        state: &str,
        provider: &str,
    ) -> Result<Option<(Option<String>, Option<String>)>> {
        let conn = self.conn();
        let row = match sq_query_row(&conn, dbq::states::get(state), |row| {
            Ok((
                row.get::<_, String>(1)?,         // provider
                row.get::<_, Option<String>>(2)?, // subject
                row.get::<_, Option<String>>(3)?, // code_verifier
                row.get::<_, String>(4)?,         // expires_at
            ))
        }) {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => return Ok(None),
            Err(e) => return Err(e).context("loading oauth state"),
        };
        sq_execute(&conn, dbq::states::delete(state)).ok();

        let (row_provider, subject, verifier, expires_at) = row;
        if row_provider != provider || parse_dt(&expires_at) <= Utc::now() {
            return Ok(None);
        }
        Ok(Some((subject, verifier)))
    }

    // ── Queue helpers ──────────────────────────────────────────────────

    /// `(status, count)` pairs for the admin stats endpoint.
    pub fn queue_counts(&self) -> Result<Vec<(String, i64)>> {
        let conn = self.conn();
        sq_query_map(&conn, dbq::queue::counts_by_status(), |row| {
            Ok((row.get(0)?, row.get(1)?))
        })
        .context("counting queue items")
    }

    pub fn usage_in_hour(&self, user_id: &str, endpoint: &str, at: DateTime<Utc>) -> Result<i64> {
        let bucket = dbq::usage::hour_bucket(at);
        let conn = self.conn();
        match sq_query_row(&conn, dbq::usage::count(user_id, endpoint, &bucket), |row| {
            row.get::<_, i64>(0)
        }) {
            Ok(n) => Ok(n),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(0),
            Err(e) => Err(e).context("reading usage counter"),
        }
    }
}

// The queue drives every item state transition through the store.
impl commitcast_queue::QueueStore for Db {
    fn persist(&self, item: &QueueItem) -> Result<()> {
        let payload = serde_json::to_string(&item.payload)?;
        let conn = self.conn();
        sq_execute(
            &conn,
            dbq::queue::upsert(
                &item.id,
                item.kind.as_str(),
                &item.tenant_id,
                &payload,
                item.priority,
                item.status.as_str(),
                item.retry_count as i64,
                &fmt_dt(item.created_at),
                item.last_error.as_deref(),
            ),
        )
        .context("persisting queue item")?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let conn = self.conn();
        sq_execute(&conn, dbq::queue::delete(id)).context("deleting queue item")?;
        Ok(())
    }

    fn recover(&self) -> Result<Vec<QueueItem>> {
        let conn = self.conn();
        sq_execute(&conn, dbq::queue::reset_processing())
            .context("resetting in-flight queue items")?;
        let items = sq_query_map(&conn, dbq::queue::load_runnable(), |row| {
            let kind: String = row.get(1)?;
            let payload: String = row.get(3)?;
            let status: String = row.get(5)?;
            Ok(QueueItem {
                id: row.get(0)?,
                kind: TaskKind::parse(&kind).unwrap_or(TaskKind::PostDispatch),
                tenant_id: row.get(2)?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                priority: row.get(4)?,
                status: TaskStatus::parse(&status).unwrap_or(TaskStatus::Pending),
                retry_count: row.get::<_, i64>(6)? as u32,
                created_at: parse_dt(&row.get::<_, String>(7)?),
                updated_at: parse_dt(&row.get::<_, String>(8)?),
                last_error: row.get(9)?,
            })
        })
        .context("loading runnable queue items")?;
        Ok(items)
    }

    fn prune_terminal(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let conn = self.conn();
        sq_execute(&conn, dbq::queue::prune_terminal(&fmt_dt(cutoff)))
            .context("pruning terminal queue items")
    }

    fn record_usage(&self, tenant_id: &str, endpoint: &str, at: DateTime<Utc>) -> Result<()> {
        let bucket = dbq::usage::hour_bucket(at);
        let conn = self.conn();
        sq_execute(&conn, dbq::usage::increment(tenant_id, endpoint, &bucket))
            .context("incrementing usage counter")?;
        Ok(())
    }

    fn usage_count(&self, tenant_id: &str, endpoint: &str, at: DateTime<Utc>) -> Result<i64> {
        self.usage_in_hour(tenant_id, endpoint, at)
    }
}
