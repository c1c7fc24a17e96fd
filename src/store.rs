//! Dedupe and audit store: SQLite persistence for processed-file markers,
//! match rows, and the per-run audit log.
//!
//! This module exclusively owns the durable relations; nothing else in the
//! crate writes to the database. Each call is atomic: batch inserts run in
//! one transaction, and schema creation is idempotent.

use anyhow::Result;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::models::{MatchRow, RunReport};

pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Create the schema. Idempotent; safe to run on every invocation.
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_ts TEXT NOT NULL,
            run_date TEXT NOT NULL,
            files_seen INTEGER NOT NULL,
            files_new INTEGER NOT NULL,
            matches_found INTEGER NOT NULL,
            email_sent INTEGER NOT NULL,
            notes TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processed_files (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            file_name TEXT NOT NULL UNIQUE,
            run_date TEXT NOT NULL,
            processed_ts TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS matches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_date TEXT NOT NULL,
            source_file TEXT NOT NULL,
            filter_name TEXT NOT NULL,
            keyword_hit TEXT NOT NULL,
            text_snippet TEXT NOT NULL,
            created_ts TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_matches_run_date ON matches(run_date)")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn was_processed(pool: &SqlitePool, file_name: &str) -> Result<bool> {
    let row: Option<i64> = sqlx::query_scalar("SELECT 1 FROM processed_files WHERE file_name = ?")
        .bind(file_name)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Mark an artifact as processed. Idempotent: re-inserting an identifier
/// already present is a no-op (first write wins).
pub async fn mark_processed(pool: &SqlitePool, file_name: &str, run_date: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO processed_files (file_name, run_date, processed_ts)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(file_name)
    .bind(run_date)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Bulk-append match rows in one transaction. Returns the number inserted;
/// an empty batch is a no-op returning 0.
pub async fn insert_matches(pool: &SqlitePool, rows: &[MatchRow]) -> Result<u64> {
    if rows.is_empty() {
        return Ok(0);
    }

    let created_ts = Utc::now().to_rfc3339();
    let mut tx = pool.begin().await?;
    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO matches (run_date, source_file, filter_name, keyword_hit, text_snippet, created_ts)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&row.run_date)
        .bind(&row.source_file)
        .bind(&row.filter_name)
        .bind(&row.keyword)
        .bind(&row.snippet)
        .bind(&created_ts)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    Ok(rows.len() as u64)
}

/// Append one audit row for a completed invocation.
pub async fn log_run(pool: &SqlitePool, report: &RunReport) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO runs (run_ts, run_date, files_seen, files_new, matches_found, email_sent, notes)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(report.run_date.to_string())
    .bind(report.files_seen as i64)
    .bind(report.files_new as i64)
    .bind(report.matches_found as i64)
    .bind(report.email_sent as i64)
    .bind(&report.notes)
    .execute(pool)
    .await?;
    Ok(())
}
