use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension, Transaction};

use crate::error::{CoverError, Result};
use crate::model::{CoverageMetric, Ratio};
use crate::report::{BuildSummary, TrendPoint};

const SCHEMA: &str = include_str!("../schema.sql");

/// Open (or create) the history database at the given path.
pub fn open(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    conn.execute_batch("PRAGMA synchronous=NORMAL;")?;
    Ok(conn)
}

/// Create missing tables. Safe to call on an initialized database.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Store the snapshot of a build. With `overwrite`, an existing snapshot of
/// the same build is replaced. Returns the row id of the build.
pub fn insert_build(conn: &mut Connection, summary: &BuildSummary, overwrite: bool) -> Result<i64> {
    let tx = conn.transaction()?;
    if overwrite {
        tx.execute("DELETE FROM build WHERE name = ?1", params![summary.build])?;
    }
    let build_id = insert_build_tx(&tx, summary)?;
    tx.commit()?;
    Ok(build_id)
}

fn insert_build_tx(tx: &Transaction, summary: &BuildSummary) -> Result<i64> {
    let json = serde_json::to_string(summary)?;
    let health = summary.health.as_ref().map(|h| h.score);

    tx.execute(
        "INSERT INTO build (name, recorded_at, health, summary) VALUES (?1, ?2, ?3, ?4)",
        params![summary.build, summary.recorded_at, health, json],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(ref err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            CoverError::Other(format!(
                "Build '{}' is already recorded. Use --overwrite to replace it.",
                summary.build
            ))
        }
        other => CoverError::Sqlite(other),
    })?;
    let build_id = tx.last_insert_rowid();

    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO metric_result (build_id, metric, numerator, denominator) \
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for (metric, ratio) in &summary.results {
            stmt.execute(params![build_id, metric.as_str(), ratio.numerator, ratio.denominator])?;
        }
    }

    {
        let mut stmt = tx.prepare_cached(
            "INSERT OR REPLACE INTO module_result (build_id, module, metric, numerator, denominator) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for module in &summary.modules {
            for (metric, ratio) in &module.results {
                stmt.execute(params![
                    build_id,
                    module.name,
                    metric.as_str(),
                    ratio.numerator,
                    ratio.denominator,
                ])?;
            }
        }
    }

    Ok(build_id)
}

/// The stored snapshot of `build`.
pub fn get_build(conn: &Connection, build: &str) -> Result<BuildSummary> {
    let json: String = conn
        .query_row(
            "SELECT summary FROM build WHERE name = ?1",
            params![build],
            |row| row.get(0),
        )
        .optional()?
        .ok_or_else(|| CoverError::BuildNotFound(build.to_string()))?;
    Ok(serde_json::from_str(&json)?)
}

/// One row of the build listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRow {
    pub name: String,
    pub recorded_at: String,
    pub health: Option<i32>,
}

/// All recorded builds, oldest first.
pub fn list_builds(conn: &Connection) -> Result<Vec<BuildRow>> {
    let mut stmt = conn.prepare("SELECT name, recorded_at, health FROM build ORDER BY recorded_at, id")?;
    let rows = stmt.query_map([], |row| {
        Ok(BuildRow {
            name: row.get(0)?,
            recorded_at: row.get(1)?,
            health: row.get(2)?,
        })
    })?;
    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    Ok(result)
}

/// Name of the most recently recorded build, if any.
pub fn latest_build_name(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT name FROM build ORDER BY recorded_at DESC, id DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn build_exists(conn: &Connection, build: &str) -> Result<bool> {
    let count: u32 = conn.query_row(
        "SELECT COUNT(*) FROM build WHERE name = ?1",
        params![build],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// History of `metric`, oldest first: project-wide, or of a single module
/// when `module` is given. With `limit`, only the most recent builds.
pub fn metric_series(
    conn: &Connection,
    metric: CoverageMetric,
    module: Option<&str>,
    limit: Option<usize>,
) -> Result<Vec<TrendPoint>> {
    let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
    let sql = match module {
        None => {
            "SELECT b.name, b.recorded_at, r.numerator, r.denominator
             FROM metric_result r JOIN build b ON b.id = r.build_id
             WHERE r.metric = ?1 AND ?2 IS NULL
             ORDER BY b.recorded_at DESC, b.id DESC
             LIMIT ?3"
        }
        Some(_) => {
            "SELECT b.name, b.recorded_at, r.numerator, r.denominator
             FROM module_result r JOIN build b ON b.id = r.build_id
             WHERE r.metric = ?1 AND r.module = ?2
             ORDER BY b.recorded_at DESC, b.id DESC
             LIMIT ?3"
        }
    };

    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![metric.as_str(), module, limit], |row| {
        Ok(TrendPoint {
            build: row.get(0)?,
            recorded_at: row.get(1)?,
            ratio: Ratio::new(row.get(2)?, row.get(3)?),
        })
    })?;

    let mut result = Vec::new();
    for row in rows {
        result.push(row?);
    }
    result.reverse();
    Ok(result)
}

/// Delete a build and its results.
pub fn delete_build(conn: &mut Connection, build: &str) -> Result<()> {
    let tx = conn.transaction()?;
    let deleted = tx.execute("DELETE FROM build WHERE name = ?1", params![build])?;
    if deleted == 0 {
        return Err(CoverError::BuildNotFound(build.to_string()));
    }
    tx.commit()?;
    Ok(())
}
