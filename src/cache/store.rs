//! SQLite persistence for the verification cache.

use super::VerificationCache;
use crate::domain::{FlowKey, GroupSignature, Outcome};
use crate::error::{FlowvetError, FlowvetResult};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

pub const SCHEMA_VERSION: i64 = 1;

pub fn open_or_create(path: &Path) -> FlowvetResult<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS report_meta (
            fingerprint TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS per_result (
            result_id INTEGER NOT NULL,
            code_flow_id INTEGER NOT NULL,
            outcome TEXT NOT NULL,
            PRIMARY KEY (result_id, code_flow_id)
        );

        CREATE TABLE IF NOT EXISTS per_group (
            source TEXT NOT NULL,
            sink TEXT NOT NULL,
            outcome TEXT NOT NULL,
            PRIMARY KEY (source, sink)
        );

        CREATE TABLE IF NOT EXISTS false_positive_source (
            context TEXT PRIMARY KEY,
            flag INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS false_positive_sink (
            context TEXT PRIMARY KEY,
            flag INTEGER NOT NULL
        );
        ",
    )?;

    let current: Option<i64> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match current {
        None => {
            conn.execute("INSERT INTO schema_version(version) VALUES(?1)", [SCHEMA_VERSION])?;
        }
        Some(version) if version == SCHEMA_VERSION => {}
        Some(found) => return Err(FlowvetError::CacheSchema { found, expected: SCHEMA_VERSION }),
    }
    Ok(conn)
}

/// Replace the stored cache with `cache`, tagged with the report fingerprint.
pub fn save_cache(path: &Path, cache: &VerificationCache, fingerprint: &str) -> FlowvetResult<()> {
    let mut conn = open_or_create(path)?;
    let tx = conn.transaction()?;

    tx.execute("DELETE FROM report_meta", [])?;
    tx.execute("DELETE FROM per_result", [])?;
    tx.execute("DELETE FROM per_group", [])?;
    tx.execute("DELETE FROM false_positive_source", [])?;
    tx.execute("DELETE FROM false_positive_sink", [])?;

    tx.execute("INSERT INTO report_meta(fingerprint) VALUES(?1)", [fingerprint])?;
    for (key, outcome) in cache.per_result() {
        tx.execute(
            "INSERT INTO per_result(result_id, code_flow_id, outcome) VALUES(?1, ?2, ?3)",
            params![key.result_id as i64, key.code_flow_id as i64, serde_json::to_string(outcome)?],
        )?;
    }
    for (signature, outcome) in cache.per_group() {
        tx.execute(
            "INSERT INTO per_group(source, sink, outcome) VALUES(?1, ?2, ?3)",
            params![signature.source, signature.sink, serde_json::to_string(outcome)?],
        )?;
    }
    for (context, flag) in cache.false_positive_sources() {
        tx.execute(
            "INSERT INTO false_positive_source(context, flag) VALUES(?1, ?2)",
            params![context, *flag],
        )?;
    }
    for (context, flag) in cache.false_positive_sinks() {
        tx.execute(
            "INSERT INTO false_positive_sink(context, flag) VALUES(?1, ?2)",
            params![context, *flag],
        )?;
    }

    tx.commit()?;
    Ok(())
}

/// Load a stored cache. `None` when nothing is stored or it belongs to a
/// different report.
pub fn load_cache(path: &Path, fingerprint: &str) -> FlowvetResult<Option<VerificationCache>> {
    if !path.is_file() {
        return Ok(None);
    }
    let conn = open_or_create(path)?;
    let stored: Option<String> = conn
        .query_row("SELECT fingerprint FROM report_meta LIMIT 1", [], |row| row.get(0))
        .optional()?;
    if stored.as_deref() != Some(fingerprint) {
        tracing::info!("Stored cache belongs to another report; starting empty");
        return Ok(None);
    }

    let mut per_result = BTreeMap::new();
    let mut stmt = conn.prepare("SELECT result_id, code_flow_id, outcome FROM per_result")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (result_id, code_flow_id, outcome) = row?;
        let outcome: Outcome = serde_json::from_str(&outcome)?;
        per_result.insert(FlowKey::new(result_id as usize, code_flow_id as usize), outcome);
    }

    let mut per_group = HashMap::new();
    let mut stmt = conn.prepare("SELECT source, sink, outcome FROM per_group")?;
    let rows = stmt.query_map([], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
    })?;
    for row in rows {
        let (source, sink, outcome) = row?;
        per_group.insert(GroupSignature { source, sink }, serde_json::from_str(&outcome)?);
    }

    let fp_source = load_flags(&conn, "SELECT context, flag FROM false_positive_source")?;
    let fp_sink = load_flags(&conn, "SELECT context, flag FROM false_positive_sink")?;

    let mut cache = VerificationCache::new();
    cache.insert_raw(per_result, per_group, fp_source, fp_sink);
    Ok(Some(cache))
}

fn load_flags(conn: &Connection, sql: &str) -> FlowvetResult<HashMap<String, bool>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)))?;
    let mut flags = HashMap::new();
    for row in rows {
        let (context, flag) = row?;
        flags.insert(context, flag);
    }
    Ok(flags)
}
