// src/core/index/queries.rs

//! The SQL behind every query surface in §4.4/§4.8. One function per
//! surface; `Index` in `mod.rs` is the thin async facade over these.

use std::collections::HashMap;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::core::errors::IngestError;

#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub group_hash: Option<String>,
    pub metadata: Vec<(String, String)>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl RunFilter {
    fn where_clause_and_params(&self, base: &mut Vec<String>, params: &mut Vec<Box<dyn rusqlite::ToSql>>) {
        if let Some(status) = &self.status {
            base.push("status = ?".to_string());
            params.push(Box::new(status.clone()));
        }
        if let Some(group_hash) = &self.group_hash {
            base.push("group_hash = ?".to_string());
            params.push(Box::new(group_hash.clone()));
        }
        for (key, value) in &self.metadata {
            base.push(
                "EXISTS (SELECT 1 FROM user_metadata um WHERE um.run_id = runs.run_id AND um.key = ? AND um.value = ?)"
                    .to_string(),
            );
            params.push(Box::new(key.clone()));
            params.push(Box::new(value.clone()));
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusCounts {
    pub passed: i64,
    pub failed: i64,
    pub skipped: i64,
    pub aborted: i64,
}

#[derive(Debug, Clone)]
pub struct RunRow {
    pub run_id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub retention_days: Option<i64>,
    pub local_run: bool,
    pub dut: Option<String>,
    pub run_name: String,
    pub group_name: Option<String>,
    pub group_hash: Option<String>,
    pub abort_reason: Option<String>,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone)]
pub struct TestCaseRow {
    pub run_id: String,
    pub tc_full_name: String,
    pub tc_id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct RunsOverTimeRow {
    pub run_id: String,
    pub start_time: i64,
    pub counts: StatusCounts,
}

#[derive(Debug, Clone)]
pub struct TestCaseHistoryRow {
    pub run_id: String,
    pub tc_id: String,
    pub status: String,
    pub start_time: i64,
    pub run_start_time: i64,
    pub run_status: String,
    pub run_name: String,
}

#[derive(Debug, Clone)]
pub struct FailureRow {
    pub run_id: String,
    pub tc_id: String,
    pub tc_full_name: String,
    pub start_time: i64,
}

#[derive(Debug, Clone)]
pub struct TopFailureRow {
    pub tc_full_name: String,
    pub failure_count: i64,
    pub latest_run_id: String,
    pub latest_tc_id: String,
}

#[derive(Debug, Clone)]
pub struct SymptomFailureRow {
    pub symptom: String,
    pub failure_count: i64,
}

pub type MetadataMap = HashMap<String, (String, Option<String>)>;

#[derive(Debug, Clone, Default)]
pub struct GroupDetails {
    pub group_hash: String,
    pub group_name: Option<String>,
    pub run_count: i64,
    pub metadata: MetadataMap,
}

pub struct NewRun {
    pub run_id: String,
    pub status: String,
    pub start_time: i64,
    pub retention_days: Option<i64>,
    pub local_run: bool,
    pub dut: Option<String>,
    pub run_name: String,
    pub group_name: Option<String>,
    pub group_hash: Option<String>,
    pub created_at: i64,
}

pub struct NewTestCase {
    pub run_id: String,
    pub tc_full_name: String,
    pub tc_id: String,
    pub status: String,
    pub start_time: i64,
    pub end_time: Option<i64>,
    pub now: i64,
}

fn counts_from_rows(conn: &Connection, run_id: &str) -> Result<StatusCounts, IngestError> {
    let mut stmt = conn.prepare(
        "SELECT status, COUNT(*) FROM test_cases WHERE run_id = ? GROUP BY status",
    )?;
    let mut counts = StatusCounts::default();
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    for row in rows {
        let (status, n) = row?;
        match status.as_str() {
            "passed" => counts.passed += n,
            "failed" | "error" => counts.failed += n,
            "skipped" => counts.skipped += n,
            "aborted" => counts.aborted += n,
            _ => {}
        }
    }
    Ok(counts)
}

fn row_to_run(conn: &Connection, row: &rusqlite::Row) -> Result<RunRow, IngestError> {
    let run_id: String = row.get("run_id")?;
    let counts = counts_from_rows(conn, &run_id)?;
    Ok(RunRow {
        run_id,
        status: row.get("status")?,
        start_time: row.get("start_time")?,
        end_time: row.get("end_time")?,
        retention_days: row.get("retention_days")?,
        local_run: row.get::<_, i64>("local_run")? != 0,
        dut: row.get("dut")?,
        run_name: row.get("run_name")?,
        group_name: row.get("group_name")?,
        group_hash: row.get("group_hash")?,
        abort_reason: row.get("abort_reason")?,
        counts,
    })
}

pub fn insert_run(conn: &Connection, row: &NewRun) -> Result<(), IngestError> {
    conn.execute(
        "INSERT INTO runs (run_id, status, start_time, retention_days, local_run, dut, run_name, group_name, group_hash, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
        params![
            row.run_id,
            row.status,
            row.start_time,
            row.retention_days,
            row.local_run as i64,
            row.dut,
            row.run_name,
            row.group_name,
            row.group_hash,
            row.created_at,
        ],
    )?;
    Ok(())
}

pub fn update_run_status(
    conn: &Connection,
    run_id: &str,
    status: &str,
    end_time: Option<i64>,
    abort_reason: Option<&str>,
) -> Result<(), IngestError> {
    conn.execute(
        "UPDATE runs SET status = ?1, end_time = ?2, abort_reason = ?3, updated_at = ?4 WHERE run_id = ?5",
        params![status, end_time, abort_reason, end_time.unwrap_or_default(), run_id],
    )?;
    Ok(())
}

pub fn upsert_test_case(conn: &Connection, row: &NewTestCase) -> Result<(), IngestError> {
    conn.execute(
        "INSERT INTO test_cases (run_id, tc_full_name, tc_id, status, start_time, end_time, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
         ON CONFLICT(run_id, tc_full_name) DO UPDATE SET
            status = excluded.status, end_time = excluded.end_time, updated_at = excluded.updated_at",
        params![
            row.run_id,
            row.tc_full_name,
            row.tc_id,
            row.status,
            row.start_time,
            row.end_time,
            row.now,
        ],
    )?;
    Ok(())
}

/// Records the failure-symptom signature (stack-trace first line) for a
/// test case, keyed by `(run_id, tc_id)` (supplemented query surface, §B).
pub fn update_test_case_symptom(
    conn: &Connection,
    run_id: &str,
    tc_id: &str,
    symptom: &str,
) -> Result<(), IngestError> {
    conn.execute(
        "UPDATE test_cases SET symptom = ?1 WHERE run_id = ?2 AND tc_id = ?3",
        params![symptom, run_id, tc_id],
    )?;
    Ok(())
}

pub fn insert_metadata(
    conn: &Connection,
    table: &str,
    run_id: &str,
    metadata: &[(String, String, Option<String>)],
) -> Result<(), IngestError> {
    let tx = conn.unchecked_transaction()?;
    for (key, value, url) in metadata {
        tx.execute(
            &format!(
                "INSERT INTO {table} (run_id, key, value, url, created_at) VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(run_id, key) DO UPDATE SET value = excluded.value, url = excluded.url"
            ),
            params![run_id, key, value, url, 0i64],
        )?;
    }
    tx.commit()?;
    Ok(())
}

pub fn run_exists(conn: &Connection, run_id: &str) -> Result<bool, IngestError> {
    conn.query_row("SELECT 1 FROM runs WHERE run_id = ?1", params![run_id], |_| Ok(()))
        .optional()
        .map(|r| r.is_some())
        .map_err(Into::into)
}

pub fn list_runs(conn: &Connection, filter: &RunFilter) -> Result<Vec<RunRow>, IngestError> {
    let mut clauses = Vec::new();
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    filter.where_clause_and_params(&mut clauses, &mut sql_params);

    let mut sql = "SELECT * FROM runs".to_string();
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY start_time DESC");
    if let Some(limit) = filter.limit {
        sql.push_str(&format!(" LIMIT {limit}"));
        if let Some(offset) = filter.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| Ok(row_to_run(conn, row)))?;
    rows.map(|r| r?).collect()
}

pub fn run_by_id(conn: &Connection, run_id: &str) -> Result<Option<RunRow>, IngestError> {
    conn.query_row("SELECT * FROM runs WHERE run_id = ?1", params![run_id], |row| {
        Ok(row_to_run(conn, row))
    })
    .optional()?
    .transpose()
}

pub fn test_cases_for_runs(conn: &Connection, run_ids: &[String]) -> Result<Vec<TestCaseRow>, IngestError> {
    if run_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = run_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT run_id, tc_full_name, tc_id, status, start_time, end_time FROM test_cases WHERE run_id IN ({placeholders}) ORDER BY start_time"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params_from_iter(run_ids.iter()), |row| {
        Ok(TestCaseRow {
            run_id: row.get(0)?,
            tc_full_name: row.get(1)?,
            tc_id: row.get(2)?,
            status: row.get(3)?,
            start_time: row.get(4)?,
            end_time: row.get(5)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn run_metadata(conn: &Connection, table: &str, run_id: &str) -> Result<MetadataMap, IngestError> {
    let mut stmt = conn.prepare(&format!("SELECT key, value, url FROM {table} WHERE run_id = ?1"))?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            (row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?),
        ))
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn runs_over_time(conn: &Connection, filter: &RunFilter) -> Result<Vec<RunsOverTimeRow>, IngestError> {
    let mut clauses = vec!["status = 'finished'".to_string()];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    filter.where_clause_and_params(&mut clauses, &mut sql_params);

    let sql = format!(
        "SELECT run_id, start_time FROM runs WHERE {} ORDER BY start_time ASC",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (run_id, start_time) = row?;
        let counts = counts_from_rows(conn, &run_id)?;
        out.push(RunsOverTimeRow { run_id, start_time, counts });
    }
    Ok(out)
}

pub fn test_case_history(
    conn: &Connection,
    tc_full_name: &str,
    group_hash: Option<&str>,
    exclude_run_id: Option<&str>,
    before: Option<i64>,
) -> Result<Vec<TestCaseHistoryRow>, IngestError> {
    let mut clauses = vec!["tc.tc_full_name = ?1".to_string()];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(tc_full_name.to_string())];

    if let Some(gh) = group_hash {
        clauses.push("r.group_hash = ?".to_string());
        sql_params.push(Box::new(gh.to_string()));
    }
    if let Some(run_id) = exclude_run_id {
        clauses.push("tc.run_id != ?".to_string());
        sql_params.push(Box::new(run_id.to_string()));
    }
    if let Some(before) = before {
        clauses.push("r.start_time <= ?".to_string());
        sql_params.push(Box::new(before));
    }

    // §4.7: the classification engine only ever looks at the 10 most
    // recent occurrences of a test case within its group.
    let sql = format!(
        "SELECT tc.run_id, tc.tc_id, tc.status, tc.start_time, r.start_time, r.status, r.run_name
         FROM test_cases tc JOIN runs r ON r.run_id = tc.run_id
         WHERE {}
         ORDER BY r.start_time DESC
         LIMIT 10",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(TestCaseHistoryRow {
            run_id: row.get(0)?,
            tc_id: row.get(1)?,
            status: row.get(2)?,
            start_time: row.get(3)?,
            run_start_time: row.get(4)?,
            run_status: row.get(5)?,
            run_name: row.get(6)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn recent_failures(
    conn: &Connection,
    window_start: i64,
    filter: &RunFilter,
    limit: i64,
) -> Result<Vec<FailureRow>, IngestError> {
    let mut clauses = vec![
        "tc.status IN ('failed','error')".to_string(),
        "tc.start_time >= ?1".to_string(),
    ];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(window_start)];
    if let Some(gh) = &filter.group_hash {
        clauses.push("r.group_hash = ?".to_string());
        sql_params.push(Box::new(gh.clone()));
    }
    for (key, value) in &filter.metadata {
        clauses.push(
            "EXISTS (SELECT 1 FROM user_metadata um WHERE um.run_id = tc.run_id AND um.key = ? AND um.value = ?)"
                .to_string(),
        );
        sql_params.push(Box::new(key.clone()));
        sql_params.push(Box::new(value.clone()));
    }

    let sql = format!(
        "SELECT tc.run_id, tc.tc_id, tc.tc_full_name, tc.start_time
         FROM test_cases tc JOIN runs r ON r.run_id = tc.run_id
         WHERE {}
         ORDER BY tc.start_time DESC
         LIMIT {limit}",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(FailureRow {
            run_id: row.get(0)?,
            tc_id: row.get(1)?,
            tc_full_name: row.get(2)?,
            start_time: row.get(3)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// Top-N `tc_full_name` by failure count in the window, with the
/// `run_id`/`tc_id` of the most recent failure, via a windowed rank over
/// failed rows (§4.4 item 7b).
pub fn top_failures(
    conn: &Connection,
    window_start: i64,
    filter: &RunFilter,
    limit: i64,
) -> Result<Vec<TopFailureRow>, IngestError> {
    let mut clauses = vec![
        "tc.status IN ('failed','error')".to_string(),
        "tc.start_time >= ?1".to_string(),
    ];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(window_start)];
    if let Some(gh) = &filter.group_hash {
        clauses.push("r.group_hash = ?".to_string());
        sql_params.push(Box::new(gh.clone()));
    }

    let sql = format!(
        "WITH ranked AS (
            SELECT tc.tc_full_name, tc.run_id, tc.tc_id, tc.start_time,
                   ROW_NUMBER() OVER (PARTITION BY tc.tc_full_name ORDER BY tc.start_time DESC) AS rnk
            FROM test_cases tc JOIN runs r ON r.run_id = tc.run_id
            WHERE {}
         )
         SELECT tc_full_name, COUNT(*) AS failure_count,
                MAX(CASE WHEN rnk = 1 THEN run_id END) AS latest_run_id,
                MAX(CASE WHEN rnk = 1 THEN tc_id END) AS latest_tc_id
         FROM ranked
         GROUP BY tc_full_name
         ORDER BY failure_count DESC
         LIMIT {limit}",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(TopFailureRow {
            tc_full_name: row.get(0)?,
            failure_count: row.get(1)?,
            latest_run_id: row.get(2)?,
            latest_tc_id: row.get(3)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

/// Failure top-list keyed by symptom (stack-trace first line) rather than
/// `tc_full_name` (supplemented query surface, see the repo's design
/// notes). The symptom is recorded per failing test case in
/// `test_cases.symptom` by ingest from the first line of its most recent
/// exception; cases with no recorded symptom are excluded.
pub fn top_failures_by_symptom(
    conn: &Connection,
    window_start: i64,
    filter: &RunFilter,
    limit: i64,
) -> Result<Vec<SymptomFailureRow>, IngestError> {
    let mut clauses = vec![
        "tc.status IN ('failed','error')".to_string(),
        "tc.start_time >= ?1".to_string(),
        "tc.symptom IS NOT NULL".to_string(),
    ];
    let mut sql_params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(window_start)];
    if let Some(gh) = &filter.group_hash {
        clauses.push("r.group_hash = ?".to_string());
        sql_params.push(Box::new(gh.clone()));
    }

    let sql = format!(
        "SELECT tc.symptom AS symptom, COUNT(*) AS failure_count
         FROM test_cases tc
         JOIN runs r ON r.run_id = tc.run_id
         WHERE {}
         GROUP BY tc.symptom
         ORDER BY failure_count DESC
         LIMIT {limit}",
        clauses.join(" AND ")
    );
    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::ToSql> = sql_params.iter().map(|b| b.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(SymptomFailureRow {
            symptom: row.get(0)?,
            failure_count: row.get(1)?,
        })
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn previous_run_in_group(
    conn: &Connection,
    group_hash: &str,
    before_start_time: i64,
) -> Result<Option<RunRow>, IngestError> {
    conn.query_row(
        "SELECT * FROM runs WHERE group_hash = ?1 AND start_time < ?2 ORDER BY start_time DESC LIMIT 1",
        params![group_hash, before_start_time],
        |row| Ok(row_to_run(conn, row)),
    )
    .optional()?
    .transpose()
}

pub fn run_names_with_prefix(
    conn: &Connection,
    group_hash: Option<&str>,
    base_name: &str,
) -> Result<Vec<String>, IngestError> {
    let pattern = format!("{base_name}%");
    let mut stmt = if group_hash.is_some() {
        conn.prepare("SELECT run_name FROM runs WHERE group_hash = ?1 AND run_name LIKE ?2 ESCAPE '\\'")?
    } else {
        conn.prepare("SELECT run_name FROM runs WHERE group_hash IS NULL AND run_name LIKE ?2 ESCAPE '\\'")?
    };
    let rows = stmt.query_map(params![group_hash.unwrap_or_default(), pattern], |row| {
        row.get::<_, String>(0)
    })?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn metadata_keys(conn: &Connection) -> Result<Vec<String>, IngestError> {
    let mut stmt = conn.prepare("SELECT DISTINCT key FROM user_metadata ORDER BY key")?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn metadata_values(conn: &Connection, key: &str) -> Result<Vec<String>, IngestError> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT value FROM user_metadata WHERE key = ?1 ORDER BY value")?;
    let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}

pub fn group_details(conn: &Connection, group_hash: &str) -> Result<Option<GroupDetails>, IngestError> {
    let found: Option<(Option<String>, i64)> = conn
        .query_row(
            "SELECT group_name, COUNT(*) FROM runs WHERE group_hash = ?1 GROUP BY group_name",
            params![group_hash],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((group_name, run_count)) = found else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT gm.key, gm.value, gm.url FROM group_metadata gm
         JOIN runs r ON r.run_id = gm.run_id
         WHERE r.group_hash = ?1
         GROUP BY gm.key",
    )?;
    let rows = stmt.query_map(params![group_hash], |row| {
        Ok((
            row.get::<_, String>(0)?,
            (row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?),
        ))
    })?;
    let metadata: MetadataMap = rows.collect::<Result<_, _>>()?;

    Ok(Some(GroupDetails {
        group_hash: group_hash.to_string(),
        group_name,
        run_count,
        metadata,
    }))
}

pub fn sweep_abandoned_runs(conn: &Connection) -> Result<Vec<String>, IngestError> {
    let mut stmt = conn.prepare("SELECT run_id FROM runs WHERE status IN ('running','aborted')")?;
    let run_ids: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<_, _>>()?;
    drop(stmt);

    for run_id in &run_ids {
        let latest_event: Option<i64> = conn.query_row(
            "SELECT MAX(COALESCE(end_time, start_time)) FROM test_cases WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE test_cases SET status = 'aborted', end_time = COALESCE(end_time, ?2) WHERE run_id = ?1 AND status = 'running'",
            params![run_id, latest_event],
        )?;
        conn.execute(
            "UPDATE runs SET status = 'aborted', end_time = COALESCE(end_time, ?2), abort_reason = COALESCE(abort_reason, 'Process restarted while run was active') WHERE run_id = ?1",
            params![run_id, latest_event],
        )?;
    }
    Ok(run_ids)
}

pub fn retention_eligible_run_ids(conn: &Connection, now_ms: i64) -> Result<Vec<String>, IngestError> {
    let mut stmt = conn.prepare(
        "SELECT run_id FROM runs WHERE retention_days IS NOT NULL
         AND (?1 - start_time) > (retention_days * 86400000)",
    )?;
    let rows = stmt.query_map(params![now_ms], |row| row.get::<_, String>(0))?;
    rows.collect::<Result<_, _>>().map_err(Into::into)
}
