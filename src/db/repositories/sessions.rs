use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::{
    db::{
        helpers::{parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u64},
        Database,
    },
    models::{Reading, SessionRecord, SessionStatus},
};

use super::readings::insert_readings;

/// End reason written for sessions left Running by a crash.
pub const INTERRUPTED_REASON: &str = "interrupted";

const SESSION_COLUMNS: &str = "id, subject_id, started_at, ended_at, status, duration_ms, interval_ms, reading_count, end_reason, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<SessionRecord> {
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let status: String = row.get("status")?;
    let duration_ms: i64 = row.get("duration_ms")?;
    let interval_ms: i64 = row.get("interval_ms")?;
    let reading_count: i64 = row.get("reading_count")?;

    Ok(SessionRecord {
        id: row.get("id")?,
        subject_id: row.get("subject_id")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        ended_at: parse_optional_datetime(ended_at, "ended_at")?,
        status: parse_status(&status)?,
        duration_ms: to_u64(duration_ms, "duration_ms")?,
        interval_ms: to_u64(interval_ms, "interval_ms")?,
        reading_count: to_u64(reading_count, "reading_count")?,
        end_reason: row.get("end_reason")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

impl Database {
    pub async fn insert_session(&self, session: &SessionRecord) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, subject_id, started_at, ended_at, status, duration_ms, interval_ms, reading_count, end_reason, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.id,
                    record.subject_id,
                    record.started_at.to_rfc3339(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.status.as_str(),
                    to_i64(record.duration_ms)?,
                    to_i64(record.interval_ms)?,
                    to_i64(record.reading_count)?,
                    record.end_reason,
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .with_context(|| "failed to insert session")?;
            Ok(())
        })
        .await
    }

    pub async fn update_session_progress(
        &self,
        session_id: &str,
        reading_count: u64,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET reading_count = ?1,
                     updated_at = ?2
                 WHERE id = ?3 AND status = 'Running'",
                params![to_i64(reading_count)?, updated_at.to_rfc3339(), session_id],
            )?;
            Ok(())
        })
        .await
    }

    /// Writes the final state of a finished session together with its
    /// reading log, replacing any readings stored before.
    pub async fn archive_session(&self, session: &SessionRecord, readings: &[Reading]) -> Result<()> {
        if !session.status.is_finished() {
            return Err(anyhow!(
                "session {} is {}, only finished sessions are archived",
                session.id,
                session.status.as_str()
            ));
        }

        let record = session.clone();
        let readings = readings.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let updated = tx.execute(
                "UPDATE sessions
                 SET status = ?1,
                     ended_at = ?2,
                     reading_count = ?3,
                     end_reason = ?4,
                     updated_at = ?5
                 WHERE id = ?6",
                params![
                    record.status.as_str(),
                    record.ended_at.as_ref().map(|dt| dt.to_rfc3339()),
                    to_i64(record.reading_count)?,
                    record.end_reason,
                    record.updated_at.to_rfc3339(),
                    record.id,
                ],
            )?;
            if updated == 0 {
                return Err(anyhow!("session {} not found", record.id));
            }

            tx.execute(
                "DELETE FROM readings WHERE session_id = ?1",
                params![record.id],
            )?;
            insert_readings(&tx, &record.id, &readings)?;

            tx.commit().context("failed to commit session archive")?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;

            let session = stmt
                .query_row(params![session_id], |row| Ok(row_to_session(row)))
                .optional()?
                .transpose()?;
            Ok(session)
        })
        .await
    }

    pub async fn get_incomplete_sessions(&self) -> Result<Vec<SessionRecord>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 WHERE status = 'Running'
                 ORDER BY started_at DESC"
            ))?;

            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    pub async fn mark_session_interrupted(
        &self,
        session_id: &str,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "UPDATE sessions
                 SET status = ?1,
                     ended_at = COALESCE(ended_at, ?2),
                     end_reason = ?3,
                     updated_at = ?4
                 WHERE id = ?5",
                params![
                    SessionStatus::Stopped.as_str(),
                    ended_at.to_rfc3339(),
                    INTERRUPTED_REASON,
                    ended_at.to_rfc3339(),
                    session_id,
                ],
            )?;
            Ok(())
        })
        .await
    }

    /// Finished sessions, newest first, optionally for one subject.
    pub async fn list_sessions(
        &self,
        subject_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionRecord>> {
        let subject_id = subject_id.map(str::to_string);
        let limit = limit as i64;
        let offset = offset as i64;
        self.execute(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS}
                 FROM sessions
                 WHERE status IN ('Stopped', 'Completed')
                   AND (?1 IS NULL OR subject_id = ?1)
                 ORDER BY started_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;

            let mut rows = stmt.query(params![subject_id, limit, offset])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Readings go with the session through `ON DELETE CASCADE`.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let rows_affected =
                conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            Ok(rows_affected > 0)
        })
        .await
    }
}
