use anyhow::Result;
use rusqlite::{params, Row, Transaction};

use crate::{
    db::{
        helpers::{parse_datetime, parse_emotion, to_i64},
        Database,
    },
    models::{EmotionScores, Reading},
};

pub(super) fn insert_readings(
    tx: &Transaction<'_>,
    session_id: &str,
    readings: &[Reading],
) -> Result<()> {
    let mut stmt = tx.prepare(
        "INSERT INTO readings (
            session_id,
            seq,
            timestamp,
            dominant,
            happy,
            sad,
            angry,
            fear,
            surprise,
            neutral,
            disgust
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
    )?;

    for (seq, reading) in readings.iter().enumerate() {
        let scores = &reading.scores;
        stmt.execute(params![
            session_id,
            to_i64(seq as u64)?,
            reading.timestamp.to_rfc3339(),
            reading.dominant.as_str(),
            scores.happy,
            scores.sad,
            scores.angry,
            scores.fear,
            scores.surprise,
            scores.neutral,
            scores.disgust,
        ])?;
    }
    Ok(())
}

fn row_to_reading(row: &Row) -> Result<Reading> {
    let timestamp: String = row.get("timestamp")?;
    let dominant: String = row.get("dominant")?;

    Ok(Reading::new(
        parse_datetime(&timestamp, "timestamp")?,
        parse_emotion(&dominant)?,
        EmotionScores {
            happy: row.get("happy")?,
            sad: row.get("sad")?,
            angry: row.get("angry")?,
            fear: row.get("fear")?,
            surprise: row.get("surprise")?,
            neutral: row.get("neutral")?,
            disgust: row.get("disgust")?,
        },
    ))
}

impl Database {
    /// Archived reading log of a session, in time order.
    pub async fn get_readings_for_session(&self, session_id: &str) -> Result<Vec<Reading>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT
                    timestamp,
                    dominant,
                    happy,
                    sad,
                    angry,
                    fear,
                    surprise,
                    neutral,
                    disgust
                FROM readings
                WHERE session_id = ?1
                ORDER BY seq ASC",
            )?;

            let mut rows = stmt.query(params![session_id])?;
            let mut readings = Vec::new();
            while let Some(row) = rows.next()? {
                readings.push(row_to_reading(row)?);
            }
            Ok(readings)
        })
        .await
    }
}
