//! Two-sheet workbook export of a reading log.
//!
//! The tables are built first as plain data ([`ExportTables`]) and only then
//! written into an xlsx container, so the layout can be checked without
//! parsing the workbook.

use std::fmt;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;

use crate::models::{Emotion, Reading};

use super::summary::SummaryRow;

pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

pub const DETAILED_SHEET: &str = "Detailed_Log";
pub const SUMMARY_SHEET: &str = "Summary";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const FILENAME_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const PERCENT_NUM_FORMAT: &str = "0.00\"%\"";
const PERCENT_COLUMN_WIDTH: f64 = 12.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Cell {
    Text(String),
    Count(u64),
    Percent(f64),
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Text(text) => f.write_str(text),
            Cell::Count(count) => write!(f, "{count}"),
            Cell::Percent(value) => write!(f, "{value:.2}%"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Table {
    pub name: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportTables {
    pub detailed: Table,
    pub summary: Table,
}

#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime: &'static str,
}

/// Builds the detailed and summary tables. `None` when there is nothing to export.
pub fn build_tables(readings: &[Reading], summary: &[SummaryRow]) -> Option<ExportTables> {
    if readings.is_empty() {
        return None;
    }

    let mut detailed_headers = vec!["Timestamp".to_string(), "Dominant_Emotion".to_string()];
    detailed_headers.extend(Emotion::ALL.iter().map(|emotion| emotion.as_str().to_string()));

    let detailed_rows = readings
        .iter()
        .map(|reading| {
            let mut row = Vec::with_capacity(2 + Emotion::ALL.len());
            row.push(Cell::Text(
                reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ));
            row.push(Cell::Text(reading.dominant.as_str().to_string()));
            row.extend(reading.scores.iter().map(|(_, score)| Cell::Percent(score)));
            row
        })
        .collect();

    let summary_rows = summary
        .iter()
        .map(|row| {
            vec![
                Cell::Text(row.emotion.as_str().to_string()),
                Cell::Count(row.count),
                Cell::Percent(row.percentage),
            ]
        })
        .collect();

    Some(ExportTables {
        detailed: Table {
            name: DETAILED_SHEET,
            headers: detailed_headers,
            rows: detailed_rows,
        },
        summary: Table {
            name: SUMMARY_SHEET,
            headers: vec![
                "Emotion".to_string(),
                "Count".to_string(),
                "Percentage".to_string(),
            ],
            rows: summary_rows,
        },
    })
}

/// Suggested download name, unique per subject and second.
pub fn export_filename(subject_id: &str, exported_at: DateTime<Utc>) -> String {
    format!(
        "subject_{}_emotions_{}.xlsx",
        sanitize_subject(subject_id),
        exported_at.format(FILENAME_TIMESTAMP_FORMAT)
    )
}

fn sanitize_subject(subject_id: &str) -> String {
    let cleaned: String = subject_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else {
        cleaned
    }
}

pub fn export(
    subject_id: &str,
    readings: &[Reading],
    summary: &[SummaryRow],
) -> Result<Option<ExportArtifact>> {
    export_at(subject_id, readings, summary, Utc::now())
}

pub fn export_at(
    subject_id: &str,
    readings: &[Reading],
    summary: &[SummaryRow],
    exported_at: DateTime<Utc>,
) -> Result<Option<ExportArtifact>> {
    let Some(tables) = build_tables(readings, summary) else {
        return Ok(None);
    };

    let bytes = write_workbook(&tables)?;
    Ok(Some(ExportArtifact {
        bytes,
        filename: export_filename(subject_id, exported_at),
        mime: XLSX_MIME,
    }))
}

fn write_workbook(tables: &ExportTables) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();
    let percent_format = Format::new().set_num_format(PERCENT_NUM_FORMAT);

    for table in [&tables.detailed, &tables.summary] {
        let sheet = workbook.add_worksheet();
        write_table(sheet, table, &header_format, &percent_format)
            .with_context(|| format!("failed to write sheet {}", table.name))?;
    }

    workbook
        .save_to_buffer()
        .context("failed to serialize workbook")
}

fn write_table(
    sheet: &mut Worksheet,
    table: &Table,
    header_format: &Format,
    percent_format: &Format,
) -> Result<()> {
    sheet.set_name(table.name)?;

    for (col, header) in table.headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, header.as_str(), header_format)?;
    }

    let mut percent_columns = Vec::new();
    for (idx, row) in table.rows.iter().enumerate() {
        let row_num = idx as u32 + 1;
        for (col, cell) in row.iter().enumerate() {
            let col = col as u16;
            match cell {
                Cell::Text(text) => {
                    sheet.write_string(row_num, col, text.as_str())?;
                }
                Cell::Count(count) => {
                    sheet.write_number(row_num, col, *count as f64)?;
                }
                Cell::Percent(value) => {
                    sheet.write_number_with_format(row_num, col, *value, percent_format)?;
                    if !percent_columns.contains(&col) {
                        percent_columns.push(col);
                    }
                }
            }
        }
    }

    for col in percent_columns {
        sheet.set_column_width(col, PERCENT_COLUMN_WIDTH)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EmotionScores;
    use crate::readings::summarize;
    use chrono::TimeZone;

    fn sample_log() -> Vec<Reading> {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let mut scores = EmotionScores::default();
        scores.happy = 81.25;
        scores.neutral = 18.75;
        vec![
            Reading::new(at, Emotion::Happy, scores),
            Reading::new(
                at + chrono::Duration::seconds(2),
                Emotion::Sad,
                EmotionScores::pure(Emotion::Sad),
            ),
        ]
    }

    #[test]
    fn empty_log_exports_nothing() {
        assert!(build_tables(&[], &[]).is_none());
        assert!(export("P1", &[], &[]).unwrap().is_none());
    }

    #[test]
    fn detailed_table_layout() {
        let readings = sample_log();
        let summary = summarize(&readings).unwrap();
        let tables = build_tables(&readings, &summary).unwrap();

        assert_eq!(tables.detailed.name, "Detailed_Log");
        assert_eq!(
            tables.detailed.headers,
            vec![
                "Timestamp", "Dominant_Emotion", "happy", "sad", "angry", "fear", "surprise",
                "neutral", "disgust"
            ]
        );
        let first: Vec<String> = tables.detailed.rows[0].iter().map(|c| c.to_string()).collect();
        assert_eq!(first[0], "2024-03-09 14:05:07");
        assert_eq!(first[1], "happy");
        assert_eq!(first[2], "81.25%");
        assert_eq!(first[7], "18.75%");
        assert_eq!(first[8], "0.00%");
    }

    #[test]
    fn summary_table_layout() {
        let readings = sample_log();
        let summary = summarize(&readings).unwrap();
        let tables = build_tables(&readings, &summary).unwrap();

        assert_eq!(tables.summary.name, "Summary");
        assert_eq!(tables.summary.headers, vec!["Emotion", "Count", "Percentage"]);
        assert_eq!(
            tables.summary.rows[0],
            vec![
                Cell::Text("happy".into()),
                Cell::Count(1),
                Cell::Percent(50.0)
            ]
        );
        assert_eq!(tables.summary.rows[1][2].to_string(), "50.00%");
    }

    #[test]
    fn filename_embeds_subject_and_second() {
        let at = Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 58).unwrap();
        assert_eq!(
            export_filename("P12345", at),
            "subject_P12345_emotions_20241231_235958.xlsx"
        );
        assert_eq!(
            export_filename("../ward 7", at),
            "subject____ward_7_emotions_20241231_235958.xlsx"
        );
    }

    #[test]
    fn artifact_is_a_zip_container() {
        let readings = sample_log();
        let summary = summarize(&readings).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let artifact = export_at("P1", &readings, &summary, at).unwrap().unwrap();

        assert_eq!(artifact.mime, XLSX_MIME);
        assert_eq!(artifact.filename, "subject_P1_emotions_20240102_030405.xlsx");
        assert!(artifact.bytes.starts_with(b"PK"));
    }
}
