pub mod buffer;
pub mod export;
pub mod summary;
pub mod timeline;

pub use buffer::{ReadingBuffer, DEFAULT_CAPACITY};
pub use export::{build_tables, export, export_at, export_filename, ExportArtifact, ExportTables, XLSX_MIME};
pub use summary::{summarize, SummaryRow};
pub use timeline::{build_timeline, Episode};
