//! Report writers
//!
//! Both writers take rows that share one set of columns. The header comes
//! from the first row; every row is written in that column order, and a
//! column a row doesn't have is written empty.
//!
//! - CSV: timestamp line, header, rows. Values containing the delimiter,
//!   quotes or newlines are quoted.
//! - Rotating log: the same lines appended to a log file with a custom
//!   delimiter, rolled over to numbered backups once it grows past a size
//!   limit. Values containing the delimiter, quotes or newlines are quoted
//!   the same way.

use std::fmt::Display;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use tracing::{debug, warn};

use super::enrich::EnrichedRecord;

/// Format of the generation timestamp written as the first line
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Default delimiter for the rotating log
pub const DEFAULT_LOG_DELIMITER: &str = "|";

/// Default size at which the rotating log rolls over
pub const DEFAULT_LOG_MAX_BYTES: u64 = 10 * 1024 * 1024;

/// Default number of rotated log files kept
pub const DEFAULT_LOG_BACKUP_COUNT: u32 = 10;

/// A row that can be written by the report writers
pub trait ReportRow {
    /// Column names, in output order
    fn columns(&self) -> Vec<String>;

    /// Rendered value for `column`, `None` if the row has no such column
    fn value(&self, column: &str) -> Option<String>;
}

impl ReportRow for EnrichedRecord {
    fn columns(&self) -> Vec<String> {
        Self::COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn value(&self, column: &str) -> Option<String> {
        EnrichedRecord::value(self, column)
    }
}

/// Ordered key/value pairs, e.g. `vec![("foo", 1), ("bar", 2)]`
impl<K: AsRef<str>, V: Display> ReportRow for Vec<(K, V)> {
    fn columns(&self) -> Vec<String> {
        self.iter().map(|(k, _)| k.as_ref().to_string()).collect()
    }

    fn value(&self, column: &str) -> Option<String> {
        self.iter()
            .find(|(k, _)| k.as_ref() == column)
            .map(|(_, v)| v.to_string())
    }
}

/// Render a timestamp for the first line of a report
pub fn format_timestamp(generated_at: &DateTime<Local>) -> String {
    generated_at.format(TIMESTAMP_FORMAT).to_string()
}

fn header<R: ReportRow>(rows: &[R]) -> Option<Vec<String>> {
    rows.first().map(ReportRow::columns)
}

fn row_values<R: ReportRow>(row: &R, columns: &[String]) -> Vec<String> {
    columns
        .iter()
        .map(|column| row.value(column).unwrap_or_default())
        .collect()
}

fn escape_csv(value: &str) -> String {
    escape_field(value, ",")
}

/// Quote `value` if it contains `delimiter`, a quote or a line break
fn escape_field(value: &str, delimiter: &str) -> String {
    let needs_quotes = (!delimiter.is_empty() && value.contains(delimiter))
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');
    if needs_quotes {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Render rows as CSV text.
///
/// The first line holds `timestamp` padded with empty fields to the header
/// width. With no rows only the timestamp line is produced.
pub fn format_csv<R: ReportRow>(rows: &[R], timestamp: &str) -> String {
    let mut output = String::new();

    let Some(columns) = header(rows) else {
        output.push_str(&escape_csv(timestamp));
        output.push('\n');
        return output;
    };

    let mut first_line = vec![escape_csv(timestamp)];
    first_line.resize(columns.len().max(1), String::new());
    output.push_str(&first_line.join(","));
    output.push('\n');

    let header: Vec<String> = columns.iter().map(|c| escape_csv(c)).collect();
    output.push_str(&header.join(","));
    output.push('\n');

    for row in rows {
        let values: Vec<String> = row_values(row, &columns)
            .iter()
            .map(|v| escape_csv(v))
            .collect();
        output.push_str(&values.join(","));
        output.push('\n');
    }

    output
}

/// Write rows to a CSV file at `out_path`, replacing any existing file
pub fn write_csv<R: ReportRow>(rows: &[R], out_path: &Path, timestamp: &str) -> io::Result<()> {
    if rows.is_empty() {
        warn!(
            "No rows to write; {} will only contain the timestamp",
            out_path.display()
        );
    }
    if let Some(parent) = out_path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    fs::write(out_path, format_csv(rows, timestamp))
}

/// Append-only log file that rolls over to `<name>.1` .. `<name>.N`
#[derive(Debug, Clone)]
pub struct RotatingLogWriter {
    path: PathBuf,
    delimiter: String,
    max_bytes: u64,
    backup_count: u32,
}

impl RotatingLogWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            delimiter: DEFAULT_LOG_DELIMITER.to_string(),
            max_bytes: DEFAULT_LOG_MAX_BYTES,
            backup_count: DEFAULT_LOG_BACKUP_COUNT,
        }
    }

    #[must_use]
    pub fn with_delimiter(mut self, delimiter: impl Into<String>) -> Self {
        self.delimiter = delimiter.into();
        self
    }

    /// Size limit in bytes; 0 disables rotation
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    #[must_use]
    pub fn with_backup_count(mut self, backup_count: u32) -> Self {
        self.backup_count = backup_count;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append the timestamp line, header and rows to the log
    pub fn write_rows<R: ReportRow>(&self, rows: &[R], timestamp: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }

        let mut lines = vec![timestamp.to_string()];
        if let Some(columns) = header(rows) {
            lines.push(self.join(&columns));
            lines.extend(rows.iter().map(|row| self.join(&row_values(row, &columns))));
        }

        let mut file = self.open()?;
        let mut size = file.metadata()?.len();
        for line in lines {
            let line = format!("{}\n", line);
            if self.should_roll_over(size, line.len()) {
                drop(file);
                self.roll_over()?;
                file = self.open()?;
                size = 0;
            }
            file.write_all(line.as_bytes())?;
            size += line.len() as u64;
        }
        file.flush()
    }

    fn join(&self, values: &[String]) -> String {
        values
            .iter()
            .map(|value| escape_field(value, &self.delimiter))
            .collect::<Vec<_>>()
            .join(self.delimiter.as_str())
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
    }

    fn should_roll_over(&self, current_size: u64, incoming: usize) -> bool {
        self.max_bytes > 0 && current_size > 0 && current_size + incoming as u64 >= self.max_bytes
    }

    fn backup_path(&self, index: u32) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(format!(".{}", index));
        PathBuf::from(name)
    }

    /// Shift `<name>.i` to `<name>.(i+1)` and move the live file to
    /// `<name>.1`. Without backups the live file is truncated.
    fn roll_over(&self) -> io::Result<()> {
        debug!("Rolling over {}", self.path.display());
        if self.backup_count == 0 {
            File::create(&self.path)?;
            return Ok(());
        }

        for index in (1..self.backup_count).rev() {
            let from = self.backup_path(index);
            if from.exists() {
                fs::rename(&from, self.backup_path(index + 1))?;
            }
        }
        fs::rename(&self.path, self.backup_path(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn foo_bar_rows() -> Vec<Vec<(&'static str, i32)>> {
        vec![
            vec![("foo", 1), ("bar", 2)],
            vec![("bar", 4), ("foo", 3)],
        ]
    }

    #[test]
    fn test_csv_columns_come_from_first_row() {
        let csv = format_csv(&foo_bar_rows(), "foo_date");
        assert_eq!(csv, "foo_date,\nfoo,bar\n1,2\n3,4\n");
    }

    #[test]
    fn test_csv_quotes_values_with_commas() {
        let rows = vec![vec![("tags", "a, b"), ("title", "say \"hi\"")]];
        let csv = format_csv(&rows, "ts");
        assert_eq!(csv, "ts,\ntags,title\n\"a, b\",\"say \"\"hi\"\"\"\n");
    }

    #[test]
    fn test_csv_missing_column_is_empty() {
        let rows = vec![vec![("a", 1), ("b", 2)], vec![("a", 3)]];
        assert_eq!(format_csv(&rows, "ts"), "ts,\na,b\n1,2\n3,\n");
    }

    #[test]
    fn test_csv_without_rows_has_only_timestamp() {
        let rows: Vec<Vec<(&str, i32)>> = Vec::new();
        assert_eq!(format_csv(&rows, "ts"), "ts\n");
    }

    #[test]
    fn test_write_csv_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("AGOLUsage").join("test.csv");

        write_csv(&foo_bar_rows(), &out_path, "foo_date").unwrap();

        let content = fs::read_to_string(&out_path).unwrap();
        assert_eq!(content, "foo_date,\nfoo,bar\n1,2\n3,4\n");
    }

    #[test]
    fn test_rotating_log_output() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("test.csv");

        RotatingLogWriter::new(&out_path)
            .write_rows(&foo_bar_rows(), "foo_date")
            .unwrap();

        let content = fs::read_to_string(&out_path).unwrap();
        assert_eq!(content, "foo_date\nfoo|bar\n1|2\n3|4\n");
    }

    #[test]
    fn test_rotating_log_appends() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("usage.log");
        let writer = RotatingLogWriter::new(&out_path).with_delimiter(";");

        writer.write_rows(&foo_bar_rows(), "first").unwrap();
        writer.write_rows(&foo_bar_rows(), "second").unwrap();

        let content = fs::read_to_string(&out_path).unwrap();
        assert_eq!(
            content,
            "first\nfoo;bar\n1;2\n3;4\nsecond\nfoo;bar\n1;2\n3;4\n"
        );
    }

    #[test]
    fn test_rotating_log_quotes_values_with_delimiter() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("usage.log");
        let rows = vec![vec![("title", "Roads | Highways"), ("tags", "a, b")]];

        RotatingLogWriter::new(&out_path)
            .write_rows(&rows, "ts")
            .unwrap();

        let content = fs::read_to_string(&out_path).unwrap();
        assert_eq!(content, "ts\ntitle|tags\n\"Roads | Highways\"|a, b\n");
    }

    #[test]
    fn test_rotating_log_rolls_over_and_keeps_backups() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("usage.log");
        // No line is longer than 4 bytes, so a file never holds more than two
        let writer = RotatingLogWriter::new(&out_path)
            .with_max_bytes(9)
            .with_backup_count(2);
        let rows = vec![
            vec![("a", "111")],
            vec![("a", "222")],
            vec![("a", "333")],
        ];

        writer.write_rows(&rows, "ts0").unwrap();

        // Lines: ts0, a, 111, 222, 333 -> [ts0 a] [111 222] [333]
        assert_eq!(fs::read_to_string(&out_path).unwrap(), "333\n");
        assert_eq!(
            fs::read_to_string(writer.backup_path(1)).unwrap(),
            "111\n222\n"
        );
        assert_eq!(
            fs::read_to_string(writer.backup_path(2)).unwrap(),
            "ts0\na\n"
        );
        assert!(!writer.backup_path(3).exists());
    }

    #[test]
    fn test_rotating_log_without_backups_truncates() {
        let dir = tempdir().unwrap();
        let out_path = dir.path().join("usage.log");
        let writer = RotatingLogWriter::new(&out_path)
            .with_max_bytes(9)
            .with_backup_count(0);

        writer.write_rows(&[vec![("a", "111")]], "ts0").unwrap();

        assert_eq!(fs::read_to_string(&out_path).unwrap(), "111\n");
        assert!(!writer.backup_path(1).exists());
    }
}
