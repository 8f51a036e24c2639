// src/workbook.rs

use crate::numbers;
use regex::Regex;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use time::OffsetDateTime;
use time::macros::format_description;
use tracing::{info, warn};
use umya_spreadsheet::Spreadsheet;

#[derive(Error, Debug)]
pub enum WorkbookError {
    #[error("template not found at {0}")]
    TemplateNotFound(PathBuf),

    #[error("could not read workbook {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("no sheet named '{day}' (available: {available:?})")]
    SheetNotFound { day: String, available: Vec<String> },

    #[error("no day sheet selected")]
    NoSheetSelected,

    #[error("invalid cell address '{0}'")]
    BadAddress(String),

    #[error("could not save {target}: {message}")]
    Persist { target: PathBuf, message: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode workbook: {0}")]
    Encode(#[from] umya_spreadsheet::XlsxError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveMode {
    /// Written to a temp file and renamed over the target.
    Replaced,
    /// The target could not be replaced; a timestamped sibling was written.
    Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistOutcome {
    pub saved_to: PathBuf,
    pub mode: SaveMode,
    pub backup: Option<PathBuf>,
    /// Why the fallback name was used.
    pub reason: Option<String>,
}

/// The daily report workbook: one sheet per day of the month, named "1".."31".
///
/// Owned by the orchestrator for a whole run. Cells are addressed as
/// column letters + row number ("T30"); values are plain numbers, no formula
/// evaluation happens here.
pub struct SpreadsheetGateway {
    book: Spreadsheet,
    template_path: PathBuf,
    sheet: Option<String>,
    backup_taken: bool,
}

impl SpreadsheetGateway {
    /// Load the template workbook from disk.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WorkbookError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(WorkbookError::TemplateNotFound(path.to_path_buf()));
        }
        let book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| WorkbookError::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        info!(path = %path.display(), sheets = book.get_sheet_collection().len(), "Template loaded");
        Ok(Self::from_book(book, path))
    }

    /// Wrap an already-loaded workbook that persists to `path`.
    pub fn from_book(book: Spreadsheet, path: impl Into<PathBuf>) -> Self {
        Self {
            book,
            template_path: path.into(),
            sheet: None,
            backup_taken: false,
        }
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    pub fn sheet_names(&self) -> Vec<String> {
        self.book
            .get_sheet_collection()
            .iter()
            .map(|ws| ws.get_name().to_string())
            .collect()
    }

    /// Make the sheet whose name is exactly `day` the active one.
    ///
    /// Selecting the same day again is a no-op. No calendar arithmetic is done
    /// here; callers wanting yesterday pass yesterday's day number.
    pub fn select_sheet(&mut self, day: &str) -> Result<&str, WorkbookError> {
        if self.book.get_sheet_by_name(day).is_none() {
            return Err(WorkbookError::SheetNotFound {
                day: day.to_string(),
                available: self.sheet_names(),
            });
        }
        if self.sheet.as_deref() != Some(day) {
            info!(sheet = %day, "Using day sheet");
            self.sheet = Some(day.to_string());
        }
        self.sheet.as_deref().ok_or(WorkbookError::NoSheetSelected)
    }

    pub fn selected_sheet(&self) -> Option<&str> {
        self.sheet.as_deref()
    }

    pub fn write(&mut self, address: &str, value: f64) -> Result<(), WorkbookError> {
        let address = normalize_address(address)?;
        let name = self.sheet.as_deref().ok_or(WorkbookError::NoSheetSelected)?;
        let sheet = self
            .book
            .get_sheet_by_name_mut(name)
            .ok_or(WorkbookError::NoSheetSelected)?;
        sheet.get_cell_mut(address.as_str()).set_value_number(value);
        Ok(())
    }

    /// Numeric value of a cell. Blank cells and text that holds no number read
    /// as `None`; numeric-looking text ("$1,234.50") is normalized.
    pub fn read(&self, address: &str) -> Result<Option<f64>, WorkbookError> {
        let address = normalize_address(address)?;
        let name = self.sheet.as_deref().ok_or(WorkbookError::NoSheetSelected)?;
        let sheet = self
            .book
            .get_sheet_by_name(name)
            .ok_or(WorkbookError::NoSheetSelected)?;
        let Some(cell) = sheet.get_cell(address.as_str()) else {
            return Ok(None);
        };
        if let Some(v) = cell.get_value_number() {
            return Ok(Some(v));
        }
        let raw = cell.get_value();
        if raw.trim().is_empty() {
            return Ok(None);
        }
        Ok(numbers::normalize(&raw))
    }

    /// Save the workbook over `target` as safely as the filesystem allows.
    ///
    /// The first save of a run may copy the on-disk target to a timestamped
    /// backup first. The workbook is written to a hidden temp file and renamed
    /// over the target; if that fails (typically the file is open elsewhere) a
    /// timestamped sibling is written instead and reported as a fallback save.
    pub fn persist(
        &mut self,
        target: &Path,
        make_backup: bool,
    ) -> Result<PersistOutcome, WorkbookError> {
        let stamp = timestamp();

        let mut backup = None;
        if make_backup && !self.backup_taken && target.is_file() {
            let backup_path = unique_sibling(target, "backup", &stamp);
            match fs::copy(target, &backup_path) {
                Ok(_) => {
                    info!(backup = %backup_path.display(), "Backup saved");
                    self.backup_taken = true;
                    backup = Some(backup_path);
                }
                Err(e) => warn!(error = %e, "Could not create backup (continuing)"),
            }
        }

        let tmp = temp_path(target);
        let reason = match self
            .write_to(&tmp)
            .and_then(|()| fs::rename(&tmp, target).map_err(WorkbookError::from))
        {
            Ok(()) => {
                info!(target = %target.display(), sheet = ?self.selected_sheet(), "Report saved (atomic replace)");
                return Ok(PersistOutcome {
                    saved_to: target.to_path_buf(),
                    mode: SaveMode::Replaced,
                    backup,
                    reason: None,
                });
            }
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                e.to_string()
            }
        };

        warn!(target = %target.display(), reason = %reason, "Could not overwrite, saving a copy");
        let fallback = unique_sibling(target, "saved", &stamp);
        match self.write_to(&fallback) {
            Ok(()) => {
                info!(saved_to = %fallback.display(), "Saved copy instead of overwriting");
                Ok(PersistOutcome {
                    saved_to: fallback,
                    mode: SaveMode::Fallback,
                    backup,
                    reason: Some(reason),
                })
            }
            Err(message) => {
                let _ = fs::remove_file(&fallback);
                tracing::error!(target = %target.display(), error = %message, "Fallback save failed");
                Err(WorkbookError::Persist {
                    target: target.to_path_buf(),
                    message: format!("{reason}; fallback: {message}"),
                })
            }
        }
    }

    fn write_to(&self, path: &Path) -> Result<(), WorkbookError> {
        let mut writer = BufWriter::new(File::create(path)?);
        umya_spreadsheet::writer::xlsx::write_writer(&self.book, &mut writer)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }
}

/// Upper-case and validate an A1-style address.
fn normalize_address(address: &str) -> Result<String, WorkbookError> {
    let upper = address.trim().to_ascii_uppercase();
    let re = Regex::new(r"^[A-Z]{1,3}[1-9][0-9]{0,6}$")
        .map_err(|_| WorkbookError::BadAddress(address.to_string()))?;
    if re.is_match(&upper) {
        Ok(upper)
    } else {
        Err(WorkbookError::BadAddress(address.to_string()))
    }
}

fn timestamp() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(format_description!(
        "[year][month][day]T[hour][minute][second]"
    ))
    .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

fn temp_path(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook.xlsx".to_string());
    target.with_file_name(format!(".{name}.tmp"))
}

/// `<stem>.<tag>_<stamp>.<ext>` next to `target`, suffixed `_n` if taken.
fn unique_sibling(target: &Path, tag: &str, stamp: &str) -> PathBuf {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook".to_string());
    let ext = target
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| "xlsx".to_string());

    let first = target.with_file_name(format!("{stem}.{tag}_{stamp}.{ext}"));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| target.with_file_name(format!("{stem}.{tag}_{stamp}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book_with_days(days: &[&str]) -> Spreadsheet {
        let mut book = umya_spreadsheet::new_file();
        for day in days {
            book.new_sheet(*day).unwrap();
        }
        book
    }

    fn save_template(dir: &Path, days: &[&str]) -> PathBuf {
        let path = dir.join("daily_report_template.xlsx");
        let book = book_with_days(days);
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();
        path
    }

    #[test]
    fn test_select_sheet_exact_match_and_idempotent() {
        let mut gw = SpreadsheetGateway::from_book(book_with_days(&["16", "17"]), "t.xlsx");
        assert_eq!(gw.select_sheet("17").unwrap(), "17");
        assert_eq!(gw.select_sheet("17").unwrap(), "17");
        assert_eq!(gw.selected_sheet(), Some("17"));

        match gw.select_sheet("7") {
            Err(WorkbookError::SheetNotFound { day, available }) => {
                assert_eq!(day, "7");
                assert!(available.contains(&"16".to_string()));
            }
            other => panic!("unexpected: {other:?}"),
        }
        // a failed selection leaves the previous one active
        assert_eq!(gw.selected_sheet(), Some("17"));
    }

    #[test]
    fn test_write_then_read_before_persist() {
        let mut gw = SpreadsheetGateway::from_book(book_with_days(&["17"]), "t.xlsx");
        gw.select_sheet("17").unwrap();
        gw.write("T30", 38.5).unwrap();
        gw.write("e10", 41.0).unwrap();
        assert_eq!(gw.read("T30").unwrap(), Some(38.5));
        assert_eq!(gw.read("E10").unwrap(), Some(41.0));
        assert_eq!(gw.read("Z9").unwrap(), None);
    }

    #[test]
    fn test_read_numeric_text() {
        let mut book = book_with_days(&["3"]);
        book.get_sheet_by_name_mut("3")
            .unwrap()
            .get_cell_mut("Z10")
            .set_value("$1,234.50");
        let mut gw = SpreadsheetGateway::from_book(book, "t.xlsx");
        gw.select_sheet("3").unwrap();
        assert_eq!(gw.read("Z10").unwrap(), Some(1234.5));
    }

    #[test]
    fn test_write_requires_sheet_and_valid_address() {
        let mut gw = SpreadsheetGateway::from_book(book_with_days(&["17"]), "t.xlsx");
        assert!(matches!(gw.write("T30", 1.0), Err(WorkbookError::NoSheetSelected)));
        gw.select_sheet("17").unwrap();
        assert!(matches!(gw.write("30T", 1.0), Err(WorkbookError::BadAddress(_))));
        assert!(matches!(gw.read("T0"), Err(WorkbookError::BadAddress(_))));
    }

    #[test]
    fn test_open_missing_template() {
        let dir = tempfile::tempdir().unwrap();
        let err = SpreadsheetGateway::open(dir.path().join("nope.xlsx")).err().unwrap();
        assert!(matches!(err, WorkbookError::TemplateNotFound(_)));
    }

    #[test]
    fn test_persist_replaces_target_and_backs_up_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_template(dir.path(), &["17"]);

        let mut gw = SpreadsheetGateway::open(&path).unwrap();
        gw.select_sheet("17").unwrap();
        gw.write("L7", 1234.56).unwrap();
        let outcome = gw.persist(&path, true).unwrap();
        assert_eq!(outcome.mode, SaveMode::Replaced);
        assert_eq!(outcome.saved_to, path);
        let backup = outcome.backup.expect("first save takes a backup");

        // the backup holds the pre-mutation state
        let mut old = SpreadsheetGateway::open(&backup).unwrap();
        old.select_sheet("17").unwrap();
        assert_eq!(old.read("L7").unwrap(), None);

        let mut reopened = SpreadsheetGateway::open(&path).unwrap();
        reopened.select_sheet("17").unwrap();
        assert_eq!(reopened.read("L7").unwrap(), Some(1234.56));

        gw.write("I12", 567.89).unwrap();
        let second = gw.persist(&path, true).unwrap();
        assert!(second.backup.is_none());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn test_persist_falls_back_when_target_cannot_be_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_template(dir.path(), &["17"]);
        let mut gw = SpreadsheetGateway::open(&path).unwrap();
        gw.select_sheet("17").unwrap();
        gw.write("Z10", 12.5).unwrap();

        // a directory squatting on the target name cannot be renamed over
        let locked = dir.path().join("locked.xlsx");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("owner.lock"), b"").unwrap();

        let outcome = gw.persist(&locked, false).unwrap();
        assert_eq!(outcome.mode, SaveMode::Fallback);
        assert_ne!(outcome.saved_to, locked);
        let name = outcome.saved_to.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("locked.saved_"), "{name}");
        assert!(outcome.reason.is_some());
        assert!(!temp_path(&locked).exists());

        let mut copy = SpreadsheetGateway::open(&outcome.saved_to).unwrap();
        copy.select_sheet("17").unwrap();
        assert_eq!(copy.read("Z10").unwrap(), Some(12.5));
    }

    #[test]
    fn test_persist_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut gw = SpreadsheetGateway::from_book(book_with_days(&["17"]), "t.xlsx");
        let target = dir.path().join("missing_dir").join("report.xlsx");
        let err = gw.persist(&target, true).unwrap_err();
        assert!(matches!(err, WorkbookError::Persist { .. }));
    }

    #[test]
    fn test_write_to_keeps_the_io_cause() {
        let dir = tempfile::tempdir().unwrap();
        let gw = SpreadsheetGateway::from_book(book_with_days(&["17"]), "t.xlsx");
        let err = gw
            .write_to(&dir.path().join("missing_dir").join("report.xlsx"))
            .unwrap_err();
        match err {
            WorkbookError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_selected_name_outlives_the_argument() {
        let mut gw = SpreadsheetGateway::from_book(book_with_days(&["9"]), "t.xlsx");
        let selected;
        {
            let day = String::from("9");
            selected = gw.select_sheet(&day).unwrap();
        }
        assert_eq!(selected, "9");
        assert_eq!(gw.selected_sheet(), Some("9"));
    }

    #[test]
    fn test_unique_sibling_names() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("daily.xlsx");
        let first = unique_sibling(&target, "saved", "20261019T101500");
        assert_eq!(first.file_name().unwrap(), "daily.saved_20261019T101500.xlsx");
        fs::write(&first, b"").unwrap();
        let second = unique_sibling(&target, "saved", "20261019T101500");
        assert_eq!(second.file_name().unwrap(), "daily.saved_20261019T101500_1.xlsx");
    }
}
