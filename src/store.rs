use crate::error::{Result, RevenueError};
use crate::ingestion::{read_raw_sheet_file, write_raw_sheet_file};
use crate::table::RawSheet;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// The full named sheet set one run reads and writes, stamped with the store
/// version it was loaded at.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Workbook {
    version: u64,
    sheets: BTreeMap<String, RawSheet>,
}

impl Workbook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(version: u64) -> Self {
        Self {
            version,
            sheets: BTreeMap::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn sheet(&self, name: &str) -> Option<&RawSheet> {
        self.sheets.get(name)
    }

    pub fn require_sheet(&self, name: &str) -> Result<&RawSheet> {
        self.sheets
            .get(name)
            .ok_or_else(|| RevenueError::MissingTable(name.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, sheet: RawSheet) {
        self.sheets.insert(name.into(), sheet);
    }

    pub fn remove(&mut self, name: &str) -> Option<RawSheet> {
        self.sheets.remove(name)
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.keys().map(String::as_str)
    }

    pub fn sheets(&self) -> &BTreeMap<String, RawSheet> {
        &self.sheets
    }
}

/// Persisted-state repository for the cumulative tables. A run loads the
/// whole workbook, transforms it, and commits it back in one call. Commits
/// carry the version they were loaded at so two runs cannot interleave.
pub trait WorkbookStore {
    fn load(&self) -> Result<Workbook>;

    /// Replaces the stored sheet set. Fails with `StaleWorkbook` and writes
    /// nothing if the store moved on since `workbook` was loaded.
    fn commit(&mut self, workbook: &Workbook) -> Result<u64>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    current: Workbook,
}

impl InMemoryStore {
    pub fn new(sheets: BTreeMap<String, RawSheet>) -> Self {
        Self {
            current: Workbook { version: 0, sheets },
        }
    }

    pub fn version(&self) -> u64 {
        self.current.version
    }
}

impl WorkbookStore for InMemoryStore {
    fn load(&self) -> Result<Workbook> {
        Ok(self.current.clone())
    }

    fn commit(&mut self, workbook: &Workbook) -> Result<u64> {
        if workbook.version != self.current.version {
            return Err(RevenueError::StaleWorkbook {
                expected: workbook.version,
                found: self.current.version,
            });
        }
        self.current = Workbook {
            version: self.current.version + 1,
            sheets: workbook.sheets.clone(),
        };
        debug!("In-memory workbook committed at version {}", self.current.version);
        Ok(self.current.version)
    }
}

const VERSION_FILE: &str = ".version";
const SHEET_EXTENSION: &str = "csv";
const STAGING_EXTENSION: &str = "csv.staged";

/// One CSV file per sheet inside a directory, plus a `.version` file.
#[derive(Debug, Clone)]
pub struct CsvDirectoryStore {
    root: PathBuf,
}

impl CsvDirectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// A missing version file reads as 0; a corrupt one is an error.
    fn read_version(&self) -> Result<u64> {
        let path = self.root.join(VERSION_FILE);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        text.trim().parse().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("corrupt version file {}: '{}'", path.display(), text.trim()),
            )
            .into()
        })
    }

    fn sheet_path(&self, name: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, extension))
    }
}

impl WorkbookStore for CsvDirectoryStore {
    fn load(&self) -> Result<Workbook> {
        let mut workbook = Workbook::with_version(self.read_version()?);

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(SHEET_EXTENSION) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            workbook.insert(name.to_string(), read_raw_sheet_file(&path)?);
        }

        debug!(
            "Loaded {} sheets from {} at version {}",
            workbook.sheets.len(),
            self.root.display(),
            workbook.version
        );
        Ok(workbook)
    }

    fn commit(&mut self, workbook: &Workbook) -> Result<u64> {
        let found = self.read_version()?;
        if workbook.version != found {
            return Err(RevenueError::StaleWorkbook {
                expected: workbook.version,
                found,
            });
        }

        // Stage every sheet before touching any live file.
        for (name, sheet) in &workbook.sheets {
            write_raw_sheet_file(sheet, self.sheet_path(name, STAGING_EXTENSION))?;
        }

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            let stale = path.extension().and_then(|e| e.to_str()) == Some(SHEET_EXTENSION)
                && path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|name| !workbook.sheets.contains_key(name));
            if stale {
                fs::remove_file(path)?;
            }
        }

        for name in workbook.sheets.keys() {
            fs::rename(
                self.sheet_path(name, STAGING_EXTENSION),
                self.sheet_path(name, SHEET_EXTENSION),
            )?;
        }

        let version = found + 1;
        fs::write(self.root.join(VERSION_FILE), version.to_string())?;
        info!(
            "Committed {} sheets to {} (version {})",
            workbook.sheets.len(),
            self.root.display(),
            version
        );
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(value: &str) -> RawSheet {
        RawSheet::new(vec![vec!["Header".to_string()], vec![value.to_string()]])
    }

    #[test]
    fn test_in_memory_commit_bumps_version() {
        let mut store = InMemoryStore::new(BTreeMap::from([("A".to_string(), sheet("1"))]));
        let mut workbook = store.load().unwrap();
        workbook.insert("B", sheet("2"));

        assert_eq!(store.commit(&workbook).unwrap(), 1);
        let reloaded = store.load().unwrap();
        assert_eq!(reloaded.version(), 1);
        assert!(reloaded.sheet("B").is_some());
    }

    #[test]
    fn test_stale_commit_is_rejected_without_writing() {
        let mut store = InMemoryStore::new(BTreeMap::from([("A".to_string(), sheet("1"))]));
        let first = store.load().unwrap();
        let mut second = store.load().unwrap();

        store.commit(&first).unwrap();
        second.insert("A", sheet("overwritten"));

        assert!(matches!(
            store.commit(&second),
            Err(RevenueError::StaleWorkbook { expected: 0, found: 1 })
        ));
        assert_eq!(store.load().unwrap().sheet("A"), Some(&sheet("1")));
    }

    #[test]
    fn test_missing_sheet_is_a_lookup_error() {
        let workbook = Workbook::new();
        assert!(matches!(
            workbook.require_sheet("FY 25-26"),
            Err(RevenueError::MissingTable(_))
        ));
    }

    #[test]
    fn test_csv_directory_store_round_trip() {
        let dir = std::env::temp_dir().join(format!(
            "subscription-revenue-store-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();

        let mut store = CsvDirectoryStore::new(&dir);
        let mut workbook = store.load().unwrap();
        assert_eq!(workbook.version(), 0);
        workbook.insert("Active Subscriber", sheet("Acme, Inc"));
        workbook.insert("Scratch", sheet("x"));
        store.commit(&workbook).unwrap();

        let mut reloaded = store.load().unwrap();
        assert_eq!(reloaded.version(), 1);
        assert_eq!(reloaded.sheet("Active Subscriber"), Some(&sheet("Acme, Inc")));

        reloaded.remove("Scratch");
        store.commit(&reloaded).unwrap();
        assert!(store.load().unwrap().sheet("Scratch").is_none());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_version_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!(
            "subscription-revenue-version-{}",
            std::process::id()
        ));
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(VERSION_FILE), "seven").unwrap();

        let mut store = CsvDirectoryStore::new(&dir);
        assert!(matches!(store.load(), Err(RevenueError::Io(_))));

        let mut workbook = Workbook::new();
        workbook.insert("Scratch", sheet("x"));
        assert!(matches!(store.commit(&workbook), Err(RevenueError::Io(_))));
        assert_eq!(fs::read_to_string(dir.join(VERSION_FILE)).unwrap(), "seven");

        fs::remove_dir_all(&dir).unwrap();
    }
}
