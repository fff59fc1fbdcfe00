use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::SystemTime;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{IoContext, Result, StoreError};
use crate::task::TaskStatus;

pub const DATA_DIR: &str = "data";
pub const TASK_EXT: &str = "doc";
pub const CATEGORY_EXT: &str = "json";
pub const LOCK_FILE: &str = ".write.lock";

/// Paths of every persisted file, relative to a configured root.
///
/// ```text
/// <root>/data/{todo,in_progress,completed}/<id>.doc
/// <root>/data/categories/<sanitized name>.json
/// <root>/data/daily/<YYYY-MM-DD>.doc
/// ```
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
    data_dir: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let data_dir = root.join(DATA_DIR);
        Self { root, data_dir }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for status in TaskStatus::ALL {
            let dir = self.partition_dir(status);
            fs::create_dir_all(&dir).at(&dir)?;
        }
        for dir in [self.categories_dir(), self.daily_dir()] {
            fs::create_dir_all(&dir).at(&dir)?;
        }
        Ok(())
    }

    pub fn partition_dir(&self, status: TaskStatus) -> PathBuf {
        self.data_dir.join(status.as_str())
    }

    pub fn task_path(&self, id: &str, status: TaskStatus) -> PathBuf {
        self.partition_dir(status)
            .join(format!("{}.{}", sanitize_filename(id), TASK_EXT))
    }

    pub fn categories_dir(&self) -> PathBuf {
        self.data_dir.join("categories")
    }

    pub fn category_path(&self, name: &str) -> PathBuf {
        self.categories_dir()
            .join(format!("{}.{}", sanitize_filename(name), CATEGORY_EXT))
    }

    pub fn daily_dir(&self) -> PathBuf {
        self.data_dir.join("daily")
    }

    pub fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir()
            .join(format!("{}.{}", date.format("%Y-%m-%d"), TASK_EXT))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.data_dir.join(LOCK_FILE)
    }
}

/// Replaces characters that are invalid in file names on common platforms.
pub fn sanitize_filename(name: &str) -> String {
    static INVALID: OnceLock<Regex> = OnceLock::new();
    let re = INVALID.get_or_init(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("regex"));
    re.replace_all(name, "_").to_string()
}

/// Files in `dir` with extension `ext`, sorted by path. A missing directory is empty.
pub fn list_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(StoreError::io(dir, err)),
    };
    let mut entries = Vec::new();
    for entry in read_dir {
        let path = entry.at(dir)?.path();
        if path.is_file() && path.extension().map(|e| e == ext).unwrap_or(false) {
            entries.push(path);
        }
    }
    entries.sort();
    Ok(entries)
}

pub fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_string()
}

pub fn modified_time(path: &Path) -> SystemTime {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

/// Reads a file, treating a missing file as `None`.
pub fn read_optional(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

/// Removes a file, returning whether it existed.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed file");
            Ok(true)
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StoreError::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_filename("a/b:c*d?"), "a_b_c_d_");
        assert_eq!(sanitize_filename("Work"), "Work");
    }

    #[test]
    fn paths_follow_partition_layout() {
        let layout = DataLayout::new("/srv/plan");
        assert_eq!(
            layout.task_path("task_1", TaskStatus::InProgress),
            PathBuf::from("/srv/plan/data/in_progress/task_1.doc")
        );
        assert_eq!(
            layout.category_path("Home/Garden"),
            PathBuf::from("/srv/plan/data/categories/Home_Garden.json")
        );
        let date = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            layout.daily_path(date),
            PathBuf::from("/srv/plan/data/daily/2026-10-18.doc")
        );
    }

    #[test]
    fn list_files_filters_by_extension_and_tolerates_missing_dir() {
        let temp = TempDir::new().expect("tempdir");
        let layout = DataLayout::new(temp.path());
        assert!(list_files(&layout.partition_dir(TaskStatus::Todo), TASK_EXT)
            .expect("list")
            .is_empty());
        layout.ensure_dirs().expect("dirs");
        let dir = layout.partition_dir(TaskStatus::Todo);
        fs::write(dir.join("b.doc"), "").expect("write");
        fs::write(dir.join("a.doc"), "").expect("write");
        fs::write(dir.join("notes.txt"), "").expect("write");
        let files = list_files(&dir, TASK_EXT).expect("list");
        let stems: Vec<String> = files.iter().map(|p| file_stem(p)).collect();
        assert_eq!(stems, vec!["a", "b"]);
    }

    #[test]
    fn remove_if_exists_reports_presence() {
        let temp = TempDir::new().expect("tempdir");
        let path = temp.path().join("x.doc");
        assert!(!remove_if_exists(&path).expect("remove"));
        fs::write(&path, "x").expect("write");
        assert!(remove_if_exists(&path).expect("remove"));
    }
}
