//! Per-day checklist documents under `data/daily/<YYYY-MM-DD>.doc`.
//!
//! Each document has a `date` header and a pending section of `- [<id>] <title>` lines.

use chrono::NaiveDate;
use serde::Serialize;
use serde_yaml::{Mapping, Value};

use crate::app::{format_date, parse_date, App};
use crate::document::{self, section_range};
use crate::error::Result;
use crate::layout::{file_stem, list_files, read_optional, TASK_EXT};
use crate::lock::{write_atomic, WriteGuard};
use crate::task::Task;

pub const DAILY_TITLE: &str = "# Today's Tasks";
pub const PENDING_HEADING: &str = "## Pending";
const LEGACY_PENDING_HEADING: &str = "## 待办任务";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyEntry {
    pub id: String,
    pub title: String,
}

pub struct DailyIndex<'a> {
    app: &'a App,
}

impl<'a> DailyIndex<'a> {
    pub(crate) fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Appends `- [task_id] title` to the pending section of `date` (default today).
    /// Returns `false` when the section already references the task.
    pub fn add(&self, task_id: &str, title: &str, date: Option<NaiveDate>) -> Result<bool> {
        let guard = self.app.write_lock()?;
        self.add_locked(&guard, task_id, title, date)
    }

    pub(crate) fn add_locked(
        &self,
        _guard: &WriteGuard<'_>,
        task_id: &str,
        title: &str,
        date: Option<NaiveDate>,
    ) -> Result<bool> {
        let date = date.unwrap_or_else(|| self.app.today());
        let path = self.app.layout().daily_path(date);
        let (meta, body) = match read_optional(&path)? {
            Some(text) => load(&text, Some(date)),
            None => (date_header(date), String::new()),
        };

        let mut lines: Vec<String> = if body.trim().is_empty() {
            vec![
                DAILY_TITLE.to_string(),
                String::new(),
                PENDING_HEADING.to_string(),
            ]
        } else {
            body.lines().map(str::to_string).collect()
        };
        let entry = render_entry(task_id, title);

        let borrowed: Vec<&str> = lines.iter().map(String::as_str).collect();
        match pending_range(&borrowed) {
            Some((start, end)) => {
                if borrowed[start..end]
                    .iter()
                    .any(|line| references(line, task_id))
                {
                    return Ok(false);
                }
                let insert_at = borrowed[start..end]
                    .iter()
                    .position(|line| line.trim().is_empty())
                    .map(|offset| start + offset)
                    .unwrap_or(end);
                lines.insert(insert_at, entry);
            }
            None => {
                if lines.last().map(|line| !line.trim().is_empty()).unwrap_or(false) {
                    lines.push(String::new());
                }
                lines.push(PENDING_HEADING.to_string());
                lines.push(entry);
            }
        }

        self.save(&path, &meta, &lines)?;
        tracing::debug!(id = %task_id, date = %date, "added daily entry");
        Ok(true)
    }

    /// Drops every line referencing `[task_id]` from the document for `date` (default today).
    pub fn remove(&self, task_id: &str, date: Option<NaiveDate>) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let date = date.unwrap_or_else(|| self.app.today());
        self.remove_locked(&guard, task_id, date)
    }

    pub(crate) fn remove_locked(
        &self,
        guard: &WriteGuard<'_>,
        task_id: &str,
        date: NaiveDate,
    ) -> Result<bool> {
        self.remove_from(guard, &self.app.layout().daily_path(date), task_id)
    }

    /// Removes the task from every daily document. Returns how many documents changed.
    pub(crate) fn remove_everywhere_locked(
        &self,
        guard: &WriteGuard<'_>,
        task_id: &str,
    ) -> Result<usize> {
        let mut changed = 0;
        for path in list_files(&self.app.layout().daily_dir(), TASK_EXT)? {
            if self.remove_from(guard, &path, task_id)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    fn remove_from(
        &self,
        _guard: &WriteGuard<'_>,
        path: &std::path::Path,
        task_id: &str,
    ) -> Result<bool> {
        let Some(text) = read_optional(path)? else {
            return Ok(false);
        };
        let (meta, body) = load(&text, parse_date(&file_stem(path)));
        let lines: Vec<String> = body.lines().map(str::to_string).collect();
        let kept: Vec<String> = lines
            .iter()
            .filter(|line| !references(line, task_id))
            .cloned()
            .collect();
        if kept.len() == lines.len() {
            return Ok(false);
        }
        self.save(path, &meta, &kept)?;
        tracing::debug!(id = %task_id, path = %path.display(), "removed daily entry");
        Ok(true)
    }

    /// Entries of the pending section for `date` (default today), in document order.
    pub fn list(&self, date: Option<NaiveDate>) -> Result<Vec<DailyEntry>> {
        let date = date.unwrap_or_else(|| self.app.today());
        let Some(text) = read_optional(&self.app.layout().daily_path(date))? else {
            return Ok(Vec::new());
        };
        let (_, body) = load(&text, None);
        Ok(parse_pending(&body))
    }

    /// Full task records for the day's entries; ids that no longer resolve are skipped.
    pub fn tasks_for(&self, date: Option<NaiveDate>) -> Result<Vec<Task>> {
        let store = self.app.tasks();
        let mut tasks = Vec::new();
        for entry in self.list(date)? {
            if let Some(task) = store.read(&entry.id)? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Dates that have a daily document, oldest first.
    pub fn dates(&self) -> Result<Vec<NaiveDate>> {
        let mut dates: Vec<NaiveDate> = list_files(&self.app.layout().daily_dir(), TASK_EXT)?
            .iter()
            .filter_map(|path| parse_date(&file_stem(path)))
            .collect();
        dates.sort();
        Ok(dates)
    }

    fn save(&self, path: &std::path::Path, meta: &Mapping, lines: &[String]) -> Result<()> {
        let mut body = lines.join("\n");
        body.push('\n');
        write_atomic(path, &document::encode(meta, &body)?)
    }
}

fn date_header(date: NaiveDate) -> Mapping {
    let mut meta = Mapping::new();
    meta.insert(
        Value::String("date".to_string()),
        Value::String(format_date(date)),
    );
    meta
}

/// Decodes a daily document for rewriting. A header without a `date` gets one; an
/// unreadable header block is dropped rather than carried into the body.
fn load(text: &str, date: Option<NaiveDate>) -> (Mapping, String) {
    let (mut meta, mut body) = document::decode(text);
    if meta.is_empty() {
        body = document::strip_header(text).to_string();
    }
    if let Some(date) = date {
        if !meta.contains_key("date") {
            meta.extend(date_header(date));
        }
    }
    (meta, body)
}

fn pending_range(lines: &[&str]) -> Option<(usize, usize)> {
    section_range(lines, &[PENDING_HEADING, LEGACY_PENDING_HEADING])
}

fn render_entry(task_id: &str, title: &str) -> String {
    let title = title.replace(&['\r', '\n'][..], " ");
    format!("- [{}] {}", task_id, title.trim())
}

fn references(line: &str, task_id: &str) -> bool {
    line.contains(&format!("[{}]", task_id))
}

fn parse_pending(body: &str) -> Vec<DailyEntry> {
    let lines: Vec<&str> = body.lines().collect();
    let Some((start, end)) = pending_range(&lines) else {
        return Vec::new();
    };
    lines[start..end]
        .iter()
        .filter_map(|line| parse_entry_line(line))
        .collect()
}

fn parse_entry_line(line: &str) -> Option<DailyEntry> {
    let rest = line.trim_start().strip_prefix("- [")?;
    let close = rest.find(']')?;
    let id = rest[..close].trim();
    if id.is_empty() {
        return None;
    }
    Some(DailyEntry {
        id: id.to_string(),
        title: rest[close + 1..].trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Clock;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
    }

    fn app(temp: &TempDir) -> App {
        App::open(temp.path())
            .expect("open")
            .with_clock(Clock::Fixed(today()))
    }

    fn entry(id: &str, title: &str) -> DailyEntry {
        DailyEntry {
            id: id.to_string(),
            title: title.to_string(),
        }
    }

    #[test]
    fn add_creates_document_with_pending_section() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        assert!(app.daily().add("task_1", "First", None).expect("add"));
        assert!(app.daily().add("task_2", "Second", None).expect("add"));
        let text = fs::read_to_string(app.layout().daily_path(today())).expect("read");
        let (meta, _) = document::decode(&text);
        assert_eq!(
            meta.get("date").and_then(Value::as_str),
            Some("2026-10-18")
        );
        assert!(text.contains("## Pending\n- [task_1] First\n- [task_2] Second\n"));
        assert_eq!(
            app.daily().list(None).expect("list"),
            vec![entry("task_1", "First"), entry("task_2", "Second")]
        );
    }

    #[test]
    fn add_skips_task_already_pending() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        app.daily().add("task_1", "First", None).expect("add");
        assert!(!app.daily().add("task_1", "First again", None).expect("add"));
        assert_eq!(app.daily().list(None).expect("list").len(), 1);
    }

    #[test]
    fn mention_outside_pending_section_does_not_block_add() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().daily_path(today());
        fs::write(
            &path,
            "---\ndate: 2026-10-18\n---\n\n# Today's Tasks\n\n## Notes\nsee [task_1] later\n\n## Pending\n- [task_0] Zero\n",
        )
        .expect("write");
        assert!(app.daily().add("task_1", "One", None).expect("add"));
        assert_eq!(
            app.daily().list(None).expect("list"),
            vec![entry("task_0", "Zero"), entry("task_1", "One")]
        );
    }

    #[test]
    fn entries_insert_before_trailing_notes() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().daily_path(today());
        fs::write(
            &path,
            "---\ndate: 2026-10-18\n---\n\n# Today's Tasks\n\n## Pending\n- [task_0] Zero\n\n## Done\n- [task_9] Nine\n",
        )
        .expect("write");
        app.daily().add("task_1", "One", None).expect("add");
        let text = fs::read_to_string(&path).expect("read");
        assert!(text.contains("- [task_0] Zero\n- [task_1] One\n\n## Done\n"));
        assert_eq!(app.daily().list(None).expect("list").len(), 2);
    }

    #[test]
    fn legacy_heading_is_read_and_extended() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().daily_path(today());
        fs::write(
            &path,
            "---\ndate: '2026-10-18'\n---\n\n# 今日任务\n\n## 待办任务\n- [task_0] 旧任务\n",
        )
        .expect("write");
        app.daily().add("task_1", "New", None).expect("add");
        assert_eq!(
            app.daily().list(None).expect("list"),
            vec![entry("task_0", "旧任务"), entry("task_1", "New")]
        );
    }

    #[test]
    fn remove_drops_every_referencing_line() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let other = NaiveDate::from_ymd_opt(2026, 10, 19).unwrap();
        app.daily().add("task_1", "One", None).expect("add");
        app.daily().add("task_2", "Two", None).expect("add");
        app.daily().add("task_1", "One", Some(other)).expect("add");

        assert!(app.daily().remove("task_1", None).expect("remove"));
        assert!(!app.daily().remove("task_1", None).expect("remove again"));
        assert_eq!(app.daily().list(None).expect("list"), vec![entry("task_2", "Two")]);
        assert_eq!(app.daily().list(Some(other)).expect("list").len(), 1);
        assert_eq!(app.daily().dates().expect("dates"), vec![today(), other]);
    }

    #[test]
    fn missing_document_lists_nothing() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        assert!(app.daily().list(None).expect("list").is_empty());
        assert!(!app.daily().remove("task_1", None).expect("remove"));
    }

    #[test]
    fn malformed_header_is_rebuilt_on_add() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().daily_path(today());
        fs::write(
            &path,
            "---\ndate: [oops\n---\n\n# Today's Tasks\n\n## Pending\n- [task_0] Zero\n",
        )
        .expect("write");

        assert!(app.daily().add("task_1", "One", None).expect("add"));
        let text = fs::read_to_string(&path).expect("read");
        assert!(!text.contains("oops"), "{text}");
        let (meta, body) = document::decode(&text);
        assert_eq!(
            meta.get("date").and_then(Value::as_str),
            Some("2026-10-18")
        );
        assert!(body.starts_with("# Today's Tasks\n"));
        assert_eq!(
            app.daily().list(None).expect("list"),
            vec![entry("task_0", "Zero"), entry("task_1", "One")]
        );
    }

    #[test]
    fn remove_restores_missing_date_header() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().daily_path(today());
        fs::write(&path, "## Pending\n- [task_0] Zero\n- [task_1] One\n").expect("write");

        assert!(app.daily().remove("task_0", None).expect("remove"));
        let (meta, _) = document::decode(&fs::read_to_string(&path).expect("read"));
        assert_eq!(
            meta.get("date").and_then(Value::as_str),
            Some("2026-10-18")
        );
        assert_eq!(app.daily().list(None).expect("list"), vec![entry("task_1", "One")]);
    }
}
