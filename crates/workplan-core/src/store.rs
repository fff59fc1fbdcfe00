//! Task documents, one file per task, partitioned by status directory.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::SystemTime;

use chrono::Local;
use ulid::Ulid;

use crate::app::App;
use crate::document::is_progress_separator;
use crate::error::{Result, StoreError};
use crate::layout::{
    file_stem, list_files, modified_time, read_optional, remove_if_exists, sanitize_filename,
    TASK_EXT,
};
use crate::lock::{write_atomic, WriteGuard};
use crate::task::{
    normalize_optional, normalize_tags, NewTask, Priority, ProgressRecord, Task, TaskPatch,
    TaskStatus,
};

/// One task file as found on disk. The same id can appear in two partitions if a
/// move was interrupted; `modified` decides which copy is current.
#[derive(Debug, Clone)]
pub struct TaskCopy {
    pub task: Task,
    pub path: PathBuf,
    pub modified: SystemTime,
}

pub struct TaskStore<'a> {
    app: &'a App,
}

impl<'a> TaskStore<'a> {
    pub(crate) fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Writes a new task and registers it with the category and daily indexes.
    pub fn create(&self, new: NewTask) -> Result<String> {
        let guard = self.app.write_lock()?;
        let today = self.app.today_string();

        let id = match normalize_optional(new.id) {
            Some(id) => {
                if !self.copies_of(&id)?.is_empty() {
                    return Err(StoreError::TaskExists(id));
                }
                id
            }
            None => self.generate_id()?,
        };
        check_progress_dates(&new.progress_records)?;

        let mut task = Task {
            id,
            title: new.title.trim().to_string(),
            description: new.description,
            status: new.status.unwrap_or(TaskStatus::Todo),
            priority: new.priority.unwrap_or(Priority::Medium),
            category: new.category.trim().to_string(),
            due_date: normalize_optional(new.due_date),
            date: normalize_optional(new.date),
            tags: normalize_tags(new.tags),
            reminder: normalize_optional(new.reminder),
            progress_records: new.progress_records,
            created_at: today.clone(),
            updated_at: today.clone(),
            extra: BTreeMap::new(),
        };

        if !task.category.is_empty() {
            let (_, name) = self
                .app
                .categories()
                .join_locked(&guard, &task.category, &task.id)?;
            task.category = name;
        }
        self.write_task(&guard, &task)?;
        let scheduled_today = task.date.as_deref().map(|date| date == today).unwrap_or(true);
        if scheduled_today {
            self.app
                .daily()
                .add_locked(&guard, &task.id, &task.title, None)?;
        }

        tracing::info!(id = %task.id, status = %task.status, "created task");
        Ok(task.id)
    }

    pub fn read(&self, id: &str) -> Result<Option<Task>> {
        Ok(self.current_copy(id)?.map(|copy| copy.task))
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(!self.copies_of(id)?.is_empty())
    }

    /// Applies `patch` and rewrites the task, moving it between partitions when the
    /// status changes. Returns `false` when no such task exists.
    pub fn update(&self, id: &str, patch: TaskPatch) -> Result<bool> {
        let guard = self.app.write_lock()?;
        self.update_locked(&guard, id, patch)
    }

    /// Read-modify-write under one lock. `change` returns `None` to leave the task as is.
    pub fn modify<F>(&self, id: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&Task) -> Option<TaskPatch>,
    {
        let guard = self.app.write_lock()?;
        let Some(task) = self.read(id)? else {
            return Ok(false);
        };
        match change(&task) {
            Some(patch) => self.update_locked(&guard, id, patch),
            None => Ok(true),
        }
    }

    pub(crate) fn update_locked(
        &self,
        guard: &WriteGuard<'_>,
        id: &str,
        patch: TaskPatch,
    ) -> Result<bool> {
        let Some(mut task) = self.read(id)? else {
            return Ok(false);
        };
        let old_category = task.category.clone();
        let old_status = task.status;

        if let Some(records) = &patch.progress_records {
            check_progress_dates(records)?;
        }
        patch.apply(&mut task);
        task.updated_at = self.app.today_string();
        let category_changed = task.category != old_category;

        // New membership first, old membership last: an interruption leaves a stale
        // entry behind, never a task missing from every index.
        let categories = self.app.categories();
        let mut joined = None;
        if category_changed && !task.category.is_empty() {
            let (path, name) = categories.join_locked(guard, &task.category, &task.id)?;
            task.category = name;
            joined = Some(path);
        }
        self.write_task(guard, &task)?;
        if category_changed && !old_category.is_empty() {
            // Another spelling of the category just joined must keep its membership.
            let same = match (&joined, categories.find(&old_category)?) {
                (Some(joined), Some((old_path, _))) => *joined == old_path,
                _ => false,
            };
            if !same {
                categories.remove_task_locked(guard, &old_category, &task.id)?;
            }
        }

        if old_status != task.status {
            tracing::info!(id = %task.id, from = %old_status, to = %task.status, "moved task");
        } else {
            tracing::debug!(id = %task.id, "updated task");
        }
        Ok(true)
    }

    /// Rewrites only the `category` field, leaving the category index alone. Used by
    /// category rename/delete cascades that maintain membership themselves.
    pub(crate) fn set_category_field_locked(
        &self,
        guard: &WriteGuard<'_>,
        id: &str,
        category: &str,
    ) -> Result<bool> {
        let Some(mut task) = self.read(id)? else {
            return Ok(false);
        };
        if task.category == category {
            return Ok(true);
        }
        task.category = category.to_string();
        task.updated_at = self.app.today_string();
        self.write_task(guard, &task)?;
        Ok(true)
    }

    pub fn delete(&self, id: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let Some(task) = self.read(id)? else {
            return Ok(false);
        };
        if !task.category.is_empty() {
            self.app
                .categories()
                .remove_task_locked(&guard, &task.category, id)?;
        }
        self.app.daily().remove_everywhere_locked(&guard, id)?;

        let mut removed = false;
        for copy in self.copies_of(id)? {
            removed |= remove_if_exists(&copy.path)?;
        }
        if removed {
            tracing::info!(id = %id, "deleted task");
        }
        Ok(removed)
    }

    /// Scans the requested partition (or all three) and applies equality filters.
    /// Newest `updated_at` first.
    pub fn list(
        &self,
        status: Option<TaskStatus>,
        category: Option<&str>,
        date: Option<&str>,
    ) -> Result<Vec<Task>> {
        let statuses: Vec<TaskStatus> = match status {
            Some(status) => vec![status],
            None => TaskStatus::ALL.to_vec(),
        };
        let category = category.filter(|value| !value.is_empty());
        let date = date.filter(|value| !value.is_empty());

        let mut tasks: Vec<Task> = dedup_copies(self.scan(&statuses)?)
            .into_iter()
            .map(|copy| copy.task)
            .filter(|task| category.map(|c| task.category == c).unwrap_or(true))
            .filter(|task| date.map(|d| task.date.as_deref() == Some(d)).unwrap_or(true))
            .collect();
        tasks.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    pub fn change_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        self.update(
            id,
            TaskPatch {
                status: Some(status),
                ..TaskPatch::default()
            },
        )
    }

    pub fn set_priority(&self, id: &str, priority: Priority) -> Result<bool> {
        self.update(
            id,
            TaskPatch {
                priority: Some(priority),
                ..TaskPatch::default()
            },
        )
    }

    pub fn set_category(&self, id: &str, category: &str) -> Result<bool> {
        self.update(
            id,
            TaskPatch {
                category: Some(category.to_string()),
                ..TaskPatch::default()
            },
        )
    }

    pub fn set_due_date(&self, id: &str, due_date: Option<&str>) -> Result<bool> {
        self.update(
            id,
            TaskPatch {
                due_date: Some(due_date.map(str::to_string)),
                ..TaskPatch::default()
            },
        )
    }

    /// Appends an unchecked progress record dated today.
    pub fn add_progress(&self, id: &str, content: &str) -> Result<bool> {
        let today = self.app.today_string();
        self.modify(id, |task| {
            let mut records = task.progress_records.clone();
            records.push(ProgressRecord {
                date: today,
                content: content.trim().to_string(),
                completed: false,
            });
            Some(TaskPatch {
                progress_records: Some(records),
                ..TaskPatch::default()
            })
        })
    }

    /// Marks the progress record at `index` as done or not done.
    pub fn set_progress_completed(&self, id: &str, index: usize, completed: bool) -> Result<bool> {
        let mut in_range = true;
        let found = self.modify(id, |task| {
            if index >= task.progress_records.len() {
                in_range = false;
                return None;
            }
            let mut records = task.progress_records.clone();
            records[index].completed = completed;
            Some(TaskPatch {
                progress_records: Some(records),
                ..TaskPatch::default()
            })
        })?;
        Ok(found && in_range)
    }

    pub fn add_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let tag = tag.trim().to_string();
        self.modify(id, |task| {
            if tag.is_empty() || task.tags.contains(&tag) {
                return None;
            }
            let mut tags = task.tags.clone();
            tags.push(tag);
            Some(TaskPatch {
                tags: Some(tags),
                ..TaskPatch::default()
            })
        })
    }

    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<bool> {
        let tag = tag.trim();
        self.modify(id, |task| {
            if !task.tags.iter().any(|existing| existing == tag) {
                return None;
            }
            let tags = task
                .tags
                .iter()
                .filter(|existing| *existing != tag)
                .cloned()
                .collect();
            Some(TaskPatch {
                tags: Some(tags),
                ..TaskPatch::default()
            })
        })
    }

    /// Every task file in the given partitions, duplicates included.
    pub fn scan(&self, statuses: &[TaskStatus]) -> Result<Vec<TaskCopy>> {
        let layout = self.app.layout();
        let mut copies = Vec::new();
        for &status in statuses {
            for path in list_files(&layout.partition_dir(status), TASK_EXT)? {
                let stem = file_stem(&path);
                if let Some(copy) = load_copy(path, &stem, status)? {
                    copies.push(copy);
                }
            }
        }
        Ok(copies)
    }

    /// All partition copies of `id`, newest first.
    pub(crate) fn copies_of(&self, id: &str) -> Result<Vec<TaskCopy>> {
        let layout = self.app.layout();
        let mut copies = Vec::new();
        for status in TaskStatus::ALL {
            let path = layout.task_path(id, status);
            if let Some(mut copy) = load_copy(path, id, status)? {
                copy.task.id = id.to_string();
                copies.push(copy);
            }
        }
        copies.sort_by(|a, b| b.modified.cmp(&a.modified));
        Ok(copies)
    }

    fn current_copy(&self, id: &str) -> Result<Option<TaskCopy>> {
        let mut copies = self.copies_of(id)?;
        if copies.len() > 1 {
            tracing::warn!(id = %id, copies = copies.len(), "task found in several partitions; using newest");
        }
        Ok(if copies.is_empty() {
            None
        } else {
            Some(copies.swap_remove(0))
        })
    }

    /// Writes the task into its status partition, then drops copies left in other
    /// partitions. New state lands before old state disappears.
    pub(crate) fn write_task(&self, _guard: &WriteGuard<'_>, task: &Task) -> Result<()> {
        let layout = self.app.layout();
        let text = task.to_document()?;
        write_atomic(&layout.task_path(&task.id, task.status), &text)?;
        for status in TaskStatus::ALL {
            if status != task.status {
                remove_if_exists(&layout.task_path(&task.id, status))?;
            }
        }
        Ok(())
    }

    fn generate_id(&self) -> Result<String> {
        let base = format!("task_{}", Local::now().format("%Y%m%d%H%M%S"));
        if self.copies_of(&base)?.is_empty() {
            return Ok(base);
        }
        Ok(format!("{}_{}", base, Ulid::new().to_string().to_lowercase()))
    }
}

fn load_copy(path: PathBuf, fallback_id: &str, status: TaskStatus) -> Result<Option<TaskCopy>> {
    let Some(text) = read_optional(&path)? else {
        return Ok(None);
    };
    let mut task = Task::from_document(&text, fallback_id, status);
    // The file name is the storage key; a header id that does not map to it is ignored.
    if sanitize_filename(&task.id) != file_stem(&path) {
        tracing::warn!(path = %path.display(), header_id = %task.id, "header id does not match file name");
        task.id = fallback_id.to_string();
    }
    let modified = modified_time(&path);
    Ok(Some(TaskCopy {
        task,
        path,
        modified,
    }))
}

/// Progress lines split at the first separator, so a date holding one would not read back.
fn check_progress_dates(records: &[ProgressRecord]) -> Result<()> {
    match records
        .iter()
        .find(|record| record.date.contains(is_progress_separator))
    {
        Some(record) => Err(StoreError::InvalidProgressDate(record.date.clone())),
        None => Ok(()),
    }
}

/// Keeps the most recently modified copy of each id, preserving first-seen order.
pub(crate) fn dedup_copies(copies: Vec<TaskCopy>) -> Vec<TaskCopy> {
    let mut result: Vec<TaskCopy> = Vec::with_capacity(copies.len());
    let mut index: HashMap<String, usize> = HashMap::new();
    for copy in copies {
        match index.get(&copy.task.id) {
            Some(&idx) => {
                if copy.modified > result[idx].modified {
                    result[idx] = copy;
                }
            }
            None => {
                index.insert(copy.task.id.clone(), result.len());
                result.push(copy);
            }
        }
    }
    result
}
