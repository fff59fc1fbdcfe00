use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::app::App;
use crate::config::DEFAULT_CATEGORY_COLOR;
use crate::error::Result;
use crate::layout::{file_stem, list_files, read_optional, remove_if_exists, CATEGORY_EXT};
use crate::lock::{write_atomic, WriteGuard};
use crate::task::{Task, TaskPatch};

fn default_color() -> String {
    DEFAULT_CATEGORY_COLOR.to_string()
}

/// A category document. `tasks` is a denormalized list of member ids kept in step
/// with each task's `category` field by paired writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_color")]
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    /// Falls back to the configured default color.
    pub color: Option<String>,
    pub icon: Option<String>,
}

impl NewCategory {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    /// A different name renames the category and cascades onto member tasks.
    pub name: Option<String>,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryUpdate {
    Updated,
    NotFound,
    NameConflict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryStats {
    pub task_count: usize,
    pub color: String,
    pub icon: Option<String>,
}

pub struct CategoryIndex<'a> {
    app: &'a App,
}

impl<'a> CategoryIndex<'a> {
    pub(crate) fn new(app: &'a App) -> Self {
        Self { app }
    }

    /// Returns `false` when a category with this name already exists.
    pub fn create(&self, new: NewCategory) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let name = new.name.trim();
        if self.find(name)?.is_some() {
            return Ok(false);
        }
        let today = self.app.today_string();
        let category = Category {
            name: name.to_string(),
            description: new.description,
            color: new
                .color
                .map(|color| color.trim().to_string())
                .filter(|color| !color.is_empty())
                .unwrap_or_else(|| self.app.settings().default_category_color.clone()),
            icon: new.icon.filter(|icon| !icon.trim().is_empty()),
            tasks: Vec::new(),
            created_at: today.clone(),
            updated_at: today,
        };
        self.write(&guard, &self.app.layout().category_path(name), &category)?;
        tracing::info!(name = %category.name, "created category");
        Ok(true)
    }

    /// Looks up by storage key first, then by the display name stored in each document.
    pub fn get(&self, name: &str) -> Result<Option<Category>> {
        Ok(self.find(name)?.map(|(_, category)| category))
    }

    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.find(name)?.is_some())
    }

    pub fn update(&self, old_name: &str, patch: CategoryPatch) -> Result<CategoryUpdate> {
        let guard = self.app.write_lock()?;
        let Some((path, mut category)) = self.find(old_name)? else {
            return Ok(CategoryUpdate::NotFound);
        };
        let old_display = category.name.clone();
        let new_name = patch
            .name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty() && *name != old_display);
        if let Some(new_name) = new_name.as_deref() {
            if self.find(new_name)?.is_some() {
                return Ok(CategoryUpdate::NameConflict);
            }
        }

        if let Some(description) = patch.description {
            category.description = description;
        }
        if let Some(color) = patch.color {
            category.color = color.trim().to_string();
        }
        if let Some(icon) = patch.icon {
            category.icon = icon.filter(|icon| !icon.trim().is_empty());
        }
        category.updated_at = self.app.today_string();

        let Some(new_name) = new_name else {
            self.write(&guard, &path, &category)?;
            return Ok(CategoryUpdate::Updated);
        };

        category.name = new_name.clone();
        let new_path = self.app.layout().category_path(&new_name);
        self.write(&guard, &new_path, &category)?;
        let store = self.app.tasks();
        for id in &category.tasks {
            if let Some(task) = store.read(id)? {
                if task.category == old_display {
                    store.set_category_field_locked(&guard, id, &new_name)?;
                }
            }
        }
        if new_path != path {
            remove_if_exists(&path)?;
        }
        tracing::info!(from = %old_display, to = %new_name, members = category.tasks.len(), "renamed category");
        Ok(CategoryUpdate::Updated)
    }

    pub fn rename(&self, old_name: &str, new_name: &str) -> Result<CategoryUpdate> {
        self.update(
            old_name,
            CategoryPatch {
                name: Some(new_name.to_string()),
                ..CategoryPatch::default()
            },
        )
    }

    pub fn set_color(&self, name: &str, color: &str) -> Result<CategoryUpdate> {
        self.update(
            name,
            CategoryPatch {
                color: Some(color.to_string()),
                ..CategoryPatch::default()
            },
        )
    }

    pub fn set_icon(&self, name: &str, icon: Option<&str>) -> Result<CategoryUpdate> {
        self.update(
            name,
            CategoryPatch {
                icon: Some(icon.map(str::to_string)),
                ..CategoryPatch::default()
            },
        )
    }

    /// Clears `category` on every member task still pointing here, then removes the document.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let Some((path, category)) = self.find(name)? else {
            return Ok(false);
        };
        let store = self.app.tasks();
        for id in &category.tasks {
            if let Some(task) = store.read(id)? {
                if task.category == category.name {
                    store.set_category_field_locked(&guard, id, "")?;
                }
            }
        }
        let removed = remove_if_exists(&path)?;
        tracing::info!(name = %category.name, members = category.tasks.len(), "deleted category");
        Ok(removed)
    }

    /// Adds `task_id` to the member list, creating the category if needed. Idempotent.
    pub fn add_task(&self, name: &str, task_id: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        self.add_task_locked(&guard, name, task_id)
    }

    pub(crate) fn add_task_locked(
        &self,
        guard: &WriteGuard<'_>,
        name: &str,
        task_id: &str,
    ) -> Result<bool> {
        self.join_locked(guard, name, task_id)?;
        Ok(true)
    }

    /// Adds the membership and returns the storage path and display name of the
    /// category `name` resolved to, which may differ from `name` itself.
    pub(crate) fn join_locked(
        &self,
        guard: &WriteGuard<'_>,
        name: &str,
        task_id: &str,
    ) -> Result<(PathBuf, String)> {
        let name = name.trim();
        let (path, mut category) = match self.find(name)? {
            Some(found) => found,
            None => {
                let today = self.app.today_string();
                tracing::info!(name = %name, "creating category for task");
                (
                    self.app.layout().category_path(name),
                    Category {
                        name: name.to_string(),
                        description: String::new(),
                        color: self.app.settings().default_category_color.clone(),
                        icon: None,
                        tasks: Vec::new(),
                        created_at: today.clone(),
                        updated_at: today,
                    },
                )
            }
        };
        if !category.tasks.iter().any(|id| id == task_id) {
            category.tasks.push(task_id.to_string());
            self.write(guard, &path, &category)?;
        }
        Ok((path, category.name))
    }

    /// Removes `task_id` from the member list. Returns `false` only when the category
    /// does not exist; an absent member is not an error.
    pub fn remove_task(&self, name: &str, task_id: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        self.remove_task_locked(&guard, name, task_id)
    }

    pub(crate) fn remove_task_locked(
        &self,
        guard: &WriteGuard<'_>,
        name: &str,
        task_id: &str,
    ) -> Result<bool> {
        let Some((path, mut category)) = self.find(name)? else {
            return Ok(false);
        };
        let before = category.tasks.len();
        category.tasks.retain(|id| id != task_id);
        if category.tasks.len() != before {
            self.write(guard, &path, &category)?;
        }
        Ok(true)
    }

    /// Puts an existing task into an existing category, moving it out of its old one.
    pub fn assign_task(&self, name: &str, task_id: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let Some((_, category)) = self.find(name)? else {
            return Ok(false);
        };
        let store = self.app.tasks();
        let Some(task) = store.read(task_id)? else {
            return Ok(false);
        };
        if task.category == category.name {
            return self.add_task_locked(&guard, &category.name, task_id);
        }
        store.update_locked(
            &guard,
            task_id,
            TaskPatch {
                category: Some(category.name),
                ..TaskPatch::default()
            },
        )
    }

    /// Drops membership and clears the task's `category` if it still names this category.
    pub fn unassign_task(&self, name: &str, task_id: &str) -> Result<bool> {
        let guard = self.app.write_lock()?;
        let Some((_, category)) = self.find(name)? else {
            return Ok(false);
        };
        self.remove_task_locked(&guard, &category.name, task_id)?;
        let store = self.app.tasks();
        if let Some(task) = store.read(task_id)? {
            if task.category == category.name {
                store.set_category_field_locked(&guard, task_id, "")?;
            }
        }
        Ok(true)
    }

    /// Sorted by name. Unreadable documents are skipped.
    pub fn list(&self) -> Result<Vec<Category>> {
        let mut categories: Vec<Category> = self
            .entries()?
            .into_iter()
            .map(|(_, category)| category)
            .collect();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    pub fn stats(&self) -> Result<BTreeMap<String, CategoryStats>> {
        Ok(self
            .list()?
            .into_iter()
            .map(|category| {
                (
                    category.name,
                    CategoryStats {
                        task_count: category.tasks.len(),
                        color: category.color,
                        icon: category.icon,
                    },
                )
            })
            .collect())
    }

    /// Member tasks that still exist, newest `updated_at` first.
    pub fn tasks(&self, name: &str) -> Result<Vec<Task>> {
        let Some(category) = self.get(name)? else {
            return Ok(Vec::new());
        };
        let store = self.app.tasks();
        let mut tasks = Vec::new();
        for id in &category.tasks {
            if let Some(task) = store.read(id)? {
                tasks.push(task);
            }
        }
        tasks.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(tasks)
    }

    pub(crate) fn entries(&self) -> Result<Vec<(PathBuf, Category)>> {
        let mut entries = Vec::new();
        for path in list_files(&self.app.layout().categories_dir(), CATEGORY_EXT)? {
            if let Some(category) = read_category(&path)? {
                entries.push((path, category));
            }
        }
        Ok(entries)
    }

    pub(crate) fn find(&self, name: &str) -> Result<Option<(PathBuf, Category)>> {
        let path = self.app.layout().category_path(name);
        if let Some(category) = read_category(&path)? {
            return Ok(Some((path, category)));
        }
        Ok(self
            .entries()?
            .into_iter()
            .find(|(_, category)| category.name == name))
    }

    pub(crate) fn write(
        &self,
        _guard: &WriteGuard<'_>,
        path: &std::path::Path,
        category: &Category,
    ) -> Result<()> {
        let mut text = serde_json::to_string_pretty(category)?;
        text.push('\n');
        write_atomic(path, &text)
    }
}

fn read_category(path: &std::path::Path) -> Result<Option<Category>> {
    let Some(text) = read_optional(path)? else {
        return Ok(None);
    };
    match serde_json::from_str::<Category>(&text) {
        Ok(mut category) => {
            if category.name.trim().is_empty() {
                category.name = file_stem(path);
            }
            Ok(Some(category))
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "skipping unreadable category document");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Clock;
    use crate::task::NewTask;
    use chrono::NaiveDate;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn app(temp: &TempDir) -> App {
        App::open(temp.path())
            .expect("open")
            .with_clock(Clock::Fixed(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()))
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let index = app.categories();
        assert!(index.create(NewCategory::named("Work")).expect("create"));
        assert!(!index.create(NewCategory::named("Work")).expect("create again"));
        let category = index.get("Work").expect("get").expect("category");
        assert_eq!(category.color, DEFAULT_CATEGORY_COLOR);
        assert_eq!(category.created_at, "2026-10-18");
        assert!(category.tasks.is_empty());
    }

    #[test]
    fn get_falls_back_to_display_name_scan() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app.layout().categories_dir().join("renamed-key.json");
        fs::write(&path, r#"{"name": "Home", "tasks": ["task_1"]}"#).expect("write");
        let category = app.categories().get("Home").expect("get").expect("category");
        assert_eq!(category.tasks, vec!["task_1"]);
        assert_eq!(category.color, DEFAULT_CATEGORY_COLOR);
    }

    #[test]
    fn malformed_category_documents_are_skipped() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let dir = app.layout().categories_dir();
        fs::write(dir.join("Broken.json"), "{not json").expect("write");
        app.categories()
            .create(NewCategory::named("Fine"))
            .expect("create");
        assert!(app.categories().get("Broken").expect("get").is_none());
        let names: Vec<String> = app
            .categories()
            .list()
            .expect("list")
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["Fine"]);
    }

    #[test]
    fn membership_changes_are_idempotent() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let index = app.categories();
        index.create(NewCategory::named("Work")).expect("create");
        index.add_task("Work", "task_1").expect("add");
        index.add_task("Work", "task_1").expect("add again");
        assert_eq!(index.get("Work").unwrap().unwrap().tasks, vec!["task_1"]);
        assert!(index.remove_task("Work", "task_1").expect("remove"));
        assert!(index.remove_task("Work", "task_1").expect("remove again"));
        assert!(index.get("Work").unwrap().unwrap().tasks.is_empty());
        assert!(!index.remove_task("Missing", "task_1").expect("missing"));
    }

    #[test]
    fn rename_conflicts_with_existing_name() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let index = app.categories();
        index.create(NewCategory::named("A")).expect("create");
        index.create(NewCategory::named("B")).expect("create");
        assert_eq!(index.rename("A", "B").expect("rename"), CategoryUpdate::NameConflict);
        assert_eq!(index.rename("A", "A").expect("rename"), CategoryUpdate::Updated);
        assert_eq!(index.rename("Z", "Y").expect("rename"), CategoryUpdate::NotFound);
    }

    #[test]
    fn set_color_and_icon_update_in_place() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let index = app.categories();
        index.create(NewCategory::named("Work")).expect("create");
        index.set_color("Work", "#123456").expect("color");
        index.set_icon("Work", Some("briefcase")).expect("icon");
        let stats = index.stats().expect("stats");
        assert_eq!(
            stats.get("Work"),
            Some(&CategoryStats {
                task_count: 0,
                color: "#123456".to_string(),
                icon: Some("briefcase".to_string()),
            })
        );
    }

    #[test]
    fn assign_moves_task_between_categories() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let id = app
            .tasks()
            .create(NewTask {
                category: "Home".to_string(),
                ..NewTask::titled("Paint fence")
            })
            .expect("create");
        let index = app.categories();
        index.create(NewCategory::named("Garden")).expect("create");
        assert!(index.assign_task("Garden", &id).expect("assign"));
        assert_eq!(app.tasks().read(&id).unwrap().unwrap().category, "Garden");
        assert!(index.get("Home").unwrap().unwrap().tasks.is_empty());
        assert_eq!(index.get("Garden").unwrap().unwrap().tasks, vec![id.clone()]);

        assert!(index.unassign_task("Garden", &id).expect("unassign"));
        assert_eq!(app.tasks().read(&id).unwrap().unwrap().category, "");
        assert!(!index.assign_task("Nowhere", &id).expect("missing category"));
    }
}
