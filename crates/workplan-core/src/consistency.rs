//! Cross-checks the redundant indexes against the task documents and repairs drift
//! left behind by interrupted writes or hand edits.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::Serialize;

use crate::app::App;
use crate::category::Category;
use crate::error::Result;
use crate::layout::remove_if_exists;
use crate::lock::WriteGuard;
use crate::store::{dedup_copies, TaskCopy};
use crate::task::{Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    /// An older copy of a task left in another partition.
    DuplicateCopy { task_id: String, path: PathBuf },
    /// The task names a category whose member list lacks it.
    MissingMembership { task_id: String, category: String },
    /// A category lists a task that is gone or now names a different category.
    StaleMember { category: String, task_id: String },
    /// A daily document references a task that no longer exists.
    StaleDailyEntry { date: NaiveDate, task_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    pub ok: bool,
    pub issues: Vec<Issue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct RepairReport {
    pub detected: usize,
    pub fixed: usize,
    pub changes: Vec<Issue>,
}

pub fn verify(app: &App) -> Result<ConsistencyReport> {
    let issues = collect_issues(app)?;
    Ok(ConsistencyReport {
        ok: issues.is_empty(),
        issues,
    })
}

/// Resolves every issue `verify` reports: drops stale copies, re-adds missing
/// memberships, removes stale members and daily lines.
pub fn repair(app: &App) -> Result<RepairReport> {
    let guard = app.write_lock()?;
    let issues = collect_issues(app)?;
    let mut report = RepairReport {
        detected: issues.len(),
        ..RepairReport::default()
    };
    for issue in issues {
        if apply_fix(app, &guard, &issue)? {
            report.fixed += 1;
        }
        tracing::info!(?issue, "repaired");
        report.changes.push(issue);
    }
    Ok(report)
}

fn apply_fix(app: &App, guard: &WriteGuard<'_>, issue: &Issue) -> Result<bool> {
    match issue {
        Issue::DuplicateCopy { path, .. } => remove_if_exists(path),
        Issue::MissingMembership { task_id, category } => {
            app.categories().add_task_locked(guard, category, task_id)
        }
        Issue::StaleMember { category, task_id } => {
            app.categories().remove_task_locked(guard, category, task_id)
        }
        Issue::StaleDailyEntry { date, task_id } => {
            app.daily().remove_locked(guard, task_id, *date)
        }
    }
}

fn collect_issues(app: &App) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();

    let copies = app.tasks().scan(&TaskStatus::ALL)?;
    issues.extend(duplicate_issues(&copies));
    let current: HashMap<String, Task> = dedup_copies(copies)
        .into_iter()
        .map(|copy| (copy.task.id.clone(), copy.task))
        .collect();

    let categories: Vec<(PathBuf, Category)> = app.categories().entries()?;
    // Same lookup order as `CategoryIndex::find`: storage key, then display name.
    let resolve = |name: &str| -> Option<usize> {
        let path = app.layout().category_path(name);
        categories
            .iter()
            .position(|(candidate, _)| *candidate == path)
            .or_else(|| {
                categories
                    .iter()
                    .position(|(_, category)| category.name == name)
            })
    };

    let mut ids: Vec<&String> = current.keys().collect();
    ids.sort();
    for id in ids {
        let task = &current[id];
        if task.category.is_empty() {
            continue;
        }
        let listed = resolve(&task.category)
            .map(|idx| categories[idx].1.tasks.iter().any(|member| member == id))
            .unwrap_or(false);
        if !listed {
            issues.push(Issue::MissingMembership {
                task_id: id.clone(),
                category: task.category.clone(),
            });
        }
    }

    for (idx, (_, category)) in categories.iter().enumerate() {
        let mut seen = HashSet::new();
        for member in &category.tasks {
            if !seen.insert(member) {
                continue;
            }
            let belongs = current
                .get(member)
                .map(|task| !task.category.is_empty() && resolve(&task.category) == Some(idx))
                .unwrap_or(false);
            if !belongs {
                issues.push(Issue::StaleMember {
                    category: category.name.clone(),
                    task_id: member.clone(),
                });
            }
        }
    }

    let daily = app.daily();
    for date in daily.dates()? {
        let mut seen = HashSet::new();
        for entry in daily.list(Some(date))? {
            if !current.contains_key(&entry.id) && seen.insert(entry.id.clone()) {
                issues.push(Issue::StaleDailyEntry {
                    date,
                    task_id: entry.id,
                });
            }
        }
    }

    Ok(issues)
}

fn duplicate_issues(copies: &[TaskCopy]) -> Vec<Issue> {
    let mut by_id: BTreeMap<&str, Vec<&TaskCopy>> = BTreeMap::new();
    for copy in copies {
        by_id.entry(copy.task.id.as_str()).or_default().push(copy);
    }
    let mut issues = Vec::new();
    for (id, mut group) in by_id {
        if group.len() < 2 {
            continue;
        }
        group.sort_by(|a, b| b.modified.cmp(&a.modified));
        for stale in &group[1..] {
            issues.push(Issue::DuplicateCopy {
                task_id: id.to_string(),
                path: stale.path.clone(),
            });
        }
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Clock;
    use crate::category::NewCategory;
    use crate::document;
    use crate::task::NewTask;
    use std::fs;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn app(temp: &TempDir) -> App {
        App::open(temp.path())
            .expect("open")
            .with_clock(Clock::Fixed(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()))
    }

    #[test]
    fn clean_store_verifies_ok() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        app.tasks()
            .create(NewTask {
                category: "Work".to_string(),
                ..NewTask::titled("A")
            })
            .expect("create");
        let report = verify(&app).expect("verify");
        assert!(report.ok, "{:?}", report.issues);
    }

    #[test]
    fn repair_resolves_every_kind_of_drift() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let id = app
            .tasks()
            .create(NewTask {
                category: "Work".to_string(),
                ..NewTask::titled("A")
            })
            .expect("create");

        // Stale copy in another partition, older than the live one.
        let layout = app.layout();
        let live = layout.task_path(&id, TaskStatus::Todo);
        let stale = layout.task_path(&id, TaskStatus::Completed);
        fs::copy(&live, &stale).expect("copy");
        fs::File::options()
            .write(true)
            .open(&stale)
            .and_then(|file| file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(60)))
            .expect("mtime");

        // Membership dropped from Work, ghost members in Home, ghost daily line.
        app.categories().remove_task("Work", &id).expect("remove");
        app.categories()
            .create(NewCategory::named("Home"))
            .expect("create");
        app.categories().add_task("Home", "task_gone").expect("add");
        app.categories().add_task("Home", &id).expect("add");
        app.daily().add("task_gone", "Gone", None).expect("daily");

        let report = verify(&app).expect("verify");
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 5, "{:?}", report.issues);

        let repaired = repair(&app).expect("repair");
        assert_eq!(repaired.detected, 5);
        assert_eq!(repaired.fixed, 5);
        assert!(verify(&app).expect("verify").ok);

        assert!(!stale.exists());
        assert_eq!(
            app.categories().get("Work").unwrap().unwrap().tasks,
            vec![id.clone()]
        );
        assert!(app.categories().get("Home").unwrap().unwrap().tasks.is_empty());
        let daily_ids: Vec<String> = app
            .daily()
            .list(None)
            .unwrap()
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        assert_eq!(daily_ids, vec![id]);
    }

    #[test]
    fn category_reached_by_storage_key_stays_consistent() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        app.categories()
            .create(NewCategory::named("a/b"))
            .expect("create");
        let id = app.tasks().create(NewTask::titled("A")).expect("create");

        // "a:b" and "a/b" share a storage key.
        assert!(app.tasks().set_category(&id, "a:b").expect("set"));
        assert_eq!(app.tasks().read(&id).unwrap().unwrap().category, "a/b");
        assert!(verify(&app).expect("verify").ok);

        // A hand-edited spelling still resolves to the same document.
        let path = app.layout().task_path(&id, TaskStatus::Todo);
        let (mut meta, body) = document::decode(&fs::read_to_string(&path).expect("read"));
        meta.insert("category".into(), "a:b".into());
        fs::write(&path, document::encode(&meta, &body).expect("encode")).expect("write");
        assert_eq!(app.tasks().read(&id).unwrap().unwrap().category, "a:b");
        assert!(verify(&app).expect("verify").ok);

        let repaired = repair(&app).expect("repair");
        assert_eq!(repaired.detected, 0);
        assert_eq!(app.categories().get("a/b").unwrap().unwrap().tasks, vec![id]);
    }

    #[test]
    fn unlisted_alias_membership_is_repaired_once() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        app.categories()
            .create(NewCategory::named("a/b"))
            .expect("create");
        let id = app
            .tasks()
            .create(NewTask {
                category: "a:b".to_string(),
                ..NewTask::titled("A")
            })
            .expect("create");
        app.categories().remove_task("a/b", &id).expect("remove");

        let report = verify(&app).expect("verify");
        assert_eq!(
            report.issues,
            vec![Issue::MissingMembership {
                task_id: id.clone(),
                category: "a/b".to_string(),
            }]
        );
        let repaired = repair(&app).expect("repair");
        assert_eq!((repaired.detected, repaired.fixed), (1, 1));
        assert!(verify(&app).expect("verify").ok);
        assert_eq!(app.categories().get("a/b").unwrap().unwrap().tasks, vec![id]);
    }

    #[test]
    fn repeated_stale_daily_line_is_one_issue() {
        let temp = TempDir::new().expect("tempdir");
        let app = app(&temp);
        let path = app
            .layout()
            .daily_path(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap());
        fs::create_dir_all(path.parent().unwrap()).expect("mkdir");
        fs::write(
            &path,
            "---\ndate: '2026-10-18'\n---\n\n# Today's Tasks\n\n## Pending\n- [task_gone] Gone\n- [task_gone] Gone again\n",
        )
        .expect("write");

        let report = verify(&app).expect("verify");
        assert_eq!(report.issues.len(), 1, "{:?}", report.issues);
        let repaired = repair(&app).expect("repair");
        assert_eq!((repaired.detected, repaired.fixed), (1, 1));
        assert!(app.daily().list(None).unwrap().is_empty());
    }
}
