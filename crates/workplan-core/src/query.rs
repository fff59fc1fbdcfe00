use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::Serialize;

use crate::app::{parse_date, App};
use crate::error::Result;
use crate::task::{Priority, Task, TaskStatus};

/// Due-date policy for a listing. Overdue and due-soon are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DueFilter {
    /// Keep every task, including ones whose due date does not parse.
    #[default]
    Any,
    /// Due date strictly before today.
    Overdue,
    /// Due date within `[today, today + 1 day]`.
    DueSoon,
}

impl DueFilter {
    fn keeps(self, task: &Task, today: NaiveDate) -> bool {
        if self == DueFilter::Any {
            return true;
        }
        let Some(due) = task.due_date.as_deref().and_then(parse_date) else {
            return false;
        };
        match self {
            DueFilter::Any => true,
            DueFilter::Overdue => due < today,
            DueFilter::DueSoon => due >= today && due <= today + Duration::days(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub status: Option<TaskStatus>,
    pub category: Option<String>,
    pub date: Option<String>,
    pub priority: Option<Priority>,
    pub due: DueFilter,
    /// Case-insensitive substring over title or description.
    pub search: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub by_status: BTreeMap<TaskStatus, usize>,
    pub by_priority: BTreeMap<Priority, usize>,
    pub by_category: BTreeMap<String, usize>,
    pub overdue: usize,
    /// Due tomorrow. Today's due dates count under `due_today` instead.
    pub due_soon: usize,
    pub due_today: usize,
}

pub struct QueryEngine<'a> {
    app: &'a App,
}

impl<'a> QueryEngine<'a> {
    pub(crate) fn new(app: &'a App) -> Self {
        Self { app }
    }

    pub fn list_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let today = self.app.today();
        let search = query
            .search
            .as_deref()
            .map(|text| text.trim().to_lowercase())
            .filter(|text| !text.is_empty());

        let tasks = self.app.tasks().list(
            query.status,
            query.category.as_deref(),
            query.date.as_deref(),
        )?;
        Ok(tasks
            .into_iter()
            .filter(|task| query.priority.map(|p| task.priority == p).unwrap_or(true))
            .filter(|task| search.as_deref().map(|s| matches_text(task, s)).unwrap_or(true))
            .filter(|task| query.due.keeps(task, today))
            .collect())
    }

    pub fn get_task_stats(&self) -> Result<TaskStats> {
        let tasks = self.app.tasks().list(None, None, None)?;
        Ok(compute_stats(&tasks, self.app.today()))
    }

    /// Completion percentage, or `None` when the task does not exist.
    pub fn calculate_task_progress(&self, id: &str) -> Result<Option<u8>> {
        Ok(self.app.tasks().read(id)?.map(|task| progress_for(&task)))
    }

    pub fn overdue_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks(&TaskQuery {
            due: DueFilter::Overdue,
            ..TaskQuery::default()
        })
    }

    pub fn due_soon_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks(&TaskQuery {
            due: DueFilter::DueSoon,
            ..TaskQuery::default()
        })
    }

    pub fn high_priority_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks(&TaskQuery {
            priority: Some(Priority::High),
            ..TaskQuery::default()
        })
    }

    pub fn tasks_by_category(&self, category: &str) -> Result<Vec<Task>> {
        self.list_tasks(&TaskQuery {
            category: Some(category.to_string()),
            ..TaskQuery::default()
        })
    }

    pub fn search_tasks(&self, text: &str) -> Result<Vec<Task>> {
        self.list_tasks(&TaskQuery {
            search: Some(text.to_string()),
            ..TaskQuery::default()
        })
    }
}

fn matches_text(task: &Task, needle: &str) -> bool {
    task.title.to_lowercase().contains(needle) || task.description.to_lowercase().contains(needle)
}

pub fn compute_stats(tasks: &[Task], today: NaiveDate) -> TaskStats {
    let mut by_status: BTreeMap<TaskStatus, usize> =
        TaskStatus::ALL.iter().map(|status| (*status, 0)).collect();
    let mut by_priority: BTreeMap<Priority, usize> =
        Priority::ALL.iter().map(|priority| (*priority, 0)).collect();
    let mut by_category: BTreeMap<String, usize> = BTreeMap::new();
    let mut overdue = 0;
    let mut due_soon = 0;
    let mut due_today = 0;
    let tomorrow = today + Duration::days(1);

    for task in tasks {
        *by_status.entry(task.status).or_default() += 1;
        *by_priority.entry(task.priority).or_default() += 1;
        if !task.category.is_empty() {
            *by_category.entry(task.category.clone()).or_default() += 1;
        }
        match task.due_date.as_deref() {
            Some(raw) => match parse_date(raw) {
                Some(due) if due < today => overdue += 1,
                Some(due) if due == today => due_today += 1,
                Some(due) if due <= tomorrow => due_soon += 1,
                _ => {}
            },
            None => {
                if task.date.as_deref().and_then(parse_date) == Some(today) {
                    due_today += 1;
                }
            }
        }
    }

    TaskStats {
        total: tasks.len(),
        by_status,
        by_priority,
        by_category,
        overdue,
        due_soon,
        due_today,
    }
}

/// Completed tasks are 100. Without records a todo task is 0 and anything else 50;
/// otherwise the share of completed records, rounded down.
pub fn progress_for(task: &Task) -> u8 {
    if task.status == TaskStatus::Completed {
        return 100;
    }
    let total = task.progress_records.len();
    if total == 0 {
        return if task.status == TaskStatus::Todo { 0 } else { 50 };
    }
    let done = task
        .progress_records
        .iter()
        .filter(|record| record.completed)
        .count();
    (done * 100 / total) as u8
}
