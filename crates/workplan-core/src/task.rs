use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};

use crate::document::{self, parse_task_body, render_task_body};
pub use crate::document::ProgressRecord;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Todo,
    InProgress,
    Completed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 3] = [
        TaskStatus::Todo,
        TaskStatus::InProgress,
        TaskStatus::Completed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "todo" => Some(Self::Todo),
            "in_progress" => Some(Self::InProgress),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored task. Dates are kept as written (`YYYY-MM-DD`) so a malformed value
/// survives a read/write cycle; callers parse them on demand.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub priority: Priority,
    pub category: String,
    pub due_date: Option<String>,
    /// Scheduled day, distinct from the due date.
    pub date: Option<String>,
    pub tags: Vec<String>,
    pub reminder: Option<String>,
    pub progress_records: Vec<ProgressRecord>,
    pub created_at: String,
    pub updated_at: String,
    /// Header keys this crate does not know about, preserved on rewrite.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

/// Fields accepted by `TaskStore::create`. Anything left `None` gets its default.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub id: Option<String>,
    pub title: String,
    pub description: String,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category: String,
    pub due_date: Option<String>,
    pub date: Option<String>,
    pub tags: Vec<String>,
    pub reminder: Option<String>,
    pub progress_records: Vec<ProgressRecord>,
}

impl NewTask {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Partial update. `None` leaves a field unchanged; for nullable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<Priority>,
    pub category: Option<String>,
    pub due_date: Option<Option<String>>,
    pub date: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
    pub reminder: Option<Option<String>>,
    pub progress_records: Option<Vec<ProgressRecord>>,
}

impl TaskPatch {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.status.is_none()
            && self.priority.is_none()
            && self.category.is_none()
            && self.due_date.is_none()
            && self.date.is_none()
            && self.tags.is_none()
            && self.reminder.is_none()
            && self.progress_records.is_none()
    }

    pub fn apply(self, task: &mut Task) {
        if let Some(title) = self.title {
            task.title = title;
        }
        if let Some(description) = self.description {
            task.description = description;
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(category) = self.category {
            task.category = category.trim().to_string();
        }
        if let Some(due_date) = self.due_date {
            task.due_date = normalize_optional(due_date);
        }
        if let Some(date) = self.date {
            task.date = normalize_optional(date);
        }
        if let Some(tags) = self.tags {
            task.tags = normalize_tags(tags);
        }
        if let Some(reminder) = self.reminder {
            task.reminder = normalize_optional(reminder);
        }
        if let Some(records) = self.progress_records {
            task.progress_records = records;
        }
    }
}

const KNOWN_KEYS: [&str; 12] = [
    "id",
    "title",
    "status",
    "priority",
    "category",
    "due_date",
    "date",
    "tags",
    "reminder",
    "created_at",
    "updated_at",
    // Written by older documents next to the body section; the body wins.
    "content",
];

impl Task {
    /// Encodes the task into its on-disk document text.
    pub fn to_document(&self) -> Result<String> {
        let mut meta = Mapping::new();
        insert_str(&mut meta, "id", &self.id);
        insert_str(&mut meta, "title", &self.title);
        insert_str(&mut meta, "status", self.status.as_str());
        insert_str(&mut meta, "priority", self.priority.as_str());
        insert_str(&mut meta, "category", &self.category);
        insert_opt(&mut meta, "due_date", self.due_date.as_deref());
        insert_opt(&mut meta, "date", self.date.as_deref());
        meta.insert(
            Value::String("tags".to_string()),
            Value::Sequence(self.tags.iter().cloned().map(Value::String).collect()),
        );
        insert_opt(&mut meta, "reminder", self.reminder.as_deref());
        insert_str(&mut meta, "created_at", &self.created_at);
        insert_str(&mut meta, "updated_at", &self.updated_at);
        for (key, value) in &self.extra {
            meta.insert(Value::String(key.clone()), value.clone());
        }
        let body = render_task_body(&self.title, &self.description, &self.progress_records);
        document::encode(&meta, &body)
    }

    /// Decodes a task document found in the `status` partition.
    ///
    /// The partition is authoritative for `status`. A missing id falls back to
    /// `fallback_id` (the file stem); unknown enum values degrade to defaults.
    pub fn from_document(text: &str, fallback_id: &str, status: TaskStatus) -> Task {
        let (meta, body) = document::decode(text);
        let data: BTreeMap<String, Value> = meta
            .into_iter()
            .filter_map(|(key, value)| value_to_string(&key).map(|key| (key, value)))
            .collect();
        let parsed_body = parse_task_body(&body);

        let id = string_field(&data, "id").unwrap_or_else(|| fallback_id.to_string());
        let title = string_field(&data, "title").unwrap_or_default();
        let priority = string_field(&data, "priority")
            .and_then(|value| Priority::parse(&value))
            .unwrap_or(Priority::Medium);
        let category = string_field(&data, "category").unwrap_or_default();
        let due_date = string_field(&data, "due_date");
        let date = string_field(&data, "date");
        let tags = normalize_tags(parse_list_value(data.get("tags")));
        let reminder = string_field(&data, "reminder");
        let created_at = string_field(&data, "created_at").unwrap_or_default();
        let updated_at = string_field(&data, "updated_at").unwrap_or_else(|| created_at.clone());

        let extra = data
            .into_iter()
            .filter(|(key, _)| !KNOWN_KEYS.contains(&key.as_str()))
            .collect();

        Task {
            id,
            title,
            description: parsed_body.description,
            status,
            priority,
            category,
            due_date,
            date,
            tags,
            reminder,
            progress_records: parsed_body.progress,
            created_at,
            updated_at,
            extra,
        }
    }
}

fn insert_str(meta: &mut Mapping, key: &str, value: &str) {
    meta.insert(
        Value::String(key.to_string()),
        Value::String(value.to_string()),
    );
}

fn insert_opt(meta: &mut Mapping, key: &str, value: Option<&str>) {
    let value = value
        .map(|value| Value::String(value.to_string()))
        .unwrap_or(Value::Null);
    meta.insert(Value::String(key.to_string()), value);
}

fn string_field(data: &BTreeMap<String, Value>, key: &str) -> Option<String> {
    data.get(key)
        .and_then(value_to_string)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(val) => Some(val.clone()),
        Value::Number(num) => Some(num.to_string()),
        Value::Bool(val) => Some(val.to_string()),
        Value::Null => None,
        _ => serde_yaml::to_string(value).ok().map(|s| s.trim().to_string()),
    }
}

pub fn parse_list_value(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Sequence(seq)) => seq
            .iter()
            .filter_map(value_to_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => parse_list_string(s),
        Some(other) => value_to_string(other)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| vec![s])
            .unwrap_or_default(),
    }
}

fn parse_list_string(value: &str) -> Vec<String> {
    let raw = value.trim();
    let inner = raw
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(raw)
        .trim();
    if inner.is_empty() {
        return Vec::new();
    }
    inner
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Trims, drops empties and duplicates, keeps first-seen order.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter()
        .map(|tag| tag.trim().to_string())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.clone()))
        .collect()
}

pub(crate) fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Task {
        Task {
            id: "task_20261018090000".to_string(),
            title: "Quarterly report".to_string(),
            description: "Collect numbers\nWrite summary".to_string(),
            status: TaskStatus::InProgress,
            priority: Priority::High,
            category: "Work".to_string(),
            due_date: Some("2026-10-20".to_string()),
            date: None,
            tags: vec!["finance".to_string(), "q4".to_string()],
            reminder: Some("2026-10-19 09:00".to_string()),
            progress_records: vec![ProgressRecord {
                date: "2026-10-18".to_string(),
                content: "gathered data".to_string(),
                completed: true,
            }],
            created_at: "2026-10-18".to_string(),
            updated_at: "2026-10-18".to_string(),
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn task_document_round_trips() {
        let task = sample();
        let text = task.to_document().expect("encode");
        let decoded = Task::from_document(&text, "ignored", TaskStatus::InProgress);
        assert_eq!(decoded, task);
    }

    #[test]
    fn partition_overrides_header_status() {
        let text = sample().to_document().expect("encode");
        let decoded = Task::from_document(&text, "ignored", TaskStatus::Completed);
        assert_eq!(decoded.status, TaskStatus::Completed);
    }

    #[test]
    fn headerless_document_uses_fallback_id_and_defaults() {
        let decoded = Task::from_document("garbage without header", "task_x", TaskStatus::Todo);
        assert_eq!(decoded.id, "task_x");
        assert_eq!(decoded.priority, Priority::Medium);
        assert_eq!(decoded.category, "");
        assert!(decoded.progress_records.is_empty());
    }

    #[test]
    fn unknown_header_keys_are_preserved() {
        let text = "---\nid: task_1\ntitle: T\npriority: urgent\nowner: sam\n---\n\n# T\n";
        let decoded = Task::from_document(text, "task_1", TaskStatus::Todo);
        assert_eq!(decoded.priority, Priority::Medium);
        assert_eq!(
            decoded.extra.get("owner").and_then(value_to_string).as_deref(),
            Some("sam")
        );
        let rewritten = decoded.to_document().expect("encode");
        assert!(rewritten.contains("owner: sam"));
    }

    #[test]
    fn tags_accept_inline_string_lists() {
        let text = "---\nid: task_1\ntitle: T\ntags: \"[a, b, a]\"\n---\n";
        let decoded = Task::from_document(text, "task_1", TaskStatus::Todo);
        assert_eq!(decoded.tags, vec!["a", "b"]);
    }

    #[test]
    fn patch_distinguishes_unchanged_from_cleared() {
        let mut task = sample();
        TaskPatch {
            due_date: Some(None),
            priority: Some(Priority::Low),
            ..TaskPatch::default()
        }
        .apply(&mut task);
        assert_eq!(task.due_date, None);
        assert_eq!(task.priority, Priority::Low);
        assert_eq!(task.reminder.as_deref(), Some("2026-10-19 09:00"));
    }

    #[test]
    fn status_and_priority_parse_known_values_only() {
        assert_eq!(TaskStatus::parse("IN_PROGRESS"), Some(TaskStatus::InProgress));
        assert_eq!(TaskStatus::parse("done"), None);
        assert_eq!(Priority::parse(" low "), Some(Priority::Low));
        assert_eq!(Priority::parse("p1"), None);
    }
}
