//! File-backed task records for workplan.
//!
//! Tasks live as header-plus-markdown documents partitioned by status, with a JSON
//! category side-table and per-day checklists kept in step on every write.

pub mod app;
pub mod category;
pub mod config;
pub mod consistency;
pub mod daily;
pub mod document;
pub mod error;
pub mod layout;
pub mod lock;
pub mod query;
pub mod store;
pub mod task;

pub use app::{App, Clock};
pub use category::{Category, CategoryPatch, CategoryStats, CategoryUpdate, NewCategory};
pub use daily::DailyEntry;
pub use error::{Result, StoreError};
pub use query::{DueFilter, TaskQuery, TaskStats};
pub use task::{NewTask, Priority, ProgressRecord, Task, TaskPatch, TaskStatus};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}


#[cfg(test)]
mod tests {
    use super::version;

    #[test]
    fn version_is_not_empty() {
        assert!(!version().is_empty());
    }
}
