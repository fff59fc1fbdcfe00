use std::path::{Path, PathBuf};

use chrono::{Local, NaiveDate};

use crate::category::CategoryIndex;
use crate::config::{resolve_data_root, resolve_settings, Settings};
use crate::daily::DailyIndex;
use crate::error::Result;
use crate::layout::DataLayout;
use crate::lock::{WriteGuard, WriteLock};
use crate::query::QueryEngine;
use crate::store::TaskStore;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(NaiveDate),
}

impl Clock {
    pub fn today(self) -> NaiveDate {
        match self {
            Clock::System => Local::now().date_naive(),
            Clock::Fixed(date) => date,
        }
    }
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

/// Everything the store components share: where data lives, the writer lock,
/// settings and the clock. Built once and handed to every caller.
#[derive(Debug)]
pub struct App {
    layout: DataLayout,
    lock: WriteLock,
    settings: Settings,
    clock: Clock,
}

impl App {
    /// Opens (and creates if needed) the data directories under `root` with default settings.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Self::with_settings(root, Settings::default())
    }

    pub fn with_settings(root: impl Into<PathBuf>, settings: Settings) -> Result<Self> {
        let layout = DataLayout::new(root);
        layout.ensure_dirs()?;
        let lock = WriteLock::new(layout.lock_path(), settings.lock_timeout_ms);
        tracing::debug!(root = %layout.root().display(), "opened workplan data root");
        Ok(Self {
            layout,
            lock,
            settings,
            clock: Clock::System,
        })
    }

    /// Resolves the data root and settings from config files reachable from `start`.
    pub fn discover(start: &Path, explicit_root: Option<&Path>) -> Result<Self> {
        let root = resolve_data_root(start, explicit_root);
        Self::with_settings(root, resolve_settings(start))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.today()
    }

    pub fn today_string(&self) -> String {
        format_date(self.today())
    }

    pub fn tasks(&self) -> TaskStore<'_> {
        TaskStore::new(self)
    }

    pub fn categories(&self) -> CategoryIndex<'_> {
        CategoryIndex::new(self)
    }

    pub fn daily(&self) -> DailyIndex<'_> {
        DailyIndex::new(self)
    }

    pub fn query(&self) -> QueryEngine<'_> {
        QueryEngine::new(self)
    }

    pub(crate) fn write_lock(&self) -> Result<WriteGuard<'_>> {
        self.lock.acquire()
    }
}
