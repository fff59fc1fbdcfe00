use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use workplan_core::app::{format_date, parse_date};
use workplan_core::consistency;
use workplan_core::{
    App, CategoryPatch, CategoryUpdate, Clock, DueFilter, NewCategory, NewTask, Priority,
    TaskPatch, TaskQuery, TaskStatus,
};

mod version;

#[derive(Parser)]
#[command(name = "workplan", version = version::FULL, about = "File-backed task planner")]
struct Cli {
    /// Directory holding `data/`; overrides config discovery
    #[arg(long, global = true, env = "WORKPLAN_ROOT")]
    root: Option<PathBuf>,
    /// Pin "today" (YYYY-MM-DD)
    #[arg(long, global = true, env = "WORKPLAN_TODAY", hide = true, value_parser = parse_day)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Create, inspect and change tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Manage categories
    #[command(subcommand)]
    Category(CategoryCommand),
    /// Per-day task checklists
    #[command(subcommand)]
    Daily(DailyCommand),
    /// Task counts by status, priority, category and due date
    Stats,
    /// Check that category and daily indexes agree with task documents
    Doctor {
        /// Repair every issue found
        #[arg(long)]
        fix: bool,
    },
    /// Print version information
    Version,
}

#[derive(Subcommand)]
enum TaskCommand {
    Create(CreateArgs),
    Show {
        id: String,
    },
    List(ListArgs),
    Update(UpdateArgs),
    Delete {
        id: String,
    },
    /// Move a task to another status
    Status {
        id: String,
        #[arg(value_parser = parse_status)]
        status: TaskStatus,
    },
    Priority {
        id: String,
        #[arg(value_parser = parse_priority)]
        priority: Priority,
    },
    /// Set the due date, or clear it when omitted
    Due {
        id: String,
        #[arg(value_parser = parse_day_string)]
        date: Option<String>,
    },
    /// Append a progress record dated today
    Progress {
        id: String,
        content: String,
    },
    /// Mark a progress record (0-based) as done
    Check {
        id: String,
        index: usize,
        /// Mark it not done instead
        #[arg(long)]
        undo: bool,
    },
    Tag {
        id: String,
        tag: String,
    },
    Untag {
        id: String,
        tag: String,
    },
    /// Completion percentage
    Percent {
        id: String,
    },
}

#[derive(Args)]
struct CreateArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    id: Option<String>,
    #[arg(long, default_value = "")]
    description: String,
    #[arg(long, default_value = "")]
    category: String,
    #[arg(long, value_parser = parse_status)]
    status: Option<TaskStatus>,
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
    #[arg(long, value_parser = parse_day_string)]
    due: Option<String>,
    /// Scheduled day
    #[arg(long, value_parser = parse_day_string)]
    date: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,
    #[arg(long)]
    reminder: Option<String>,
}

#[derive(Args)]
struct ListArgs {
    #[arg(long, value_parser = parse_status)]
    status: Option<TaskStatus>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    date: Option<String>,
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
    /// Only tasks due before today
    #[arg(long, conflicts_with = "due_soon")]
    overdue: bool,
    /// Only tasks due today or tomorrow
    #[arg(long)]
    due_soon: bool,
    #[arg(long)]
    search: Option<String>,
}

#[derive(Args)]
struct UpdateArgs {
    id: String,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long, value_parser = parse_status)]
    status: Option<TaskStatus>,
    #[arg(long, value_parser = parse_priority)]
    priority: Option<Priority>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_parser = parse_day_string, conflicts_with = "clear_due")]
    due: Option<String>,
    #[arg(long)]
    clear_due: bool,
    #[arg(long, value_parser = parse_day_string)]
    date: Option<String>,
    #[arg(long)]
    reminder: Option<String>,
}

#[derive(Subcommand)]
enum CategoryCommand {
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(long)]
        icon: Option<String>,
    },
    Show {
        name: String,
    },
    List,
    Update {
        name: String,
        /// New name; member tasks follow
        #[arg(long)]
        rename: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(long, conflicts_with = "clear_icon")]
        icon: Option<String>,
        #[arg(long)]
        clear_icon: bool,
    },
    /// Delete a category, leaving its tasks uncategorized
    Delete {
        name: String,
    },
    /// Tasks in a category, newest first
    Tasks {
        name: String,
    },
    Stats,
    Assign {
        name: String,
        id: String,
    },
    Unassign {
        name: String,
        id: String,
    },
}

#[derive(Subcommand)]
enum DailyCommand {
    /// Entries of a day's checklist
    List {
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },
    /// Full tasks referenced by a day's checklist
    Tasks {
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },
    Add {
        id: String,
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },
    Remove {
        id: String,
        #[arg(long, value_parser = parse_day)]
        date: Option<NaiveDate>,
    },
}

fn parse_status(value: &str) -> std::result::Result<TaskStatus, String> {
    TaskStatus::parse(value)
        .ok_or_else(|| format!("invalid status '{value}' (todo, in_progress, completed)"))
}

fn parse_priority(value: &str) -> std::result::Result<Priority, String> {
    Priority::parse(value).ok_or_else(|| format!("invalid priority '{value}' (high, medium, low)"))
}

fn parse_day(value: &str) -> std::result::Result<NaiveDate, String> {
    parse_date(value).ok_or_else(|| format!("invalid date '{value}' (expected YYYY-MM-DD)"))
}

fn parse_day_string(value: &str) -> std::result::Result<String, String> {
    parse_day(value).map(format_date)
}

fn init_tracing() {
    // Opt-in via RUST_LOG; stdout stays reserved for JSON.
    let filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|raw| {
            let raw = raw.trim();
            if raw.is_empty() || raw.len() > 4096 {
                return None;
            }
            EnvFilter::try_new(raw).ok()
        })
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };
    if let Command::Version = command {
        println!("workplan {}", version::FULL);
        return Ok(());
    }

    let cwd = std::env::current_dir().context("resolve current directory")?;
    let mut app = App::discover(&cwd, cli.root.as_deref()).context("open data root")?;
    tracing::debug!(root = %app.layout().root().display(), "using data root");
    if let Some(today) = cli.today {
        app = app.with_clock(Clock::Fixed(today));
    }
    run(&app, command)
}

fn run(app: &App, command: Command) -> Result<()> {
    match command {
        Command::Task(command) => run_task(app, command),
        Command::Category(command) => run_category(app, command),
        Command::Daily(command) => run_daily(app, command),
        Command::Stats => print_json(&app.query().get_task_stats()?),
        Command::Doctor { fix } => {
            if fix {
                print_json(&consistency::repair(app)?)
            } else {
                let report = consistency::verify(app)?;
                print_json(&report)?;
                if !report.ok {
                    bail!("{} consistency issue(s) found", report.issues.len());
                }
                Ok(())
            }
        }
        Command::Version => Ok(()),
    }
}

fn changed(found: bool, what: &str, key: &str) -> Result<()> {
    if !found {
        bail!("{what} not found: {key}");
    }
    print_json(&json!({ "id": key, "ok": true }))
}

fn run_task(app: &App, command: TaskCommand) -> Result<()> {
    let store = app.tasks();
    match command {
        TaskCommand::Create(args) => {
            let id = store.create(NewTask {
                id: args.id,
                title: args.title,
                description: args.description,
                status: args.status,
                priority: args.priority,
                category: args.category,
                due_date: args.due,
                date: args.date,
                tags: args.tags,
                reminder: args.reminder,
                progress_records: Vec::new(),
            })?;
            print_json(&json!({ "id": id }))
        }
        TaskCommand::Show { id } => match store.read(&id)? {
            Some(task) => print_json(&task),
            None => bail!("task not found: {id}"),
        },
        TaskCommand::List(args) => {
            let due = if args.overdue {
                DueFilter::Overdue
            } else if args.due_soon {
                DueFilter::DueSoon
            } else {
                DueFilter::Any
            };
            let tasks = app.query().list_tasks(&TaskQuery {
                status: args.status,
                category: args.category,
                date: args.date,
                priority: args.priority,
                due,
                search: args.search,
            })?;
            print_json(&tasks)
        }
        TaskCommand::Update(args) => {
            let due_date = if args.clear_due {
                Some(None)
            } else {
                args.due.map(Some)
            };
            let patch = TaskPatch {
                title: args.title,
                description: args.description,
                status: args.status,
                priority: args.priority,
                category: args.category,
                due_date,
                date: args.date.map(Some),
                tags: None,
                reminder: args.reminder.map(Some),
                progress_records: None,
            };
            if patch.is_empty() {
                bail!("nothing to update");
            }
            changed(store.update(&args.id, patch)?, "task", &args.id)
        }
        TaskCommand::Delete { id } => changed(store.delete(&id)?, "task", &id),
        TaskCommand::Status { id, status } => {
            changed(store.change_status(&id, status)?, "task", &id)
        }
        TaskCommand::Priority { id, priority } => {
            changed(store.set_priority(&id, priority)?, "task", &id)
        }
        TaskCommand::Due { id, date } => {
            changed(store.set_due_date(&id, date.as_deref())?, "task", &id)
        }
        TaskCommand::Progress { id, content } => {
            changed(store.add_progress(&id, &content)?, "task", &id)
        }
        TaskCommand::Check { id, index, undo } => changed(
            store.set_progress_completed(&id, index, !undo)?,
            "progress record",
            &format!("{id}#{index}"),
        ),
        TaskCommand::Tag { id, tag } => changed(store.add_tag(&id, &tag)?, "task", &id),
        TaskCommand::Untag { id, tag } => changed(store.remove_tag(&id, &tag)?, "task", &id),
        TaskCommand::Percent { id } => match app.query().calculate_task_progress(&id)? {
            Some(percent) => print_json(&json!({ "id": id, "progress": percent })),
            None => bail!("task not found: {id}"),
        },
    }
}

fn run_category(app: &App, command: CategoryCommand) -> Result<()> {
    let index = app.categories();
    match command {
        CategoryCommand::Create {
            name,
            description,
            color,
            icon,
        } => {
            let created = index.create(NewCategory {
                name: name.clone(),
                description,
                color,
                icon,
            })?;
            if !created {
                bail!("category already exists: {name}");
            }
            print_json(&json!({ "name": name, "ok": true }))
        }
        CategoryCommand::Show { name } => match index.get(&name)? {
            Some(category) => print_json(&category),
            None => bail!("category not found: {name}"),
        },
        CategoryCommand::List => print_json(&index.list()?),
        CategoryCommand::Update {
            name,
            rename,
            description,
            color,
            icon,
            clear_icon,
        } => {
            let icon = if clear_icon { Some(None) } else { icon.map(Some) };
            let outcome = index.update(
                &name,
                CategoryPatch {
                    name: rename.clone(),
                    description,
                    color,
                    icon,
                },
            )?;
            match outcome {
                CategoryUpdate::Updated => print_json(&json!({
                    "name": rename.unwrap_or(name),
                    "ok": true,
                })),
                CategoryUpdate::NotFound => bail!("category not found: {name}"),
                CategoryUpdate::NameConflict => bail!(
                    "category already exists: {}",
                    rename.unwrap_or_default()
                ),
            }
        }
        CategoryCommand::Delete { name } => changed(index.delete(&name)?, "category", &name),
        CategoryCommand::Tasks { name } => {
            if !index.exists(&name)? {
                bail!("category not found: {name}");
            }
            print_json(&index.tasks(&name)?)
        }
        CategoryCommand::Stats => print_json(&index.stats()?),
        CategoryCommand::Assign { name, id } => changed(
            index.assign_task(&name, &id)?,
            "category or task",
            &format!("{name}/{id}"),
        ),
        CategoryCommand::Unassign { name, id } => {
            changed(index.unassign_task(&name, &id)?, "category", &name)
        }
    }
}

fn run_daily(app: &App, command: DailyCommand) -> Result<()> {
    let daily = app.daily();
    match command {
        DailyCommand::List { date } => print_json(&daily.list(date)?),
        DailyCommand::Tasks { date } => print_json(&daily.tasks_for(date)?),
        DailyCommand::Add { id, date } => {
            let Some(task) = app.tasks().read(&id)? else {
                bail!("task not found: {id}");
            };
            let added = daily.add(&task.id, &task.title, date)?;
            print_json(&json!({ "id": id, "added": added }))
        }
        DailyCommand::Remove { id, date } => {
            let removed = daily.remove(&id, date)?;
            print_json(&json!({ "id": id, "removed": removed }))
        }
    }
}
