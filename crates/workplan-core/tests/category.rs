use std::fs;

use chrono::NaiveDate;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

use workplan_core::config::Settings;
use workplan_core::{App, CategoryPatch, CategoryUpdate, Clock, NewCategory, NewTask};

fn open(temp: &TempDir) -> App {
    App::open(temp.path())
        .expect("open")
        .with_clock(Clock::Fixed(NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()))
}

fn create_in(app: &App, title: &str, category: &str) -> String {
    app.tasks()
        .create(NewTask {
            category: category.to_string(),
            ..NewTask::titled(title)
        })
        .expect("create task")
}

#[test]
fn category_lifecycle_scenario() {
    let temp = TempDir::new().expect("tempdir");
    let app = open(&temp);
    assert!(app
        .categories()
        .create(NewCategory::named("Work"))
        .expect("create"));
    let id = create_in(&app, "Report", "Work");

    let members = app.categories().tasks("Work").expect("tasks");
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].id, id);

    assert!(app.categories().delete("Work").expect("delete"));
    assert_eq!(app.tasks().read(&id).unwrap().unwrap().category, "");
    assert!(app.categories().get("Work").unwrap().is_none());
    assert!(!app.categories().delete("Work").expect("delete again"));
}

#[test]
fn rename_cascades_onto_member_tasks() {
    let temp = TempDir::new().expect("tempdir");
    let app = open(&temp);
    let a = create_in(&app, "A", "Old");
    let b = create_in(&app, "B", "Old");
    let other = create_in(&app, "C", "Other");

    assert_eq!(
        app.categories().rename("Old", "New").expect("rename"),
        CategoryUpdate::Updated
    );
    assert!(app.categories().get("Old").unwrap().is_none());
    assert!(!app.layout().category_path("Old").exists());
    let renamed = app.categories().get("New").unwrap().unwrap();
    assert_eq!(renamed.name, "New");
    assert_eq!(renamed.tasks, vec![a.clone(), b.clone()]);
    for id in [&a, &b] {
        assert_eq!(app.tasks().read(id).unwrap().unwrap().category, "New");
    }
    assert_eq!(app.tasks().read(&other).unwrap().unwrap().category, "Other");
}

#[test]
fn update_changes_fields_without_touching_members() {
    let temp = TempDir::new().expect("tempdir");
    let app = open(&temp);
    let id = create_in(&app, "A", "Work");
    let outcome = app
        .categories()
        .update(
            "Work",
            CategoryPatch {
                description: Some("Day job".to_string()),
                icon: Some(Some("briefcase".to_string())),
                ..CategoryPatch::default()
            },
        )
        .expect("update");
    assert_eq!(outcome, CategoryUpdate::Updated);
    let category = app.categories().get("Work").unwrap().unwrap();
    assert_eq!(category.description, "Day job");
    assert_eq!(category.icon.as_deref(), Some("briefcase"));
    assert_eq!(category.tasks, vec![id]);
    assert_eq!(category.updated_at, "2026-10-18");
}

#[test]
fn implicit_category_uses_configured_default_color() {
    let temp = TempDir::new().expect("tempdir");
    let settings = Settings {
        default_category_color: "#222222".to_string(),
        ..Settings::default()
    };
    let app = App::with_settings(temp.path(), settings).expect("open");
    let id = create_in(&app, "A", "Errands");
    let category = app.categories().get("Errands").unwrap().unwrap();
    assert_eq!(category.color, "#222222");
    assert_eq!(category.tasks, vec![id]);
}

#[test]
fn sanitized_names_round_trip_through_lookup() {
    let temp = TempDir::new().expect("tempdir");
    let app = open(&temp);
    app.categories()
        .create(NewCategory::named("Home/Garden"))
        .expect("create");
    assert!(app.layout().categories_dir().join("Home_Garden.json").is_file());
    assert!(app.categories().exists("Home/Garden").unwrap());

    let text = fs::read_to_string(app.layout().category_path("Home/Garden")).expect("read");
    let json: serde_json::Value = serde_json::from_str(&text).expect("json");
    assert_eq!(json["name"], "Home/Garden");
    assert_eq!(json["tasks"], serde_json::json!([]));
    assert_eq!(json["icon"], serde_json::Value::Null);
}

#[test]
fn list_and_stats_are_sorted_by_name() {
    let temp = TempDir::new().expect("tempdir");
    let app = open(&temp);
    create_in(&app, "A", "Zeta");
    create_in(&app, "B", "Alpha");
    create_in(&app, "C", "Alpha");
    let names: Vec<String> = app
        .categories()
        .list()
        .unwrap()
        .into_iter()
        .map(|category| category.name)
        .collect();
    assert_eq!(names, vec!["Alpha", "Zeta"]);
    let stats = app.categories().stats().unwrap();
    assert_eq!(stats["Alpha"].task_count, 2);
    assert_eq!(stats["Zeta"].task_count, 1);
}
