//! Command handlers
//!
//! The implementations behind the CLI commands: the scheduler daemon, the
//! course linter, and the course outline printer.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::course::{load_course_file, Catalog, CourseDefinition, CourseStore, FileCourseStore};
use crate::db::Database;
use crate::element::{parse_duration, ElementKind};
use crate::nav;
use crate::scheduler::{sweep_cadence, LogNotifier, Scheduler};

/// Default sweep cadence when the configured one is unusable
const DEFAULT_SWEEP_CADENCE: std::time::Duration = std::time::Duration::from_secs(60);

/// Run the waiting-queue scheduler until Ctrl-C
pub async fn handle_serve(config: &Config) -> Result<()> {
    let db = Database::new(&config.db_path()).await?;
    let cadence = sweep_cadence(&config.scheduler.check_interval, DEFAULT_SWEEP_CADENCE);

    let scheduler = Scheduler::new(db.waiting(), Arc::new(LogNotifier));
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let scheduler_task = tokio::spawn(scheduler.run(cadence, shutdown_rx));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    shutdown_tx.send(true).ok();
    scheduler_task.await.ok();
    db.close().await?;

    Ok(())
}

/// Lint a course script and print the findings
pub async fn handle_validate(path: &Path) -> Result<()> {
    let course_id = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("course");
    let course = load_course_file(course_id, path)?;

    let findings = lint_course(&course);
    if findings.is_empty() {
        println!("{}: {} elements, no problems found.", course_id, course.len());
    } else {
        println!("{}: {} problem(s)", course_id, findings.len());
        for finding in &findings {
            println!("  - {}", finding);
        }
    }

    Ok(())
}

/// Print the outline of a cataloged course
pub async fn handle_show(course_id: &str, config: &Config) -> Result<()> {
    let catalog = Catalog::load(&config.courses.catalog)?;
    let store = FileCourseStore::new(catalog);
    let course = store.load(course_id).await?;

    println!("{} ({} elements)", course_id, course.len());
    for (id, spec) in course.iter() {
        let text = spec.text.as_deref().unwrap_or("");
        let preview: String = text.chars().take(48).collect();
        println!("  {:<24} {:<12} {}", id, spec.kind.type_tag(), preview);
    }

    Ok(())
}

/// Static checks over one course definition
pub fn lint_course(course: &CourseDefinition) -> Vec<String> {
    let mut findings = Vec::new();

    let target_exists = |target: &str| course.get(target).is_some();

    for (id, spec) in course.iter() {
        match &spec.kind {
            ElementKind::Unknown => {
                findings.push(format!("{}: unimplemented element type (will be skipped)", id));
            }
            ElementKind::Quiz { answers } => {
                let correct = answers.iter().filter(|a| a.correct).count();
                if correct != 1 {
                    findings.push(format!(
                        "{}: quiz must flag exactly one correct answer, found {}",
                        id, correct
                    ));
                }
            }
            ElementKind::MultiChoice { answers, .. } => {
                if answers.is_empty() {
                    findings.push(format!("{}: multichoice has no answers", id));
                }
            }
            ElementKind::Delay { wait, goto } => {
                if parse_duration(wait).is_err() {
                    findings.push(format!("{}: invalid wait duration '{}'", id, wait));
                }
                if !target_exists(goto) {
                    findings.push(format!("{}: delay target '{}' does not exist", id, goto));
                }
            }
            ElementKind::Jump { options } => {
                for (i, option) in options.iter().enumerate() {
                    if let Some(wait) = &option.wait {
                        if parse_duration(wait).is_err() {
                            findings.push(format!(
                                "{}: option {} has invalid wait '{}'",
                                id, i, wait
                            ));
                        }
                    }
                    if let Some(goto) = &option.goto {
                        if !target_exists(goto) {
                            findings.push(format!(
                                "{}: option {} targets missing element '{}'",
                                id, i, goto
                            ));
                        }
                    }
                }
            }
            ElementKind::Test { prefix, .. } | ElementKind::Revision { prefix, .. } => {
                if !course.ids().any(|other| other.starts_with(prefix.as_str())) {
                    findings.push(format!(
                        "{}: no element ids start with prefix '{}'",
                        id, prefix
                    ));
                }
            }
            _ => {}
        }
    }

    // Traversal sanity: walking from the start must reach the end.
    if let Ok((start_id, _)) = course.start() {
        let mut visited = 1usize;
        let mut cursor = start_id.to_string();
        while let Some((next_id, _)) = nav::next(course, &cursor) {
            visited += 1;
            cursor = next_id.to_string();
            if visited > course.len() {
                findings.push("traversal did not terminate".to_string());
                break;
            }
        }
    }

    findings
}
