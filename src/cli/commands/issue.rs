//! Issue command implementations.
//!
//! A thin front-end over the local store so issues can be created and
//! edited before they are pushed.

use crate::cli::{
    IssueCommands, IssueCreateArgs, IssueDepCommands, IssueListArgs, IssueUpdateArgs,
};
use crate::cli::commands::open_storage;
use crate::error::Result;
use crate::model::{generate_issue_id, IssueStatus, IssueType, LocalIssue};
use crate::storage::{IssueFilter, SqliteStorage};
use crate::sync::SyncRecord;
use serde::Serialize;
use std::path::PathBuf;

/// Output for issue list.
#[derive(Serialize)]
struct IssueListOutput<'a> {
    issues: &'a [LocalIssue],
    count: usize,
}

/// Execute issue commands.
pub fn execute(command: &IssueCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let storage = open_storage(db_path)?;

    match command {
        IssueCommands::Create(args) => create(&storage, args, json),
        IssueCommands::List(args) => list(&storage, args, json),
        IssueCommands::Show { id } => show(&storage, id, json),
        IssueCommands::Update(args) => update(&storage, args, json),
        IssueCommands::Dep { command } => dep(&storage, command, json),
    }
}

fn create(storage: &SqliteStorage, args: &IssueCreateArgs, json: bool) -> Result<()> {
    let issue_type: IssueType = args.issue_type.parse()?;
    let status: IssueStatus = args.status.parse()?;

    let mut issue = LocalIssue::new(generate_issue_id(), args.title.trim())
        .with_type(issue_type)
        .with_status(status);
    if let Some(body) = &args.body {
        issue.body.clone_from(body);
    }
    issue.parent.clone_from(&args.parent);
    issue.tags = args.tags.iter().map(|t| t.trim().to_string()).filter(|t| !t.is_empty()).collect();
    issue.blocked_by = args.blocked_by.iter().cloned().collect();

    let created = storage.create_issue(&issue)?;

    if json {
        println!("{}", serde_json::to_string(&created)?);
    } else {
        println!("Created issue: {} [{}]", created.title, created.id);
        println!("  Type:   {}", created.issue_type);
        println!("  Status: {}", created.status);
    }
    Ok(())
}

fn list(storage: &SqliteStorage, args: &IssueListArgs, json: bool) -> Result<()> {
    let mut filter = IssueFilter {
        include_closed: args.all,
        limit: args.limit,
        ..IssueFilter::default()
    };
    match args.status.as_deref() {
        Some("all") => filter.include_closed = true,
        Some(status) => filter.status = Some(status.parse()?),
        None => {}
    }
    if let Some(issue_type) = &args.issue_type {
        filter.issue_type = Some(issue_type.parse()?);
    }

    let issues = storage.list_issues(&filter)?;

    if json {
        let output = IssueListOutput {
            issues: &issues,
            count: issues.len(),
        };
        println!("{}", serde_json::to_string(&output)?);
    } else if issues.is_empty() {
        println!("No issues found.");
    } else {
        print_issue_list(&issues);
    }
    Ok(())
}

/// Print formatted issue list to stdout.
fn print_issue_list(issues: &[LocalIssue]) {
    println!("Issues ({} found):", issues.len());
    println!();
    for issue in issues {
        let status_icon = match issue.status {
            IssueStatus::Open | IssueStatus::Ready => "○",
            IssueStatus::InProgress => "●",
            IssueStatus::Blocked => "⊘",
            IssueStatus::Closed => "✓",
            IssueStatus::Backlog | IssueStatus::Deferred => "◌",
        };
        println!(
            "{} [{}] {} ({})",
            status_icon, issue.id, issue.title, issue.issue_type
        );
        if let Some(parent) = &issue.parent {
            println!("        parent: {parent}");
        }
    }
}

fn show(storage: &SqliteStorage, id: &str, json: bool) -> Result<()> {
    let issue = storage.require_issue(id)?;

    let mut records = Vec::new();
    for service in ["github", "clickup"] {
        if let Some(data) = storage.get_sync_extension(id, service)? {
            records.push((service, data));
        }
    }

    if json {
        let sync: serde_json::Map<String, serde_json::Value> = records
            .into_iter()
            .map(|(service, data)| (service.to_string(), serde_json::Value::Object(data)))
            .collect();
        let output = serde_json::json!({ "issue": issue, "sync": sync });
        println!("{output}");
        return Ok(());
    }

    println!("[{}] {}", issue.id, issue.title);
    println!();
    println!("Status:   {}", issue.status);
    println!("Type:     {}", issue.issue_type);
    if let Some(parent) = &issue.parent {
        println!("Parent:   {parent}");
    }
    if !issue.tags.is_empty() {
        println!("Tags:     {}", join(&issue.tags));
    }
    if !issue.blocked_by.is_empty() {
        println!("Blocked by: {}", join(&issue.blocked_by));
    }
    if !issue.blocking.is_empty() {
        println!("Blocking:   {}", join(&issue.blocking));
    }
    if !issue.body.is_empty() {
        println!();
        println!("{}", issue.body);
    }
    for (service, data) in &records {
        let record = SyncRecord::from_data(data);
        println!();
        println!("Synced to {service}: {}", describe_record(&record));
    }
    Ok(())
}

fn update(storage: &SqliteStorage, args: &IssueUpdateArgs, json: bool) -> Result<()> {
    let mut issue = storage.require_issue(&args.id)?;

    if let Some(title) = &args.title {
        issue.title = title.trim().to_string();
    }
    if let Some(body) = &args.body {
        issue.body.clone_from(body);
    }
    if let Some(status) = &args.status {
        issue.status = status.parse()?;
    }
    if let Some(issue_type) = &args.issue_type {
        issue.issue_type = issue_type.parse()?;
    }
    if args.no_parent {
        issue.parent = None;
    } else if let Some(parent) = &args.parent {
        issue.parent = Some(parent.clone());
    }
    for tag in &args.add_tags {
        issue.tags.insert(tag.trim().to_string());
    }
    for tag in &args.remove_tags {
        issue.tags.remove(tag.trim());
    }

    let updated = storage.update_issue(&issue)?;

    if json {
        println!("{}", serde_json::to_string(&updated)?);
    } else {
        println!("Updated issue: {}", updated.id);
    }
    Ok(())
}

fn dep(storage: &SqliteStorage, command: &IssueDepCommands, json: bool) -> Result<()> {
    match command {
        IssueDepCommands::Add { id, blocked_by } => {
            storage.add_block(blocked_by, id)?;

            if json {
                let output = serde_json::json!({
                    "issue_id": id,
                    "blocked_by": blocked_by,
                });
                println!("{output}");
            } else {
                println!("Added dependency: {id} is blocked by {blocked_by}");
            }
        }
        IssueDepCommands::Remove { id, blocked_by } => {
            let removed = storage.remove_block(blocked_by, id)?;

            if json {
                let output = serde_json::json!({
                    "issue_id": id,
                    "blocked_by": blocked_by,
                    "removed": removed,
                });
                println!("{output}");
            } else if removed {
                println!("Removed dependency: {id} is no longer blocked by {blocked_by}");
            } else {
                println!("No dependency: {blocked_by} does not block {id}");
            }
        }
    }
    Ok(())
}

fn join(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

/// One-line summary of a sync record.
pub(crate) fn describe_record(record: &SyncRecord) -> String {
    let target = match (record.milestone, record.number, &record.remote_key) {
        (Some(m), _, _) => format!("milestone {m}"),
        (None, Some(n), _) => format!("#{n}"),
        (None, None, Some(key)) => key.clone(),
        (None, None, None) => "-".to_string(),
    };
    match record.synced_at {
        Some(at) => format!("{target} (synced {})", at.format("%Y-%m-%d %H:%M:%S UTC")),
        None => format!("{target} (never synced)"),
    }
}
