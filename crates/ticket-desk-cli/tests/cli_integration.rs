use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn run_tdesk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_tdesk"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute tdesk binary: {err}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_tdesk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "tdesk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

#[test]
fn ticket_lifecycle_end_to_end() {
    let dir = unique_temp_dir("tdesk-cli");
    let db = dir.join("desk.sqlite3");
    let db = path_str(&db);

    let status = run_json(["--db", db, "db", "migrate"]);
    assert_eq!(as_i64(&status, "current_version"), as_i64(&status, "target_version"));

    let dana = run_json([
        "--db", db, "user", "add", "--name", "Dana", "--email", "dana@example.com", "--role",
        "requester",
    ]);
    let sam = run_json([
        "--db", db, "user", "add", "--name", "Sam", "--email", "sam@example.com", "--role",
        "datamember",
    ]);
    let admin = run_json([
        "--db", db, "user", "add", "--name", "Root", "--email", "root@example.com", "--role",
        "admin",
    ]);
    let dana_id = as_i64(&dana, "id").to_string();
    let sam_id = as_i64(&sam, "id").to_string();
    let admin_id = as_i64(&admin, "id").to_string();

    let ticket = run_json([
        "--db", db, "ticket", "create", "--title", "Printer broken", "--description",
        "It will not turn on", "--requester", &dana_id, "--request-type", "bug", "--priority",
        "high", "--due-date", "2099-01-01",
    ]);
    assert_eq!(as_str(&ticket, "status"), "OPEN");
    assert_eq!(as_str(&ticket, "priority"), "HIGH");
    let ticket_id = as_i64(&ticket, "id").to_string();

    let assigned = run_json([
        "--db", db, "ticket", "assign", "--id", &ticket_id, "--assignee", &sam_id, "--actor",
        &admin_id,
    ]);
    assert_eq!(as_str(&assigned, "status"), "INPROGRESS");
    assert_eq!(as_i64(&assigned, "assigned_to"), as_i64(&sam, "id"));

    let resolved = run_json([
        "--db", db, "ticket", "status", "--id", &ticket_id, "--status", "resolved", "--actor",
        &sam_id,
    ]);
    assert_eq!(as_str(&resolved, "status"), "RESOLVED");

    run_json([
        "--db", db, "comment", "add", "--ticket", &ticket_id, "--author", &sam_id, "--body",
        "replaced the fuser", "--visibility", "internal",
    ]);
    run_json([
        "--db", db, "comment", "add", "--ticket", &ticket_id, "--author", &sam_id, "--body",
        "all fixed now",
    ]);

    let for_requester =
        run_json(["--db", db, "comment", "list", "--ticket", &ticket_id, "--viewer", &dana_id]);
    let for_staff =
        run_json(["--db", db, "comment", "list", "--ticket", &ticket_id, "--viewer", &sam_id]);
    assert_eq!(for_requester.as_array().map(Vec::len), Some(1));
    assert_eq!(for_staff.as_array().map(Vec::len), Some(2));

    let history = run_json(["--db", db, "audit", "--ticket", &ticket_id]);
    let actions: Vec<&str> = history
        .as_array()
        .unwrap_or_else(|| panic!("audit payload is not an array: {history}"))
        .iter()
        .map(|entry| as_str(entry, "action"))
        .collect();
    assert_eq!(
        actions,
        vec!["COMMENT_ADDED", "COMMENT_ADDED", "STATUS_CHANGED", "ASSIGNED", "TICKET_CREATED"]
    );

    let unassigned = run_json(["--db", db, "ticket", "list", "--unassigned"]);
    assert_eq!(unassigned.as_array().map(Vec::len), Some(0));
}

#[test]
fn ingest_creates_tickets_from_drop_files() {
    let dir = unique_temp_dir("tdesk-ingest");
    let db = dir.join("desk.sqlite3");
    let db = path_str(&db);
    let maildir = dir.join("mail");
    fs::create_dir_all(&maildir)
        .unwrap_or_else(|err| panic!("failed to create maildir: {err}"));

    fs::write(
        maildir.join("001.txt"),
        "From: new.person@example.com\nSubject: Access\n\nTitle: Access request\nDescription: Need the reporting share\nPriority: MEDIUM\nRequest Type: DATA_ACCESS\nAssigned To: Not assigned yet\n",
    )
    .unwrap_or_else(|err| panic!("failed to write drop file: {err}"));

    let report = run_json(["--db", db, "ingest", "--maildir", path_str(&maildir)]);
    let created = report
        .get("created")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing created array: {report}"));
    assert_eq!(created.len(), 1);

    let ticket_id = created[0]
        .as_i64()
        .unwrap_or_else(|| panic!("created id is not an integer: {report}"))
        .to_string();
    let ticket = run_json(["--db", db, "ticket", "show", "--id", &ticket_id]);
    assert_eq!(as_str(&ticket, "title"), "Access request");
    assert_eq!(as_str(&ticket, "priority"), "MEDIUM");
    assert_eq!(as_str(&ticket, "request_type"), "DATA_ACCESS");

    // The sender was provisioned as a requester with a pending invite token.
    let users = run_json(["--db", db, "user", "list"]);
    let provisioned = users
        .as_array()
        .and_then(|list| {
            list.iter().find(|user| user.get("email").and_then(Value::as_str)
                == Some("new.person@example.com"))
        })
        .unwrap_or_else(|| panic!("provisioned user missing: {users}"));
    assert_eq!(as_str(provisioned, "role"), "requester");
    assert!(provisioned.get("invite_token").and_then(Value::as_str).is_some());

    // A second run finds nothing unseen.
    let report = run_json(["--db", db, "ingest", "--maildir", path_str(&maildir)]);
    assert_eq!(report.get("created").and_then(Value::as_array).map(Vec::len), Some(0));
}

#[test]
fn chat_single_message_round_trip() {
    let dir = unique_temp_dir("tdesk-chat");
    let db = dir.join("desk.sqlite3");
    let db = path_str(&db);

    let dana = run_json([
        "--db", db, "user", "add", "--name", "Dana", "--email", "dana@example.com", "--role",
        "requester",
    ]);
    let dana_id = as_i64(&dana, "id").to_string();

    let output = run_tdesk(["--db", db, "chat", "--user", &dana_id, "--message", "hello"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Welcome to the support desk!"));
}
