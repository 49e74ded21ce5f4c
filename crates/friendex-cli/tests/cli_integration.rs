use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use friendex_core::parse_timestamp;
use serde_json::Value;
use time::{Duration, OffsetDateTime, PrimitiveDateTime};

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

fn friendex_command() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_friendex"));
    // Tests compare against UTC wall-clock time.
    command.env("TZ", "UTC").env_remove("FRIENDEX_DB").env_remove("FRIENDEX_LOG");
    command
}

fn run_friendex<I, S>(db: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    friendex_command()
        .arg("--dbfile")
        .arg(db)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|err| panic!("failed to execute friendex binary: {err}"))
}

fn run_with_stdin<I, S>(db: &Path, args: I, input: &str) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut child = friendex_command()
        .arg("--dbfile")
        .arg(db)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|err| panic!("failed to spawn friendex binary: {err}"));
    child
        .stdin
        .take()
        .unwrap_or_else(|| panic!("child stdin should be piped"))
        .write_all(input.as_bytes())
        .unwrap_or_else(|err| panic!("failed to write child stdin: {err}"));
    child
        .wait_with_output()
        .unwrap_or_else(|err| panic!("failed to wait for friendex binary: {err}"))
}

fn assert_success(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "friendex command failed (status={}):\nstdout:\n{stdout}\nstderr:\n{stderr}",
            output.status
        );
    }
    stdout
}

fn run_ok<I, S>(db: &Path, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    assert_success(&run_friendex(db, args))
}

fn run_json<'a, I>(db: &Path, args: I) -> Value
where
    I: IntoIterator<Item = &'a str>,
{
    let mut all = vec!["--json"];
    all.extend(args);
    let stdout = run_ok(db, all);
    let stdout = stdout.trim();
    serde_json::from_str(stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(stdout.trim())
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn utc_now() -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc();
    PrimitiveDateTime::new(now.date(), now.time())
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or_else(|| panic!("process should exit with a code"))
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn friend_names(friends: &[Value]) -> Vec<&str> {
    friends.iter().map(|friend| as_str(friend, "name")).collect()
}

#[test]
fn add_then_check_prints_friend_with_topic_log() {
    let dir = unique_temp_dir("friendex-add-check");
    let db = dir.join("friends.db");

    let added = run_ok(
        &db,
        ["--add", "Alice", "--time", "2024-01-01 10:00:00 AM", "--note", "lunch"],
    );
    assert_eq!(added, "Added friend: Alice\n");

    let checked = run_ok(&db, ["--check", "Alice"]);
    assert!(checked.starts_with("Friend: Alice\nLast Spoken: 2024-01-01 10:00:00 AM\n"));
    assert!(checked.contains("Days Since Last Spoken: "));
    assert!(checked.contains("Last Spoken: 2024-01-01 10:00:00 AM\nTopic: lunch\n-------------------\n"));
    assert!(checked.ends_with("-------------------\n-------------------\n"));
}

#[test]
fn add_prompts_on_stderr_and_reads_answers_from_stdin() {
    let dir = unique_temp_dir("friendex-interactive");
    let db = dir.join("friends.db");

    let output = run_with_stdin(&db, ["--add", "Bea"], "2024-03-01 02:15:00 pm\ncoffee\n");
    assert_eq!(assert_success(&output), "Added friend: Bea\n");
    let prompts = stderr(&output);
    assert!(prompts.contains("Enter the last spoken date and time"));
    assert!(prompts.contains("Enter the topic of discussion: "));

    let checked = run_json(&db, ["--check", "Bea"]);
    let check = &checked["check"];
    assert_eq!(as_str(check, "last_spoken"), "2024-03-01 02:15:00 PM");
    assert_eq!(as_str(&as_array(check, "records")[0], "topic"), "coffee");
}

#[test]
fn deleting_unknown_friend_is_not_found() {
    let dir = unique_temp_dir("friendex-delete-missing");
    let db = dir.join("friends.db");

    let output = run_friendex(&db, ["--delete", "Bob"]);
    assert_eq!(exit_code(&output), 4);
    assert!(stderr(&output).contains("Friend 'Bob' not found."));
    assert!(output.stdout.is_empty());
}

#[test]
fn delete_removes_friend_and_its_records() {
    let dir = unique_temp_dir("friendex-delete");
    let db = dir.join("friends.db");
    run_ok(&db, ["--add", "Alice", "--time", "2024-01-01 10:00:00 AM", "--note", "lunch"]);

    assert_eq!(run_ok(&db, ["--delete", "Alice"]), "Deleted friend: Alice\n");
    assert_eq!(exit_code(&run_friendex(&db, ["--check", "Alice"])), 4);
    assert_eq!(run_ok(&db, ["--topic", "lunch"]), "No results for lunch\n");
}

#[test]
fn duplicate_add_fails_without_touching_existing_data() {
    let dir = unique_temp_dir("friendex-duplicate");
    let db = dir.join("friends.db");
    run_ok(&db, ["--add", "Alice", "--time", "2024-01-01 10:00:00 AM", "--note", "lunch"]);

    let output = run_friendex(
        &db,
        ["--add", "Alice", "--time", "2024-02-01 10:00:00 AM", "--note", "dinner"],
    );
    assert_eq!(exit_code(&output), 5);
    assert!(stderr(&output).contains("Friend 'Alice' already exists."));

    let checked = run_json(&db, ["--check", "Alice"]);
    assert_eq!(as_str(&checked["check"], "last_spoken"), "2024-01-01 10:00:00 AM");
    assert_eq!(as_array(&checked["check"], "records").len(), 1);
}

#[test]
fn invalid_time_writes_nothing() {
    let dir = unique_temp_dir("friendex-invalid-time");
    let db = dir.join("friends.db");

    let output = run_friendex(&db, ["--add", "Alice", "--time", "yesterday", "--note", "lunch"]);
    assert_eq!(exit_code(&output), 3);
    assert!(stderr(&output).contains("invalid time format 'yesterday'"));

    assert_eq!(run_ok(&db, ["--read"]), "No friends recorded yet.\n");
}

#[test]
fn single_digit_hour_is_accepted() {
    let dir = unique_temp_dir("friendex-short-hour");
    let db = dir.join("friends.db");

    run_ok(&db, ["--add", "Alice", "--time", "2024-01-01 9:00:00 AM", "--note", "brunch"]);
    let checked = run_json(&db, ["--check", "Alice"]);
    assert_eq!(as_str(&checked["check"], "last_spoken"), "2024-01-01 09:00:00 AM");
}

#[test]
fn blank_name_is_a_validation_error() {
    let dir = unique_temp_dir("friendex-blank-name");
    let db = dir.join("friends.db");

    let output = run_friendex(&db, ["--add", "   ", "--time", "now", "--note", "x"]);
    assert_eq!(exit_code(&output), 6);
}

#[test]
fn update_with_now_appends_record_and_keeps_history() {
    let dir = unique_temp_dir("friendex-update-now");
    let db = dir.join("friends.db");
    run_ok(&db, ["--add", "Alice", "--time", "2024-01-01 10:00:00 AM", "--note", "lunch"]);

    let before = utc_now();
    let updated = run_json(&db, ["--update", "Alice", "--time", "now", "--note", "movies"]);
    let after = utc_now();
    assert_eq!(as_str(&updated["update"], "name"), "Alice");

    let check = run_json(&db, ["--check", "Alice"]);
    let check = &check["check"];
    let last_spoken = parse_timestamp(as_str(check, "last_spoken"))
        .unwrap_or_else(|err| panic!("last_spoken should parse: {err}"));
    // Display text drops sub-second digits.
    assert!(last_spoken >= before - Duration::seconds(1), "{last_spoken} < {before}");
    assert!(last_spoken <= after + Duration::seconds(2), "{last_spoken} > {after}");
    assert_eq!(check["days_since_spoken"], 0);

    let records = as_array(check, "records");
    assert_eq!(records.len(), 2);
    assert_eq!(as_str(&records[0], "last_spoken"), "2024-01-01 10:00:00 AM");
    assert_eq!(as_str(&records[0], "topic"), "lunch");
    assert_eq!(as_str(&records[1], "topic"), "movies");
}

#[test]
fn update_unknown_friend_fails_before_prompting() {
    let dir = unique_temp_dir("friendex-update-missing");
    let db = dir.join("friends.db");

    let output = run_friendex(&db, ["--update", "Ghost"]);
    assert_eq!(exit_code(&output), 4);
    assert!(!stderr(&output).contains("Enter the last spoken date"));
}

#[test]
fn actions_run_in_fixed_order() {
    let dir = unique_temp_dir("friendex-order");
    let db = dir.join("friends.db");
    run_ok(&db, ["--add", "Bob", "--time", "2024-01-01 10:00:00 AM", "--note", "chess"]);

    // --delete is listed first on the command line but runs after --add and --read.
    let stdout = run_ok(
        &db,
        [
            "--delete",
            "Bob",
            "--read",
            "--add",
            "Carol",
            "--time",
            "2024-01-02 10:00:00 AM",
            "--note",
            "tennis",
        ],
    );
    let added = stdout.find("Added friend: Carol").unwrap_or_else(|| panic!("{stdout}"));
    let read_bob = stdout.find("Friend: Bob").unwrap_or_else(|| panic!("{stdout}"));
    let deleted = stdout.find("Deleted friend: Bob").unwrap_or_else(|| panic!("{stdout}"));
    assert!(added < read_bob && read_bob < deleted, "{stdout}");

    let listed = run_json(&db, ["--read"]);
    assert_eq!(friend_names(as_array(&listed["read"], "friends")), ["Carol"]);
}

#[test]
fn first_failing_action_stops_the_run() {
    let dir = unique_temp_dir("friendex-stop");
    let db = dir.join("friends.db");

    let output = run_friendex(&db, ["--delete", "Nobody", "--check", "Nobody", "--days-since", "0"]);
    assert_eq!(exit_code(&output), 4);
    assert!(output.stdout.is_empty());
}

#[test]
fn json_failure_still_reports_completed_actions() {
    let dir = unique_temp_dir("friendex-json-failure");
    let db = dir.join("friends.db");

    let output = run_friendex(
        &db,
        ["--json", "--add", "Alice", "--time", "now", "--note", "x", "--check", "Nobody"],
    );
    assert_eq!(exit_code(&output), 4);
    assert!(stderr(&output).contains("Friend 'Nobody' not found."));

    let payload = stdout_json(&output);
    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert_eq!(as_str(&payload["add"], "name"), "Alice");
    assert_eq!(as_str(&payload["add"], "topic"), "x");
    assert_eq!(as_str(&payload["error"], "kind"), "friend_not_found");
    assert_eq!(as_str(&payload["error"], "message"), "Friend 'Nobody' not found.");
    assert!(payload.get("check").is_none());

    let listed = run_json(&db, ["--read"]);
    assert_eq!(friend_names(as_array(&listed["read"], "friends")), ["Alice"]);
}

#[test]
fn days_since_filters_by_whole_days() {
    let dir = unique_temp_dir("friendex-days-since");
    let db = dir.join("friends.db");
    run_ok(&db, ["--add", "Old", "--time", "2020-01-01 09:00:00 AM", "--note", "catch up"]);
    run_ok(&db, ["--add", "Recent", "--time", "now", "--note", "coffee"]);

    let stale = run_json(&db, ["--days-since", "30"]);
    assert_eq!(stale["days_since"]["min_days"], 30);
    assert_eq!(friend_names(as_array(&stale["days_since"], "friends")), ["Old"]);

    let everyone = run_json(&db, ["--days-since", "0"]);
    assert_eq!(friend_names(as_array(&everyone["days_since"], "friends")), ["Old", "Recent"]);

    assert_eq!(
        run_ok(&db, ["--days-since", "100000"]),
        "No friends with at least 100000 days since last spoken.\n"
    );
}

#[test]
fn topic_search_ranks_every_record() {
    let dir = unique_temp_dir("friendex-topic");
    let db = dir.join("friends.db");

    assert_eq!(run_ok(&db, ["--topic", "hiking"]), "No results for hiking\n");

    run_ok(&db, ["--add", "Alice", "--time", "2024-01-01 10:00:00 AM", "--note", "gardening"]);
    run_ok(&db, ["--add", "Bob", "--time", "2024-01-02 10:00:00 AM", "--note", "weekend hiking trip"]);

    let result = run_json(&db, ["--topic", "hiking weekend"]);
    assert_eq!(as_str(&result["topic"], "query"), "hiking weekend");
    let matches = as_array(&result["topic"], "matches");
    assert_eq!(friend_names(matches), ["Bob", "Alice"]);
    assert_eq!(matches[0]["score"], 100);
    assert_eq!(as_str(&matches[0], "last_spoken"), "2024-01-02 10:00:00 AM");

    let text = run_ok(&db, ["--topic", "hiking weekend"]);
    assert!(text.starts_with(
        "Friend: Bob\nLast Spoken: 2024-01-02 10:00:00 AM\nTopic: weekend hiking trip\nScore: 100\n"
    ));
}

#[test]
fn database_path_comes_from_environment() {
    let dir = unique_temp_dir("friendex-env-db");
    let db = dir.join("from-env.db");

    let output = friendex_command()
        .env("FRIENDEX_DB", &db)
        .args(["--add", "Alice", "--time", "now", "--note", "hello"])
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|err| panic!("failed to execute friendex binary: {err}"));
    assert_success(&output);
    assert!(db.exists(), "expected database at {}", db.display());
}

#[test]
fn json_output_carries_contract_version() {
    let dir = unique_temp_dir("friendex-json");
    let db = dir.join("friends.db");

    let empty = run_json(&db, ["--read"]);
    assert_eq!(as_str(&empty, "contract_version"), "cli.v1");
    assert!(as_array(&empty["read"], "friends").is_empty());
}

#[test]
fn no_arguments_is_a_usage_error() {
    let output = friendex_command()
        .stdin(Stdio::null())
        .output()
        .unwrap_or_else(|err| panic!("failed to execute friendex binary: {err}"));
    assert_eq!(exit_code(&output), 2);
    assert!(stderr(&output).contains("Usage"));
}
