use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_timetabled");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn timetabled");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct Harness {
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Harness {
    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request_ok(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn call_raw(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        request(
            &mut self.stdin,
            &mut self.reader,
            &self.next_id.to_string(),
            method,
            params,
        )
    }

    fn save_period(&mut self, class_id: &str, date: &str, number: i64, start: &str, end: &str, subject: &str) {
        let _ = self.call(
            "schedule.saveSlot",
            json!({
                "classId": class_id,
                "date": date,
                "slot": {
                    "periodNumber": number,
                    "kind": "period",
                    "start": start,
                    "end": end,
                    "subject": subject,
                    "teacher": "t-ms-hill"
                }
            }),
        );
    }

    fn day_rows(&mut self, class_id: &str, date: &str) -> Vec<(i64, String)> {
        let day = self.call(
            "schedule.dayOpen",
            json!({ "classId": class_id, "date": date }),
        );
        day.get("slots")
            .and_then(|v| v.as_array())
            .expect("slots")
            .iter()
            .map(|s| {
                (
                    s.get("periodNumber").and_then(|v| v.as_i64()).unwrap(),
                    s.get("subject")
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                )
            })
            .collect()
    }
}

fn setup(prefix: &str) -> (Child, Harness, PathBuf, String) {
    let workspace = temp_dir(prefix);
    let (child, stdin, reader) = spawn_sidecar();
    let mut harness = Harness {
        stdin,
        reader,
        next_id: 0,
    };
    let _ = harness.call(
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = harness.call("classes.create", json!({ "name": "8D Mathematics" }));
    let class_id = created
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    (child, harness, workspace, class_id)
}

const SOURCE: &str = "2026-03-02";
const TARGET: &str = "2026-03-03";

fn seed_source_and_target(harness: &mut Harness, class_id: &str) {
    harness.save_period(class_id, SOURCE, 1, "9", "940", "Mathematics");
    harness.save_period(class_id, SOURCE, 2, "940", "1020", "Mathematics");
    harness.save_period(class_id, SOURCE, 3, "1020", "11", "Mathematics");

    // Pre-existing target content: period 2 with a different subject, and an
    // unrelated period 5.
    harness.save_period(class_id, TARGET, 2, "13", "1340", "Art");
    harness.save_period(class_id, TARGET, 5, "14", "1440", "Music");
}

#[test]
fn merge_copy_overwrites_by_period_number_and_keeps_the_rest() {
    let (_child, mut harness, workspace, class_id) = setup("timetabled-copy-merge");
    seed_source_and_target(&mut harness, &class_id);

    let copied = harness.call(
        "schedule.copyDay",
        json!({
            "classId": class_id,
            "sourceDate": SOURCE,
            "targetDate": TARGET,
            "includeLessons": true,
            "includeBreaks": true,
            "policy": "merge"
        }),
    );
    assert_eq!(copied.get("copied").and_then(|v| v.as_i64()), Some(3));

    let rows = harness.day_rows(&class_id, TARGET);
    assert_eq!(
        rows,
        vec![
            (1, "Mathematics".to_string()),
            (2, "Mathematics".to_string()),
            (3, "Mathematics".to_string()),
            (5, "Music".to_string()),
        ]
    );

    // The source day is untouched.
    let source_rows = harness.day_rows(&class_id, SOURCE);
    assert_eq!(source_rows.len(), 3);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn replace_copy_clears_the_target_day_first() {
    let (_child, mut harness, workspace, class_id) = setup("timetabled-copy-replace");
    seed_source_and_target(&mut harness, &class_id);

    let copied = harness.call(
        "schedule.copyDay",
        json!({
            "classId": class_id,
            "sourceDate": SOURCE,
            "targetDate": TARGET,
            "policy": "replace"
        }),
    );
    assert_eq!(copied.get("copied").and_then(|v| v.as_i64()), Some(3));

    let rows = harness.day_rows(&class_id, TARGET);
    assert_eq!(
        rows,
        vec![
            (1, "Mathematics".to_string()),
            (2, "Mathematics".to_string()),
            (3, "Mathematics".to_string()),
        ]
    );

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn copy_filters_kinds_and_reports_empty_sources() {
    let (_child, mut harness, workspace, class_id) = setup("timetabled-copy-filters");
    harness.save_period(&class_id, SOURCE, 1, "9", "940", "Mathematics");
    let _ = harness.call(
        "schedule.saveSlot",
        json!({
            "classId": class_id,
            "date": SOURCE,
            "slot": {
                "periodNumber": 2,
                "kind": "break",
                "start": "940",
                "end": "10",
                "name": "Recess"
            }
        }),
    );

    // Breaks only.
    let copied = harness.call(
        "schedule.copyDay",
        json!({
            "classId": class_id,
            "sourceDate": SOURCE,
            "targetDate": TARGET,
            "includeLessons": false,
            "includeBreaks": true,
            "policy": "merge"
        }),
    );
    assert_eq!(copied.get("copied").and_then(|v| v.as_i64()), Some(1));
    let day = harness.call(
        "schedule.dayOpen",
        json!({ "classId": class_id, "date": TARGET }),
    );
    let slots = day.get("slots").and_then(|v| v.as_array()).expect("slots");
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].get("kind").and_then(|v| v.as_str()), Some("break"));
    assert_eq!(slots[0].get("name").and_then(|v| v.as_str()), Some("Recess"));

    // Filtering everything out reports no_source_data and leaves the target
    // untouched.
    let empty = harness.call_raw(
        "schedule.copyDay",
        json!({
            "classId": class_id,
            "sourceDate": "2026-04-01",
            "targetDate": TARGET,
            "policy": "replace"
        }),
    );
    assert_eq!(
        empty.pointer("/error/code").and_then(|v| v.as_str()),
        Some("no_source_data")
    );
    let day = harness.call(
        "schedule.dayOpen",
        json!({ "classId": class_id, "date": TARGET }),
    );
    assert_eq!(
        day.get("slots").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );

    // Same-date copies are rejected up front.
    let same = harness.call_raw(
        "schedule.copyDay",
        json!({
            "classId": class_id,
            "sourceDate": SOURCE,
            "targetDate": SOURCE,
            "policy": "merge"
        }),
    );
    assert_eq!(
        same.pointer("/error/code").and_then(|v| v.as_str()),
        Some("bad_params")
    );

    let _ = std::fs::remove_dir_all(workspace);
}
