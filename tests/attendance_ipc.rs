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
    let exe = env!("CARGO_BIN_EXE_schoold");
    let mut child = Command::new(exe)
        .env_remove("SCHOOLD_WORKSPACE")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoold");
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
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn error_code(value: &serde_json::Value) -> Option<&str> {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
}

fn id_of(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

fn mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    date: &str,
    entries: serde_json::Value,
) -> serde_json::Value {
    request(
        stdin,
        reader,
        date,
        "attendance.mark",
        json!({ "classId": class_id, "date": date, "entries": entries }),
    )
}

#[test]
fn register_marks_and_summarises_by_student() {
    let workspace = temp_dir("schoold-attendance");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = id_of(
        &request_ok(&mut stdin, &mut reader, "c", "classes.create", json!({ "name": "Basic 5" })),
        "classId",
    );
    let other_class = id_of(
        &request_ok(&mut stdin, &mut reader, "c2", "classes.create", json!({ "name": "Basic 6" })),
        "classId",
    );
    let ngozi = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s1",
            "students.create",
            json!({ "classId": class_id, "firstName": "Ngozi", "lastName": "Ibe", "admissionNumber": "B5-1" }),
        ),
        "studentId",
    );
    let tunde = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s2",
            "students.create",
            json!({ "classId": class_id, "firstName": "Tunde", "lastName": "Ajayi", "admissionNumber": "B5-2" }),
        ),
        "studentId",
    );
    let outsider = id_of(
        &request_ok(
            &mut stdin,
            &mut reader,
            "s3",
            "students.create",
            json!({ "classId": other_class, "firstName": "Musa", "lastName": "Bala", "admissionNumber": "B6-1" }),
        ),
        "studentId",
    );

    let days = [
        ("2025-09-08", "present", "absent"),
        ("2025-09-09", "late", "present"),
        ("2025-09-10", "absent", "present"),
        ("2025-09-11", "excused", "p"),
    ];
    for (date, n, t) in days {
        let resp = mark(
            &mut stdin,
            &mut reader,
            &class_id,
            date,
            json!([{ "studentId": ngozi, "status": n }, { "studentId": tunde, "status": t }]),
        );
        assert_eq!(resp["result"]["marked"], json!(2), "{}", resp);
    }

    // Re-marking a day replaces the earlier status.
    let resp = mark(
        &mut stdin,
        &mut reader,
        &class_id,
        "2025-09-10",
        json!([{ "studentId": ngozi, "status": "present" }]),
    );
    assert_eq!(resp["ok"], json!(true));

    let day = request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "attendance.day",
        json!({ "classId": class_id, "date": "2025-09-10" }),
    );
    let rows = day["students"].as_array().expect("students");
    assert_eq!(rows.len(), 2);
    let ngozi_row = rows.iter().find(|r| r["studentId"] == json!(ngozi)).expect("ngozi");
    assert_eq!(ngozi_row["status"], json!("present"));

    let unmarked = request_ok(
        &mut stdin,
        &mut reader,
        "d2",
        "attendance.day",
        json!({ "classId": class_id, "date": "2025-09-12" }),
    );
    assert!(unmarked["students"]
        .as_array()
        .expect("students")
        .iter()
        .all(|r| r["status"].is_null()));

    let summary = request_ok(
        &mut stdin,
        &mut reader,
        "sum",
        "attendance.summary",
        json!({ "classId": class_id }),
    );
    let by_id = |id: &str| -> serde_json::Value {
        summary["students"]
            .as_array()
            .expect("students")
            .iter()
            .find(|r| r["studentId"] == json!(id))
            .map(|r| r["summary"].clone())
            .expect("summary row")
    };
    let n = by_id(&ngozi);
    assert_eq!(n["present"], json!(2));
    assert_eq!(n["late"], json!(1));
    assert_eq!(n["excused"], json!(1));
    assert_eq!(n["markedDays"], json!(4));
    assert_eq!(n["rate"].as_f64(), Some(75.0));
    let t = by_id(&tunde);
    assert_eq!(t["present"], json!(3));
    assert_eq!(t["absent"], json!(1));
    assert_eq!(t["rate"].as_f64(), Some(75.0));

    request_ok(
        &mut stdin,
        &mut reader,
        "cfg",
        "setup.update",
        json!({ "section": "attendance", "patch": { "countLateAsPresent": false } }),
    );
    let windowed = request_ok(
        &mut stdin,
        &mut reader,
        "sum2",
        "attendance.summary",
        json!({ "classId": class_id, "from": "2025-09-09", "to": "2025-09-10" }),
    );
    let n = windowed["students"]
        .as_array()
        .expect("students")
        .iter()
        .find(|r| r["studentId"] == json!(ngozi))
        .map(|r| r["summary"].clone())
        .expect("ngozi");
    assert_eq!(n["markedDays"], json!(2));
    assert_eq!(n["rate"].as_f64(), Some(50.0));

    let stranger = mark(
        &mut stdin,
        &mut reader,
        &class_id,
        "2025-09-15",
        json!([{ "studentId": outsider, "status": "present" }]),
    );
    assert_eq!(error_code(&stranger), Some("bad_params"));
    let bad_status = mark(
        &mut stdin,
        &mut reader,
        &class_id,
        "2025-09-16",
        json!([{ "studentId": ngozi, "status": "sick" }]),
    );
    assert_eq!(error_code(&bad_status), Some("bad_params"));
    assert_eq!(bad_status["error"]["details"]["index"], json!(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
