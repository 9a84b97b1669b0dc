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

struct Fixture {
    year_id: String,
    math_id: String,
    english_id: String,
}

fn id_of(result: &serde_json::Value, key: &str) -> String {
    result
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, result))
        .to_string()
}

fn setup_fixture(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Fixture {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let year = request_ok(stdin, reader, "y", "years.create", json!({ "name": "2025/2026" }));
    let math = request_ok(
        stdin,
        reader,
        "s1",
        "subjects.create",
        json!({ "name": "Mathematics", "code": "MTH" }),
    );
    let english = request_ok(
        stdin,
        reader,
        "s2",
        "subjects.create",
        json!({ "name": "English", "code": "ENG" }),
    );
    Fixture {
        year_id: id_of(&year, "academicYearId"),
        math_id: id_of(&math, "subjectId"),
        english_id: id_of(&english, "subjectId"),
    }
}

fn create_class(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, name: &str) -> String {
    let r = request_ok(stdin, reader, "cls", "classes.create", json!({ "name": name }));
    id_of(&r, "classId")
}

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    first: &str,
    last: &str,
    admission: &str,
) -> String {
    let r = request_ok(
        stdin,
        reader,
        "stu",
        "students.create",
        json!({
            "classId": class_id,
            "firstName": first,
            "lastName": last,
            "admissionNumber": admission
        }),
    );
    id_of(&r, "studentId")
}

fn put_score(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    fx: &Fixture,
    student_id: &str,
    subject_id: &str,
    score: f64,
) {
    request_ok(
        stdin,
        reader,
        "sc",
        "scores.upsert",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "term": "first",
            "academicYearId": fx.year_id,
            "score": score
        }),
    );
}

fn entries(result: &serde_json::Value) -> Vec<serde_json::Value> {
    result
        .get("entries")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("entries array")
}

#[test]
fn class_ranking_carries_tied_rank_forward() {
    let workspace = temp_dir("schoold-rankings-class");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader, &workspace);
    let class_id = create_class(&mut stdin, &mut reader, "JSS 1A");

    let bello = create_student(&mut stdin, &mut reader, &class_id, "Ade", "Bello", "A-001");
    let cole = create_student(&mut stdin, &mut reader, &class_id, "Chi", "Cole", "A-002");
    let dike = create_student(&mut stdin, &mut reader, &class_id, "Ebu", "Dike", "A-003");
    for (sid, m, e) in [(&bello, 90.0, 90.0), (&cole, 95.0, 85.0), (&dike, 80.0, 80.0)] {
        put_score(&mut stdin, &mut reader, &fx, sid, &fx.math_id, m);
        put_score(&mut stdin, &mut reader, &fx, sid, &fx.english_id, e);
    }

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r1",
        "rankings.class",
        json!({ "classId": class_id, "term": "first", "academicYearId": fx.year_id }),
    );
    let rows = entries(&result);
    let ranks: Vec<u64> = rows.iter().map(|e| e["rank"].as_u64().expect("rank")).collect();
    assert_eq!(ranks, vec![1, 1, 3]);
    let ids: Vec<&str> = rows.iter().map(|e| e["studentId"].as_str().expect("id")).collect();
    assert_eq!(ids, vec![bello.as_str(), cole.as_str(), dike.as_str()]);
    assert_eq!(rows[0]["average"], json!(90));
    assert_eq!(rows[0]["totalScore"].as_f64(), Some(180.0));
    assert_eq!(rows[0]["subjectCount"], json!(2));
    assert_eq!(rows[0]["studentName"], json!("Ade Bello"));
    assert_eq!(result["warnings"], json!([]));

    // Term 2 has nothing recorded yet.
    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "r2",
        "rankings.class",
        json!({ "classId": class_id, "term": 2, "academicYearId": fx.year_id }),
    );
    assert!(entries(&empty).is_empty());

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn averages_round_half_up_and_inactive_students_drop_out() {
    let workspace = temp_dir("schoold-rankings-rounding");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader, &workspace);
    let class_id = create_class(&mut stdin, &mut reader, "JSS 2B");

    let half = create_student(&mut stdin, &mut reader, &class_id, "Half", "Up", "B-001");
    let gone = create_student(&mut stdin, &mut reader, &class_id, "Left", "School", "B-002");
    put_score(&mut stdin, &mut reader, &fx, &half, &fx.math_id, 85.0);
    put_score(&mut stdin, &mut reader, &fx, &half, &fx.english_id, 84.0);
    put_score(&mut stdin, &mut reader, &fx, &gone, &fx.math_id, 99.0);

    request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "students.delete",
        json!({ "studentId": gone }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "r",
        "rankings.class",
        json!({ "classId": class_id, "term": "first", "academicYearId": fx.year_id }),
    );
    let rows = entries(&result);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["studentId"], json!(half));
    assert_eq!(rows[0]["average"], json!(85));
    assert_eq!(rows[0]["rank"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn school_top_defaults_to_ten_and_honours_limit_and_setting() {
    let workspace = temp_dir("schoold-rankings-top");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader, &workspace);
    let class_a = create_class(&mut stdin, &mut reader, "SS 1A");
    let class_b = create_class(&mut stdin, &mut reader, "SS 1B");

    for i in 0..15 {
        let class_id = if i % 2 == 0 { &class_a } else { &class_b };
        let sid = create_student(
            &mut stdin,
            &mut reader,
            class_id,
            &format!("Student{:02}", i),
            "Top",
            &format!("T-{:03}", i),
        );
        put_score(&mut stdin, &mut reader, &fx, &sid, &fx.math_id, 50.0 + i as f64);
    }

    let params = json!({ "term": "first", "academicYearId": fx.year_id });
    let top = request_ok(&mut stdin, &mut reader, "t1", "rankings.schoolTop", params.clone());
    let rows = entries(&top);
    assert_eq!(rows.len(), 10);
    assert_eq!(top["limit"], json!(10));
    assert_eq!(rows[0]["average"], json!(64));
    assert_eq!(rows[0]["rank"], json!(1));
    assert_eq!(rows[9]["average"], json!(55));
    assert_eq!(rows[9]["rank"], json!(10));
    let classes: std::collections::HashSet<&str> =
        rows.iter().map(|e| e["classId"].as_str().expect("class")).collect();
    assert_eq!(classes.len(), 2);

    let mut limited = params.clone();
    limited["limit"] = json!(3);
    let three = request_ok(&mut stdin, &mut reader, "t2", "rankings.schoolTop", limited);
    assert_eq!(entries(&three).len(), 3);

    let mut bad = params.clone();
    bad["limit"] = json!(0);
    let rejected = request(&mut stdin, &mut reader, "t3", "rankings.schoolTop", bad);
    assert_eq!(error_code(&rejected), Some("bad_params"));

    let mut too_many = params.clone();
    too_many["limit"] = json!(101);
    let rejected = request(&mut stdin, &mut reader, "t3b", "rankings.schoolTop", too_many);
    assert_eq!(error_code(&rejected), Some("bad_params"));
    assert_eq!(rejected["error"]["details"]["limit"], json!(101));

    let mut widest = params.clone();
    widest["limit"] = json!(100);
    let all = request_ok(&mut stdin, &mut reader, "t3c", "rankings.schoolTop", widest);
    assert_eq!(entries(&all).len(), 15);

    request_ok(
        &mut stdin,
        &mut reader,
        "t4",
        "setup.update",
        json!({ "section": "leaderboard", "patch": { "topN": 5 } }),
    );
    let five = request_ok(&mut stdin, &mut reader, "t5", "rankings.schoolTop", params);
    assert_eq!(entries(&five).len(), 5);
    assert_eq!(five["limit"], json!(5));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn subject_stats_and_malformed_scores_are_reported() {
    let workspace = temp_dir("schoold-rankings-stats");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader, &workspace);
    let class_id = create_class(&mut stdin, &mut reader, "JSS 3C");
    let a = create_student(&mut stdin, &mut reader, &class_id, "Amaka", "Eze", "C-001");
    let b = create_student(&mut stdin, &mut reader, &class_id, "Bayo", "Fash", "C-002");
    let c = create_student(&mut stdin, &mut reader, &class_id, "Chidi", "Gbo", "C-003");
    put_score(&mut stdin, &mut reader, &fx, &a, &fx.math_id, 90.0);
    put_score(&mut stdin, &mut reader, &fx, &b, &fx.math_id, 90.0);
    put_score(&mut stdin, &mut reader, &fx, &c, &fx.math_id, 80.0);
    put_score(&mut stdin, &mut reader, &fx, &a, &fx.english_id, 70.0);

    let out_of_range = request(
        &mut stdin,
        &mut reader,
        "bad",
        "scores.upsert",
        json!({
            "studentId": b, "subjectId": fx.english_id,
            "term": "first", "academicYearId": fx.year_id, "score": 101
        }),
    );
    assert_eq!(error_code(&out_of_range), Some("bad_params"));

    let params = json!({ "classId": class_id, "term": "first", "academicYearId": fx.year_id });
    let stats = request_ok(&mut stdin, &mut reader, "st", "rankings.subjectStats", params.clone());
    let subjects = stats["subjects"].as_array().expect("subjects");
    let math = subjects
        .iter()
        .find(|s| s["subjectId"] == json!(fx.math_id))
        .expect("math stats");
    assert_eq!(math["average"], json!(87));
    assert_eq!(math["highest"].as_f64(), Some(90.0));
    assert_eq!(math["lowest"].as_f64(), Some(80.0));
    assert_eq!(math["sampleCount"], json!(3));
    let english = subjects
        .iter()
        .find(|s| s["subjectId"] == json!(fx.english_id))
        .expect("english stats");
    assert_eq!(english["sampleCount"], json!(1));

    // Rows written around the sidecar are excluded and surfaced as warnings.
    {
        let conn = rusqlite::Connection::open(workspace.join("schoold.sqlite3")).expect("open db");
        conn.execute(
            "INSERT INTO scores(id, student_id, subject_id, term, academic_year_id, score)
             VALUES('rogue', ?, ?, 'first', ?, 150.0)",
            (&c, &fx.english_id, &fx.year_id),
        )
        .expect("insert rogue score");
    }
    let ranked = request_ok(&mut stdin, &mut reader, "rk", "rankings.class", params.clone());
    let warnings = ranked["warnings"].as_array().expect("warnings");
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0]["code"], json!("malformed_score"));
    let chidi = entries(&ranked)
        .into_iter()
        .find(|e| e["studentId"] == json!(c))
        .expect("chidi ranked");
    assert_eq!(chidi["subjectCount"], json!(1));
    assert_eq!(chidi["average"], json!(80));

    let stats = request_ok(&mut stdin, &mut reader, "st2", "rankings.subjectStats", params);
    let english = stats["subjects"]
        .as_array()
        .expect("subjects")
        .iter()
        .find(|s| s["subjectId"] == json!(fx.english_id))
        .cloned()
        .expect("english stats");
    assert_eq!(english["highest"].as_f64(), Some(70.0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn unknown_class_is_not_found() {
    let workspace = temp_dir("schoold-rankings-missing");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let fx = setup_fixture(&mut stdin, &mut reader, &workspace);
    let resp = request(
        &mut stdin,
        &mut reader,
        "m",
        "rankings.class",
        json!({ "classId": "nope", "term": "first", "academicYearId": fx.year_id }),
    );
    assert_eq!(error_code(&resp), Some("not_found"));
    let bad_term = request(
        &mut stdin,
        &mut reader,
        "m2",
        "rankings.schoolTop",
        json!({ "term": "fourth", "academicYearId": fx.year_id }),
    );
    assert_eq!(error_code(&bad_term), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
