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
    let exe = env!("CARGO_BIN_EXE_gradebookd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradebookd");
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

fn error_code(value: &serde_json::Value) -> &str {
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

fn str_at<'a>(value: &'a serde_json::Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, value))
}

struct Seeded {
    instructor_id: String,
    course_id: String,
}

/// One instructor teaching MAT001 with EST001..EST003 enrolled, plus EST099
/// who exists but is not enrolled.
fn seed_course(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) -> Seeded {
    let instructor = request_ok(
        stdin,
        reader,
        "seed-i",
        "instructors.create",
        json!({
            "givenName": "María",
            "paternalSurname": "García",
            "maternalSurname": "López",
            "key": "PROF001",
            "password": "secret"
        }),
    );
    let instructor_id = str_at(&instructor, "instructorId").to_string();
    let course = request_ok(
        stdin,
        reader,
        "seed-c",
        "courses.create",
        json!({ "name": "Calculus I", "code": "MAT001" }),
    );
    let course_id = str_at(&course, "courseId").to_string();
    request_ok(
        stdin,
        reader,
        "seed-a",
        "courses.assign",
        json!({ "instructorId": instructor_id, "courseId": course_id }),
    );

    let students = [
        ("EST001", "Ana", "Pérez", "Ruiz", true),
        ("EST002", "Luis", "García", "Torres", true),
        ("EST003", "Rosa", "García", "Blanco", true),
        ("EST099", "Juan", "López", "Gil", false),
    ];
    for (key, given, paternal, maternal, enrolled) in students {
        let created = request_ok(
            stdin,
            reader,
            "seed-s",
            "students.create",
            json!({
                "givenName": given,
                "paternalSurname": paternal,
                "maternalSurname": maternal,
                "key": key
            }),
        );
        if enrolled {
            request_ok(
                stdin,
                reader,
                "seed-e",
                "enrollments.create",
                json!({
                    "studentId": str_at(&created, "studentId"),
                    "courseId": course_id,
                    "instructorId": instructor_id
                }),
            );
        }
    }
    Seeded {
        instructor_id,
        course_id,
    }
}

#[test]
fn setup_defaults_and_validation() {
    let workspace = temp_dir("gradebook-setup");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let before = request(&mut stdin, &mut reader, "0", "setup.get", json!({}));
    assert_eq!(error_code(&before), "no_workspace");

    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["term"]["activeSemester"], json!("2025-2026A"));
    assert_eq!(setup["term"]["defaultGroup"], json!("A"));
    assert_eq!(setup["grading"]["passingGrade"], json!(6.0));
    assert_eq!(setup["grading"]["outstandingGrade"], json!(9.0));
    assert_eq!(setup["reports"]["institutionName"], json!("NOVAUNIVERSITAS"));
    assert_eq!(setup["reports"]["rowsPerPage"], json!(40));

    let too_small = request(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "reports", "patch": { "rowsPerPage": 5 } }),
    );
    assert_eq!(error_code(&too_small), "bad_params");
    let bad_grade = request(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "grading", "patch": { "passingGrade": 12 } }),
    );
    assert_eq!(error_code(&bad_grade), "bad_params");
    let bad_section = request(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "planner", "patch": {} }),
    );
    assert_eq!(error_code(&bad_section), "bad_params");

    request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "reports", "patch": { "rowsPerPage": 10 } }),
    );
    let after = request_ok(&mut stdin, &mut reader, "7", "setup.get", json!({}));
    assert_eq!(after["reports"]["rowsPerPage"], json!(10));
    assert_eq!(after["reports"]["showGeneratedAt"], json!(true));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn login_checks_password_and_lists_courses() {
    let workspace = temp_dir("gradebook-auth");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_course(&mut stdin, &mut reader);

    let profile = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "auth.login",
        json!({ "key": "PROF001", "password": "secret" }),
    );
    assert_eq!(profile["instructorId"], json!(seeded.instructor_id));
    assert_eq!(profile["fullName"], json!("María García López"));
    assert_eq!(profile["activeSemester"], json!("2025-2026A"));

    let wrong = request(
        &mut stdin,
        &mut reader,
        "3",
        "auth.login",
        json!({ "key": "PROF001", "password": "nope" }),
    );
    assert_eq!(error_code(&wrong), "auth_failed");
    let unknown = request(
        &mut stdin,
        &mut reader,
        "4",
        "auth.login",
        json!({ "key": "PROF404", "password": "secret" }),
    );
    assert_eq!(error_code(&unknown), "auth_failed");
    assert_eq!(wrong["error"]["message"], unknown["error"]["message"]);

    let courses = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "courses.listForInstructor",
        json!({ "instructorId": seeded.instructor_id }),
    );
    let list = courses["courses"].as_array().expect("courses");
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["code"], json!("MAT001"));
    assert_eq!(list[0]["credits"], json!(6));
    assert_eq!(list[0]["semester"], json!("2025-2026A"));
    assert_eq!(list[0]["group"], json!("A"));

    let duplicate = request(
        &mut stdin,
        &mut reader,
        "6",
        "students.create",
        json!({ "givenName": "Ana", "paternalSurname": "Pérez", "key": "EST001" }),
    );
    assert_eq!(error_code(&duplicate), "bad_params");

    let orphan = request(
        &mut stdin,
        &mut reader,
        "7",
        "enrollments.create",
        json!({
            "studentId": "no-such-student",
            "courseId": seeded.course_id,
            "instructorId": seeded.instructor_id
        }),
    );
    assert_eq!(error_code(&orphan), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn active_semester_scopes_requests_without_explicit_semester() {
    let workspace = temp_dir("gradebook-semester");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let seeded = seed_course(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "term", "patch": { "activeSemester": "2026-2027B" } }),
    );
    let current = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.list",
        json!({ "courseId": seeded.course_id, "instructorId": seeded.instructor_id }),
    );
    assert_eq!(current["semester"], json!("2026-2027B"));
    assert_eq!(current["students"], json!([]));

    let previous = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.list",
        json!({
            "courseId": seeded.course_id,
            "instructorId": seeded.instructor_id,
            "semester": "2025-2026A"
        }),
    );
    assert_eq!(previous["students"].as_array().map(|s| s.len()), Some(3));

    let not_enrolled_now = request(
        &mut stdin,
        &mut reader,
        "5",
        "grades.update",
        json!({
            "courseId": seeded.course_id,
            "instructorId": seeded.instructor_id,
            "studentId": "EST001",
            "partial1": 9
        }),
    );
    assert_eq!(error_code(&not_enrolled_now), "not_found");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
