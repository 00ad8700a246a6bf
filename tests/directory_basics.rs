
use serde_json::json;
use test_support::{create_str, request_err, request_ok, seed_school, spawn_sidecar, temp_dir};

#[test]
fn students_list_filters_by_class_and_joins_class_name() {
    let workspace = temp_dir("sekolahd-dir-students");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);
    let other_class = create_str(
        request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "classes.create",
            json!({ "name": "Kelas 6B" }),
        ),
        "id",
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "students.create",
        json!({ "name": "Budi", "classId": other_class }),
    );

    let all = request_ok(&mut stdin, &mut reader, "4", "students.list", json!({}));
    assert_eq!(
        all.get("students").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(2)
    );

    let filtered = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "students.list",
        json!({ "classId": school.class_id }),
    );
    let students = filtered
        .get("students")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(students.len(), 1);
    assert_eq!(students[0].get("name").and_then(|v| v.as_str()), Some("Siti"));
    assert_eq!(
        students[0].get("className").and_then(|v| v.as_str()),
        Some("Kelas 5A")
    );
}

#[test]
fn student_create_rejects_unknown_class() {
    let workspace = temp_dir("sekolahd-dir-badclass");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "name": "Budi", "classId": "missing" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));

    let blank = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "classes.create",
        json!({ "name": "   " }),
    );
    assert_eq!(blank.get("code").and_then(|v| v.as_str()), Some("bad_params"));
}

#[test]
fn activating_a_year_deactivates_the_previous_one() {
    let workspace = temp_dir("sekolahd-dir-years");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = seed_school(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "years.create",
        json!({ "yearStart": 2025, "yearEnd": 2026, "active": true }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "3", "years.list", json!({}));
    let years = listed
        .get("years")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(years.len(), 2);
    // Newest first.
    assert_eq!(years[0].get("yearStart").and_then(|v| v.as_i64()), Some(2025));
    assert_eq!(years[0].get("active").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(years[0].get("label").and_then(|v| v.as_str()), Some("2025/2026"));
    assert_eq!(years[1].get("active").and_then(|v| v.as_bool()), Some(false));
}
