
use serde_json::json;
use test_support::{
    open_workspace_db, request_ok, seed_school, spawn_sidecar, temp_dir, ts_days_ago,
};

#[test]
fn cleanup_by_age_deletes_only_rows_older_than_a_year() {
    let workspace = temp_dir("sekolahd-cleanup-age");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    // Two fresh rows (inbound + response), then one aged past the cutoff.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "halo" }),
    );
    let db = open_workspace_db(&workspace);
    db.execute(
        "UPDATE chat_messages SET sent_at = ? WHERE body = 'halo'",
        [ts_days_ago(400)],
    )
    .expect("backdate one row");
    drop(db);

    let result = request_ok(&mut stdin, &mut reader, "3", "chat.cleanupByAge", json!({}));
    assert_eq!(result.get("deletedCount").and_then(|v| v.as_i64()), Some(1));

    // Idempotent: nothing old remains.
    let again = request_ok(&mut stdin, &mut reader, "4", "chat.cleanupByAge", json!({}));
    assert_eq!(again.get("deletedCount").and_then(|v| v.as_i64()), Some(0));
}

#[test]
fn cleanup_for_student_uses_report_card_cutoff() {
    let workspace = temp_dir("sekolahd-cleanup-student");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    // A report card in 2024/2025 anchors the cutoff at roughly "now".
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "grades.upsert",
        json!({
            "studentId": school.student_id,
            "subjectId": school.subject_id,
            "term": 1,
            "academicYearId": school.year_id,
            "value": 80.0,
            "kind": "manual"
        }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "halo" }),
    );
    let db = open_workspace_db(&workspace);
    db.execute(
        "UPDATE chat_messages SET sent_at = ? WHERE body = 'halo'",
        [ts_days_ago(10)],
    )
    .expect("backdate one row");
    drop(db);

    // No card before 2024: nothing qualifies, no-op.
    let noop = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.cleanupForStudent",
        json!({ "studentId": school.student_id, "beforeYearStart": 2024 }),
    );
    assert_eq!(noop.get("deletedCount").and_then(|v| v.as_i64()), Some(0));

    // The 2024 card qualifies below 2026; the backdated row is older than its
    // created_at and goes away.
    let cleaned = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "chat.cleanupForStudent",
        json!({ "studentId": school.student_id, "beforeYearStart": 2026 }),
    );
    assert_eq!(cleaned.get("deletedCount").and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn cleanup_by_year_tolerates_missing_report_cards() {
    let workspace = temp_dir("sekolahd-cleanup-year");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    let noop = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.cleanupByYear",
        json!({ "yearStart": 2019 }),
    );
    assert_eq!(noop.get("deletedCount").and_then(|v| v.as_i64()), Some(0));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "grades.upsert",
        json!({
            "studentId": school.student_id,
            "subjectId": school.subject_id,
            "term": 1,
            "academicYearId": school.year_id,
            "value": 75.0,
            "kind": "manual"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "halo" }),
    );
    let db = open_workspace_db(&workspace);
    db.execute(
        "UPDATE chat_messages SET sent_at = ? WHERE body = 'halo'",
        [ts_days_ago(30)],
    )
    .expect("backdate one row");
    drop(db);

    let cleaned = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "chat.cleanupByYear",
        json!({ "yearStart": 2024 }),
    );
    assert_eq!(cleaned.get("deletedCount").and_then(|v| v.as_i64()), Some(1));
}
