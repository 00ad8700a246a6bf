
use serde_json::json;
use test_support::{
    create_str, request_ok, seed_school, spawn_sidecar, temp_dir, today_day_name,
};

#[test]
fn schedule_today_filters_to_current_day_and_numbers_entries() {
    let workspace = temp_dir("sekolahd-schedule-today");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);
    let science_id = create_str(
        request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "subjects.create",
            json!({ "name": "IPA" }),
        ),
        "id",
    );
    let other_teacher = create_str(
        request_ok(
            &mut stdin,
            &mut reader,
            "3",
            "teachers.create",
            json!({ "name": "Pak Budi" }),
        ),
        "id",
    );

    let today = today_day_name();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "schedule.replaceForClass",
        json!({
            "classId": school.class_id,
            "slots": [
                { "day": today, "subjectId": school.subject_id, "teacherId": school.teacher_id, "date": "2026-01-05" },
                { "day": today, "subjectId": science_id, "teacherId": other_teacher, "date": "2026-01-05" }
            ]
        }),
    );

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "jadwal hari ini" }),
    );
    let body = resp.get("response").and_then(|v| v.as_str()).unwrap_or("");
    assert!(
        body.starts_with(&format!("Jadwal Hari Ini ({}):", today)),
        "unexpected header: {}",
        body
    );
    assert!(body.contains(&format!("{}:\n1. Matematika (Bu Ana)\n2. IPA (Pak Budi)", today)));
}

#[test]
fn schedule_week_groups_days_in_school_week_order() {
    let workspace = temp_dir("sekolahd-schedule-week");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    // Inserted out of order on purpose; rendering must group Senin before Rabu.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "schedule.replaceForClass",
        json!({
            "classId": school.class_id,
            "slots": [
                { "day": "Rabu", "subjectId": school.subject_id, "teacherId": school.teacher_id, "date": "2026-01-07" },
                { "day": "Senin", "subjectId": school.subject_id, "teacherId": school.teacher_id, "date": "2026-01-05" }
            ]
        }),
    );

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "jadwal" }),
    );
    let body = resp.get("response").and_then(|v| v.as_str()).unwrap_or("");
    assert!(body.starts_with("Jadwal Pelajaran Kamu:"), "header: {}", body);
    let senin = body.find("Senin:").expect("Senin group");
    let rabu = body.find("Rabu:").expect("Rabu group");
    assert!(senin < rabu, "Senin must precede Rabu: {}", body);
}

#[test]
fn empty_schedule_gets_its_own_response() {
    let workspace = temp_dir("sekolahd-schedule-empty");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "jadwal" }),
    );
    let body = resp.get("response").and_then(|v| v.as_str()).unwrap_or("");
    assert!(body.contains("belum tersedia"), "unexpected body: {}", body);
}
