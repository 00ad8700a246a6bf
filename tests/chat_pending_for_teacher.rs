
use serde_json::json;
use test_support::{create_str, request_ok, seed_school, spawn_sidecar, temp_dir};

#[test]
fn pending_returns_latest_unanswered_message_per_student() {
    let workspace = temp_dir("sekolahd-pending");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);
    let second_student = create_str(
        request_ok(
            &mut stdin,
            &mut reader,
            "2",
            "students.create",
            json!({ "name": "Budi", "classId": school.class_id }),
        ),
        "id",
    );

    // Student one forwards twice (ask-teacher, then a live-session message).
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "tanya guru soal pr" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "nomor 3 susah sekali" }),
    );
    // Student two forwards once.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "chat.message",
        json!({ "studentId": second_student, "text": "bu saya mau tanya guru" }),
    );

    let pending = request_ok(&mut stdin, &mut reader, "6", "chat.pendingForTeacher", json!({}));
    let rows = pending.get("pending").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(rows.len(), 2, "one row per student: {:?}", rows);

    let for_first: Vec<_> = rows
        .iter()
        .filter(|r| r.get("studentId").and_then(|v| v.as_str()) == Some(school.student_id.as_str()))
        .collect();
    assert_eq!(for_first.len(), 1);
    assert_eq!(
        for_first[0].get("body").and_then(|v| v.as_str()),
        Some("nomor 3 susah sekali"),
        "must be the most recent teacher-directed message"
    );
}

#[test]
fn teacher_reply_lands_in_history_with_teacher_name() {
    let workspace = temp_dir("sekolahd-teacher-reply");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "tanya guru" }),
    );
    let reply = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.teacherReply",
        json!({
            "studentId": school.student_id,
            "teacherId": school.teacher_id,
            "text": "Halaman 40 nomor 3, dibaca dulu ya"
        }),
    );
    let message = reply.get("message").cloned().unwrap_or_default();
    assert_eq!(message.get("recipientKind").and_then(|v| v.as_str()), Some("student"));
    assert_eq!(
        message.get("teacherId").and_then(|v| v.as_str()),
        Some(school.teacher_id.as_str())
    );

    let history = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.history",
        json!({ "studentId": school.student_id }),
    );
    let messages = history.get("messages").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    let last = messages.last().expect("history rows");
    assert_eq!(last.get("recipientKind").and_then(|v| v.as_str()), Some("student"));
    assert_eq!(last.get("teacherName").and_then(|v| v.as_str()), Some("Bu Ana"));
}
