
use serde_json::json;
use test_support::{request_err, request_ok, seed_school, spawn_sidecar, temp_dir};

#[test]
fn ask_teacher_forwards_and_opens_live_session() {
    let workspace = temp_dir("sekolahd-chat-session");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "saya mau tanya guru" }),
    );
    assert_eq!(first.get("forwardedToTeacher").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(first.get("sessionEnded").and_then(|v| v.as_bool()), Some(false));

    // While the session is live, keyword intents are not evaluated: a message
    // that would be a schedule query in bot mode is forwarded instead.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "jadwal" }),
    );
    assert_eq!(second.get("forwardedToTeacher").and_then(|v| v.as_bool()), Some(true));
    assert_eq!(second.get("sessionEnded").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(second.get("recipientKind").and_then(|v| v.as_str()), Some("teacher"));
    let response = second.get("response").and_then(|v| v.as_str()).unwrap_or("");
    assert!(
        !response.contains("Jadwal"),
        "live session must not answer with a schedule: {}",
        response
    );

    let third = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "oke terima kasih bu" }),
    );
    assert_eq!(third.get("forwardedToTeacher").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(third.get("sessionEnded").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn closing_phrase_outside_live_session_is_plain_bot_traffic() {
    let workspace = temp_dir("sekolahd-chat-closing-botmode");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = seed_school(&mut stdin, &mut reader);

    // No live session: "terima kasih" is just an unrecognized bot message.
    let resp = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": school.student_id, "text": "terima kasih" }),
    );
    assert_eq!(resp.get("sessionEnded").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(resp.get("forwardedToTeacher").and_then(|v| v.as_bool()), Some(false));
}

#[test]
fn every_branch_persists_inbound_and_response_rows() {
    let workspace = temp_dir("sekolahd-chat-persist");
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
        json!({ "studentId": school.student_id, "text": "halo" }),
    );
    let history = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "chat.history",
        json!({ "studentId": school.student_id }),
    );
    let messages = history.get("messages").and_then(|v| v.as_array()).cloned().unwrap_or_default();
    assert_eq!(messages.len(), 2, "inbound + response");
    assert_eq!(
        messages[0].get("recipientKind").and_then(|v| v.as_str()),
        Some("bot")
    );
    assert_eq!(
        messages[1].get("recipientKind").and_then(|v| v.as_str()),
        Some("bot")
    );
    let greeting = messages[1].get("body").and_then(|v| v.as_str()).unwrap_or("");
    assert!(greeting.contains("Siti"), "greeting uses the student name: {}", greeting);
}

#[test]
fn unknown_student_is_not_found() {
    let workspace = temp_dir("sekolahd-chat-unknown-student");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = seed_school(&mut stdin, &mut reader);

    let error = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "chat.message",
        json!({ "studentId": "missing", "text": "halo" }),
    );
    assert_eq!(error.get("code").and_then(|v| v.as_str()), Some("not_found"));
}
