use crate::chat;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const RETENTION_MAX_AGE_DAYS: i64 = 365;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

/// RFC3339 UTC with fixed sub-second width, so string order equals time order.
fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_minutes_ago(minutes: i64) -> String {
    (Utc::now() - Duration::minutes(minutes)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn ts_days_ago(days: i64) -> String {
    (Utc::now() - Duration::days(days)).to_rfc3339_opts(SecondsFormat::Micros, true)
}

struct StudentRow {
    name: String,
    class_id: String,
}

fn load_student(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        "SELECT name, class_id FROM students WHERE id = ?",
        [student_id],
        |r| {
            Ok(StudentRow {
                name: r.get(0)?,
                class_id: r.get(1)?,
            })
        },
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "student not found".to_string(),
        details: Some(json!({ "studentId": student_id })),
    })
}

fn insert_message(
    conn: &Connection,
    student_id: &str,
    teacher_id: Option<&str>,
    body: &str,
    recipient_kind: &str,
) -> Result<String, HandlerErr> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO chat_messages(id, student_id, teacher_id, body, recipient_kind, sent_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, student_id, teacher_id, body, recipient_kind, now_ts()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "chat_messages" })),
    })?;
    Ok(id)
}

/// Live session iff a teacher-directed message for this student is younger
/// than the session window. Re-derived on every call; nothing is persisted.
fn in_live_session(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    let window_start = ts_minutes_ago(chat::SESSION_WINDOW_MINUTES);
    conn.query_row(
        "SELECT 1 FROM chat_messages
         WHERE student_id = ? AND recipient_kind = 'teacher' AND sent_at >= ?
         LIMIT 1",
        (student_id, &window_start),
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(db_err)
}

fn schedule_response(
    conn: &Connection,
    class_id: &str,
    today_only: bool,
) -> Result<String, HandlerErr> {
    let today = chat::today_day_name();
    // Inner join on teachers: placeholder slots created by the grade ledger
    // carry no teacher and stay out of the chatbot's schedule view.
    let mut lines: Vec<chat::ScheduleLine> = Vec::new();
    if today_only {
        let mut stmt = conn
            .prepare(
                "SELECT ss.day, sub.name, t.name
                 FROM schedule_slots ss
                 JOIN subjects sub ON sub.id = ss.subject_id
                 JOIN teachers t ON t.id = ss.teacher_id
                 WHERE ss.class_id = ? AND ss.day = ?
                 ORDER BY ss.rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map((class_id, today), |r| {
                Ok(chat::ScheduleLine {
                    day: r.get(0)?,
                    subject: r.get(1)?,
                    teacher: r.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        lines.extend(rows);
    } else {
        let mut stmt = conn
            .prepare(
                "SELECT ss.day, sub.name, t.name
                 FROM schedule_slots ss
                 JOIN subjects sub ON sub.id = ss.subject_id
                 JOIN teachers t ON t.id = ss.teacher_id
                 WHERE ss.class_id = ?
                 ORDER BY ss.rowid",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map([class_id], |r| {
                Ok(chat::ScheduleLine {
                    day: r.get(0)?,
                    subject: r.get(1)?,
                    teacher: r.get(2)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_err)?;
        lines.extend(rows);
    }

    if lines.is_empty() {
        return Ok(chat::schedule_empty());
    }
    Ok(chat::render_schedule(
        &lines,
        today_only.then_some(today),
    ))
}

fn chat_message(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let text = get_required_str(params, "text")?;

    let student = load_student(conn, &student_id)?;
    let live = in_live_session(conn, &student_id)?;

    // The inbound message is stored before any branching. While a live
    // session is active every student message goes to the teacher.
    let inbound_kind = if live { "teacher" } else { "bot" };
    insert_message(conn, &student_id, None, &text, inbound_kind)?;

    if live {
        if chat::is_closing_phrase(&text) {
            let response = chat::closing_ack();
            insert_message(conn, &student_id, None, &response, "bot")?;
            return Ok(json!({
                "response": response,
                "forwardedToTeacher": false,
                "sessionEnded": true,
                "recipientKind": inbound_kind
            }));
        }
        let response = chat::live_forward_ack();
        insert_message(conn, &student_id, None, &response, "bot")?;
        return Ok(json!({
            "response": response,
            "forwardedToTeacher": true,
            "sessionEnded": false,
            "recipientKind": inbound_kind
        }));
    }

    let mut forwarded = false;
    let response = match chat::detect_intent(&text) {
        chat::Intent::Schedule { today_only } => {
            schedule_response(conn, &student.class_id, today_only)?
        }
        chat::Intent::GradesMenu => chat::grades_menu(),
        chat::Intent::ReportMenu => chat::report_menu(),
        chat::Intent::News => chat::news_menu(),
        chat::Intent::Announcements => chat::announcements_menu(),
        chat::Intent::AskTeacher => {
            // Re-tag the row stored above so the pending-for-teacher query
            // sees the message that triggered forwarding.
            conn.execute(
                "UPDATE chat_messages
                 SET recipient_kind = 'teacher'
                 WHERE student_id = ? AND body = ? AND recipient_kind = 'bot' AND teacher_id IS NULL",
                (&student_id, &text),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "chat_messages" })),
            })?;
            forwarded = true;
            chat::ask_teacher_ack()
        }
        chat::Intent::Greeting => chat::greeting(&student.name),
        chat::Intent::Help => chat::help_text(),
        chat::Intent::Fallback => chat::fallback(&text),
    };

    insert_message(conn, &student_id, None, &response, "bot")?;
    Ok(json!({
        "response": response,
        "forwardedToTeacher": forwarded,
        "sessionEnded": false,
        "recipientKind": if forwarded { "teacher" } else { "bot" }
    }))
}

fn chat_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    load_student(conn, &student_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.body, c.recipient_kind, c.sent_at, c.teacher_id, t.name, s.name
             FROM chat_messages c
             LEFT JOIN teachers t ON t.id = c.teacher_id
             LEFT JOIN students s ON s.id = c.student_id
             WHERE c.student_id = ?
             ORDER BY c.sent_at ASC, c.rowid ASC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let id: String = r.get(0)?;
            let body: String = r.get(1)?;
            let recipient_kind: String = r.get(2)?;
            let sent_at: String = r.get(3)?;
            let teacher_id: Option<String> = r.get(4)?;
            let teacher_name: Option<String> = r.get(5)?;
            let student_name: Option<String> = r.get(6)?;
            Ok(json!({
                "id": id,
                "body": body,
                "recipientKind": recipient_kind,
                "sentAt": sent_at,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "studentName": student_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "messages": rows }))
}

fn chat_teacher_reply(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let text = get_required_str(params, "text")?;

    load_student(conn, &student_id)?;
    let teacher_exists = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [&teacher_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err)?
        .is_some();
    if !teacher_exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "teacher not found".to_string(),
            details: Some(json!({ "teacherId": teacher_id })),
        });
    }

    let id = insert_message(conn, &student_id, Some(&teacher_id), &text, "student")?;
    let row = conn
        .query_row(
            "SELECT id, student_id, teacher_id, body, recipient_kind, sent_at
             FROM chat_messages WHERE id = ?",
            [&id],
            |r| {
                let id: String = r.get(0)?;
                let student_id: String = r.get(1)?;
                let teacher_id: Option<String> = r.get(2)?;
                let body: String = r.get(3)?;
                let recipient_kind: String = r.get(4)?;
                let sent_at: String = r.get(5)?;
                Ok(json!({
                    "id": id,
                    "studentId": student_id,
                    "teacherId": teacher_id,
                    "body": body,
                    "recipientKind": recipient_kind,
                    "sentAt": sent_at
                }))
            },
        )
        .map_err(db_err)?;
    Ok(json!({ "message": row }))
}

fn chat_pending_for_teacher(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Latest unanswered teacher-directed message per student. Insertion order
    // (rowid) breaks timestamp ties deterministically.
    let mut stmt = conn
        .prepare(
            "SELECT c.id, c.student_id, s.name, k.name, c.body, c.sent_at
             FROM chat_messages c
             JOIN students s ON s.id = c.student_id
             LEFT JOIN classes k ON k.id = s.class_id
             WHERE c.rowid IN (
               SELECT MAX(c2.rowid)
               FROM chat_messages c2
               WHERE c2.recipient_kind = 'teacher' AND c2.teacher_id IS NULL
               GROUP BY c2.student_id
             )
             ORDER BY c.sent_at DESC",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let student_name: String = r.get(2)?;
            let class_name: Option<String> = r.get(3)?;
            let body: String = r.get(4)?;
            let sent_at: String = r.get(5)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": student_name,
                "className": class_name,
                "body": body,
                "sentAt": sent_at
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "pending": rows }))
}

fn chat_cleanup_by_age(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let cutoff = ts_days_ago(RETENTION_MAX_AGE_DAYS);
    let deleted = conn
        .execute("DELETE FROM chat_messages WHERE sent_at < ?", [&cutoff])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "deletedCount": deleted }))
}

fn chat_cleanup_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let before_year_start = params
        .get("beforeYearStart")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing beforeYearStart".to_string(),
            details: None,
        })?;

    let cutoff: Option<String> = conn
        .query_row(
            "SELECT MAX(rc.created_at)
             FROM report_cards rc
             JOIN academic_years ay ON ay.id = rc.academic_year_id
             WHERE rc.student_id = ? AND ay.year_start < ?",
            (&student_id, before_year_start),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .flatten();

    // No qualifying report card means nothing to anchor the cutoff; treat as
    // success with zero deletions.
    let Some(cutoff) = cutoff else {
        return Ok(json!({ "deletedCount": 0 }));
    };
    let deleted = conn
        .execute(
            "DELETE FROM chat_messages WHERE student_id = ? AND sent_at < ?",
            (&student_id, &cutoff),
        )
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "deletedCount": deleted }))
}

fn chat_cleanup_by_year(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let year_start = params
        .get("yearStart")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing yearStart".to_string(),
            details: None,
        })?;

    let cutoff: Option<String> = conn
        .query_row(
            "SELECT MIN(rc.created_at)
             FROM report_cards rc
             JOIN academic_years ay ON ay.id = rc.academic_year_id
             WHERE ay.year_start = ?",
            [year_start],
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?
        .flatten();

    let Some(cutoff) = cutoff else {
        return Ok(json!({ "deletedCount": 0 }));
    };
    let deleted = conn
        .execute("DELETE FROM chat_messages WHERE sent_at < ?", [&cutoff])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "deletedCount": deleted }))
}

fn with_db(
    state: &mut AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "chat.message" => Some(with_db(state, req, chat_message)),
        "chat.history" => Some(with_db(state, req, chat_history)),
        "chat.teacherReply" => Some(with_db(state, req, chat_teacher_reply)),
        "chat.pendingForTeacher" => Some(with_db(state, req, |c, _| chat_pending_for_teacher(c))),
        "chat.cleanupByAge" => Some(with_db(state, req, |c, _| chat_cleanup_by_age(c))),
        "chat.cleanupForStudent" => Some(with_db(state, req, chat_cleanup_for_student)),
        "chat.cleanupByYear" => Some(with_db(state, req, chat_cleanup_by_year)),
        _ => None,
    }
}
