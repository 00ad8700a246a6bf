use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Annotation value that marks a row as a manual override.
pub const MANUAL_ANNOTATION: &str = "manual_input";

/// Day written on placeholder slots created for subjects with no timetable
/// entry. The placeholder shows up in schedule listings; that visible side
/// effect is part of the contract.
const PLACEHOLDER_DAY: &str = "Senin";

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

fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Which write path produced or should govern a score row. The free-text
/// annotation column doubles as the discriminator; each kind reads through a
/// disjoint filter so manual and task-derived rows never collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScoreKind {
    TaskDerived,
    ManualOverride,
    RaporAggregate,
}

fn parse_kind(params: &serde_json::Value) -> Result<ScoreKind, HandlerErr> {
    let raw = get_required_str(params, "kind")?;
    match raw.as_str() {
        "task" => Ok(ScoreKind::TaskDerived),
        "manual" => Ok(ScoreKind::ManualOverride),
        "rapor" => Ok(ScoreKind::RaporAggregate),
        other => Err(HandlerErr {
            code: "bad_params",
            message: "kind must be one of: task, manual, rapor".to_string(),
            details: Some(json!({ "kind": other })),
        }),
    }
}

fn student_class_id(conn: &Connection, student_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT class_id FROM students WHERE id = ?",
        [student_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)
}

fn subject_name(conn: &Connection, subject_id: &str) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT name FROM subjects WHERE id = ?",
        [subject_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_err)?
    .ok_or_else(|| HandlerErr {
        code: "bad_params",
        message: "subject not found".to_string(),
        details: Some(json!({ "subjectId": subject_id })),
    })
}

/// Step 1: lookup-then-insert on (student, term, year). Not atomic with the
/// steps after it; an orphaned blank card from a partial failure is reused by
/// the next call.
fn resolve_or_create_report_card(
    conn: &Connection,
    student_id: &str,
    term: i64,
    academic_year_id: &str,
) -> Result<String, HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM report_cards
             WHERE student_id = ? AND term = ? AND academic_year_id = ?",
            (student_id, term, academic_year_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO report_cards(id, student_id, term, academic_year_id, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (&id, student_id, term, academic_year_id, now_ts()),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "report_cards" })),
    })?;
    Ok(id)
}

/// Step 2: any slot linking the student's class to the subject, or a
/// placeholder (fixed day, no teacher) when the subject has no timetable
/// entry.
fn resolve_or_create_schedule_slot(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
) -> Result<String, HandlerErr> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT ss.id
             FROM schedule_slots ss
             JOIN students s ON s.class_id = ss.class_id
             WHERE s.id = ? AND ss.subject_id = ?
             LIMIT 1",
            (student_id, subject_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_err)?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let Some(class_id) = student_class_id(conn, student_id)? else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    };

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schedule_slots(id, class_id, subject_id, day) VALUES(?, ?, ?, ?)",
        (&id, &class_id, subject_id, PLACEHOLDER_DAY),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "schedule_slots" })),
    })?;
    Ok(id)
}

/// Step 4: existing-row lookup. Predicates are disjoint across kinds for
/// tagged rows; the task path deliberately matches any row (first match wins),
/// preserving the source's least-isolated behavior.
fn find_existing_score(
    conn: &Connection,
    kind: ScoreKind,
    student_id: &str,
    slot_id: &str,
    report_card_id: &str,
) -> Result<Option<String>, HandlerErr> {
    let sql = match kind {
        ScoreKind::TaskDerived => {
            "SELECT id FROM scores
             WHERE student_id = ? AND schedule_slot_id = ? AND report_card_id = ?
             LIMIT 1"
        }
        // The loose legacy predicate keeps rows written before annotations
        // were normalized readable; writes always stamp 'manual_input'.
        ScoreKind::ManualOverride => {
            "SELECT id FROM scores
             WHERE student_id = ? AND schedule_slot_id = ? AND report_card_id = ?
               AND (annotation IS NULL OR annotation = '' OR annotation = 'manual_input')
             LIMIT 1"
        }
        // NULL annotations fail the inequality and stay invisible here,
        // matching the source SQL.
        ScoreKind::RaporAggregate => {
            "SELECT id FROM scores
             WHERE student_id = ? AND schedule_slot_id = ? AND report_card_id = ?
               AND annotation != 'manual_input'
             LIMIT 1"
        }
    };
    conn.query_row(sql, (student_id, slot_id, report_card_id), |r| r.get(0))
        .optional()
        .map_err(db_err)
}

fn score_row_json(conn: &Connection, score_id: &str) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT id, student_id, schedule_slot_id, report_card_id, value, annotation, subject_name
         FROM scores WHERE id = ?",
        [score_id],
        |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let slot_id: Option<String> = r.get(2)?;
            let report_card_id: String = r.get(3)?;
            let value: f64 = r.get(4)?;
            let annotation: Option<String> = r.get(5)?;
            let subject_name: Option<String> = r.get(6)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "scheduleSlotId": slot_id,
                "reportCardId": report_card_id,
                "value": value,
                "annotation": annotation,
                "subjectName": subject_name
            }))
        },
    )
    .map_err(db_err)
}

fn grades_upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject_id = get_required_str(params, "subjectId")?;
    let term = get_required_i64(params, "term")?;
    let academic_year_id = get_required_str(params, "academicYearId")?;
    let value = params
        .get("value")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: "missing value".to_string(),
            details: None,
        })?;
    let kind = parse_kind(params)?;
    let caller_annotation = params
        .get("annotation")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if student_class_id(conn, &student_id)?.is_none() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }
    let year_exists = conn
        .query_row(
            "SELECT 1 FROM academic_years WHERE id = ?",
            [&academic_year_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(db_err)?
        .is_some();
    if !year_exists {
        return Err(HandlerErr {
            code: "bad_params",
            message: "academic year not found".to_string(),
            details: Some(json!({ "academicYearId": academic_year_id })),
        });
    }

    let report_card_id = resolve_or_create_report_card(conn, &student_id, term, &academic_year_id)?;
    let slot_id = resolve_or_create_schedule_slot(conn, &student_id, &subject_id)?;
    let subject = subject_name(conn, &subject_id)?;

    let annotation_to_write = match kind {
        ScoreKind::TaskDerived => caller_annotation.unwrap_or_default(),
        ScoreKind::ManualOverride => MANUAL_ANNOTATION.to_string(),
        ScoreKind::RaporAggregate => caller_annotation.unwrap_or_default(),
    };

    let existing = find_existing_score(conn, kind, &student_id, &slot_id, &report_card_id)?;
    let score_id = match existing {
        Some(id) => {
            conn.execute(
                "UPDATE scores SET value = ?, annotation = ?, subject_name = ? WHERE id = ?",
                (value, &annotation_to_write, &subject, &id),
            )
            .map_err(|e| HandlerErr {
                code: "db_update_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "scores" })),
            })?;
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO scores(id, student_id, schedule_slot_id, report_card_id, value, annotation, subject_name)
                 VALUES(?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &student_id,
                    &slot_id,
                    &report_card_id,
                    value,
                    &annotation_to_write,
                    &subject,
                ),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "scores" })),
            })?;
            id
        }
    };

    Ok(json!({ "score": score_row_json(conn, &score_id)? }))
}

fn grades_list_for_student(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if student_class_id(conn, &student_id)?.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "student not found".to_string(),
            details: Some(json!({ "studentId": student_id })),
        });
    }

    let mut stmt = conn
        .prepare(
            "SELECT n.id,
                    COALESCE(n.subject_name, sub.name),
                    n.value,
                    r.term,
                    ay.year_start || '/' || ay.year_end,
                    n.annotation,
                    n.report_card_id,
                    n.schedule_slot_id
             FROM scores n
             LEFT JOIN schedule_slots ss ON ss.id = n.schedule_slot_id
             LEFT JOIN subjects sub ON sub.id = ss.subject_id
             JOIN report_cards r ON r.id = n.report_card_id
             LEFT JOIN academic_years ay ON ay.id = r.academic_year_id
             WHERE n.student_id = ?
             ORDER BY ay.year_start DESC, r.term DESC, COALESCE(n.subject_name, sub.name)",
        )
        .map_err(db_err)?;
    let rows = stmt
        .query_map([&student_id], |r| {
            let id: String = r.get(0)?;
            let subject: Option<String> = r.get(1)?;
            let value: f64 = r.get(2)?;
            let term: i64 = r.get(3)?;
            let year_label: Option<String> = r.get(4)?;
            let annotation: Option<String> = r.get(5)?;
            let report_card_id: String = r.get(6)?;
            let slot_id: Option<String> = r.get(7)?;
            Ok(json!({
                "id": id,
                "subjectName": subject,
                "value": value,
                "term": term,
                "yearLabel": year_label,
                "annotation": annotation,
                "reportCardId": report_card_id,
                "scheduleSlotId": slot_id
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "scores": rows }))
}

fn grades_list_manual(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_filter = params
        .get("studentId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    // Manual-visibility predicate: untagged rows and rows without task
    // markers. Task-derived rows (uh1:/uh2:/uts:/uas:) are filtered out.
    let base = "SELECT n.id,
                       n.student_id,
                       s.name,
                       COALESCE(n.subject_name, sub.name),
                       n.value,
                       r.term,
                       ay.year_start || '/' || ay.year_end,
                       n.annotation
                FROM scores n
                JOIN students s ON s.id = n.student_id
                LEFT JOIN schedule_slots ss ON ss.id = n.schedule_slot_id
                LEFT JOIN subjects sub ON sub.id = ss.subject_id
                JOIN report_cards r ON r.id = n.report_card_id
                LEFT JOIN academic_years ay ON ay.id = r.academic_year_id
                WHERE (
                  n.annotation IS NULL
                  OR n.annotation = ''
                  OR n.annotation = 'manual_input'
                  OR (
                    n.annotation NOT LIKE '%uh1:%'
                    AND n.annotation NOT LIKE '%uh2:%'
                    AND n.annotation NOT LIKE '%uts:%'
                    AND n.annotation NOT LIKE '%uas:%'
                  )
                )";
    let (sql, bind): (String, Vec<String>) = match &student_filter {
        Some(sid) => (
            format!("{} AND n.student_id = ? ORDER BY s.name, ay.year_start DESC, r.term DESC", base),
            vec![sid.clone()],
        ),
        None => (
            format!("{} ORDER BY s.name, ay.year_start DESC, r.term DESC", base),
            vec![],
        ),
    };

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(bind.iter()), |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let student_name: String = r.get(2)?;
            let subject: Option<String> = r.get(3)?;
            let value: f64 = r.get(4)?;
            let term: i64 = r.get(5)?;
            let year_label: Option<String> = r.get(6)?;
            let annotation: Option<String> = r.get(7)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "studentName": student_name,
                "subjectName": subject,
                "value": value,
                "term": term,
                "yearLabel": year_label,
                "annotation": annotation
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_err)?;
    Ok(json!({ "scores": rows }))
}

fn grades_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let score_id = get_required_str(params, "scoreId")?;

    let exists = conn
        .query_row("SELECT 1 FROM scores WHERE id = ?", [&score_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(db_err)?
        .is_some();
    if !exists {
        return Err(HandlerErr {
            code: "not_found",
            message: "score not found".to_string(),
            details: Some(json!({ "scoreId": score_id })),
        });
    }
    let deleted_row = score_row_json(conn, &score_id)?;

    conn.execute("DELETE FROM scores WHERE id = ?", [&score_id])
        .map_err(|e| HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: None,
        })?;
    Ok(json!({ "deleted": deleted_row }))
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
        "grades.upsert" => Some(with_db(state, req, grades_upsert)),
        "grades.listForStudent" => Some(with_db(state, req, grades_list_for_student)),
        "grades.listManual" => Some(with_db(state, req, grades_list_manual)),
        "grades.delete" => Some(with_db(state, req, grades_delete)),
        _ => None,
    }
}
