use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{SecondsFormat, Utc};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn card_json(conn: &rusqlite::Connection, card_id: &str) -> rusqlite::Result<serde_json::Value> {
    conn.query_row(
        "SELECT r.id, r.student_id, r.term, r.academic_year_id,
                ay.year_start || '/' || ay.year_end, r.comment, r.created_at
         FROM report_cards r
         LEFT JOIN academic_years ay ON ay.id = r.academic_year_id
         WHERE r.id = ?",
        [card_id],
        |r| {
            let id: String = r.get(0)?;
            let student_id: String = r.get(1)?;
            let term: i64 = r.get(2)?;
            let year_id: String = r.get(3)?;
            let year_label: Option<String> = r.get(4)?;
            let comment: Option<String> = r.get(5)?;
            let created_at: String = r.get(6)?;
            Ok(json!({
                "id": id,
                "studentId": student_id,
                "term": term,
                "academicYearId": year_id,
                "yearLabel": year_label,
                "comment": comment,
                "createdAt": created_at
            }))
        },
    )
}

fn handle_reports_list_for_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let mut stmt = match conn.prepare(
        "SELECT r.id, r.term, ay.year_start || '/' || ay.year_end, r.comment
         FROM report_cards r
         LEFT JOIN academic_years ay ON ay.id = r.academic_year_id
         WHERE r.student_id = ?
         ORDER BY ay.year_start DESC, r.term DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let cards: Vec<(String, i64, Option<String>, Option<String>)> = match stmt
        .query_map([&student_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?))
        })
        .and_then(|it| it.collect())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut out = Vec::with_capacity(cards.len());
    for (card_id, term, year_label, comment) in cards {
        let mut score_stmt = match conn.prepare(
            "SELECT COALESCE(n.subject_name, sub.name), n.value, n.annotation
             FROM scores n
             LEFT JOIN schedule_slots ss ON ss.id = n.schedule_slot_id
             LEFT JOIN subjects sub ON sub.id = ss.subject_id
             WHERE n.report_card_id = ?
             ORDER BY COALESCE(n.subject_name, sub.name)",
        ) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let scores = score_stmt
            .query_map([&card_id], |r| {
                let subject: Option<String> = r.get(0)?;
                let value: f64 = r.get(1)?;
                let annotation: Option<String> = r.get(2)?;
                Ok(json!({
                    "subjectName": subject,
                    "value": value,
                    "annotation": annotation
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        let scores = match scores {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        out.push(json!({
            "id": card_id,
            "term": term,
            "yearLabel": year_label,
            "comment": comment,
            "scores": scores
        }));
    }
    ok(&req.id, json!({ "reportCards": out }))
}

fn handle_reports_list_all(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut stmt = match conn.prepare(
        "SELECT r.id, s.name, k.name, r.term,
                ay.year_start || '/' || ay.year_end, r.comment
         FROM report_cards r
         JOIN students s ON s.id = r.student_id
         LEFT JOIN classes k ON k.id = s.class_id
         LEFT JOIN academic_years ay ON ay.id = r.academic_year_id
         ORDER BY ay.year_start DESC, r.term DESC, s.name",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |r| {
            let id: String = r.get(0)?;
            let student_name: String = r.get(1)?;
            let class_name: Option<String> = r.get(2)?;
            let term: i64 = r.get(3)?;
            let year_label: Option<String> = r.get(4)?;
            let comment: Option<String> = r.get(5)?;
            Ok(json!({
                "id": id,
                "studentName": student_name,
                "className": class_name,
                "term": term,
                "yearLabel": year_label,
                "comment": comment
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(cards) => ok(&req.id, json!({ "reportCards": cards })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_upsert_comment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;
    let student_id = match params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };
    let term = match params.get("term").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing term", None),
    };
    let year_id = match params.get("academicYearId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing academicYearId", None),
    };
    let comment = params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let student_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_exists.is_none() {
        return err(&req.id, "bad_params", "student not found", None);
    }

    let existing: Option<String> = match conn
        .query_row(
            "SELECT id FROM report_cards
             WHERE student_id = ? AND term = ? AND academic_year_id = ?",
            (&student_id, term, &year_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let card_id = match existing {
        Some(id) => {
            if let Err(e) = conn.execute(
                "UPDATE report_cards SET comment = ? WHERE id = ?",
                (&comment, &id),
            ) {
                return err(&req.id, "db_update_failed", e.to_string(), None);
            }
            id
        }
        None => {
            let id = Uuid::new_v4().to_string();
            if let Err(e) = conn.execute(
                "INSERT INTO report_cards(id, student_id, term, academic_year_id, comment, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (&id, &student_id, term, &year_id, &comment, now_ts()),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "report_cards" })),
                );
            }
            id
        }
    };

    match card_json(conn, &card_id) {
        Ok(card) => ok(&req.id, json!({ "reportCard": card })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_update_comment(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card_id = match req.params.get("reportCardId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing reportCardId", None),
    };
    let comment = req
        .params
        .get("comment")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let affected = match conn.execute(
        "UPDATE report_cards SET comment = ? WHERE id = ?",
        (&comment, &card_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if affected == 0 {
        return err(&req.id, "not_found", "report card not found", None);
    }
    match card_json(conn, &card_id) {
        Ok(card) => ok(&req.id, json!({ "reportCard": card })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_reports_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let card_id = match req.params.get("reportCardId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing reportCardId", None),
    };

    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM report_cards WHERE id = ?", [&card_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "report card not found", None);
    }

    // Cascade is all-or-nothing: scores first, then the card, one transaction.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };
    let deleted_scores = match tx.execute("DELETE FROM scores WHERE report_card_id = ?", [&card_id]) {
        Ok(n) => n,
        Err(e) => {
            let _ = tx.rollback();
            return err(&req.id, "db_delete_failed", e.to_string(), None);
        }
    };
    if let Err(e) = tx.execute("DELETE FROM report_cards WHERE id = ?", [&card_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }
    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "deletedScores": deleted_scores, "reportCardId": card_id }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.listForStudent" => Some(handle_reports_list_for_student(state, req)),
        "reports.listAll" => Some(handle_reports_list_all(state, req)),
        "reports.upsertComment" => Some(handle_reports_upsert_comment(state, req)),
        "reports.updateComment" => Some(handle_reports_update_comment(state, req)),
        "reports.delete" => Some(handle_reports_delete(state, req)),
        _ => None,
    }
}
