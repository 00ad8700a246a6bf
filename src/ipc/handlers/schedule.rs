use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_schedule_list_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    // Left joins keep placeholder slots (no teacher) visible here; the grade
    // ledger relies on that listing side effect staying observable.
    let mut stmt = match conn.prepare(
        "SELECT ss.id, ss.day, ss.subject_id, sub.name, ss.teacher_id, t.name, ss.slot_date
         FROM schedule_slots ss
         LEFT JOIN subjects sub ON sub.id = ss.subject_id
         LEFT JOIN teachers t ON t.id = ss.teacher_id
         WHERE ss.class_id = ?
         ORDER BY
           CASE ss.day
             WHEN 'Senin' THEN 1
             WHEN 'Selasa' THEN 2
             WHEN 'Rabu' THEN 3
             WHEN 'Kamis' THEN 4
             WHEN 'Jumat' THEN 5
             ELSE 6
           END,
           ss.slot_date,
           ss.rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&class_id], |r| {
            let id: String = r.get(0)?;
            let day: String = r.get(1)?;
            let subject_id: String = r.get(2)?;
            let subject_name: Option<String> = r.get(3)?;
            let teacher_id: Option<String> = r.get(4)?;
            let teacher_name: Option<String> = r.get(5)?;
            let slot_date: Option<String> = r.get(6)?;
            Ok(json!({
                "id": id,
                "day": day,
                "subjectId": subject_id,
                "subjectName": subject_name,
                "teacherId": teacher_id,
                "teacherName": teacher_name,
                "date": slot_date
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(slots) => ok(&req.id, json!({ "slots": slots })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_schedule_replace_for_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };
    let Some(slots) = req.params.get("slots").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing slots", None);
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Whole rebuild is one transaction: any failure leaves the prior schedule
    // intact.
    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    // Slots never referenced by a score can go directly.
    if let Err(e) = tx.execute(
        "DELETE FROM schedule_slots
         WHERE class_id = ?
           AND id NOT IN (
             SELECT DISTINCT schedule_slot_id FROM scores WHERE schedule_slot_id IS NOT NULL
           )",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    // Referenced slots are about to be deleted; detach their scores so grade
    // rows survive the rebuild (schedule_slot_id becomes NULL).
    if let Err(e) = tx.execute(
        "UPDATE scores
         SET schedule_slot_id = NULL
         WHERE schedule_slot_id IN (
           SELECT id FROM schedule_slots WHERE class_id = ?
         )",
        [&class_id],
    ) {
        let _ = tx.rollback();
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }

    if let Err(e) = tx.execute("DELETE FROM schedule_slots WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return err(&req.id, "db_delete_failed", e.to_string(), None);
    }

    // Items missing a required field are skipped, not fatal.
    let mut inserted = 0usize;
    let mut skipped = 0usize;
    for slot in slots {
        let day = slot.get("day").and_then(|v| v.as_str());
        let subject_id = slot.get("subjectId").and_then(|v| v.as_str());
        let teacher_id = slot.get("teacherId").and_then(|v| v.as_str());
        let date = slot.get("date").and_then(|v| v.as_str());
        let (Some(day), Some(subject_id), Some(teacher_id), Some(date)) =
            (day, subject_id, teacher_id, date)
        else {
            skipped += 1;
            continue;
        };
        let id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO schedule_slots(id, class_id, subject_id, day, teacher_id, slot_date)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&id, &class_id, subject_id, day, teacher_id, date),
        ) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_insert_failed",
                e.to_string(),
                Some(json!({ "table": "schedule_slots" })),
            );
        }
        inserted += 1;
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "inserted": inserted, "skipped": skipped }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.listForClass" => Some(handle_schedule_list_for_class(state, req)),
        "schedule.replaceForClass" => Some(handle_schedule_replace_for_class(state, req)),
        _ => None,
    }
}
