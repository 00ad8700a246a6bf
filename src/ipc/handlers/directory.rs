use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn required_name(req: &Request) -> Result<String, serde_json::Value> {
    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) => v.trim().to_string(),
        None => return Err(err(&req.id, "bad_params", "missing name", None)),
    };
    if name.is_empty() {
        return Err(err(&req.id, "bad_params", "name must not be empty", None));
    }
    Ok(name)
}

fn handle_named_create(state: &mut AppState, req: &Request, table: &str) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let id = Uuid::new_v4().to_string();
    let sql = format!("INSERT INTO {}(id, name) VALUES(?, ?)", table);
    if let Err(e) = conn.execute(&sql, (&id, &name)) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": table })),
        );
    }
    ok(&req.id, json!({ "id": id, "name": name }))
}

fn handle_named_list(state: &mut AppState, req: &Request, table: &str, key: &str) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let sql = format!("SELECT id, name FROM {} ORDER BY name", table);
    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            Ok(json!({ "id": id, "name": name }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(items) => ok(&req.id, json!({ key: items })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let name = match required_name(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let class_id = match req.params.get("classId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing classId", None),
    };

    let class_exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if class_exists.is_none() {
        return err(&req.id, "not_found", "class not found", None);
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, name) VALUES(?, ?, ?)",
        (&id, &class_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }
    ok(&req.id, json!({ "id": id, "classId": class_id, "name": name }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let class_filter = req
        .params
        .get("classId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let (sql, params): (&str, Vec<String>) = match &class_filter {
        Some(cid) => (
            "SELECT s.id, s.name, s.class_id, c.name
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             WHERE s.class_id = ?
             ORDER BY s.name",
            vec![cid.clone()],
        ),
        None => (
            "SELECT s.id, s.name, s.class_id, c.name
             FROM students s
             LEFT JOIN classes c ON c.id = s.class_id
             ORDER BY s.name",
            vec![],
        ),
    };
    let mut stmt = match conn.prepare(sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(rusqlite::params_from_iter(params.iter()), |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let class_id: String = row.get(2)?;
            let class_name: Option<String> = row.get(3)?;
            Ok(json!({
                "id": id,
                "name": name,
                "classId": class_id,
                "className": class_name
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(students) => ok(&req.id, json!({ "students": students })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_years_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let year_start = match req.params.get("yearStart").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing yearStart", None),
    };
    let year_end = match req.params.get("yearEnd").and_then(|v| v.as_i64()) {
        Some(v) => v,
        None => return err(&req.id, "bad_params", "missing yearEnd", None),
    };
    let active = req
        .params
        .get("active")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    // Only one academic year may be active at a time.
    if active {
        if let Err(e) = conn.execute("UPDATE academic_years SET active = 0", []) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    let id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, year_start, year_end, active) VALUES(?, ?, ?, ?)",
        (&id, year_start, year_end, active as i64),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "academic_years" })),
        );
    }
    ok(
        &req.id,
        json!({
            "id": id,
            "yearStart": year_start,
            "yearEnd": year_end,
            "active": active
        }),
    )
}

fn handle_years_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut stmt = match conn.prepare(
        "SELECT id, year_start, year_end, active FROM academic_years ORDER BY year_start DESC",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let year_start: i64 = row.get(1)?;
            let year_end: i64 = row.get(2)?;
            let active: i64 = row.get(3)?;
            Ok(json!({
                "id": id,
                "yearStart": year_start,
                "yearEnd": year_end,
                "active": active != 0,
                "label": format!("{}/{}", year_start, year_end)
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());
    match rows {
        Ok(years) => ok(&req.id, json!({ "years": years })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.create" => Some(handle_named_create(state, req, "classes")),
        "classes.list" => Some(handle_named_list(state, req, "classes", "classes")),
        "teachers.create" => Some(handle_named_create(state, req, "teachers")),
        "teachers.list" => Some(handle_named_list(state, req, "teachers", "teachers")),
        "subjects.create" => Some(handle_named_create(state, req, "subjects")),
        "subjects.list" => Some(handle_named_list(state, req, "subjects", "subjects")),
        "students.create" => Some(handle_students_create(state, req)),
        "students.list" => Some(handle_students_list(state, req)),
        "years.create" => Some(handle_years_create(state, req)),
        "years.list" => Some(handle_years_list(state, req)),
        _ => None,
    }
}
