use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_sections_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match req.params.get("name").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing/empty name", None),
    };

    let section_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO sections(id, name, created_at) VALUES(?, ?, ?)",
        (&section_id, &name, Utc::now().to_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "sections" })),
        );
    }

    ok(&req.id, json!({ "sectionId": section_id }))
}

fn handle_sections_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let mut stmt = match conn.prepare("SELECT id, name, created_at FROM sections ORDER BY name") {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let sections = match stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "createdAt": r.get::<_, String>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "sections": sections }))
}

// Application-managed cascade: a section takes its components, entries,
// enrollments, thresholds, and computed grades with it, in one transaction.
fn handle_sections_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };

    match engine::section_exists(conn, &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    }

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    let steps: [(&str, &str); 6] = [
        (
            "DELETE FROM score_entries WHERE component_id IN
             (SELECT id FROM score_components WHERE section_id = ?)",
            "score_entries",
        ),
        (
            "DELETE FROM score_components WHERE section_id = ?",
            "score_components",
        ),
        (
            "DELETE FROM computed_grades WHERE section_id = ?",
            "computed_grades",
        ),
        (
            "DELETE FROM grade_thresholds WHERE section_id = ?",
            "grade_thresholds",
        ),
        ("DELETE FROM enrollments WHERE section_id = ?", "enrollments"),
        ("DELETE FROM sections WHERE id = ?", "sections"),
    ];
    for (sql, table) in steps {
        if let Err(e) = tx.execute(sql, [&section_id]) {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": table })),
            );
        }
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_sections_enroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    match engine::section_exists(conn, &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    }
    let student_found: Option<i64> = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if student_found.is_none() {
        return err(&req.id, "not_found", "student not found", None);
    }

    if let Err(e) = conn.execute(
        "INSERT INTO enrollments(section_id, student_id) VALUES(?, ?)
         ON CONFLICT(section_id, student_id) DO NOTHING",
        (&section_id, &student_id),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "enrollments" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_sections_unenroll(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let changed = match conn.execute(
        "DELETE FROM enrollments WHERE section_id = ? AND student_id = ?",
        (&section_id, &student_id),
    ) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "enrollments" })),
            )
        }
    };
    if changed == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_sections_roster(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };

    match engine::section_exists(conn, &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    }

    let mut stmt = match conn.prepare(
        "SELECT s.id, s.code, s.last_name, s.first_name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.section_id = ?
         ORDER BY s.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let students = match stmt
        .query_map([&section_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "code": r.get::<_, String>(1)?,
                "displayName": format!("{}, {}", last, first),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "students": students }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "sections.create" => Some(handle_sections_create(state, req)),
        "sections.list" => Some(handle_sections_list(state, req)),
        "sections.delete" => Some(handle_sections_delete(state, req)),
        "sections.enroll" => Some(handle_sections_enroll(state, req)),
        "sections.unenroll" => Some(handle_sections_unenroll(state, req)),
        "sections.roster" => Some(handle_sections_roster(state, req)),
        _ => None,
    }
}
