use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_components_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let title = match req.params.get("title").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing/empty title", None),
    };
    let max_score = match req.params.get("maxScore").and_then(|v| v.as_f64()) {
        Some(v) if v > 0.0 && v.is_finite() => v,
        _ => {
            return err(
                &req.id,
                "bad_params",
                "maxScore must be a positive number",
                None,
            )
        }
    };

    match engine::section_exists(conn, &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    }

    let next_sort: i64 = match conn.query_row(
        "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM score_components WHERE section_id = ?",
        [&section_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let component_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO score_components(id, section_id, title, max_score, sort_order)
         VALUES(?, ?, ?, ?, ?)",
        (&component_id, &section_id, &title, max_score, next_sort),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "score_components" })),
        );
    }

    ok(&req.id, json!({ "componentId": component_id }))
}

fn handle_components_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let component_id = match req.params.get("componentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing componentId", None),
    };

    let existing: Option<(String, f64)> = match conn
        .query_row(
            "SELECT title, max_score FROM score_components WHERE id = ?",
            [&component_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((current_title, current_max)) = existing else {
        return err(&req.id, "not_found", "component not found", None);
    };

    let title = match req.params.get("title") {
        None => current_title,
        Some(v) => match v.as_str() {
            Some(s) if !s.trim().is_empty() => s.trim().to_string(),
            _ => return err(&req.id, "bad_params", "title must be a non-empty string", None),
        },
    };
    let max_score = match req.params.get("maxScore") {
        None => current_max,
        Some(v) => match v.as_f64() {
            Some(m) if m > 0.0 && m.is_finite() => m,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "maxScore must be a positive number",
                    None,
                )
            }
        },
    };

    // Lowering the maximum must not strand already-recorded scores outside
    // [0, max]; the bound is enforced at write time, so reject here too.
    if max_score < current_max {
        let above: i64 = match conn.query_row(
            "SELECT COUNT(*) FROM score_entries WHERE component_id = ? AND score > ?",
            (&component_id, max_score),
            |r| r.get(0),
        ) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if above > 0 {
            return err(
                &req.id,
                "score_out_of_range",
                "existing entries exceed the new maximum",
                Some(json!({ "entriesAboveNewMax": above, "newMax": max_score })),
            );
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE score_components SET title = ?, max_score = ? WHERE id = ?",
        (&title, max_score, &component_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "score_components" })),
        );
    }

    ok(&req.id, json!({ "ok": true }))
}

// Deleting a component drops its entries with it. Previously computed grades
// are left in place and show up as stale via grades.status until the caller
// recomputes.
fn handle_components_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let component_id = match req.params.get("componentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing componentId", None),
    };

    let tx = match conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return err(&req.id, "db_tx_failed", e.to_string(), None),
    };

    if let Err(e) = tx.execute(
        "DELETE FROM score_entries WHERE component_id = ?",
        [&component_id],
    ) {
        let _ = tx.rollback();
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "score_entries" })),
        );
    }

    let changed = match tx.execute(
        "DELETE FROM score_components WHERE id = ?",
        [&component_id],
    ) {
        Ok(v) => v,
        Err(e) => {
            let _ = tx.rollback();
            return err(
                &req.id,
                "db_delete_failed",
                e.to_string(),
                Some(json!({ "table": "score_components" })),
            );
        }
    };
    if changed == 0 {
        let _ = tx.rollback();
        return err(&req.id, "not_found", "component not found", None);
    }

    if let Err(e) = tx.commit() {
        return err(&req.id, "db_commit_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_components_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let components = match engine::load_components(conn, &section_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    ok(
        &req.id,
        json!({ "components": serde_json::to_value(components).unwrap_or_default() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "components.create" => Some(handle_components_create(state, req)),
        "components.update" => Some(handle_components_update(state, req)),
        "components.delete" => Some(handle_components_delete(state, req)),
        "components.list" => Some(handle_components_list(state, req)),
        _ => None,
    }
}
