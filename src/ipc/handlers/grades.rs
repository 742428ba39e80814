use crate::engine::{self, EngineContext};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_grades_recompute(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };

    let ctx = EngineContext {
        conn,
        section_id: &section_id,
    };
    match engine::recompute_section_grades(&ctx) {
        Ok(model) => ok(
            &req.id,
            serde_json::to_value(model).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    match engine::stored_section_grades(conn, &section_id) {
        Ok(stored) => ok(
            &req.id,
            serde_json::to_value(stored).unwrap_or_else(|_| json!({})),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

fn handle_grades_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };

    let ctx = EngineContext {
        conn,
        section_id: &section_id,
    };
    match engine::section_grade_status(&ctx) {
        Ok(status) => ok(
            &req.id,
            json!({ "status": serde_json::to_value(status).unwrap_or_default() }),
        ),
        Err(e) => err(&req.id, &e.code, e.message, e.details),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.recompute" => Some(handle_grades_recompute(state, req)),
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.status" => Some(handle_grades_status(state, req)),
        _ => None,
    }
}
