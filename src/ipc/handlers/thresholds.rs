use crate::engine::{self, ThresholdSet};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_thresholds_get(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let thresholds = match engine::load_thresholds(conn, &section_id) {
        Ok(v) => v,
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    };

    ok(
        &req.id,
        json!({ "thresholds": serde_json::to_value(thresholds).unwrap_or_default() }),
    )
}

fn handle_thresholds_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let section_id = match req.params.get("sectionId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing sectionId", None),
    };
    let Some(raw) = req.params.get("thresholds") else {
        return err(&req.id, "bad_params", "missing thresholds", None);
    };
    let thresholds: ThresholdSet = match serde_json::from_value(raw.clone()) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "bad_params",
                format!("thresholds must carry all seven cut points: {}", e),
                None,
            )
        }
    };

    match engine::section_exists(conn, &section_id) {
        Ok(true) => {}
        Ok(false) => return err(&req.id, "not_found", "section not found", None),
        Err(e) => return err(&req.id, &e.code, e.message, e.details),
    }

    // save_thresholds validates first; a rejected set never reaches the DB.
    if let Err(e) = engine::save_thresholds(conn, &section_id, &thresholds) {
        return err(&req.id, &e.code, e.message, e.details);
    }

    ok(
        &req.id,
        json!({ "thresholds": serde_json::to_value(thresholds).unwrap_or_default() }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "thresholds.get" => Some(handle_thresholds_get(state, req)),
        "thresholds.save" => Some(handle_thresholds_save(state, req)),
        _ => None,
    }
}
