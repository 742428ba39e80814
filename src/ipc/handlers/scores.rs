use crate::engine;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::Utc;
use rusqlite::OptionalExtension;
use serde_json::json;
use std::collections::HashMap;

// Range validation happens here, at write time. Aggregation trusts entries
// already on disk and never clamps on read.
fn handle_scores_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let component_id = match req.params.get("componentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing componentId", None),
    };
    let student_id = match req.params.get("studentId").and_then(|v| v.as_str()) {
        Some(v) => v.to_string(),
        None => return err(&req.id, "bad_params", "missing studentId", None),
    };

    let component: Option<(String, f64)> = match conn
        .query_row(
            "SELECT section_id, max_score FROM score_components WHERE id = ?",
            [&component_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((section_id, max_score)) = component else {
        return err(&req.id, "not_found", "component not found", None);
    };

    let enrolled: Option<i64> = match conn
        .query_row(
            "SELECT 1 FROM enrollments WHERE section_id = ? AND student_id = ?",
            (&section_id, &student_id),
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if enrolled.is_none() {
        return err(
            &req.id,
            "not_found",
            "student is not enrolled in the component's section",
            None,
        );
    }

    let score_param = req.params.get("score");
    match score_param {
        None | Some(serde_json::Value::Null) => {
            // Clearing the cell returns the student to "not yet graded" for
            // this component, which is distinct from an explicit 0.
            if let Err(e) = conn.execute(
                "DELETE FROM score_entries WHERE component_id = ? AND student_id = ?",
                (&component_id, &student_id),
            ) {
                return err(
                    &req.id,
                    "db_delete_failed",
                    e.to_string(),
                    Some(json!({ "table": "score_entries" })),
                );
            }
            ok(&req.id, json!({ "ok": true, "cleared": true }))
        }
        Some(v) => {
            let Some(score) = v.as_f64() else {
                return err(&req.id, "bad_params", "score must be a number or null", None);
            };
            if !score.is_finite() || score < 0.0 || score > max_score {
                return err(
                    &req.id,
                    "score_out_of_range",
                    format!("score must lie in [0, {}]", max_score),
                    Some(json!({ "score": score, "maxScore": max_score })),
                );
            }
            if let Err(e) = conn.execute(
                "INSERT INTO score_entries(component_id, student_id, score, updated_at)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(component_id, student_id) DO UPDATE SET
                   score = excluded.score,
                   updated_at = excluded.updated_at",
                (&component_id, &student_id, score, Utc::now().to_rfc3339()),
            ) {
                return err(
                    &req.id,
                    "db_insert_failed",
                    e.to_string(),
                    Some(json!({ "table": "score_entries" })),
                );
            }
            ok(&req.id, json!({ "ok": true }))
        }
    }
}

// Components x roster grid of nullable scores, for grading-screen display.
fn handle_scores_grid(state: &mut AppState, req: &Request) -> serde_json::Value {
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

    let mut roster_stmt = match conn.prepare(
        "SELECT s.id, s.code, s.last_name, s.first_name
         FROM enrollments e
         JOIN students s ON s.id = e.student_id
         WHERE e.section_id = ?
         ORDER BY s.code",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let roster: Vec<(String, String, String)> = match roster_stmt
        .query_map([&section_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                format!("{}, {}", last, first),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mut entry_stmt = match conn.prepare(
        "SELECT e.student_id, e.component_id, e.score
         FROM score_entries e
         JOIN score_components c ON c.id = e.component_id
         WHERE c.section_id = ?",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let entries: Vec<(String, String, f64)> = match entry_stmt
        .query_map([&section_id], |r| {
            Ok((r.get(0)?, r.get(1)?, r.get(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let student_index: HashMap<&str, usize> = roster
        .iter()
        .enumerate()
        .map(|(i, (id, _, _))| (id.as_str(), i))
        .collect();
    let component_index: HashMap<&str, usize> = components
        .iter()
        .enumerate()
        .map(|(i, c)| (c.id.as_str(), i))
        .collect();

    let mut cells: Vec<Vec<Option<f64>>> = vec![vec![None; components.len()]; roster.len()];
    for (student_id, component_id, score) in &entries {
        let Some(&r_i) = student_index.get(student_id.as_str()) else {
            continue;
        };
        let Some(&c_i) = component_index.get(component_id.as_str()) else {
            continue;
        };
        cells[r_i][c_i] = Some(*score);
    }

    let students: Vec<serde_json::Value> = roster
        .iter()
        .map(|(id, code, name)| json!({ "id": id, "code": code, "displayName": name }))
        .collect();

    ok(
        &req.id,
        json!({
            "components": serde_json::to_value(&components).unwrap_or_default(),
            "students": students,
            "cells": cells
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scores.set" => Some(handle_scores_set(state, req)),
        "scores.grid" => Some(handle_scores_grid(state, req)),
        _ => None,
    }
}
