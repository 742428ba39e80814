mod test_support;

use serde_json::json;
use test_support::{
    add_component, request_ok, seed_section_with_student, spawn_sidecar, temp_dir,
};

#[test]
fn missing_entry_counts_as_zero_and_is_reported_as_incomplete() {
    let workspace = temp_dir("gradecut-missing-as-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, student_id) = seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Quiz 1", 50.0);
    let _c2 = add_component(&mut stdin, &mut reader, "2", &section_id, "Quiz 2", 50.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 30.0 }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.recompute",
        json!({ "sectionId": section_id }),
    );
    let row = &result.get("rows").and_then(|v| v.as_array()).expect("rows")[0];
    assert_eq!(row.get("total").and_then(|v| v.as_f64()), Some(30.0));
    assert_eq!(row.get("maxTotal").and_then(|v| v.as_f64()), Some(100.0));
    assert_eq!(row.get("percentage").and_then(|v| v.as_f64()), Some(30.0));
    assert_eq!(row.get("missingCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        result.get("incompleteCount").and_then(|v| v.as_u64()),
        Some(1)
    );
}

#[test]
fn explicit_zero_is_not_incomplete() {
    let workspace = temp_dir("gradecut-explicit-zero");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, student_id) = seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Quiz 1", 50.0);
    let c2 = add_component(&mut stdin, &mut reader, "2", &section_id, "Quiz 2", 50.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 30.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.set",
        json!({ "componentId": c2, "studentId": student_id, "score": 0.0 }),
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.recompute",
        json!({ "sectionId": section_id }),
    );
    let row = &result.get("rows").and_then(|v| v.as_array()).expect("rows")[0];
    assert_eq!(row.get("percentage").and_then(|v| v.as_f64()), Some(30.0));
    assert_eq!(row.get("missingCount").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        result.get("incompleteCount").and_then(|v| v.as_u64()),
        Some(0)
    );
}

#[test]
fn clearing_a_score_returns_the_cell_to_ungraded() {
    let workspace = temp_dir("gradecut-clear-score");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, student_id) = seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Lab", 40.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 22.0 }),
    );
    let cleared = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": null }),
    );
    assert_eq!(cleared.get("cleared").and_then(|v| v.as_bool()), Some(true));

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "grades.recompute",
        json!({ "sectionId": section_id }),
    );
    let row = &result.get("rows").and_then(|v| v.as_array()).expect("rows")[0];
    assert_eq!(row.get("total").and_then(|v| v.as_f64()), Some(0.0));
    assert_eq!(row.get("missingCount").and_then(|v| v.as_i64()), Some(1));

    let grid = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.grid",
        json!({ "sectionId": section_id }),
    );
    let cells = grid.get("cells").and_then(|v| v.as_array()).expect("cells");
    assert_eq!(cells[0][0], serde_json::Value::Null);
}
