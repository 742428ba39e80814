mod test_support;

use serde_json::json;
use test_support::{
    add_component, request_err, request_ok, seed_section_with_student, spawn_sidecar, temp_dir,
};

#[test]
fn out_of_range_scores_are_rejected_at_write_time() {
    let workspace = temp_dir("gradecut-score-range");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, student_id) = seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Quiz", 25.0);

    let (code, resp) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 25.5 }),
    );
    assert_eq!(code, "score_out_of_range");
    assert_eq!(
        resp.get("error")
            .and_then(|e| e.get("details"))
            .and_then(|d| d.get("maxScore"))
            .and_then(|v| v.as_f64()),
        Some(25.0)
    );

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": -1.0 }),
    );
    assert_eq!(code, "score_out_of_range");

    // Both bounds are inclusive.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 25.0 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 0.0 }),
    );
}

#[test]
fn scores_for_unenrolled_students_are_rejected() {
    let workspace = temp_dir("gradecut-score-unenrolled");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, _student_id) =
        seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Quiz", 25.0);

    let outsider = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "students.create",
        json!({ "code": "S-0002", "lastName": "Kaya", "firstName": "Mert" }),
    );
    let outsider_id = outsider
        .get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string();

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "scores.set",
        json!({ "componentId": c1, "studentId": outsider_id, "score": 10.0 }),
    );
    assert_eq!(code, "not_found");
}

#[test]
fn component_maximum_must_be_positive() {
    let workspace = temp_dir("gradecut-component-max");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, _student_id) =
        seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "components.create",
        json!({ "sectionId": section_id, "title": "Broken", "maxScore": 0.0 }),
    );
    assert_eq!(code, "bad_params");

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "components.create",
        json!({ "sectionId": section_id, "title": "Broken", "maxScore": -5.0 }),
    );
    assert_eq!(code, "bad_params");
}

#[test]
fn lowering_a_maximum_below_recorded_scores_is_rejected() {
    let workspace = temp_dir("gradecut-component-lower-max");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let (section_id, student_id) = seed_section_with_student(&mut stdin, &mut reader, &workspace);

    let c1 = add_component(&mut stdin, &mut reader, "1", &section_id, "Project", 100.0);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "scores.set",
        json!({ "componentId": c1, "studentId": student_id, "score": 90.0 }),
    );

    let (code, _) = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "components.update",
        json!({ "componentId": c1, "maxScore": 80.0 }),
    );
    assert_eq!(code, "score_out_of_range");

    // Lowering above the recorded score is fine.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "components.update",
        json!({ "componentId": c1, "maxScore": 95.0 }),
    );
}
