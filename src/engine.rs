use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Half-up 2-decimal rounding used for stored percentages:
/// `Int(100*x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GradeLabel {
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    #[serde(rename = "D+")]
    DPlus,
    D,
    F,
}

impl GradeLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            GradeLabel::A => "A",
            GradeLabel::BPlus => "B+",
            GradeLabel::B => "B",
            GradeLabel::CPlus => "C+",
            GradeLabel::C => "C",
            GradeLabel::DPlus => "D+",
            GradeLabel::D => "D",
            GradeLabel::F => "F",
        }
    }

    pub fn points(self) -> f64 {
        match self {
            GradeLabel::A => 4.0,
            GradeLabel::BPlus => 3.5,
            GradeLabel::B => 3.0,
            GradeLabel::CPlus => 2.5,
            GradeLabel::C => 2.0,
            GradeLabel::DPlus => 1.5,
            GradeLabel::D => 1.0,
            GradeLabel::F => 0.0,
        }
    }
}

/// Seven cut points, percentage-of-maximum, highest grade first.
/// Anything below `d` resolves to F.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdSet {
    pub a: f64,
    pub b_plus: f64,
    pub b: f64,
    pub c_plus: f64,
    pub c: f64,
    pub d_plus: f64,
    pub d: f64,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            a: 80.0,
            b_plus: 75.0,
            b: 70.0,
            c_plus: 65.0,
            c: 60.0,
            d_plus: 55.0,
            d: 50.0,
        }
    }
}

impl ThresholdSet {
    fn labeled(&self) -> [(&'static str, f64); 7] {
        [
            ("A", self.a),
            ("B+", self.b_plus),
            ("B", self.b),
            ("C+", self.c_plus),
            ("C", self.c),
            ("D+", self.d_plus),
            ("D", self.d),
        ]
    }

    /// The non-increasing invariant: A >= B+ >= B >= C+ >= C >= D+ >= D,
    /// every value in [0, 100]. Must pass before save and before any
    /// computation that uses the set.
    pub fn validate(&self) -> Result<(), EngineError> {
        for (label, v) in self.labeled() {
            if !v.is_finite() || !(0.0..=100.0).contains(&v) {
                return Err(EngineError::new(
                    "bad_params",
                    format!("threshold {} must be in [0, 100]", label),
                )
                .with_details(serde_json::json!({ "label": label, "value": v })));
            }
        }
        let pairs = self.labeled();
        for w in pairs.windows(2) {
            let (upper_label, upper) = w[0];
            let (lower_label, lower) = w[1];
            if lower > upper {
                return Err(EngineError::new(
                    "invalid_threshold_order",
                    format!(
                        "threshold {} ({}) exceeds threshold {} ({})",
                        lower_label, lower, upper_label, upper
                    ),
                )
                .with_details(serde_json::json!({
                    "upperLabel": upper_label,
                    "upperValue": upper,
                    "lowerLabel": lower_label,
                    "lowerValue": lower,
                })));
            }
        }
        Ok(())
    }

    /// Highest-first, inclusive at every cut: a percentage exactly equal to
    /// a threshold earns that grade, not the one below.
    pub fn resolve(&self, percentage: f64) -> GradeLabel {
        if percentage >= self.a {
            GradeLabel::A
        } else if percentage >= self.b_plus {
            GradeLabel::BPlus
        } else if percentage >= self.b {
            GradeLabel::B
        } else if percentage >= self.c_plus {
            GradeLabel::CPlus
        } else if percentage >= self.c {
            GradeLabel::C
        } else if percentage >= self.d_plus {
            GradeLabel::DPlus
        } else if percentage >= self.d {
            GradeLabel::D
        } else {
            GradeLabel::F
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentDef {
    pub id: String,
    pub title: String,
    pub max_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudentAggregate {
    pub total: f64,
    pub max_total: f64,
    /// None when the section has no components (max_total == 0); the student
    /// is not computable and no grade row may be written for them.
    pub percentage: Option<f64>,
    pub missing_count: usize,
}

/// Roll one student's entries up across the section's components. A missing
/// entry counts as 0 toward the total; it is tallied separately so callers
/// can surface how many components were ungraded.
pub fn aggregate_scores(
    components: &[ComponentDef],
    entries_by_component: &HashMap<String, f64>,
) -> StudentAggregate {
    let mut total = 0.0_f64;
    let mut max_total = 0.0_f64;
    let mut missing_count = 0_usize;

    for c in components {
        max_total += c.max_score;
        match entries_by_component.get(&c.id) {
            Some(v) => total += *v,
            None => missing_count += 1,
        }
    }

    let percentage = if max_total > 0.0 {
        Some(round_off_2_decimals(100.0 * total / max_total))
    } else {
        None
    };

    StudentAggregate {
        total,
        max_total,
        percentage,
        missing_count,
    }
}

#[derive(Debug, Clone)]
pub struct EngineContext<'a> {
    pub conn: &'a Connection,
    pub section_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedGradeRow {
    pub student_id: String,
    pub student_code: String,
    pub display_name: String,
    pub total: f64,
    pub max_total: f64,
    pub percentage: f64,
    pub grade: GradeLabel,
    pub grade_points: f64,
    pub missing_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecomputeModel {
    pub section_id: String,
    pub thresholds: ThresholdSet,
    pub rows: Vec<ComputedGradeRow>,
    /// Students with at least one ungraded component. Rolled up so callers
    /// can see the missing-counts-as-zero policy in effect.
    pub incomplete_count: usize,
    pub inputs_hash: String,
    pub computed_at: String,
}

#[derive(Debug, Clone)]
struct RosterStudent {
    id: String,
    code: String,
    display_name: String,
}

pub fn section_exists(conn: &Connection, section_id: &str) -> Result<bool, EngineError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM sections WHERE id = ?", [section_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    Ok(found.is_some())
}

/// Stored thresholds for the section, or the documented defaults when none
/// have been saved yet. Absence is the fallback path, not an error.
pub fn load_thresholds(conn: &Connection, section_id: &str) -> Result<ThresholdSet, EngineError> {
    let row: Option<ThresholdSet> = conn
        .query_row(
            "SELECT a, b_plus, b, c_plus, c, d_plus, d
             FROM grade_thresholds
             WHERE section_id = ?",
            [section_id],
            |r| {
                Ok(ThresholdSet {
                    a: r.get(0)?,
                    b_plus: r.get(1)?,
                    b: r.get(2)?,
                    c_plus: r.get(3)?,
                    c: r.get(4)?,
                    d_plus: r.get(5)?,
                    d: r.get(6)?,
                })
            },
        )
        .optional()
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    Ok(row.unwrap_or_default())
}

/// Validates, then upserts the full 7-value set in one statement. A set that
/// fails validation never touches persisted state.
pub fn save_thresholds(
    conn: &Connection,
    section_id: &str,
    set: &ThresholdSet,
) -> Result<(), EngineError> {
    set.validate()?;
    conn.execute(
        "INSERT INTO grade_thresholds(section_id, a, b_plus, b, c_plus, c, d_plus, d)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(section_id) DO UPDATE SET
           a = excluded.a,
           b_plus = excluded.b_plus,
           b = excluded.b,
           c_plus = excluded.c_plus,
           c = excluded.c,
           d_plus = excluded.d_plus,
           d = excluded.d",
        (
            section_id, set.a, set.b_plus, set.b, set.c_plus, set.c, set.d_plus, set.d,
        ),
    )
    .map_err(|e| EngineError::new("db_insert_failed", e.to_string()))?;
    Ok(())
}

pub fn load_components(
    conn: &Connection,
    section_id: &str,
) -> Result<Vec<ComponentDef>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, title, max_score
             FROM score_components
             WHERE section_id = ?
             ORDER BY sort_order",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let components = stmt
        .query_map([section_id], |r| {
            Ok(ComponentDef {
                id: r.get(0)?,
                title: r.get(1)?,
                max_score: r.get(2)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    Ok(components)
}

fn load_roster(conn: &Connection, section_id: &str) -> Result<Vec<RosterStudent>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.code, s.last_name, s.first_name
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.section_id = ?
             ORDER BY s.code",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let roster = stmt
        .query_map([section_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(RosterStudent {
                id: r.get(0)?,
                code: r.get(1)?,
                display_name: format!("{}, {}", last, first),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    Ok(roster)
}

fn load_entries(
    conn: &Connection,
    section_id: &str,
) -> Result<HashMap<(String, String), f64>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT e.student_id, e.component_id, e.score
             FROM score_entries e
             JOIN score_components c ON c.id = e.component_id
             WHERE c.section_id = ?",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;
    let rows = stmt
        .query_map([section_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;

    let mut by_pair = HashMap::new();
    for (student_id, component_id, score) in rows {
        by_pair.insert((student_id, component_id), score);
    }
    Ok(by_pair)
}

/// Canonical fingerprint of everything a recompute depends on: thresholds,
/// component maxima, the enrolled roster, and score entries. Stamped onto
/// each computed row so a later read can tell fresh from stale without
/// re-running the resolver.
fn inputs_fingerprint(
    thresholds: &ThresholdSet,
    components: &[ComponentDef],
    roster_ids: &[String],
    entries: &HashMap<(String, String), f64>,
) -> String {
    let mut canon = String::new();
    let _ = write!(
        canon,
        "t:{}|{}|{}|{}|{}|{}|{}",
        thresholds.a,
        thresholds.b_plus,
        thresholds.b,
        thresholds.c_plus,
        thresholds.c,
        thresholds.d_plus,
        thresholds.d
    );

    let mut comps: Vec<(&str, f64)> = components
        .iter()
        .map(|c| (c.id.as_str(), c.max_score))
        .collect();
    comps.sort_by(|a, b| a.0.cmp(b.0));
    for (id, max) in comps {
        let _ = write!(canon, ";c:{}={}", id, max);
    }

    let mut roster: Vec<&str> = roster_ids.iter().map(String::as_str).collect();
    roster.sort_unstable();
    for id in roster {
        let _ = write!(canon, ";r:{}", id);
    }

    let mut cells: Vec<(&str, &str, f64)> = entries
        .iter()
        .map(|((s, c), v)| (s.as_str(), c.as_str(), *v))
        .collect();
    cells.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
    for (student_id, component_id, score) in cells {
        let _ = write!(canon, ";e:{}:{}={}", student_id, component_id, score);
    }

    let digest = Sha256::digest(canon.as_bytes());
    let mut hex = String::with_capacity(64);
    for byte in digest {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

/// Read the section's inputs and compute the full grade set off-storage.
/// Validation order matters: thresholds are checked before any score read so
/// an invalid configuration can never produce grades.
pub fn compute_section_grades(ctx: &EngineContext<'_>) -> Result<RecomputeModel, EngineError> {
    let conn = ctx.conn;
    let section_id = ctx.section_id;

    if !section_exists(conn, section_id)? {
        return Err(EngineError::new("not_found", "section not found"));
    }

    let thresholds = load_thresholds(conn, section_id)?;
    thresholds.validate()?;

    let components = load_components(conn, section_id)?;
    if components.is_empty() {
        return Err(EngineError::new(
            "no_score_components",
            "section has no score components; grades are not computable yet",
        ));
    }

    let roster = load_roster(conn, section_id)?;
    let entries = load_entries(conn, section_id)?;

    let mut rows: Vec<ComputedGradeRow> = Vec::with_capacity(roster.len());
    let mut incomplete_count = 0_usize;
    for student in &roster {
        let mut by_component: HashMap<String, f64> = HashMap::new();
        for c in &components {
            if let Some(v) = entries.get(&(student.id.clone(), c.id.clone())) {
                by_component.insert(c.id.clone(), *v);
            }
        }
        let agg = aggregate_scores(&components, &by_component);
        let Some(percentage) = agg.percentage else {
            continue;
        };
        if agg.missing_count > 0 {
            incomplete_count += 1;
        }
        let grade = thresholds.resolve(percentage);
        rows.push(ComputedGradeRow {
            student_id: student.id.clone(),
            student_code: student.code.clone(),
            display_name: student.display_name.clone(),
            total: agg.total,
            max_total: agg.max_total,
            percentage,
            grade,
            grade_points: grade.points(),
            missing_count: agg.missing_count as i64,
        });
    }

    let roster_ids: Vec<String> = roster.iter().map(|s| s.id.clone()).collect();
    Ok(RecomputeModel {
        section_id: section_id.to_string(),
        thresholds,
        rows,
        incomplete_count,
        inputs_hash: inputs_fingerprint(&thresholds, &components, &roster_ids, &entries),
        computed_at: Utc::now().to_rfc3339(),
    })
}

/// Full-section recompute: compute entirely off-storage, then replace the
/// section's grade rows in one transaction so readers never see a class half
/// recomputed. Rerunning with unchanged inputs rewrites identical rows.
pub fn recompute_section_grades(ctx: &EngineContext<'_>) -> Result<RecomputeModel, EngineError> {
    let model = compute_section_grades(ctx)?;

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| EngineError::new("db_tx_failed", e.to_string()))?;

    if let Err(e) = tx.execute(
        "DELETE FROM computed_grades WHERE section_id = ?",
        [ctx.section_id],
    ) {
        let _ = tx.rollback();
        return Err(EngineError::new("db_delete_failed", e.to_string()));
    }

    for row in &model.rows {
        if let Err(e) = tx.execute(
            "INSERT INTO computed_grades(
                section_id, student_id, total, max_total, percentage,
                grade, grade_points, missing_count, inputs_hash, computed_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            (
                ctx.section_id,
                &row.student_id,
                row.total,
                row.max_total,
                row.percentage,
                row.grade.as_str(),
                row.grade_points,
                row.missing_count,
                &model.inputs_hash,
                &model.computed_at,
            ),
        ) {
            let _ = tx.rollback();
            return Err(EngineError::new("db_insert_failed", e.to_string())
                .with_details(serde_json::json!({ "table": "computed_grades" })));
        }
    }

    tx.commit()
        .map_err(|e| EngineError::new("db_commit_failed", e.to_string()))?;

    Ok(model)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredGrades {
    pub section_id: String,
    pub rows: Vec<ComputedGradeRow>,
    pub inputs_hash: Option<String>,
    pub computed_at: Option<String>,
}

pub fn stored_section_grades(
    conn: &Connection,
    section_id: &str,
) -> Result<StoredGrades, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT g.student_id, s.code, s.last_name, s.first_name,
                    g.total, g.max_total, g.percentage, g.grade, g.grade_points,
                    g.missing_count, g.inputs_hash, g.computed_at
             FROM computed_grades g
             JOIN students s ON s.id = g.student_id
             WHERE g.section_id = ?
             ORDER BY s.code",
        )
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;

    let mut inputs_hash: Option<String> = None;
    let mut computed_at: Option<String> = None;
    let raw = stmt
        .query_map([section_id], |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            let grade_text: String = r.get(7)?;
            Ok((
                ComputedGradeRow {
                    student_id: r.get(0)?,
                    student_code: r.get(1)?,
                    display_name: format!("{}, {}", last, first),
                    total: r.get(4)?,
                    max_total: r.get(5)?,
                    percentage: r.get(6)?,
                    grade: grade_label_from_text(&grade_text),
                    grade_points: r.get(8)?,
                    missing_count: r.get(9)?,
                },
                r.get::<_, String>(10)?,
                r.get::<_, String>(11)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| EngineError::new("db_query_failed", e.to_string()))?;

    let mut rows = Vec::with_capacity(raw.len());
    for (row, hash, at) in raw {
        inputs_hash.get_or_insert(hash);
        computed_at.get_or_insert(at);
        rows.push(row);
    }

    Ok(StoredGrades {
        section_id: section_id.to_string(),
        rows,
        inputs_hash,
        computed_at,
    })
}

fn grade_label_from_text(text: &str) -> GradeLabel {
    match text {
        "A" => GradeLabel::A,
        "B+" => GradeLabel::BPlus,
        "B" => GradeLabel::B,
        "C+" => GradeLabel::CPlus,
        "C" => GradeLabel::C,
        "D+" => GradeLabel::DPlus,
        "D" => GradeLabel::D,
        _ => GradeLabel::F,
    }
}

/// Staleness of the stored grade set relative to the current inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum GradeSetStatus {
    /// Stored rows were derived from exactly the current inputs.
    Fresh,
    /// Inputs changed since the last recompute.
    Stale,
    /// No grade rows stored for the section yet.
    Empty,
    /// Section has no score components; nothing to compare against.
    NotComputable,
}

pub fn section_grade_status(ctx: &EngineContext<'_>) -> Result<GradeSetStatus, EngineError> {
    let conn = ctx.conn;
    let section_id = ctx.section_id;

    if !section_exists(conn, section_id)? {
        return Err(EngineError::new("not_found", "section not found"));
    }

    let components = load_components(conn, section_id)?;
    if components.is_empty() {
        return Ok(GradeSetStatus::NotComputable);
    }

    let stored = stored_section_grades(conn, section_id)?;
    let Some(stored_hash) = stored.inputs_hash else {
        return Ok(GradeSetStatus::Empty);
    };

    let thresholds = load_thresholds(conn, section_id)?;
    let roster_ids: Vec<String> = load_roster(conn, section_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let entries = load_entries(conn, section_id)?;
    let current = inputs_fingerprint(&thresholds, &components, &roster_ids, &entries);

    if current == stored_hash {
        Ok(GradeSetStatus::Fresh)
    } else {
        Ok(GradeSetStatus::Stale)
    }
}
