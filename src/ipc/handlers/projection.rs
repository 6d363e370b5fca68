use crate::calc::{
    self, AssignmentInput, CategoryInput, CategoryMode, GradeSettings, Projection,
};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{number_or_none, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, AnalyzerRow};
use serde_json::json;

fn parse_thresholds(params: &serde_json::Value) -> Result<Vec<f64>, HandlerErr> {
    let Some(raw) = params.get("thresholds") else {
        return Ok(Vec::new());
    };
    if raw.is_null() {
        return Ok(Vec::new());
    }
    let Some(items) = raw.as_array() else {
        return Err(HandlerErr::bad_params("thresholds must be an array of numbers"));
    };
    items
        .iter()
        .map(|v| {
            number_or_none(Some(v))
                .ok_or_else(|| HandlerErr::bad_params("thresholds must be an array of numbers"))
        })
        .collect()
}

/// Projection plus the labels the UI shows next to each number.
pub fn projection_json(
    projection: &Projection,
    settings: &GradeSettings,
    extra_thresholds: &[f64],
) -> serde_json::Value {
    let mut v = serde_json::to_value(projection).unwrap_or_else(|_| json!({}));
    v["bands"] = json!({
        "currentGrade": calc::grade_band(projection.current_grade, settings),
        "finalWorstCase": calc::grade_band(projection.final_worst_case, settings),
        "finalEstimate": calc::grade_band(projection.final_estimate, settings),
    });
    v["outlooks"] = json!({
        "minForA": calc::min_outlook(projection.min_for_a),
        "minForAMinus": calc::min_outlook(projection.min_for_a_minus),
    });
    let thresholds: Vec<serde_json::Value> = extra_thresholds
        .iter()
        .map(|t| {
            let min = projection.min_for_threshold(*t);
            json!({
                "threshold": t,
                "minRequired": min,
                "outlook": calc::min_outlook(min),
            })
        })
        .collect();
    v["thresholds"] = json!(thresholds);
    v
}

/// Full analyzer view of a class: rows, settings and projection.
pub fn class_view(
    conn: &rusqlite::Connection,
    class_id: &str,
    extra_thresholds: &[f64],
) -> Result<serde_json::Value, HandlerErr> {
    let class = store::load_class(conn, class_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let entries = store::load_entries(conn, class_id).map_err(HandlerErr::db("db_query_failed"))?;
    let settings = store::load_settings(conn).map_err(HandlerErr::db("db_query_failed"))?;

    let rows = store::analyzer_rows(&class, &entries);
    let inputs: Vec<CategoryInput> = rows.iter().map(AnalyzerRow::as_input).collect();
    let projection = calc::compute_projection(&inputs, &settings);

    Ok(json!({
        "class": { "id": class.id, "name": class.name, "weightTotal": class.weight_total() },
        "rows": rows,
        "settings": store::settings_json(&settings),
        "projection": projection_json(&projection, &settings, extra_thresholds),
    }))
}

fn parse_category_input(item: &serde_json::Value, index: usize) -> Result<CategoryInput, HandlerErr> {
    let mode_raw = item.get("mode").and_then(|v| v.as_str()).unwrap_or("");
    let Some(mode) = CategoryMode::parse(mode_raw) else {
        return Err(HandlerErr::bad_params(format!(
            "categories[{}].mode must be known, analyze or estimated",
            index
        )));
    };
    let assignments: Vec<AssignmentInput> = item
        .get("assignments")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .map(|a| AssignmentInput {
                    earned: number_or_none(a.get("earned")),
                    total: number_or_none(a.get("total")),
                })
                .collect()
        })
        .unwrap_or_default();
    Ok(CategoryInput {
        weight: number_or_none(item.get("weight")).unwrap_or(0.0),
        mode,
        grade: calc::effective_grade(number_or_none(item.get("grade")), &assignments),
    })
}

fn handle_projection_compute(
    _state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(items) = req.params.get("categories").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("categories must be an array"));
    };
    let inputs = items
        .iter()
        .enumerate()
        .map(|(i, item)| parse_category_input(item, i))
        .collect::<Result<Vec<_>, _>>()?;

    let mut settings = GradeSettings::default();
    if let Some(patch) = req.params.get("settings").filter(|v| !v.is_null()) {
        let Some(patch) = patch.as_object() else {
            return Err(HandlerErr::bad_params("settings must be an object"));
        };
        store::merge_settings_patch(&mut settings, patch).map_err(HandlerErr::bad_params)?;
    }
    let thresholds = parse_thresholds(&req.params)?;

    let projection = calc::compute_projection(&inputs, &settings);
    Ok(json!({
        "settings": store::settings_json(&settings),
        "projection": projection_json(&projection, &settings, &thresholds),
    }))
}

fn handle_projection_for_class(
    state: &mut AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let thresholds = parse_thresholds(&req.params)?;
    class_view(conn, &class_id, &thresholds)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "projection.compute" => handle_projection_compute(state, req),
        "projection.forClass" => handle_projection_for_class(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
