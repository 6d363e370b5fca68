use crate::calc::{self, CategoryInput, CategoryMode};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{number_or_none, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, AnalyzerRow};
use serde_json::json;

struct SandboxClass {
    class_id: String,
    class_name: String,
    rows: Vec<AnalyzerRow>,
    settings: calc::GradeSettings,
}

fn load_sandbox_class(
    conn: &rusqlite::Connection,
    class_id: &str,
) -> Result<SandboxClass, HandlerErr> {
    let class = store::load_class(conn, class_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    let entries = store::load_entries(conn, class_id).map_err(HandlerErr::db("db_query_failed"))?;
    let settings = store::load_settings(conn).map_err(HandlerErr::db("db_query_failed"))?;
    Ok(SandboxClass {
        class_id: class.id.clone(),
        class_name: class.name.clone(),
        rows: store::analyzer_rows(&class, &entries),
        settings,
    })
}

fn handle_sandbox_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = match optional_str(&req.params, "classId").filter(|s| !s.is_empty()) {
        Some(id) => Some(id),
        None => store::selected_class_id(conn).map_err(HandlerErr::db("db_query_failed"))?,
    };
    let Some(class_id) = class_id else {
        return Ok(json!({ "class": null }));
    };

    let sc = load_sandbox_class(conn, &class_id)?;
    let inputs: Vec<CategoryInput> = sc.rows.iter().map(AnalyzerRow::as_input).collect();
    let seeds: Vec<Option<f64>> = sc
        .rows
        .iter()
        .map(|r| calc::sandbox_seed(r.mode, r.effective_grade, &sc.settings))
        .collect();
    let avg = calc::avg_known_estimated(&inputs, &sc.settings);
    let outcome = calc::sandbox_total(&inputs, &seeds, &sc.settings);
    let has_flexible = sc
        .rows
        .iter()
        .any(|r| matches!(r.mode, CategoryMode::Analyze | CategoryMode::Estimated));

    let rows: Vec<serde_json::Value> = sc
        .rows
        .iter()
        .zip(&seeds)
        .map(|(r, seed)| {
            json!({
                "categoryId": r.category_id,
                "name": r.name,
                "weight": r.weight,
                "mode": r.mode,
                "effectiveGrade": r.effective_grade,
                "seed": seed,
            })
        })
        .collect();

    Ok(json!({
        "class": { "id": sc.class_id, "name": sc.class_name },
        "rows": rows,
        "hasFlexible": has_flexible,
        "avgKnownEstimated": avg,
        "presets": {
            "worstCase": sc.settings.worst_case_fill,
            "avgKnownEstimated": avg,
            "aThreshold": sc.settings.a_threshold,
        },
        "outcome": outcome,
    }))
}

fn handle_sandbox_evaluate(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let grades = match req.params.get("grades") {
        None => None,
        Some(v) if v.is_null() => None,
        Some(v) => Some(
            v.as_object()
                .ok_or_else(|| HandlerErr::bad_params("grades must be an object"))?,
        ),
    };
    let fill_analyze = number_or_none(req.params.get("fillAnalyze"));

    let sc = load_sandbox_class(conn, &class_id)?;
    let inputs: Vec<CategoryInput> = sc.rows.iter().map(AnalyzerRow::as_input).collect();
    let what_if: Vec<Option<f64>> = sc
        .rows
        .iter()
        .map(|r| match (r.mode, fill_analyze) {
            (CategoryMode::Analyze, Some(fill)) => Some(fill),
            _ => grades.and_then(|g| number_or_none(g.get(&r.category_id))),
        })
        .collect();

    let outcome = calc::sandbox_total(&inputs, &what_if, &sc.settings);
    Ok(json!({
        "classId": sc.class_id,
        "grades": sc
            .rows
            .iter()
            .zip(&what_if)
            .map(|(r, v)| (r.category_id.clone(), json!(v)))
            .collect::<serde_json::Map<_, _>>(),
        "outcome": outcome,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "sandbox.open" => handle_sandbox_open(state, req),
        "sandbox.evaluate" => handle_sandbox_evaluate(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
