use crate::calc::CategoryMode;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::projection::class_view;
use crate::ipc::helpers::{number_or_none, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ClassRecord};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn class_with_category(
    conn: &Connection,
    class_id: &str,
    category_id: &str,
) -> Result<ClassRecord, HandlerErr> {
    let class = store::load_class(conn, class_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;
    if !class.categories.iter().any(|c| c.id == category_id) {
        return Err(HandlerErr::not_found("category not found in class"));
    }
    Ok(class)
}

fn handle_analyzer_open(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let class = store::load_class(conn, &class_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))?;

    let seeded = store::seed_entries(conn, &class).map_err(HandlerErr::db("db_insert_failed"))?;
    if seeded > 0 {
        tracing::debug!(%class_id, seeded, "seeded blank grade entries");
    }
    store::set_selected_class_id(conn, Some(class_id.as_str())).map_err(HandlerErr::db("db_update_failed"))?;
    class_view(conn, &class_id, &[])
}

fn handle_entry_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let category_id = required_str(&req.params, "categoryId")?;
    class_with_category(conn, &class_id, &category_id)?;

    let mut entries = store::load_entries(conn, &class_id).map_err(HandlerErr::db("db_query_failed"))?;
    let current = entries.remove(&category_id).unwrap_or_default();

    let mode = match req.params.get("mode") {
        None => current.mode,
        Some(v) => v
            .as_str()
            .and_then(CategoryMode::parse)
            .ok_or_else(|| HandlerErr::bad_params("mode must be known, analyze or estimated"))?,
    };
    // An explicit blank/null grade clears it; an absent key leaves it alone.
    let grade = if req.params.get("grade").is_some() {
        number_or_none(req.params.get("grade"))
    } else {
        current.grade
    };

    store::upsert_entry(conn, &class_id, &category_id, mode, grade)
        .map_err(HandlerErr::db("db_update_failed"))?;
    class_view(conn, &class_id, &[])
}

fn handle_assignment_add(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let category_id = required_str(&req.params, "categoryId")?;
    class_with_category(conn, &class_id, &category_id)?;

    let mut entries = store::load_entries(conn, &class_id).map_err(HandlerErr::db("db_query_failed"))?;
    let current = entries.remove(&category_id).unwrap_or_default();
    let sort_order = current
        .assignments
        .iter()
        .map(|a| a.sort_order + 1)
        .max()
        .unwrap_or(0);

    let assignment_id = Uuid::new_v4().to_string();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO assignments(id, class_id, category_id, name, earned, total, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &assignment_id,
            &class_id,
            &category_id,
            optional_str(&req.params, "name").unwrap_or_default(),
            number_or_none(req.params.get("earned")),
            number_or_none(req.params.get("total")),
            sort_order,
        ),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "assignments" }))
    })?;

    store::sync_entry_grade(&tx, &class_id, &category_id, current.grade)
        .map_err(HandlerErr::db("db_update_failed"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    let mut view = class_view(conn, &class_id, &[])?;
    view["assignmentId"] = json!(assignment_id);
    Ok(view)
}

fn handle_assignment_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let (class_id, mut assignment) = store::load_assignment(conn, &assignment_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("assignment not found"))?;

    if let Some(name) = optional_str(&req.params, "name") {
        assignment.name = name;
    }
    if req.params.get("earned").is_some() {
        assignment.earned = number_or_none(req.params.get("earned"));
    }
    if req.params.get("total").is_some() {
        assignment.total = number_or_none(req.params.get("total"));
    }

    let mut entries = store::load_entries(conn, &class_id).map_err(HandlerErr::db("db_query_failed"))?;
    let manual_grade = entries
        .remove(&assignment.category_id)
        .and_then(|e| e.grade);

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE assignments SET name = ?, earned = ?, total = ? WHERE id = ?",
        (
            &assignment.name,
            assignment.earned,
            assignment.total,
            &assignment_id,
        ),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    store::sync_entry_grade(&tx, &class_id, &assignment.category_id, manual_grade)
        .map_err(HandlerErr::db("db_update_failed"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    let mut view = class_view(conn, &class_id, &[])?;
    view["assignmentId"] = json!(assignment_id);
    Ok(view)
}

fn handle_assignment_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let assignment_id = required_str(&req.params, "assignmentId")?;
    let (class_id, assignment) = store::load_assignment(conn, &assignment_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("assignment not found"))?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM assignments WHERE id = ?", [&assignment_id])
        .map_err(|e| HandlerErr::new("db_delete_failed", e.to_string()))?;
    // With no qualifying assignments left the manual grade is cleared.
    store::sync_entry_grade(&tx, &class_id, &assignment.category_id, None)
        .map_err(HandlerErr::db("db_update_failed"))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;
    class_view(conn, &class_id, &[])
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "analyzer.open" => handle_analyzer_open(state, req),
        "analyzer.entryUpdate" => handle_entry_update(state, req),
        "analyzer.assignmentAdd" => handle_assignment_add(state, req),
        "analyzer.assignmentUpdate" => handle_assignment_update(state, req),
        "analyzer.assignmentDelete" => handle_assignment_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
