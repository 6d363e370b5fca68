use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{number_or_none, optional_str, required_str};
use crate::ipc::types::{AppState, Request};
use crate::store::{self, ClassRecord};
use crate::validate::{self, CategoryDraft};
use serde_json::json;
use std::collections::HashSet;
use uuid::Uuid;

pub fn class_json(class: &ClassRecord) -> serde_json::Value {
    let mut v = serde_json::to_value(class).unwrap_or_else(|_| json!({}));
    v["weightTotal"] = json!(class.weight_total());
    v
}

fn parse_drafts(params: &serde_json::Value) -> Result<Vec<CategoryDraft>, HandlerErr> {
    let Some(items) = params.get("categories").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("categories must be an array"));
    };
    let mut seen_ids = HashSet::new();
    items
        .iter()
        .map(|item| {
            if !item.is_object() {
                return Err(HandlerErr::bad_params("each category must be an object"));
            }
            let id = optional_str(item, "id").filter(|s| !s.is_empty());
            if let Some(id) = id.as_deref() {
                // Each stored category can back at most one row.
                if !seen_ids.insert(id.to_string()) {
                    return Err(HandlerErr::bad_params("duplicate category id")
                        .with_details(json!({ "categoryId": id })));
                }
            }
            Ok(CategoryDraft {
                id,
                name: optional_str(item, "name").unwrap_or_default(),
                weight: number_or_none(item.get("weight")),
            })
        })
        .collect()
}

fn check_class(name: &str, drafts: &[CategoryDraft]) -> Result<(), HandlerErr> {
    let issues = validate::validate_class(name, drafts);
    if issues.is_empty() {
        return Ok(());
    }
    Err(HandlerErr::new("validation_failed", "class is not valid")
        .with_details(json!({ "issues": validate::issues_json(&issues) })))
}

fn load_class_or_404(
    conn: &rusqlite::Connection,
    class_id: &str,
) -> Result<ClassRecord, HandlerErr> {
    store::load_class(conn, class_id)
        .map_err(HandlerErr::db("db_query_failed"))?
        .ok_or_else(|| HandlerErr::not_found("class not found"))
}

fn handle_classes_list(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(json!({ "classes": [] }));
    };
    let classes = store::list_classes(conn).map_err(HandlerErr::db("db_query_failed"))?;
    let rows: Vec<serde_json::Value> = classes.iter().map(class_json).collect();
    Ok(json!({ "classes": rows }))
}

fn handle_classes_get(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let class = load_class_or_404(conn, &class_id)?;
    Ok(json!({ "class": class_json(&class) }))
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let name = optional_str(&req.params, "name").unwrap_or_default();
    let drafts = parse_drafts(&req.params)?;
    check_class(&name, &drafts)?;

    let class_id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "INSERT INTO classes(id, name, created_at, updated_at) VALUES(?, ?, ?, ?)",
        (&class_id, &name, &now, &now),
    )
    .map_err(|e| {
        HandlerErr::new("db_insert_failed", e.to_string()).with_details(json!({ "table": "classes" }))
    })?;
    for (i, d) in drafts.iter().enumerate() {
        tx.execute(
            "INSERT INTO categories(id, class_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &class_id,
                d.name.trim(),
                d.weight.unwrap_or(0.0),
                i as i64,
            ),
        )
        .map_err(|e| {
            HandlerErr::new("db_insert_failed", e.to_string())
                .with_details(json!({ "table": "categories" }))
        })?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(%class_id, categories = drafts.len(), "class created");
    let class = load_class_or_404(conn, &class_id)?;
    Ok(json!({ "classId": class_id, "class": class_json(&class) }))
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    let existing = load_class_or_404(conn, &class_id)?;
    let name = optional_str(&req.params, "name").unwrap_or_default();
    let drafts = parse_drafts(&req.params)?;
    check_class(&name, &drafts)?;

    let existing_ids: HashSet<&str> = existing.categories.iter().map(|c| c.id.as_str()).collect();
    let kept_ids: HashSet<&str> = drafts
        .iter()
        .filter_map(|d| d.id.as_deref())
        .filter(|id| existing_ids.contains(id))
        .collect();

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE classes SET name = ?, updated_at = ? WHERE id = ?",
        (&name, db::now_rfc3339(), &class_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    for c in &existing.categories {
        if !kept_ids.contains(c.id.as_str()) {
            db::delete_category_cascade(&tx, &c.id).map_err(HandlerErr::db("db_delete_failed"))?;
        }
    }

    for (i, d) in drafts.iter().enumerate() {
        let weight = d.weight.unwrap_or(0.0);
        match d.id.as_deref().filter(|id| kept_ids.contains(id)) {
            Some(id) => {
                tx.execute(
                    "UPDATE categories SET name = ?, weight = ?, sort_order = ? WHERE id = ?",
                    (d.name.trim(), weight, i as i64, id),
                )
                .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            }
            None => {
                tx.execute(
                    "INSERT INTO categories(id, class_id, name, weight, sort_order) VALUES(?, ?, ?, ?, ?)",
                    (
                        Uuid::new_v4().to_string(),
                        &class_id,
                        d.name.trim(),
                        weight,
                        i as i64,
                    ),
                )
                .map_err(|e| {
                    HandlerErr::new("db_insert_failed", e.to_string())
                        .with_details(json!({ "table": "categories" }))
                })?;
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(%class_id, "class updated");
    let class = load_class_or_404(conn, &class_id)?;
    Ok(json!({ "class": class_json(&class) }))
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let class_id = required_str(&req.params, "classId")?;
    load_class_or_404(conn, &class_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    db::delete_class_cascade(&tx, &class_id).map_err(HandlerErr::db("db_delete_failed"))?;
    let selected = store::selected_class_id(&tx).map_err(HandlerErr::db("db_query_failed"))?;
    if selected.as_deref() == Some(class_id.as_str()) {
        store::set_selected_class_id(&tx, None).map_err(HandlerErr::db("db_update_failed"))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    tracing::info!(%class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => handle_classes_list(state, req),
        "classes.get" => handle_classes_get(state, req),
        "classes.create" => handle_classes_create(state, req),
        "classes.update" => handle_classes_update(state, req),
        "classes.delete" => handle_classes_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
