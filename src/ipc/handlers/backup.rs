use crate::backup;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::store::{self, WorkspaceDocument};
use crate::validate::{self, CategoryDraft};
use serde_json::json;
use std::path::PathBuf;

fn workspace_path(state: &AppState, req: &Request) -> Result<PathBuf, HandlerErr> {
    req.params
        .get("workspacePath")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
        .or_else(|| state.workspace.clone())
        .ok_or_else(HandlerErr::no_workspace)
}

fn handle_export_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let out_path = required_str(&req.params, "outPath")?;
    let workspace_path = workspace_path(state, req)?;

    if let Some(conn) = state.db.as_ref() {
        let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");
    }

    let export = backup::export_workspace_bundle(&workspace_path, &PathBuf::from(&out_path))
        .map_err(|e| {
            HandlerErr::new("io_failed", e.to_string()).with_details(json!({ "path": out_path }))
        })?;

    Ok(json!({
        "ok": true,
        "path": out_path,
        "bundleFormat": export.bundle_format,
        "entryCount": export.entry_count,
        "dbSha256": export.db_sha256
    }))
}

fn handle_import_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let in_path = required_str(&req.params, "inPath")?;
    let workspace_path = workspace_path(state, req)?;

    let src = PathBuf::from(&in_path);
    if !src.is_file() {
        return Err(HandlerErr::not_found("bundle file not found")
            .with_details(json!({ "path": in_path })));
    }

    // Drop open handle before replacing file.
    let had_db = state.db.take().is_some();

    let import = match backup::import_workspace_bundle(&src, &workspace_path) {
        Ok(v) => v,
        Err(e) => {
            // Nothing was replaced; keep the current workspace usable.
            if had_db {
                if let Some(current) = state.workspace.clone() {
                    let conn = db::open_db(&current).map_err(HandlerErr::db("db_open_failed"))?;
                    state.db = Some(conn);
                }
            }
            tracing::warn!(bundle = %in_path, error = %e, "workspace bundle import failed");
            return Err(HandlerErr::new("io_failed", e.to_string())
                .with_details(json!({ "path": in_path })));
        }
    };

    let conn = db::open_db(&workspace_path).map_err(HandlerErr::db("db_open_failed"))?;
    state.workspace = Some(workspace_path.clone());
    state.db = Some(conn);
    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected
    }))
}

fn handle_document_export(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let doc = store::export_document(conn).map_err(HandlerErr::db("db_query_failed"))?;
    let value = serde_json::to_value(&doc)
        .map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    Ok(json!({ "document": value }))
}

fn handle_document_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let Some(raw) = req.params.get("document") else {
        return Err(HandlerErr::bad_params("missing document"));
    };
    let doc: WorkspaceDocument = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("document is not valid: {}", e)))?;
    for class in &doc.classes {
        let drafts: Vec<CategoryDraft> = class
            .categories
            .iter()
            .map(|c| CategoryDraft {
                id: Some(c.id.clone()),
                name: c.name.clone(),
                weight: Some(c.weight),
            })
            .collect();
        let issues = validate::validate_class(&class.name, &drafts);
        if !issues.is_empty() {
            return Err(HandlerErr::new("validation_failed", "document contains an invalid class")
                .with_details(json!({
                    "classId": class.id,
                    "issues": validate::issues_json(&issues),
                })));
        }
    }
    let counts = store::import_document(conn, &doc).map_err(HandlerErr::db("db_insert_failed"))?;
    tracing::info!(?counts, "workspace document imported");
    Ok(json!({ "imported": counts }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "backup.exportWorkspaceBundle" => handle_export_bundle(state, req),
        "backup.importWorkspaceBundle" => handle_import_bundle(state, req),
        "document.export" => handle_document_export(state, req),
        "document.import" => handle_document_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
