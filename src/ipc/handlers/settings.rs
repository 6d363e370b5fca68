use crate::calc::GradeSettings;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::json;

fn handle_settings_get(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    // Without a workspace the defaults are still useful to the UI.
    let settings = match state.db.as_ref() {
        Some(conn) => store::load_settings(conn).map_err(HandlerErr::db("db_query_failed"))?,
        None => GradeSettings::default(),
    };
    Ok(json!({ "settings": store::settings_json(&settings) }))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut current = store::load_settings(conn).map_err(HandlerErr::db("db_query_failed"))?;
    store::merge_settings_patch(&mut current, patch).map_err(HandlerErr::bad_params)?;
    store::save_settings(conn, &current).map_err(HandlerErr::db("db_update_failed"))?;
    tracing::debug!(?current, "settings updated");
    Ok(json!({ "settings": store::settings_json(&current) }))
}

fn handle_settings_reset(state: &mut AppState, _req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let conn = state.conn()?;
    let defaults = GradeSettings::default();
    store::save_settings(conn, &defaults).map_err(HandlerErr::db("db_update_failed"))?;
    Ok(json!({ "settings": store::settings_json(&defaults) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "settings.get" => handle_settings_get(state, req),
        "settings.update" => handle_settings_update(state, req),
        "settings.reset" => handle_settings_reset(state, req),
        _ => return None,
    };
    Some(respond(&req.id, result))
}
