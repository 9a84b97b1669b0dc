use crate::backup;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::core::open_workspace;
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn backup_export(state: &AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let conn = db_conn(state)?;
    let Some(workspace_path) = state.workspace.clone() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let out_path = PathBuf::from(required_str(params, "outPath")?);

    // Flush any WAL pages into the main file before it is copied.
    let _ = conn.execute_batch("PRAGMA wal_checkpoint(FULL)");

    let summary = backup::export_workspace_bundle(&workspace_path, &out_path).map_err(|e| {
        HandlerErr::new("io_failed", format!("{e:#}"))
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    tracing::info!(out = %out_path.to_string_lossy(), sha256 = %summary.db_sha256, "workspace exported");

    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "dbSha256": summary.db_sha256,
        "dbBytes": summary.db_bytes
    }))
}

fn backup_import(state: &mut AppState, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let in_path = PathBuf::from(required_str(params, "inPath")?);
    let workspace_path = match params.get("workspacePath").and_then(|v| v.as_str()) {
        Some(p) if !p.trim().is_empty() => PathBuf::from(p.trim()),
        _ => state
            .workspace
            .clone()
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))?,
    };
    if !in_path.is_file() {
        return Err(HandlerErr::not_found("backup file")
            .with_details(json!({ "path": in_path.to_string_lossy() })));
    }

    // Release the handle before the file underneath it is replaced.
    state.db = None;
    let import = backup::import_workspace_bundle(&in_path, &workspace_path);
    let reopened = open_workspace(state, &workspace_path);
    let import = import.map_err(|e| {
        HandlerErr::new("import_failed", format!("{e:#}"))
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    reopened.map_err(|e| HandlerErr::new("db_open_failed", format!("{e:#}")))?;
    tracing::info!(
        workspace = %workspace_path.to_string_lossy(),
        format = %import.bundle_format_detected,
        "workspace restored"
    );

    Ok(json!({
        "ok": true,
        "workspacePath": workspace_path.to_string_lossy(),
        "bundleFormatDetected": import.bundle_format_detected,
        "dbSha256": import.db_sha256
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(respond(&req.id, backup_export(state, &req.params))),
        "backup.import" => Some(respond(&req.id, backup_import(state, &req.params))),
        _ => None,
    }
}
