use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_gradeestd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn gradeestd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    if value.get("ok").and_then(|v| v.as_bool()) == Some(false) {
        let code = value
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");
        assert_ne!(
            code, "not_implemented",
            "unexpected unknown method for {}",
            method
        );
    }
    value
}

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("gradeest-router-smoke");
    let bundle_out = workspace.join("smoke-backup.gradeest.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request(&mut stdin, &mut reader, "1", "health", json!({}));
    assert_eq!(health["ok"], true);
    assert!(health["result"]["workspacePath"].is_null());

    let no_ws = request(
        &mut stdin,
        &mut reader,
        "2",
        "classes.get",
        json!({ "classId": "missing" }),
    );
    assert_eq!(no_ws["error"]["code"], "no_workspace");

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request(
        &mut stdin,
        &mut reader,
        "4",
        "classes.create",
        json!({
            "name": "Smoke",
            "categories": [{ "name": "All", "weight": 100 }]
        }),
    );
    let class_id = created["result"]["classId"]
        .as_str()
        .expect("classId")
        .to_string();
    let category_id = created["result"]["class"]["categories"][0]["id"]
        .as_str()
        .expect("category id")
        .to_string();

    let calls = [
        ("classes.list", json!({})),
        ("classes.get", json!({ "classId": class_id })),
        (
            "classes.update",
            json!({
                "classId": class_id,
                "name": "Smoke 2",
                "categories": [{ "id": category_id, "name": "All", "weight": 100 }]
            }),
        ),
        ("settings.get", json!({})),
        ("settings.update", json!({ "patch": { "worstCaseFill": 55 } })),
        ("analyzer.open", json!({ "classId": class_id })),
        (
            "analyzer.entryUpdate",
            json!({ "classId": class_id, "categoryId": category_id, "mode": "analyze" }),
        ),
        ("projection.forClass", json!({ "classId": class_id })),
        (
            "projection.compute",
            json!({ "categories": [{ "weight": 100, "mode": "analyze" }] }),
        ),
        ("sandbox.open", json!({ "classId": class_id })),
        ("sandbox.evaluate", json!({ "classId": class_id, "fillAnalyze": 95 })),
        ("document.export", json!({})),
        (
            "backup.exportWorkspaceBundle",
            json!({ "outPath": bundle_out.to_string_lossy() }),
        ),
        ("settings.reset", json!({})),
    ];
    for (i, (method, params)) in calls.into_iter().enumerate() {
        let id = format!("call-{}", i);
        let resp = request(&mut stdin, &mut reader, &id, method, params);
        assert_eq!(resp["ok"], true, "{} failed: {}", method, resp["error"]);
    }

    let added = request(
        &mut stdin,
        &mut reader,
        "5",
        "analyzer.assignmentAdd",
        json!({ "classId": class_id, "categoryId": category_id, "earned": 1, "total": 2 }),
    );
    let assignment_id = added["result"]["assignmentId"]
        .as_str()
        .expect("assignmentId")
        .to_string();
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "analyzer.assignmentUpdate",
        json!({ "assignmentId": assignment_id, "name": "Quiz" }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "analyzer.assignmentDelete",
        json!({ "assignmentId": assignment_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "8",
        "backup.importWorkspaceBundle",
        json!({ "inPath": bundle_out.to_string_lossy() }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "9",
        "document.import",
        json!({ "document": { "classes": [] } }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "10",
        "classes.delete",
        json!({ "classId": class_id }),
    );

    let unknown = request_unknown(&mut stdin, &mut reader);
    assert_eq!(unknown["error"]["code"], "not_implemented");

    writeln!(stdin, "{{not json").expect("write garbage");
    stdin.flush().expect("flush garbage");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read bad_json response");
    let bad: serde_json::Value = serde_json::from_str(line.trim()).expect("parse bad_json");
    assert_eq!(bad["error"]["code"], "bad_json");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

fn request_unknown(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> serde_json::Value {
    writeln!(
        stdin,
        "{}",
        json!({ "id": "u", "method": "grades.explode", "params": {} })
    )
    .expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}
