use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

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
    value
}

fn approx(v: &serde_json::Value, expected: f64) {
    let got = v.as_f64().unwrap_or_else(|| panic!("expected number, got {}", v));
    assert!(
        (got - expected).abs() < 1e-6,
        "expected {}, got {}",
        expected,
        got
    );
}

fn three_categories() -> serde_json::Value {
    json!([
        { "weight": 30, "mode": "known", "grade": "92" },
        { "weight": 30, "mode": "known", "grade": 85 },
        { "weight": 40, "mode": "analyze" }
    ])
}

#[test]
fn compute_works_without_a_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "projection.compute",
        json!({ "categories": three_categories() }),
    );
    assert_eq!(resp["ok"], true, "{}", resp);
    let p = &resp["result"]["projection"];
    approx(&p["currentGrade"], 88.5);
    approx(&p["finalWorstCase"], 73.1);
    approx(&p["finalEstimate"], 88.5);
    approx(&p["minForA"], 99.75);
    assert_eq!(p["bands"]["finalEstimate"], "below");

    // Worst-case strategy makes the estimate match the worst case.
    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "projection.compute",
        json!({
            "categories": three_categories(),
            "settings": { "fillStrategy": "worst_case", "worstCaseFill": 70 }
        }),
    );
    let p = &resp["result"]["projection"];
    approx(&p["finalWorstCase"], 53.1 + 28.0);
    approx(&p["finalEstimate"], 53.1 + 28.0);
    approx(&resp["result"]["settings"]["worstCaseFill"], 70.0);

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn compute_handles_blank_grades_and_assignments() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "projection.compute",
        json!({
            "categories": [
                { "weight": 50, "mode": "known", "grade": "" },
                { "weight": 50, "mode": "known", "grade": 80 }
            ]
        }),
    );
    let p = &resp["result"]["projection"];
    approx(&p["currentGrade"], 80.0);
    assert_eq!(p["hasAnalyze"], false);
    assert!(p["minForA"].is_null());
    assert_eq!(p["outlooks"]["minForA"]["kind"], "noAnalyze");

    let resp = request(
        &mut stdin,
        &mut reader,
        "2",
        "projection.compute",
        json!({
            "categories": [
                {
                    "weight": 60,
                    "mode": "known",
                    "grade": 10,
                    "assignments": [
                        { "earned": 45, "total": 50 },
                        { "earned": 18, "total": 20 },
                        { "earned": 5, "total": 0 }
                    ]
                },
                { "weight": 40, "mode": "analyze" }
            ],
            "thresholds": [30, "90"]
        }),
    );
    let p = &resp["result"]["projection"];
    approx(&p["currentGrade"], 90.0);
    // 0.6 * 90 = 54 secured; 40% left.
    approx(&p["thresholds"][0]["minRequired"], (30.0 - 54.0) / 0.4);
    assert_eq!(p["thresholds"][0]["outlook"]["kind"], "secured");
    approx(&p["thresholds"][1]["minRequired"], 90.0);
    assert_eq!(p["thresholds"][1]["outlook"]["kind"], "needed");
    assert_eq!(p["thresholds"][1]["outlook"]["hard"], true);

    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "projection.compute",
        json!({ "categories": [] }),
    );
    let p = &resp["result"]["projection"];
    for key in ["currentGrade", "finalWorstCase", "finalEstimate", "minForA", "minForAMinus"] {
        assert!(p[key].is_null(), "{} should be null", key);
    }

    drop(stdin);
    let _ = child.wait();
}

#[test]
fn compute_rejects_malformed_params() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let cases = [
        json!({}),
        json!({ "categories": [{ "weight": 100, "mode": "guess" }] }),
        json!({ "categories": [{ "weight": 100 }] }),
        json!({ "categories": [], "settings": { "aThreshold": -1 } }),
        json!({ "categories": [], "thresholds": ["x"] }),
    ];
    for (i, params) in cases.into_iter().enumerate() {
        let id = format!("bad-{}", i);
        let resp = request(&mut stdin, &mut reader, &id, "projection.compute", params);
        assert_eq!(resp["ok"], false);
        assert_eq!(resp["error"]["code"], "bad_params", "case {}", i);
    }

    drop(stdin);
    let _ = child.wait();
}
