//! `flowscore score` output contract: one JSON line on stdout, non-zero exit on `{"error": ...}`.

use flowscore::{
    config::{DetectorParams, TrainingConfig},
    features::FeatureSchema,
    pipeline::TrainingPipeline,
    storage::WindowRecord,
};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};

fn windows(n: usize) -> Vec<WindowRecord> {
    (0..n)
        .map(|i| WindowRecord {
            ip: format!("10.9.0.{}", i % 250),
            window_start: i as f64 * 60.0,
            dst_port: [443, 80, 53][i % 3],
            proto: (i % 2) as i64,
            total_bytes: 3000.0 + (i % 19) as f64 * 50.0,
            total_packets: 25.0 + (i % 7) as f64,
            unique_src_ports: 1.0 + (i % 3) as f64,
            flow_count: 3.0 + (i % 4) as f64,
            avg_pkt_size: 110.0 + (i % 5) as f64,
            bytes_per_flow: 600.0 + (i % 11) as f64 * 4.0,
            pkts_per_flow: 5.0 + (i % 2) as f64,
            burstiness: 0.1 * (i % 4) as f64,
            is_new_dst: false,
            is_rare_dst: false,
            score: None,
        })
        .collect()
}

fn train_bundle(out: &Path) {
    let config = TrainingConfig {
        detector: DetectorParams {
            n_estimators: 30,
            max_samples: 64,
            ..DetectorParams::default()
        },
        ..TrainingConfig::default()
    };
    TrainingPipeline::new(config)
        .run(&windows(150), out, None)
        .unwrap();
}

fn run_score(dir: &Path, bundle: &Path, input: &str) -> Output {
    let mut child = Command::new(env!("CARGO_BIN_EXE_flowscore"))
        .arg("score")
        .arg(bundle)
        .env("FLOWSCORE_CONFIG_PATH", dir.join("absent-config.json"))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(input.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn single_json_line(out: &Output) -> serde_json::Value {
    let stdout = String::from_utf8(out.stdout.clone()).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "stdout: {:?}", stdout);
    serde_json::from_str(lines[0]).unwrap()
}

fn good_record() -> String {
    let schema = FeatureSchema::network();
    let raw = schema.derive(&windows(1)[0]).unwrap();
    let map: serde_json::Map<String, serde_json::Value> = schema
        .column_names()
        .map(String::from)
        .zip(raw.continuous.into_iter().chain(raw.derived))
        .map(|(k, v)| (k, serde_json::json!(v)))
        .collect();
    serde_json::Value::Object(map).to_string()
}

#[test]
fn valid_record_prints_score_and_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("model.json");
    train_bundle(&bundle);

    let out = run_score(dir.path(), &bundle, &good_record());
    assert!(out.status.success(), "status {:?}", out.status);
    let v = single_json_line(&out);
    let score = v["score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&score));
    assert!(v.get("error").is_none());
}

#[test]
fn bad_record_prints_error_and_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let bundle = dir.path().join("model.json");
    train_bundle(&bundle);

    let out = run_score(dir.path(), &bundle, r#"{"total_bytes": 10}"#);
    assert!(!out.status.success());
    let v = single_json_line(&out);
    assert!(v["error"].as_str().unwrap().contains("total_packets"));
    assert!(v.get("score").is_none());
}

#[test]
fn missing_bundle_prints_error_and_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let out = run_score(dir.path(), &dir.path().join("absent.json"), &good_record());
    assert!(!out.status.success());
    let v = single_json_line(&out);
    assert!(v["error"].is_string());
}
