//! Integration tests for the prompt-format-eval CLI and library.
//!
//! These tests verify end-to-end functionality including:
//! - CLI commands work correctly
//! - A sweep, scoring and report run through the library APIs
//! - Reports read the same data from a directory or a zip archive
//! - The HTTP client speaks the completion wire format

#![allow(clippy::needless_raw_string_hashes)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unwrap_used)]

use prompt_format_eval::report::ReportBuilder;
use prompt_format_eval::results::{save_accuracy, save_reproducibility};
use prompt_format_eval::runner::label_for_output;
use prompt_format_eval::{
    Accuracy, AgreementScorer, AlignedRuns, CompletionClient, CompletionConfig, ExperimentConfig,
    ExperimentRunner, GoldAnswers, HttpCompletionClient, Label, MetricsLayout, MetricsSource,
    PromptItem, ShotExample, ShotPool, StatConfig,
};
use std::cell::Cell;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::process::Command;
use std::thread;

// ============================================================================
// CLI Integration Tests
// ============================================================================

#[test]
fn test_cli_help_command() {
    let output = Command::new("cargo")
        .args(["run", "--quiet", "--", "--help"])
        .output()
        .expect("Failed to execute CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("prompt-format-eval"),
        "Help should mention project name"
    );
    for command in ["run", "score", "report", "render"] {
        assert!(stdout.contains(command), "Help should list {command}");
    }
}

#[test]
fn test_cli_render_json() {
    let output = Command::new("cargo")
        .args([
            "run",
            "--quiet",
            "--",
            "render",
            "--sentence",
            "  Great day ",
            "--format",
            "JSON",
        ])
        .output()
        .expect("Failed to execute CLI");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success());
    assert!(stdout.starts_with("{\"instruction\": \"Classify the sentiment"));
    assert!(stdout.contains("\"input\": \"Great day\"}"), "{}", stdout);
}

#[test]
fn test_cli_render_requires_pool_for_shots() {
    let output = Command::new("cargo")
        .args([
            "run", "--quiet", "--", "render", "--sentence", "x", "--shot", "3",
        ])
        .output()
        .expect("Failed to execute CLI");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("--shots"), "{}", stderr);
}

// ============================================================================
// End-to-end sweep → score → report
// ============================================================================

/// Deterministic stand-in for a sampled model; `run` shifts its noise
struct FakeModel {
    run: usize,
    calls: Cell<usize>,
}

impl FakeModel {
    fn new(run: usize) -> Self {
        Self {
            run,
            calls: Cell::new(0),
        }
    }
}

impl CompletionClient for FakeModel {
    fn complete(&self, prompt: &str, _max_tokens: u32) -> String {
        let n = self.calls.get();
        self.calls.set(n + 1);

        // The sentence is always on the last line of the main block
        let sentence = prompt.lines().last().unwrap_or_default();
        if (n + self.run) % 11 == 0 {
            return "Exception: connection reset by peer".to_string();
        }
        if (n * (self.run + 2)) % 7 == 0 {
            return "Label: neutral".to_string();
        }
        if sentence.contains("love") {
            "Label: Positive".to_string()
        } else if sentence.contains("awful") {
            "Label: negative. Not positive.".to_string()
        } else {
            "It could be neutral or positive".to_string()
        }
    }

    fn name(&self) -> &str {
        "fake"
    }
}

fn sweep_config() -> ExperimentConfig {
    let mut config = ExperimentConfig::default();
    config.sweep.request_delay_ms = 0;
    config
}

fn prompts() -> Vec<PromptItem> {
    vec![
        PromptItem {
            id: 1,
            prompt: "I love the new update.".to_string(),
        },
        PromptItem {
            id: 2,
            prompt: "The service was awful.".to_string(),
        },
        PromptItem {
            id: 3,
            prompt: "It arrived on Tuesday.".to_string(),
        },
    ]
}

fn pool() -> ShotPool {
    ShotPool::new(vec![
        ShotExample::new("Absolutely wonderful.", "Label: positive"),
        ShotExample::new("Never again.", "Label: negative"),
        ShotExample::new("The box is blue.", "Label: neutral"),
        ShotExample::new("Best day ever!", "Label: positive"),
        ShotExample::new("Cold and bland.", "Label: negative"),
    ])
}

const GOLD: &str = "prompt_id,sentiment\n1,positive\n2,negative\n3,positive\n";

/// Sweep, score and lay out metric files for one model
fn produce_model(root: &Path, model: &str, runs: usize, seed: usize) {
    let config = sweep_config();
    let mut tables = Vec::new();
    for run in 1..=runs {
        let output = root.join("runs").join(model).join(format!("run_{run}.csv"));
        let runner = ExperimentRunner::new(&config, FakeModel::new(run * seed));
        let table = runner.run(&prompts(), &pool(), &output).unwrap();
        assert_eq!(table.len(), 3 * 16);
        tables.push(table);
    }

    let aligned = AlignedRuns::align(&tables).unwrap();
    let gold = GoldAnswers::from_reader(GOLD.as_bytes()).unwrap();
    let scorer = AgreementScorer::from_config(&config.scoring);
    let accuracy = scorer.score_accuracy(&aligned, &gold).unwrap();
    let reproducibility = scorer.score_reproducibility(&aligned).unwrap();
    assert_eq!(accuracy.len(), 48);
    assert_eq!(reproducibility.len(), 48);

    let layout = MetricsLayout::new(model);
    save_accuracy(&root.join(layout.accuracy_path()), &accuracy).unwrap();
    save_reproducibility(&root.join(layout.reproducibility_path()), &reproducibility).unwrap();
}

#[test]
fn test_sweep_score_report_directory() {
    let dir = tempfile::tempdir().unwrap();
    produce_model(dir.path(), "model_1", 3, 1);
    produce_model(dir.path(), "model_2", 3, 5);

    let models = vec!["model_1".to_string(), "model_2".to_string()];
    let rows = MetricsSource::detect(dir.path())
        .unwrap()
        .load(&models)
        .unwrap();
    assert_eq!(rows.len(), 96);
    assert!(rows
        .iter()
        .all(|r| (0.0..=1.0).contains(&r.reproducibility)));

    // Prompt 3 answers "neutral or positive": neutral comes first, and the
    // override turns it into the positive gold label
    assert!(rows
        .iter()
        .filter(|r| r.prompt_id == 3)
        .all(|r| matches!(r.accuracy, Accuracy::Value(v) if (v - 1.0).abs() < 1e-9)
            || r.accuracy == Accuracy::Unknown));

    let report = ReportBuilder::new(rows)
        .with_stat_config(StatConfig {
            bootstrap_n: 500,
            ..StatConfig::default()
        })
        .build()
        .unwrap();
    assert_eq!(report.mean_results.len(), 2 * 4 * 4);
    let anova = report.anova_accuracy.as_ref().unwrap();
    assert_eq!(anova.last().unwrap().effect, "Residual");
    assert_eq!(anova.last().unwrap().df, 64.0);
    assert!(report.warnings.is_empty());
    // Four formats give six Tukey pairs per metric
    assert_eq!(report.tukey_accuracy.len(), 6);
    assert_eq!(report.tukey_consistency.len(), 6);
    assert_eq!(report.tukey_accuracy[0].group1, "json");
    assert_eq!(report.consistency_by_shot.len(), 8);

    let out = dir.path().join("output");
    report.write_outputs(&out).unwrap();
    for name in [
        "mean_results.csv",
        "anova_accuracy.csv",
        "anova_consistency.csv",
        "tukey_accuracy_format.csv",
        "tukey_consistency_format.csv",
        "report.md",
        "report.json",
    ] {
        assert!(out.join(name).is_file(), "missing {name}");
    }
}

#[test]
fn test_report_from_archive_matches_directory() {
    let dir = tempfile::tempdir().unwrap();
    produce_model(dir.path(), "model_1", 2, 3);

    let layout = MetricsLayout::new("model_1");
    let zip_path = dir.path().join("results.zip");
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&zip_path).unwrap());
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    for relative in [layout.accuracy_path(), layout.reproducibility_path()] {
        let content = std::fs::read(dir.path().join(&relative)).unwrap();
        zip.start_file(relative, options).unwrap();
        zip.write_all(&content).unwrap();
    }
    zip.finish().unwrap();

    let models = vec!["model_1".to_string()];
    let from_dir = MetricsSource::detect(dir.path())
        .unwrap()
        .load(&models)
        .unwrap();
    let from_zip = MetricsSource::detect(&zip_path)
        .unwrap()
        .load(&models)
        .unwrap();
    assert_eq!(from_dir, from_zip);
}

#[test]
fn test_misaligned_runs_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = sweep_config();
    let first = ExperimentRunner::new(&config, FakeModel::new(1))
        .run(&prompts(), &pool(), &dir.path().join("a.csv"))
        .unwrap();
    let second = ExperimentRunner::new(&config, FakeModel::new(2))
        .run(&prompts()[..2], &pool(), &dir.path().join("b.csv"))
        .unwrap();
    assert!(AlignedRuns::align(&[first, second]).is_err());
}

// ============================================================================
// HTTP completion client
// ============================================================================

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Serve one HTTP request with `body`; the handle yields the raw request
fn serve_once(body: &'static str) -> (String, thread::JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = find(&buf, b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
                let length = head
                    .lines()
                    .find_map(|l| l.strip_prefix("content-length:"))
                    .map_or(0, |v| v.trim().parse::<usize>().unwrap());
                if buf.len() >= end + 4 + length {
                    break;
                }
            }
        }
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        stream.write_all(response.as_bytes()).unwrap();
        String::from_utf8_lossy(&buf).to_string()
    });
    (format!("http://{addr}/v1/completions"), handle)
}

#[test]
fn test_http_client_round_trip() {
    let (endpoint, server) = serve_once(r#"{"choices":[{"text":"  Label: positive \n"}]}"#);
    let config = CompletionConfig {
        endpoint,
        ..CompletionConfig::default()
    };
    let client = HttpCompletionClient::new(&config).unwrap();

    let output = client.complete("hello", 64);
    assert_eq!(output, "Label: positive");
    assert_eq!(label_for_output(&output), Label::Positive);

    let request = server.join().unwrap();
    assert!(request.starts_with("POST /v1/completions"));
    assert!(request.contains(r#""model":"llama-3.2-3b-instruct""#));
    assert!(request.contains(r#""max_tokens":64"#));
    assert!(request.contains(r#""temperature":0.7"#));
    assert!(request.contains(r#""stop":null"#));
}

#[test]
fn test_http_client_service_error() {
    let (endpoint, server) = serve_once(r#"{"error":"model is not loaded, positive"}"#);
    let config = CompletionConfig {
        endpoint,
        ..CompletionConfig::default()
    };
    let client = HttpCompletionClient::new(&config).unwrap();

    let output = client.complete("hello", 8);
    assert!(output.starts_with("Error:"), "{output}");
    assert_eq!(label_for_output(&output), Label::Unknown);
    server.join().unwrap();
}
