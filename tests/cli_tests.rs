//! Integration tests for the CLI application
//!
//! These tests verify that the CLI commands work correctly with real data files.

use std::io::Write;
use std::process::{Command, Output};
use tempfile::{NamedTempFile, TempDir};

/// Helper to create test data files
struct TestDataFiles {
    pub train_file: NamedTempFile,
    pub test_file: NamedTempFile,
    pub features_file: NamedTempFile,
}

impl TestDataFiles {
    fn new() -> std::io::Result<Self> {
        let mut train_file = NamedTempFile::with_suffix(".csv")?;
        writeln!(train_file, "x1,x2,y")?;
        for i in 0..60 {
            let t = i as f64 / 60.0;
            let (a, b) = ((5.0 * t).sin(), (3.0 * t).cos());
            writeln!(train_file, "{a},{b},{}", a * b + 0.2 * a)?;
        }
        train_file.flush()?;

        let mut test_file = NamedTempFile::with_suffix(".csv")?;
        writeln!(test_file, "x1,x2,y")?;
        for i in 0..10 {
            let t = (i as f64 + 0.5) / 10.0;
            let (a, b) = ((5.0 * t).sin(), (3.0 * t).cos());
            writeln!(test_file, "{a},{b},{}", a * b + 0.2 * a)?;
        }
        test_file.flush()?;

        let mut features_file = NamedTempFile::with_suffix(".csv")?;
        writeln!(features_file, "0.1,0.9")?;
        writeln!(features_file, "-0.4,0.5")?;
        writeln!(features_file, "0.8,-0.2")?;
        features_file.flush()?;

        Ok(TestDataFiles {
            train_file,
            test_file,
            features_file,
        })
    }
}

fn run(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_rkrr"))
        .args(args)
        .output()
        .expect("Failed to execute CLI")
}

fn path_str(path: &std::path::Path) -> &str {
    path.to_str().expect("Temp paths are valid UTF-8")
}

fn fit_model(data: &TestDataFiles, dir: &TempDir, extra: &[&str]) -> std::path::PathBuf {
    let model_path = dir.path().join("model.json");
    let mut args = vec![
        "fit",
        "--data",
        path_str(data.train_file.path()),
        "--output",
        path_str(&model_path),
        "--sigma",
        "0.5",
        "--penalty",
        "1e-6",
        "--centers",
        "30",
    ];
    args.extend_from_slice(extra);
    let output = run(&args);
    assert!(
        output.status.success(),
        "Fit command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    model_path
}

#[test]
fn test_cli_fit_command() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let model_path = fit_model(&test_data, &temp_dir, &["--verbose"]);

    assert!(model_path.exists(), "Model file should be created");
    let content = std::fs::read_to_string(&model_path).expect("Failed to read model");
    assert!(content.contains("\"kernel\""));
    assert!(content.contains("\"alpha\""));
    assert!(content.contains("\"library_version\""));
}

#[test]
fn test_cli_fit_with_engine_options() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let model_path = fit_model(
        &test_data,
        &temp_dir,
        &[
            "--kernel",
            "laplacian",
            "--cpu-only",
            "--max-cpu-mem",
            "1",
            "--chol-ooc",
            "--single-precision",
            "--no-fused",
            "--max-iterations",
            "5",
        ],
    );
    assert!(model_path.exists());
}

#[test]
fn test_cli_predict_to_file() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let model_path = fit_model(&test_data, &temp_dir, &[]);
    let predictions_path = temp_dir.path().join("predictions.csv");

    let output = run(&[
        "predict",
        "--model",
        path_str(&model_path),
        "--data",
        path_str(test_data.test_file.path()),
        "--targets",
        "1",
        "--output",
        path_str(&predictions_path),
    ]);
    assert!(
        output.status.success(),
        "Predict command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let content = std::fs::read_to_string(&predictions_path).expect("Failed to read predictions");
    let values: Vec<f64> = content
        .lines()
        .map(|line| line.parse().expect("Predictions are numbers"))
        .collect();
    assert_eq!(values.len(), 10);

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mse: f64 = stdout
        .lines()
        .find_map(|line| line.strip_prefix("MSE: "))
        .expect("MSE should be reported")
        .trim()
        .parse()
        .expect("MSE is a number");
    assert!(mse < 1e-2, "Test MSE too large: {mse}");
}

#[test]
fn test_cli_predict_to_stdout() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let model_path = fit_model(&test_data, &temp_dir, &[]);

    let output = run(&[
        "predict",
        "--model",
        path_str(&model_path),
        "--data",
        path_str(test_data.features_file.path()),
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.lines().count(), 3);
    for line in stdout.lines() {
        assert!(line.parse::<f64>().is_ok(), "Not a prediction: {line}");
    }
}

#[test]
fn test_cli_info_command() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let model_path = fit_model(&test_data, &temp_dir, &[]);

    let output = run(&["info", path_str(&model_path)]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("=== KRR Model Summary ==="));
    assert!(stdout.contains("Centers: 30"));
    assert!(stdout.contains("Features: 2"));
    assert!(stdout.contains("Coefficients:"));
}

#[test]
fn test_cli_eval_command() {
    let test_data = TestDataFiles::new().expect("Failed to create test data");

    let output = run(&[
        "eval",
        path_str(test_data.train_file.path()),
        path_str(test_data.test_file.path()),
        "--sigma",
        "0.5",
    ]);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("=== Quick Evaluation Results ==="));
    assert!(stdout.contains("Test MSE:"));
}

#[test]
fn test_cli_error_handling() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");

    // Missing data file
    let output = run(&[
        "fit",
        "--data",
        "/nonexistent/file.csv",
        "--output",
        path_str(&temp_dir.path().join("model.json")),
    ]);
    assert!(!output.status.success());

    // Missing model file
    let output = run(&["info", "/nonexistent/model.json"]);
    assert!(!output.status.success());

    // Invalid kernel parameter
    let test_data = TestDataFiles::new().expect("Failed to create test data");
    let output = run(&[
        "fit",
        "--data",
        path_str(test_data.train_file.path()),
        "--output",
        path_str(&temp_dir.path().join("model.json")),
        "--sigma",
        "-1",
    ]);
    assert!(!output.status.success());

    // Conflicting factorization flags
    let output = run(&[
        "fit",
        "--data",
        path_str(test_data.train_file.path()),
        "--output",
        path_str(&temp_dir.path().join("model.json")),
        "--chol-in-core",
        "--chol-ooc",
    ]);
    assert!(!output.status.success());
}

#[test]
fn test_cli_help_and_version() {
    let output = run(&["--help"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("fit"));
    assert!(stdout.contains("predict"));

    let output = run(&["--version"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains(env!("CARGO_PKG_VERSION")));
}
