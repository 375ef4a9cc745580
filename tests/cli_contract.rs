use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn run_facegrid(cwd: &Path, args: &[&str], token: Option<&str>) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_facegrid"));
    command.current_dir(cwd).args(args);
    match token {
        Some(token) => command.env("REPLICATE_API_TOKEN", token),
        None => command.env_remove("REPLICATE_API_TOKEN"),
    };
    command.output().expect("facegrid command should run")
}

fn seed_photo(cwd: &Path) {
    fs::create_dir_all(cwd.join("input")).expect("input dir should create");
    fs::write(cwd.join("input/photo.jpeg"), b"not really a jpeg").expect("photo should write");
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn even_grid_size_is_rejected_before_cost_estimate() {
    let dir = tempdir().expect("tempdir should create");
    seed_photo(dir.path());

    let output = run_facegrid(dir.path(), &["4"], Some("token"));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("odd integer"), "{}", stderr(&output));
    assert!(!stdout(&output).contains("Estimated cost"));
    assert!(!dir.path().join("output").exists());
}

#[test]
fn non_numeric_and_zero_grid_sizes_are_rejected() {
    let dir = tempdir().expect("tempdir should create");
    for raw in ["abc", "0", "-5"] {
        let output = run_facegrid(dir.path(), &[raw], Some("token"));
        assert_eq!(output.status.code(), Some(1), "{raw}");
        assert!(
            stderr(&output).contains("positive integer"),
            "{raw}: {}",
            stderr(&output)
        );
        assert!(stdout(&output).is_empty(), "{raw}");
    }
}

#[test]
fn oversized_grid_is_rejected_without_building_it() {
    let dir = tempdir().expect("tempdir should create");
    seed_photo(dir.path());

    let output = run_facegrid(dir.path(), &["99999"], Some("token"));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("at most 101"), "{}", stderr(&output));
    assert!(stdout(&output).is_empty());
}

#[test]
fn missing_token_is_reported_before_any_prompt() {
    let dir = tempdir().expect("tempdir should create");
    seed_photo(dir.path());

    let output = run_facegrid(dir.path(), &["3"], None);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("REPLICATE_API_TOKEN"), "{}", stderr(&output));
    assert!(!stdout(&output).contains("Estimated cost"));
}

#[test]
fn missing_source_photo_is_reported() {
    let dir = tempdir().expect("tempdir should create");

    let output = run_facegrid(dir.path(), &["3"], Some("token"));
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("input/photo.jpeg"), "{}", stderr(&output));
}

#[test]
fn unknown_config_keys_are_rejected() {
    let dir = tempdir().expect("tempdir should create");
    seed_photo(dir.path());
    fs::write(dir.path().join("facegrid.yaml"), "grid_sise: 3\n").expect("config should write");

    let output = run_facegrid(
        dir.path(),
        &["--config", "facegrid.yaml"],
        Some("token"),
    );
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("invalid config file"), "{}", stderr(&output));
}

#[test]
fn resumed_run_without_terminal_skips_existing_cells_and_reports_sprite_failure() {
    let dir = tempdir().expect("tempdir should create");
    seed_photo(dir.path());
    fs::create_dir_all(dir.path().join("output")).expect("output dir should create");
    for index in 0..9 {
        fs::write(
            dir.path().join(format!("output/avatar_{index:03}.webp")),
            b"cached",
        )
        .expect("artifact should write");
    }
    // Every cell already exists, so no request reaches the API base.
    fs::write(
        dir.path().join("facegrid.yaml"),
        "montage_bin: \"false\"\napi_base: http://127.0.0.1:9\n",
    )
    .expect("config should write");

    let output = run_facegrid(
        dir.path(),
        &["3", "--config", "facegrid.yaml"],
        Some("token"),
    );
    let text = stdout(&output);
    assert_eq!(output.status.code(), Some(1), "stdout={text} stderr={}", stderr(&output));
    assert!(text.contains("Generating 9 photos (3x3 grid)."));
    assert!(text.contains("Estimated cost: $0.01"));
    assert!(text.contains("Skipping avatar_000.webp (exists)"));
    assert!(text.contains("Skipping avatar_008.webp (exists)"));
    assert!(text.contains("All images generated successfully."));
    assert!(text.contains("Building 3x3 sprite with 160px cells"));
    assert!(text.contains("Failed to create sprite: sprite tool error:"));
    assert_eq!(
        fs::read(dir.path().join("output/avatar_004.webp")).expect("artifact kept"),
        b"cached"
    );
    assert!(!dir.path().join("output/sprite.json").exists());
}

#[test]
fn version_flag_prints_binary_name() {
    let dir = tempdir().expect("tempdir should create");
    let output = run_facegrid(dir.path(), &["--version"], None);
    assert!(output.status.success());
    assert!(stdout(&output).starts_with("facegrid "));
}
