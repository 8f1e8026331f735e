use assert_cmd::cargo::cargo_bin_cmd;
use pdf_engine::fixtures::{pdf_bytes, FixturePage};
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

fn write_fixture(dir: &Path, name: &str, pages: &[FixturePage]) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, pdf_bytes(pages)).expect("fixture should be written");
    path
}

fn write_default_config(dir: &Path) -> PathBuf {
    let path = dir.join("config.json");
    fs::write(&path, r#"{"version":1,"config":{}}"#).expect("config should be written");
    path
}

/// Write whole floats as integers so snapshots do not depend on float formatting.
fn integerize(value: &mut Value) {
    match value {
        Value::Number(number) => {
            if let Some(float) = number.as_f64() {
                if float.fract() == 0.0 {
                    *value = Value::from(float.round() as i64);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(integerize),
        Value::Object(map) => map.values_mut().for_each(integerize),
        _ => {}
    }
}

#[test]
fn info_emits_stable_json_contract() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(
        temp.path(),
        "two-pages.pdf",
        &[FixturePage::new(300, 400), FixturePage::new(612, 792).rotated(90)],
    );

    let output = cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(&file)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut value: Value =
        serde_json::from_slice(&output).expect("stdout should contain valid json");
    value["path"] = Value::String("<FIXTURE>".to_owned());
    integerize(&mut value);

    insta::assert_json_snapshot!("cli_info_two_pages", value);
}

#[test]
fn render_writes_png_at_viewport_size() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(
        temp.path(),
        "doc.pdf",
        &[FixturePage::new(300, 400), FixturePage::new(612, 792).rotated(90)],
    );
    let config = write_default_config(temp.path());
    let output_path = temp.path().join("out/page.png");

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&file)
        .arg("--page")
        .arg("2")
        .arg("--scale")
        .arg("0.5")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("page.png"));

    let image = image::open(&output_path).expect("output should be a readable image");
    assert_eq!((image.width(), image.height()), (396, 306));
}

#[test]
fn render_applies_requested_rotation() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = write_default_config(temp.path());
    let output_path = temp.path().join("turned.png");

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&file)
        .arg("--rotation")
        .arg("-90")
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success();

    let image = image::open(&output_path).expect("output should be a readable image");
    assert_eq!((image.width(), image.height()), (400, 300));
}

#[test]
fn render_rejects_page_out_of_range() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = write_default_config(temp.path());

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&file)
        .arg("--page")
        .arg("3")
        .assert()
        .failure()
        .stderr(predicate::str::contains("page 3 out of range"));
}

#[test]
fn annotate_replays_gesture_script() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = write_default_config(temp.path());
    let script = temp.path().join("script.json");
    fs::write(
        &script,
        r#"{"events":[
            {"tool":"highlight"},
            {"pointer_down":{"x":50,"y":80}},
            {"pointer_up":{"x":120,"y":40}},
            {"tool":"comment"},
            {"pointer_down":{"x":100,"y":100}},
            {"pointer_up":{"x":100,"y":100}},
            {"content":"check"},
            {"tool":"underline"},
            {"pointer_down":{"x":10,"y":200}},
            {"pointer_up":{"x":90,"y":210}},
            "undo"
        ]}"#,
    )
    .expect("script should be written");
    let output_path = temp.path().join("annotated.png");

    let output = cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("annotate")
        .arg(&file)
        .arg("--script")
        .arg(&script)
        .arg("--output")
        .arg(&output_path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let mut value: Value =
        serde_json::from_slice(&output).expect("stdout should contain valid json");
    integerize(&mut value);
    insta::assert_json_snapshot!("cli_annotate_highlight_and_comment", value);

    let image = image::open(&output_path).expect("output should be a readable image").to_rgba8();
    assert_eq!(image.dimensions(), (300, 400));
    let [r, g, b, _] = image.get_pixel(80, 60).0;
    assert_eq!((r, g), (255, 255));
    assert!(b < 200, "highlight should tint the page yellow, blue={b}");
    assert_eq!(image.get_pixel(50, 205).0, [255, 255, 255, 255]);
}

#[test]
fn annotate_reports_failing_event() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = write_default_config(temp.path());
    let script = temp.path().join("script.json");
    fs::write(&script, r#"{"events":["undo",{"delete_at":0}]}"#).expect("script should be written");

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("annotate")
        .arg(&file)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("script event 2 failed"))
        .stderr(predicate::str::contains("out of range"));
}

#[test]
fn annotate_rejects_malformed_script() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = write_default_config(temp.path());
    let script = temp.path().join("script.json");
    fs::write(&script, r#"{"events":[{"wave":1}]}"#).expect("script should be written");

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("annotate")
        .arg(&file)
        .arg("--script")
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid gesture script"));
}

#[test]
fn invalid_config_is_reported() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = write_fixture(temp.path(), "doc.pdf", &[FixturePage::new(300, 400)]);
    let config = temp.path().join("bad.json");
    fs::write(&config, r#"{"version":1,"config":{"default_rotation":45}}"#)
        .expect("config should be written");

    cargo_bin_cmd!("pagemark-cli")
        .arg("--config")
        .arg(&config)
        .arg("render")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to load config"))
        .stderr(predicate::str::contains("multiple of 90"));
}

#[test]
fn version_prints_package_version() {
    cargo_bin_cmd!("pagemark-cli")
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn info_fails_for_missing_file() {
    let temp = tempfile::tempdir().expect("temp dir should be created");

    cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(temp.path().join("missing.pdf"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("file does not exist"));
}

#[test]
fn info_fails_for_invalid_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("invalid.pdf");
    fs::write(&file, b"this is not a pdf").expect("fixture should be written");

    cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to open PDF"));
}

#[test]
fn info_fails_for_encrypted_marker_pdf() {
    let temp = tempfile::tempdir().expect("temp dir should be created");
    let file = temp.path().join("encrypted.pdf");
    fs::write(&file, b"%PDF-1.4\ntrailer << /Encrypt 5 0 R >>\n%%EOF\n")
        .expect("fixture should be written");

    cargo_bin_cmd!("pagemark-cli")
        .arg("info")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("encrypted PDFs are not supported"));
}
