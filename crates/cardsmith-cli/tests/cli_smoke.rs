use assert_cmd::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

fn repo_root() -> PathBuf {
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest_dir
        .parent()
        .and_then(|p| p.parent())
        .expect("expected crates/<name> layout")
        .to_path_buf()
}

#[test]
fn cli_builds_csv_deck_and_writes_one_svg_per_card() {
    let root = repo_root();
    let tmp = tempfile::tempdir().expect("tempdir");
    let out = tmp.path().join("cards");

    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    let output = Command::new(exe)
        .current_dir(&root)
        .env("PATH", "")
        .args([
            "build",
            "--template",
            "fixtures/template.svg",
            "--deck",
            "fixtures/deck.csv",
            "--out",
            out.to_string_lossy().as_ref(),
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).expect("utf8 stdout");
    assert!(stdout.contains("card 001: ok"), "{stdout}");
    assert!(stdout.contains("card 002: ok"), "{stdout}");
    assert!(stdout.contains("summary: 2 card(s), 2 rendered"), "{stdout}");

    for id in ["001", "002"] {
        let svg = fs::read_to_string(out.join(format!("{id}.svg"))).expect("svg written");
        assert!(svg.starts_with("<?xml"), "{id}.svg has no XML declaration");
    }
}

#[test]
fn cli_exits_nonzero_when_a_card_fails_but_keeps_the_rest() {
    let root = repo_root();
    let tmp = tempfile::tempdir().expect("tempdir");

    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    let output = Command::new(exe)
        .current_dir(&root)
        .env("PATH", "")
        .args([
            "build",
            "--template",
            "fixtures/template.svg",
            "--deck",
            "fixtures/deck.yml",
            "--out",
            tmp.path().to_string_lossy().as_ref(),
        ])
        .assert()
        .code(1)
        .get_output()
        .stdout
        .clone();

    let stdout = String::from_utf8(output).expect("utf8 stdout");
    assert!(stdout.contains("card broken: fail"), "{stdout}");
    // Without a LaTeX toolchain the fitted formula slot fails, the card does not.
    assert!(stdout.contains("formula1_slot: fail"), "{stdout}");
    assert!(tmp.path().join("pythagoras.svg").is_file());
    assert!(tmp.path().join("euler.svg").is_file());
}

#[test]
fn cli_renders_png_next_to_svg() {
    let root = repo_root();
    let tmp = tempfile::tempdir().expect("tempdir");

    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    Command::new(exe)
        .current_dir(&root)
        .env("PATH", "")
        .args([
            "build",
            "--template",
            "fixtures/template.svg",
            "--cards",
            "fixtures/cards",
            "--format",
            "png",
            "--width",
            "150",
            "--background",
            "white",
            "--out",
            tmp.path().to_string_lossy().as_ref(),
        ])
        .assert()
        .code(1);

    let bytes = fs::read(tmp.path().join("01-circle.png")).expect("read png");
    assert!(bytes.starts_with(b"\x89PNG\r\n\x1a\n"), "output is not a PNG");
    assert!(tmp.path().join("01-circle.svg").is_file());
}

#[test]
fn cli_prints_tokens_as_json() {
    let root = repo_root();
    let tmp = tempfile::tempdir().expect("tempdir");
    let input = tmp.path().join("markup.txt");
    fs::write(&input, "Area $A$ is\n$$x$$").expect("write input");

    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    let output = Command::new(exe)
        .current_dir(&root)
        .args(["tokens", input.to_string_lossy().as_ref()])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let tokens: serde_json::Value = serde_json::from_slice(&output).expect("json output");
    let texts: Vec<&str> = tokens
        .as_array()
        .expect("array")
        .iter()
        .filter_map(|t| t.get("text").and_then(|v| v.as_str()))
        .collect();
    assert_eq!(texts.concat(), "Area $A$ is\n$$x$$");
}

#[test]
fn cli_reports_usage_errors_with_exit_code_2() {
    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    Command::new(exe)
        .args(["build", "--deck", "fixtures/deck.yml"])
        .assert()
        .code(2);

    let exe = assert_cmd::cargo_bin!("cardsmith-cli");
    Command::new(exe)
        .args(["build", "--template", "t.svg", "--deck", "d.yml", "--scale", "2", "--dpi", "300"])
        .assert()
        .code(2);

    for timeout in ["inf", "1e30"] {
        let exe = assert_cmd::cargo_bin!("cardsmith-cli");
        let output = Command::new(exe)
            .args(["build", "--template", "t.svg", "--deck", "d.yml", "--timeout", timeout])
            .assert()
            .code(2)
            .get_output()
            .stderr
            .clone();
        let stderr = String::from_utf8(output).expect("utf8 stderr");
        assert!(stderr.contains("--timeout is out of range"), "{stderr}");
    }
}
