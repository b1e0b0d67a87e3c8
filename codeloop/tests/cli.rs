//! CLI tests: spawn the binary and check exit codes and output.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use codeloop::exit_codes;
use codeloop::test_support::{approved_review, file_document, rejecting_review};

fn codeloop(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_codeloop"))
        .current_dir(dir)
        .args(args)
        .output()
        .expect("spawn codeloop")
}

#[test]
fn classify_exit_code_follows_verdict() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("good.md"), approved_review()).expect("write");
    fs::write(
        temp.path().join("bad.md"),
        rejecting_review("Off-by-one error in loop bound"),
    )
    .expect("write");

    let good = codeloop(temp.path(), &["classify", "good.md"]);
    assert_eq!(good.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&good.stdout).trim(), "approved");

    let bad = codeloop(temp.path(), &["classify", "bad.md"]);
    assert_eq!(bad.status.code(), Some(exit_codes::NEEDS_CHANGES));
    assert_eq!(String::from_utf8_lossy(&bad.stdout).trim(), "needs-changes");
}

#[test]
fn classify_missing_file_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let output = codeloop(temp.path(), &["classify", "nope.md"]);
    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn extract_writes_blocks_and_dry_run_does_not() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(temp.path().join("doc.md"), file_document("a/b.py", "print(1)")).expect("write");

    let dry = codeloop(temp.path(), &["extract", "doc.md", "--dry-run"]);
    assert_eq!(dry.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&dry.stdout).contains("a/b.py"));
    assert!(!temp.path().join("a/b.py").exists());

    let real = codeloop(temp.path(), &["extract", "doc.md"]);
    assert_eq!(real.status.code(), Some(exit_codes::OK));
    assert_eq!(
        fs::read_to_string(temp.path().join("a/b.py")).expect("read"),
        "print(1)"
    );
}

#[test]
fn extract_reports_sandbox_escape() {
    let temp = tempfile::tempdir().expect("tempdir");
    let ws = temp.path().join("ws");
    fs::create_dir(&ws).expect("dir");
    fs::write(
        ws.join("doc.md"),
        format!(
            "{}\n{}",
            file_document("../escape.txt", "no"),
            file_document("ok.txt", "yes")
        ),
    )
    .expect("write");

    let output = codeloop(&ws, &["extract", "doc.md"]);
    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(ws.join("ok.txt").is_file());
    assert!(!temp.path().join("escape.txt").exists());
}

#[test]
fn init_refuses_to_overwrite_without_force() {
    let temp = tempfile::tempdir().expect("tempdir");

    let first = codeloop(temp.path(), &["init"]);
    assert_eq!(first.status.code(), Some(exit_codes::OK));
    assert!(temp.path().join(".codeloop/config.toml").is_file());

    let second = codeloop(temp.path(), &["init"]);
    assert_eq!(second.status.code(), Some(exit_codes::INVALID));

    let forced = codeloop(temp.path(), &["init", "--force"]);
    assert_eq!(forced.status.code(), Some(exit_codes::OK));
}

#[cfg(unix)]
#[test]
fn run_with_shell_models_writes_a_run_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = r#"
max_iterations = 2
use_knowledge = false

[models]
planner = ["sh", "-c", "cat > /dev/null; echo PLAN"]
coder = ["sh", "-c", "cat > /dev/null; echo CODE"]
reviewer = ["sh", "-c", "cat > /dev/null; printf '## Review Summary\nAPPROVED\n\n## Critical Issues\nNone\n'"]
reasoner = ["sh", "-c", "cat > /dev/null; echo REASON"]
"#;
    fs::write(temp.path().join("codeloop.toml"), config).expect("write config");

    let output = codeloop(
        temp.path(),
        &["--config", "codeloop.toml", "run", "print a greeting"],
    );

    assert_eq!(
        output.status.code(),
        Some(exit_codes::OK),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "CODE");

    let runs: Vec<_> = fs::read_dir(temp.path().join(".codeloop/runs"))
        .expect("runs dir")
        .filter_map(Result::ok)
        .collect();
    assert_eq!(runs.len(), 1);
    let meta = fs::read_to_string(runs[0].path().join("meta.json")).expect("meta");
    assert!(meta.contains("\"approved\": true"));
    assert!(runs[0].path().join("01-planning-0.md").is_file());
}

#[cfg(unix)]
#[test]
fn run_output_survives_an_unwritable_run_log() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = r#"
max_iterations = 1
use_knowledge = false

[models]
planner = ["sh", "-c", "cat > /dev/null; echo PLAN"]
coder = ["sh", "-c", "cat > /dev/null; echo CODE"]
reviewer = ["sh", "-c", "cat > /dev/null; echo 'Needs work: NEEDS_CHANGES'"]
"#;
    fs::write(temp.path().join("codeloop.toml"), config).expect("write config");
    // A regular file where the run log directory should go.
    fs::write(temp.path().join(".codeloop"), "").expect("block log dir");

    let output = codeloop(
        temp.path(),
        &["--config", "codeloop.toml", "run", "print a greeting"],
    );

    assert_eq!(output.status.code(), Some(exit_codes::NEEDS_CHANGES));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "CODE");
    assert!(String::from_utf8_lossy(&output.stderr).contains("could not write run log"));
}

#[cfg(unix)]
#[test]
fn reason_with_reflexion_stops_on_accepting_critique() {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = r#"
[models]
reasoner = ["sh", "-c", "cat > /dev/null; echo 'The solution is correct.'"]
"#;
    fs::write(temp.path().join("codeloop.toml"), config).expect("write config");

    let output = codeloop(
        temp.path(),
        &[
            "--config",
            "codeloop.toml",
            "reason",
            "is 7 prime?",
            "--strategy",
            "reflexion",
        ],
    );

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        "The solution is correct."
    );
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 critique(s), accepted: true"));
}

#[test]
fn knowledge_add_count_and_clear() {
    let temp = tempfile::tempdir().expect("tempdir");
    let src = temp.path().join("src");
    fs::create_dir_all(src.join("nested")).expect("dirs");
    fs::write(src.join("app.py"), "def app(): pass").expect("write");
    fs::write(src.join("nested/lib.rs"), "pub fn lib() {}").expect("write");
    fs::write(src.join("notes.txt"), "skip me").expect("write");
    fs::write(temp.path().join("guide.md"), "How to deploy").expect("write");

    let add = codeloop(temp.path(), &["knowledge", "add", "src"]);
    assert_eq!(add.status.code(), Some(exit_codes::OK));
    assert!(String::from_utf8_lossy(&add.stdout).contains("added 2 file(s)"));

    let doc = codeloop(temp.path(), &["knowledge", "doc", "guide.md"]);
    assert_eq!(doc.status.code(), Some(exit_codes::OK));

    let count = codeloop(temp.path(), &["knowledge", "count"]);
    assert_eq!(String::from_utf8_lossy(&count.stdout).trim(), "3");

    let clear = codeloop(temp.path(), &["knowledge", "clear"]);
    assert_eq!(clear.status.code(), Some(exit_codes::OK));
    let count = codeloop(temp.path(), &["knowledge", "count"]);
    assert_eq!(String::from_utf8_lossy(&count.stdout).trim(), "0");
}
