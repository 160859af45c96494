use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::File;
use std::io::Write;
use tempfile::{tempdir, TempDir};

fn create_test_files(dir: &TempDir, files: &[(&str, &[u8])]) -> Result<()> {
    for (name, content) in files {
        let file_path = dir.path().join(name);
        if let Some(parent) = file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = File::create(file_path)?;
        file.write_all(content)?;
    }
    Ok(())
}

fn textsweep() -> Command {
    Command::cargo_bin("textsweep").unwrap()
}

#[test]
fn test_search_prints_matches() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("a.txt", b"foo\nbar\nfoo\n"),
            ("b.txt", b"nope"),
        ],
    )?;

    textsweep()
        .arg("search")
        .arg("foo")
        .arg("-d")
        .arg(dir.path())
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("a.txt"))
        .stdout(predicate::str::contains("8: foo"))
        .stdout(predicate::str::contains("Found 2 matches in 1 files (2 scanned, 0 skipped)"));

    Ok(())
}

#[test]
fn test_search_stats_only() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("notes.txt", b"TODO one\nTODO two\n")])?;

    textsweep()
        .args(["search", "TODO", "--stats", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 matches in 1 files"))
        .stdout(predicate::str::contains("notes.txt").not());

    Ok(())
}

#[test]
fn test_search_json_output() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("c.txt", b"say hello world\n")])?;

    let output = textsweep()
        .args(["search", "hello", "--json", "-d"])
        .arg(dir.path())
        .output()?;
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<serde_json::Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<std::result::Result<_, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["offset"], 4);
    assert_eq!(lines[0]["length"], 5);
    assert_eq!(lines[0]["line"], "say hello world");
    assert_eq!(lines[1]["summary"]["status"], "Completed");
    assert_eq!(lines[1]["summary"]["total_matches"], 1);

    Ok(())
}

#[test]
fn test_search_skips_binary_unless_asked() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("blob.dat", b"needle\0\0\x01")])?;

    textsweep()
        .args(["search", "needle", "--stats", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 0 matches in 0 files (1 scanned, 1 skipped)"));

    textsweep()
        .args(["search", "needle", "--stats", "--include-binary", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 matches in 1 files"));

    Ok(())
}

#[test]
fn test_undecodable_binary_is_not_a_warning() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[("logo.dat", b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR needle \xff\xfe")],
    )?;

    textsweep()
        .args(["search", "needle", "--stats", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(1 scanned, 1 skipped)"))
        .stderr(predicate::str::contains("warning").not());

    Ok(())
}

#[test]
fn test_search_flags() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[
            ("src/main.rs", b"let a = x.y; // Error here\n"),
            ("docs/guide.md", b"error handling\n"),
        ],
    )?;

    // Fixed strings: the dot is literal
    textsweep()
        .args(["search", "x.y", "-F", "--stats", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 matches"));

    // Case-insensitive, restricted to markdown
    textsweep()
        .args(["search", "ERROR", "--ignore-case", "-e", "md", "--stats", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 matches in 1 files (1 scanned"));

    Ok(())
}

#[test]
fn test_invalid_pattern_fails() -> Result<()> {
    let dir = tempdir()?;

    textsweep()
        .args(["search", "(unclosed", "-d"])
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("InvalidPattern"));

    Ok(())
}

#[test]
fn test_decode_failure_is_reported() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(
        &dir,
        &[("bad.txt", b"caf\xe9 needle\n"), ("good.txt", b"needle\n")],
    )?;

    textsweep()
        .args(["search", "needle", "--stats", "-d"])
        .arg(dir.path())
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 matches"))
        .stderr(predicate::str::contains("warning:"));

    textsweep()
        .args(["search", "needle", "--stats", "--encoding", "lossy", "-d"])
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 2 matches in 2 files"));

    Ok(())
}

#[test]
fn test_classify() -> Result<()> {
    let dir = tempdir()?;
    create_test_files(&dir, &[("t.txt", b"plain"), ("b.dat", b"\0\x01\x02")])?;

    textsweep()
        .arg("classify")
        .arg(dir.path().join("t.txt"))
        .arg(dir.path().join("b.dat"))
        .env("NO_COLOR", "1")
        .assert()
        .success()
        .stdout(predicate::str::contains("t.txt: text"))
        .stdout(predicate::str::contains("b.dat: binary"));

    Ok(())
}

#[test]
fn test_init_config() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("conf.yaml");

    textsweep()
        .arg("init-config")
        .arg(&path)
        .assert()
        .success();
    let written = std::fs::read_to_string(&path)?;
    assert!(written.contains("buffer_size"));

    // Refuses to overwrite
    textsweep().arg("init-config").arg(&path).assert().failure();

    // The written file loads back
    create_test_files(&dir, &[("x.txt", b"alpha beta")])?;
    textsweep()
        .args(["search", "beta", "--stats", "--config"])
        .arg(&path)
        .arg("-d")
        .arg(dir.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("Found 1 matches"));

    Ok(())
}
