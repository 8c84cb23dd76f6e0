use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::io::Write;
use std::process::Command;
use tempfile::tempdir;

#[test]
fn test_cli_archive_create_and_list_cycle() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup: a temporary source tree
    let source_dir = tempdir()?;
    let file1_path = source_dir.path().join("file1.txt");
    let nested_dir = source_dir.path().join("nested");
    fs::create_dir(&nested_dir)?;
    let nested_file_path = nested_dir.join("nested_file.dat");

    let mut file1 = fs::File::create(&file1_path)?;
    writeln!(file1, "Hello, this is the first file.")?;
    let mut nested_file = fs::File::create(&nested_file_path)?;
    nested_file.write_all(&[0, 1, 2, 3, 4, 5])?;

    let archive_dir = tempdir()?;
    let archive_path = archive_dir.path().join("test_archive.tar");

    // 2. Create archive
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("archive")
        .arg("create")
        .arg("--output")
        .arg(&archive_path)
        .arg(source_dir.path());
    cmd.assert().success();
    assert!(archive_path.exists());

    // 3. List its entries
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("archive").arg("list").arg(&archive_path);
    cmd.assert().success().stdout(
        predicate::str::contains("file1.txt")
            .and(predicate::str::contains("nested_file.dat")),
    );

    // 4. JSON listing carries the entry attributes
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("archive").arg("list").arg("--json").arg(&archive_path);
    cmd.assert().success().stdout(
        predicate::str::contains("\"name\"").and(predicate::str::contains("\"size\"")),
    );

    // 5. Read an archived entry back through the cat command. Entry names
    // are relative to the input's parent, so they start with the top dir.
    let top = source_dir.path().file_name().unwrap().to_string_lossy();
    let locator = format!("archive://{}!{top}/file1.txt", archive_path.display());
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("cat").arg(&locator);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Hello, this is the first file."));

    Ok(())
}

#[test]
fn test_cli_stat_list_and_file_ops() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let file_path = dir.path().join("notes.txt");
    fs::write(&file_path, "some notes\n")?;

    // stat, human form
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("stat").arg(&file_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("file").and(predicate::str::contains("11 bytes")));

    // stat --json
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("stat").arg("--json").arg(&file_path);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("\"type\"").and(predicate::str::contains("\"size\"")));

    // mkdir + ls
    let sub = dir.path().join("sub");
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("mkdir").arg(&sub);
    cmd.assert().success();

    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("ls").arg(dir.path());
    cmd.assert().success().stdout(
        predicate::str::contains("notes.txt").and(predicate::str::contains("sub")),
    );

    // cp, mv, rm
    let copy_path = dir.path().join("copy.txt");
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("cp").arg(&file_path).arg(&copy_path);
    cmd.assert().success();
    assert_eq!(fs::read(&copy_path)?, fs::read(&file_path)?);

    let moved_path = dir.path().join("moved.txt");
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("mv").arg(&copy_path).arg(&moved_path);
    cmd.assert().success();
    assert!(!copy_path.exists());
    assert!(moved_path.exists());

    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("rm").arg(&moved_path);
    cmd.assert().success();
    assert!(!moved_path.exists());

    Ok(())
}

#[test]
fn test_cli_stat_missing_path_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempdir()?;
    let mut cmd = Command::cargo_bin("polyfs")?;
    cmd.arg("stat").arg(dir.path().join("nope.txt"));
    cmd.assert().failure().stderr(predicate::str::contains("Error"));
    Ok(())
}
