//! Drives the demo binary (`restore-tree-demo`) through `assert_cmd`
//! end to end, rather than calling the library directly (see
//! `tests/restore_tree.rs` for that).

use std::io::Write;

use assert_cmd::Command;
use predicates::str::contains;
use tempfile::NamedTempFile;

fn write_rows(contents: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(contents.as_bytes()).unwrap();
    f
}

fn encode_lstat(mode: u32, nlink: u32, link_fi: i64) -> String {
    use base64::Engine;
    let mut bytes = [0u8; 16];
    bytes[0..4].copy_from_slice(&mode.to_le_bytes());
    bytes[4..8].copy_from_slice(&nlink.to_le_bytes());
    bytes[8..16].copy_from_slice(&link_fi.to_le_bytes());
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn sample_rows_file() -> NamedTempFile {
    let dir_stat = encode_lstat(0o040755, 2, 0);
    let file_stat = encode_lstat(0o100644, 1, 0);
    write_rows(&format!(
        "/\t\t0\t1\t{dir_stat}\t0\t0\t0\n/etc/\thosts\t3\t1\t{file_stat}\t0\t0\t0\n/etc/\tmotd\t4\t1\t{file_stat}\t0\t0\t0\n"
    ))
}

#[test]
fn build_reports_node_count() {
    let rows = sample_rows_file();
    Command::cargo_bin("restore-tree-demo")
        .unwrap()
        .arg("build")
        .arg(rows.path())
        .assert()
        .success()
        .stdout(contains("nodes"));
}

#[test]
fn bsr_emits_expected_fields() {
    let rows = sample_rows_file();
    let mut volumes = NamedTempFile::new().unwrap();
    volumes
        .write_all(b"1\tVol-0001\tLTO8\tDrive-0\t\t42\t1700000000\t0\t3\t0\t9000\n")
        .unwrap();

    Command::cargo_bin("restore-tree-demo")
        .unwrap()
        .args(["bsr", "--mark", "/etc/hosts"])
        .arg(rows.path())
        .arg(volumes.path())
        .assert()
        .success()
        .stdout(contains("FileIndex=3"))
        .stdout(contains("Volume=Vol-0001"));
}

#[test]
fn browse_script_drives_mark_and_lsmark() {
    let rows = sample_rows_file();
    let script = write_rows("cd /etc\nmark hosts\nlsmark\n");

    Command::cargo_bin("restore-tree-demo")
        .unwrap()
        .arg("browse")
        .arg(rows.path())
        .arg(script.path())
        .assert()
        .success()
        .stdout(contains("/etc/hosts"));
}

#[test]
fn malformed_row_is_reported_not_a_panic() {
    let bad = write_rows("not enough fields\n");
    Command::cargo_bin("restore-tree-demo")
        .unwrap()
        .arg("build")
        .arg(bad.path())
        .assert()
        .failure();
}
