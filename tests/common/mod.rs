#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use modmap::alignment::AlignmentRecord;

fn snapshot_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("snapshots")
}

pub fn assert_golden(name: &str, actual: &str) {
    let path = snapshot_root().join(name);
    if std::env::var("MODMAP_UPDATE_SNAPSHOTS").is_ok() {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create snapshot directory");
        }
        fs::write(&path, actual).expect("write snapshot");
        return;
    }

    let expected = fs::read_to_string(&path).unwrap_or_else(|err| {
        panic!(
            "golden file {} is unreadable ({err}); run with MODMAP_UPDATE_SNAPSHOTS=1 to record it",
            path.display()
        )
    });
    let (expected, actual) = (normalize(&expected), normalize(actual));
    if let Some((line_no, (want, got))) = expected
        .lines()
        .zip(actual.lines())
        .enumerate()
        .find(|(_, (want, got))| want != got)
    {
        panic!(
            "{} differs at line {}:\n  golden: {want}\n  output: {got}",
            path.display(),
            line_no + 1
        );
    }
    assert_eq!(
        expected.lines().count(),
        actual.lines().count(),
        "{} and the output differ in line count",
        path.display()
    );
}

fn normalize(input: &str) -> String {
    input.replace("\r\n", "\n")
}

/// Build a SAM record from its core fields and optional tags.
pub fn sam_record(name: &str, flag: u16, pos: u64, cigar: &str, seq: &str, tags: &[&str]) -> AlignmentRecord {
    let mut line = format!("{name}\t{flag}\tchr1\t{pos}\t60\t{cigar}\t*\t0\t0\t{seq}\t*");
    for tag in tags {
        line.push('\t');
        line.push_str(tag);
    }
    AlignmentRecord::from_sam_line(&line).expect("valid SAM line")
}
