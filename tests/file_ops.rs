use std::fs;
use std::io::Write;

use assert_matches::assert_matches;
use zip::write::SimpleFileOptions;

use cheesegrader::domain::{IdentifierMap, Roster, StudentRecord};
use cheesegrader::error::GraderError;
use cheesegrader::file_ops::{copy_rename, extract_zip, rename_identifiers, sort_files, sort_files_with};
use cheesegrader::reconcile::ExactStemMatcher;
use cheesegrader::table::Row;

fn row(pairs: &[(&str, &str)]) -> Row {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn sort_reports_names_without_files() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("in");
    let dest = temp.path().join("out");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("alice_hw1.pdf"), b"a").unwrap();

    let missing = sort_files(
        &source,
        &dest,
        &[
            ("alice".to_string(), "TA1".to_string()),
            ("bob".to_string(), "TA2".to_string()),
        ],
    )
    .unwrap();

    assert_eq!(missing, vec!["bob"]);
    assert!(dest.join("TA1/alice_hw1.pdf").is_file());
    assert!(dest.join("TA2").is_dir());
}

#[test]
fn sort_copies_shared_matches_into_every_folder() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("in");
    fs::create_dir_all(source.join("nested")).unwrap();
    fs::write(source.join("alice_bob.pdf"), b"x").unwrap();
    fs::write(source.join("nested/alice_2.pdf"), b"x").unwrap();
    let dest = temp.path().join("out");

    let missing = sort_files(
        &source,
        &dest,
        &[
            ("alice".to_string(), "A".to_string()),
            ("bob".to_string(), "B".to_string()),
        ],
    )
    .unwrap();

    assert!(missing.is_empty());
    assert!(dest.join("A/alice_bob.pdf").is_file());
    assert!(dest.join("B/alice_bob.pdf").is_file());
    assert!(!dest.join("A/alice_2.pdf").exists());
}

#[test]
fn sort_accepts_a_stricter_matcher() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("in");
    fs::create_dir_all(&source).unwrap();
    fs::write(source.join("ab12.pdf"), b"x").unwrap();

    let report = sort_files_with(
        &source,
        &temp.path().join("out"),
        &[("ab1".to_string(), "T".to_string())],
        &ExactStemMatcher,
    )
    .unwrap();

    assert_eq!(report.missing, vec!["ab1"]);
    assert!(report.copied.is_empty());
}

#[test]
fn copy_rename_builds_lowercase_names() {
    let temp = tempfile::tempdir().unwrap();
    let template = temp.path().join("Rubric.docx");
    fs::write(&template, b"template").unwrap();
    let dest = temp.path().join("copies");

    let written = copy_rename(
        &template,
        &[
            row(&[("last", "Van Dyke"), ("id", "vd1")]),
            row(&[("last", "Ng"), ("id", "NG2")]),
        ],
        &["last".to_string(), "id".to_string()],
        &dest,
    )
    .unwrap();

    assert_eq!(
        written,
        vec![dest.join("van_dyke_vd1_rubric.docx"), dest.join("ng_ng2_rubric.docx")]
    );
    assert_eq!(fs::read(&written[0]).unwrap(), b"template");
}

#[test]
fn copy_rename_needs_every_field() {
    let temp = tempfile::tempdir().unwrap();
    let template = temp.path().join("r.txt");
    fs::write(&template, b"x").unwrap();

    let result = copy_rename(
        &template,
        &[row(&[("id", "a")])],
        &["section".to_string()],
        temp.path(),
    );

    assert_matches!(result, Err(GraderError::MissingColumn(column)) if column == "section");
}

#[test]
fn internal_ids_become_sis_ids() {
    let temp = tempfile::tempdir().unwrap();
    fs::write(temp.path().join("lab1_123_essay.pdf"), b"x").unwrap();
    fs::write(temp.path().join("lab1_1234_essay.pdf"), b"x").unwrap();
    let roster = Roster::from_records(vec![StudentRecord {
        internal_id: "123".to_string(),
        sis_id: Some("ab1".to_string()),
        integration_id: None,
        display_name: "Ada".to_string(),
        sortable_name: "Ada".to_string(),
    }]);

    let report = rename_identifiers(temp.path(), &IdentifierMap::from_roster(&roster)).unwrap();

    assert_eq!(
        report.renamed,
        vec![("lab1_123_essay.pdf".to_string(), "lab1_ab1_essay.pdf".to_string())]
    );
    assert_eq!(report.unmatched, vec!["lab1_1234_essay.pdf"]);
    assert!(temp.path().join("lab1_ab1_essay.pdf").is_file());
}

#[test]
fn zip_entries_are_extracted() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("subs.zip");
    {
        let file = fs::File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.add_directory("nested/", options).unwrap();
        writer.start_file("nested/a.txt", options).unwrap();
        writer.write_all(b"hello").unwrap();
        writer.start_file("b.txt", options).unwrap();
        writer.write_all(b"world").unwrap();
        writer.finish().unwrap();
    }

    let out = temp.path().join("out");
    let count = extract_zip(&archive, &out).unwrap();

    assert_eq!(count, 2);
    assert_eq!(fs::read_to_string(out.join("nested/a.txt")).unwrap(), "hello");
    assert_eq!(fs::read_to_string(out.join("b.txt")).unwrap(), "world");
}

#[test]
fn zip_slip_entries_are_rejected() {
    let temp = tempfile::tempdir().unwrap();
    let archive = temp.path().join("evil.zip");
    {
        let file = fs::File::create(&archive).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("../escape.txt", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"x").unwrap();
        writer.finish().unwrap();
    }

    let result = extract_zip(&archive, &temp.path().join("out"));

    assert_matches!(result, Err(GraderError::Filesystem(_)));
    assert!(!temp.path().join("escape.txt").exists());
}
