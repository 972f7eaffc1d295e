mod common;

use std::fs;
use std::time::Duration;

use assert_matches::assert_matches;

use cheesegrader::domain::{
    AssignmentKind, FailurePolicy, FileBatchEntry, IdentifierMap, Roster, Submission,
};
use cheesegrader::download::{Downloader, PendingDownload};
use cheesegrader::error::GraderError;
use cheesegrader::upload::Uploader;

use common::{MockLms, assignment, attachment, student};

fn submission(user_id: &str, files: &[(&str, &str)]) -> Submission {
    Submission {
        user_id: user_id.to_string(),
        attachments: files
            .iter()
            .map(|(name, url)| attachment(user_id, name, url))
            .collect(),
    }
}

#[test]
fn follows_every_page_and_names_by_sis_id() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::with_students(vec![student("11", Some("ab1"), "Ada")]);
    lms.pages = vec![
        vec![submission("11", &[("essay.pdf", "mock://1")])],
        vec![submission("99", &[("notes:v2.txt", "mock://2")])],
    ];
    lms.bodies.insert("mock://1".to_string(), b"essay".to_vec());
    let map = IdentifierMap::from_roster(&Roster::from_records(lms.students.clone()));

    let report = Downloader::new(&lms)
        .download_submissions(&assignment(AssignmentKind::Individual), &map, temp.path())
        .unwrap();

    assert_eq!(report.planned, 2);
    assert_eq!(
        report.downloaded,
        vec![temp.path().join("ab1_essay.pdf"), temp.path().join("99_notes_v2.txt")]
    );
    assert_eq!(fs::read(temp.path().join("ab1_essay.pdf")).unwrap(), b"essay");
    assert_eq!(
        lms.calls(),
        vec!["list_submissions first", "list_submissions page-1"]
    );
}

#[test]
fn at_most_ten_fetches_in_flight() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::default();
    lms.fetch_delay = Duration::from_millis(20);
    let pending: Vec<PendingDownload> = (0..25)
        .map(|i| PendingDownload {
            remote_url: format!("mock://{i}"),
            destination: temp.path().join(format!("file-{i}")),
        })
        .collect();

    let report = Downloader::new(&lms).fetch_all(&pending).unwrap();

    assert_eq!(report.downloaded.len(), 25);
    assert!(lms.max_in_flight() <= 10, "saw {}", lms.max_in_flight());
    assert!(lms.max_in_flight() > 1);
    assert_eq!(report.downloaded[24], temp.path().join("file-24"));
}

#[test]
fn fail_fast_returns_the_download_error() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::default();
    lms.failing_urls.insert("mock://bad".to_string());
    let pending = vec![PendingDownload {
        remote_url: "mock://bad".to_string(),
        destination: temp.path().join("bad"),
    }];

    let result = Downloader::new(&lms).fetch_all(&pending);

    assert_matches!(result, Err(GraderError::DownloadFailed { url, .. }) if url == "mock://bad");
    assert!(!temp.path().join("bad").exists());
}

#[test]
fn continue_policy_reports_every_failure() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::default();
    lms.failing_urls.insert("mock://bad-1".to_string());
    lms.failing_urls.insert("mock://bad-2".to_string());
    let pending: Vec<PendingDownload> = ["mock://bad-1", "mock://ok", "mock://bad-2"]
        .iter()
        .enumerate()
        .map(|(i, url)| PendingDownload {
            remote_url: url.to_string(),
            destination: temp.path().join(format!("f{i}")),
        })
        .collect();

    let report = Downloader::new(&lms)
        .with_workers(1)
        .with_policy(FailurePolicy::Continue)
        .fetch_all(&pending)
        .unwrap();

    assert_eq!(report.downloaded, vec![temp.path().join("f1")]);
    assert_eq!(report.failures.len(), 2);
}

#[test]
fn fail_fast_with_one_worker_stops_dispatching() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::default();
    lms.failing_urls.insert("mock://0".to_string());
    let pending: Vec<PendingDownload> = (0..5)
        .map(|i| PendingDownload {
            remote_url: format!("mock://{i}"),
            destination: temp.path().join(format!("f{i}")),
        })
        .collect();

    let result = Downloader::new(&lms).with_workers(1).fetch_all(&pending);

    assert!(result.is_err());
    assert_eq!(*lms.opened.lock().unwrap(), vec!["mock://0"]);
}

#[test]
fn group_assignment_downloads_are_refused() {
    let lms = MockLms::default();
    let result = Downloader::new(&lms).collect_attachments(&assignment(AssignmentKind::Group));
    assert_matches!(result, Err(GraderError::UnsupportedGroupAssignment { .. }));
    assert!(lms.calls().is_empty());
}

#[test]
fn uploaded_file_comes_back_under_the_same_identifier() {
    let temp = tempfile::tempdir().unwrap();
    let source = temp.path().join("ab1_rubric.pdf");
    fs::write(&source, b"rubric").unwrap();
    let lms = MockLms::with_students(vec![student("11", Some("ab1"), "Ada")]);
    let assignment = assignment(AssignmentKind::Individual);

    let report = Uploader::new(&lms, &assignment)
        .unwrap()
        .bulk_upload_files(&[FileBatchEntry {
            id: "ab1".to_string(),
            files: vec![source],
        }]);
    assert!(report.is_clean());

    let out = temp.path().join("out");
    let map = IdentifierMap::from_roster(&Roster::from_records(lms.students.clone()));
    let downloaded = Downloader::new(&lms)
        .download_submissions(&assignment, &map, &out)
        .unwrap();

    assert_eq!(downloaded.downloaded.len(), 1);
    let name = downloaded.downloaded[0]
        .file_name()
        .unwrap()
        .to_string_lossy()
        .into_owned();
    assert!(name.contains("ab1"), "{name}");
    assert_eq!(name, "ab1_ab1_rubric.pdf");
}

#[test]
fn archive_is_streamed_to_the_destination() {
    let temp = tempfile::tempdir().unwrap();
    let mut lms = MockLms::default();
    lms.bodies
        .insert("mock://archive.zip".to_string(), vec![7u8; 20_000]);

    let path = Downloader::new(&lms)
        .fetch_archive(
            &assignment(AssignmentKind::Individual),
            &temp.path().join("nested/all.zip"),
        )
        .unwrap();

    assert_eq!(fs::read(path).unwrap().len(), 20_000);
}
