use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::app::{NoProgress, ProgressEvent, ProgressSink};
use crate::domain::{Assignment, FailurePolicy, FileBatchEntry, GradeEntry};
use crate::error::GraderError;
use crate::lms::LmsClient;
use crate::locate::FileLocator;

/// Grades go to the LMS with exactly one decimal digit, rounded from the
/// exact binary value: 72.45 is posted as "72.5", 0.15 as "0.1".
pub fn format_grade(grade: f64) -> String {
    format!("{grade:.1}")
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UploadReport {
    pub succeeded: Vec<String>,
    pub errors: Vec<String>,
    pub stopped_early: bool,
}

impl UploadReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Sequential grade posts and comment file uploads for one assignment.
pub struct Uploader<'a, C: LmsClient + ?Sized> {
    client: &'a C,
    assignment: &'a Assignment,
    policy: FailurePolicy,
    sink: &'a dyn ProgressSink,
}

impl<'a, C: LmsClient + ?Sized> Uploader<'a, C> {
    pub fn new(client: &'a C, assignment: &'a Assignment) -> Result<Self, GraderError> {
        assignment.ensure_individual()?;
        Ok(Self {
            client,
            assignment,
            policy: FailurePolicy::Continue,
            sink: &NoProgress,
        })
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn bulk_upload_grades(&self, grades: &[GradeEntry]) -> UploadReport {
        let mut report = UploadReport::default();
        let total = grades.len();
        for (index, entry) in grades.iter().enumerate() {
            self.sink.event(ProgressEvent::progress("grades", index + 1, total));
            let Some(grade) = entry.grade else {
                tracing::warn!(id = %entry.id, "missing grade");
                report.errors.push(format!("{}: Missing grade", entry.id));
                if self.stop(&mut report) {
                    break;
                }
                continue;
            };
            let formatted = format_grade(grade);
            match self.client.post_grade(self.assignment, &entry.id, &formatted) {
                Ok(()) => {
                    tracing::info!(id = %entry.id, grade = %formatted, "posted grade");
                    report.succeeded.push(entry.id.clone());
                }
                Err(err) => {
                    tracing::warn!(id = %entry.id, "grade post failed: {err}");
                    report
                        .errors
                        .push(format!("{}: Missing student or post failed", entry.id));
                    if self.stop(&mut report) {
                        break;
                    }
                }
            }
        }
        report
    }

    pub fn bulk_upload_files(&self, files: &[FileBatchEntry]) -> UploadReport {
        let mut report = UploadReport::default();
        let total = files.len();
        'entries: for (index, entry) in files.iter().enumerate() {
            self.sink.event(ProgressEvent::progress("files", index + 1, total));
            if entry.files.is_empty() {
                tracing::warn!(id = %entry.id, "no files found");
                report
                    .errors
                    .push(format!("{}: No files found for upload", entry.id));
                if self.stop(&mut report) {
                    break;
                }
                continue;
            }
            for path in &entry.files {
                let file_name = display_file_name(path);
                match self.upload_file(&entry.id, path) {
                    Ok(file_id) => {
                        tracing::info!(id = %entry.id, file = %file_name, file_id, "uploaded file");
                        report.succeeded.push(format!("{}: {}", entry.id, file_name));
                    }
                    Err(err) => {
                        tracing::warn!(id = %entry.id, file = %file_name, "upload failed: {err}");
                        report
                            .errors
                            .push(format!("{}: Upload failed for {}", entry.id, file_name));
                        if self.stop(&mut report) {
                            break 'entries;
                        }
                    }
                }
            }
        }
        report
    }

    /// Request a pre-signed target, post the bytes, then link the file id
    /// as a submission comment. A failure after step 2 leaves the uploaded
    /// file orphaned on the LMS.
    pub fn upload_file(&self, sis_id: &str, path: &Path) -> Result<u64, GraderError> {
        let file_name = display_file_name(path);
        let size = fs::metadata(path)
            .map_err(|err| GraderError::Filesystem(format!("stat {}: {err}", path.display())))?
            .len();
        let ticket = self
            .client
            .request_comment_upload(self.assignment, sis_id, &file_name, size)?;
        let file_id = self.client.send_upload(&ticket, path)?;
        self.client
            .attach_comment_files(self.assignment, sis_id, &[file_id])?;
        Ok(file_id)
    }

    fn stop(&self, report: &mut UploadReport) -> bool {
        if self.policy == FailurePolicy::FailFast {
            report.stopped_early = true;
            return true;
        }
        false
    }
}

pub fn locate_files(
    locator: &FileLocator,
    ids: &[String],
    directories: &[PathBuf],
) -> Result<Vec<FileBatchEntry>, GraderError> {
    ids.iter()
        .map(|id| {
            Ok(FileBatchEntry {
                id: id.clone(),
                files: locator.find(directories, id)?,
            })
        })
        .collect()
}

fn display_file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
