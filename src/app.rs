use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;

use crate::config::ResolvedConfig;
use crate::domain::{
    Assignment, AssignmentId, Course, CourseId, FailurePolicy, Roster, UploadMode,
};
use crate::download::{DownloadReport, Downloader};
use crate::error::GraderError;
use crate::file_ops::{self, RenameReport};
use crate::lms::LmsClient;
use crate::locate::FileLocator;
use crate::roster;
use crate::table::{GRADE_COLUMN, ID_COLUMN, Table};
use crate::upload::{UploadReport, Uploader, locate_files};

#[derive(Debug, Clone, Copy)]
pub enum ProgressSinkKind {
    Upload,
    Download,
    StudentList,
    Rename,
    Local,
}

impl ProgressSinkKind {
    pub fn title(self) -> &'static str {
        match self {
            ProgressSinkKind::Upload => "upload",
            ProgressSinkKind::Download => "download",
            ProgressSinkKind::StudentList => "student list",
            ProgressSinkKind::Rename => "rename",
            ProgressSinkKind::Local => "files",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

impl ProgressEvent {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            elapsed: None,
        }
    }

    /// `phase=Resolve; listing submissions`
    pub fn phase(phase: &str, message: &str) -> Self {
        Self::new(format!("phase={phase}; {message}"))
    }

    /// `progress=grades 3/40`
    pub fn progress(label: &str, done: usize, total: usize) -> Self {
        Self::new(format!("progress={label} {done}/{total}"))
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = Some(elapsed);
        self
    }
}

/// Download workers report through the same sink concurrently.
pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub course: CourseId,
    pub assignment: AssignmentId,
    pub mode: UploadMode,
    pub csv: PathBuf,
    pub id_column: String,
    pub grade_column: String,
    pub directories: Vec<PathBuf>,
    pub recursive: bool,
    pub policy: Option<FailurePolicy>,
}

impl UploadRequest {
    pub fn new(course: CourseId, assignment: AssignmentId, mode: UploadMode, csv: PathBuf) -> Self {
        Self {
            course,
            assignment,
            mode,
            csv,
            id_column: ID_COLUMN.to_string(),
            grade_column: GRADE_COLUMN.to_string(),
            directories: Vec::new(),
            recursive: false,
            policy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub course: CourseId,
    pub assignment: AssignmentId,
    pub destination: PathBuf,
    pub archive: bool,
    pub policy: Option<FailurePolicy>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    pub course: String,
    pub assignment: String,
    pub mode: UploadMode,
    pub grades: Option<UploadReport>,
    pub files: Option<UploadReport>,
    pub errors: Vec<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub course: String,
    pub assignment: String,
    pub destination: String,
    pub report: Option<DownloadReport>,
    pub archive: Option<String>,
    pub extracted: Option<usize>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentListResult {
    pub course: String,
    pub path: String,
    pub students: usize,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenameResult {
    pub course: String,
    pub directory: String,
    pub report: RenameReport,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TokenCheckResult {
    pub base_url: String,
    pub valid: bool,
    pub generated_at: String,
}

/// Remote workflows. Every value the LMS returns is fetched once here and
/// passed down explicitly.
#[derive(Clone)]
pub struct App<C: LmsClient> {
    client: C,
    config: ResolvedConfig,
}

impl<C: LmsClient> App<C> {
    pub fn new(client: C, config: ResolvedConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn check_token(&self) -> Result<TokenCheckResult, GraderError> {
        let valid = self.client.validate_token()?;
        Ok(TokenCheckResult {
            base_url: self.config.base_url.clone(),
            valid,
            generated_at: now(),
        })
    }

    pub fn load_course(&self, course: CourseId, sink: &dyn ProgressSink) -> Result<Course, GraderError> {
        sink.event(ProgressEvent::phase("Resolve", &format!("loading course {course}")));
        let course = self.client.get_course(course)?;
        tracing::info!(course = %course.id, name = %course.name, "loaded course");
        Ok(course)
    }

    pub fn load_assignment(
        &self,
        course: &Course,
        assignment: AssignmentId,
        sink: &dyn ProgressSink,
    ) -> Result<Assignment, GraderError> {
        sink.event(ProgressEvent::phase("Resolve", &format!("loading assignment {assignment}")));
        let assignment = self.client.get_assignment(course.id, assignment)?;
        tracing::info!(
            assignment = %assignment.id,
            name = %assignment.name,
            group = assignment.is_group(),
            "loaded assignment"
        );
        Ok(assignment)
    }

    pub fn load_roster(&self, course: &Course, sink: &dyn ProgressSink) -> Result<Roster, GraderError> {
        sink.event(ProgressEvent::phase("Roster", &format!("fetching students of {}", course.name)));
        let roster = roster::fetch_roster(&self.client, course)?;
        sink.event(ProgressEvent::phase("Roster", &format!("{} students", roster.len())));
        Ok(roster)
    }

    pub fn upload(&self, request: &UploadRequest, sink: &dyn ProgressSink) -> Result<UploadResult, GraderError> {
        let mut table = Table::read(&request.csv)?;
        table.rename_column(&request.id_column, ID_COLUMN)?;
        if request.mode.includes_grades() {
            table.rename_column(&request.grade_column, GRADE_COLUMN)?;
        }
        if request.mode.includes_files() && request.directories.is_empty() {
            return Err(GraderError::Validation(
                "file upload needs at least one directory".to_string(),
            ));
        }
        // Local inputs are checked before anything is written remotely.
        let grade_entries = if request.mode.includes_grades() {
            Some(table.grade_entries(ID_COLUMN, GRADE_COLUMN)?)
        } else {
            None
        };
        let file_entries = if request.mode.includes_files() {
            let locator =
                FileLocator::new(self.config.match_policy.matcher()).recursive(request.recursive);
            Some(locate_files(&locator, &table.ids(ID_COLUMN)?, &request.directories)?)
        } else {
            None
        };

        let started = Instant::now();
        let course = self.load_course(request.course, sink)?;
        let assignment = self.load_assignment(&course, request.assignment, sink)?;
        let policy = request.policy.unwrap_or(self.config.upload_failure_policy);
        let uploader = Uploader::new(&self.client, &assignment)?
            .with_policy(policy)
            .with_progress(sink);

        let grades = if let Some(entries) = grade_entries {
            sink.event(ProgressEvent::phase("Upload", &format!("posting {} grades", entries.len())));
            Some(uploader.bulk_upload_grades(&entries))
        } else {
            None
        };

        let files = if let Some(entries) = file_entries {
            sink.event(ProgressEvent::phase(
                "Upload",
                &format!("uploading files for {} students", entries.len()),
            ));
            Some(uploader.bulk_upload_files(&entries))
        } else {
            None
        };

        let errors: Vec<String> = grades
            .iter()
            .chain(files.iter())
            .flat_map(|report| report.errors.iter().cloned())
            .collect();
        sink.event(
            ProgressEvent::phase("Done", &format!("{} errors", errors.len()))
                .with_elapsed(started.elapsed()),
        );
        Ok(UploadResult {
            course: course.id.to_string(),
            assignment: assignment.id.to_string(),
            mode: request.mode,
            grades,
            files,
            errors,
            generated_at: now(),
        })
    }

    /// Attachments land in `{destination}/{course}_{assignment}_submissions`.
    pub fn download_submissions(
        &self,
        request: &DownloadRequest,
        sink: &dyn ProgressSink,
    ) -> Result<DownloadResult, GraderError> {
        let started = Instant::now();
        let course = self.load_course(request.course, sink)?;
        let assignment = self.load_assignment(&course, request.assignment, sink)?;
        assignment.ensure_individual()?;
        let destination = submissions_dir(&request.destination, &course, &assignment);

        let downloader = Downloader::new(&self.client)
            .with_workers(self.config.download_workers)
            .with_policy(request.policy.unwrap_or(self.config.download_failure_policy))
            .with_progress(sink);

        if request.archive {
            sink.event(ProgressEvent::phase("Transfer", "fetching submissions archive"));
            let zip_path = destination.with_extension("zip");
            let archive = downloader.fetch_archive(&assignment, &zip_path)?;
            sink.event(ProgressEvent::phase("Extract", &format!("unpacking {}", archive.display())));
            let extracted = file_ops::extract_zip(&archive, &destination)?;
            return Ok(DownloadResult {
                course: course.id.to_string(),
                assignment: assignment.id.to_string(),
                destination: destination.display().to_string(),
                report: None,
                archive: Some(archive.display().to_string()),
                extracted: Some(extracted),
                generated_at: now(),
            });
        }

        let roster = self.load_roster(&course, sink)?;
        let map = roster::build_identifier_map(&roster);
        let report = downloader.download_submissions(&assignment, &map, &destination)?;
        sink.event(
            ProgressEvent::phase(
                "Done",
                &format!("{} of {} files", report.downloaded.len(), report.planned),
            )
            .with_elapsed(started.elapsed()),
        );
        Ok(DownloadResult {
            course: course.id.to_string(),
            assignment: assignment.id.to_string(),
            destination: destination.display().to_string(),
            report: Some(report),
            archive: None,
            extracted: None,
            generated_at: now(),
        })
    }

    pub fn download_student_list(
        &self,
        course: CourseId,
        output_dir: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<StudentListResult, GraderError> {
        let course = self.load_course(course, sink)?;
        let roster = self.load_roster(&course, sink)?;
        let path = roster::student_list_path(output_dir, &course);
        sink.event(ProgressEvent::phase("Write", &format!("{}", path.display())));
        let students = roster::write_student_list(&roster, &path)?;
        Ok(StudentListResult {
            course: course.id.to_string(),
            path: path.display().to_string(),
            students,
            generated_at: now(),
        })
    }

    pub fn rename_submissions(
        &self,
        course: CourseId,
        directory: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<RenameResult, GraderError> {
        let course = self.load_course(course, sink)?;
        let roster = self.load_roster(&course, sink)?;
        let map = roster::build_identifier_map(&roster);
        sink.event(ProgressEvent::phase("Rename", &format!("{}", directory.display())));
        let report = file_ops::rename_identifiers(directory, &map)?;
        tracing::info!(
            renamed = report.renamed.len(),
            unmatched = report.unmatched.len(),
            "renamed files"
        );
        Ok(RenameResult {
            course: course.id.to_string(),
            directory: directory.display().to_string(),
            report,
            generated_at: now(),
        })
    }
}

pub fn submissions_dir(root: &Path, course: &Course, assignment: &Assignment) -> PathBuf {
    root.join(format!("{}_{}_submissions", course.id, assignment.id))
}

#[derive(Debug, Clone)]
pub struct SortRequest {
    pub csv: PathBuf,
    pub name_column: String,
    pub folder_column: String,
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub csv: PathBuf,
    pub name_fields: Vec<String>,
    pub source_file: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortResult {
    pub copied: usize,
    pub missing: Vec<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CopyResult {
    pub written: Vec<String>,
    pub generated_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnzipResult {
    pub archive: String,
    pub destination: String,
    pub extracted: usize,
    pub generated_at: String,
}

pub fn sort_directory(
    request: &SortRequest,
    config: &ResolvedConfig,
    sink: &dyn ProgressSink,
) -> Result<SortResult, GraderError> {
    let table = Table::read(&request.csv)?;
    let mapping = table.sort_map(&request.name_column, &request.folder_column)?;
    sink.event(ProgressEvent::phase("Sort", &format!("{} entries", mapping.len())));
    let matcher = config.match_policy.matcher();
    let report =
        file_ops::sort_files_with(&request.source, &request.destination, &mapping, matcher.as_ref())?;
    Ok(SortResult {
        copied: report.copied.len(),
        missing: report.missing,
        generated_at: now(),
    })
}

pub fn copy_template(request: &CopyRequest, sink: &dyn ProgressSink) -> Result<CopyResult, GraderError> {
    let table = Table::read(&request.csv)?;
    for field in &request.name_fields {
        table.require_column(field)?;
    }
    sink.event(ProgressEvent::phase("Copy", &format!("{} copies", table.len())));
    let written = file_ops::copy_rename(
        &request.source_file,
        table.rows(),
        &request.name_fields,
        &request.destination,
    )?;
    Ok(CopyResult {
        written: written.iter().map(|path| path.display().to_string()).collect(),
        generated_at: now(),
    })
}

pub fn unzip(archive: &Path, destination: &Path, sink: &dyn ProgressSink) -> Result<UnzipResult, GraderError> {
    sink.event(ProgressEvent::phase("Extract", &format!("{}", archive.display())));
    let extracted = file_ops::extract_zip(archive, destination)?;
    Ok(UnzipResult {
        archive: archive.display().to_string(),
        destination: destination.display().to_string(),
        extracted,
        generated_at: now(),
    })
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

/// Human-readable lines for a finished workflow.
pub trait Outcome: Serialize {
    fn summary(&self) -> Vec<String>;
}

impl Outcome for UploadResult {
    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "course {} assignment {} ({})",
            self.course, self.assignment, self.mode
        )];
        if let Some(grades) = &self.grades {
            lines.push(format!("grades posted: {}", grades.succeeded.len()));
        }
        if let Some(files) = &self.files {
            lines.push(format!("files uploaded: {}", files.succeeded.len()));
        }
        if self.errors.is_empty() {
            lines.push("no errors".to_string());
        } else {
            lines.push(format!("{} errors:", self.errors.len()));
            lines.extend(self.errors.iter().map(|err| format!("  {err}")));
        }
        lines
    }
}

impl Outcome for DownloadResult {
    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("saved to {}", self.destination)];
        if let Some(report) = &self.report {
            lines.push(format!(
                "downloaded {} of {} files",
                report.downloaded.len(),
                report.planned
            ));
            lines.extend(report.failures.iter().map(|failure| format!("  {failure}")));
        }
        if let Some(extracted) = self.extracted {
            lines.push(format!("extracted {extracted} files"));
        }
        lines
    }
}

impl Outcome for StudentListResult {
    fn summary(&self) -> Vec<String> {
        vec![format!("saved {} students to {}", self.students, self.path)]
    }
}

impl Outcome for RenameResult {
    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "renamed {} files, {} without a known id",
            self.report.renamed.len(),
            self.report.unmatched.len()
        )];
        lines.extend(
            self.report
                .conflicts
                .iter()
                .map(|name| format!("  skipped (target exists): {name}")),
        );
        lines
    }
}

impl Outcome for TokenCheckResult {
    fn summary(&self) -> Vec<String> {
        let state = if self.valid { "valid" } else { "rejected" };
        vec![format!("token {state} for {}", self.base_url)]
    }
}

impl Outcome for SortResult {
    fn summary(&self) -> Vec<String> {
        let mut lines = vec![format!("copied {} files", self.copied)];
        lines.extend(self.missing.iter().map(|name| format!("  no files matched: {name}")));
        lines
    }
}

impl Outcome for CopyResult {
    fn summary(&self) -> Vec<String> {
        vec![format!("wrote {} files", self.written.len())]
    }
}

impl Outcome for UnzipResult {
    fn summary(&self) -> Vec<String> {
        vec![format!("extracted {} files to {}", self.extracted, self.destination)]
    }
}
