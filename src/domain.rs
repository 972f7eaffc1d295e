use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::GraderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(u64);

impl CourseId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CourseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CourseId {
    type Err = GraderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| GraderError::InvalidCourseId(value.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssignmentId(u64);

impl AssignmentId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for AssignmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssignmentId {
    type Err = GraderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| GraderError::InvalidAssignmentId(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Course {
    pub id: CourseId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentKind {
    Individual,
    Group,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assignment {
    pub id: AssignmentId,
    pub course_id: CourseId,
    pub name: String,
    pub kind: AssignmentKind,
    pub submissions_download_url: Option<String>,
}

impl Assignment {
    pub fn is_group(&self) -> bool {
        self.kind == AssignmentKind::Group
    }

    /// Upload and download paths only handle individual submissions.
    pub fn ensure_individual(&self) -> Result<(), GraderError> {
        match self.kind {
            AssignmentKind::Individual => Ok(()),
            AssignmentKind::Group => Err(GraderError::UnsupportedGroupAssignment {
                assignment: self.name.clone(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StudentRecord {
    pub internal_id: String,
    pub sis_id: Option<String>,
    pub integration_id: Option<String>,
    pub display_name: String,
    pub sortable_name: String,
}

impl StudentRecord {
    /// SIS id, or the internal id when the LMS has none on file.
    pub fn lookup_key(&self) -> &str {
        match self.sis_id.as_deref() {
            Some(sis) if !sis.trim().is_empty() => sis,
            _ => &self.internal_id,
        }
    }
}

/// Enrolled students of one course, first occurrence of each internal id kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Roster {
    students: Vec<StudentRecord>,
}

impl Roster {
    pub fn from_records(records: Vec<StudentRecord>) -> Self {
        let mut seen = HashSet::new();
        let students = records
            .into_iter()
            .filter(|record| seen.insert(record.internal_id.clone()))
            .collect();
        Self { students }
    }

    pub fn students(&self) -> &[StudentRecord] {
        &self.students
    }

    pub fn len(&self) -> usize {
        self.students.len()
    }

    pub fn is_empty(&self) -> bool {
        self.students.is_empty()
    }
}

/// internal id -> SIS id (falls back to the internal id).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IdentifierMap {
    entries: BTreeMap<String, String>,
}

impl IdentifierMap {
    pub fn from_roster(roster: &Roster) -> Self {
        let entries = roster
            .students()
            .iter()
            .map(|student| {
                (
                    student.internal_id.clone(),
                    student.lookup_key().to_string(),
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, internal_id: &str) -> Option<&str> {
        self.entries.get(internal_id).map(String::as_str)
    }

    pub fn contains(&self, internal_id: &str) -> bool {
        self.entries.contains_key(internal_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(internal, sis)| (internal.as_str(), sis.as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubmissionAttachment {
    pub remote_url: String,
    pub display_name: String,
    pub owning_submission_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    pub user_id: String,
    pub attachments: Vec<SubmissionAttachment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GradeEntry {
    pub id: String,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBatchEntry {
    pub id: String,
    pub files: Vec<std::path::PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum UploadMode {
    Grades,
    Files,
    Both,
}

impl UploadMode {
    pub fn includes_grades(self) -> bool {
        matches!(self, UploadMode::Grades | UploadMode::Both)
    }

    pub fn includes_files(self) -> bool {
        matches!(self, UploadMode::Files | UploadMode::Both)
    }
}

impl fmt::Display for UploadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadMode::Grades => write!(f, "grades"),
            UploadMode::Files => write!(f, "files"),
            UploadMode::Both => write!(f, "both"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    Continue,
    FailFast,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Continue => write!(f, "continue"),
            FailurePolicy::FailFast => write!(f, "fail-fast"),
        }
    }
}
