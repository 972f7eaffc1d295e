#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use cheesegrader::domain::{
    Assignment, AssignmentId, AssignmentKind, Course, CourseId, StudentRecord, Submission,
    SubmissionAttachment,
};
use cheesegrader::error::GraderError;
use cheesegrader::lms::{LmsClient, SubmissionPage, UploadTicket};

pub const COURSE: u64 = 101;
pub const ASSIGNMENT: u64 = 7;

pub fn student(internal_id: &str, sis_id: Option<&str>, name: &str) -> StudentRecord {
    StudentRecord {
        internal_id: internal_id.to_string(),
        sis_id: sis_id.map(str::to_string),
        integration_id: None,
        display_name: name.to_string(),
        sortable_name: name.to_string(),
    }
}

pub fn course() -> Course {
    Course {
        id: CourseId::new(COURSE),
        name: "Intro to Cheese".to_string(),
    }
}

pub fn assignment(kind: AssignmentKind) -> Assignment {
    Assignment {
        id: AssignmentId::new(ASSIGNMENT),
        course_id: CourseId::new(COURSE),
        name: "Lab 1".to_string(),
        kind,
        submissions_download_url: Some("mock://archive.zip".to_string()),
    }
}

pub fn attachment(user_id: &str, name: &str, url: &str) -> SubmissionAttachment {
    SubmissionAttachment {
        remote_url: url.to_string(),
        display_name: name.to_string(),
        owning_submission_user_id: user_id.to_string(),
    }
}

/// In-memory LMS. Pages are addressed as `page-N`; comment uploads become
/// attachments on the uploader's submission so they can be listed again.
#[derive(Default)]
pub struct MockLms {
    pub students: Vec<StudentRecord>,
    pub kind: Option<AssignmentKind>,
    pub pages: Vec<Vec<Submission>>,
    pub bodies: HashMap<String, Vec<u8>>,
    pub failing_grades: HashSet<String>,
    pub failing_uploads: HashSet<String>,
    pub failing_urls: HashSet<String>,
    pub fetch_delay: Duration,
    pub token_valid: bool,

    pub calls: Mutex<Vec<String>>,
    pub posted: Mutex<Vec<(String, String)>>,
    pub linked: Mutex<Vec<(String, u64)>>,
    pub uploaded: Mutex<Vec<Submission>>,
    pub opened: Mutex<Vec<String>>,
    next_file_id: AtomicU64,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pending_names: Mutex<HashMap<String, String>>,
}

impl MockLms {
    pub fn with_students(students: Vec<StudentRecord>) -> Self {
        Self {
            students,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn posted(&self) -> Vec<(String, String)> {
        self.posted.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn internal_id_for(&self, sis_id: &str) -> Option<String> {
        self.students
            .iter()
            .find(|student| student.lookup_key() == sis_id)
            .map(|student| student.internal_id.clone())
    }
}

impl LmsClient for MockLms {
    fn get_course(&self, course: CourseId) -> Result<Course, GraderError> {
        self.record(format!("get_course {course}"));
        Ok(Course {
            id: course,
            name: "Intro to Cheese".to_string(),
        })
    }

    fn list_students(&self, course: CourseId) -> Result<Vec<StudentRecord>, GraderError> {
        self.record(format!("list_students {course}"));
        Ok(self.students.clone())
    }

    fn get_assignment(&self, course: CourseId, assignment: AssignmentId) -> Result<Assignment, GraderError> {
        self.record(format!("get_assignment {course} {assignment}"));
        let mut found = self::assignment(self.kind.unwrap_or(AssignmentKind::Individual));
        found.id = assignment;
        found.course_id = course;
        Ok(found)
    }

    fn list_submissions_page(
        &self,
        _assignment: &Assignment,
        page: Option<&str>,
    ) -> Result<SubmissionPage, GraderError> {
        self.record(format!("list_submissions {}", page.unwrap_or("first")));
        if self.pages.is_empty() {
            return Ok(SubmissionPage {
                submissions: self.uploaded.lock().unwrap().clone(),
                next: None,
            });
        }
        let index = match page {
            None => 0,
            Some(url) => url
                .strip_prefix("page-")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| GraderError::UnexpectedResponse(url.to_string()))?,
        };
        let submissions = self.pages.get(index).cloned().unwrap_or_default();
        let next = (index + 1 < self.pages.len()).then(|| format!("page-{}", index + 1));
        Ok(SubmissionPage { submissions, next })
    }

    fn post_grade(&self, _assignment: &Assignment, sis_id: &str, grade: &str) -> Result<(), GraderError> {
        self.record(format!("post_grade {sis_id}"));
        if self.failing_grades.contains(sis_id) {
            return Err(GraderError::Status {
                status: 404,
                message: "not found".to_string(),
            });
        }
        self.posted
            .lock()
            .unwrap()
            .push((sis_id.to_string(), grade.to_string()));
        Ok(())
    }

    fn request_comment_upload(
        &self,
        _assignment: &Assignment,
        sis_id: &str,
        file_name: &str,
        size: u64,
    ) -> Result<UploadTicket, GraderError> {
        self.record(format!("request_upload {sis_id} {file_name} {size}"));
        let url = format!("mock://upload/{sis_id}/{file_name}");
        self.pending_names
            .lock()
            .unwrap()
            .insert(url.clone(), file_name.to_string());
        Ok(UploadTicket {
            upload_url: url,
            upload_params: vec![("key".to_string(), "abc".to_string())],
        })
    }

    fn send_upload(&self, ticket: &UploadTicket, file: &Path) -> Result<u64, GraderError> {
        let name = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.record(format!("send_upload {name}"));
        if self.failing_uploads.contains(&name) {
            return Err(GraderError::Http("connection reset".to_string()));
        }
        let id = self.next_file_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending_names
            .lock()
            .unwrap()
            .insert(format!("file-{id}"), ticket.upload_url.clone());
        Ok(id)
    }

    fn attach_comment_files(
        &self,
        _assignment: &Assignment,
        sis_id: &str,
        file_ids: &[u64],
    ) -> Result<(), GraderError> {
        self.record(format!("attach {sis_id} {file_ids:?}"));
        let internal = self.internal_id_for(sis_id).ok_or_else(|| GraderError::Status {
            status: 404,
            message: format!("no student {sis_id}"),
        })?;
        let names = self.pending_names.lock().unwrap();
        let mut uploaded = self.uploaded.lock().unwrap();
        for id in file_ids {
            self.linked.lock().unwrap().push((sis_id.to_string(), *id));
            let display_name = names
                .get(&format!("file-{id}"))
                .and_then(|url| names.get(url))
                .cloned()
                .unwrap_or_else(|| format!("file-{id}"));
            uploaded.push(Submission {
                user_id: internal.clone(),
                attachments: vec![attachment(&internal, &display_name, &format!("mock://files/{id}"))],
            });
        }
        Ok(())
    }

    fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>, GraderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.fetch_delay.is_zero() {
            thread::sleep(self.fetch_delay);
        }
        self.opened.lock().unwrap().push(url.to_string());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_urls.contains(url) {
            return Err(GraderError::Status {
                status: 500,
                message: "boom".to_string(),
            });
        }
        let body = self
            .bodies
            .get(url)
            .cloned()
            .unwrap_or_else(|| url.as_bytes().to_vec());
        Ok(Box::new(Cursor::new(body)))
    }

    fn validate_token(&self) -> Result<bool, GraderError> {
        Ok(self.token_valid)
    }
}
