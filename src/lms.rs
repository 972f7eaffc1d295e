use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::blocking::{Client, RequestBuilder, Response, multipart};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, LINK, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;

use crate::config::ResolvedConfig;
use crate::credentials::Credentials;
use crate::domain::{
    Assignment, AssignmentId, AssignmentKind, Course, CourseId, StudentRecord, Submission,
    SubmissionAttachment,
};
use crate::error::GraderError;

pub const PER_PAGE: u32 = 100;

static NEXT_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<([^>]+)>\s*;[^,]*rel="?next"?"#).expect("next-link pattern compiles")
});

/// Pre-signed target returned by step 1 of the comment file upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTicket {
    pub upload_url: String,
    pub upload_params: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmissionPage {
    pub submissions: Vec<Submission>,
    pub next: Option<String>,
}

pub trait LmsClient: Send + Sync {
    fn get_course(&self, course: CourseId) -> Result<Course, GraderError>;

    /// Every page of the course's student list, undeduplicated.
    fn list_students(&self, course: CourseId) -> Result<Vec<StudentRecord>, GraderError>;

    fn get_assignment(&self, course: CourseId, assignment: AssignmentId) -> Result<Assignment, GraderError>;

    /// `page` is `None` for the first page, otherwise a `next` URL from a previous page.
    fn list_submissions_page(
        &self,
        assignment: &Assignment,
        page: Option<&str>,
    ) -> Result<SubmissionPage, GraderError>;

    fn post_grade(&self, assignment: &Assignment, sis_id: &str, grade: &str) -> Result<(), GraderError>;

    fn request_comment_upload(
        &self,
        assignment: &Assignment,
        sis_id: &str,
        file_name: &str,
        size: u64,
    ) -> Result<UploadTicket, GraderError>;

    /// Returns the remote file id.
    fn send_upload(&self, ticket: &UploadTicket, file: &Path) -> Result<u64, GraderError>;

    fn attach_comment_files(
        &self,
        assignment: &Assignment,
        sis_id: &str,
        file_ids: &[u64],
    ) -> Result<(), GraderError>;

    fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>, GraderError>;

    fn validate_token(&self) -> Result<bool, GraderError>;
}

#[derive(Debug, Deserialize)]
pub struct CourseWire {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StudentWire {
    pub id: Value,
    #[serde(default)]
    pub sis_user_id: Option<String>,
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub sortable_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AssignmentWire {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub group_category_id: Option<u64>,
    #[serde(default)]
    pub submissions_download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubmissionWire {
    pub user_id: Value,
    #[serde(default)]
    pub attachments: Option<Vec<AttachmentWire>>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentWire {
    pub url: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadTicketWire {
    upload_url: String,
    #[serde(default)]
    upload_params: serde_json::Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct UploadedFileWire {
    id: u64,
}

fn value_to_id(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

impl From<CourseWire> for Course {
    fn from(wire: CourseWire) -> Self {
        Course {
            id: CourseId::new(wire.id),
            name: wire.name.unwrap_or_default(),
        }
    }
}

impl From<StudentWire> for StudentRecord {
    fn from(wire: StudentWire) -> Self {
        let display_name = wire.name.unwrap_or_default();
        StudentRecord {
            internal_id: value_to_id(&wire.id),
            sis_id: wire.sis_user_id.filter(|sis| !sis.trim().is_empty()),
            integration_id: wire.integration_id,
            sortable_name: wire.sortable_name.unwrap_or_else(|| display_name.clone()),
            display_name,
        }
    }
}

impl AssignmentWire {
    pub fn into_assignment(self, course_id: CourseId) -> Assignment {
        Assignment {
            id: AssignmentId::new(self.id),
            course_id,
            name: self.name.unwrap_or_default(),
            kind: if self.group_category_id.is_some() {
                AssignmentKind::Group
            } else {
                AssignmentKind::Individual
            },
            submissions_download_url: self.submissions_download_url,
        }
    }
}

impl From<SubmissionWire> for Submission {
    fn from(wire: SubmissionWire) -> Self {
        let user_id = value_to_id(&wire.user_id);
        let attachments = wire
            .attachments
            .unwrap_or_default()
            .into_iter()
            .map(|attachment| SubmissionAttachment {
                display_name: attachment
                    .display_name
                    .or(attachment.filename)
                    .unwrap_or_else(|| "attachment".to_string()),
                remote_url: attachment.url,
                owning_submission_user_id: user_id.clone(),
            })
            .collect();
        Submission {
            user_id,
            attachments,
        }
    }
}

/// Extracts the `rel="next"` target from an RFC 8288 `Link` header.
pub fn parse_next_link(header: &str) -> Option<String> {
    NEXT_LINK
        .captures(header)
        .and_then(|caps| caps.get(1))
        .map(|target| target.as_str().to_string())
}

#[derive(Clone)]
pub struct LmsHttpClient {
    client: Client,
    upload_client: Client,
    base_url: String,
}

impl LmsHttpClient {
    pub fn new(config: &ResolvedConfig, credentials: &Credentials) -> Result<Self, GraderError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("cheesegrader/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GraderError::Http(err.to_string()))?,
        );
        let mut auth = HeaderValue::from_str(&credentials.bearer())
            .map_err(|_| GraderError::InvalidToken("token contains invalid characters".to_string()))?;
        auth.set_sensitive(true);
        let mut authed_headers = headers.clone();
        authed_headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .default_headers(authed_headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| GraderError::Http(err.to_string()))?;
        // The pre-signed upload target is often a different host; no bearer token there.
        let upload_client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|err| GraderError::Http(err.to_string()))?;

        Ok(Self {
            client,
            upload_client,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn course_url(&self, course: CourseId) -> String {
        format!("{}/courses/{}", self.base_url, course)
    }

    fn assignment_url(&self, course: CourseId, assignment: AssignmentId) -> String {
        format!("{}/assignments/{}", self.course_url(course), assignment)
    }

    fn submission_url(&self, assignment: &Assignment, sis_id: &str) -> String {
        format!(
            "{}/submissions/sis_user_id:{}",
            self.assignment_url(assignment.course_id, assignment.id),
            sis_id
        )
    }

    fn send(request: RequestBuilder) -> Result<Response, GraderError> {
        let response = request
            .send()
            .map_err(|err| GraderError::Http(err.to_string()))?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, GraderError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "LMS request failed".to_string());
        Err(GraderError::Status { status, message })
    }

    fn next_link(response: &Response) -> Option<String> {
        response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_next_link)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, GraderError> {
        tracing::debug!(%url, "GET");
        let response = Self::send(self.client.get(url))?;
        response
            .json()
            .map_err(|err| GraderError::UnexpectedResponse(err.to_string()))
    }
}

impl LmsClient for LmsHttpClient {
    fn get_course(&self, course: CourseId) -> Result<Course, GraderError> {
        let wire: CourseWire = self.get_json(&format!("{}/", self.course_url(course)))?;
        Ok(wire.into())
    }

    fn list_students(&self, course: CourseId) -> Result<Vec<StudentRecord>, GraderError> {
        let mut students = Vec::new();
        let mut url = format!("{}/students", self.course_url(course));
        let mut first = true;
        loop {
            tracing::debug!(%url, "GET students page");
            let mut request = self.client.get(&url);
            if first {
                request = request.query(&[("per_page", PER_PAGE)]);
            }
            let response = Self::send(request)?;
            let next = Self::next_link(&response);
            let page: Vec<StudentWire> = response
                .json()
                .map_err(|err| GraderError::UnexpectedResponse(err.to_string()))?;
            students.extend(page.into_iter().map(StudentRecord::from));
            match next {
                Some(next) => {
                    url = next;
                    first = false;
                }
                None => break,
            }
        }
        Ok(students)
    }

    fn get_assignment(&self, course: CourseId, assignment: AssignmentId) -> Result<Assignment, GraderError> {
        let wire: AssignmentWire = self.get_json(&self.assignment_url(course, assignment))?;
        Ok(wire.into_assignment(course))
    }

    fn list_submissions_page(
        &self,
        assignment: &Assignment,
        page: Option<&str>,
    ) -> Result<SubmissionPage, GraderError> {
        let request = match page {
            Some(url) => self.client.get(url),
            None => self
                .client
                .get(format!(
                    "{}/submissions",
                    self.assignment_url(assignment.course_id, assignment.id)
                ))
                .query(&[("per_page", PER_PAGE)]),
        };
        tracing::debug!(page = page.unwrap_or("first"), "GET submissions page");
        let response = Self::send(request)?;
        let next = Self::next_link(&response);
        let wire: Vec<SubmissionWire> = response
            .json()
            .map_err(|err| GraderError::UnexpectedResponse(err.to_string()))?;
        Ok(SubmissionPage {
            submissions: wire.into_iter().map(Submission::from).collect(),
            next,
        })
    }

    fn post_grade(&self, assignment: &Assignment, sis_id: &str, grade: &str) -> Result<(), GraderError> {
        let url = self.submission_url(assignment, sis_id);
        tracing::debug!(%url, grade, "PUT grade");
        Self::send(
            self.client
                .put(&url)
                .form(&[("submission[posted_grade]", grade)]),
        )?;
        Ok(())
    }

    fn request_comment_upload(
        &self,
        assignment: &Assignment,
        sis_id: &str,
        file_name: &str,
        size: u64,
    ) -> Result<UploadTicket, GraderError> {
        let url = format!("{}/comments/files", self.submission_url(assignment, sis_id));
        tracing::debug!(%url, file_name, size, "POST upload request");
        let size = size.to_string();
        let response = Self::send(
            self.client
                .post(&url)
                .form(&[("name", file_name), ("size", size.as_str())]),
        )?;
        let wire: UploadTicketWire = response
            .json()
            .map_err(|err| GraderError::UnexpectedResponse(err.to_string()))?;
        Ok(UploadTicket {
            upload_url: wire.upload_url,
            upload_params: wire
                .upload_params
                .iter()
                .map(|(key, value)| (key.clone(), value_to_id(value)))
                .collect(),
        })
    }

    fn send_upload(&self, ticket: &UploadTicket, file: &Path) -> Result<u64, GraderError> {
        let mut form = multipart::Form::new();
        for (key, value) in &ticket.upload_params {
            form = form.text(key.clone(), value.clone());
        }
        // The file part must come after every upload param.
        let form = form
            .file("file", file)
            .map_err(|err| GraderError::Filesystem(format!("open {}: {err}", file.display())))?;
        tracing::debug!(url = %ticket.upload_url, file = %file.display(), "POST file contents");
        let response = Self::send(self.upload_client.post(&ticket.upload_url).multipart(form))?;
        let wire: UploadedFileWire = response
            .json()
            .map_err(|err| GraderError::UnexpectedResponse(err.to_string()))?;
        Ok(wire.id)
    }

    fn attach_comment_files(
        &self,
        assignment: &Assignment,
        sis_id: &str,
        file_ids: &[u64],
    ) -> Result<(), GraderError> {
        let url = self.submission_url(assignment, sis_id);
        let mut fields: Vec<(&str, String)> = file_ids
            .iter()
            .map(|id| ("comment[file_ids][]", id.to_string()))
            .collect();
        fields.push(("comment[group_comment]", "true".to_string()));
        tracing::debug!(%url, ?file_ids, "PUT comment attachment");
        Self::send(self.client.put(&url).form(&fields))?;
        Ok(())
    }

    fn open_attachment(&self, url: &str) -> Result<Box<dyn Read + Send>, GraderError> {
        tracing::debug!(%url, "GET attachment");
        let response = Self::send(self.client.get(url))?;
        Ok(Box::new(response))
    }

    fn validate_token(&self) -> Result<bool, GraderError> {
        let url = format!("{}/courses", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| GraderError::Http(err.to_string()))?;
        let status = response.status().as_u16();
        if status != 200 {
            tracing::warn!(status, "token validation failed");
        }
        Ok(status == 200)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_link_is_found_among_relations() {
        let header = r#"<https://lms.test/api/v1/x?page=1>; rel="current", <https://lms.test/api/v1/x?page=2&per_page=100>; rel="next", <https://lms.test/api/v1/x?page=1>; rel="first""#;
        assert_eq!(
            parse_next_link(header).as_deref(),
            Some("https://lms.test/api/v1/x?page=2&per_page=100")
        );
    }

    #[test]
    fn last_page_has_no_next_link() {
        let header = r#"<https://lms.test/x?page=3>; rel="current", <https://lms.test/x?page=1>; rel="first""#;
        assert_eq!(parse_next_link(header), None);
    }

    #[test]
    fn student_wire_maps_null_sis_id() {
        let wire: StudentWire = serde_json::from_str(
            r#"{"id": 4021, "sis_user_id": null, "name": "Ada Lovelace", "sortable_name": "Lovelace, Ada"}"#,
        )
        .unwrap();
        let record = StudentRecord::from(wire);
        assert_eq!(record.internal_id, "4021");
        assert_eq!(record.sis_id, None);
        assert_eq!(record.lookup_key(), "4021");
    }

    #[test]
    fn assignment_with_group_category_is_group() {
        let wire: AssignmentWire =
            serde_json::from_str(r#"{"id": 9, "name": "Lab 1", "group_category_id": 55}"#).unwrap();
        let assignment = wire.into_assignment(CourseId::new(1));
        assert_eq!(assignment.kind, AssignmentKind::Group);
    }

    #[test]
    fn submission_attachments_carry_owner() {
        let wire: SubmissionWire = serde_json::from_str(
            r#"{"user_id": 77, "attachments": [{"url": "https://lms.test/files/1/download", "display_name": "essay.pdf"}]}"#,
        )
        .unwrap();
        let submission = Submission::from(wire);
        assert_eq!(submission.attachments.len(), 1);
        assert_eq!(submission.attachments[0].owning_submission_user_id, "77");
        assert_eq!(submission.attachments[0].display_name, "essay.pdf");
    }

    #[test]
    fn token_probe_uses_configured_timeout() {
        use std::net::TcpListener;
        use std::time::{Duration, Instant};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            // accept and never answer
            let (_stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(3));
        });

        let config = ResolvedConfig {
            base_url: format!("http://{address}"),
            timeout: Duration::from_millis(300),
            ..ResolvedConfig::default()
        };
        let client = LmsHttpClient::new(&config, &Credentials::new("t").unwrap()).unwrap();

        let started = Instant::now();
        let result = client.validate_token();

        assert!(matches!(result, Err(GraderError::Http(_))), "{result:?}");
        assert!(started.elapsed() < Duration::from_secs(3));
        server.join().unwrap();
    }

    #[test]
    fn next_link_pattern_is_reused_across_pages() {
        for page in 2..5 {
            let header = format!(r#"<https://lms.test/x?page={page}>; rel="next""#);
            assert_eq!(
                parse_next_link(&header),
                Some(format!("https://lms.test/x?page={page}"))
            );
        }
    }
}
