use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

use serde::Serialize;
use tempfile::Builder;

use crate::app::{NoProgress, ProgressEvent, ProgressSink};
use crate::config::DEFAULT_DOWNLOAD_WORKERS;
use crate::domain::{Assignment, FailurePolicy, IdentifierMap, SubmissionAttachment};
use crate::error::GraderError;
use crate::lms::LmsClient;
use crate::reconcile::attachment_file_name;

pub const CHUNK_SIZE: usize = 8192;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingDownload {
    pub remote_url: String,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DownloadReport {
    pub planned: usize,
    pub downloaded: Vec<PathBuf>,
    pub failures: Vec<String>,
}

pub struct Downloader<'a, C: LmsClient + ?Sized> {
    client: &'a C,
    workers: usize,
    policy: FailurePolicy,
    sink: &'a dyn ProgressSink,
}

impl<'a, C: LmsClient + ?Sized> Downloader<'a, C> {
    pub fn new(client: &'a C) -> Self {
        Self {
            client,
            workers: DEFAULT_DOWNLOAD_WORKERS,
            policy: FailurePolicy::FailFast,
            sink: &NoProgress,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_progress(mut self, sink: &'a dyn ProgressSink) -> Self {
        self.sink = sink;
        self
    }

    pub fn download_submissions(
        &self,
        assignment: &Assignment,
        map: &IdentifierMap,
        destination: &Path,
    ) -> Result<DownloadReport, GraderError> {
        let pending = self.plan(assignment, map, destination)?;
        self.fetch_all(&pending)
    }

    /// Walks every submissions page, following `next` links until none remain.
    pub fn collect_attachments(&self, assignment: &Assignment) -> Result<Vec<SubmissionAttachment>, GraderError> {
        assignment.ensure_individual()?;
        let mut attachments = Vec::new();
        let mut page: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let current = self.client.list_submissions_page(assignment, page.as_deref())?;
            pages += 1;
            for submission in current.submissions {
                attachments.extend(submission.attachments);
            }
            match current.next {
                Some(next) if page.as_deref() == Some(next.as_str()) => {
                    tracing::warn!(%next, "submissions page links to itself; stopping");
                    break;
                }
                Some(next) => page = Some(next),
                None => break,
            }
        }
        tracing::info!(pages, attachments = attachments.len(), "listed submissions");
        Ok(attachments)
    }

    pub fn plan(
        &self,
        assignment: &Assignment,
        map: &IdentifierMap,
        destination: &Path,
    ) -> Result<Vec<PendingDownload>, GraderError> {
        self.sink.event(ProgressEvent::phase("Resolve", "listing submissions"));
        let attachments = self.collect_attachments(assignment)?;
        Ok(attachments
            .iter()
            .map(|attachment| PendingDownload {
                remote_url: attachment.remote_url.clone(),
                destination: destination.join(attachment_file_name(map, attachment)),
            })
            .collect())
    }

    pub fn fetch_all(&self, pending: &[PendingDownload]) -> Result<DownloadReport, GraderError> {
        let total = pending.len();
        self.sink.event(ProgressEvent::phase(
            "Transfer",
            &format!("downloading {total} files with {} workers", self.workers),
        ));

        let queue = Mutex::new(pending.iter().enumerate().collect::<VecDeque<_>>());
        let results: Mutex<Vec<(usize, Result<PathBuf, GraderError>)>> =
            Mutex::new(Vec::with_capacity(total));
        let abort = AtomicBool::new(false);
        let completed = AtomicUsize::new(0);

        thread::scope(|scope| {
            for _ in 0..self.workers.min(total) {
                scope.spawn(|| {
                    loop {
                        if abort.load(Ordering::SeqCst) {
                            break;
                        }
                        let next = match queue.lock() {
                            Ok(mut queue) => queue.pop_front(),
                            Err(_) => None,
                        };
                        let Some((index, item)) = next else {
                            break;
                        };
                        let result = self.fetch_one(item);
                        if let Err(err) = &result {
                            tracing::warn!(url = %item.remote_url, "download failed: {err}");
                            if self.policy == FailurePolicy::FailFast {
                                abort.store(true, Ordering::SeqCst);
                            }
                        }
                        let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                        self.sink.event(ProgressEvent::progress("download", done, total));
                        if let Ok(mut results) = results.lock() {
                            results.push((index, result));
                        }
                    }
                });
            }
        });

        let results = results
            .into_inner()
            .map_err(|_| GraderError::Filesystem("download worker panicked".to_string()))?;

        let mut report = DownloadReport {
            planned: total,
            ..DownloadReport::default()
        };
        let mut first_error = None;
        let mut ordered = Vec::with_capacity(results.len());
        for (index, result) in results {
            match result {
                Ok(path) => ordered.push((index, path)),
                Err(err) => {
                    report.failures.push(err.to_string());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }
        ordered.sort_by_key(|(index, _)| *index);
        report.downloaded = ordered.into_iter().map(|(_, path)| path).collect();

        if self.policy == FailurePolicy::FailFast {
            if let Some(err) = first_error {
                return Err(err);
            }
        }
        tracing::info!(
            downloaded = report.downloaded.len(),
            failed = report.failures.len(),
            "download batch finished"
        );
        Ok(report)
    }

    /// Fetches the LMS bulk submissions zip into `destination`.
    pub fn fetch_archive(&self, assignment: &Assignment, destination: &Path) -> Result<PathBuf, GraderError> {
        assignment.ensure_individual()?;
        let url = assignment.submissions_download_url.clone().ok_or_else(|| {
            GraderError::UnexpectedResponse(format!(
                "assignment '{}' has no submissions download url",
                assignment.name
            ))
        })?;
        self.fetch_one(&PendingDownload {
            remote_url: url,
            destination: destination.to_path_buf(),
        })
    }

    fn fetch_one(&self, item: &PendingDownload) -> Result<PathBuf, GraderError> {
        let failed = |message: String| GraderError::DownloadFailed {
            url: item.remote_url.clone(),
            message,
        };
        let parent = item
            .destination
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|err| failed(err.to_string()))?;

        let mut reader = self
            .client
            .open_attachment(&item.remote_url)
            .map_err(|err| failed(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("cheesegrader-download")
            .tempfile_in(parent)
            .map_err(|err| failed(err.to_string()))?;

        let mut buffer = [0u8; CHUNK_SIZE];
        loop {
            let read = reader.read(&mut buffer).map_err(|err| failed(err.to_string()))?;
            if read == 0 {
                break;
            }
            temp.write_all(&buffer[..read])
                .map_err(|err| failed(err.to_string()))?;
        }
        temp.persist(&item.destination)
            .map_err(|err| failed(err.to_string()))?;
        tracing::debug!(path = %item.destination.display(), "downloaded");
        Ok(item.destination.clone())
    }
}
