use std::path::PathBuf;
use std::str::FromStr;

use dialoguer::{Confirm, Input, MultiSelect, Password, Select};
use miette::IntoDiagnostic;

use crate::app::{
    self, App, CopyRequest, DownloadRequest, NoProgress, Outcome, ProgressSinkKind, SortRequest,
    UploadRequest,
};
use crate::config::ResolvedConfig;
use crate::credentials::{Credentials, TokenStore};
use crate::domain::{Assignment, AssignmentId, Course, CourseId, UploadMode};
use crate::lms::{LmsClient, LmsHttpClient};
use crate::table::{GRADE_COLUMN, ID_COLUMN, Table};
use crate::tui::Tui;

const MENU: &[&str] = &[
    "Sort files into folders",
    "Copy a file for every student",
    "Rename LMS ids to SIS ids",
    "Upload grades and files",
    "Download",
    "Manage API token",
    "Quit",
];

/// Menu-driven front-end. Each workflow prompts for its inputs, asks for
/// confirmation, then runs.
pub struct Interactive {
    config: ResolvedConfig,
    store: TokenStore,
    credentials: Option<Credentials>,
}

impl Interactive {
    pub fn new(config: ResolvedConfig, store: TokenStore, credentials: Option<Credentials>) -> Self {
        Self {
            config,
            store,
            credentials,
        }
    }

    pub fn run(mut self) -> miette::Result<()> {
        println!("Welcome to cheesegrader. Ctrl+C quits at any prompt.");
        loop {
            let choice = Select::new()
                .with_prompt("What do you want to do?")
                .items(MENU)
                .default(0)
                .interact()
                .into_diagnostic()?;
            let outcome = match choice {
                0 => self.sort(),
                1 => self.copy(),
                2 => self.rename(),
                3 => self.upload(),
                4 => self.download(),
                5 => self.manage_token(),
                _ => return Ok(()),
            };
            if let Err(report) = outcome {
                eprintln!("{report:?}");
            }
        }
    }

    /// Token from the command line, then the saved file, then a prompt.
    /// Each candidate is probed against the LMS before use.
    fn ensure_token(&mut self) -> miette::Result<Credentials> {
        if let Some(credentials) = self.credentials.clone() {
            if self.probe(&credentials)? {
                return Ok(credentials);
            }
            println!("The provided token was rejected by {}.", self.config.base_url);
            self.credentials = None;
        }
        if let Some(saved) = self.store.load()? {
            if self.probe(&saved)? {
                self.credentials = Some(saved.clone());
                return Ok(saved);
            }
            println!("The saved token at {} is no longer valid.", self.store.path());
        }
        loop {
            let raw = Password::new()
                .with_prompt("Paste your LMS API token")
                .interact()
                .into_diagnostic()?;
            let credentials = Credentials::new(raw)?;
            if !self.probe(&credentials)? {
                println!("Token rejected, try again.");
                continue;
            }
            let save = Confirm::new()
                .with_prompt(format!("Save token to {}?", self.store.path()))
                .default(true)
                .interact()
                .into_diagnostic()?;
            if save {
                self.store.save(&credentials)?;
            }
            self.credentials = Some(credentials.clone());
            return Ok(credentials);
        }
    }

    fn probe(&self, credentials: &Credentials) -> miette::Result<bool> {
        let client = LmsHttpClient::new(&self.config, credentials)?;
        Ok(client.validate_token()?)
    }

    fn app(&mut self) -> miette::Result<App<LmsHttpClient>> {
        let credentials = self.ensure_token()?;
        let client = LmsHttpClient::new(&self.config, &credentials)?;
        Ok(App::new(client, self.config.clone()))
    }

    fn manage_token(&mut self) -> miette::Result<()> {
        let items = ["Check current token", "Replace saved token", "Delete saved token", "Back"];
        let choice = Select::new()
            .with_prompt("Token")
            .items(&items)
            .default(0)
            .interact()
            .into_diagnostic()?;
        match choice {
            0 => {
                self.ensure_token()?;
                println!("Token OK for {}.", self.config.base_url);
            }
            1 => {
                self.credentials = None;
                self.store.delete()?;
                self.ensure_token()?;
            }
            2 => {
                if self.store.delete()? {
                    println!("Deleted {}.", self.store.path());
                } else {
                    println!("No saved token at {}.", self.store.path());
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn sort(&self) -> miette::Result<()> {
        let csv = ask_file("Student list CSV")?;
        let table = Table::read(&csv)?;
        let name_column = pick_column(&table, "Column holding the name to match")?;
        let folder_column = pick_column(&table, "Column holding the destination folder")?;
        let source = ask_dir("Directory with the files to sort")?;
        let destination = ask_path("Destination directory")?;

        let details = [
            format!("CSV: {}", csv.display()),
            format!("Match on: {name_column}, folder from: {folder_column}"),
            format!("From: {}", source.display()),
            format!("To: {}", destination.display()),
        ];
        if !confirm(&details)? {
            return Ok(());
        }
        let result = app::sort_directory(
            &SortRequest {
                csv,
                name_column,
                folder_column,
                source,
                destination,
            },
            &self.config,
            &NoProgress,
        )?;
        print_summary(&result);
        Ok(())
    }

    fn copy(&self) -> miette::Result<()> {
        let source_file = ask_file("File to copy")?;
        let csv = ask_file("Student list CSV")?;
        let table = Table::read(&csv)?;
        let picked = MultiSelect::new()
            .with_prompt("Columns to build the new names from (space to pick, enter to accept)")
            .items(table.headers())
            .interact()
            .into_diagnostic()?;
        if picked.is_empty() {
            println!("No columns picked.");
            return Ok(());
        }
        let name_fields: Vec<String> = picked
            .into_iter()
            .map(|index| table.headers()[index].clone())
            .collect();
        let destination = ask_path("Destination directory")?;

        let details = [
            format!("Copy: {}", source_file.display()),
            format!("Names from: {}", name_fields.join(", ")),
            format!("Rows: {}", table.len()),
            format!("To: {}", destination.display()),
        ];
        if !confirm(&details)? {
            return Ok(());
        }
        let result = app::copy_template(
            &CopyRequest {
                csv,
                name_fields,
                source_file,
                destination,
            },
            &NoProgress,
        )?;
        print_summary(&result);
        Ok(())
    }

    fn rename(&mut self) -> miette::Result<()> {
        let app = self.app()?;
        let course = ask_id::<CourseId>("Course id")?;
        let directory = ask_dir("Directory with files named by LMS id")?;
        if !confirm(&[
            format!("Course: {course}"),
            format!("Directory: {}", directory.display()),
        ])? {
            return Ok(());
        }
        let mut tui = Tui::new(ProgressSinkKind::Rename);
        let result = tui.run(move |sink| app.rename_submissions(course, &directory, sink))?;
        tui.finish(result.summary())
    }

    fn upload(&mut self) -> miette::Result<()> {
        let app = self.app()?;
        let course = ask_id::<CourseId>("Course id")?;
        let assignment = ask_id::<AssignmentId>("Assignment id")?;
        let modes = ["Grades only", "Files only", "Grades and files"];
        let mode = match Select::new()
            .with_prompt("What to upload")
            .items(&modes)
            .default(0)
            .interact()
            .into_diagnostic()?
        {
            0 => UploadMode::Grades,
            1 => UploadMode::Files,
            _ => UploadMode::Both,
        };

        let csv = ask_file("CSV with an id column")?;
        let table = Table::read(&csv)?;
        let mut request = UploadRequest::new(course, assignment, mode, csv);
        if !table.has_column(ID_COLUMN) {
            request.id_column = pick_column(&table, "No 'id' column. Which column holds SIS ids?")?;
        }
        if mode.includes_grades() && !table.has_column(GRADE_COLUMN) {
            request.grade_column = pick_column(&table, "No 'grade' column. Which column holds grades?")?;
        }
        if mode.includes_files() {
            loop {
                request.directories.push(ask_dir("Directory with student files")?);
                let more = Confirm::new()
                    .with_prompt("Add another directory?")
                    .default(false)
                    .interact()
                    .into_diagnostic()?;
                if !more {
                    break;
                }
            }
            request.recursive = Confirm::new()
                .with_prompt("Search subdirectories too?")
                .default(false)
                .interact()
                .into_diagnostic()?;
        }

        let course = app.load_course(course, &NoProgress)?;
        let assignment = app.load_assignment(&course, assignment, &NoProgress)?;
        assignment.ensure_individual()?;
        if !confirm(&upload_details(&course, &assignment, &request))? {
            return Ok(());
        }

        let mut tui = Tui::new(ProgressSinkKind::Upload);
        let result = tui.run(move |sink| app.upload(&request, sink))?;
        tui.finish(result.summary())
    }

    fn download(&mut self) -> miette::Result<()> {
        let items = ["Student list", "Submissions", "Submissions archive (zip)"];
        let choice = Select::new()
            .with_prompt("What do you want to download?")
            .items(&items)
            .default(0)
            .interact()
            .into_diagnostic()?;
        let app = self.app()?;
        let course = ask_id::<CourseId>("Course id")?;

        if choice == 0 {
            let output = ask_path("Output directory for the student list")?;
            if !confirm(&[
                format!("Course: {course}"),
                format!("Output directory: {}", output.display()),
            ])? {
                return Ok(());
            }
            let mut tui = Tui::new(ProgressSinkKind::StudentList);
            let result = tui.run(move |sink| app.download_student_list(course, &output, sink))?;
            return tui.finish(result.summary());
        }

        let assignment = ask_id::<AssignmentId>("Assignment id")?;
        let destination = ask_path("Output directory for submissions")?;
        if !confirm(&[
            format!("Course: {course}  Assignment: {assignment}"),
            format!("Output directory: {}", destination.display()),
        ])? {
            return Ok(());
        }
        let request = DownloadRequest {
            course,
            assignment,
            destination,
            archive: choice == 2,
            policy: None,
        };
        let mut tui = Tui::new(ProgressSinkKind::Download);
        let result = tui.run(move |sink| app.download_submissions(&request, sink))?;
        tui.finish(result.summary())
    }
}

fn upload_details(course: &Course, assignment: &Assignment, request: &UploadRequest) -> Vec<String> {
    let mut details = vec![
        format!("Course: {} ({})", course.name, course.id),
        format!("Assignment: {} ({})", assignment.name, assignment.id),
        format!("Upload: {}", request.mode),
        format!("CSV: {}", request.csv.display()),
    ];
    details.extend(
        request
            .directories
            .iter()
            .map(|dir| format!("Files from: {}", dir.display())),
    );
    details
}

fn ask_id<T>(prompt: &str) -> miette::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = Input::new()
        .with_prompt(prompt)
        .validate_with(|input: &String| -> Result<(), String> {
            input.trim().parse::<T>().map(|_| ()).map_err(|err| err.to_string())
        })
        .interact_text()
        .into_diagnostic()?;
    raw.trim()
        .parse::<T>()
        .map_err(|err| miette::miette!("{err}"))
}

fn ask_path(prompt: &str) -> miette::Result<PathBuf> {
    let raw: String = Input::new()
        .with_prompt(prompt)
        .interact_text()
        .into_diagnostic()?;
    Ok(PathBuf::from(clean_path(&raw)))
}

fn ask_dir(prompt: &str) -> miette::Result<PathBuf> {
    let raw: String = Input::new()
        .with_prompt(prompt)
        .validate_with(|input: &String| -> Result<(), &str> {
            if PathBuf::from(clean_path(input)).is_dir() {
                Ok(())
            } else {
                Err("not a directory")
            }
        })
        .interact_text()
        .into_diagnostic()?;
    Ok(PathBuf::from(clean_path(&raw)))
}

fn ask_file(prompt: &str) -> miette::Result<PathBuf> {
    let raw: String = Input::new()
        .with_prompt(prompt)
        .validate_with(|input: &String| -> Result<(), &str> {
            if PathBuf::from(clean_path(input)).is_file() {
                Ok(())
            } else {
                Err("not a file")
            }
        })
        .interact_text()
        .into_diagnostic()?;
    Ok(PathBuf::from(clean_path(&raw)))
}

/// Paths dragged into a terminal often arrive quoted.
fn clean_path(raw: &str) -> String {
    raw.trim().trim_matches(|ch| ch == '"' || ch == '\'').to_string()
}

fn pick_column(table: &Table, prompt: &str) -> miette::Result<String> {
    if table.headers().is_empty() {
        return Err(miette::miette!("CSV has no header row"));
    }
    let index = Select::new()
        .with_prompt(prompt)
        .items(table.headers())
        .default(0)
        .interact()
        .into_diagnostic()?;
    Ok(table.headers()[index].clone())
}

fn print_summary<T: Outcome>(result: &T) {
    for line in result.summary() {
        println!("{line}");
    }
}

fn confirm(details: &[String]) -> miette::Result<bool> {
    println!();
    for line in details {
        println!("  {line}");
    }
    Confirm::new()
        .with_prompt("Is this information correct?")
        .default(true)
        .interact()
        .into_diagnostic()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dragged_paths_lose_quotes() {
        assert_eq!(clean_path(" '/tmp/my files' "), "/tmp/my files");
        assert_eq!(clean_path("\"C:\\grades.csv\""), "C:\\grades.csv");
    }

    #[test]
    fn upload_confirmation_names_course_and_assignment() {
        use crate::domain::AssignmentKind;

        let course = Course {
            id: CourseId::new(101),
            name: "Intro to Cheese".to_string(),
        };
        let assignment = Assignment {
            id: AssignmentId::new(7),
            course_id: course.id,
            name: "Lab 1".to_string(),
            kind: AssignmentKind::Individual,
            submissions_download_url: None,
        };
        let mut request = UploadRequest::new(
            course.id,
            assignment.id,
            UploadMode::Both,
            PathBuf::from("marks.csv"),
        );
        request.directories.push(PathBuf::from("feedback"));

        let details = upload_details(&course, &assignment, &request);

        assert_eq!(details[0], "Course: Intro to Cheese (101)");
        assert_eq!(details[1], "Assignment: Lab 1 (7)");
        assert_eq!(details.last().unwrap(), "Files from: feedback");
    }
}
