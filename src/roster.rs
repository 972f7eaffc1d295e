use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{Course, IdentifierMap, Roster};
use crate::error::GraderError;
use crate::lms::LmsClient;

pub const STUDENT_LIST_COLUMNS: [&str; 8] = [
    "sis_user_id",
    "id",
    "integration_id",
    "name",
    "sortable_name",
    "fname",
    "lname",
    "utorid",
];

pub fn fetch_roster<C: LmsClient + ?Sized>(client: &C, course: &Course) -> Result<Roster, GraderError> {
    let records = client.list_students(course.id)?;
    let fetched = records.len();
    let roster = Roster::from_records(records);
    tracing::info!(
        course = %course.id,
        fetched,
        unique = roster.len(),
        "fetched roster"
    );
    Ok(roster)
}

pub fn build_identifier_map(roster: &Roster) -> IdentifierMap {
    IdentifierMap::from_roster(roster)
}

pub fn student_list_path(dir: &Path, course: &Course) -> PathBuf {
    dir.join(format!("{}_student_list.csv", course.id))
}

/// `"Last, First"` -> `("First", "Last")`.
pub fn split_sortable_name(sortable_name: &str) -> Option<(String, String)> {
    let (last, first) = sortable_name.split_once(", ")?;
    Some((first.to_string(), last.to_string()))
}

pub fn write_student_list(roster: &Roster, destination: &Path) -> Result<usize, GraderError> {
    if let Some(parent) = destination.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| GraderError::Filesystem(err.to_string()))?;
        }
    }
    let mut writer =
        csv::Writer::from_path(destination).map_err(|err| GraderError::Csv(err.to_string()))?;
    writer
        .write_record(STUDENT_LIST_COLUMNS)
        .map_err(|err| GraderError::Csv(err.to_string()))?;

    for student in roster.students() {
        let sis = student.sis_id.clone().unwrap_or_default();
        let (fname, lname) = split_sortable_name(&student.sortable_name).unwrap_or_default();
        writer
            .write_record([
                sis.as_str(),
                student.internal_id.as_str(),
                student.integration_id.as_deref().unwrap_or(""),
                student.display_name.as_str(),
                student.sortable_name.as_str(),
                fname.as_str(),
                lname.as_str(),
                sis.as_str(),
            ])
            .map_err(|err| GraderError::Csv(err.to_string()))?;
    }
    writer
        .flush()
        .map_err(|err| GraderError::Filesystem(err.to_string()))?;
    Ok(roster.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sortable_name_splits_on_comma_space() {
        assert_eq!(
            split_sortable_name("Lovelace, Ada"),
            Some(("Ada".to_string(), "Lovelace".to_string()))
        );
        assert_eq!(split_sortable_name("Prince"), None);
    }
}
