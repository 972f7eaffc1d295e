use assert_matches::assert_matches;

use cheesegrader::domain::{AssignmentId, CourseId, IdentifierMap, Roster, StudentRecord};
use cheesegrader::error::GraderError;

fn record(internal_id: &str, sis_id: Option<&str>, name: &str) -> StudentRecord {
    StudentRecord {
        internal_id: internal_id.to_string(),
        sis_id: sis_id.map(str::to_string),
        integration_id: None,
        display_name: name.to_string(),
        sortable_name: name.to_string(),
    }
}

#[test]
fn roster_keeps_first_occurrence_of_each_id() {
    let roster = Roster::from_records(vec![
        record("1", Some("a1"), "first"),
        record("2", Some("b2"), "second"),
        record("1", Some("zz"), "duplicate"),
        record("3", None, "third"),
        record("2", None, "another duplicate"),
    ]);

    let names: Vec<&str> = roster
        .students()
        .iter()
        .map(|student| student.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["first", "second", "third"]);
}

#[test]
fn identifier_map_covers_every_student() {
    let roster = Roster::from_records(vec![
        record("1", Some("a1"), "a"),
        record("2", None, "b"),
        record("3", Some("  "), "c"),
        record("4", Some(""), "d"),
    ]);
    let map = IdentifierMap::from_roster(&roster);

    assert_eq!(map.len(), roster.len());
    for student in roster.students() {
        let expected = match student.sis_id.as_deref() {
            Some(sis) if !sis.trim().is_empty() => sis,
            _ => student.internal_id.as_str(),
        };
        assert_eq!(map.get(&student.internal_id), Some(expected));
    }
    assert_eq!(map.get("2"), Some("2"));
    assert_eq!(map.get("99"), None);
}

#[test]
fn ids_parse_from_digits_only() {
    assert_eq!("12345".parse::<CourseId>().unwrap(), CourseId::new(12345));
    assert_eq!(" 7 ".parse::<AssignmentId>().unwrap().get(), 7);
    assert_matches!("abc".parse::<CourseId>(), Err(GraderError::InvalidCourseId(_)));
    assert_matches!("-1".parse::<AssignmentId>(), Err(GraderError::InvalidAssignmentId(_)));
}
