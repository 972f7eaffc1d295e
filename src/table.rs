use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Read;
use std::path::Path;

use crate::domain::GradeEntry;
use crate::error::GraderError;

pub const ID_COLUMN: &str = "id";
pub const GRADE_COLUMN: &str = "grade";

const BOM: char = '\u{feff}';

pub type Row = BTreeMap<String, String>;

/// A CSV file held in memory, rows keyed by header name.
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn read(path: &Path) -> Result<Self, GraderError> {
        if !path.is_file() {
            return Err(GraderError::InvalidPath(path.to_path_buf()));
        }
        let file = fs::File::open(path)
            .map_err(|err| GraderError::Filesystem(format!("open {}: {err}", path.display())))?;
        let table = Self::from_reader(file)?;
        tracing::debug!(path = %path.display(), rows = table.rows.len(), "read csv");
        Ok(table)
    }

    pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, GraderError> {
        let mut content = String::new();
        reader
            .read_to_string(&mut content)
            .map_err(|err| GraderError::Csv(err.to_string()))?;
        let content = content.strip_prefix(BOM).unwrap_or(&content);

        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(content.as_bytes());
        let headers: Vec<String> = csv_reader
            .headers()
            .map_err(|err| GraderError::Csv(err.to_string()))?
            .iter()
            .map(|header| header.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(|err| GraderError::Csv(err.to_string()))?;
            let row = headers
                .iter()
                .enumerate()
                .map(|(index, header)| {
                    let value = record.get(index).unwrap_or("").trim().to_string();
                    (header.clone(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(Self { headers, rows })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|header| header == name)
    }

    pub fn require_column(&self, name: &str) -> Result<(), GraderError> {
        if self.has_column(name) {
            Ok(())
        } else {
            Err(GraderError::MissingColumn(name.to_string()))
        }
    }

    /// Renames header `from` to `to` in place. Used when a sheet calls its
    /// id or grade column something else.
    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<(), GraderError> {
        if from == to {
            return self.require_column(from);
        }
        self.require_column(from)?;
        for header in &mut self.headers {
            if header == from {
                *header = to.to_string();
            }
        }
        for row in &mut self.rows {
            if let Some(value) = row.remove(from) {
                row.insert(to.to_string(), value);
            }
        }
        Ok(())
    }

    pub fn column(&self, name: &str) -> Result<Vec<String>, GraderError> {
        self.require_column(name)?;
        Ok(self
            .rows
            .iter()
            .map(|row| row.get(name).cloned().unwrap_or_default())
            .collect())
    }

    /// Non-blank values of the id column, in row order.
    pub fn ids(&self, id_column: &str) -> Result<Vec<String>, GraderError> {
        Ok(self
            .column(id_column)?
            .into_iter()
            .filter(|id| !id.is_empty())
            .collect())
    }

    pub fn grade_entries(&self, id_column: &str, grade_column: &str) -> Result<Vec<GradeEntry>, GraderError> {
        self.require_column(id_column)?;
        self.require_column(grade_column)?;
        let mut entries = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let id = row.get(id_column).cloned().unwrap_or_default();
            if id.is_empty() {
                continue;
            }
            let raw = row.get(grade_column).map(String::as_str).unwrap_or("");
            entries.push(GradeEntry {
                grade: parse_grade(&id, raw),
                id,
            });
        }
        Ok(entries)
    }

    /// `(name, folder)` pairs for directory sorting; rows with either cell blank are skipped.
    /// A repeated name keeps its first position and takes the folder of its last row.
    pub fn sort_map(&self, name_column: &str, folder_column: &str) -> Result<Vec<(String, String)>, GraderError> {
        self.require_column(name_column)?;
        self.require_column(folder_column)?;
        let mut mapping: Vec<(String, String)> = Vec::with_capacity(self.rows.len());
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (index, row) in self.rows.iter().enumerate() {
            let name = row.get(name_column).map(String::as_str).unwrap_or("");
            let folder = row.get(folder_column).map(String::as_str).unwrap_or("");
            if name.is_empty() || folder.is_empty() {
                tracing::warn!(row = index + 1, "blank sort entry skipped");
                continue;
            }
            match positions.get(name) {
                Some(&position) => {
                    tracing::warn!(row = index + 1, %name, "repeated sort entry overrides earlier folder");
                    mapping[position].1 = folder.to_string();
                }
                None => {
                    positions.insert(name, mapping.len());
                    mapping.push((name.to_string(), folder.to_string()));
                }
            }
        }
        Ok(mapping)
    }
}

fn parse_grade(id: &str, raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<f64>() {
        Ok(grade) if grade.is_finite() => Some(grade),
        _ => {
            tracing::warn!(%id, value = raw, "unparsable grade");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bom_is_stripped_from_first_header() {
        let table = Table::from_reader("\u{feff}id,grade\nab1,90\n".as_bytes()).unwrap();
        assert_eq!(table.headers(), ["id", "grade"]);
        assert_eq!(table.column("id").unwrap(), vec!["ab1"]);
    }

    #[test]
    fn grades_parse_blank_and_garbage_as_missing() {
        assert_eq!(parse_grade("a", " 87.5 "), Some(87.5));
        assert_eq!(parse_grade("a", ""), None);
        assert_eq!(parse_grade("a", "absent"), None);
        assert_eq!(parse_grade("a", "NaN"), None);
    }
}
