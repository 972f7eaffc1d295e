use std::fs;
use std::path::{Path, PathBuf};

use crate::error::GraderError;
use crate::reconcile::{IdentifierMatcher, SubstringMatcher};

/// Finds files whose names match an identifier across a list of directories.
pub struct FileLocator {
    matcher: Box<dyn IdentifierMatcher>,
    recursive: bool,
}

impl Default for FileLocator {
    fn default() -> Self {
        Self::new(Box::new(SubstringMatcher))
    }
}

impl FileLocator {
    pub fn new(matcher: Box<dyn IdentifierMatcher>) -> Self {
        Self {
            matcher,
            recursive: false,
        }
    }

    /// Also descend into subdirectories, depth-first after each directory's own files.
    pub fn recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    /// Matches in directory order, then directory enumeration order.
    pub fn find(&self, directories: &[PathBuf], identifier: &str) -> Result<Vec<PathBuf>, GraderError> {
        let mut found = Vec::new();
        for dir in directories {
            if !dir.is_dir() {
                return Err(GraderError::InvalidPath(dir.clone()));
            }
            self.scan(dir, identifier, &mut found)?;
        }
        Ok(found)
    }

    fn scan(&self, dir: &Path, identifier: &str, found: &mut Vec<PathBuf>) -> Result<(), GraderError> {
        let entries = fs::read_dir(dir).map_err(|err| {
            GraderError::Filesystem(format!("read dir {}: {err}", dir.display()))
        })?;
        let mut subdirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| GraderError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                if self.recursive {
                    subdirs.push(path);
                }
                continue;
            }
            let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if self.matcher.matches(name, identifier) {
                found.push(path);
            }
        }
        for subdir in subdirs {
            self.scan(&subdir, identifier, found)?;
        }
        Ok(())
    }
}
