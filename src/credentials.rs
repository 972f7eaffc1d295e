use std::fmt;
use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use tempfile::Builder;

use crate::config::ResolvedConfig;
use crate::error::GraderError;

pub const TOKEN_FILE_NAME: &str = ".cheesegrader_token";
pub const TOKEN_ENV_VAR: &str = "CG_TOKEN";

/// Bearer token handed to the HTTP client. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Result<Self, GraderError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(GraderError::MissingToken);
        }
        Ok(Self { token })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenFile {
    token: String,
}

// The token is stored as plain JSON in the home directory. Anyone who can
// read that file can act as the instructor against the LMS.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: Utf8PathBuf,
}

impl TokenStore {
    pub fn new() -> Result<Self, GraderError> {
        let path = BaseDirs::new()
            .and_then(|dirs| Utf8PathBuf::from_path_buf(dirs.home_dir().join(TOKEN_FILE_NAME)).ok())
            .ok_or_else(|| {
                GraderError::Filesystem("unable to resolve home directory".to_string())
            })?;
        Ok(Self { path })
    }

    pub fn with_path(path: Utf8PathBuf) -> Self {
        Self { path }
    }

    /// `token_file` from the config when set, the home directory otherwise.
    pub fn for_config(config: &ResolvedConfig) -> Result<Self, GraderError> {
        match &config.token_file {
            Some(path) => Utf8PathBuf::from_path_buf(path.clone())
                .map(Self::with_path)
                .map_err(GraderError::InvalidPath),
            None => Self::new(),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.as_std_path().exists()
    }

    pub fn load(&self) -> Result<Option<Credentials>, GraderError> {
        if !self.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(self.path.as_std_path())
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        let parsed: TokenFile = match serde_json::from_str(&content) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(path = %self.path, "ignoring unreadable token file: {err}");
                return Ok(None);
            }
        };
        Ok(Credentials::new(parsed.token).ok())
    }

    pub fn save(&self, credentials: &Credentials) -> Result<(), GraderError> {
        let parent = self
            .path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or_else(|| Utf8Path::new("."));
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        let content = serde_json::to_vec(&TokenFile {
            token: credentials.token().to_string(),
        })
        .map_err(|err| GraderError::Filesystem(err.to_string()))?;

        let mut temp = Builder::new()
            .prefix("cheesegrader-token")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        temp.write_all(&content)
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        temp.persist(self.path.as_std_path())
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        tracing::info!(path = %self.path, "saved API token");
        Ok(())
    }

    pub fn delete(&self) -> Result<bool, GraderError> {
        if !self.exists() {
            return Ok(false);
        }
        fs::remove_file(self.path.as_std_path())
            .map_err(|err| GraderError::Filesystem(err.to_string()))?;
        Ok(true)
    }
}
