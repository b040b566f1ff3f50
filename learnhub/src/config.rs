//! Application configuration
//!
//! Central location for collection names, result caps, validation
//! boundaries, and the environment-driven runtime configuration.

use std::path::PathBuf;

// ===== Collections =====

pub const USERS: &str = "users";
pub const COURSES: &str = "courses";
pub const ENROLLMENTS: &str = "enrollments";
pub const CONTENTS: &str = "contents";
pub const ASSESSMENTS: &str = "assessments";
pub const SUBMISSIONS: &str = "submissions";
pub const ANNOUNCEMENTS: &str = "announcements";
pub const MESSAGES: &str = "messages";
pub const DISCUSSIONS: &str = "discussions";
/// Sub-collection nested under each discussion document
pub const REPLIES: &str = "replies";

// ===== Result Caps =====

/// Default cap applied to list queries
pub const DEFAULT_LIST_LIMIT: usize = 50;

/// Course contents are fetched in one page
pub const CONTENTS_LIST_LIMIT: usize = 100;

/// Announcements shown on a course page
pub const ANNOUNCEMENTS_LIST_LIMIT: usize = 20;

// ===== Validation Limits =====

/// Enrollment progress is a percentage
pub const MAX_PROGRESS: u8 = 100;

/// Largest file accepted by the object store (50 MiB)
pub const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Minimum password length accepted at sign-up and password change
pub const MIN_PASSWORD_LENGTH: usize = 6;

/// Maximum length for a stored file name after sanitizing
pub const MAX_FILE_NAME_LENGTH: usize = 255;

/// Capacity of the change feed shared by live queries.
/// Listeners that fall further behind re-run their query.
pub const CHANGE_FEED_CAPACITY: usize = 1024;

// ===== Runtime Configuration =====

const DATA_DIR_ENV: &str = "LEARNHUB_DATA_DIR";
const STORAGE_URL_ENV: &str = "LEARNHUB_STORAGE_URL";
const DEFAULT_DATA_DIR: &str = "./data";
const DEFAULT_STORAGE_URL: &str = "http://localhost:9199/v0/b/learnhub";

/// Runtime configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the database file and blob storage
    pub data_dir: PathBuf,
    /// Public base URL that download links are built from
    pub storage_base_url: String,
}

impl AppConfig {
    /// Load configuration, reading a `.env` file first when present
    pub fn from_env() -> Self {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }

        let data_dir = std::env::var(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_DIR));

        let storage_base_url = std::env::var(STORAGE_URL_ENV)
            .unwrap_or_else(|_| DEFAULT_STORAGE_URL.to_string());

        Self::new(data_dir, storage_base_url)
    }

    pub fn new(data_dir: PathBuf, storage_base_url: impl Into<String>) -> Self {
        Self {
            data_dir,
            storage_base_url: storage_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("learnhub.db")
    }

    pub fn blob_dir(&self) -> PathBuf {
        self.data_dir.join("blobs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_data_dir() {
        let config = AppConfig::new(PathBuf::from("/tmp/lh"), "http://host/b/app/");
        assert_eq!(config.database_path(), PathBuf::from("/tmp/lh/learnhub.db"));
        assert_eq!(config.blob_dir(), PathBuf::from("/tmp/lh/blobs"));
        assert_eq!(config.storage_base_url, "http://host/b/app");
    }
}
