//! Hosted object storage
//!
//! Stores uploaded files (course materials, submissions, avatars,
//! thumbnails) under slash-separated object paths and hands out download
//! URLs. Each URL carries the SHA-256 of the stored bytes as its token, so
//! a re-upload to the same path yields a new URL.
//!
//! Example: "courses/c1/materials/intro.pdf" is stored at
//! "blobs/courses/c1/materials/intro.pdf"

use crate::config::{MAX_FILE_NAME_LENGTH, MAX_UPLOAD_BYTES};
use crate::error::{AppError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use url::Url;
use uuid::Uuid;

/// Path-keyed object store
#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
    base_url: String,
}

impl BlobStore {
    /// Create a new blob store at the given root directory
    pub fn new(root: PathBuf, base_url: impl Into<String>) -> Self {
        Self {
            root,
            base_url: base_url.into(),
        }
    }

    /// Initialize the blob store (create directory if needed)
    pub async fn initialize(&self) -> Result<()> {
        fs::create_dir_all(&self.root).await?;
        tracing::info!("Blob store initialized at: {:?}", self.root);
        Ok(())
    }

    /// Upload bytes to an object path, returns its download URL
    pub async fn upload(&self, object_path: &str, data: &[u8]) -> Result<String> {
        if data.len() > MAX_UPLOAD_BYTES {
            return Err(AppError::Validation(format!(
                "File is {} bytes, limit is {} bytes",
                data.len(),
                MAX_UPLOAD_BYTES
            )));
        }

        let path = self.resolve(object_path)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        // Write to a uniquely named sibling, then rename into place
        let temp_path = temp_path_for(&path);
        if let Err(e) = write_then_rename(&temp_path, &path, data).await {
            if let Err(cleanup) = fs::remove_file(&temp_path).await {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("Failed to remove temp file {:?}: {}", temp_path, cleanup);
                }
            }
            return Err(e);
        }

        tracing::debug!("Uploaded object: {} ({} bytes)", object_path, data.len());

        self.url_for(object_path, data)
    }

    /// Download URL of an existing object
    pub async fn download_url(&self, object_path: &str) -> Result<String> {
        let data = self.read(object_path).await?;
        self.url_for(object_path, &data)
    }

    /// Read an object's bytes
    pub async fn read(&self, object_path: &str) -> Result<Vec<u8>> {
        let path = self.resolve(object_path)?;

        if !fs::try_exists(&path).await? {
            return Err(AppError::BlobStore(format!("Object not found: {}", object_path)));
        }

        let data = fs::read(&path).await?;
        tracing::debug!("Read object: {} ({} bytes)", object_path, data.len());

        Ok(data)
    }

    /// Check if an object exists
    pub async fn exists(&self, object_path: &str) -> Result<bool> {
        let path = self.resolve(object_path)?;
        Ok(fs::try_exists(&path).await?)
    }

    /// Delete an object
    pub async fn delete(&self, object_path: &str) -> Result<()> {
        let path = self.resolve(object_path)?;

        if !fs::try_exists(&path).await? {
            return Ok(()); // Already deleted
        }

        fs::remove_file(&path).await?;

        tracing::debug!("Deleted object: {}", object_path);

        Ok(())
    }

    /// Map an object path onto the filesystem, rejecting traversal
    fn resolve(&self, object_path: &str) -> Result<PathBuf> {
        let mut path = self.root.clone();

        for segment in object_path.split('/') {
            if segment.is_empty()
                || segment == "."
                || segment == ".."
                || segment.contains('\\')
                || segment.contains('\0')
            {
                return Err(AppError::BlobStore(format!(
                    "Invalid object path: {:?}",
                    object_path
                )));
            }
            path.push(segment);
        }

        Ok(path)
    }

    /// Download URL: the whole object path is one escaped segment after `/o/`
    fn url_for(&self, object_path: &str, data: &[u8]) -> Result<String> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            AppError::BlobStore(format!("Invalid storage URL {:?}: {}", self.base_url, e))
        })?;

        url.path_segments_mut()
            .map_err(|_| {
                AppError::BlobStore(format!("Storage URL cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("o")
            .push(object_path);

        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("token", &calculate_hash(data));

        Ok(url.into())
    }

    /// Get blob store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Calculate SHA-256 hash of data
fn calculate_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Temp file beside `path`, unique per upload
fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
}

async fn write_then_rename(temp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
    let mut file = fs::File::create(temp_path).await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);

    fs::rename(temp_path, path).await?;
    Ok(())
}

/// Replace every character outside `[A-Za-z0-9.]` with `_`
pub fn sanitize_file_name(file_name: &str) -> String {
    file_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_FILE_NAME_LENGTH)
        .collect()
}

/// Extension after the last dot, if any
pub fn file_extension(file_name: &str) -> Option<&str> {
    file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Object path for a course material.
///
/// A display name, when given, replaces the uploaded file's name while
/// keeping its extension.
pub fn course_material_path(course_id: &str, file_name: &str, display_name: Option<&str>) -> String {
    let safe_name = match display_name {
        Some(name) => {
            let base: String = name
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .take(MAX_FILE_NAME_LENGTH)
                .collect();
            match file_extension(file_name) {
                Some(ext) => format!("{}.{}", base, ext),
                None => base,
            }
        }
        None => sanitize_file_name(file_name),
    };

    format!("courses/{}/materials/{}", course_id, safe_name)
}

/// Object path for an assignment submission, prefixed with the upload time
pub fn submission_path(
    course_id: &str,
    assessment_id: &str,
    user_id: &str,
    file_name: &str,
    uploaded_at_millis: i64,
) -> String {
    format!(
        "courses/{}/assessments/{}/submissions/{}/{}_{}",
        course_id,
        assessment_id,
        user_id,
        uploaded_at_millis,
        sanitize_file_name(file_name)
    )
}

/// Object path for a user's profile image
pub fn profile_image_path(user_id: &str, file_name: &str) -> String {
    match file_extension(file_name) {
        Some(ext) => format!("users/{}/profile.{}", user_id, sanitize_file_name(ext)),
        None => format!("users/{}/profile", user_id),
    }
}

/// Object path for a course thumbnail
pub fn course_thumbnail_path(file_name: &str, uploaded_at_millis: i64) -> String {
    format!(
        "courses/thumbnails/{}_{}",
        uploaded_at_millis,
        sanitize_file_name(file_name)
    )
}
