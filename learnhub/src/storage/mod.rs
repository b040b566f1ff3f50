//! Storage module
//!
//! Provides object storage for uploaded files (materials, submissions, avatars).

pub mod blob_store;

pub use blob_store::BlobStore;

/// File picked by the user for upload
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: String,
    pub data: Vec<u8>,
}

impl Upload {
    pub fn new(file_name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
        }
    }
}
