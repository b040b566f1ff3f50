//! Profile service
//!
//! Lets the signed-in user edit their display name, bio and avatar, and
//! change their password.

use crate::access::{self, Screen};
use crate::database::{Repository, UpdateUserRequest};
use crate::error::{AppError, Result};
use crate::session::{Profile, SessionContext};
use crate::storage::blob_store::profile_image_path;
use crate::storage::{BlobStore, Upload};

/// Fields on the profile form. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub display_name: Option<String>,
    pub bio: Option<String>,
}

#[derive(Clone)]
pub struct ProfileService {
    repo: Repository,
    blobs: BlobStore,
    session: SessionContext,
}

impl ProfileService {
    pub fn new(repo: Repository, blobs: BlobStore, session: SessionContext) -> Self {
        Self {
            repo,
            blobs,
            session,
        }
    }

    /// Write the profile to both the auth account and the user document
    pub async fn update_profile(&self, update: ProfileUpdate, avatar: Option<Upload>) -> Result<Profile> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Profile)?;

        let display_name = match update.display_name {
            Some(name) if name.trim().is_empty() => {
                return Err(AppError::Validation("Display name cannot be empty".to_string()))
            }
            Some(name) => Some(name.trim().to_string()),
            None => None,
        };

        let photo_url = match avatar {
            Some(upload) => {
                let path = profile_image_path(&profile.uid, &upload.file_name);
                Some(self.blobs.upload(&path, &upload.data).await?)
            }
            None => None,
        };

        tracing::info!("Updating profile of {}", profile.uid);

        self.repo
            .update_user(
                &profile.uid,
                UpdateUserRequest {
                    display_name: display_name.clone(),
                    photo_url: photo_url.clone(),
                    bio: update.bio,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to update profile of {}: {}", profile.uid, e);
                e
            })?;

        self.session
            .auth()
            .update_profile(display_name.as_deref(), photo_url.as_deref())
            .await?;

        self.session
            .refresh()
            .await?
            .profile
            .ok_or_else(|| AppError::Auth("Not signed in".to_string()))
    }

    /// Change the password after confirming the current one.
    ///
    /// The hosted backend only needs a signed-in session to set a new
    /// password. Requiring the current password is an addition on top of that.
    pub async fn update_password(
        &self,
        current_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        let profile = self.session.require_profile()?;

        if new_password != confirm_password {
            return Err(AppError::Validation("New passwords don't match".to_string()));
        }

        self.session
            .auth()
            .change_password(current_password, new_password)
            .await
            .map_err(|e| {
                tracing::error!("Failed to update password of {}: {}", profile.uid, e);
                e
            })
    }
}
