//! Users service
//!
//! Admin screen: search accounts, change roles and activate or
//! deactivate users.

use crate::access::{self, Action, Screen};
use crate::config;
use crate::database::{CreateUserRequest, Repository, Role, UpdateUserRequest, User, UserStatus};
use crate::error::{AppError, Result};
use crate::query::{ListFilter, SortOrder};
use crate::session::SessionContext;

/// Search over display name and email
pub fn user_filter(search: &str) -> ListFilter<User> {
    ListFilter::new().search(search).sort(SortOrder::TitleAsc)
}

/// Account created by an administrator
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password: String,
    pub display_name: String,
    pub role: Role,
}

#[derive(Clone)]
pub struct UsersService {
    repo: Repository,
    session: SessionContext,
}

impl UsersService {
    pub fn new(repo: Repository, session: SessionContext) -> Self {
        Self { repo, session }
    }

    fn require_admin(&self) -> Result<()> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Users)?;
        access::ensure(&profile, Action::ManageUsers, None)
    }

    pub async fn list(&self, filter: &ListFilter<User>, role: Option<Role>) -> Result<Vec<User>> {
        self.require_admin()?;

        let users = self.repo.list_users(role).await.map_err(|e| {
            tracing::error!("Failed to load users: {}", e);
            e
        })?;

        Ok(filter.apply(users))
    }

    pub async fn update_role(&self, user_id: &str, role: Role) -> Result<User> {
        self.require_admin()?;

        tracing::info!("Setting role of {} to {}", user_id, role.as_str());

        self.repo
            .update_user(
                user_id,
                UpdateUserRequest {
                    role: Some(role),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to update role of {}: {}", user_id, e);
                e
            })
    }

    pub async fn update_status(&self, user_id: &str, status: UserStatus) -> Result<User> {
        self.require_admin()?;

        tracing::info!("Setting status of {} to {:?}", user_id, status);

        self.repo
            .update_user(
                user_id,
                UpdateUserRequest {
                    status: Some(status),
                    ..Default::default()
                },
            )
            .await
    }

    /// Activate an inactive user or deactivate an active one
    pub async fn toggle_status(&self, user_id: &str) -> Result<User> {
        self.require_admin()?;

        let user = self
            .repo
            .get_user(user_id)
            .await?
            .ok_or_else(|| AppError::not_found(config::USERS, user_id))?;

        self.update_status(user_id, user.status.toggled()).await
    }

    /// Create an account and its profile without signing it in
    pub async fn create_user(&self, input: NewUser) -> Result<User> {
        self.require_admin()?;

        let display_name = input.display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name is required".to_string()));
        }

        let account = self
            .session
            .auth()
            .create_account(&input.email, &input.password, Some(display_name))
            .await?;

        let user = self
            .repo
            .create_user_profile(
                &account.uid,
                CreateUserRequest {
                    email: account.email,
                    display_name: display_name.to_string(),
                    role: input.role,
                    status: UserStatus::Active,
                    photo_url: None,
                },
            )
            .await?;

        tracing::info!("User created successfully: {}", user.id);

        Ok(user)
    }
}
