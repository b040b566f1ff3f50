//! Hosted authentication
//!
//! Email/password accounts with Argon2id password hashes, the signed-in
//! identity, and an auth-state stream that publishes every sign-in,
//! sign-out and profile change.

use crate::config::MIN_PASSWORD_LENGTH;
use crate::error::{AppError, Result};
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::Utc;
use rand::rngs::OsRng;
use rand::RngCore;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

const SALT_SIZE: usize = 16; // 128 bits

/// Identity of a signed-in account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(FromRow)]
struct AccountRow {
    uid: String,
    email: String,
    password_hash: String,
    display_name: Option<String>,
    photo_url: Option<String>,
}

impl From<AccountRow> for AuthUser {
    fn from(row: AccountRow) -> Self {
        AuthUser {
            uid: row.uid,
            email: row.email,
            display_name: row.display_name,
            photo_url: row.photo_url,
        }
    }
}

/// Hash a password into a PHC string using Argon2id
fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);

    let salt_string = SaltString::encode_b64(&salt)
        .map_err(|e| AppError::Generic(format!("Salt encoding failed: {}", e)))?;

    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt_string)
        .map_err(|e| AppError::Generic(format!("Password hashing failed: {}", e)))?;

    Ok(hash.to_string())
}

fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(stored_hash)
        .map_err(|e| AppError::Generic(format!("Stored password hash is invalid: {}", e)))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(AppError::Auth(format!("Invalid email address: {}", email))),
    }
}

fn check_password_strength(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Auth(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(())
}

/// Authentication service
#[derive(Clone)]
pub struct AuthService {
    pool: SqlitePool,
    current: Arc<watch::Sender<Option<AuthUser>>>,
}

impl AuthService {
    pub fn new(pool: SqlitePool) -> Self {
        let (current, _) = watch::channel(None);
        Self {
            pool,
            current: Arc::new(current),
        }
    }

    /// Stream of auth-state changes. The current value is the signed-in user.
    pub fn subscribe(&self) -> watch::Receiver<Option<AuthUser>> {
        self.current.subscribe()
    }

    pub fn current_user(&self) -> Option<AuthUser> {
        self.current.borrow().clone()
    }

    fn publish(&self, user: Option<AuthUser>) {
        self.current.send_replace(user);
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountRow>> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT uid, email, password_hash, display_name, photo_url
            FROM accounts WHERE email = ?
            "#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn find_by_uid(&self, uid: &str) -> Result<AccountRow> {
        sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT uid, email, password_hash, display_name, photo_url
            FROM accounts WHERE uid = ?
            "#,
        )
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::Auth(format!("Account not found: {}", uid)))
    }

    /// Create an account without signing it in
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<AuthUser> {
        let email = normalize_email(email)?;
        check_password_strength(password)?;

        if self.find_by_email(&email).await?.is_some() {
            return Err(AppError::Auth(format!("Email already in use: {}", email)));
        }

        let uid = Uuid::new_v4().simple().to_string();
        let password_hash = hash_password(password)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO accounts (uid, email, password_hash, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&uid)
        .bind(&email)
        .bind(&password_hash)
        .bind(display_name)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::info!("Created account: {}", uid);

        Ok(AuthUser {
            uid,
            email,
            display_name: display_name.map(str::to_string),
            photo_url: None,
        })
    }

    /// Make a freshly created account the signed-in user
    pub(crate) fn start_session(&self, user: AuthUser) {
        tracing::info!("Session started for: {}", user.uid);
        self.publish(Some(user));
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let email = normalize_email(email)?;

        let row = self
            .find_by_email(&email)
            .await?
            .ok_or_else(|| AppError::Auth("Invalid email or password".to_string()))?;

        if !verify_password(password, &row.password_hash)? {
            tracing::warn!("Failed sign-in attempt for: {}", email);
            return Err(AppError::Auth("Invalid email or password".to_string()));
        }

        let user = AuthUser::from(row);
        tracing::info!("Signed in: {}", user.uid);
        self.publish(Some(user.clone()));

        Ok(user)
    }

    pub fn sign_out(&self) {
        if let Some(user) = self.current_user() {
            tracing::info!("Signed out: {}", user.uid);
        }
        self.publish(None);
    }

    /// Update the signed-in user's display name and/or photo URL
    pub async fn update_profile(
        &self,
        display_name: Option<&str>,
        photo_url: Option<&str>,
    ) -> Result<AuthUser> {
        let current = self
            .current_user()
            .ok_or_else(|| AppError::Auth("Not signed in".to_string()))?;

        sqlx::query(
            r#"
            UPDATE accounts SET
                display_name = COALESCE(?, display_name),
                photo_url = COALESCE(?, photo_url),
                updated_at = ?
            WHERE uid = ?
            "#,
        )
        .bind(display_name)
        .bind(photo_url)
        .bind(Utc::now())
        .bind(&current.uid)
        .execute(&self.pool)
        .await?;

        let user = AuthUser::from(self.find_by_uid(&current.uid).await?);
        tracing::debug!("Updated auth profile: {}", user.uid);
        self.publish(Some(user.clone()));

        Ok(user)
    }

    /// Change the signed-in user's password after re-checking the current one.
    ///
    /// Re-authentication is an addition over a plain session-only update.
    pub async fn change_password(&self, current_password: &str, new_password: &str) -> Result<()> {
        let current = self
            .current_user()
            .ok_or_else(|| AppError::Auth("Not signed in".to_string()))?;

        let row = self.find_by_uid(&current.uid).await?;
        if !verify_password(current_password, &row.password_hash)? {
            return Err(AppError::Auth("Current password is incorrect".to_string()));
        }

        check_password_strength(new_password)?;
        let password_hash = hash_password(new_password)?;

        sqlx::query("UPDATE accounts SET password_hash = ?, updated_at = ? WHERE uid = ?")
            .bind(password_hash)
            .bind(Utc::now())
            .bind(&current.uid)
            .execute(&self.pool)
            .await?;

        tracing::info!("Password changed for: {}", current.uid);
        Ok(())
    }
}
