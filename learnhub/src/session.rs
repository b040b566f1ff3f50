//! Session context
//!
//! Mirrors the auth-state stream into application-visible state: the
//! signed-in identity, the profile record merged from the `users`
//! document, and a loading flag. The context is constructed once by
//! [`crate::app::AppState`] and handed to every service; it owns exactly
//! one subscription task, released by [`SessionContext::shutdown`] or
//! when the last clone is dropped.

use crate::auth::{AuthService, AuthUser};
use crate::database::{
    Author, CreateUserRequest, InstructorRef, Repository, Role, User, UserStatus,
};
use crate::error::{AppError, Result};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Denormalized profile of the signed-in user
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub uid: String,
    pub email: String,
    pub display_name: String,
    pub role: Role,
    pub status: UserStatus,
    pub photo_url: Option<String>,
    pub bio: Option<String>,
}

impl Profile {
    /// Merge the session identity with its profile document.
    /// Non-empty document fields win over session fields.
    pub fn merge(identity: &AuthUser, user: User) -> Self {
        let email = if user.email.is_empty() {
            identity.email.clone()
        } else {
            user.email
        };

        let display_name = if !user.display_name.is_empty() {
            user.display_name
        } else {
            identity
                .display_name
                .clone()
                .unwrap_or_else(|| email.clone())
        };

        Profile {
            uid: identity.uid.clone(),
            email,
            display_name,
            role: user.role,
            status: user.status,
            photo_url: user.photo_url.or_else(|| identity.photo_url.clone()),
            bio: user.bio,
        }
    }

    /// Author fields stamped onto posts
    pub fn author(&self) -> Author {
        Author {
            id: self.uid.clone(),
            name: self.display_name.clone(),
            avatar: self.photo_url.clone(),
        }
    }

    pub fn instructor_ref(&self) -> InstructorRef {
        InstructorRef {
            id: self.uid.clone(),
            name: self.display_name.clone(),
        }
    }
}

/// Application-visible session state
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub identity: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub loading: bool,
}

impl SessionState {
    fn initial() -> Self {
        SessionState {
            identity: None,
            profile: None,
            loading: true,
        }
    }
}

type RefreshRequest = oneshot::Sender<SessionState>;

struct Subscription(JoinHandle<()>);

impl Drop for Subscription {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Explicitly constructed session shared by all screens
#[derive(Clone)]
pub struct SessionContext {
    auth: AuthService,
    repo: Repository,
    state: watch::Receiver<SessionState>,
    refresh: mpsc::UnboundedSender<RefreshRequest>,
    subscription: Arc<Subscription>,
}

impl SessionContext {
    /// Subscribe to the auth-state stream and start mirroring it
    pub fn start(auth: AuthService, repo: Repository) -> Self {
        let (state_tx, state) = watch::channel(SessionState::initial());
        let (refresh, refresh_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(mirror_auth_state(
            auth.subscribe(),
            repo.clone(),
            state_tx,
            refresh_rx,
        ));

        tracing::info!("Session context started");

        Self {
            auth,
            repo,
            state,
            refresh,
            subscription: Arc::new(Subscription(task)),
        }
    }

    pub fn auth(&self) -> &AuthService {
        &self.auth
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn profile(&self) -> Option<Profile> {
        self.state.borrow().profile.clone()
    }

    /// Profile of the signed-in user, or an auth error
    pub fn require_profile(&self) -> Result<Profile> {
        self.profile()
            .ok_or_else(|| AppError::Auth("Not signed in".to_string()))
    }

    /// Receiver that observes every session state change
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the next session state change
    pub async fn changed(&self) -> Result<SessionState> {
        let mut state = self.state.clone();
        state.borrow_and_update();
        state
            .changed()
            .await
            .map_err(|_| AppError::Generic("Session closed".to_string()))?;
        let current = state.borrow().clone();
        Ok(current)
    }

    /// Wait until the current identity's profile has been loaded
    pub async fn ready(&self) -> Result<SessionState> {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| !s.loading)
            .await
            .map_err(|_| AppError::Generic("Session closed".to_string()))?;
        Ok(settled.clone())
    }

    /// Re-read the profile document for the current identity
    pub async fn refresh(&self) -> Result<SessionState> {
        let (reply, response) = oneshot::channel();
        self.refresh
            .send(reply)
            .map_err(|_| AppError::Generic("Session closed".to_string()))?;
        response
            .await
            .map_err(|_| AppError::Generic("Session closed".to_string()))
    }

    /// Create an account with its profile document and sign it in
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
        role: Role,
    ) -> Result<Profile> {
        tracing::info!("Signing up new {} account", role.as_str());

        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(AppError::Validation("Display name is required".to_string()));
        }

        let account = self
            .auth
            .create_account(email, password, Some(display_name))
            .await?;

        // The profile document must exist before the session sees the sign-in
        self.repo
            .create_user_profile(
                &account.uid,
                CreateUserRequest {
                    email: account.email.clone(),
                    display_name: display_name.to_string(),
                    role,
                    status: UserStatus::Active,
                    photo_url: None,
                },
            )
            .await?;

        self.auth.start_session(account);

        self.refresh()
            .await?
            .profile
            .ok_or_else(|| AppError::Generic("Profile not available after sign-up".to_string()))
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<SessionState> {
        self.auth.sign_in(email, password).await?;
        self.refresh().await
    }

    pub async fn sign_out(&self) -> Result<SessionState> {
        self.auth.sign_out();
        self.refresh().await
    }

    /// Stop mirroring the auth-state stream
    pub fn shutdown(&self) {
        self.subscription.0.abort();
        tracing::info!("Session context shut down");
    }
}

async fn load_profile(repo: &Repository, identity: &AuthUser) -> Option<Profile> {
    match repo.get_user(&identity.uid).await {
        Ok(Some(user)) => Some(Profile::merge(identity, user)),
        Ok(None) => {
            tracing::warn!("No profile document for signed-in user: {}", identity.uid);
            None
        }
        Err(e) => {
            tracing::error!("Failed to load profile for {}: {}", identity.uid, e);
            None
        }
    }
}

/// Subscription loop: one profile read per auth-state change or refresh request
async fn mirror_auth_state(
    mut auth_state: watch::Receiver<Option<AuthUser>>,
    repo: Repository,
    state: watch::Sender<SessionState>,
    mut refresh: mpsc::UnboundedReceiver<RefreshRequest>,
) {
    let mut waiting: Vec<RefreshRequest> = Vec::new();

    loop {
        let identity = auth_state.borrow_and_update().clone();

        state.send_modify(|s| s.loading = true);

        let profile = match &identity {
            Some(user) => load_profile(&repo, user).await,
            None => None,
        };

        let current = SessionState {
            identity,
            profile,
            loading: false,
        };
        state.send_replace(current.clone());

        for reply in waiting.drain(..) {
            let _ = reply.send(current.clone());
        }

        tokio::select! {
            changed = auth_state.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            request = refresh.recv() => match request {
                Some(reply) => waiting.push(reply),
                None => break,
            },
        }
    }

    tracing::debug!("Session subscription stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{create_memory_pool, DocumentStore, UpdateUserRequest};

    async fn create_test_session() -> (SessionContext, Repository) {
        let pool = create_memory_pool().await.unwrap();
        let repo = Repository::new(DocumentStore::new(pool.clone()));
        let session = SessionContext::start(AuthService::new(pool), repo.clone());
        (session, repo)
    }

    #[tokio::test]
    async fn test_starts_signed_out() {
        let (session, _repo) = create_test_session().await;

        let state = session.ready().await.unwrap();
        assert!(state.identity.is_none());
        assert!(state.profile.is_none());
        assert!(session.require_profile().is_err());
    }

    #[tokio::test]
    async fn test_sign_up_writes_profile() {
        let (session, repo) = create_test_session().await;

        let profile = session
            .sign_up("ann@example.com", "secret1", "Ann", Role::Instructor)
            .await
            .unwrap();

        assert_eq!(profile.display_name, "Ann");
        assert_eq!(profile.role, Role::Instructor);
        assert_eq!(profile.status, UserStatus::Active);

        let doc = repo.get_user(&profile.uid).await.unwrap().unwrap();
        assert_eq!(doc.email, "ann@example.com");
        assert!(doc.created_at.is_some());

        assert_eq!(session.profile(), Some(profile));
    }

    #[tokio::test]
    async fn test_sign_out_clears_profile() {
        let (session, _repo) = create_test_session().await;

        session
            .sign_up("ann@example.com", "secret1", "Ann", Role::Student)
            .await
            .unwrap();

        let state = session.sign_out().await.unwrap();
        assert!(state.identity.is_none());
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_sign_in_merges_document_fields() {
        let (session, repo) = create_test_session().await;

        let profile = session
            .sign_up("ann@example.com", "secret1", "Ann", Role::Student)
            .await
            .unwrap();
        session.sign_out().await.unwrap();

        repo.update_user(
            &profile.uid,
            UpdateUserRequest {
                role: Some(Role::Admin),
                bio: Some("Hello".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let state = session.sign_in("ann@example.com", "secret1").await.unwrap();
        let profile = state.profile.unwrap();
        assert_eq!(profile.role, Role::Admin);
        assert_eq!(profile.bio.as_deref(), Some("Hello"));
    }

    #[tokio::test]
    async fn test_missing_profile_document() {
        let (session, _repo) = create_test_session().await;

        session
            .auth()
            .create_account("bob@example.com", "secret1", None)
            .await
            .unwrap();

        let state = session.sign_in("bob@example.com", "secret1").await.unwrap();
        assert!(state.identity.is_some());
        assert!(state.profile.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_stops_refresh() {
        let (session, _repo) = create_test_session().await;
        session.ready().await.unwrap();

        session.shutdown();
        tokio::task::yield_now().await;

        assert!(session.refresh().await.is_err());
    }

    #[test]
    fn test_merge_prefers_document_fields() {
        let identity = AuthUser {
            uid: "u1".to_string(),
            email: "ann@example.com".to_string(),
            display_name: Some("Session Ann".to_string()),
            photo_url: Some("http://img/session.png".to_string()),
        };
        let user = User {
            id: "u1".to_string(),
            display_name: String::new(),
            email: String::new(),
            role: Role::Student,
            status: UserStatus::Active,
            photo_url: Some("http://img/doc.png".to_string()),
            bio: None,
            created_at: None,
            updated_at: None,
        };

        let profile = Profile::merge(&identity, user);
        assert_eq!(profile.display_name, "Session Ann");
        assert_eq!(profile.email, "ann@example.com");
        assert_eq!(profile.photo_url.as_deref(), Some("http://img/doc.png"));
    }
}
