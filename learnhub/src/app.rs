//! Application state and initialization
//!
//! This module manages the central application state and lifecycle.
//! All services are initialized here and made available through AppState.

use crate::auth::AuthService;
use crate::config::AppConfig;
use crate::database::{self, DocumentStore, Repository};
use crate::error::Result;
use crate::services::{
    AssignmentsService, CommunicationsService, ContentService, CoursesService,
    DiscussionsService, EnrollmentsService, ProfileService, UsersService,
};
use crate::session::SessionContext;
use crate::storage::BlobStore;
use sqlx::SqlitePool;

/// Central application state holding all services
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub repo: Repository,
    pub blobs: BlobStore,
    pub session: SessionContext,
    pub courses: CoursesService,
    pub content: ContentService,
    pub assignments: AssignmentsService,
    pub discussions: DiscussionsService,
    pub enrollments: EnrollmentsService,
    pub users: UsersService,
    pub profile: ProfileService,
    pub communications: CommunicationsService,
}

impl AppState {
    /// Open the on-disk database and blob store under the data directory
    pub async fn initialize(config: AppConfig) -> Result<Self> {
        tracing::info!("Initializing application");
        tracing::info!("Data directory: {:?}", config.data_dir);

        std::fs::create_dir_all(&config.data_dir)?;

        let pool = database::create_pool(&config.database_path()).await?;
        let state = Self::assemble(config, pool).await?;

        tracing::info!("Application initialized successfully");

        Ok(state)
    }

    /// Same wiring over an in-memory database. Blobs still go to disk.
    pub async fn in_memory(config: AppConfig) -> Result<Self> {
        let pool = database::create_memory_pool().await?;
        Self::assemble(config, pool).await
    }

    async fn assemble(config: AppConfig, pool: SqlitePool) -> Result<Self> {
        let store = DocumentStore::new(pool.clone());
        let repo = Repository::new(store);
        let auth = AuthService::new(pool);

        let blobs = BlobStore::new(config.blob_dir(), config.storage_base_url.clone());
        blobs.initialize().await?;

        let session = SessionContext::start(auth, repo.clone());
        session.ready().await?;

        Ok(Self {
            courses: CoursesService::new(repo.clone(), blobs.clone(), session.clone()),
            content: ContentService::new(repo.clone(), blobs.clone(), session.clone()),
            assignments: AssignmentsService::new(repo.clone(), blobs.clone(), session.clone()),
            discussions: DiscussionsService::new(repo.clone(), session.clone()),
            enrollments: EnrollmentsService::new(repo.clone(), session.clone()),
            users: UsersService::new(repo.clone(), session.clone()),
            profile: ProfileService::new(repo.clone(), blobs.clone(), session.clone()),
            communications: CommunicationsService::new(repo.clone(), session.clone()),
            config,
            repo,
            blobs,
            session,
        })
    }

    /// Release the session subscription
    pub fn shutdown(&self) {
        tracing::info!("Shutting down application");
        self.session.shutdown();
    }
}
