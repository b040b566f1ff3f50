//! Enrollments service
//!
//! Admin screen over every enrollment: search, status filter, sorting,
//! and status/progress edits.

use crate::access::{self, Action, Screen};
use crate::config::MAX_PROGRESS;
use crate::database::{Enrollment, EnrollmentStatus, Repository, UpdateEnrollmentRequest};
use crate::error::{AppError, Result};
use crate::query::{ListFilter, SortOrder};
use crate::session::SessionContext;

/// Search over student name, email and course title, optionally one status
pub fn enrollment_filter(
    search: &str,
    status: Option<EnrollmentStatus>,
    order: SortOrder,
) -> ListFilter<Enrollment> {
    let filter = ListFilter::new().search(search).sort(order);
    match status {
        Some(status) => filter.matching(move |e: &Enrollment| e.status == status),
        None => filter,
    }
}

#[derive(Clone)]
pub struct EnrollmentsService {
    repo: Repository,
    session: SessionContext,
}

impl EnrollmentsService {
    pub fn new(repo: Repository, session: SessionContext) -> Self {
        Self { repo, session }
    }

    fn require_admin(&self) -> Result<()> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Enrollments)?;
        access::ensure(&profile, Action::ManageEnrollments, None)
    }

    pub async fn list(&self, filter: &ListFilter<Enrollment>) -> Result<Vec<Enrollment>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Enrollments)?;

        let enrollments = self.repo.list_enrollments(None, None).await.map_err(|e| {
            tracing::error!("Failed to load enrollments: {}", e);
            e
        })?;

        Ok(filter.apply(enrollments))
    }

    pub async fn update_status(&self, id: &str, status: EnrollmentStatus) -> Result<Enrollment> {
        self.require_admin()?;

        tracing::info!("Setting enrollment {} status to {}", id, status.as_str());

        self.repo
            .update_enrollment(
                id,
                UpdateEnrollmentRequest {
                    status: Some(status),
                    progress: None,
                },
            )
            .await
            .map_err(|e| {
                tracing::error!("Failed to update enrollment {}: {}", id, e);
                e
            })
    }

    pub async fn update_progress(&self, id: &str, progress: u8) -> Result<Enrollment> {
        self.require_admin()?;

        if progress > MAX_PROGRESS {
            return Err(AppError::Validation(format!(
                "Progress must be between 0 and {}, got {}",
                MAX_PROGRESS, progress
            )));
        }

        tracing::info!("Setting enrollment {} progress to {}%", id, progress);

        self.repo
            .update_enrollment(
                id,
                UpdateEnrollmentRequest {
                    status: None,
                    progress: Some(progress),
                },
            )
            .await
    }
}
