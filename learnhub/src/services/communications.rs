//! Communications service
//!
//! Course announcements and direct messages between users.

use crate::access::{self, Action, Screen};
use crate::config;
use crate::database::{
    Announcement, Course, CreateAnnouncementRequest, Message, Repository, SendMessageRequest,
    UpdateAnnouncementRequest,
};
use crate::error::{AppError, Result};
use crate::session::SessionContext;

#[derive(Clone)]
pub struct CommunicationsService {
    repo: Repository,
    session: SessionContext,
}

impl CommunicationsService {
    pub fn new(repo: Repository, session: SessionContext) -> Self {
        Self { repo, session }
    }

    async fn managed_course(&self, course_id: &str) -> Result<Course> {
        let profile = self.session.require_profile()?;
        let course = self
            .repo
            .get_course(course_id)
            .await?
            .ok_or_else(|| AppError::not_found(config::COURSES, course_id))?;

        access::ensure(&profile, Action::ManageCourse, Some(&course))?;
        Ok(course)
    }

    async fn require_announcement(&self, id: &str) -> Result<Announcement> {
        self.repo
            .get_announcement(id)
            .await?
            .ok_or_else(|| AppError::not_found(config::ANNOUNCEMENTS, id))
    }

    // ===== Announcements =====

    /// Latest announcements of a course, newest first
    pub async fn course_announcements(&self, course_id: &str) -> Result<Vec<Announcement>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CourseDetail)?;

        self.repo.list_course_announcements(course_id).await.map_err(|e| {
            tracing::error!("Failed to load announcements of {}: {}", course_id, e);
            e
        })
    }

    pub async fn post_announcement(
        &self,
        course_id: &str,
        title: &str,
        content: &str,
    ) -> Result<Announcement> {
        self.managed_course(course_id).await?;
        let profile = self.session.require_profile()?;

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Announcement title is required".to_string()));
        }

        tracing::info!("Posting announcement '{}' in course {}", title, course_id);

        self.repo
            .create_announcement(CreateAnnouncementRequest {
                course_id: course_id.to_string(),
                title: title.to_string(),
                content: content.trim().to_string(),
                author: Some(profile.author()),
            })
            .await
    }

    pub async fn update_announcement(
        &self,
        id: &str,
        req: UpdateAnnouncementRequest,
    ) -> Result<Announcement> {
        let announcement = self.require_announcement(id).await?;
        self.managed_course(&announcement.course_id).await?;

        tracing::info!("Updating announcement: {}", id);
        self.repo.update_announcement(id, req).await
    }

    pub async fn delete_announcement(&self, id: &str) -> Result<()> {
        let announcement = self.require_announcement(id).await?;
        self.managed_course(&announcement.course_id).await?;

        tracing::info!("Deleting announcement: {}", id);
        self.repo.delete_announcement(id).await
    }

    // ===== Messages =====

    /// Messages the signed-in user sent or received, newest first
    pub async fn inbox(&self) -> Result<Vec<Message>> {
        let profile = self.session.require_profile()?;
        self.repo.list_user_messages(&profile.uid).await
    }

    pub async fn send_message(
        &self,
        recipient_id: &str,
        subject: Option<&str>,
        content: &str,
    ) -> Result<Message> {
        let profile = self.session.require_profile()?;

        let content = content.trim();
        if content.is_empty() {
            return Err(AppError::Validation("Message cannot be empty".to_string()));
        }
        if recipient_id == profile.uid {
            return Err(AppError::Validation("Cannot message yourself".to_string()));
        }
        if self.repo.get_user(recipient_id).await?.is_none() {
            return Err(AppError::not_found(config::USERS, recipient_id));
        }

        tracing::info!("Sending message from {} to {}", profile.uid, recipient_id);

        self.repo
            .send_message(SendMessageRequest {
                participants: vec![profile.uid.clone(), recipient_id.to_string()],
                sender_id: profile.uid,
                subject: subject.map(str::to_string),
                content: content.to_string(),
            })
            .await
    }

    /// Mark a message read. Only its participants may do so.
    pub async fn mark_read(&self, message_id: &str) -> Result<Message> {
        let profile = self.session.require_profile()?;

        let message = self
            .repo
            .get_message(message_id)
            .await?
            .ok_or_else(|| AppError::not_found(config::MESSAGES, message_id))?;

        if !message.participants.contains(&profile.uid) {
            return Err(AppError::AccessDenied(format!(
                "Not a participant of message {}",
                message_id
            )));
        }

        self.repo.mark_message_read(message_id).await
    }
}
