//! Assignments service
//!
//! Assessments of a course with a per-viewer status, file submissions
//! and grading.

use crate::access::{self, Action, Role, Screen};
use crate::config;
use crate::database::{
    Assessment, Course, CreateAssessmentRequest, CreateSubmissionRequest, Repository, Submission,
};
use crate::error::{AppError, Result};
use crate::session::{Profile, SessionContext};
use crate::storage::blob_store::submission_path;
use crate::storage::{BlobStore, Upload};
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentStatus {
    Completed,
    Overdue,
    Pending,
}

/// Submitted beats overdue; anything else is pending
pub fn derive_status(
    due_date: DateTime<Utc>,
    submission: Option<&Submission>,
    now: DateTime<Utc>,
) -> AssignmentStatus {
    if submission.is_some() {
        AssignmentStatus::Completed
    } else if due_date < now {
        AssignmentStatus::Overdue
    } else {
        AssignmentStatus::Pending
    }
}

/// An assessment as one viewer sees it
#[derive(Debug, Clone)]
pub struct Assignment {
    pub assessment: Assessment,
    pub status: AssignmentStatus,
    /// The viewer's latest submission
    pub submission: Option<Submission>,
}

/// Fields entered on the add-assignment form
#[derive(Debug, Clone)]
pub struct NewAssignment {
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub estimated_time: Option<String>,
    pub points: u32,
}

#[derive(Clone)]
pub struct AssignmentsService {
    repo: Repository,
    blobs: BlobStore,
    session: SessionContext,
}

impl AssignmentsService {
    pub fn new(repo: Repository, blobs: BlobStore, session: SessionContext) -> Self {
        Self {
            repo,
            blobs,
            session,
        }
    }

    async fn require_course(&self, id: &str) -> Result<Course> {
        self.repo
            .get_course(id)
            .await?
            .ok_or_else(|| AppError::not_found(config::COURSES, id))
    }

    async fn require_assessment(&self, id: &str) -> Result<Assessment> {
        self.repo
            .get_assessment(id)
            .await?
            .ok_or_else(|| AppError::not_found(config::ASSESSMENTS, id))
    }

    async fn is_enrolled(&self, profile: &Profile, course_id: &str) -> Result<bool> {
        if profile.role != Role::Student {
            return Ok(false);
        }
        let enrollments = self
            .repo
            .list_enrollments(Some(&profile.uid), Some(course_id))
            .await?;
        Ok(!enrollments.is_empty())
    }

    /// Assessments of a course, due soonest first, with the viewer's status.
    /// Viewers who are not enrolled see every assessment as pending.
    pub async fn course_assignments(&self, course_id: &str) -> Result<Vec<Assignment>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CourseDetail)?;

        let assessments = self.repo.list_course_assessments(course_id).await.map_err(|e| {
            tracing::error!("Failed to load assessments of course {}: {}", course_id, e);
            e
        })?;

        if !self.is_enrolled(&profile, course_id).await? {
            return Ok(assessments
                .into_iter()
                .map(|assessment| Assignment {
                    assessment,
                    status: AssignmentStatus::Pending,
                    submission: None,
                })
                .collect());
        }

        let now = Utc::now();
        let mut assignments = Vec::with_capacity(assessments.len());
        for assessment in assessments {
            let submission = self
                .repo
                .list_user_submissions(&profile.uid, Some(&assessment.id))
                .await?
                .into_iter()
                .next();

            assignments.push(Assignment {
                status: derive_status(assessment.due_date, submission.as_ref(), now),
                assessment,
                submission,
            });
        }

        Ok(assignments)
    }

    pub async fn add_assignment(&self, course_id: &str, input: NewAssignment) -> Result<Assessment> {
        let profile = self.session.require_profile()?;
        let course = self.require_course(course_id).await?;
        access::ensure(&profile, Action::ManageCourse, Some(&course))?;

        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Assignment title is required".to_string()));
        }

        tracing::info!("Adding assignment '{}' to course {}", title, course_id);

        self.repo
            .create_assessment(CreateAssessmentRequest {
                course_id: course_id.to_string(),
                title: title.to_string(),
                description: input.description,
                due_date: input.due_date,
                estimated_time: input.estimated_time,
                points: input.points,
                kind: "assignment".to_string(),
            })
            .await
    }

    pub async fn delete_assignment(&self, assessment_id: &str) -> Result<()> {
        let profile = self.session.require_profile()?;
        let assessment = self.require_assessment(assessment_id).await?;
        let course = self.require_course(&assessment.course_id).await?;
        access::ensure(&profile, Action::ManageCourse, Some(&course))?;

        tracing::info!("Deleting assignment: {}", assessment_id);
        self.repo.delete_assessment(assessment_id).await
    }

    /// Upload the file, then record the submission
    pub async fn submit_assignment(&self, assessment_id: &str, file: Upload) -> Result<Submission> {
        let profile = self.session.require_profile()?;
        access::ensure(&profile, Action::SubmitAssignment, None)?;

        let assessment = self.require_assessment(assessment_id).await?;
        if !self.is_enrolled(&profile, &assessment.course_id).await? {
            return Err(AppError::AccessDenied(format!(
                "Not enrolled in course {}",
                assessment.course_id
            )));
        }

        let path = submission_path(
            &assessment.course_id,
            &assessment.id,
            &profile.uid,
            &file.file_name,
            Utc::now().timestamp_millis(),
        );
        let file_url = self.blobs.upload(&path, &file.data).await.map_err(|e| {
            tracing::error!("Failed to upload submission for {}: {}", assessment_id, e);
            e
        })?;

        let submission = self
            .repo
            .create_submission(CreateSubmissionRequest {
                user_id: profile.uid.clone(),
                assessment_id: assessment.id.clone(),
                course_id: assessment.course_id.clone(),
                file_url,
                file_name: file.file_name,
            })
            .await?;

        tracing::info!("Submission created successfully: {}", submission.id);

        Ok(submission)
    }

    /// Grade a submission. The grade may not exceed the assessment's points.
    pub async fn grade_submission(
        &self,
        submission_id: &str,
        grade: u32,
        feedback: Option<String>,
    ) -> Result<Submission> {
        let profile = self.session.require_profile()?;

        let submission = self
            .repo
            .get_submission(submission_id)
            .await?
            .ok_or_else(|| AppError::not_found(config::SUBMISSIONS, submission_id))?;
        let assessment = self.require_assessment(&submission.assessment_id).await?;
        let course = self.require_course(&assessment.course_id).await?;
        access::ensure(&profile, Action::GradeSubmission, Some(&course))?;

        if grade > assessment.points {
            return Err(AppError::Validation(format!(
                "Grade {} exceeds the {} points available",
                grade, assessment.points
            )));
        }

        tracing::info!("Grading submission {}: {}/{}", submission_id, grade, assessment.points);

        let feedback = feedback.filter(|text| !text.trim().is_empty());
        self.repo.grade_submission(submission_id, grade, feedback).await
    }

    pub async fn assignment_submissions(&self, assessment_id: &str) -> Result<Vec<Submission>> {
        let profile = self.session.require_profile()?;
        let assessment = self.require_assessment(assessment_id).await?;
        let course = self.require_course(&assessment.course_id).await?;
        access::ensure(&profile, Action::GradeSubmission, Some(&course))?;

        self.repo.list_assessment_submissions(assessment_id).await
    }

    /// The signed-in user's submissions, newest first
    pub async fn my_submissions(&self) -> Result<Vec<Submission>> {
        let profile = self.session.require_profile()?;
        self.repo.list_user_submissions(&profile.uid, None).await
    }
}
