//! Courses service
//!
//! Course catalog, course detail, course creation and enrollment.

use crate::access::{self, Action, Screen};
use crate::database::{
    Content, Course, CreateCourseRequest, CreateEnrollmentRequest, Enrollment, Repository,
    UpdateCourseRequest,
};
use crate::error::{AppError, Result};
use crate::query::{ListFilter, SortOrder};
use crate::session::{Profile, SessionContext};
use crate::storage::blob_store::course_thumbnail_path;
use crate::storage::{BlobStore, Upload};
use chrono::Utc;

/// Fields entered on the create-course form
#[derive(Debug, Clone)]
pub struct NewCourse {
    pub title: String,
    pub description: String,
    pub category: String,
    pub level: String,
}

/// Everything the course page shows
#[derive(Debug, Clone)]
pub struct CourseDetail {
    pub course: Course,
    pub contents: Vec<Content>,
    /// The viewer's enrollment, if any
    pub enrollment: Option<Enrollment>,
    pub can_manage: bool,
}

impl CourseDetail {
    pub fn is_enrolled(&self) -> bool {
        self.enrollment.is_some()
    }
}

/// Catalog filter: search over title and description, a category
/// (`"all"` for every category) and a sort order
pub fn catalog_filter(search: &str, category: &str, order: SortOrder) -> ListFilter<Course> {
    let filter = ListFilter::new().search(search).sort(order);
    if category.is_empty() || category == "all" {
        return filter;
    }

    let category = category.to_string();
    filter.matching(move |course: &Course| course.category == category)
}

/// Service for the course screens
#[derive(Clone)]
pub struct CoursesService {
    repo: Repository,
    blobs: BlobStore,
    session: SessionContext,
}

impl CoursesService {
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
            .ok_or_else(|| AppError::not_found(crate::config::COURSES, id))
    }

    /// Courses visible on the catalog screen.
    ///
    /// Instructors see the courses they teach, everyone else the full catalog.
    pub async fn catalog(&self, filter: &ListFilter<Course>) -> Result<Vec<Course>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Courses)?;

        let instructor_id = match profile.role {
            access::Role::Instructor => Some(profile.uid.as_str()),
            _ => None,
        };

        let courses = self.repo.list_courses(instructor_id).await.map_err(|e| {
            tracing::error!("Failed to load course catalog: {}", e);
            e
        })?;

        Ok(filter.apply(courses))
    }

    /// Courses the signed-in student is enrolled in
    pub async fn enrolled_courses(&self) -> Result<Vec<(Course, Enrollment)>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::Courses)?;

        let enrollments = self.repo.list_enrollments(Some(&profile.uid), None).await?;

        let mut courses = Vec::with_capacity(enrollments.len());
        for enrollment in enrollments {
            match self.repo.get_course(&enrollment.course_id).await? {
                Some(course) => courses.push((course, enrollment)),
                None => tracing::warn!(
                    "Enrollment {} points at missing course {}",
                    enrollment.id,
                    enrollment.course_id
                ),
            }
        }

        Ok(courses)
    }

    pub async fn create_course(&self, input: NewCourse, thumbnail: Option<Upload>) -> Result<Course> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CreateCourse)?;
        access::ensure(&profile, Action::CreateCourse, None)?;

        let title = input.title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Course title is required".to_string()));
        }

        tracing::info!("Creating course: {}", title);

        let image = match thumbnail {
            Some(upload) => {
                let path = course_thumbnail_path(&upload.file_name, Utc::now().timestamp_millis());
                Some(self.blobs.upload(&path, &upload.data).await?)
            }
            None => None,
        };

        let course = self
            .repo
            .create_course(CreateCourseRequest {
                title: title.to_string(),
                description: input.description,
                category: input.category,
                level: input.level,
                instructor: profile.instructor_ref(),
                image,
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to create course: {}", e);
                e
            })?;

        tracing::info!("Course created successfully: {}", course.id);

        Ok(course)
    }

    pub async fn course_detail(&self, course_id: &str) -> Result<CourseDetail> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CourseDetail)?;

        let course = self.require_course(course_id).await?;
        let contents = self.repo.list_course_contents(course_id).await?;
        let enrollment = self
            .repo
            .list_enrollments(Some(&profile.uid), Some(course_id))
            .await?
            .into_iter()
            .next();

        Ok(CourseDetail {
            can_manage: access::can_manage_course(&profile, &course),
            course,
            contents,
            enrollment,
        })
    }

    pub async fn update_course(&self, course_id: &str, req: UpdateCourseRequest) -> Result<Course> {
        let profile = self.session.require_profile()?;
        let course = self.require_course(course_id).await?;
        access::ensure(&profile, Action::ManageCourse, Some(&course))?;

        tracing::info!("Updating course: {}", course_id);
        self.repo.update_course(course_id, req).await
    }

    /// Replace a course's thumbnail image
    pub async fn set_thumbnail(&self, course_id: &str, thumbnail: Upload) -> Result<Course> {
        let path = course_thumbnail_path(&thumbnail.file_name, Utc::now().timestamp_millis());

        let profile = self.session.require_profile()?;
        let course = self.require_course(course_id).await?;
        access::ensure(&profile, Action::ManageCourse, Some(&course))?;

        let url = self.blobs.upload(&path, &thumbnail.data).await?;
        self.repo
            .update_course(
                course_id,
                UpdateCourseRequest {
                    image: Some(url),
                    ..Default::default()
                },
            )
            .await
    }

    /// Delete a course. Its contents and enrollments stay behind.
    pub async fn delete_course(&self, course_id: &str) -> Result<()> {
        let profile = self.session.require_profile()?;
        let course = self.require_course(course_id).await?;
        access::ensure(&profile, Action::ManageCourse, Some(&course))?;

        tracing::info!("Deleting course: {}", course_id);
        self.repo.delete_course(course_id).await
    }

    /// Enroll the signed-in student and bump the course's enrollment counter
    pub async fn enroll(&self, course_id: &str) -> Result<Enrollment> {
        let profile = self.session.require_profile()?;
        access::ensure(&profile, Action::Enroll, None)?;

        let course = self.require_course(course_id).await?;
        self.ensure_not_enrolled(&profile, course_id).await?;

        tracing::info!("Enrolling {} in course {}", profile.uid, course_id);

        let enrollment = self
            .repo
            .create_enrollment(CreateEnrollmentRequest {
                user_id: profile.uid.clone(),
                course_id: course.id.clone(),
                user_name: Some(profile.display_name.clone()),
                user_email: Some(profile.email.clone()),
                course_title: Some(course.title.clone()),
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to enroll in course {}: {}", course_id, e);
                e
            })?;

        self.repo.increment_course_enrollments(course_id).await?;

        tracing::info!("Enrollment created successfully: {}", enrollment.id);

        Ok(enrollment)
    }

    async fn ensure_not_enrolled(&self, profile: &Profile, course_id: &str) -> Result<()> {
        let existing = self
            .repo
            .list_enrollments(Some(&profile.uid), Some(course_id))
            .await?;

        if !existing.is_empty() {
            return Err(AppError::Validation(format!(
                "Already enrolled in course {}",
                course_id
            )));
        }
        Ok(())
    }
}
