//! Repository layer for database operations
//!
//! One wrapper per entity operation: exact-match filters, one sort key and
//! a result cap against the corresponding collection. Creates stamp
//! `createdAt`, updates stamp `updatedAt`. Every document read back is
//! parsed into its typed record.

use super::document::{timestamp, Direction, Document, DocumentStore, Fields, Query};
use super::models::*;
use crate::config::{self, ANNOUNCEMENTS_LIST_LIMIT, CONTENTS_LIST_LIMIT, DEFAULT_LIST_LIMIT};
use crate::error::Result;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Repository for database operations
#[derive(Clone)]
pub struct Repository {
    store: DocumentStore,
}

fn now() -> Value {
    timestamp(Utc::now())
}

/// Parse a query result. Single reads fail on a malformed document;
/// lists skip it with a warning so one bad record cannot blank a screen.
fn parse_valid<T: DeserializeOwned>(docs: Vec<Document>) -> Vec<T> {
    docs.iter()
        .filter_map(|doc| match from_document(doc) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping {}: {}", doc.path, e);
                None
            }
        })
        .collect()
}

/// Collection path of a discussion's replies
pub fn replies_path(discussion_id: &str) -> String {
    format!("{}/{}/{}", config::DISCUSSIONS, discussion_id, config::REPLIES)
}

impl Repository {
    pub fn new(store: DocumentStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    async fn get_record<T: DeserializeOwned>(&self, path: &str, id: &str) -> Result<Option<T>> {
        match self.store.get(path, id).await? {
            Some(doc) => Ok(Some(from_document(&doc)?)),
            None => Ok(None),
        }
    }

    async fn insert<T: DeserializeOwned>(&self, path: &str, fields: Fields) -> Result<T> {
        let doc = self.store.add(path, fields).await?;
        from_document(&doc)
    }

    async fn patch<T: DeserializeOwned>(&self, path: &str, id: &str, mut fields: Fields) -> Result<T> {
        fields.insert("updatedAt".to_string(), now());
        let doc = self.store.update(path, id, fields).await?;
        from_document(&doc)
    }

    // ===== Users =====

    pub async fn get_user(&self, id: &str) -> Result<Option<User>> {
        self.get_record(config::USERS, id).await
    }

    pub async fn list_users(&self, role: Option<Role>) -> Result<Vec<User>> {
        let mut query = Query::new(config::USERS).limit(DEFAULT_LIST_LIMIT);
        if let Some(role) = role {
            query = query.where_eq("role", role.as_str());
        }
        Ok(parse_valid(self.store.query(&query).await?))
    }

    /// Write the profile document for an auth account
    pub async fn create_user_profile(&self, uid: &str, req: CreateUserRequest) -> Result<User> {
        let mut fields = to_fields(&req)?;
        fields.insert("createdAt".to_string(), now());

        let doc = self.store.set(config::USERS, uid, fields).await?;
        tracing::debug!("Created user profile: {}", uid);
        from_document(&doc)
    }

    pub async fn update_user(&self, id: &str, req: UpdateUserRequest) -> Result<User> {
        let user = self.patch(config::USERS, id, to_fields(&req)?).await?;
        tracing::debug!("Updated user: {}", id);
        Ok(user)
    }

    // ===== Courses =====

    pub async fn get_course(&self, id: &str) -> Result<Option<Course>> {
        self.get_record(config::COURSES, id).await
    }

    /// List courses, optionally only those taught by one instructor
    pub async fn list_courses(&self, instructor_id: Option<&str>) -> Result<Vec<Course>> {
        let mut query = Query::new(config::COURSES).limit(DEFAULT_LIST_LIMIT);
        if let Some(instructor_id) = instructor_id {
            query = query.where_eq("instructor.id", instructor_id);
        }
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn create_course(&self, req: CreateCourseRequest) -> Result<Course> {
        let mut fields = to_fields(&req)?;
        fields.insert("enrollments".to_string(), Value::from(0));
        fields.insert("createdAt".to_string(), now());
        fields.insert("updatedAt".to_string(), now());

        let course: Course = self.insert(config::COURSES, fields).await?;
        tracing::debug!("Created course: {}", course.id);
        Ok(course)
    }

    pub async fn update_course(&self, id: &str, req: UpdateCourseRequest) -> Result<Course> {
        let course = self.patch(config::COURSES, id, to_fields(&req)?).await?;
        tracing::debug!("Updated course: {}", id);
        Ok(course)
    }

    /// Delete a course. Its contents, enrollments and assessments are not removed.
    pub async fn delete_course(&self, id: &str) -> Result<()> {
        self.store.delete(config::COURSES, id).await?;
        tracing::debug!("Deleted course: {}", id);
        Ok(())
    }

    pub async fn increment_course_enrollments(&self, id: &str) -> Result<Course> {
        let doc = self.store.increment(config::COURSES, id, "enrollments", 1).await?;
        from_document(&doc)
    }

    // ===== Enrollments =====

    pub async fn get_enrollment(&self, id: &str) -> Result<Option<Enrollment>> {
        self.get_record(config::ENROLLMENTS, id).await
    }

    pub async fn list_enrollments(
        &self,
        user_id: Option<&str>,
        course_id: Option<&str>,
    ) -> Result<Vec<Enrollment>> {
        let mut query = Query::new(config::ENROLLMENTS).limit(DEFAULT_LIST_LIMIT);
        if let Some(user_id) = user_id {
            query = query.where_eq("userId", user_id);
        }
        if let Some(course_id) = course_id {
            query = query.where_eq("courseId", course_id);
        }
        Ok(parse_valid(self.store.query(&query).await?))
    }

    /// Create an enrollment. New enrollments always start active at zero progress.
    pub async fn create_enrollment(&self, req: CreateEnrollmentRequest) -> Result<Enrollment> {
        let mut fields = to_fields(&req)?;
        fields.insert(
            "status".to_string(),
            Value::from(EnrollmentStatus::Active.as_str()),
        );
        fields.insert("progress".to_string(), Value::from(0));
        fields.insert("createdAt".to_string(), now());
        fields.insert("updatedAt".to_string(), now());

        let enrollment: Enrollment = self.insert(config::ENROLLMENTS, fields).await?;
        tracing::debug!(
            "Created enrollment: {} ({} in {})",
            enrollment.id,
            enrollment.user_id,
            enrollment.course_id
        );
        Ok(enrollment)
    }

    pub async fn update_enrollment(&self, id: &str, req: UpdateEnrollmentRequest) -> Result<Enrollment> {
        let enrollment = self.patch(config::ENROLLMENTS, id, to_fields(&req)?).await?;
        tracing::debug!("Updated enrollment: {}", id);
        Ok(enrollment)
    }

    // ===== Content =====

    pub async fn get_content(&self, id: &str) -> Result<Option<Content>> {
        self.get_record(config::CONTENTS, id).await
    }

    pub async fn list_course_contents(&self, course_id: &str) -> Result<Vec<Content>> {
        let query = Query::new(config::CONTENTS)
            .where_eq("courseId", course_id)
            .order_by("order", Direction::Asc)
            .limit(CONTENTS_LIST_LIMIT);
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn create_content(&self, req: CreateContentRequest) -> Result<Content> {
        let mut fields = to_fields(&req)?;
        fields.insert("createdAt".to_string(), now());
        fields.insert("updatedAt".to_string(), now());

        let content: Content = self.insert(config::CONTENTS, fields).await?;
        tracing::debug!("Created content: {} in course {}", content.id, content.course_id);
        Ok(content)
    }

    pub async fn update_content(&self, id: &str, req: UpdateContentRequest) -> Result<Content> {
        let content = self.patch(config::CONTENTS, id, to_fields(&req)?).await?;
        tracing::debug!("Updated content: {}", id);
        Ok(content)
    }

    pub async fn delete_content(&self, id: &str) -> Result<()> {
        self.store.delete(config::CONTENTS, id).await?;
        tracing::debug!("Deleted content: {}", id);
        Ok(())
    }

    // ===== Assessments =====

    pub async fn get_assessment(&self, id: &str) -> Result<Option<Assessment>> {
        self.get_record(config::ASSESSMENTS, id).await
    }

    pub async fn list_course_assessments(&self, course_id: &str) -> Result<Vec<Assessment>> {
        let query = Query::new(config::ASSESSMENTS)
            .where_eq("courseId", course_id)
            .order_by("dueDate", Direction::Asc)
            .limit(DEFAULT_LIST_LIMIT);
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn create_assessment(&self, req: CreateAssessmentRequest) -> Result<Assessment> {
        let mut fields = to_fields(&req)?;
        fields.insert("createdAt".to_string(), now());
        fields.insert("updatedAt".to_string(), now());

        let assessment: Assessment = self.insert(config::ASSESSMENTS, fields).await?;
        tracing::debug!("Created assessment: {}", assessment.id);
        Ok(assessment)
    }

    pub async fn update_assessment(&self, id: &str, req: UpdateAssessmentRequest) -> Result<Assessment> {
        let assessment = self.patch(config::ASSESSMENTS, id, to_fields(&req)?).await?;
        tracing::debug!("Updated assessment: {}", id);
        Ok(assessment)
    }

    pub async fn delete_assessment(&self, id: &str) -> Result<()> {
        self.store.delete(config::ASSESSMENTS, id).await?;
        tracing::debug!("Deleted assessment: {}", id);
        Ok(())
    }

    // ===== Submissions =====

    pub async fn get_submission(&self, id: &str) -> Result<Option<Submission>> {
        self.get_record(config::SUBMISSIONS, id).await
    }

    pub async fn list_user_submissions(
        &self,
        user_id: &str,
        assessment_id: Option<&str>,
    ) -> Result<Vec<Submission>> {
        let mut query = Query::new(config::SUBMISSIONS)
            .where_eq("userId", user_id)
            .order_by("submittedAt", Direction::Desc)
            .limit(DEFAULT_LIST_LIMIT);
        if let Some(assessment_id) = assessment_id {
            query = query.where_eq("assessmentId", assessment_id);
        }
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn list_assessment_submissions(&self, assessment_id: &str) -> Result<Vec<Submission>> {
        let query = Query::new(config::SUBMISSIONS)
            .where_eq("assessmentId", assessment_id)
            .order_by("submittedAt", Direction::Desc)
            .limit(DEFAULT_LIST_LIMIT);
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn create_submission(&self, req: CreateSubmissionRequest) -> Result<Submission> {
        let mut fields = to_fields(&req)?;
        fields.insert(
            "status".to_string(),
            serde_json::to_value(SubmissionStatus::Submitted)?,
        );
        fields.insert("submittedAt".to_string(), now());

        let submission: Submission = self.insert(config::SUBMISSIONS, fields).await?;
        tracing::debug!("Created submission: {}", submission.id);
        Ok(submission)
    }

    pub async fn grade_submission(
        &self,
        id: &str,
        grade: u32,
        feedback: Option<String>,
    ) -> Result<Submission> {
        let mut fields = Fields::new();
        fields.insert("grade".to_string(), Value::from(grade));
        fields.insert("feedback".to_string(), feedback.map_or(Value::Null, Value::from));
        fields.insert(
            "status".to_string(),
            serde_json::to_value(SubmissionStatus::Graded)?,
        );
        fields.insert("gradedAt".to_string(), now());

        let doc = self.store.update(config::SUBMISSIONS, id, fields).await?;
        tracing::debug!("Graded submission: {}", id);
        from_document(&doc)
    }

    // ===== Announcements =====

    pub async fn get_announcement(&self, id: &str) -> Result<Option<Announcement>> {
        self.get_record(config::ANNOUNCEMENTS, id).await
    }

    pub async fn list_course_announcements(&self, course_id: &str) -> Result<Vec<Announcement>> {
        let query = Query::new(config::ANNOUNCEMENTS)
            .where_eq("courseId", course_id)
            .order_by("createdAt", Direction::Desc)
            .limit(ANNOUNCEMENTS_LIST_LIMIT);
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn create_announcement(&self, req: CreateAnnouncementRequest) -> Result<Announcement> {
        let mut fields = to_fields(&req)?;
        fields.insert("createdAt".to_string(), now());

        let announcement: Announcement = self.insert(config::ANNOUNCEMENTS, fields).await?;
        tracing::debug!("Created announcement: {}", announcement.id);
        Ok(announcement)
    }

    pub async fn update_announcement(
        &self,
        id: &str,
        req: UpdateAnnouncementRequest,
    ) -> Result<Announcement> {
        let announcement = self.patch(config::ANNOUNCEMENTS, id, to_fields(&req)?).await?;
        tracing::debug!("Updated announcement: {}", id);
        Ok(announcement)
    }

    pub async fn delete_announcement(&self, id: &str) -> Result<()> {
        self.store.delete(config::ANNOUNCEMENTS, id).await?;
        tracing::debug!("Deleted announcement: {}", id);
        Ok(())
    }

    // ===== Messages =====

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>> {
        self.get_record(config::MESSAGES, id).await
    }

    pub async fn list_user_messages(&self, user_id: &str) -> Result<Vec<Message>> {
        let query = Query::new(config::MESSAGES)
            .array_contains("participants", user_id)
            .order_by("createdAt", Direction::Desc)
            .limit(DEFAULT_LIST_LIMIT);
        Ok(parse_valid(self.store.query(&query).await?))
    }

    pub async fn send_message(&self, req: SendMessageRequest) -> Result<Message> {
        let mut fields = to_fields(&req)?;
        fields.insert("createdAt".to_string(), now());
        fields.insert("read".to_string(), Value::Bool(false));

        let message: Message = self.insert(config::MESSAGES, fields).await?;
        tracing::debug!("Sent message: {}", message.id);
        Ok(message)
    }

    pub async fn mark_message_read(&self, id: &str) -> Result<Message> {
        let mut fields = Fields::new();
        fields.insert("read".to_string(), Value::Bool(true));
        fields.insert("readAt".to_string(), now());

        let doc = self.store.update(config::MESSAGES, id, fields).await?;
        from_document(&doc)
    }

    // ===== Discussions =====

    pub async fn get_discussion(&self, id: &str) -> Result<Option<Discussion>> {
        self.get_record(config::DISCUSSIONS, id).await
    }

    /// Discussions of a course, newest first
    pub fn course_discussions_query(course_id: &str) -> Query {
        Query::new(config::DISCUSSIONS)
            .where_eq("courseId", course_id)
            .order_by("createdAt", Direction::Desc)
    }

    /// Replies of a discussion, oldest first
    pub fn replies_query(discussion_id: &str) -> Query {
        Query::new(replies_path(discussion_id)).order_by("createdAt", Direction::Asc)
    }

    pub async fn create_discussion(&self, course_id: &str, post: NewPost) -> Result<Discussion> {
        let mut fields = to_fields(&post)?;
        fields.insert("courseId".to_string(), Value::from(course_id));
        fields.insert("createdAt".to_string(), now());
        fields.insert("likes".to_string(), Value::from(0));

        let discussion: Discussion = self.insert(config::DISCUSSIONS, fields).await?;
        tracing::debug!("Created discussion: {} in course {}", discussion.id, course_id);
        Ok(discussion)
    }

    pub async fn create_reply(&self, discussion_id: &str, post: NewPost) -> Result<Reply> {
        let mut fields = to_fields(&post)?;
        fields.insert("createdAt".to_string(), now());
        fields.insert("likes".to_string(), Value::from(0));

        let reply: Reply = self.insert(&replies_path(discussion_id), fields).await?;
        tracing::debug!("Created reply: {} on discussion {}", reply.id, discussion_id);
        Ok(reply)
    }

    pub async fn list_replies(&self, discussion_id: &str) -> Result<Vec<Reply>> {
        Ok(parse_valid(self.store.query(&Self::replies_query(discussion_id)).await?))
    }

    pub async fn like_discussion(&self, id: &str) -> Result<Discussion> {
        let doc = self.store.increment(config::DISCUSSIONS, id, "likes", 1).await?;
        from_document(&doc)
    }

    pub async fn like_reply(&self, discussion_id: &str, reply_id: &str) -> Result<Reply> {
        let doc = self
            .store
            .increment(&replies_path(discussion_id), reply_id, "likes", 1)
            .await?;
        from_document(&doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::create_memory_pool;
    use crate::error::AppError;
    use chrono::Duration;

    async fn create_test_repo() -> Repository {
        let pool = create_memory_pool().await.unwrap();
        Repository::new(DocumentStore::new(pool))
    }

    fn course_request(title: &str, instructor_id: &str) -> CreateCourseRequest {
        CreateCourseRequest {
            title: title.to_string(),
            description: "desc".to_string(),
            category: "design".to_string(),
            level: "beginner".to_string(),
            instructor: InstructorRef {
                id: instructor_id.to_string(),
                name: "Teacher".to_string(),
            },
            image: None,
        }
    }

    fn author(id: &str) -> Author {
        Author {
            id: id.to_string(),
            name: format!("User {}", id),
            avatar: None,
        }
    }

    #[tokio::test]
    async fn test_create_and_get_course() {
        let repo = create_test_repo().await;

        let course = repo.create_course(course_request("Rust", "i1")).await.unwrap();
        assert_eq!(course.enrollments, 0);
        assert!(course.created_at.is_some());

        let fetched = repo.get_course(&course.id).await.unwrap().unwrap();
        assert_eq!(fetched, course);
    }

    #[tokio::test]
    async fn test_list_courses_by_instructor() {
        let repo = create_test_repo().await;

        repo.create_course(course_request("A", "i1")).await.unwrap();
        repo.create_course(course_request("B", "i2")).await.unwrap();

        assert_eq!(repo.list_courses(None).await.unwrap().len(), 2);

        let mine = repo.list_courses(Some("i1")).await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "A");
    }

    #[tokio::test]
    async fn test_update_course_stamps_updated_at() {
        let repo = create_test_repo().await;

        let course = repo.create_course(course_request("Rust", "i1")).await.unwrap();
        let updated = repo
            .update_course(
                &course.id,
                UpdateCourseRequest {
                    title: Some("Advanced Rust".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "Advanced Rust");
        assert!(updated.updated_at >= course.updated_at);
    }

    #[tokio::test]
    async fn test_delete_course_does_not_cascade() {
        let repo = create_test_repo().await;

        let course = repo.create_course(course_request("Rust", "i1")).await.unwrap();
        repo.create_enrollment(CreateEnrollmentRequest {
            user_id: "s1".to_string(),
            course_id: course.id.clone(),
            user_name: None,
            user_email: None,
            course_title: None,
        })
        .await
        .unwrap();

        repo.delete_course(&course.id).await.unwrap();

        assert!(repo.get_course(&course.id).await.unwrap().is_none());
        assert_eq!(
            repo.list_enrollments(None, Some(&course.id)).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_create_enrollment_initializes_status_and_progress() {
        let repo = create_test_repo().await;

        let enrollment = repo
            .create_enrollment(CreateEnrollmentRequest {
                user_id: "s1".to_string(),
                course_id: "c1".to_string(),
                user_name: Some("Sam".to_string()),
                user_email: Some("sam@example.com".to_string()),
                course_title: Some("Rust".to_string()),
            })
            .await
            .unwrap();

        assert_eq!(enrollment.status, EnrollmentStatus::Active);
        assert_eq!(enrollment.progress, 0);
        assert!(enrollment.created_at.is_some());
    }

    #[tokio::test]
    async fn test_list_enrollments_filters() {
        let repo = create_test_repo().await;

        for (user, course) in [("s1", "c1"), ("s1", "c2"), ("s2", "c1")] {
            repo.create_enrollment(CreateEnrollmentRequest {
                user_id: user.to_string(),
                course_id: course.to_string(),
                user_name: None,
                user_email: None,
                course_title: None,
            })
            .await
            .unwrap();
        }

        assert_eq!(repo.list_enrollments(Some("s1"), None).await.unwrap().len(), 2);
        assert_eq!(repo.list_enrollments(None, Some("c1")).await.unwrap().len(), 2);
        assert_eq!(
            repo.list_enrollments(Some("s1"), Some("c1")).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_contents_ordered_by_order() {
        let repo = create_test_repo().await;

        for order in [2, 0, 1] {
            repo.create_content(CreateContentRequest {
                course_id: "c1".to_string(),
                module_id: Some("m1".to_string()),
                title: format!("Item {}", order),
                kind: ContentKind::Reading,
                order,
                url: None,
                description: None,
                duration: None,
                locked: false,
            })
            .await
            .unwrap();
        }

        let contents = repo.list_course_contents("c1").await.unwrap();
        let orders: Vec<i64> = contents.iter().map(|c| c.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_assessments_ordered_by_due_date() {
        let repo = create_test_repo().await;
        let base = Utc::now();

        for days in [5, 1, 3] {
            repo.create_assessment(CreateAssessmentRequest {
                course_id: "c1".to_string(),
                title: format!("Due in {}", days),
                description: None,
                due_date: base + Duration::days(days),
                estimated_time: None,
                points: 100,
                kind: "assignment".to_string(),
            })
            .await
            .unwrap();
        }

        let titles: Vec<String> = repo
            .list_course_assessments("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.title)
            .collect();
        assert_eq!(titles, vec!["Due in 1", "Due in 3", "Due in 5"]);
    }

    #[tokio::test]
    async fn test_submission_lifecycle() {
        let repo = create_test_repo().await;

        let submission = repo
            .create_submission(CreateSubmissionRequest {
                user_id: "s1".to_string(),
                assessment_id: "a1".to_string(),
                course_id: "c1".to_string(),
                file_url: "http://files/essay.pdf".to_string(),
                file_name: "essay.pdf".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(submission.status, SubmissionStatus::Submitted);
        assert!(submission.submitted_at.is_some());

        let graded = repo
            .grade_submission(&submission.id, 90, Some("Well done".to_string()))
            .await
            .unwrap();
        assert_eq!(graded.status, SubmissionStatus::Graded);
        assert_eq!(graded.grade, Some(90));
        assert_eq!(graded.feedback.as_deref(), Some("Well done"));
        assert!(graded.graded_at.is_some());

        assert_eq!(
            repo.list_user_submissions("s1", Some("a1")).await.unwrap().len(),
            1
        );
        assert!(repo
            .list_user_submissions("s1", Some("other"))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(repo.list_assessment_submissions("a1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_inbox_and_read() {
        let repo = create_test_repo().await;

        let message = repo
            .send_message(SendMessageRequest {
                participants: vec!["a".to_string(), "b".to_string()],
                sender_id: "a".to_string(),
                subject: None,
                content: "Hello".to_string(),
            })
            .await
            .unwrap();
        assert!(!message.read);

        assert_eq!(repo.list_user_messages("b").await.unwrap().len(), 1);
        assert!(repo.list_user_messages("c").await.unwrap().is_empty());

        let read = repo.mark_message_read(&message.id).await.unwrap();
        assert!(read.read);
        assert!(read.read_at.is_some());
    }

    #[tokio::test]
    async fn test_announcements_newest_first() {
        let repo = create_test_repo().await;

        for title in ["First", "Second"] {
            repo.create_announcement(CreateAnnouncementRequest {
                course_id: "c1".to_string(),
                title: title.to_string(),
                content: "body".to_string(),
                author: None,
            })
            .await
            .unwrap();
        }

        let announcements = repo.list_course_announcements("c1").await.unwrap();
        assert_eq!(announcements[0].title, "Second");
        assert_eq!(announcements[1].title, "First");
    }

    #[tokio::test]
    async fn test_discussions_and_replies() {
        let repo = create_test_repo().await;

        let discussion = repo
            .create_discussion(
                "c1",
                NewPost {
                    author: author("u1"),
                    message: "Question".to_string(),
                },
            )
            .await
            .unwrap();
        assert_eq!(discussion.likes, 0);
        assert_eq!(discussion.course_id, "c1");

        for text in ["one", "two"] {
            repo.create_reply(
                &discussion.id,
                NewPost {
                    author: author("u2"),
                    message: text.to_string(),
                },
            )
            .await
            .unwrap();
        }

        let replies = repo.list_replies(&discussion.id).await.unwrap();
        let messages: Vec<&str> = replies.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(messages, vec!["one", "two"]);

        let liked = repo.like_discussion(&discussion.id).await.unwrap();
        assert_eq!(liked.likes, 1);
        let liked = repo.like_reply(&discussion.id, &replies[0].id).await.unwrap();
        assert_eq!(liked.likes, 1);
    }

    #[tokio::test]
    async fn test_malformed_document_is_rejected() {
        let repo = create_test_repo().await;

        let mut fields = Fields::new();
        fields.insert("title".to_string(), Value::from("Broken"));
        let doc = repo.store().add(config::COURSES, fields).await.unwrap();

        let result = repo.get_course(&doc.id).await;
        assert!(matches!(result, Err(AppError::MalformedDocument { .. })));
    }

    #[tokio::test]
    async fn test_list_skips_malformed_document() {
        let repo = create_test_repo().await;

        let mut broken = Fields::new();
        broken.insert("role".to_string(), Value::from("superuser"));
        repo.store().add(config::USERS, broken).await.unwrap();

        let user = repo
            .create_user_profile(
                "u1",
                CreateUserRequest {
                    email: "ada@example.com".to_string(),
                    display_name: "Ada".to_string(),
                    role: Role::Student,
                    status: UserStatus::Active,
                    photo_url: None,
                },
            )
            .await
            .unwrap();

        let users = repo.list_users(None).await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, user.id);
    }
}
