//! Role gating
//!
//! Authorization is a pure function of the session profile's role,
//! checked against static allow-lists per screen and per action. Course
//! management additionally requires instructors to own the course.

use crate::database::Course;
use crate::error::{AppError, Result};
use crate::session::Profile;

pub use crate::database::Role;

const ANY_ROLE: &[Role] = &[Role::Admin, Role::Instructor, Role::Student];
const ADMIN_ONLY: &[Role] = &[Role::Admin];
const STAFF: &[Role] = &[Role::Admin, Role::Instructor];
const STUDENTS: &[Role] = &[Role::Student];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Dashboard,
    Courses,
    CourseDetail,
    CreateCourse,
    Users,
    Enrollments,
    Profile,
}

impl Screen {
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Screen::Users | Screen::Enrollments => ADMIN_ONLY,
            Screen::CreateCourse => STAFF,
            Screen::Dashboard | Screen::Courses | Screen::CourseDetail | Screen::Profile => {
                ANY_ROLE
            }
        }
    }

    pub fn permits(&self, role: Role) -> bool {
        self.allowed_roles().contains(&role)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Edit or delete a course and its contents, assignments and announcements
    ManageCourse,
    CreateCourse,
    ManageUsers,
    ManageEnrollments,
    Enroll,
    SubmitAssignment,
    GradeSubmission,
}

impl Action {
    pub fn allowed_roles(&self) -> &'static [Role] {
        match self {
            Action::ManageCourse | Action::CreateCourse | Action::GradeSubmission => STAFF,
            Action::ManageUsers | Action::ManageEnrollments => ADMIN_ONLY,
            Action::Enroll | Action::SubmitAssignment => STUDENTS,
        }
    }

    fn requires_ownership(&self) -> bool {
        matches!(self, Action::ManageCourse | Action::GradeSubmission)
    }
}

/// Check a screen's allow-list. Screens call this before fetching anything.
pub fn authorize(profile: &Profile, screen: Screen) -> Result<()> {
    if screen.permits(profile.role) {
        return Ok(());
    }

    tracing::warn!(
        "Access denied: {} ({}) on {:?}",
        profile.uid,
        profile.role.as_str(),
        screen
    );
    Err(AppError::AccessDenied(format!(
        "{:?} is not available to {} accounts",
        screen,
        profile.role.as_str()
    )))
}

/// Admins manage every course, instructors only the ones they teach
pub fn can_manage_course(profile: &Profile, course: &Course) -> bool {
    match profile.role {
        Role::Admin => true,
        Role::Instructor => course.instructor.id == profile.uid,
        Role::Student => false,
    }
}

pub fn is_allowed(profile: &Profile, action: Action, course: Option<&Course>) -> bool {
    if !action.allowed_roles().contains(&profile.role) {
        return false;
    }

    match (action.requires_ownership(), course) {
        (true, Some(course)) => can_manage_course(profile, course),
        (true, None) => profile.role == Role::Admin,
        (false, _) => true,
    }
}

/// Check an action, returning `AccessDenied` when it is not allowed
pub fn ensure(profile: &Profile, action: Action, course: Option<&Course>) -> Result<()> {
    if is_allowed(profile, action, course) {
        return Ok(());
    }

    tracing::warn!(
        "Access denied: {} ({}) attempted {:?}",
        profile.uid,
        profile.role.as_str(),
        action
    );
    Err(AppError::AccessDenied(format!(
        "{:?} is not allowed for this account",
        action
    )))
}

/// Sidebar entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavItem {
    pub title: &'static str,
    pub href: &'static str,
}

const fn nav(title: &'static str, href: &'static str) -> NavItem {
    NavItem { title, href }
}

const ADMIN_NAV: &[NavItem] = &[
    nav("Users", "/dashboard/users"),
    nav("Courses", "/dashboard/courses"),
    nav("Enrollments", "/dashboard/enrollments"),
    nav("Content", "/dashboard/content"),
    nav("Assessments", "/dashboard/assessments"),
    nav("Communications", "/dashboard/communications"),
    nav("Reports", "/dashboard/reports"),
    nav("Settings", "/dashboard/settings"),
];

const INSTRUCTOR_NAV: &[NavItem] = &[
    nav("My Courses", "/dashboard/courses"),
    nav("Students", "/dashboard/students"),
    nav("Course Content", "/dashboard/content"),
    nav("Assessments", "/dashboard/assessments"),
    nav("Announcements", "/dashboard/announcements"),
    nav("Messages", "/dashboard/messages"),
    nav("Reports", "/dashboard/reports"),
    nav("Settings", "/dashboard/settings"),
];

const STUDENT_NAV: &[NavItem] = &[
    nav("My Courses", "/dashboard/courses"),
    nav("Course Catalog", "/dashboard/catalog"),
    nav("Assignments", "/dashboard/assignments"),
    nav("Grades", "/dashboard/grades"),
    nav("Messages", "/dashboard/messages"),
    nav("Settings", "/dashboard/settings"),
];

/// Sidebar entries for a role, starting with the dashboard
pub fn nav_items(role: Role) -> Vec<NavItem> {
    let specific = match role {
        Role::Admin => ADMIN_NAV,
        Role::Instructor => INSTRUCTOR_NAV,
        Role::Student => STUDENT_NAV,
    };

    std::iter::once(nav("Dashboard", "/dashboard"))
        .chain(specific.iter().cloned())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{InstructorRef, UserStatus};

    fn profile(uid: &str, role: Role) -> Profile {
        Profile {
            uid: uid.to_string(),
            email: format!("{}@example.com", uid),
            display_name: uid.to_string(),
            role,
            status: UserStatus::Active,
            photo_url: None,
            bio: None,
        }
    }

    fn course(instructor_id: &str) -> Course {
        Course {
            id: "c1".to_string(),
            title: "Rust".to_string(),
            description: String::new(),
            category: String::new(),
            level: String::new(),
            instructor: InstructorRef {
                id: instructor_id.to_string(),
                name: "Teacher".to_string(),
            },
            enrollments: 0,
            image: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_screen_matrix() {
        let admin = profile("a", Role::Admin);
        let instructor = profile("i", Role::Instructor);
        let student = profile("s", Role::Student);

        for screen in [Screen::Users, Screen::Enrollments] {
            assert!(authorize(&admin, screen).is_ok());
            assert!(matches!(
                authorize(&instructor, screen),
                Err(AppError::AccessDenied(_))
            ));
            assert!(authorize(&student, screen).is_err());
        }

        assert!(authorize(&instructor, Screen::CreateCourse).is_ok());
        assert!(authorize(&student, Screen::CreateCourse).is_err());

        for screen in [Screen::Dashboard, Screen::Courses, Screen::CourseDetail, Screen::Profile] {
            assert!(authorize(&student, screen).is_ok());
        }
    }

    #[test]
    fn test_manage_course_requires_ownership() {
        let owned = course("i1");

        assert!(can_manage_course(&profile("a", Role::Admin), &owned));
        assert!(can_manage_course(&profile("i1", Role::Instructor), &owned));
        assert!(!can_manage_course(&profile("i2", Role::Instructor), &owned));
        assert!(!can_manage_course(&profile("i1", Role::Student), &owned));
    }

    #[test]
    fn test_action_allow_lists() {
        let owned = course("i1");
        let student = profile("s", Role::Student);
        let instructor = profile("i1", Role::Instructor);

        assert!(ensure(&student, Action::Enroll, None).is_ok());
        assert!(ensure(&instructor, Action::Enroll, None).is_err());
        assert!(ensure(&student, Action::GradeSubmission, Some(&owned)).is_err());
        assert!(ensure(&instructor, Action::GradeSubmission, Some(&owned)).is_ok());
        assert!(ensure(&instructor, Action::ManageUsers, None).is_err());
        assert!(ensure(&instructor, Action::ManageCourse, None).is_err());
        assert!(ensure(&profile("a", Role::Admin), Action::ManageCourse, None).is_ok());
    }

    #[test]
    fn test_nav_items() {
        let admin = nav_items(Role::Admin);
        assert_eq!(admin[0], nav("Dashboard", "/dashboard"));
        assert_eq!(admin[1].title, "Users");
        assert_eq!(admin.len(), 9);

        let student = nav_items(Role::Student);
        assert!(student.iter().any(|item| item.href == "/dashboard/catalog"));
        assert!(!student.iter().any(|item| item.href == "/dashboard/users"));
        assert_eq!(nav_items(Role::Instructor)[1].title, "My Courses");
    }
}
