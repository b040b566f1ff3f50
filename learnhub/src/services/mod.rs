//! Services module
//!
//! One service per screen. Each service checks the session profile
//! against the role allow-lists before touching the repository.

pub mod assignments;
pub mod communications;
pub mod content;
pub mod courses;
pub mod discussions;
pub mod enrollments;
pub mod profile;
pub mod users;

pub use assignments::AssignmentsService;
pub use communications::CommunicationsService;
pub use content::ContentService;
pub use courses::CoursesService;
pub use discussions::{DiscussionFeed, DiscussionsService, Thread};
pub use enrollments::EnrollmentsService;
pub use profile::ProfileService;
pub use users::UsersService;
