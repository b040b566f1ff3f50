//! Shared list queries
//!
//! Screens hold fetched lists in memory and derive their visible view
//! through one [`ListFilter`]: a case-insensitive search over the record's
//! text fields, an optional equality predicate, and a sort order. Ties in
//! the sort key are broken by id so the order is total.

use crate::database::{Course, Enrollment, User};
use crate::error::{AppError, Result};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

pub trait Identified {
    fn id(&self) -> &str;
}

/// Text fields matched by the search box
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;
}

pub trait Timestamped {
    fn created_at(&self) -> Option<DateTime<Utc>>;
}

pub trait Titled {
    fn title(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
    TitleAsc,
    TitleDesc,
}

impl FromStr for SortOrder {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "newest" => Ok(SortOrder::Newest),
            "oldest" => Ok(SortOrder::Oldest),
            "a-z" => Ok(SortOrder::TitleAsc),
            "z-a" => Ok(SortOrder::TitleDesc),
            other => Err(AppError::Validation(format!("Unknown sort order: {}", other))),
        }
    }
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
            SortOrder::TitleAsc => "a-z",
            SortOrder::TitleDesc => "z-a",
        };
        f.write_str(s)
    }
}

impl SortOrder {
    /// Compare two records. Records without a timestamp sort as oldest.
    pub fn compare<T>(&self, a: &T, b: &T) -> Ordering
    where
        T: Identified + Timestamped + Titled,
    {
        let primary = match self {
            SortOrder::Newest => b.created_at().cmp(&a.created_at()),
            SortOrder::Oldest => a.created_at().cmp(&b.created_at()),
            SortOrder::TitleAsc => compare_titles(a.title(), b.title()),
            SortOrder::TitleDesc => compare_titles(b.title(), a.title()),
        };

        primary.then_with(|| a.id().cmp(b.id()))
    }
}

fn compare_titles(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;

/// Search, predicate and sort applied to an in-memory list
pub struct ListFilter<T> {
    search: String,
    predicate: Option<Predicate<T>>,
    order: SortOrder,
}

impl<T> Default for ListFilter<T> {
    fn default() -> Self {
        Self {
            search: String::new(),
            predicate: None,
            order: SortOrder::default(),
        }
    }
}

impl<T> ListFilter<T>
where
    T: Identified + Searchable + Timestamped + Titled,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn search(mut self, text: &str) -> Self {
        self.search = text.trim().to_lowercase();
        self
    }

    /// Keep only records satisfying an equality check
    pub fn matching<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn sort(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn accepts(&self, item: &T) -> bool {
        let found = self.search.is_empty()
            || item
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(&self.search));

        found && self.predicate.as_ref().map_or(true, |p| p(item))
    }

    pub fn apply(&self, items: Vec<T>) -> Vec<T> {
        let mut visible: Vec<T> = items.into_iter().filter(|item| self.accepts(item)).collect();
        visible.sort_by(|a, b| self.order.compare(a, b));
        visible
    }
}

// ===== Record bindings =====

impl Identified for Course {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Searchable for Course {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.description.as_str()]
    }
}

impl Timestamped for Course {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Titled for Course {
    fn title(&self) -> &str {
        &self.title
    }
}

impl Identified for Enrollment {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Searchable for Enrollment {
    fn search_fields(&self) -> Vec<&str> {
        [&self.user_name, &self.user_email, &self.course_title]
            .into_iter()
            .filter_map(|field| field.as_deref())
            .collect()
    }
}

impl Timestamped for Enrollment {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Titled for Enrollment {
    fn title(&self) -> &str {
        self.course_title.as_deref().unwrap_or_default()
    }
}

impl Identified for User {
    fn id(&self) -> &str {
        &self.id
    }
}

impl Searchable for User {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.display_name.as_str(), self.email.as_str()]
    }
}

impl Timestamped for User {
    fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }
}

impl Titled for User {
    fn title(&self) -> &str {
        &self.display_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{EnrollmentStatus, InstructorRef};
    use chrono::Duration;

    fn course(id: &str, title: &str, category: &str, age_days: i64) -> Course {
        Course {
            id: id.to_string(),
            title: title.to_string(),
            description: format!("About {}", title),
            category: category.to_string(),
            level: "beginner".to_string(),
            instructor: InstructorRef {
                id: "i1".to_string(),
                name: "Teacher".to_string(),
            },
            enrollments: 0,
            image: None,
            created_at: Some(Utc::now() - Duration::days(age_days)),
            updated_at: None,
        }
    }

    fn enrollment(id: &str, created_at: Option<DateTime<Utc>>) -> Enrollment {
        Enrollment {
            id: id.to_string(),
            user_id: "s1".to_string(),
            course_id: "c1".to_string(),
            status: EnrollmentStatus::Active,
            progress: 0,
            user_name: Some("Sam".to_string()),
            user_email: Some("sam@example.com".to_string()),
            course_title: Some("Rust".to_string()),
            created_at,
            updated_at: None,
        }
    }

    #[test]
    fn test_parse_sort_order() {
        assert_eq!("a-z".parse::<SortOrder>().unwrap(), SortOrder::TitleAsc);
        assert_eq!("z-a".parse::<SortOrder>().unwrap(), SortOrder::TitleDesc);
        assert_eq!(SortOrder::Oldest.to_string(), "oldest");
        assert!("sideways".parse::<SortOrder>().is_err());
    }

    #[test]
    fn test_category_filter() {
        let courses = vec![
            course("1", "A", "design", 1),
            course("2", "B", "programming", 2),
        ];

        let visible = ListFilter::new()
            .matching(|c: &Course| c.category == "design")
            .apply(courses);

        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, "A");
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let courses = vec![
            course("1", "Intro to Rust", "programming", 1),
            course("2", "Color Theory", "design", 2),
        ];

        let visible = ListFilter::new().search("  RUST ").apply(courses.clone());
        assert_eq!(visible.len(), 1);

        // Description is searched too
        let visible = ListFilter::new().search("about color").apply(courses);
        assert_eq!(visible[0].id, "2");
    }

    #[test]
    fn test_title_sorts() {
        let courses = vec![
            course("1", "beta", "x", 1),
            course("2", "Alpha", "x", 2),
            course("3", "gamma", "x", 3),
        ];

        let asc: Vec<String> = ListFilter::new()
            .sort(SortOrder::TitleAsc)
            .apply(courses.clone())
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(asc, vec!["Alpha", "beta", "gamma"]);

        let desc: Vec<String> = ListFilter::new()
            .sort(SortOrder::TitleDesc)
            .apply(courses)
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(desc, vec!["gamma", "beta", "Alpha"]);
    }

    #[test]
    fn test_newest_and_oldest_follow_creation_time() {
        let base = Utc::now();
        let enrollments = vec![
            enrollment("b", Some(base - Duration::hours(2))),
            enrollment("a", Some(base)),
            enrollment("c", None),
            enrollment("d", Some(base - Duration::hours(2))),
        ];

        let newest: Vec<String> = ListFilter::new()
            .sort(SortOrder::Newest)
            .apply(enrollments.clone())
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(newest, vec!["a", "b", "d", "c"]);

        let oldest: Vec<String> = ListFilter::new()
            .sort(SortOrder::Oldest)
            .apply(enrollments)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(oldest, vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_enrollment_search_fields() {
        let mut other = enrollment("2", None);
        other.user_name = Some("Alex".to_string());
        other.user_email = Some("alex@example.com".to_string());
        other.course_title = Some("Design".to_string());

        let visible = ListFilter::new()
            .search("sam@")
            .apply(vec![enrollment("1", None), other]);

        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "1");
    }
}
