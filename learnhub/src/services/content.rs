//! Course content service
//!
//! Content documents are stored flat per course. Module header documents
//! (`type = "module"`) carry a module's title and order; every other item
//! points at its header through `moduleId`.

use crate::access::{self, Action, Screen};
use crate::config;
use crate::database::{
    Content, ContentKind, Course, CreateContentRequest, Repository, UpdateContentRequest,
};
use crate::error::{AppError, Result};
use crate::session::SessionContext;
use crate::storage::blob_store::course_material_path;
use crate::storage::{BlobStore, Upload};
use std::collections::HashMap;

/// Items without a module are collected under this id
pub const UNGROUPED_MODULE_ID: &str = "";

#[derive(Debug, Clone, PartialEq)]
pub struct Module {
    pub id: String,
    pub title: String,
    pub order: i64,
    pub items: Vec<Content>,
}

/// Lesson entered on the add-content form
#[derive(Debug, Clone)]
pub struct NewContent {
    pub title: String,
    pub kind: ContentKind,
    pub description: Option<String>,
    pub duration: Option<String>,
    /// External link, used when no material file is uploaded
    pub url: Option<String>,
    /// Stored file name for the material, extension kept from the upload
    pub display_name: Option<String>,
}

/// Group a course's flat content list into ordered modules.
///
/// Items whose header is missing get a module titled by their module id.
pub fn organize_modules(contents: Vec<Content>) -> Vec<Module> {
    let (headers, items): (Vec<Content>, Vec<Content>) = contents
        .into_iter()
        .partition(|c| c.kind == ContentKind::Module);

    let mut modules: HashMap<String, Module> = headers
        .into_iter()
        .map(|header| {
            let module = Module {
                id: header.id.clone(),
                title: header.title,
                order: header.order,
                items: Vec::new(),
            };
            (header.id, module)
        })
        .collect();

    for item in items {
        let module_id = item
            .module_id
            .clone()
            .unwrap_or_else(|| UNGROUPED_MODULE_ID.to_string());

        modules
            .entry(module_id.clone())
            .or_insert_with(|| Module {
                title: module_id.clone(),
                order: if module_id == UNGROUPED_MODULE_ID { i64::MAX } else { 0 },
                id: module_id,
                items: Vec::new(),
            })
            .items
            .push(item);
    }

    let mut modules: Vec<Module> = modules.into_values().collect();
    for module in &mut modules {
        module
            .items
            .sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
    }
    modules.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));

    modules
}

/// Service for the course content screen
#[derive(Clone)]
pub struct ContentService {
    repo: Repository,
    blobs: BlobStore,
    session: SessionContext,
}

impl ContentService {
    pub fn new(repo: Repository, blobs: BlobStore, session: SessionContext) -> Self {
        Self {
            repo,
            blobs,
            session,
        }
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

    async fn require_content(&self, id: &str) -> Result<Content> {
        self.repo
            .get_content(id)
            .await?
            .ok_or_else(|| AppError::not_found(config::CONTENTS, id))
    }

    pub async fn course_modules(&self, course_id: &str) -> Result<Vec<Module>> {
        let profile = self.session.require_profile()?;
        access::authorize(&profile, Screen::CourseDetail)?;

        let contents = self.repo.list_course_contents(course_id).await.map_err(|e| {
            tracing::error!("Failed to load contents of course {}: {}", course_id, e);
            e
        })?;

        Ok(organize_modules(contents))
    }

    /// Append a module header to a course
    pub async fn add_module(&self, course_id: &str, title: &str) -> Result<Module> {
        self.managed_course(course_id).await?;

        let title = title.trim();
        if title.is_empty() {
            return Err(AppError::Validation("Module title is required".to_string()));
        }

        let existing = self.repo.list_course_contents(course_id).await?;
        let order = existing
            .iter()
            .filter(|c| c.kind == ContentKind::Module)
            .count() as i64;

        tracing::info!("Adding module '{}' to course {}", title, course_id);

        let header = self
            .repo
            .create_content(CreateContentRequest {
                course_id: course_id.to_string(),
                module_id: None,
                title: title.to_string(),
                kind: ContentKind::Module,
                order,
                url: None,
                description: None,
                duration: None,
                locked: false,
            })
            .await?;

        Ok(Module {
            id: header.id,
            title: header.title,
            order: header.order,
            items: Vec::new(),
        })
    }

    /// Append a lesson to a module, uploading its material first when given
    pub async fn add_content(
        &self,
        course_id: &str,
        module_id: &str,
        input: NewContent,
        material: Option<Upload>,
    ) -> Result<Content> {
        self.managed_course(course_id).await?;

        if input.kind == ContentKind::Module {
            return Err(AppError::Validation(
                "Use add_module to create modules".to_string(),
            ));
        }
        if input.title.trim().is_empty() {
            return Err(AppError::Validation("Content title is required".to_string()));
        }

        let existing = self.repo.list_course_contents(course_id).await?;
        if !existing
            .iter()
            .any(|c| c.kind == ContentKind::Module && c.id == module_id)
        {
            return Err(AppError::not_found("module", module_id));
        }
        let order = existing
            .iter()
            .filter(|c| c.kind != ContentKind::Module && c.module_id.as_deref() == Some(module_id))
            .count() as i64;

        let url = match material {
            Some(upload) => {
                let path = course_material_path(
                    course_id,
                    &upload.file_name,
                    input.display_name.as_deref(),
                );
                Some(self.blobs.upload(&path, &upload.data).await?)
            }
            None => input.url,
        };

        tracing::info!("Adding content '{}' to module {}", input.title, module_id);

        let content = self
            .repo
            .create_content(CreateContentRequest {
                course_id: course_id.to_string(),
                module_id: Some(module_id.to_string()),
                title: input.title.trim().to_string(),
                kind: input.kind,
                order,
                url,
                description: input.description,
                duration: input.duration,
                locked: false,
            })
            .await
            .map_err(|e| {
                tracing::error!("Failed to add content to course {}: {}", course_id, e);
                e
            })?;

        Ok(content)
    }

    pub async fn update_content(&self, content_id: &str, req: UpdateContentRequest) -> Result<Content> {
        let content = self.require_content(content_id).await?;
        self.managed_course(&content.course_id).await?;

        self.repo.update_content(content_id, req).await
    }

    pub async fn set_locked(&self, content_id: &str, locked: bool) -> Result<Content> {
        tracing::debug!("Setting locked={} on content {}", locked, content_id);

        self.update_content(
            content_id,
            UpdateContentRequest {
                locked: Some(locked),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn delete_content(&self, content_id: &str) -> Result<()> {
        let content = self.require_content(content_id).await?;
        self.managed_course(&content.course_id).await?;

        tracing::info!("Deleting content: {}", content_id);
        self.repo.delete_content(content_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn content(id: &str, module_id: Option<&str>, kind: ContentKind, order: i64) -> Content {
        Content {
            id: id.to_string(),
            course_id: "c1".to_string(),
            module_id: module_id.map(str::to_string),
            title: format!("Title {}", id),
            kind,
            order,
            url: None,
            description: None,
            duration: None,
            locked: false,
            created_at: None,
        }
    }

    #[test]
    fn test_headers_supply_title_and_order() {
        let modules = organize_modules(vec![
            content("m2", None, ContentKind::Module, 1),
            content("m1", None, ContentKind::Module, 0),
            content("a", Some("m1"), ContentKind::Video, 1),
            content("b", Some("m1"), ContentKind::Reading, 0),
            content("c", Some("m2"), ContentKind::Quiz, 0),
        ]);

        let ids: Vec<&str> = modules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);
        assert_eq!(modules[0].title, "Title m1");

        let items: Vec<&str> = modules[0].items.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(items, vec!["b", "a"]);
        assert_eq!(modules[1].items.len(), 1);
    }

    #[test]
    fn test_items_without_header() {
        let modules = organize_modules(vec![
            content("m1", None, ContentKind::Module, 3),
            content("a", Some("orphan"), ContentKind::Video, 0),
            content("b", None, ContentKind::Reading, 0),
        ]);

        assert_eq!(modules.len(), 3);
        assert_eq!(modules[0].id, "orphan");
        assert_eq!(modules[0].title, "orphan");
        assert_eq!(modules[1].id, "m1");
        assert!(modules[1].items.is_empty());
        assert_eq!(modules[2].id, UNGROUPED_MODULE_ID);
    }

    #[test]
    fn test_empty_course() {
        assert!(organize_modules(Vec::new()).is_empty());
    }
}
