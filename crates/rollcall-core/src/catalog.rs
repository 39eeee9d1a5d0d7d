//! Courses, lessons and their learning resources.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("course with this title already exists: {0}")]
    CourseExists(String),
    #[error("course not found: {0}")]
    CourseNotFound(String),
    #[error("invalid {field}: {message}")]
    InvalidField { field: &'static str, message: String },
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Video,
    Pdf,
    Article,
    Image,
    Other,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Pdf => "pdf",
            Self::Article => "article",
            Self::Image => "image",
            Self::Other => "other",
        }
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "video" => Ok(Self::Video),
            "pdf" => Ok(Self::Pdf),
            "article" => Ok(Self::Article),
            "image" => Ok(Self::Image),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown resource kind: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonResource {
    pub id: String,
    pub kind: ResourceKind,
    pub url: String,
}

impl LessonResource {
    pub fn new(kind: ResourceKind, url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Lesson ids in insertion order.
    pub lessons: Vec<String>,
}

impl Course {
    /// Validate title and description (both required, trimmed).
    pub fn new(title: &str, description: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: required("title", title)?,
            description: required("description", description)?,
            lessons: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: String,
    pub resources: Vec<LessonResource>,
}

/// Request to attach a lesson to an existing course.
///
/// The document URL points at a file already placed by the upload
/// service; this crate never touches file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLesson {
    pub course_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub video_url: Option<String>,
    #[serde(default)]
    pub pdf_url: Option<String>,
}

impl NewLesson {
    pub fn into_lesson(self) -> Result<Lesson, CatalogError> {
        let course_id = required("course_id", &self.course_id)?;
        let title = required("title", &self.title)?;

        let mut resources = Vec::new();
        if let Some(url) = non_blank(self.video_url.as_deref()) {
            resources.push(LessonResource::new(ResourceKind::Video, url));
        }
        if let Some(url) = non_blank(self.pdf_url.as_deref()) {
            resources.push(LessonResource::new(ResourceKind::Pdf, url));
        }

        Ok(Lesson {
            id: uuid::Uuid::new_v4().to_string(),
            course_id,
            title,
            description: self.description.as_deref().map(str::trim).unwrap_or_default().to_string(),
            resources,
        })
    }
}

fn required(field: &'static str, value: &str) -> Result<String, CatalogError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(CatalogError::InvalidField {
            field,
            message: format!("{field} is required"),
        });
    }
    Ok(value.to_string())
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
