pub mod fields;
pub mod lookup;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};
use thiserror::Error;

pub use fields::{PropertyFields, TitleUpdate};
pub use memory::MemoryCatalog;
pub use rest::RestCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSlot {
    FeaturedImage,
    Images,
    FloorPlans,
    Brochure,
}

impl AttachmentSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttachmentSlot::FeaturedImage => "featured_image",
            AttachmentSlot::Images => "images",
            AttachmentSlot::FloorPlans => "floor_plans",
            AttachmentSlot::Brochure => "brochure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AttachmentInfo {
    pub id: AttachmentId,
    pub title: String,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordQuery {
    /// Records carrying this external reference, whatever their status.
    ByReference(String),
    /// Published, feed-managed records outside the given set.
    FeedManagedExcept(BTreeSet<RecordId>),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("store responded with HTTP {0}")]
    Status(u16),
    #[error("invalid response: {0}")]
    Deserialize(String),
    #[error("record {0} not found")]
    NotFound(RecordId),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("unable to fetch {url}: {message}")]
    Fetch { url: String, message: String },
}

/// Field-level persistence for property records.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<RecordId>, StoreError>;

    /// Creates a published, feed-managed record holding only its reference.
    async fn create(&self, reference: &str) -> Result<RecordId, StoreError>;

    async fn update_fields(&self, id: RecordId, fields: &PropertyFields)
    -> Result<(), StoreError>;

    async fn update_title(&self, id: RecordId, update: &TitleUpdate) -> Result<(), StoreError>;

    /// Replaces the attachments bound to `slot`, in order.
    async fn bind_media(
        &self,
        id: RecordId,
        slot: AttachmentSlot,
        attachments: &[AttachmentId],
    ) -> Result<(), StoreError>;

    async fn delete(&self, id: RecordId, cascade_attachments: bool) -> Result<(), StoreError>;
}

/// Media storage owned by property records.
#[async_trait]
pub trait AttachmentStore: Send + Sync {
    /// Downloads `url` and stores it as an attachment of `record`, named by
    /// [`derived_filename`].
    async fn fetch_and_bind(&self, record: RecordId, url: &str)
    -> Result<AttachmentId, StoreError>;

    /// Attachments currently bound to `slot`, in slot order.
    async fn list_attachments(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
    ) -> Result<Vec<AttachmentInfo>, StoreError>;

    /// Every attachment parented to `record`, bound or not.
    async fn list_owned(&self, record: RecordId) -> Result<Vec<AttachmentId>, StoreError>;

    async fn delete_attachment(&self, id: AttachmentId) -> Result<(), StoreError>;
}

/// Last path segment of a URL, query string included.
pub fn basename(url: &str) -> &str {
    let trimmed = url.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// `{record}-{basename(url)}`, the identity used to recognise media that is
/// already stored.
pub fn derived_filename(record: RecordId, url: &str) -> String {
    format!("{record}-{}", basename(url))
}

/// Filename without its final extension.
pub fn derived_title(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(pos) if pos + 1 < filename.len() => &filename[..pos],
        _ => filename,
    }
}
