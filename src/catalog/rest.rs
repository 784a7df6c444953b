use crate::catalog::{
    AttachmentId, AttachmentInfo, AttachmentSlot, AttachmentStore, CatalogStore, PropertyFields,
    RecordId, RecordQuery, StoreError, TitleUpdate, derived_filename, derived_title,
};
use crate::config::{HttpSettings, RestSettings, RetrySettings};
use crate::http::build_client;
use crate::retry::{Transient, with_backoff};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

const PROPERTIES: &str = "properties";
const ATTACHMENTS: &str = "attachments";

/// PostgREST-backed catalog with media kept in a storage bucket.
#[derive(Debug, Clone)]
pub struct RestCatalog {
    base_url: String,
    service_key: String,
    bucket: String,
    http: Client,
    retry: RetrySettings,
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("HTTP {0}")]
    Status(u16),
}

impl Transient for FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdRow<T> {
    id: T,
}

#[derive(Debug, Default, Deserialize)]
struct MediaColumns {
    featured_image_id: Option<AttachmentId>,
    brochure_id: Option<AttachmentId>,
    #[serde(default)]
    image_ids: Option<Vec<AttachmentId>>,
    #[serde(default)]
    floor_plan_ids: Option<Vec<AttachmentId>>,
}

impl MediaColumns {
    fn slot(self, slot: AttachmentSlot) -> Vec<AttachmentId> {
        match slot {
            AttachmentSlot::FeaturedImage => self.featured_image_id.into_iter().collect(),
            AttachmentSlot::Brochure => self.brochure_id.into_iter().collect(),
            AttachmentSlot::Images => self.image_ids.unwrap_or_default(),
            AttachmentSlot::FloorPlans => self.floor_plan_ids.unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct StoragePathRow {
    storage_path: String,
}

#[derive(Serialize)]
struct FieldsPatch<'a> {
    #[serde(flatten)]
    fields: &'a PropertyFields,
    feed_managed: bool,
}

#[derive(Serialize)]
struct NewAttachment<'a> {
    property_id: RecordId,
    filename: &'a str,
    title: &'a str,
    source_url: &'a str,
    storage_path: &'a str,
    mime_type: &'static str,
}

impl RestCatalog {
    pub fn new(settings: &RestSettings, http: &HttpSettings, retry: RetrySettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            service_key: settings.service_key.clone(),
            bucket: settings.bucket.clone(),
            http: build_client(http),
            retry,
        }
    }

    fn table_url(&self, table: &str, query: &str) -> String {
        format!("{}/rest/v1/{table}?{query}", self.base_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Status(response.status().as_u16()));
        }
        Ok(response)
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &str,
    ) -> Result<Vec<T>, StoreError> {
        let response = self.send(self.http.get(self.table_url(table, query))).await?;
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn patch_property(&self, id: RecordId, body: &impl Serialize) -> Result<(), StoreError> {
        let request = self
            .http
            .patch(self.table_url(PROPERTIES, &format!("id=eq.{id}")))
            .header("Prefer", "return=minimal")
            .json(body);
        self.send(request).await.map(|_| ())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        let bytes = response
            .bytes()
            .await
            .map_err(|err| FetchError::Request(err.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn object_url(&self, storage_path: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{storage_path}",
            self.base_url, self.bucket
        )
    }
}

#[async_trait]
impl CatalogStore for RestCatalog {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<RecordId>, StoreError> {
        match query {
            RecordQuery::ByReference(reference) => {
                let filter = format!(
                    "external_reference=eq.{}&select=id",
                    urlencoding::encode(reference)
                );
                let rows: Vec<IdRow<RecordId>> = self.select(PROPERTIES, &filter).await?;
                Ok(rows.into_iter().map(|row| row.id).collect())
            }
            RecordQuery::FeedManagedExcept(keep) => {
                // Filtered locally so the touched set never ends up in the URL.
                let rows: Vec<IdRow<RecordId>> = self
                    .select(PROPERTIES, "feed_managed=is.true&status=eq.publish&select=id")
                    .await?;
                Ok(rows
                    .into_iter()
                    .map(|row| row.id)
                    .filter(|id| !keep.contains(id))
                    .collect())
            }
        }
    }

    async fn create(&self, reference: &str) -> Result<RecordId, StoreError> {
        let request = self
            .http
            .post(self.table_url(PROPERTIES, "select=id"))
            .header("Prefer", "return=representation")
            .json(&json!({
                "external_reference": reference,
                "status": "publish",
                "feed_managed": true,
            }));
        let mut rows: Vec<IdRow<RecordId>> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        let id = rows
            .pop()
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Deserialize("insert returned no rows".to_string()))?;
        info!(target = "propfeed.catalog", reference, id = %id, "property_created");
        Ok(id)
    }

    async fn update_fields(
        &self,
        id: RecordId,
        fields: &PropertyFields,
    ) -> Result<(), StoreError> {
        let patch = FieldsPatch {
            fields,
            feed_managed: fields.feed_provided,
        };
        self.patch_property(id, &patch).await
    }

    async fn update_title(&self, id: RecordId, update: &TitleUpdate) -> Result<(), StoreError> {
        self.patch_property(id, update).await
    }

    async fn bind_media(
        &self,
        id: RecordId,
        slot: AttachmentSlot,
        attachments: &[AttachmentId],
    ) -> Result<(), StoreError> {
        self.patch_property(id, &media_patch(slot, attachments)).await
    }

    async fn delete(&self, id: RecordId, cascade_attachments: bool) -> Result<(), StoreError> {
        if cascade_attachments {
            let request = self
                .http
                .delete(self.table_url(ATTACHMENTS, &format!("property_id=eq.{id}")));
            self.send(request).await?;
        }
        let request = self
            .http
            .delete(self.table_url(PROPERTIES, &format!("id=eq.{id}")));
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for RestCatalog {
    async fn fetch_and_bind(
        &self,
        record: RecordId,
        url: &str,
    ) -> Result<AttachmentId, StoreError> {
        let bytes = with_backoff(&self.retry, "media_fetch", || self.download(url))
            .await
            .map_err(|err| StoreError::Fetch {
                url: url.to_string(),
                message: err.to_string(),
            })?;

        let filename = derived_filename(record, url);
        let title = derived_title(&filename);
        let mime_type = mime_for(&filename);
        let storage_path = format!("{record}/{}", urlencoding::encode(&filename));

        let upload = self
            .http
            .post(self.object_url(&storage_path))
            .header("x-upsert", "true")
            .header("Content-Type", mime_type)
            .body(bytes);
        self.send(upload).await?;

        let row = NewAttachment {
            property_id: record,
            filename: &filename,
            title,
            source_url: url,
            storage_path: &storage_path,
            mime_type,
        };
        let request = self
            .http
            .post(self.table_url(ATTACHMENTS, "select=id"))
            .header("Prefer", "return=representation")
            .json(&row);
        let mut rows: Vec<IdRow<AttachmentId>> = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        let id = rows
            .pop()
            .map(|row| row.id)
            .ok_or_else(|| StoreError::Deserialize("insert returned no rows".to_string()))?;
        debug!(target = "propfeed.media", record = %record, attachment = %id, filename, "attachment_stored");
        Ok(id)
    }

    async fn list_attachments(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
    ) -> Result<Vec<AttachmentInfo>, StoreError> {
        let mut rows: Vec<MediaColumns> = self
            .select(
                PROPERTIES,
                &format!(
                    "id=eq.{record}&select=featured_image_id,brochure_id,image_ids,floor_plan_ids"
                ),
            )
            .await?;
        let ids = rows.pop().ok_or(StoreError::NotFound(record))?.slot(slot);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let filter = format!("id=in.({})&select=id,title,filename", join_ids(&ids));
        let found: Vec<AttachmentInfo> = self.select(ATTACHMENTS, &filter).await?;
        // PostgREST ignores the order of an `in` filter.
        Ok(ids
            .iter()
            .filter_map(|id| found.iter().find(|info| info.id == *id).cloned())
            .collect())
    }

    async fn list_owned(&self, record: RecordId) -> Result<Vec<AttachmentId>, StoreError> {
        let rows: Vec<IdRow<AttachmentId>> = self
            .select(ATTACHMENTS, &format!("property_id=eq.{record}&select=id"))
            .await?;
        Ok(rows.into_iter().map(|row| row.id).collect())
    }

    async fn delete_attachment(&self, id: AttachmentId) -> Result<(), StoreError> {
        let mut rows: Vec<StoragePathRow> = self
            .select(ATTACHMENTS, &format!("id=eq.{id}&select=storage_path"))
            .await?;
        let Some(row) = rows.pop() else {
            return Err(StoreError::Rejected(format!("attachment {id} does not exist")));
        };
        self.send(self.http.delete(self.object_url(&row.storage_path)))
            .await?;
        let request = self
            .http
            .delete(self.table_url(ATTACHMENTS, &format!("id=eq.{id}")));
        self.send(request).await?;
        Ok(())
    }
}

fn media_patch(slot: AttachmentSlot, attachments: &[AttachmentId]) -> Value {
    match slot {
        AttachmentSlot::FeaturedImage => json!({ "featured_image_id": attachments.first() }),
        AttachmentSlot::Brochure => json!({ "brochure_id": attachments.first() }),
        AttachmentSlot::Images => json!({ "image_ids": attachments }),
        AttachmentSlot::FloorPlans => json!({ "floor_plan_ids": attachments }),
    }
}

fn join_ids(ids: &[AttachmentId]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Content type from the filename extension, ignoring any query string.
pub fn mime_for(filename: &str) -> &'static str {
    let path = filename.split('?').next().unwrap_or(filename);
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
