use crate::catalog::{
    AttachmentId, AttachmentInfo, AttachmentSlot, AttachmentStore, CatalogStore, PropertyFields,
    RecordId, RecordQuery, StoreError, TitleUpdate, derived_filename, derived_title,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Publish,
    Draft,
}

#[derive(Debug, Clone)]
pub struct StoredProperty {
    pub id: RecordId,
    pub external_reference: String,
    pub status: RecordStatus,
    pub feed_managed: bool,
    pub fields: Option<PropertyFields>,
    pub title: String,
    pub slug: String,
    pub permalink: String,
    pub media: BTreeMap<AttachmentSlot, Vec<AttachmentId>>,
}

impl StoredProperty {
    pub fn is_published(&self) -> bool {
        self.status == RecordStatus::Publish
    }

    pub fn media(&self, slot: AttachmentSlot) -> &[AttachmentId] {
        self.media.get(&slot).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[derive(Debug, Clone)]
pub struct StoredAttachment {
    pub id: AttachmentId,
    pub parent: RecordId,
    pub url: String,
    pub filename: String,
    pub title: String,
}

#[derive(Default)]
struct MemoryState {
    next_record: u64,
    next_attachment: u64,
    records: BTreeMap<RecordId, StoredProperty>,
    attachments: BTreeMap<AttachmentId, StoredAttachment>,
    fetched: Vec<String>,
    unreachable: HashSet<String>,
    read_only: HashSet<RecordId>,
}

impl MemoryState {
    fn record_mut(&mut self, id: RecordId) -> Result<&mut StoredProperty, StoreError> {
        if self.read_only.contains(&id) {
            return Err(StoreError::Rejected(format!("record {id} is read-only")));
        }
        self.records.get_mut(&id).ok_or(StoreError::NotFound(id))
    }
}

/// Process-local catalog. Backs dry runs and the test-suite; media is
/// "fetched" by recording the URL, and URLs can be marked unreachable to
/// simulate download failures.
#[derive(Default)]
pub struct MemoryCatalog {
    state: Mutex<MemoryState>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_unreachable(&self, url: &str) {
        self.state.lock().await.unreachable.insert(url.to_string());
    }

    pub async fn clear_unreachable(&self) {
        self.state.lock().await.unreachable.clear();
    }

    /// Makes every write to `id` fail with [`StoreError::Rejected`].
    pub async fn reject_writes(&self, id: RecordId) {
        self.state.lock().await.read_only.insert(id);
    }

    /// Adds a record that is neither published nor feed managed.
    pub async fn insert_draft(&self, reference: &str) -> RecordId {
        let mut state = self.state.lock().await;
        let id = allocate_record(&mut state, reference);
        if let Some(record) = state.records.get_mut(&id) {
            record.status = RecordStatus::Draft;
            record.feed_managed = false;
        }
        id
    }

    pub async fn record(&self, id: RecordId) -> Option<StoredProperty> {
        self.state.lock().await.records.get(&id).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn attachment(&self, id: AttachmentId) -> Option<StoredAttachment> {
        self.state.lock().await.attachments.get(&id).cloned()
    }

    pub async fn attachment_count(&self) -> usize {
        self.state.lock().await.attachments.len()
    }

    pub async fn fetch_count(&self) -> usize {
        self.state.lock().await.fetched.len()
    }
}

fn allocate_record(state: &mut MemoryState, reference: &str) -> RecordId {
    state.next_record += 1;
    let id = RecordId(state.next_record);
    state.records.insert(
        id,
        StoredProperty {
            id,
            external_reference: reference.to_string(),
            status: RecordStatus::Publish,
            feed_managed: true,
            fields: None,
            title: String::new(),
            slug: reference.to_string(),
            permalink: String::new(),
            media: BTreeMap::new(),
        },
    );
    id
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn find(&self, query: &RecordQuery) -> Result<Vec<RecordId>, StoreError> {
        let state = self.state.lock().await;
        let ids = match query {
            RecordQuery::ByReference(reference) => state
                .records
                .values()
                .filter(|record| &record.external_reference == reference)
                .map(|record| record.id)
                .collect(),
            RecordQuery::FeedManagedExcept(keep) => state
                .records
                .values()
                .filter(|record| {
                    record.feed_managed && record.is_published() && !keep.contains(&record.id)
                })
                .map(|record| record.id)
                .collect(),
        };
        Ok(ids)
    }

    async fn create(&self, reference: &str) -> Result<RecordId, StoreError> {
        let mut state = self.state.lock().await;
        Ok(allocate_record(&mut state, reference))
    }

    async fn update_fields(
        &self,
        id: RecordId,
        fields: &PropertyFields,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        record.feed_managed = fields.feed_provided;
        record.fields = Some(fields.clone());
        Ok(())
    }

    async fn update_title(&self, id: RecordId, update: &TitleUpdate) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        record.title = update.title.clone();
        record.slug = update.slug.clone();
        record.permalink = update.permalink.clone();
        Ok(())
    }

    async fn bind_media(
        &self,
        id: RecordId,
        slot: AttachmentSlot,
        attachments: &[AttachmentId],
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let record = state.record_mut(id)?;
        record.media.insert(slot, attachments.to_vec());
        Ok(())
    }

    async fn delete(&self, id: RecordId, cascade_attachments: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.read_only.contains(&id) {
            return Err(StoreError::Rejected(format!("record {id} is read-only")));
        }
        state.records.remove(&id).ok_or(StoreError::NotFound(id))?;
        if cascade_attachments {
            state.attachments.retain(|_, attachment| attachment.parent != id);
        }
        Ok(())
    }
}

#[async_trait]
impl AttachmentStore for MemoryCatalog {
    async fn fetch_and_bind(
        &self,
        record: RecordId,
        url: &str,
    ) -> Result<AttachmentId, StoreError> {
        let mut state = self.state.lock().await;
        if !state.records.contains_key(&record) {
            return Err(StoreError::NotFound(record));
        }
        state.fetched.push(url.to_string());
        if state.unreachable.contains(url) {
            return Err(StoreError::Fetch {
                url: url.to_string(),
                message: "unreachable".to_string(),
            });
        }
        state.next_attachment += 1;
        let id = AttachmentId(state.next_attachment);
        let filename = derived_filename(record, url);
        let title = derived_title(&filename).to_string();
        state.attachments.insert(
            id,
            StoredAttachment {
                id,
                parent: record,
                url: url.to_string(),
                filename,
                title,
            },
        );
        Ok(id)
    }

    async fn list_attachments(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
    ) -> Result<Vec<AttachmentInfo>, StoreError> {
        let state = self.state.lock().await;
        let stored = state.records.get(&record).ok_or(StoreError::NotFound(record))?;
        Ok(stored
            .media(slot)
            .iter()
            .filter_map(|id| state.attachments.get(id))
            .map(|attachment| AttachmentInfo {
                id: attachment.id,
                title: attachment.title.clone(),
                filename: attachment.filename.clone(),
            })
            .collect())
    }

    async fn list_owned(&self, record: RecordId) -> Result<Vec<AttachmentId>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .attachments
            .values()
            .filter(|attachment| attachment.parent == record)
            .map(|attachment| attachment.id)
            .collect())
    }

    async fn delete_attachment(&self, id: AttachmentId) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.attachments.remove(&id);
        match removed {
            Some(attachment) if state.read_only.contains(&attachment.parent) => {
                let parent = attachment.parent;
                state.attachments.insert(id, attachment);
                Err(StoreError::Rejected(format!("record {parent} is read-only")))
            }
            Some(_) => Ok(()),
            None => Err(StoreError::Rejected(format!("attachment {id} does not exist"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_records_url_and_derives_names() {
        let store = MemoryCatalog::new();
        let id = store.create("R-1").await.unwrap();
        let attachment = store
            .fetch_and_bind(id, "https://cdn.example.com/p/brochure.pdf")
            .await
            .unwrap();
        let stored = store.attachment(attachment).await.expect("stored");
        assert_eq!(stored.filename, format!("{id}-brochure.pdf"));
        assert_eq!(stored.title, format!("{id}-brochure"));
        assert_eq!(store.fetch_count().await, 1);
    }

    #[tokio::test]
    async fn unreachable_urls_fail() {
        let store = MemoryCatalog::new();
        let id = store.create("R-1").await.unwrap();
        store.mark_unreachable("https://cdn.example.com/missing.jpg").await;
        let err = store
            .fetch_and_bind(id, "https://cdn.example.com/missing.jpg")
            .await
            .expect_err("unreachable");
        assert!(matches!(err, StoreError::Fetch { .. }));
        assert_eq!(store.attachment_count().await, 0);
    }

    #[tokio::test]
    async fn cascade_delete_removes_owned_attachments() {
        let store = MemoryCatalog::new();
        let keep = store.create("KEEP").await.unwrap();
        let gone = store.create("GONE").await.unwrap();
        store.fetch_and_bind(keep, "https://cdn/a.jpg").await.unwrap();
        store.fetch_and_bind(gone, "https://cdn/b.jpg").await.unwrap();
        store.delete(gone, true).await.unwrap();
        assert_eq!(store.record_count().await, 1);
        assert_eq!(store.attachment_count().await, 1);
        assert!(store.list_owned(gone).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn slot_listing_follows_bound_order() {
        let store = MemoryCatalog::new();
        let id = store.create("R-1").await.unwrap();
        let first = store.fetch_and_bind(id, "https://cdn/1.jpg").await.unwrap();
        let second = store.fetch_and_bind(id, "https://cdn/2.jpg").await.unwrap();
        store
            .bind_media(id, AttachmentSlot::Images, &[second, first])
            .await
            .unwrap();
        let listed = store
            .list_attachments(id, AttachmentSlot::Images)
            .await
            .unwrap();
        let ids: Vec<_> = listed.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![second, first]);
        assert!(
            store
                .list_attachments(id, AttachmentSlot::FloorPlans)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
