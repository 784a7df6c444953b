use crate::catalog::{
    AttachmentId, AttachmentSlot, AttachmentStore, CatalogStore, RecordId, StoreError,
    derived_filename, derived_title,
};
use crate::feed::FeedEntry;
use std::fmt;
use tracing::{debug, warn};

/// A media slot that did not fully reconcile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFailure {
    pub slot: AttachmentSlot,
    pub reason: String,
}

impl fmt::Display for MediaFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.slot.as_str(), self.reason)
    }
}

impl MediaFailure {
    fn new(slot: AttachmentSlot, reason: impl Into<String>) -> Self {
        Self {
            slot,
            reason: reason.into(),
        }
    }

    fn from_store(slot: AttachmentSlot, err: StoreError) -> Self {
        Self::new(slot, err.to_string())
    }
}

/// Which stored attribute identifies media that is already present.
#[derive(Debug, Clone, Copy)]
enum MatchBy {
    Title,
    Filename,
}

pub struct MediaSync<'a> {
    catalog: &'a dyn CatalogStore,
    attachments: &'a dyn AttachmentStore,
}

impl<'a> MediaSync<'a> {
    pub fn new(catalog: &'a dyn CatalogStore, attachments: &'a dyn AttachmentStore) -> Self {
        Self {
            catalog,
            attachments,
        }
    }

    /// Runs every applicable slot for `entry`. A failing slot never stops the
    /// remaining ones.
    pub async fn sync_entry(&self, record: RecordId, entry: &FeedEntry) -> Vec<MediaFailure> {
        let mut failures = Vec::new();

        if let Some(url) = entry.brochure()
            && let Err(failure) = self.sync_brochure(record, url).await
        {
            failures.push(failure);
        }

        if let Some(url) = entry.featured_image()
            && let Err(failure) = self.sync_featured_image(record, url).await
        {
            failures.push(failure);
        }

        let gallery = entry.gallery_images();
        if !gallery.is_empty()
            && let Err(failure) = self.sync_images(record, gallery).await
        {
            failures.push(failure);
        }

        let floor_plans = entry.floor_plan_urls();
        if !floor_plans.is_empty()
            && let Err(failure) = self.sync_floor_plans(record, &floor_plans).await
        {
            failures.push(failure);
        }

        failures
    }

    pub async fn sync_brochure(&self, record: RecordId, url: &str) -> Result<(), MediaFailure> {
        let slot = AttachmentSlot::Brochure;
        let filename = derived_filename(record, url);
        let current = self
            .attachments
            .list_attachments(record, slot)
            .await
            .map_err(|err| MediaFailure::from_store(slot, err))?;
        if current.first().is_some_and(|info| info.filename == filename) {
            debug!(target = "propfeed.media", record = %record, filename, "brochure_unchanged");
            return Ok(());
        }
        let id = self.fetch(record, slot, url).await?;
        self.bind(record, slot, &[id]).await
    }

    pub async fn sync_featured_image(
        &self,
        record: RecordId,
        url: &str,
    ) -> Result<(), MediaFailure> {
        let slot = AttachmentSlot::FeaturedImage;
        let filename = derived_filename(record, url);
        let title = derived_title(&filename);
        let current = self
            .attachments
            .list_attachments(record, slot)
            .await
            .map_err(|err| MediaFailure::from_store(slot, err))?;
        if current.first().is_some_and(|info| info.title == title) {
            debug!(target = "propfeed.media", record = %record, title, "featured_image_unchanged");
            return Ok(());
        }
        let id = self.fetch(record, slot, url).await?;
        self.bind(record, slot, &[id]).await
    }

    pub async fn sync_images(&self, record: RecordId, urls: &[String]) -> Result<(), MediaFailure> {
        self.sync_list(record, AttachmentSlot::Images, MatchBy::Title, urls)
            .await
    }

    pub async fn sync_floor_plans(
        &self,
        record: RecordId,
        urls: &[String],
    ) -> Result<(), MediaFailure> {
        self.sync_list(record, AttachmentSlot::FloorPlans, MatchBy::Filename, urls)
            .await
    }

    /// Rebinds `slot` to one attachment per URL, reusing stored ones where
    /// they match. The resolved list is persisted even when some URLs failed.
    async fn sync_list(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
        match_by: MatchBy,
        urls: &[String],
    ) -> Result<(), MediaFailure> {
        let current = self
            .attachments
            .list_attachments(record, slot)
            .await
            .map_err(|err| MediaFailure::from_store(slot, err))?;

        let mut resolved: Vec<AttachmentId> = Vec::with_capacity(urls.len());
        let mut unresolved = Vec::new();
        for url in urls {
            let filename = derived_filename(record, url);
            let existing = current.iter().find(|info| match match_by {
                MatchBy::Title => info.title == derived_title(&filename),
                MatchBy::Filename => info.filename == filename,
            });
            if let Some(info) = existing {
                resolved.push(info.id);
                continue;
            }
            match self.fetch(record, slot, url).await {
                Ok(id) => resolved.push(id),
                Err(failure) => unresolved.push(failure.reason),
            }
        }

        self.bind(record, slot, &resolved).await?;
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(MediaFailure::new(
                slot,
                format!(
                    "{} of {} unresolved: {}",
                    unresolved.len(),
                    urls.len(),
                    unresolved.join("; ")
                ),
            ))
        }
    }

    async fn fetch(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
        url: &str,
    ) -> Result<AttachmentId, MediaFailure> {
        self.attachments
            .fetch_and_bind(record, url)
            .await
            .map_err(|err| {
                warn!(
                    target = "propfeed.media",
                    record = %record,
                    slot = slot.as_str(),
                    url,
                    error = %err,
                    "attachment_fetch_failed"
                );
                MediaFailure::from_store(slot, err)
            })
    }

    async fn bind(
        &self,
        record: RecordId,
        slot: AttachmentSlot,
        ids: &[AttachmentId],
    ) -> Result<(), MediaFailure> {
        self.catalog
            .bind_media(record, slot, ids)
            .await
            .map_err(|err| MediaFailure::from_store(slot, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    const BROCHURE: &str = "https://cdn.example.com/docs/brochure.pdf";

    async fn seeded() -> (MemoryCatalog, RecordId) {
        let store = MemoryCatalog::new();
        let id = store.create("REF-1").await.unwrap();
        (store, id)
    }

    fn urls(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn matching_brochure_is_not_fetched_again() {
        let (store, id) = seeded().await;
        let media = MediaSync::new(&store, &store);
        media.sync_brochure(id, BROCHURE).await.unwrap();
        assert_eq!(store.fetch_count().await, 1);

        media.sync_brochure(id, BROCHURE).await.unwrap();
        assert_eq!(store.fetch_count().await, 1);

        media
            .sync_brochure(id, "https://cdn.example.com/docs/brochure-v2.pdf")
            .await
            .unwrap();
        assert_eq!(store.fetch_count().await, 2);
        let bound = store.record(id).await.unwrap();
        assert_eq!(bound.media(AttachmentSlot::Brochure).len(), 1);
    }

    #[tokio::test]
    async fn featured_image_failure_is_reported() {
        let (store, id) = seeded().await;
        store.mark_unreachable("https://cdn/front.jpg").await;
        let media = MediaSync::new(&store, &store);
        let failure = media
            .sync_featured_image(id, "https://cdn/front.jpg")
            .await
            .expect_err("unreachable");
        assert_eq!(failure.slot, AttachmentSlot::FeaturedImage);
        let record = store.record(id).await.unwrap();
        assert!(record.media(AttachmentSlot::FeaturedImage).is_empty());
    }

    #[tokio::test]
    async fn featured_image_matches_by_title() {
        let (store, id) = seeded().await;
        let media = MediaSync::new(&store, &store);
        media
            .sync_featured_image(id, "https://cdn/front.jpg")
            .await
            .unwrap();
        // Same title, different extension.
        media
            .sync_featured_image(id, "https://cdn/front.png")
            .await
            .unwrap();
        assert_eq!(store.fetch_count().await, 1);
    }

    #[tokio::test]
    async fn partial_image_list_is_persisted() {
        let (store, id) = seeded().await;
        store.mark_unreachable("https://cdn/2.jpg").await;
        let media = MediaSync::new(&store, &store);
        let list = urls(&["https://cdn/1.jpg", "https://cdn/2.jpg", "https://cdn/3.jpg"]);
        let failure = media.sync_images(id, &list).await.expect_err("partial");
        assert_eq!(failure.slot, AttachmentSlot::Images);
        assert_eq!(
            store.record(id).await.unwrap().media(AttachmentSlot::Images).len(),
            2
        );

        store.clear_unreachable().await;
        media.sync_images(id, &list).await.unwrap();
        let bound = store.record(id).await.unwrap();
        assert_eq!(bound.media(AttachmentSlot::Images).len(), 3);
        // Only the previously missing image was fetched on the retry.
        assert_eq!(store.fetch_count().await, 4);
    }

    #[tokio::test]
    async fn image_order_follows_feed() {
        let (store, id) = seeded().await;
        let media = MediaSync::new(&store, &store);
        media
            .sync_images(id, &urls(&["https://cdn/a.jpg", "https://cdn/b.jpg"]))
            .await
            .unwrap();
        let first = store.record(id).await.unwrap().media(AttachmentSlot::Images).to_vec();
        media
            .sync_images(id, &urls(&["https://cdn/b.jpg", "https://cdn/a.jpg"]))
            .await
            .unwrap();
        let second = store.record(id).await.unwrap().media(AttachmentSlot::Images).to_vec();
        assert_eq!(second, vec![first[1], first[0]]);
        assert_eq!(store.fetch_count().await, 2);
    }

    #[tokio::test]
    async fn floor_plans_match_by_filename() {
        let (store, id) = seeded().await;
        let media = MediaSync::new(&store, &store);
        media
            .sync_floor_plans(id, &urls(&["https://cdn/plan.png"]))
            .await
            .unwrap();
        // Same title, different filename: fetched again.
        media
            .sync_floor_plans(id, &urls(&["https://cdn/plan.pdf"]))
            .await
            .unwrap();
        assert_eq!(store.fetch_count().await, 2);
    }

    #[tokio::test]
    async fn entry_skips_absent_media() {
        let (store, id) = seeded().await;
        let media = MediaSync::new(&store, &store);
        let entry = FeedEntry {
            reference: "REF-1".into(),
            brochure_url: "   ".into(),
            floor_plans: urls(&["", ""]),
            ..FeedEntry::default()
        };
        assert!(media.sync_entry(id, &entry).await.is_empty());
        assert_eq!(store.fetch_count().await, 0);
    }

    #[tokio::test]
    async fn entry_collects_every_failing_slot() {
        let (store, id) = seeded().await;
        store.mark_unreachable(BROCHURE).await;
        store.mark_unreachable("https://cdn/plan.png").await;
        let media = MediaSync::new(&store, &store);
        let entry = FeedEntry {
            reference: "REF-1".into(),
            brochure_url: BROCHURE.into(),
            images: urls(&["https://cdn/front.jpg", "https://cdn/side.jpg"]),
            floor_plans: urls(&["https://cdn/plan.png"]),
            ..FeedEntry::default()
        };
        let failures = media.sync_entry(id, &entry).await;
        let slots: Vec<_> = failures.iter().map(|f| f.slot).collect();
        assert_eq!(
            slots,
            vec![AttachmentSlot::Brochure, AttachmentSlot::FloorPlans]
        );
        let record = store.record(id).await.unwrap();
        assert_eq!(record.media(AttachmentSlot::FeaturedImage).len(), 1);
        assert_eq!(record.media(AttachmentSlot::Images).len(), 1);
    }
}
