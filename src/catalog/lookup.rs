use crate::catalog::{CatalogStore, RecordId, RecordQuery, StoreError};
use tracing::{debug, warn};

/// Resolves a feed reference to its record. Ambiguous references resolve to
/// `None`, so a duplicate is created instead of overwriting an unrelated
/// record.
pub async fn find_by_reference(
    store: &dyn CatalogStore,
    reference: &str,
) -> Result<Option<RecordId>, StoreError> {
    let matches = store
        .find(&RecordQuery::ByReference(reference.to_string()))
        .await?;
    match matches.as_slice() {
        [] => Ok(None),
        [id] => Ok(Some(*id)),
        many => {
            warn!(
                target = "propfeed.catalog",
                reference,
                matches = many.len(),
                ids = ?many,
                "ambiguous_reference_treated_as_missing"
            );
            Ok(None)
        }
    }
}

/// Creates the skeleton record for a new reference. Blank references never
/// reach the store.
pub async fn create_skeleton(
    store: &dyn CatalogStore,
    reference: &str,
) -> Result<Option<RecordId>, StoreError> {
    if reference.trim().is_empty() {
        return Ok(None);
    }
    let id = store.create(reference).await?;
    debug!(target = "propfeed.catalog", reference, id = %id, "skeleton_created");
    Ok(Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MemoryCatalog;

    #[tokio::test]
    async fn finds_single_match_across_statuses() {
        let store = MemoryCatalog::new();
        let id = store.insert_draft("REF-1").await;
        assert_eq!(find_by_reference(&store, "REF-1").await.unwrap(), Some(id));
        assert_eq!(find_by_reference(&store, "REF-2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn ambiguous_reference_is_not_found() {
        let store = MemoryCatalog::new();
        store.create("DUP").await.unwrap();
        store.create("DUP").await.unwrap();
        assert_eq!(find_by_reference(&store, "DUP").await.unwrap(), None);
    }

    #[tokio::test]
    async fn blank_reference_creates_nothing() {
        let store = MemoryCatalog::new();
        assert_eq!(create_skeleton(&store, "").await.unwrap(), None);
        assert_eq!(create_skeleton(&store, "  \t ").await.unwrap(), None);
        assert_eq!(store.record_count().await, 0);
    }

    #[tokio::test]
    async fn skeleton_is_feed_managed_and_published() {
        let store = MemoryCatalog::new();
        let id = create_skeleton(&store, "NEW-1").await.unwrap().expect("id");
        let record = store.record(id).await.expect("record");
        assert_eq!(record.external_reference, "NEW-1");
        assert!(record.feed_managed);
        assert!(record.is_published());
    }
}
