use crate::catalog::{AttachmentStore, CatalogStore, RecordId, RecordQuery, StoreError};
use crate::models::SweepSummary;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Deletes feed-managed, published records that a complete run did not
/// touch, attachments first. A record that fails to delete is reported and
/// left for the next complete run.
pub async fn sweep(
    catalog: &dyn CatalogStore,
    attachments: &dyn AttachmentStore,
    touched: &BTreeSet<RecordId>,
) -> Result<SweepSummary, StoreError> {
    let stale = catalog
        .find(&RecordQuery::FeedManagedExcept(touched.clone()))
        .await?;

    let mut deleted = Vec::new();
    let mut failed = Vec::new();
    for record in stale {
        match remove_record(catalog, attachments, record).await {
            Ok(removed) => {
                info!(
                    target = "propfeed.sweep",
                    record = %record,
                    attachments = removed,
                    "stale_record_deleted"
                );
                deleted.push(record);
            }
            Err(err) => {
                warn!(
                    target = "propfeed.sweep",
                    record = %record,
                    error = %err,
                    "stale_record_delete_failed"
                );
                failed.push(record);
            }
        }
    }

    Ok(SweepSummary::Performed { deleted, failed })
}

async fn remove_record(
    catalog: &dyn CatalogStore,
    attachments: &dyn AttachmentStore,
    record: RecordId,
) -> Result<usize, StoreError> {
    let owned = attachments.list_owned(record).await?;
    let mut removed = 0;
    for attachment in &owned {
        match attachments.delete_attachment(*attachment).await {
            Ok(()) => removed += 1,
            Err(err) => warn!(
                target = "propfeed.sweep",
                record = %record,
                attachment = %attachment,
                error = %err,
                "attachment_delete_failed"
            ),
        }
    }
    catalog.delete(record, true).await?;
    Ok(removed)
}
