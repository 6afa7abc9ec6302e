//! Removes derived full-text copies when items are deleted.

use crate::model::library::LibraryKey;
use crate::notify::{NotificationEvent, NotifierRegistry, NotifyType, Observer, ObserverHandle};
use crate::search::FulltextIndex;
use crate::storage::BlobStore;
use log::warn;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Item observer that deletes blobs and index entries of deleted items.
///
/// Failures are logged and skipped; the relational delete has already
/// committed when this runs.
pub struct FulltextCleanupObserver {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn FulltextIndex>,
}

impl FulltextCleanupObserver {
    pub fn new(blobs: Arc<dyn BlobStore>, index: Arc<dyn FulltextIndex>) -> Self {
        Self { blobs, index }
    }

    /// Registers a cleanup observer for item notifications.
    pub fn register(
        registry: &NotifierRegistry,
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn FulltextIndex>,
    ) -> ObserverHandle {
        registry.register_observer(Arc::new(Self::new(blobs, index)), NotifyType::Item)
    }
}

impl Observer for FulltextCleanupObserver {
    fn notify(
        &self,
        event: NotificationEvent,
        _notify_type: NotifyType,
        keys: &BTreeSet<LibraryKey>,
    ) {
        if event != NotificationEvent::Delete {
            return;
        }

        for target in keys {
            if let Err(err) = self.index.remove(target.library_id, &target.key) {
                warn!(
                    "event=fulltext_cleanup module=search status=error stage=index library_id={} key={} error={err}",
                    target.library_id, target.key
                );
            }
            if let Err(err) = self.blobs.delete(target.library_id, &target.key) {
                warn!(
                    "event=fulltext_cleanup module=search status=error stage=blob library_id={} key={} error={err}",
                    target.library_id, target.key
                );
            }
        }
    }
}
