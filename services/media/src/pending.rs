//! Single pending-media slot shared by a capture screen session.

use parking_lot::Mutex;
use reflections_shared::PendingMedia;

/// Holds at most one capture waiting to be sent.
#[derive(Debug, Default)]
pub struct PendingMediaSlot {
    inner: Mutex<Option<PendingMedia>>,
}

impl PendingMediaSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the pending media, returning what was there.
    pub fn set(&self, media: PendingMedia) -> Option<PendingMedia> {
        self.inner.lock().replace(media)
    }

    /// Remove and return the pending media.
    pub fn take(&self) -> Option<PendingMedia> {
        self.inner.lock().take()
    }

    pub fn peek(&self) -> Option<PendingMedia> {
        self.inner.lock().clone()
    }

    /// Put media back after a failed send.
    ///
    /// A capture made while the send was in flight wins; returns whether the
    /// media was restored.
    pub fn restore(&self, media: PendingMedia) -> bool {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return false;
        }
        *guard = Some(media);
        true
    }

    pub fn clear(&self) {
        self.inner.lock().take();
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }
}
