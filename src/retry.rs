//! Deferred metadata updates for freshly uploaded videos
//!
//! Right after an upload is confirmed the metadata-setting calls can fail
//! while the new video replicates server-side.  Failed updates wait here
//! until a drain pass applies them; entries are only ever removed by
//! succeeding.  Callers poll [`RetryQueue::drain`] periodically and decide
//! for themselves when to give up.
use std::collections::VecDeque;

use log::{debug, warn};

use crate::client::VimeoApi;
use crate::upload::{apply_metadata, VideoMetadata};

/// Metadata that still has to be applied to an uploaded video.
#[derive(Debug, Clone)]
pub struct PendingMetadataUpdate {
    pub video_id: String,
    pub metadata: VideoMetadata,
}

/// FIFO queue of pending updates with at-least-once-until-success
/// semantics: no retry cap, no backoff.
#[derive(Debug, Default)]
pub struct RetryQueue {
    entries: VecDeque<PendingMetadataUpdate>,
}

impl RetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, update: PendingMetadataUpdate) {
        self.entries.push_back(update);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &PendingMetadataUpdate> {
        self.entries.iter()
    }

    /// One pass over the entries present when the drain starts.  Each entry
    /// gets one metadata attempt; successes leave the queue, failures stay
    /// for a later pass.  An entry failing early does not block the ones
    /// behind it.  Returns the number of entries applied.
    pub async fn drain<A: VimeoApi + Sync>(&mut self, api: &A) -> usize {
        let attempts = std::mem::take(&mut self.entries);
        let mut applied = 0;
        for update in attempts {
            match apply_metadata(api, &update.video_id, &update.metadata).await {
                Ok(()) => {
                    debug!("applied queued metadata for video {}", update.video_id);
                    applied += 1;
                }
                Err(e) => {
                    warn!(
                        "metadata for video {} still failing: {}",
                        update.video_id, e
                    );
                    self.entries.push_back(update);
                }
            }
        }
        applied
    }
}
