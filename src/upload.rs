//! The upload workflow: quota → ticket → file POST → confirm → metadata
//!
//! One [`UploadCoordinator::run`] call walks a single upload through the
//! whole sequence.  Metadata application immediately after confirm can fail
//! while the servers catch up with the new video; that one failure is not
//! fatal — the update lands on the coordinator's [`RetryQueue`] and the
//! caller still gets the video id.
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use log::{debug, info, warn};
use pin_project_lite::pin_project;

use crate::client::{Privacy, QuotaInfo, VimeoApi};
use crate::error::Result;
use crate::retry::{PendingMetadataUpdate, RetryQueue};

/// Delay before the first metadata attempt, giving the servers time to
/// settle after confirm.  Reduces but does not eliminate the retry path.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Invoked with `(bytes_sent, bytes_total)` as upload chunks go out.  The
/// total is `None` when the file length is unknown; observers must treat
/// that as a plain tick.
pub type ProgressCallback = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

pin_project! {
    /// Wraps the outgoing byte stream, counting what has been sent and
    /// notifying the registered observer.
    pub struct ProgressStream<S> {
        #[pin]
        inner: S,
        sent: u64,
        total: Option<u64>,
        observer: Option<ProgressCallback>,
    }
}

impl<S> ProgressStream<S> {
    pub fn new(inner: S, total: Option<u64>, observer: Option<ProgressCallback>) -> Self {
        Self {
            inner,
            sent: 0,
            total,
            observer,
        }
    }
}

impl<S> Stream for ProgressStream<S>
where
    S: Stream<Item = std::io::Result<Bytes>>,
{
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.sent += chunk.len() as u64;
                if let Some(observer) = this.observer.as_deref() {
                    observer(*this.sent, *this.total);
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            other => other,
        }
    }
}

/// The metadata applied to a video once its upload is confirmed.
#[derive(Debug, Clone)]
pub struct VideoMetadata {
    pub title: String,
    pub tags: Vec<String>,
    pub privacy: Privacy,
}

/// What a completed [`UploadCoordinator::run`] hands back.
///
/// `metadata_applied` is false when the metadata calls hit the
/// eventual-consistency window and were queued instead; the upload itself
/// still succeeded.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub video_id: String,
    pub metadata_applied: bool,
}

/// Applies metadata in the fixed order title, privacy, tags.  The tags call
/// is omitted when the tag list is empty.
pub async fn apply_metadata<A: VimeoApi + Sync + ?Sized>(
    api: &A,
    video_id: &str,
    metadata: &VideoMetadata,
) -> Result<()> {
    api.set_title(video_id, &metadata.title).await?;
    api.set_privacy(video_id, &metadata.privacy).await?;
    if !metadata.tags.is_empty() {
        api.add_tags(video_id, &metadata.tags).await?;
    }
    Ok(())
}

fn warn_if_exceeds(quota: &QuotaInfo, file_size: Option<u64>) {
    if let Some(size) = file_size {
        if size > quota.free {
            warn!(
                "file is {} bytes but only {} bytes of quota remain; the server may reject the upload",
                size, quota.free
            );
        }
    }
}

/// Drives one upload at a time through the ticket protocol.
pub struct UploadCoordinator<A: VimeoApi> {
    api: A,
    settle_delay: Duration,
    pending: RetryQueue,
    /// Quota fetched by a pre-flight [`UploadCoordinator::check_quota`],
    /// consumed by the next `run` so one upload asks the server only once.
    quota: Option<QuotaInfo>,
}

impl<A: VimeoApi + Sync> UploadCoordinator<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            settle_delay: DEFAULT_SETTLE_DELAY,
            pending: RetryQueue::new(),
            quota: None,
        }
    }

    /// Overrides the delay between confirm and the first metadata attempt.
    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Metadata updates still waiting to be applied.
    pub fn pending(&self) -> &RetryQueue {
        &self.pending
    }

    /// Fetches the quota and reports it.  Purely informational: when the
    /// file looks too big this logs a warning and carries on, since the
    /// figure can be stale and the server enforces the real limit during
    /// upload.  The figure is kept and reused by the next [`run`] call
    /// instead of being fetched a second time.
    ///
    /// [`run`]: UploadCoordinator::run
    pub async fn check_quota(&mut self, file_size: Option<u64>) -> Result<QuotaInfo> {
        let quota = self.api.get_quota().await?;
        info!(
            "upload quota: {} bytes free, hd upload {}",
            quota.free,
            if quota.hd { "allowed" } else { "exhausted" }
        );
        warn_if_exceeds(&quota, file_size);
        self.quota = Some(quota.clone());
        Ok(quota)
    }

    /// Runs the whole workflow for one file.
    ///
    /// Every step up to and including confirm propagates its error; only a
    /// metadata failure after a successful confirm is downgraded to a
    /// queued retry.
    pub async fn run(
        &mut self,
        file_path: &Path,
        metadata: VideoMetadata,
        progress: Option<ProgressCallback>,
    ) -> Result<UploadOutcome> {
        let file_size = tokio::fs::metadata(file_path).await.ok().map(|m| m.len());
        if let Some(quota) = self.quota.take() {
            warn_if_exceeds(&quota, file_size);
        } else {
            self.check_quota(file_size).await?;
            self.quota = None;
        }

        let ticket = self.api.get_upload_ticket().await?;
        debug!("acquired upload ticket {}", ticket.id);

        self.api.upload_file(&ticket, file_path, progress).await?;
        debug!("upload finished, confirming ticket {}", ticket.id);

        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "video".to_string());
        let video_id = self.api.confirm_upload(&ticket, &filename).await?;
        info!("upload confirmed, video id {}", video_id);

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }

        match apply_metadata(&self.api, &video_id, &metadata).await {
            Ok(()) => Ok(UploadOutcome {
                video_id,
                metadata_applied: true,
            }),
            Err(e) => {
                warn!(
                    "metadata for video {} not applied yet ({}), queued for retry",
                    video_id, e
                );
                self.pending.enqueue(PendingMetadataUpdate {
                    video_id: video_id.clone(),
                    metadata,
                });
                Ok(UploadOutcome {
                    video_id,
                    metadata_applied: false,
                })
            }
        }
    }

    /// One retry pass over the queued metadata updates.  Returns how many
    /// were applied.
    pub async fn drain_pending(&mut self) -> usize {
        self.pending.drain(&self.api).await
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;

    use all_asserts::{assert_false, assert_true};
    use async_trait::async_trait;

    use super::*;
    use crate::client::{UploadTicket, VimeoApi};
    use crate::error::VimeoError;

    /// Records every call and fails the methods it is told to fail,
    /// mimicking the server during the eventual-consistency window.
    #[derive(Default)]
    struct ScriptedApi {
        calls: Mutex<Vec<String>>,
        failing: Mutex<Vec<&'static str>>,
        confirm_returns_video_id: bool,
    }

    impl ScriptedApi {
        fn new() -> Self {
            Self {
                confirm_returns_video_id: true,
                ..Default::default()
            }
        }

        fn fail(&self, method: &'static str) {
            self.failing.lock().unwrap().push(method);
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String, method: &'static str) -> Result<()> {
            self.calls.lock().unwrap().push(call);
            if self.failing.lock().unwrap().contains(&method) {
                Err(VimeoError::Api {
                    code: 999,
                    message: "not yet replicated".to_string(),
                    raw: String::new(),
                })
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl VimeoApi for ScriptedApi {
        async fn get_quota(&self) -> Result<QuotaInfo> {
            self.record("get_quota".to_string(), "get_quota")?;
            Ok(QuotaInfo {
                free: 1 << 30,
                max: None,
                hd: true,
            })
        }

        async fn get_upload_ticket(&self) -> Result<UploadTicket> {
            self.record("get_upload_ticket".to_string(), "get_upload_ticket")?;
            Ok(UploadTicket {
                id: "ticket-1".to_string(),
                endpoint: "http://upload.example.com/u".to_string(),
            })
        }

        async fn check_ticket(&self, _ticket: &UploadTicket) -> Result<bool> {
            self.record("check_ticket".to_string(), "check_ticket")?;
            Ok(true)
        }

        async fn upload_file(
            &self,
            ticket: &UploadTicket,
            _file_path: &Path,
            progress: Option<ProgressCallback>,
        ) -> Result<()> {
            if let Some(progress) = progress.as_deref() {
                progress(512, None);
            }
            self.record(format!("upload_file:{}", ticket.id), "upload_file")
        }

        async fn confirm_upload(&self, ticket: &UploadTicket, _filename: &str) -> Result<String> {
            self.record(format!("confirm_upload:{}", ticket.id), "confirm_upload")?;
            if self.confirm_returns_video_id {
                Ok("12345".to_string())
            } else {
                Err(VimeoError::Confirmation(
                    "confirm response carries no video_id".to_string(),
                ))
            }
        }

        async fn set_title(&self, video_id: &str, title: &str) -> Result<()> {
            self.record(format!("set_title:{}:{}", video_id, title), "set_title")
        }

        async fn set_description(&self, video_id: &str, _description: &str) -> Result<()> {
            self.record(format!("set_description:{}", video_id), "set_description")
        }

        async fn set_privacy(&self, video_id: &str, _privacy: &Privacy) -> Result<()> {
            self.record(format!("set_privacy:{}", video_id), "set_privacy")
        }

        async fn add_tags(&self, video_id: &str, tags: &[String]) -> Result<()> {
            self.record(
                format!("add_tags:{}:{}", video_id, tags.join(",")),
                "add_tags",
            )
        }

        async fn test_login(&self) -> Result<String> {
            self.record("test_login".to_string(), "test_login")?;
            Ok("someuser".to_string())
        }
    }

    fn sample_metadata(tags: &[&str]) -> VideoMetadata {
        VideoMetadata {
            title: "My Title".to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            privacy: Privacy::Anybody,
        }
    }

    #[tokio::test]
    async fn metadata_calls_run_in_fixed_order() {
        let api = ScriptedApi::new();
        apply_metadata(&api, "12345", &sample_metadata(&["a", "b"]))
            .await
            .unwrap();
        assert_eq!(
            api.calls(),
            vec![
                "set_title:12345:My Title",
                "set_privacy:12345",
                "add_tags:12345:a,b"
            ]
        );
    }

    #[tokio::test]
    async fn tags_call_is_omitted_when_tag_list_is_empty() {
        let api = ScriptedApi::new();
        apply_metadata(&api, "12345", &sample_metadata(&[]))
            .await
            .unwrap();
        assert_eq!(api.calls(), vec!["set_title:12345:My Title", "set_privacy:12345"]);
    }

    #[tokio::test]
    async fn full_run_issues_the_expected_call_sequence() {
        let mut coordinator =
            UploadCoordinator::new(ScriptedApi::new()).settle_delay(Duration::ZERO);
        let outcome = coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&["a", "b"]), None)
            .await
            .unwrap();

        assert_eq!(outcome.video_id, "12345");
        assert_true!(outcome.metadata_applied);
        assert_true!(coordinator.pending().is_empty());
        assert_eq!(
            coordinator.api().calls(),
            vec![
                "get_quota",
                "get_upload_ticket",
                "upload_file:ticket-1",
                "confirm_upload:ticket-1",
                "set_title:12345:My Title",
                "set_privacy:12345",
                "add_tags:12345:a,b"
            ]
        );
    }

    #[tokio::test]
    async fn confirm_without_video_id_stops_before_metadata() {
        let api = ScriptedApi {
            confirm_returns_video_id: false,
            ..Default::default()
        };
        let mut coordinator = UploadCoordinator::new(api).settle_delay(Duration::ZERO);
        let err = coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&["a"]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, VimeoError::Confirmation(_)));
        let calls = coordinator.api().calls();
        assert!(calls.iter().all(|c| !c.starts_with("set_title")));
        assert!(calls.iter().all(|c| !c.starts_with("set_privacy")));
        assert_true!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn metadata_failure_is_queued_and_upload_still_succeeds() {
        let api = ScriptedApi::new();
        api.fail("set_privacy");
        let mut coordinator = UploadCoordinator::new(api).settle_delay(Duration::ZERO);

        let outcome = coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&["a", "b"]), None)
            .await
            .unwrap();

        assert_eq!(outcome.video_id, "12345");
        assert_false!(outcome.metadata_applied);
        assert_eq!(coordinator.pending().len(), 1);

        // the servers catch up; one drain applies the queued update once
        coordinator.api().heal();
        let before = coordinator.api().calls().len();
        assert_eq!(coordinator.drain_pending().await, 1);
        assert_true!(coordinator.pending().is_empty());
        let calls = coordinator.api().calls();
        assert_eq!(
            &calls[before..],
            &[
                "set_title:12345:My Title",
                "set_privacy:12345",
                "add_tags:12345:a,b"
            ]
        );

        // nothing left: a further drain must not re-apply anything
        assert_eq!(coordinator.drain_pending().await, 0);
        assert_eq!(coordinator.api().calls().len(), calls.len());
    }

    #[tokio::test]
    async fn failed_entry_stays_queued_across_drains() {
        let api = ScriptedApi::new();
        api.fail("set_title");
        let mut coordinator = UploadCoordinator::new(api).settle_delay(Duration::ZERO);
        coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&[]), None)
            .await
            .unwrap();
        assert_eq!(coordinator.pending().len(), 1);

        assert_eq!(coordinator.drain_pending().await, 0);
        assert_eq!(coordinator.pending().len(), 1);

        coordinator.api().heal();
        assert_eq!(coordinator.drain_pending().await, 1);
        assert_true!(coordinator.pending().is_empty());
    }

    #[tokio::test]
    async fn preflight_quota_is_reused_by_the_next_run() {
        let mut coordinator =
            UploadCoordinator::new(ScriptedApi::new()).settle_delay(Duration::ZERO);
        coordinator.check_quota(None).await.unwrap();
        coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&[]), None)
            .await
            .unwrap();
        let quota_calls =
            |calls: &[String]| calls.iter().filter(|c| c.as_str() == "get_quota").count();
        assert_eq!(quota_calls(&coordinator.api().calls()), 1);

        // the pre-flight figure is consumed; a later run fetches a fresh one
        coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&[]), None)
            .await
            .unwrap();
        assert_eq!(quota_calls(&coordinator.api().calls()), 2);
    }

    #[tokio::test]
    async fn quota_check_failure_propagates() {
        let api = ScriptedApi::new();
        api.fail("get_quota");
        let mut coordinator = UploadCoordinator::new(api).settle_delay(Duration::ZERO);
        let err = coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&[]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VimeoError::Api { code: 999, .. }));
        assert_eq!(coordinator.api().calls(), vec!["get_quota"]);
    }

    #[tokio::test]
    async fn progress_observer_tolerates_unknown_total() {
        let api = ScriptedApi::new();
        let mut coordinator = UploadCoordinator::new(api).settle_delay(Duration::ZERO);
        let progress: ProgressCallback = Arc::new(|sent, total| {
            assert_eq!(sent, 512);
            assert!(total.is_none());
        });
        coordinator
            .run(Path::new("sample.mp4"), sample_metadata(&[]), Some(progress))
            .await
            .unwrap();
    }
}
