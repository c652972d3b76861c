//! Notification dispatcher. Dedups, persists, then hands delivery to the queue.
//!
//! The database write happens before the send job is queued and the two are
//! not transactional: a crash in between leaves a stored notification that
//! was never delivered. Delivery is best-effort with no retry.

use std::sync::Arc;

use blex_core::error::{BlexError, Result};
use blex_core::types::Recipient;
use sha2::{Digest, Sha256};

use crate::dispatch::MessageSender;
use crate::persistence::{Notification, NotificationDb};
use crate::queue::TaskQueue;

/// Dedup fingerprint: SHA-256 hex of `username + url + info + salt`.
pub fn fingerprint(username: &str, url: &str, info: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update(url.as_bytes());
    hasher.update(info.as_bytes());
    hasher.update(salt.unwrap_or_default().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Message text sent to chat apps. Relative URLs are resolved against the site.
pub fn compose_message(site_url: &str, url: &str, info: &str) -> String {
    let link = if url.starts_with("http://") || url.starts_with("https://") {
        url.to_string()
    } else {
        format!(
            "{}/{}",
            site_url.trim_end_matches('/'),
            url.trim_start_matches('/')
        )
    };
    format!("{info}\n\n{link}")
}

/// Creates notifications and schedules their delivery.
pub struct Notifier {
    db: Arc<NotificationDb>,
    queue: Arc<TaskQueue>,
    sender: Option<Arc<dyn MessageSender>>,
    site_url: String,
}

impl Notifier {
    pub fn new(db: Arc<NotificationDb>, queue: Arc<TaskQueue>, site_url: &str) -> Self {
        Self {
            db,
            queue,
            sender: None,
            site_url: site_url.to_string(),
        }
    }

    /// Attach an outbound channel. Without one, notifications are stored only.
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        self.sender = Some(sender);
        self
    }

    /// Record a notification for `user` and queue its delivery.
    ///
    /// Returns `Ok(None)` when an identical notification (same fingerprint)
    /// already exists; nothing is written or sent in that case. A `salt`
    /// makes otherwise identical notifications distinct.
    pub fn notify(
        &self,
        user: &Recipient,
        url: &str,
        info: &str,
        salt: Option<&str>,
    ) -> Result<Option<Notification>> {
        let key = fingerprint(&user.username, url, info, salt);

        let Some(notification) = self.db.insert_if_absent(&user.username, url, info, &key)? else {
            tracing::debug!("Duplicate notification for {} skipped", user.username);
            return Ok(None);
        };

        tracing::info!(
            "Notification #{} created for {}",
            notification.id,
            user.username
        );

        if let (Some(chat_id), Some(sender)) = (user.telegram_chat(), &self.sender) {
            self.schedule_send(Arc::clone(sender), chat_id, url, info);
        }

        Ok(Some(notification))
    }

    fn schedule_send(&self, sender: Arc<dyn MessageSender>, chat_id: &str, url: &str, info: &str) {
        let chat_id = chat_id.to_string();
        let text = compose_message(&self.site_url, url, info);

        let submitted = self.queue.submit_async(move || async move {
            sender.send(&chat_id, &text).await?;
            anyhow::Ok(())
        });

        match submitted {
            Ok(()) => {}
            Err(BlexError::QueueStopped) => {
                tracing::warn!("Task queue stopped; notification stored but not delivered");
            }
            Err(e) => tracing::warn!("Failed to queue notification delivery: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, chat_id: &str, text: &str) -> Result<()> {
            if self.fail {
                return Err(BlexError::Channel("network unreachable".into()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((chat_id.to_string(), text.to_string()));
            Ok(())
        }
    }

    fn setup(sender: Arc<RecordingSender>) -> (Notifier, Arc<NotificationDb>, Arc<TaskQueue>) {
        let db = Arc::new(NotificationDb::open_in_memory().unwrap());
        let queue = Arc::new(TaskQueue::started().unwrap());
        let notifier = Notifier::new(Arc::clone(&db), Arc::clone(&queue), "https://blex.me")
            .with_sender(sender);
        (notifier, db, queue)
    }

    #[test]
    fn test_fingerprint() {
        let a = fingerprint("alice", "/@alice/hello", "liked your post", None);
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("alice", "/@alice/hello", "liked your post", Some("")));
        assert_ne!(a, fingerprint("alice", "/@alice/hello", "liked your post", Some("1")));
        assert_ne!(a, fingerprint("bob", "/@alice/hello", "liked your post", None));
    }

    #[test]
    fn test_compose_message() {
        assert_eq!(
            compose_message("https://blex.me/", "/@alice/hello", "새 댓글"),
            "새 댓글\n\nhttps://blex.me/@alice/hello"
        );
        assert_eq!(
            compose_message("https://blex.me", "https://example.com/x", "hi"),
            "hi\n\nhttps://example.com/x"
        );
    }

    #[tokio::test]
    async fn test_duplicate_notify_is_noop() {
        let sender = Arc::new(RecordingSender::default());
        let (notifier, db, queue) = setup(Arc::clone(&sender));
        let user = Recipient::new("alice").with_telegram("100");

        let first = notifier.notify(&user, "/@alice/p", "liked", None).unwrap();
        let second = notifier.notify(&user, "/@alice/p", "liked", None).unwrap();
        assert!(first.is_some());
        assert!(second.is_none());

        queue.stop().await;
        assert_eq!(db.list_for_user("alice", None).unwrap().len(), 1);
        let sent = sender.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "100");
        assert_eq!(sent[0].1, "liked\n\nhttps://blex.me/@alice/p");
    }

    #[tokio::test]
    async fn test_salt_distinguishes_notifications() {
        let sender = Arc::new(RecordingSender::default());
        let (notifier, db, queue) = setup(Arc::clone(&sender));
        let user = Recipient::new("alice");

        notifier.notify(&user, "/n", "info", Some("A")).unwrap();
        notifier.notify(&user, "/n", "info", Some("B")).unwrap();

        queue.stop().await;
        assert_eq!(db.list_for_user("alice", None).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_send_without_linked_telegram() {
        let sender = Arc::new(RecordingSender::default());
        let (notifier, _db, queue) = setup(Arc::clone(&sender));

        notifier
            .notify(&Recipient::new("bob"), "/b", "hello", None)
            .unwrap();

        queue.stop().await;
        assert!(sender.sent.lock().unwrap().is_empty());
        assert_eq!(queue.stats().processed, 0);
    }

    #[tokio::test]
    async fn test_no_send_without_sender() {
        let db = Arc::new(NotificationDb::open_in_memory().unwrap());
        let queue = Arc::new(TaskQueue::started().unwrap());
        let notifier = Notifier::new(db, Arc::clone(&queue), "https://blex.me");

        let stored = notifier
            .notify(&Recipient::new("carol").with_telegram("7"), "/c", "hi", None)
            .unwrap();
        assert!(stored.is_some());

        queue.stop().await;
        assert_eq!(queue.stats().processed, 0);
    }

    #[tokio::test]
    async fn test_send_failure_is_absorbed() {
        let sender = Arc::new(RecordingSender {
            fail: true,
            ..Default::default()
        });
        let (notifier, db, queue) = setup(sender);
        let user = Recipient::new("dave").with_telegram("9");

        assert!(notifier.notify(&user, "/d", "x", None).unwrap().is_some());

        queue.stop().await;
        assert_eq!(queue.stats().failed, 1);
        assert_eq!(db.unread_count("dave").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stopped_queue_still_persists() {
        let sender = Arc::new(RecordingSender::default());
        let (notifier, _db, queue) = setup(Arc::clone(&sender));
        queue.stop().await;

        let stored = notifier
            .notify(&Recipient::new("erin").with_telegram("5"), "/e", "late", None)
            .unwrap();
        assert!(stored.is_some());
        assert!(sender.sent.lock().unwrap().is_empty());
    }
}
