//! Ephemeral status messages for the UI.
//!
//! At most one notification per kind is visible.  A new notification replaces the old one of the
//! same kind and restarts its expiry timer; nothing is queued.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::observability::{NOTIFICATIONS_EXPIRED, NOTIFICATIONS_RAISED};

/// Time an error notification stays visible by default.
pub const DEFAULT_ERROR_TTL: Duration = Duration::from_secs(5);
/// Time a success notification stays visible by default.
pub const DEFAULT_SUCCESS_TTL: Duration = Duration::from_secs(3);

/// What a notification reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// Something went wrong.
    Error,
    /// Something worked.
    Success,
}

/// A single visible notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// Error or success.
    pub kind: NotificationKind,
    /// The text to show.
    pub text: String,
    /// When it was raised.
    pub created_at: OffsetDateTime,
}

/// Everything currently visible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notifications {
    /// The active error notification.
    pub error: Option<Notification>,
    /// The active success notification.
    pub success: Option<Notification>,
}

impl Notifications {
    /// The active notification of `kind`.
    pub fn get(&self, kind: NotificationKind) -> Option<&Notification> {
        match kind {
            NotificationKind::Error => self.error.as_ref(),
            NotificationKind::Success => self.success.as_ref(),
        }
    }

    fn slot(&mut self, kind: NotificationKind) -> &mut Option<Notification> {
        match kind {
            NotificationKind::Error => &mut self.error,
            NotificationKind::Success => &mut self.success,
        }
    }
}

#[derive(Default)]
struct Timers {
    generation: u64,
    error: Option<(u64, JoinHandle<()>)>,
    success: Option<(u64, JoinHandle<()>)>,
}

impl Timers {
    fn slot(&mut self, kind: NotificationKind) -> &mut Option<(u64, JoinHandle<()>)> {
        match kind {
            NotificationKind::Error => &mut self.error,
            NotificationKind::Success => &mut self.success,
        }
    }
}

struct Inner {
    state: watch::Sender<Notifications>,
    timers: Mutex<Timers>,
    error_ttl: Duration,
    success_ttl: Duration,
}

/// The notification channel.  Clones share state.
#[derive(Clone)]
pub struct NotificationChannel {
    inner: Arc<Inner>,
}

impl NotificationChannel {
    /// Create a channel with the given time-to-live per kind.
    pub fn new(error_ttl: Duration, success_ttl: Duration) -> Self {
        let (state, _) = watch::channel(Notifications::default());
        Self {
            inner: Arc::new(Inner {
                state,
                timers: Mutex::new(Timers::default()),
                error_ttl,
                success_ttl,
            }),
        }
    }

    /// The time-to-live for `kind`.
    pub fn ttl(&self, kind: NotificationKind) -> Duration {
        match kind {
            NotificationKind::Error => self.inner.error_ttl,
            NotificationKind::Success => self.inner.success_ttl,
        }
    }

    /// Show `text`, replacing any notification of the same kind.
    ///
    /// The expiry timer runs on the current tokio runtime.  Outside a runtime the notification
    /// is shown but never expires on its own.
    pub fn notify(&self, kind: NotificationKind, text: impl Into<String>) {
        let notification = Notification {
            kind,
            text: text.into(),
            created_at: OffsetDateTime::now_utc(),
        };
        NOTIFICATIONS_RAISED.click();
        tracing::debug!(?kind, text = %notification.text, "notification raised");

        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        timers.generation += 1;
        let generation = timers.generation;
        if let Some((_, handle)) = timers.slot(kind).take() {
            handle.abort();
        }
        self.inner
            .state
            .send_modify(|state| *state.slot(kind) = Some(notification));

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let ttl = self.ttl(kind);
                let this = self.clone();
                let handle = runtime.spawn(async move {
                    tokio::time::sleep(ttl).await;
                    this.expire(kind, generation);
                });
                *timers.slot(kind) = Some((generation, handle));
            }
            Err(_) => {
                tracing::warn!(?kind, "no tokio runtime; notification will not expire");
            }
        }
    }

    /// Shorthand for an error notification.
    pub fn error(&self, text: impl Into<String>) {
        self.notify(NotificationKind::Error, text);
    }

    /// Shorthand for a success notification.
    pub fn success(&self, text: impl Into<String>) {
        self.notify(NotificationKind::Success, text);
    }

    /// Remove the notification of `kind` now and cancel its timer.
    pub fn clear(&self, kind: NotificationKind) {
        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, handle)) = timers.slot(kind).take() {
            handle.abort();
        }
        self.inner.state.send_if_modified(|state| state.slot(kind).take().is_some());
    }

    /// What is visible right now.
    pub fn current(&self) -> Notifications {
        self.inner.state.borrow().clone()
    }

    /// Observe changes.
    pub fn subscribe(&self) -> watch::Receiver<Notifications> {
        self.inner.state.subscribe()
    }

    fn expire(&self, kind: NotificationKind, generation: u64) {
        let mut timers = self.inner.timers.lock().unwrap_or_else(|e| e.into_inner());
        // A newer notify() or clear() owns the slot now.
        if !matches!(timers.slot(kind), Some((current, _)) if *current == generation) {
            return;
        }
        timers.slot(kind).take();
        NOTIFICATIONS_EXPIRED.click();
        self.inner.state.send_modify(|state| *state.slot(kind) = None);
    }
}

impl Default for NotificationChannel {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_TTL, DEFAULT_SUCCESS_TTL)
    }
}

impl std::fmt::Debug for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationChannel")
            .field("current", &*self.inner.state.borrow())
            .field("error_ttl", &self.inner.error_ttl)
            .field("success_ttl", &self.inner.success_ttl)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(channel: &NotificationChannel, kind: NotificationKind) -> Option<String> {
        channel.current().get(kind).map(|n| n.text.clone())
    }

    #[tokio::test(start_paused = true)]
    async fn second_notify_overwrites_first() {
        let channel = NotificationChannel::default();
        channel.notify(NotificationKind::Error, "A");
        channel.notify(NotificationKind::Error, "B");
        assert_eq!(text(&channel, NotificationKind::Error), Some("B".to_string()));
        assert_eq!(text(&channel, NotificationKind::Success), None);
    }

    #[tokio::test(start_paused = true)]
    async fn notifications_expire_per_kind() {
        let channel = NotificationChannel::default();
        channel.error("broken");
        channel.success("saved");

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(text(&channel, NotificationKind::Success), None);
        assert_eq!(
            text(&channel, NotificationKind::Error),
            Some("broken".to_string())
        );

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(channel.current(), Notifications::default());
    }

    #[tokio::test(start_paused = true)]
    async fn replaced_timer_does_not_clear_successor() {
        let channel = NotificationChannel::default();
        channel.error("A");
        tokio::time::sleep(Duration::from_secs(4)).await;
        channel.error("B");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(text(&channel, NotificationKind::Error), Some("B".to_string()));

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(text(&channel, NotificationKind::Error), None);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_early() {
        let channel = NotificationChannel::new(Duration::from_secs(60), Duration::from_secs(60));
        let mut rx = channel.subscribe();
        channel.success("done");
        rx.changed().await.unwrap();
        channel.clear(NotificationKind::Success);
        rx.changed().await.unwrap();
        assert!(rx.borrow().success.is_none());
    }

    #[test]
    fn notify_without_runtime_still_shows() {
        let channel = NotificationChannel::default();
        channel.error("no runtime");
        assert_eq!(
            text(&channel, NotificationKind::Error),
            Some("no runtime".to_string())
        );
    }
}
