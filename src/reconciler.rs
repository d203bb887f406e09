//! The stream reconciler drives one chat turn per session.
//!
//! A turn moves `Sending -> Streaming -> Settling` and then disappears (idle), or it ends up
//! `Failed` on the way.  While a turn is in flight the reconciler owns the session being written
//! to; the registry gets it back when the turn ends, whichever way it ends.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{ChatBackend, ChatRequest, ModelSelection};
use crate::notify::NotificationChannel;
use crate::observability::{
    TURN_BUSY_REJECTIONS, TURN_CANCELLED, TURN_DURATION, TURN_FAILED, TURN_SETTLED, TURN_STARTED,
};
use crate::registry::SessionRegistry;
use crate::session::{Message, MessageContent, Session};
use crate::sse::{StreamEvent, process_sse};
use crate::{Error, Result};

/// Invoked with every fragment, in arrival order.
pub type FragmentCallback = Box<dyn FnMut(&str) + Send>;

/// Where an in-flight turn is.  A session without a turn is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    /// The request is out; no response yet.
    Sending,
    /// Fragments are arriving.
    Streaming,
    /// The terminal marker arrived and the session is being written back.
    Settling,
    /// The turn went wrong and is being written back as it stands.
    Failed,
}

/// An in-flight turn as observers see it.
#[derive(Debug, Clone)]
pub struct TurnStatus {
    /// The current phase.
    pub phase: TurnPhase,
    /// Every fragment received so far, concatenated.
    pub text: String,
    /// The session with the user message and the growing assistant message.
    pub session: Arc<Session>,
    token: CancellationToken,
}

/// Every in-flight turn, by session identifier.
pub type InFlight = BTreeMap<String, TurnStatus>;

struct Inner {
    registry: SessionRegistry,
    chat: Arc<dyn ChatBackend>,
    notifier: NotificationChannel,
    turns: watch::Sender<InFlight>,
}

/// The stream reconciler.  Clones share state.
#[derive(Clone)]
pub struct StreamReconciler {
    inner: Arc<Inner>,
}

impl StreamReconciler {
    /// Create a reconciler that settles into `registry`.
    pub fn new(
        registry: SessionRegistry,
        chat: Arc<dyn ChatBackend>,
        notifier: NotificationChannel,
    ) -> Self {
        let (turns, _) = watch::channel(InFlight::new());
        Self {
            inner: Arc::new(Inner {
                registry,
                chat,
                notifier,
                turns,
            }),
        }
    }

    /// Send `prompt` to the active session.
    ///
    /// The user message and an empty assistant placeholder are appended before anything goes on
    /// the wire.  The turn itself runs on a spawned task; the returned handle reports how it
    /// ended.  Must be called from within a tokio runtime.
    pub fn send(
        &self,
        prompt: &str,
        model: Option<&ModelSelection>,
        on_fragment: Option<FragmentCallback>,
    ) -> Result<StreamHandle> {
        let Some(session) = self.inner.registry.active_session() else {
            let err = Error::no_active_session();
            self.inner.notifier.error(err.to_string());
            return Err(err);
        };
        let session_id = session.id.clone();

        let mut placeholder = Message::placeholder();
        if let Some(model) = model {
            placeholder = placeholder.with_model(&model.provider, &model.model);
        }
        let session = session
            .append_message(Message::user(prompt))
            .append_message(placeholder);

        let token = CancellationToken::new();
        let status = TurnStatus {
            phase: TurnPhase::Sending,
            text: String::new(),
            session: Arc::new(session),
            token: token.clone(),
        };
        let mut busy = false;
        self.inner.turns.send_if_modified(|turns| {
            if turns.contains_key(&session_id) {
                busy = true;
                return false;
            }
            turns.insert(session_id.clone(), status);
            true
        });
        if busy {
            TURN_BUSY_REJECTIONS.click();
            tracing::debug!(session_id = %session_id, "rejecting send; a turn is in flight");
            let err = Error::session_busy(&session_id);
            self.inner.notifier.error(err.to_string());
            return Err(err);
        }
        TURN_STARTED.click();
        tracing::debug!(session_id = %session_id, phase = ?TurnPhase::Sending, "turn started");

        let request = ChatRequest::new(&session_id, prompt).with_model(model);
        let this = self.clone();
        let task_token = token.clone();
        let join = tokio::spawn(async move {
            let mut guard = TurnGuard {
                reconciler: &this,
                session_id: &request.session_id,
                armed: true,
            };
            let result = this.drive(&request, task_token, on_fragment).await;
            guard.armed = false;
            result
        });
        Ok(StreamHandle {
            session_id,
            token,
            join: Some(join),
            detached: false,
        })
    }

    /// Cancel the in-flight turn of `session_id`.  Returns false when the session is idle.
    pub fn cancel(&self, session_id: &str) -> bool {
        match self.inner.turns.borrow().get(session_id) {
            Some(turn) => {
                turn.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every in-flight turn.
    pub fn cancel_all(&self) -> usize {
        let turns = self.inner.turns.borrow();
        for turn in turns.values() {
            turn.token.cancel();
        }
        turns.len()
    }

    /// The in-flight turn of `session_id`.
    pub fn turn(&self, session_id: &str) -> Option<TurnStatus> {
        self.inner.turns.borrow().get(session_id).cloned()
    }

    /// True while `session_id` has a turn in flight.
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.inner.turns.borrow().contains_key(session_id)
    }

    /// True while any session has a turn in flight.
    pub fn is_streaming(&self) -> bool {
        !self.inner.turns.borrow().is_empty()
    }

    /// Observe in-flight turns.
    pub fn subscribe(&self) -> watch::Receiver<InFlight> {
        self.inner.turns.subscribe()
    }

    async fn drive(
        &self,
        request: &ChatRequest,
        token: CancellationToken,
        mut on_fragment: Option<FragmentCallback>,
    ) -> Result<Session> {
        let session_id = request.session_id.clone();
        let started = Instant::now();

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return self.cancelled(&session_id),
            opened = self.inner.chat.open_stream(request) => opened,
        };
        let body = match opened {
            Ok(body) => body,
            Err(err) => return self.failed(&session_id, err),
        };
        self.transition(&session_id, TurnPhase::Streaming);

        let mut events = Box::pin(process_sse(body));
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return self.cancelled(&session_id),
                event = events.next() => event,
            };
            match event {
                Some(Ok(StreamEvent::Fragment(fragment))) => {
                    self.apply(&session_id, &fragment);
                    if let Some(callback) = on_fragment.as_mut() {
                        callback(&fragment);
                    }
                }
                Some(Ok(StreamEvent::Done)) => {
                    let session = self.settled(&session_id);
                    TURN_DURATION.add(started.elapsed().as_secs_f64());
                    return session;
                }
                Some(Err(err)) => {
                    let err = if err.is_stream_interrupted() {
                        err
                    } else {
                        Error::stream_interrupted(err.to_string(), Some(Box::new(err)))
                    };
                    return self.failed(&session_id, err);
                }
                None => {
                    let err = Error::stream_interrupted(
                        "response ended before the terminal marker",
                        None,
                    );
                    return self.failed(&session_id, err);
                }
            }
        }
    }

    fn transition(&self, session_id: &str, phase: TurnPhase) {
        self.inner.turns.send_if_modified(|turns| match turns.get_mut(session_id) {
            Some(turn) if turn.phase != phase => {
                turn.phase = phase;
                true
            }
            _ => false,
        });
        tracing::debug!(session_id = %session_id, ?phase, "turn transition");
    }

    fn apply(&self, session_id: &str, fragment: &str) {
        self.inner.turns.send_if_modified(|turns| {
            let Some(turn) = turns.get_mut(session_id) else {
                return false;
            };
            turn.text.push_str(fragment);
            let text = turn.text.clone();
            Arc::make_mut(&mut turn.session)
                .mutate_last_message(|content| *content = MessageContent::Text(text));
            true
        });
        tracing::trace!(session_id = %session_id, bytes = fragment.len(), "fragment applied");
    }

    /// Hand the session back to the registry and drop the turn.
    fn finish_turn(&self, session_id: &str) -> Option<Session> {
        let session = self
            .inner
            .turns
            .borrow()
            .get(session_id)
            .map(|turn| Session::clone(&turn.session));
        let merged = session
            .as_ref()
            .and_then(|session| self.inner.registry.settle(session));
        self.inner.turns.send_modify(|turns| {
            turns.remove(session_id);
        });
        merged.or(session)
    }

    fn settled(&self, session_id: &str) -> Result<Session> {
        self.transition(session_id, TurnPhase::Settling);
        let session = self.finish_turn(session_id);
        TURN_SETTLED.click();
        tracing::debug!(session_id = %session_id, "turn settled");
        session.ok_or_else(|| {
            Error::not_found(
                "turn vanished while settling",
                Some(session_id.to_string()),
            )
        })
    }

    fn failed(&self, session_id: &str, err: Error) -> Result<Session> {
        self.transition(session_id, TurnPhase::Failed);
        self.finish_turn(session_id);
        TURN_FAILED.click();
        tracing::warn!(session_id = %session_id, error = %err, "turn failed");
        if err.is_user_visible() {
            self.inner.notifier.error(err.to_string());
        }
        Err(err)
    }

    fn cancelled(&self, session_id: &str) -> Result<Session> {
        self.finish_turn(session_id);
        TURN_CANCELLED.click();
        tracing::debug!(session_id = %session_id, "turn cancelled");
        Err(Error::cancelled(session_id))
    }
}

impl std::fmt::Debug for StreamReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let turns = self.inner.turns.borrow();
        f.debug_struct("StreamReconciler")
            .field("in_flight", &turns.keys().collect::<Vec<_>>())
            .finish()
    }
}

// Releases the turn when its task unwinds or is dropped before reaching an outcome, so a panic
// in a fragment callback cannot leave the session busy.
struct TurnGuard<'a> {
    reconciler: &'a StreamReconciler,
    session_id: &'a str,
    armed: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            TURN_FAILED.click();
            tracing::warn!(session_id = %self.session_id, "turn task ended without an outcome");
            self.reconciler.finish_turn(self.session_id);
        }
    }
}

/////////////////////////////////////////// StreamHandle ///////////////////////////////////////

/// A handle on one in-flight turn.
///
/// Dropping the handle cancels the turn unless [`StreamHandle::detach`] was called.
#[derive(Debug)]
pub struct StreamHandle {
    session_id: String,
    token: CancellationToken,
    join: Option<JoinHandle<Result<Session>>>,
    detached: bool,
}

impl StreamHandle {
    /// The session the turn writes to.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stop the turn.  The session keeps whatever arrived so far.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True once the turn has ended.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|join| join.is_finished())
    }

    /// Wait for the turn to end.
    ///
    /// Returns the settled session, or the error that ended the turn.  A cancelled turn
    /// returns [`Error::Cancelled`].
    ///
    /// Dropping the returned future before it completes cancels the turn, the same as dropping
    /// the handle.
    pub async fn finish(mut self) -> Result<Session> {
        let Some(join) = self.join.as_mut() else {
            return Err(Error::cancelled(&self.session_id));
        };
        let joined = join.await;
        self.join = None;
        match joined {
            Ok(result) => result,
            Err(err) => Err(Error::stream_interrupted(
                "stream task did not complete",
                Some(Box::new(err)),
            )),
        }
    }

    /// Let the turn run to completion without this handle.
    pub fn detach(mut self) {
        self.detached = true;
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if !self.detached && self.join.is_some() {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;
    use futures::channel::mpsc;

    use super::*;
    use crate::backend::ByteStream;
    use crate::notify::NotificationKind;
    use crate::registry::tests::FakeSessions;
    use crate::session::SessionUpdate;

    /// A chat backend that hands out prepared bodies in order.
    #[derive(Default)]
    pub(crate) struct FakeChat {
        bodies: Mutex<VecDeque<Result<ByteStream>>>,
        pub(crate) requests: Mutex<Vec<ChatRequest>>,
    }

    impl FakeChat {
        pub(crate) fn push(&self, body: Result<ByteStream>) {
            self.bodies.lock().unwrap().push_back(body);
        }

        /// Queue a body fed through the returned sender.
        pub(crate) fn channel(&self) -> mpsc::UnboundedSender<Result<Bytes>> {
            let (tx, rx) = mpsc::unbounded();
            self.push(Ok(Box::pin(rx)));
            tx
        }
    }

    #[async_trait::async_trait]
    impl ChatBackend for FakeChat {
        async fn open_stream(&self, request: &ChatRequest) -> Result<ByteStream> {
            self.requests.lock().unwrap().push(request.clone());
            self.bodies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(Error::transport("no body queued", Some(500), None)))
        }
    }

    struct Fixture {
        registry: SessionRegistry,
        chat: Arc<FakeChat>,
        notifier: NotificationChannel,
        reconciler: StreamReconciler,
    }

    async fn fixture() -> Fixture {
        let notifier = NotificationChannel::default();
        let registry = SessionRegistry::new(Arc::new(FakeSessions::default()), notifier.clone());
        registry.create(Some("chat")).await.unwrap();
        let chat = Arc::new(FakeChat::default());
        let reconciler = StreamReconciler::new(registry.clone(), chat.clone(), notifier.clone());
        Fixture {
            registry,
            chat,
            notifier,
            reconciler,
        }
    }

    fn chunk(text: &str) -> Result<Bytes> {
        Ok(Bytes::copy_from_slice(text.as_bytes()))
    }

    async fn wait_for_text(reconciler: &StreamReconciler, session_id: &str, text: &str) {
        let mut rx = reconciler.subscribe();
        rx.wait_for(|turns| turns.get(session_id).map(|t| t.text.as_str()) == Some(text))
            .await
            .unwrap();
    }

    fn last_text(session: &Session) -> String {
        session.last_message().unwrap().content.as_text()
    }

    #[tokio::test]
    async fn fragments_concatenate_in_order() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handle = f
            .reconciler
            .send(
                "hi",
                Some(&ModelSelection::new("Anthropic", "claude-sonnet-4-20250514")),
                Some(Box::new(move |fragment: &str| {
                    sink.lock().unwrap().push(fragment.to_string())
                })),
            )
            .unwrap();
        tx.unbounded_send(chunk("data: Hel")).unwrap();
        tx.unbounded_send(chunk("lo\n\ndata: , wor")).unwrap();
        tx.unbounded_send(chunk("ld\ndata: [DONE]\n")).unwrap();

        let session = handle.finish().await.unwrap();
        assert_eq!(last_text(&session), "Hello, world");
        assert_eq!(*seen.lock().unwrap(), vec!["Hello", ", world"]);

        let stored = f.registry.get(&session.id).unwrap();
        assert_eq!(stored, session);
        assert_eq!(stored.messages[0].content.as_text(), "hi");
        assert_eq!(
            stored.messages[1].model_name.as_deref(),
            Some("claude-sonnet-4-20250514")
        );
        assert!(!f.reconciler.is_streaming());

        let requests = f.chat.requests.lock().unwrap();
        assert_eq!(requests[0].model_provider.as_deref(), Some("Anthropic"));
    }

    #[tokio::test]
    async fn send_while_streaming_is_rejected() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f.reconciler.send("first", None, None).unwrap();
        tx.unbounded_send(chunk("data: partial\n")).unwrap();
        wait_for_text(&f.reconciler, &session_id, "partial").await;

        let err = f.reconciler.send("second", None, None).unwrap_err();
        assert!(err.is_session_busy());
        let turn = f.reconciler.turn(&session_id).unwrap();
        assert_eq!(turn.phase, TurnPhase::Streaming);
        assert_eq!(turn.session.message_count(), 2);
        assert_eq!(last_text(&turn.session), "partial");
        assert_eq!(f.chat.requests.lock().unwrap().len(), 1);

        tx.unbounded_send(chunk("data: [DONE]\n")).unwrap();
        let session = handle.finish().await.unwrap();
        assert_eq!(last_text(&session), "partial");
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn abrupt_close_keeps_partial_content() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f.reconciler.send("hi", None, None).unwrap();
        tx.unbounded_send(chunk("data: partial\n")).unwrap();
        drop(tx);

        let err = handle.finish().await.unwrap_err();
        assert!(err.is_stream_interrupted());
        assert_eq!(last_text(&f.registry.get(&session_id).unwrap()), "partial");
        assert!(f.notifier.current().get(NotificationKind::Error).is_some());
        assert!(!f.reconciler.is_busy(&session_id));
    }

    #[tokio::test]
    async fn body_error_interrupts_turn() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let handle = f.reconciler.send("hi", None, None).unwrap();
        tx.unbounded_send(chunk("data: so far\n")).unwrap();
        tx.unbounded_send(Err(Error::stream_interrupted("connection reset", None)))
            .unwrap();
        let err = handle.finish().await.unwrap_err();
        assert!(err.is_stream_interrupted());
        let session = f.registry.active_session().unwrap();
        assert_eq!(last_text(&session), "so far");
    }

    #[tokio::test]
    async fn transport_error_keeps_user_message() {
        let f = fixture().await;
        f.chat
            .push(Err(Error::transport("Model overloaded", Some(503), None)));
        let handle = f.reconciler.send("keep me", None, None).unwrap();
        let err = handle.finish().await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.status_code(), Some(503));

        let session = f.registry.active_session().unwrap();
        assert_eq!(session.message_count(), 2);
        assert_eq!(session.messages[0].content.as_text(), "keep me");
        assert!(session.messages[1].is_assistant());
        assert!(session.messages[1].content.is_empty());
        let banner = f.notifier.current().error.map(|n| n.text);
        assert_eq!(banner, Some(err.to_string()));
    }

    #[tokio::test]
    async fn no_active_session_is_reported() {
        let notifier = NotificationChannel::default();
        let registry = SessionRegistry::new(Arc::new(FakeSessions::default()), notifier.clone());
        let reconciler =
            StreamReconciler::new(registry, Arc::new(FakeChat::default()), notifier.clone());
        let err = reconciler.send("hi", None, None).unwrap_err();
        assert!(err.is_no_active_session());
        assert!(notifier.current().error.is_some());
        assert!(!reconciler.is_streaming());
    }

    #[tokio::test]
    async fn cancel_keeps_partial_and_frees_session() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f.reconciler.send("hi", None, None).unwrap();
        tx.unbounded_send(chunk("data: part\n")).unwrap();
        wait_for_text(&f.reconciler, &session_id, "part").await;

        handle.cancel();
        let err = handle.finish().await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(f.notifier.current().error.is_none());
        assert_eq!(last_text(&f.registry.get(&session_id).unwrap()), "part");
        assert!(tx.is_closed());

        let tx = f.chat.channel();
        let handle = f.reconciler.send("again", None, None).unwrap();
        tx.unbounded_send(chunk("data: ok\ndata: [DONE]\n")).unwrap();
        let session = handle.finish().await.unwrap();
        assert_eq!(session.message_count(), 4);
        assert_eq!(last_text(&session), "ok");
    }

    #[tokio::test]
    async fn dropping_handle_cancels() {
        let f = fixture().await;
        let _tx = f.chat.channel();
        let mut rx = f.reconciler.subscribe();
        drop(f.reconciler.send("hi", None, None).unwrap());
        rx.wait_for(|turns| turns.is_empty()).await.unwrap();
        let session = f.registry.active_session().unwrap();
        assert_eq!(session.message_count(), 2);
    }

    #[tokio::test]
    async fn detached_turn_runs_to_completion() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        f.reconciler.send("hi", None, None).unwrap().detach();
        tx.unbounded_send(chunk("data: done anyway\ndata: [DONE]\n"))
            .unwrap();
        let mut rx = f.registry.subscribe();
        rx.wait_for(|state| {
            state
                .get(&session_id)
                .is_some_and(|s| s.message_count() == 2 && last_text(s) == "done anyway")
        })
        .await
        .unwrap();
        assert!(!f.reconciler.cancel(&session_id));
    }

    #[tokio::test]
    async fn abandoning_finish_cancels() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f.reconciler.send("hi", None, None).unwrap();
        tx.unbounded_send(chunk("data: part\n")).unwrap();
        wait_for_text(&f.reconciler, &session_id, "part").await;

        let waited = tokio::time::timeout(Duration::from_millis(50), handle.finish()).await;
        assert!(waited.is_err());

        let mut rx = f.reconciler.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|turns| turns.is_empty()))
            .await
            .unwrap()
            .unwrap();
        assert!(!f.reconciler.is_busy(&session_id));
        assert_eq!(last_text(&f.registry.get(&session_id).unwrap()), "part");
        tokio::time::timeout(Duration::from_secs(5), async {
            while !tx.is_closed() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn rename_while_streaming_survives_settle() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f.reconciler.send("hi", None, None).unwrap();
        tx.unbounded_send(chunk("data: Hello\n")).unwrap();
        wait_for_text(&f.reconciler, &session_id, "Hello").await;

        f.registry
            .update(&session_id, SessionUpdate::title("Renamed"))
            .await
            .unwrap();
        f.registry
            .update(&session_id, SessionUpdate::pinned(true))
            .await
            .unwrap();
        tx.unbounded_send(chunk("data: [DONE]\n")).unwrap();

        let session = handle.finish().await.unwrap();
        assert_eq!(session.title, "Renamed");
        assert!(session.pinned);
        assert_eq!(last_text(&session), "Hello");
        let stored = f.registry.get(&session_id).unwrap();
        assert_eq!(stored, session);
        assert_eq!(stored.messages[0].content.as_text(), "hi");
    }

    #[tokio::test]
    async fn panicking_callback_frees_session() {
        let f = fixture().await;
        let tx = f.chat.channel();
        let session_id = f.registry.active_id().unwrap();
        let handle = f
            .reconciler
            .send(
                "hi",
                None,
                Some(Box::new(|fragment: &str| {
                    if fragment == "boom" {
                        panic!("callback failed on {fragment}");
                    }
                })),
            )
            .unwrap();
        tx.unbounded_send(chunk("data: boom\n")).unwrap();

        let err = handle.finish().await.unwrap_err();
        assert!(err.is_stream_interrupted());
        assert!(!f.reconciler.is_busy(&session_id));
        assert_eq!(last_text(&f.registry.get(&session_id).unwrap()), "boom");

        let tx = f.chat.channel();
        let handle = f.reconciler.send("again", None, None).unwrap();
        tx.unbounded_send(chunk("data: ok\ndata: [DONE]\n")).unwrap();
        let session = handle.finish().await.unwrap();
        assert_eq!(last_text(&session), "ok");
    }
}
