use biometrics::{Collector, Counter, Moments};

pub(crate) static STREAM_BYTES: Counter = Counter::new("sluice.stream.bytes");
pub(crate) static STREAM_FRAMES: Counter = Counter::new("sluice.stream.frames");
pub(crate) static STREAM_FRAGMENTS: Counter = Counter::new("sluice.stream.fragments");
pub(crate) static STREAM_IGNORED_FRAMES: Counter = Counter::new("sluice.stream.ignored_frames");
pub(crate) static STREAM_MALFORMED_FRAMES: Counter =
    Counter::new("sluice.stream.malformed_frames");
pub(crate) static STREAM_DISCARDED_TAILS: Counter = Counter::new("sluice.stream.discarded_tails");
pub(crate) static STREAM_TTFB: Moments = Moments::new("sluice.stream.ttfb_seconds");

pub(crate) static TURN_STARTED: Counter = Counter::new("sluice.turn.started");
pub(crate) static TURN_SETTLED: Counter = Counter::new("sluice.turn.settled");
pub(crate) static TURN_FAILED: Counter = Counter::new("sluice.turn.failed");
pub(crate) static TURN_CANCELLED: Counter = Counter::new("sluice.turn.cancelled");
pub(crate) static TURN_BUSY_REJECTIONS: Counter = Counter::new("sluice.turn.busy_rejections");
pub(crate) static TURN_DURATION: Moments = Moments::new("sluice.turn.duration_seconds");

pub(crate) static SESSION_MUTATE_SKIPPED: Counter = Counter::new("sluice.session.mutate_skipped");
pub(crate) static REGISTRY_BACKEND_ERRORS: Counter =
    Counter::new("sluice.registry.backend_errors");

pub(crate) static PREFERENCE_WRITES: Counter = Counter::new("sluice.preferences.writes");
pub(crate) static PREFERENCE_WRITE_ERRORS: Counter =
    Counter::new("sluice.preferences.write_errors");

pub(crate) static NOTIFICATIONS_RAISED: Counter = Counter::new("sluice.notifications.raised");
pub(crate) static NOTIFICATIONS_EXPIRED: Counter = Counter::new("sluice.notifications.expired");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&STREAM_BYTES);
    collector.register_counter(&STREAM_FRAMES);
    collector.register_counter(&STREAM_FRAGMENTS);
    collector.register_counter(&STREAM_IGNORED_FRAMES);
    collector.register_counter(&STREAM_MALFORMED_FRAMES);
    collector.register_counter(&STREAM_DISCARDED_TAILS);
    collector.register_moments(&STREAM_TTFB);

    collector.register_counter(&TURN_STARTED);
    collector.register_counter(&TURN_SETTLED);
    collector.register_counter(&TURN_FAILED);
    collector.register_counter(&TURN_CANCELLED);
    collector.register_counter(&TURN_BUSY_REJECTIONS);
    collector.register_moments(&TURN_DURATION);

    collector.register_counter(&SESSION_MUTATE_SKIPPED);
    collector.register_counter(&REGISTRY_BACKEND_ERRORS);

    collector.register_counter(&PREFERENCE_WRITES);
    collector.register_counter(&PREFERENCE_WRITE_ERRORS);

    collector.register_counter(&NOTIFICATIONS_RAISED);
    collector.register_counter(&NOTIFICATIONS_EXPIRED);
}
