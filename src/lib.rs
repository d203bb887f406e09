// Public modules
pub mod backend;
pub mod chat;
pub mod client;
pub mod engine;
pub mod error;
pub mod notify;
pub mod observability;
pub mod preferences;
pub mod reconciler;
pub mod registry;
pub mod session;
pub mod sse;
pub mod utils;

// Re-exports
pub use backend::{
    ByteStream, ChatBackend, ChatRequest, JsonFilePreferences, MemoryPreferences, ModelSelection,
    PreferenceBackend, SessionBackend,
};
pub use client::HttpBackend;
pub use engine::{Engine, EngineConfig};
pub use error::{Error, Result};
pub use notify::{Notification, NotificationChannel, NotificationKind, Notifications};
pub use observability::register_biometrics;
pub use preferences::{PreferenceKey, PreferenceStore, Theme};
pub use reconciler::{
    FragmentCallback, InFlight, StreamHandle, StreamReconciler, TurnPhase, TurnStatus,
};
pub use registry::{RegistryState, SessionRegistry};
pub use session::{
    ContentBlock, Message, MessageContent, MessageRole, Session, SessionStats, SessionUpdate,
};
pub use sse::{FrameDecoder, StreamEvent, parse_frame, process_sse};
